//! Static credential table with Argon2 password verification.

use crate::models::{Identity, UserEntry};
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use rand::Rng;
use std::collections::HashMap;
use zeroize::Zeroizing;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// Unknown username or wrong password. The two cases are indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid password hash for user '{0}'")]
    InvalidHash(String),

    #[error("Duplicate user '{0}'")]
    DuplicateUser(String),

    #[error("Hashing error: {0}")]
    Hashing(String),
}

struct CredentialRecord {
    password_hash: String,
    roles: Vec<String>,
}

/// Read-only username → password hash table.
pub struct CredentialStore {
    records: HashMap<String, CredentialRecord>,
    /// Verified against when the username is unknown, so lookup misses cost
    /// the same as hash mismatches.
    dummy_hash: String,
}

impl CredentialStore {
    /// Build the store from configured users.
    ///
    /// Every hash is parsed up front; a malformed or non-Argon2 PHC string fails startup
    /// rather than the first login for that user.
    pub fn new(users: &[UserEntry]) -> Result<Self, CredentialError> {
        let mut records = HashMap::with_capacity(users.len());
        let mut cost: Option<Params> = None;
        for user in users {
            let parsed = PasswordHash::new(&user.password_hash)
                .map_err(|_| CredentialError::InvalidHash(user.username.clone()))?;
            if !is_argon2(&parsed) {
                return Err(CredentialError::InvalidHash(user.username.clone()));
            }
            let params = Params::try_from(&parsed)
                .map_err(|_| CredentialError::InvalidHash(user.username.clone()))?;
            cost = Some(match cost {
                Some(current) => max_cost(&current, &params)?,
                None => params,
            });
            let record = CredentialRecord {
                password_hash: user.password_hash.clone(),
                roles: user.roles.clone(),
            };
            if records.insert(user.username.clone(), record).is_some() {
                return Err(CredentialError::DuplicateUser(user.username.clone()));
            }
        }

        // At least as slow as the most expensive configured hash
        let dummy_hash = dummy_hash(cost.unwrap_or_default())?;

        Ok(Self {
            records,
            dummy_hash,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Verify a username/password pair.
    ///
    /// CPU-bound and deliberately slow; call it from a blocking context.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Identity, CredentialError> {
        let record = self.records.get(username);
        let stored = record
            .map(|r| r.password_hash.as_str())
            .unwrap_or(self.dummy_hash.as_str());

        let matches = match PasswordHash::new(stored) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "Stored password hash failed to parse");
                false
            }
        };

        match record {
            Some(record) if matches => Ok(Identity::new(username, record.roles.iter().cloned())),
            _ => Err(CredentialError::InvalidCredentials),
        }
    }
}

fn is_argon2(hash: &PasswordHash<'_>) -> bool {
    [Algorithm::Argon2id, Algorithm::Argon2i, Algorithm::Argon2d]
        .iter()
        .any(|alg| hash.algorithm == alg.ident())
}

fn max_cost(a: &Params, b: &Params) -> Result<Params, CredentialError> {
    Params::new(
        a.m_cost().max(b.m_cost()),
        a.t_cost().max(b.t_cost()),
        a.p_cost().max(b.p_cost()),
        None,
    )
    .map_err(|e| CredentialError::Hashing(e.to_string()))
}

fn dummy_hash(params: Params) -> Result<String, CredentialError> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill(&mut salt_bytes);
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| CredentialError::Hashing(e.to_string()))?;

    let mut password = Zeroizing::new([0u8; 32]);
    rand::rng().fill(&mut password[..]);

    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(&password[..], &salt)
        .map(|h| h.to_string())
        .map_err(|e| CredentialError::Hashing(e.to_string()))
}

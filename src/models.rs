//! Request and response models for the gateway.
//!
//! All models use serde for serialization/deserialization.
//! Identity models describe the authenticated principal.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Login Models
// ============================================================================

/// Credentials submitted to `POST /login`.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Response after a successful login. The login page script navigates to `redirect`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub redirect: String,
}

// ============================================================================
// Identity Models
// ============================================================================

/// Role assigned to users that have no roles configured.
pub const DEFAULT_ROLE: &str = "user";

/// Claim keys owned by the session token itself. Extension claims may not use them.
pub const RESERVED_CLAIMS: [&str; 5] = ["sub", "roles", "iat", "nbf", "exp"];

/// Scalar value of an extension claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Bool(bool),
    Integer(i64),
    String(String),
}

impl From<&str> for ClaimValue {
    fn from(value: &str) -> Self {
        ClaimValue::String(value.to_string())
    }
}

impl From<String> for ClaimValue {
    fn from(value: String) -> Self {
        ClaimValue::String(value)
    }
}

impl From<i64> for ClaimValue {
    fn from(value: i64) -> Self {
        ClaimValue::Integer(value)
    }
}

impl From<bool> for ClaimValue {
    fn from(value: bool) -> Self {
        ClaimValue::Bool(value)
    }
}

/// An authenticated principal, produced by the credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub roles: BTreeSet<String>,
    pub claims: BTreeMap<String, ClaimValue>,
}

impl Identity {
    /// Identity carrying the given roles and no extension claims.
    pub fn new<I, S>(username: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            username: username.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            claims: BTreeMap::new(),
        }
    }

    /// Attach an extension claim. Returns false (and leaves the identity
    /// unchanged) when `key` is one of [`RESERVED_CLAIMS`].
    pub fn insert_claim(&mut self, key: impl Into<String>, value: impl Into<ClaimValue>) -> bool {
        let key = key.into();
        if is_reserved_claim(&key) {
            return false;
        }
        self.claims.insert(key, value.into());
        true
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

pub fn is_reserved_claim(key: &str) -> bool {
    RESERVED_CLAIMS.contains(&key)
}

// ============================================================================
// Configuration Models
// ============================================================================

/// A configured user, as listed in `AUTH_USERS` or `AUTH_USERS_FILE`.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    /// Argon2 PHC string, e.g. `$argon2id$v=19$m=19456,t=2,p=1$...`.
    pub password_hash: String,
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,
}

impl UserEntry {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            roles: default_roles(),
        }
    }
}

impl std::fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEntry")
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("roles", &self.roles)
            .finish()
    }
}

fn default_roles() -> Vec<String> {
    vec![DEFAULT_ROLE.to_string()]
}

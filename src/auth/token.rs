//! Signed session tokens (HS256 JWT) and their cookie transport.
//!
//! A token is valid iff its signature verifies against the configured secret
//! and `nbf <= now < exp`. There is no leeway and no server-side refresh.

use crate::config::Config;
use crate::models::{ClaimValue, Identity};
use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The only algorithm tokens are signed and accepted with.
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("No session cookie")]
    NoSession,

    #[error("Malformed token")]
    Malformed,

    #[error("Bad signature")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Token not yet valid")]
    NotYetValid,

    #[error("Unexpected signing algorithm")]
    WrongAlgorithm,

    #[error("Token signing failed: {0}")]
    Internal(String),
}

impl TokenError {
    /// Short label for server-side diagnostics.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::NoSession => "no_session",
            TokenError::Malformed => "malformed",
            TokenError::BadSignature => "bad_signature",
            TokenError::Expired => "expired",
            TokenError::NotYetValid => "not_yet_valid",
            TokenError::WrongAlgorithm => "wrong_algorithm",
            TokenError::Internal(_) => "internal",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::WrongAlgorithm
            }
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            _ => TokenError::Malformed,
        }
    }
}

/// Payload of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Username
    pub sub: String,
    pub roles: Vec<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Extension claims; never uses the keys above.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, ClaimValue>,
}

impl SessionClaims {
    pub fn identity(&self) -> Identity {
        let mut identity = Identity::new(self.sub.clone(), self.roles.iter().cloned());
        identity.claims = self.extra.clone();
        identity
    }
}

/// Issues and validates session tokens. Immutable after construction.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl_secs: i64,
    cookie_name: String,
    cookie_secure: bool,
    cookie_max_age_secs: i64,
}

impl TokenService {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(
            config.jwt_secret.as_bytes(),
            config.cookie_name.clone(),
            config.cookie_secure,
            config.cookie_max_age_secs,
            config.token_ttl_secs,
        )
    }

    pub fn from_parts(
        secret: &[u8],
        cookie_name: impl Into<String>,
        cookie_secure: bool,
        cookie_max_age_secs: u64,
        token_ttl_secs: u64,
    ) -> Self {
        // Signature and algorithm are checked by jsonwebtoken; the validity
        // window is checked in validate_at so the boundaries are exact.
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["sub", "nbf", "exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            token_ttl_secs: i64::try_from(token_ttl_secs).unwrap_or(i64::MAX),
            cookie_name: cookie_name.into(),
            cookie_secure,
            cookie_max_age_secs: i64::try_from(cookie_max_age_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Issue a token for `username` valid from now for the configured duration.
    pub fn issue(&self, username: &str, roles: &[String]) -> Result<String, TokenError> {
        self.issue_at(&Identity::new(username, roles.iter().cloned()), unix_now())
    }

    /// Issue a token carrying the identity's roles and extension claims.
    pub fn issue_identity(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(identity, unix_now())
    }

    pub fn issue_at(&self, identity: &Identity, now: i64) -> Result<String, TokenError> {
        let claims = SessionClaims {
            sub: identity.username.clone(),
            roles: identity.roles.iter().cloned().collect(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(self.token_ttl_secs),
            extra: identity.claims.clone(),
        };
        jsonwebtoken::encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Internal(e.to_string()))
    }

    /// Validate a token against the current time.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.validate_at(token, unix_now())
    }

    pub fn validate_at(&self, token: &str, now: i64) -> Result<SessionClaims, TokenError> {
        check_declared_algorithm(token)?;

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Session cookie carrying `token`.
    pub fn encode_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.cookie_secure)
            .max_age(time::Duration::seconds(self.cookie_max_age_secs))
            .build()
    }

    /// Cookie that makes the browser discard the session immediately.
    pub fn encode_clear_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), String::new()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.cookie_secure)
            .max_age(time::Duration::ZERO)
            .build()
    }

    /// Read the session token from the request's `Cookie` headers.
    pub fn extract_token(&self, headers: &HeaderMap) -> Result<String, TokenError> {
        let jar = CookieJar::from_headers(headers);
        match jar.get(&self.cookie_name) {
            Some(cookie) if !cookie.value().is_empty() => Ok(cookie.value().to_string()),
            _ => Err(TokenError::NoSession),
        }
    }
}

/// Reject anything but the pinned algorithm before the token is decoded,
/// whatever the header claims.
fn check_declared_algorithm(token: &str) -> Result<(), TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let raw = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Malformed)?;
    let header: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;

    match header.get("alg").and_then(serde_json::Value::as_str) {
        Some("HS256") => Ok(()),
        Some(_) => Err(TokenError::WrongAlgorithm),
        None => Err(TokenError::Malformed),
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

//! Password verification, signed session tokens, and the session gate.

pub mod credentials;
pub mod middleware;
pub mod token;

pub use credentials::{CredentialError, CredentialStore};
pub use middleware::{authorize, AppState, AuthSession, LoginRedirect, LOGIN_PATH};
pub use token::{SessionClaims, TokenError, TokenService};

//! Axum extractors for session authentication.

use crate::auth::credentials::CredentialStore;
use crate::auth::token::{SessionClaims, TokenError, TokenService};
use crate::proxy::Forwarder;
use axum::{
    extract::FromRequestParts,
    http::{header::LOCATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Entry point unauthenticated visitors are sent to.
pub const LOGIN_PATH: &str = "/login";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<CredentialStore>,
    pub tokens: Arc<TokenService>,
    pub forwarder: Forwarder,
}

/// Extract and validate the session carried by `headers`.
///
/// Pure check with no side effects; safe to repeat on every request.
pub fn authorize(tokens: &TokenService, headers: &HeaderMap) -> Result<SessionClaims, TokenError> {
    let token = tokens.extract_token(headers)?;
    tokens.validate(&token)
}

/// Authenticated session extractor.
///
/// Reads the session cookie and validates the token it carries.
/// Every failure is answered with the same redirect to the login page.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub claims: SessionClaims,
}

/// Rejection for [`AuthSession`]: `302 Found` to [`LOGIN_PATH`].
#[derive(Debug)]
pub struct LoginRedirect;

impl IntoResponse for LoginRedirect {
    fn into_response(self) -> Response {
        (StatusCode::FOUND, [(LOCATION, LOGIN_PATH)]).into_response()
    }
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = LoginRedirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match authorize(&state.tokens, &parts.headers) {
            Ok(claims) => Ok(AuthSession { claims }),
            Err(err) => {
                // Reason stays server-side; the client only sees the redirect
                tracing::debug!(
                    action = "session_rejected",
                    reason = err.reason(),
                    path = %parts.uri.path(),
                    "Redirecting to login"
                );
                Err(LoginRedirect)
            }
        }
    }
}

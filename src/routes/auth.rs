//! Login and logout endpoints.

use crate::auth::middleware::{AppState, LoginRedirect};
use crate::error::AppError;
use crate::models::{LoginRequest, LoginResponse};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use zeroize::Zeroizing;

/// Path of the HTML login form.
pub const LOGIN_PAGE_PATH: &str = "/login-page";

/// Where the browser goes after a successful login.
const POST_LOGIN_REDIRECT: &str = "/";

/// GET /login: Send browsers to the login form
pub async fn login_redirect() -> Response {
    (StatusCode::FOUND, [(LOCATION, LOGIN_PAGE_PATH)]).into_response()
}

/// Any other method on /login
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// POST /login: Verify credentials and set the session cookie
///
/// The redirect target is returned in the body so the login page script
/// performs the navigation.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    let Json(req) = payload.map_err(|e| {
        tracing::debug!(action = "login_rejected", error = %e, "Unreadable login payload");
        AppError::BadRequest("Invalid request".to_string())
    })?;

    let username = req.username;
    let password = Zeroizing::new(req.password);

    // Argon2 verification is slow by design; keep it off the async workers
    let store = state.credentials.clone();
    let candidate = username.clone();
    let result = tokio::task::spawn_blocking(move || store.authenticate(&candidate, &password))
        .await
        .map_err(|e| AppError::Internal(format!("Credential check failed to run: {}", e)))?;

    let identity = match result {
        Ok(identity) => identity,
        Err(_) => {
            tracing::warn!(action = "login_failed", username = %username, "Invalid credentials");
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }
    };

    let token = state
        .tokens
        .issue_identity(&identity)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(action = "login_success", username = %identity.username, "User authenticated");

    Ok((
        jar.add(state.tokens.encode_cookie(token)),
        Json(LoginResponse {
            redirect: POST_LOGIN_REDIRECT.to_string(),
        }),
    ))
}

/// /logout: Clear the session cookie, whether or not one was sent
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, LoginRedirect) {
    let had_session = jar.get(state.tokens.cookie_name()).is_some();
    tracing::info!(action = "logout", had_session, "Session cookie cleared");
    (jar.add(state.tokens.encode_clear_cookie()), LoginRedirect)
}

//! Gateway routes: login flow, login page assets, and the gated fallback
//! that forwards everything else to the backend.

pub mod auth;

use crate::auth::middleware::{AppState, AuthSession, LOGIN_PATH};
use crate::error::AppError;
use crate::middleware::security_headers;
use auth::LOGIN_PAGE_PATH;
use axum::{
    extract::{Request, State},
    middleware,
    response::Response,
    routing::{any, get},
    Router,
};
use std::path::Path;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

/// Build the gateway router.
///
/// Gateway-owned routes get security headers; every other path requires a
/// valid session and is forwarded to the backend untouched.
pub fn gateway_router(static_dir: &Path) -> Router<AppState> {
    // Explicit CORS: no cross-origin access to the login endpoints.
    // CorsLayer::new() with no allowed origins rejects all CORS preflight requests.
    let pages = Router::new()
        .route(
            LOGIN_PATH,
            get(auth::login_redirect)
                .post(auth::login)
                .fallback(auth::method_not_allowed),
        )
        .route("/logout", any(auth::logout))
        .route_service(LOGIN_PAGE_PATH, ServeFile::new(static_dir.join("login.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::new())
        .layer(middleware::from_fn(security_headers));

    Router::new().merge(pages).fallback(forward)
}

/// Fallback: forward authenticated requests to the backend
///
/// Requests without a valid session never get here: the [`AuthSession`]
/// extractor answers them with a redirect to the login page.
pub async fn forward(
    State(state): State<AppState>,
    session: AuthSession,
    request: Request,
) -> Result<Response, AppError> {
    state.forwarder.forward(&session.claims.identity(), request).await
}

//! Forwarding of authenticated requests to the backend.
//!
//! Request bodies are buffered up to `MAX_BODY_BYTES`; response bodies are
//! streamed back as they arrive.

use crate::config::Config;
use crate::error::AppError;
use crate::models::Identity;
use axum::{
    body::Body,
    extract::Request,
    http::{
        header::{CONNECTION, CONTENT_LENGTH, HOST},
        HeaderMap, HeaderName, HeaderValue, Uri,
    },
    response::Response,
};
use reqwest::Url;
use std::time::Duration;

/// Header carrying the authenticated username to the backend.
pub const X_FORWARDED_USER: HeaderName = HeaderName::from_static("x-forwarded-user");

/// Header carrying the session's roles, comma separated and sorted.
pub const X_FORWARDED_ROLES: HeaderName = HeaderName::from_static("x-forwarded-roles");

/// Headers that describe a single connection and must not be relayed.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Relays requests to the configured backend over a shared client.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    backend: Url,
    max_body_bytes: usize,
}

impl Forwarder {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            // Backend redirects are relayed to the browser, not followed here
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            backend: config.backend_url.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Backend URL for an inbound request URI: backend base path + request
    /// path, request query preserved.
    pub fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.backend.clone();
        let base = self.backend.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base, uri.path()));
        url.set_query(uri.query());
        url
    }

    /// Forward `request` on behalf of `identity` and relay the response.
    pub async fn forward(&self, identity: &Identity, request: Request) -> Result<Response, AppError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| AppError::PayloadTooLarge)?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);
        insert_identity(&mut headers, identity)?;

        let url = self.target_url(&parts.uri);
        let method = parts.method;
        tracing::debug!(action = "forward", method = %method, path = %parts.uri.path(), user = %identity.username, "Forwarding request");

        let upstream = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Replace any client-supplied identity headers with the session's.
fn insert_identity(headers: &mut HeaderMap, identity: &Identity) -> Result<(), AppError> {
    // Only the gateway may assert who the user is
    headers.remove(&X_FORWARDED_USER);
    headers.remove(&X_FORWARDED_ROLES);

    let user = HeaderValue::from_str(&identity.username)
        .map_err(|e| AppError::Internal(format!("Username not a valid header value: {}", e)))?;
    headers.insert(X_FORWARDED_USER, user);

    let roles = identity.roles.iter().map(String::as_str).collect::<Vec<_>>().join(",");
    let roles = HeaderValue::from_str(&roles)
        .map_err(|e| AppError::Internal(format!("Roles not a valid header value: {}", e)))?;
    headers.insert(X_FORWARDED_ROLES, roles);
    Ok(())
}

/// Remove hop-by-hop headers, including any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

//! Per-caller rate limiting middleware.
//!
//! Sliding windows per bearer token, or per peer address for callers that
//! have not authenticated yet, with the per-minute and per-hour limits from
//! configuration.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::middleware::auth::bearer_token;
use crate::api::types::ApiContext;

fn rate_key(req: &Request<axum::body::Body>) -> String {
    if let Some(token) = bearer_token(req) {
        let prefix: String = token.chars().take(16).collect();
        return format!("token:{prefix}");
    }
    match req.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(peer)) => format!("client:{}", peer.ip()),
        None => "anonymous".to_string(),
    }
}

/// Returns 429 with `Retry-After` when exceeded.
pub async fn limit(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let key = rate_key(&req);

    // MutexGuard is !Send; drop before .await via block scope
    {
        let mut limiter = ctx
            .rate_limiter
            .lock()
            .map_err(|_| ApiError::Internal("rate limiter lock".into()))?;

        limiter.check(&key).map_err(|retry_after| {
            tracing::warn!(key = %key, retry_after, "Rate limit exceeded");
            ApiError::RateLimited { retry_after }
        })?;
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(peer: Option<&str>, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/auth/login");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
        }
        req
    }

    #[test]
    fn anonymous_callers_are_keyed_by_peer_ip() {
        assert_eq!(rate_key(&request(Some("10.0.0.1:5000"), None)), "client:10.0.0.1");
        assert_eq!(rate_key(&request(Some("10.0.0.1:6000"), None)), "client:10.0.0.1");
        assert_eq!(rate_key(&request(Some("10.0.0.2:5000"), None)), "client:10.0.0.2");
        assert_eq!(rate_key(&request(None, None)), "anonymous");
    }

    #[test]
    fn bearer_token_wins_over_peer() {
        let key = rate_key(&request(Some("10.0.0.1:5000"), Some("abcdefghijklmnopqrstuvwxyz")));
        assert_eq!(key, "token:abcdefghijklmnop");
    }
}

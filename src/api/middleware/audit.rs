//! Audit logging middleware.
//!
//! Logs every API request with user id, method, path and response status,
//! and buffers an audit row. Runs innermost (after auth has injected
//! [`AuthUser`]).

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::{ApiContext, AuthUser};

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let ctx = req.extensions().get::<ApiContext>().cloned();
    let user_id = req.extensions().get::<AuthUser>().map(|u| u.user.id);
    let started = std::time::Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    tracing::info!(
        method = %method,
        path = %path,
        status,
        user_id = ?user_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "API request"
    );
    if let Some(ctx) = ctx {
        ctx.core.log_access(user_id, &format!("{method} {status}"), &path);
    }

    response
}

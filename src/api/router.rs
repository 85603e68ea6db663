//! HTTP router.
//!
//! Returns a composable `Router` with every route nested under `/api/`.
//!
//! Middleware stack (outermost → innermost):
//! 1. Rate limiter → 2. Auth validator (protected routes only) → 3. Audit logger

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints::{auth, communication, files, health, oasis, patients, visits};
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

pub(crate) fn build_router(ctx: ApiContext) -> Router {
    let body_limit = ctx.core.config.max_upload_bytes + MULTIPART_OVERHEAD;

    // Layers apply bottom (outermost) to top (innermost):
    //   Extension → Rate limit → Auth → Audit → Handler
    // Path params use `:param` syntax (axum 0.7).
    let protected = Router::new()
        // Identity
        .route("/auth/logout", post(auth::logout))
        .route(
            "/auth/profile",
            get(auth::profile).put(auth::replace_profile).patch(auth::patch_profile),
        )
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/roles", get(auth::roles))
        .route("/auth/permissions", get(auth::permissions))
        .route(
            "/auth/users/:id/groups",
            post(auth::add_group).delete(auth::remove_group),
        )
        // Patients
        .route("/patients", get(patients::list).post(patients::create))
        .route("/patients/search", get(patients::search))
        .route(
            "/patients/:id",
            get(patients::detail)
                .put(patients::replace)
                .patch(patients::patch)
                .delete(patients::delete),
        )
        .route("/patients/:id/visits", get(patients::visits))
        .route("/patients/:id/assessments", get(patients::assessments))
        .route("/patients/:id/files", get(patients::files))
        .route("/patients/:id/threads", get(patients::threads))
        .route("/patients/:id/history", get(patients::history))
        // Visits
        .route("/visits", get(visits::list).post(visits::create))
        .route("/visits/types", get(visits::types))
        .route("/visits/templates", get(visits::templates))
        .route("/visits/templates/:id", get(visits::template))
        .route(
            "/visits/:id",
            get(visits::detail)
                .put(visits::replace)
                .patch(visits::patch)
                .delete(visits::delete),
        )
        .route("/visits/:id/start", post(visits::start))
        .route("/visits/:id/end", post(visits::end))
        .route("/visits/:id/cancel", post(visits::cancel))
        .route("/visits/:id/no-show", post(visits::no_show))
        .route("/visits/:id/summary", post(visits::summary))
        .route("/visits/:id/transcribe", post(visits::transcribe))
        .route("/visits/:id/notes", get(visits::notes).post(visits::add_note))
        // OASIS
        .route("/oasis/assessments", get(oasis::list).post(oasis::create))
        .route("/oasis/assessments/pending", get(oasis::pending))
        .route("/oasis/assessments/completed", get(oasis::completed))
        .route("/oasis/assessments/bulk-create", post(oasis::bulk_create))
        .route("/oasis/assessments/bulk-submit", post(oasis::bulk_submit))
        .route(
            "/oasis/assessments/:id",
            get(oasis::detail)
                .put(oasis::replace)
                .patch(oasis::patch)
                .delete(oasis::delete),
        )
        .route("/oasis/assessments/:id/submit", post(oasis::submit))
        .route("/oasis/assessments/:id/analyze", post(oasis::analyze))
        .route("/oasis/assessments/:id/completion", get(oasis::completion))
        .route("/oasis/patients/:id/timeline", get(oasis::timeline))
        .route("/oasis/quality-measures", get(oasis::quality_measures))
        .route("/oasis/templates", get(oasis::templates))
        .route("/oasis/templates/:id", get(oasis::template))
        // Communication
        .route(
            "/communication/threads",
            get(communication::list_threads).post(communication::create_thread),
        )
        .route("/communication/threads/:id", get(communication::thread_detail))
        .route("/communication/threads/:id/messages", post(communication::post_message))
        .route("/communication/threads/:id/generate", post(communication::generate_message))
        .route("/communication/threads/:id/urgent", post(communication::mark_urgent))
        .route("/communication/threads/:id/close", post(communication::close_thread))
        .route(
            "/communication/threads/:id/participants",
            post(communication::add_participants),
        )
        .route(
            "/communication/threads/:id/participants/:user_id",
            delete(communication::remove_participant),
        )
        .route("/communication/messages", get(communication::list_messages))
        .route("/communication/messages/:id", get(communication::message_detail))
        .route("/communication/templates", get(communication::templates))
        .route("/communication/stats", get(communication::stats))
        .route(
            "/communication/patients/:id/history",
            get(communication::patient_history),
        )
        // Files
        .route("/files/upload", post(files::upload))
        .route("/files", get(files::list))
        .route("/files/:id", get(files::detail).delete(files::delete))
        .route("/files/:id/content", get(files::content))
        .route("/files/:id/process", post(files::process))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // Unprotected routes (rate-limited and audited, no auth required)
    let unprotected = Router::new()
        .route("/health", get(health::check))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/token/refresh", post(auth::refresh))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .nest("/api", protected)
        .nest("/api", unprotected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(cors)
}

//! Visit endpoints: CRUD, lifecycle transitions, notes and generated content.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;

use super::optional_json;
use crate::api::error::ApiError;
use crate::api::types::{blocking, parse_id, ApiContext, ApiJson, AuthUser, QueryParams};
use crate::models::*;
use crate::visits::{self, NoteInput, SummaryRequest, VisitAction, VisitInput, VisitReference};

#[derive(Debug, Deserialize)]
pub struct TranscribeRequest {
    pub transcript: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// CRUD
// ═══════════════════════════════════════════════════════════

/// `GET /api/visits` — filters: patient_id, status, visit_type, date_from, date_to.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<VisitView>>, ApiError> {
    let mut q = QueryParams::new(raw);
    let filter = VisitFilter {
        patient_id: q.uuid("patient_id"),
        status: q.parsed("status"),
        visit_type: q.parsed("visit_type"),
        date_from: q.date("date_from"),
        date_to: q.date("date_to"),
    };
    let page = q.page();
    q.finish()?;

    let conn = ctx.db()?;
    Ok(Json(visits::list(&conn, &auth.actor, &filter, &page)?))
}

/// `POST /api/visits`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(input): ApiJson<VisitInput>,
) -> Result<(StatusCode, Json<VisitView>), ApiError> {
    let conn = ctx.db()?;
    let view = visits::create(&conn, &auth.actor, input, Utc::now())?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/visits/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<VisitView>, ApiError> {
    let id = parse_id(&id, "Visit")?;
    let conn = ctx.db()?;
    Ok(Json(visits::get(&conn, &auth.actor, &id)?))
}

/// `PUT /api/visits/:id`
pub async fn replace(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<VisitInput>,
) -> Result<Json<VisitView>, ApiError> {
    let id = parse_id(&id, "Visit")?;
    let conn = ctx.db()?;
    Ok(Json(visits::update(&conn, &auth.actor, &id, input, false, Utc::now())?))
}

/// `PATCH /api/visits/:id`
pub async fn patch(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<VisitInput>,
) -> Result<Json<VisitView>, ApiError> {
    let id = parse_id(&id, "Visit")?;
    let conn = ctx.db()?;
    Ok(Json(visits::update(&conn, &auth.actor, &id, input, true, Utc::now())?))
}

/// `DELETE /api/visits/:id`
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "Visit")?;
    let conn = ctx.db()?;
    visits::delete(&conn, &auth.actor, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Reference data ──────────────────────────────────────────

/// `GET /api/visits/types`
pub async fn types() -> Json<VisitReference> {
    Json(visits::reference())
}

/// `GET /api/visits/templates?discipline=`
pub async fn templates(
    State(ctx): State<ApiContext>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Vec<DocumentationTemplate>>, ApiError> {
    let q = QueryParams::new(raw);
    let conn = ctx.db()?;
    Ok(Json(visits::documentation_templates(&conn, q.text("discipline").as_deref())?))
}

/// `GET /api/visits/template/:id`
pub async fn template(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<DocumentationTemplate>, ApiError> {
    let id = parse_id(&id, "Documentation template")?;
    let conn = ctx.db()?;
    Ok(Json(visits::documentation_template(&conn, &id)?))
}

// ═══════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════

async fn transition(ctx: ApiContext, auth: AuthUser, id: String, action: VisitAction) -> Result<Json<VisitView>, ApiError> {
    let id = parse_id(&id, "Visit")?;
    let summarize = action == VisitAction::End && ctx.core.config.auto_summarize_on_end;
    let generator = ctx.core.generator.clone();
    let view = blocking(move || {
        let conn = ctx.db()?;
        let summarizer = summarize.then_some(generator.as_ref());
        Ok(visits::transition(&conn, &auth.actor, &id, action, summarizer, Utc::now())?)
    })
    .await?;
    Ok(Json(view))
}

/// `POST /api/visits/:id/start`
pub async fn start(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<VisitView>, ApiError> {
    transition(ctx, auth, id, VisitAction::Start).await
}

/// `POST /api/visits/:id/end` — also generates a summary when enabled.
pub async fn end(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<VisitView>, ApiError> {
    transition(ctx, auth, id, VisitAction::End).await
}

/// `POST /api/visits/:id/cancel`
pub async fn cancel(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<VisitView>, ApiError> {
    transition(ctx, auth, id, VisitAction::Cancel).await
}

/// `POST /api/visits/:id/no-show`
pub async fn no_show(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<VisitView>, ApiError> {
    transition(ctx, auth, id, VisitAction::NoShow).await
}

// ═══════════════════════════════════════════════════════════
// Notes and generated content
// ═══════════════════════════════════════════════════════════

/// `GET /api/visits/:id/notes`
pub async fn notes(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<VisitNote>>, ApiError> {
    let id = parse_id(&id, "Visit")?;
    let conn = ctx.db()?;
    Ok(Json(visits::list_notes(&conn, &auth.actor, &id)?))
}

/// `POST /api/visits/:id/notes`
pub async fn add_note(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<NoteInput>,
) -> Result<(StatusCode, Json<VisitNote>), ApiError> {
    let id = parse_id(&id, "Visit")?;
    let conn = ctx.db()?;
    let note = visits::add_note(&conn, &auth.actor, &id, input, Utc::now())?;
    Ok((StatusCode::CREATED, Json(note)))
}

/// `POST /api/visits/:id/summary` — body is optional.
pub async fn summary(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<VisitView>, ApiError> {
    let id = parse_id(&id, "Visit")?;
    let request: SummaryRequest = optional_json(&body)?;
    let generator = ctx.core.generator.clone();
    let view = blocking(move || {
        let conn = ctx.db()?;
        Ok(visits::generate_summary(&conn, generator.as_ref(), &auth.actor, &id, &request, Utc::now())?)
    })
    .await?;
    Ok(Json(view))
}

/// `POST /api/visits/:id/transcribe`
pub async fn transcribe(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<TranscribeRequest>,
) -> Result<(StatusCode, Json<VisitNote>), ApiError> {
    let id = parse_id(&id, "Visit")?;
    let generator = ctx.core.generator.clone();
    let note = blocking(move || {
        let conn = ctx.db()?;
        Ok(visits::transcribe(
            &conn,
            generator.as_ref(),
            &auth.actor,
            &id,
            req.transcript.as_deref(),
            Utc::now(),
        )?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

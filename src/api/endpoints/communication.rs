//! Care-team messaging endpoints.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::optional_json;
use crate::api::error::ApiError;
use crate::api::types::{blocking, parse_id, ApiContext, ApiJson, AuthUser, QueryParams};
use crate::communication::{self, GenerateRequest, MessageInput, PatientCommunicationHistory, ThreadInput};
use crate::db::repository::CommunicationStats;
use crate::models::*;

#[derive(Debug, Deserialize)]
pub struct UrgentRequest {
    #[serde(default = "default_urgent")]
    pub is_urgent: bool,
}

impl Default for UrgentRequest {
    fn default() -> Self {
        Self { is_urgent: true }
    }
}

fn default_urgent() -> bool {
    true
}

/// Accepts `user_ids` or `participant_ids`.
#[derive(Debug, Deserialize)]
pub struct ParticipantsRequest {
    #[serde(default, alias = "participant_ids")]
    pub user_ids: Vec<Uuid>,
}

// ═══════════════════════════════════════════════════════════
// Threads
// ═══════════════════════════════════════════════════════════

/// `GET /api/communication/threads` — filters: patient_id, is_urgent, is_closed, search.
pub async fn list_threads(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<ThreadSummary>>, ApiError> {
    let mut q = QueryParams::new(raw);
    let filter = ThreadFilter {
        patient_id: q.uuid("patient_id"),
        is_urgent: q.flag("is_urgent"),
        is_closed: q.flag("is_closed"),
        search: q.text("search"),
    };
    let page = q.page();
    q.finish()?;

    let conn = ctx.db()?;
    Ok(Json(communication::list_threads(&conn, &auth.actor, &filter, &page)?))
}

/// `POST /api/communication/threads`
pub async fn create_thread(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(input): ApiJson<ThreadInput>,
) -> Result<(StatusCode, Json<ThreadSummary>), ApiError> {
    let mut conn = ctx.db()?;
    let thread = communication::create_thread(&mut conn, &auth.actor, input, Utc::now())?;
    Ok((StatusCode::CREATED, Json(thread)))
}

/// `GET /api/communication/threads/:id` — marks every message read for the caller.
pub async fn thread_detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ThreadDetail>, ApiError> {
    let id = parse_id(&id, "Thread")?;
    let mut conn = ctx.db()?;
    Ok(Json(communication::get_thread(&mut conn, &auth.actor, &id, Utc::now())?))
}

/// `POST /api/communication/threads/:id/urgent` — body optional, defaults to urgent.
pub async fn mark_urgent(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ThreadSummary>, ApiError> {
    let id = parse_id(&id, "Thread")?;
    let req: UrgentRequest = optional_json(&body)?;
    let conn = ctx.db()?;
    Ok(Json(communication::set_urgent(&conn, &auth.actor, &id, req.is_urgent, Utc::now())?))
}

/// `POST /api/communication/threads/:id/close`
pub async fn close_thread(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ThreadSummary>, ApiError> {
    let id = parse_id(&id, "Thread")?;
    let mut conn = ctx.db()?;
    Ok(Json(communication::close(&mut conn, &auth.actor, &id, Utc::now())?))
}

/// `POST /api/communication/threads/:id/participants`
pub async fn add_participants(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ParticipantsRequest>,
) -> Result<Json<Vec<UserRef>>, ApiError> {
    let id = parse_id(&id, "Thread")?;
    let mut conn = ctx.db()?;
    let added = communication::add_participants(&mut conn, &auth.actor, &id, &req.user_ids, Utc::now())?;
    Ok(Json(added))
}

/// `DELETE /api/communication/threads/:id/participants/:user_id`
pub async fn remove_participant(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "Thread")?;
    let user_id = parse_id(&user_id, "Participant")?;
    let conn = ctx.db()?;
    communication::remove_participant(&conn, &auth.actor, &id, &user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════

/// `POST /api/communication/threads/:id/messages`
pub async fn post_message(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<MessageInput>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let id = parse_id(&id, "Thread")?;
    let mut conn = ctx.db()?;
    let message = communication::post_message(&mut conn, &auth.actor, &id, input, Utc::now())?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `POST /api/communication/threads/:id/generate`
pub async fn generate_message(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<GenerateRequest>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let id = parse_id(&id, "Thread")?;
    let generator = ctx.core.generator.clone();
    let message = blocking(move || {
        let mut conn = ctx.db()?;
        Ok(communication::generate_message(
            &mut conn,
            generator.as_ref(),
            &auth.actor,
            &id,
            request,
            Utc::now(),
        )?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /api/communication/messages` — filters: thread_id, message_type.
pub async fn list_messages(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<MessageView>>, ApiError> {
    let mut q = QueryParams::new(raw);
    let filter = MessageFilter {
        thread_id: q.uuid("thread_id"),
        message_type: q.parsed("message_type"),
    };
    let page = q.page();
    q.finish()?;

    let conn = ctx.db()?;
    Ok(Json(communication::list_messages(&conn, &auth.actor, &filter, &page)?))
}

/// `GET /api/communication/messages/:id`
pub async fn message_detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageView>, ApiError> {
    let id = parse_id(&id, "Message")?;
    let conn = ctx.db()?;
    Ok(Json(communication::get_message(&conn, &auth.actor, &id)?))
}

// ── Reference and reporting ─────────────────────────────────

/// `GET /api/communication/templates?message_type=`
pub async fn templates(
    State(ctx): State<ApiContext>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Vec<MessageTemplate>>, ApiError> {
    let q = QueryParams::new(raw);
    let conn = ctx.db()?;
    Ok(Json(communication::templates(&conn, q.text("message_type").as_deref())?))
}

/// `GET /api/communication/stats`
pub async fn stats(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<CommunicationStats>, ApiError> {
    let conn = ctx.db()?;
    Ok(Json(communication::stats(&conn, &auth.actor)?))
}

/// `GET /api/communication/patients/:id/history`
pub async fn patient_history(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<PatientCommunicationHistory>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let conn = ctx.db()?;
    Ok(Json(communication::patient_history(&conn, &auth.actor, &id)?))
}

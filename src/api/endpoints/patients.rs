//! Patient registry endpoints, including per-patient subresources.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Extension;
use axum::Json;
use chrono::Utc;

use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext, ApiJson, AuthUser, QueryParams};
use crate::models::*;
use crate::patients::{self, PatientHistory, PatientInput, PatientSearch};

/// `GET /api/patients` — filters: search, gender, assigned_physician.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<PatientView>>, ApiError> {
    let mut q = QueryParams::new(raw);
    let filter = PatientFilter {
        search: q.text("search"),
        gender: q.parsed("gender"),
        assigned_physician: q.uuid("assigned_physician"),
        ..Default::default()
    };
    let page = q.page();
    q.finish()?;

    let conn = ctx.db()?;
    let today = Utc::now().date_naive();
    Ok(Json(patients::list(&conn, &auth.actor, &filter, &page, today)?))
}

/// `GET /api/patients/search?query=&gender=&age_min=&age_max=`
pub async fn search(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<PatientView>>, ApiError> {
    let mut q = QueryParams::new(raw);
    let search = PatientSearch {
        query: q.text("query"),
        gender: q.parsed("gender"),
        age_min: q.parsed("age_min"),
        age_max: q.parsed("age_max"),
    };
    let page = q.page();
    q.finish()?;

    let conn = ctx.db()?;
    let today = Utc::now().date_naive();
    Ok(Json(patients::search(&conn, &auth.actor, &search, &page, today)?))
}

/// `POST /api/patients`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(input): ApiJson<PatientInput>,
) -> Result<(StatusCode, Json<PatientView>), ApiError> {
    let conn = ctx.db()?;
    let view = patients::create(&conn, &auth.actor, input, Utc::now())?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/patients/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<PatientView>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let conn = ctx.db()?;
    Ok(Json(patients::get(&conn, &auth.actor, &id, Utc::now().date_naive())?))
}

async fn update(
    ctx: ApiContext,
    auth: AuthUser,
    id: String,
    input: PatientInput,
    partial: bool,
) -> Result<Json<PatientView>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let conn = ctx.db()?;
    let view = patients::update(&conn, ctx.core.policy(), &auth.actor, &id, input, partial, Utc::now())?;
    Ok(Json(view))
}

/// `PUT /api/patients/:id`
pub async fn replace(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<PatientInput>,
) -> Result<Json<PatientView>, ApiError> {
    update(ctx, auth, id, input, false).await
}

/// `PATCH /api/patients/:id`
pub async fn patch(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<PatientInput>,
) -> Result<Json<PatientView>, ApiError> {
    update(ctx, auth, id, input, true).await
}

/// `DELETE /api/patients/:id` — cascades to every child record and blob.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let mut conn = ctx.db()?;
    patients::delete(&mut conn, &ctx.core.store, ctx.core.policy(), &auth.actor, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Subresources ────────────────────────────────────────────

fn page_only(raw: HashMap<String, String>) -> Result<Page, ApiError> {
    let mut q = QueryParams::new(raw);
    let page = q.page();
    q.finish()?;
    Ok(page)
}

/// `GET /api/patients/:id/visits`
pub async fn visits(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<VisitView>>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let page = page_only(raw)?;
    let conn = ctx.db()?;
    Ok(Json(patients::visits(&conn, &auth.actor, &id, &page)?))
}

/// `GET /api/patients/:id/assessments`
pub async fn assessments(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<AssessmentView>>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let page = page_only(raw)?;
    let conn = ctx.db()?;
    Ok(Json(patients::assessments(&conn, &auth.actor, &id, &page)?))
}

/// `GET /api/patients/:id/files`
pub async fn files(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<FileView>>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let page = page_only(raw)?;
    let conn = ctx.db()?;
    Ok(Json(patients::files(&conn, &auth.actor, &id, &page)?))
}

/// `GET /api/patients/:id/threads`
pub async fn threads(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<ThreadSummary>>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let page = page_only(raw)?;
    let conn = ctx.db()?;
    Ok(Json(patients::threads(&conn, &auth.actor, &id, &page)?))
}

/// `GET /api/patients/:id/history`
pub async fn history(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<PatientHistory>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let conn = ctx.db()?;
    Ok(Json(patients::history(&conn, &auth.actor, &id, Utc::now().date_naive())?))
}

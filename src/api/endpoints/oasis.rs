//! OASIS assessment endpoints.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;

use crate::api::error::ApiError;
use crate::api::types::{blocking, parse_id, ApiContext, ApiJson, AuthUser, QueryParams};
use crate::models::*;
use crate::oasis::{
    self, AssessmentInput, BulkCreateRequest, BulkResult, BulkSubmitRequest, Completion, QualityMeasures, Timeline,
};

// ═══════════════════════════════════════════════════════════
// CRUD
// ═══════════════════════════════════════════════════════════

/// `GET /api/oasis/assessments` — filters: patient_id, assessment_type,
/// is_completed, start_date, end_date.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<AssessmentView>>, ApiError> {
    let mut q = QueryParams::new(raw);
    let filter = AssessmentFilter {
        patient_id: q.uuid("patient_id"),
        assessment_type: q.parsed("assessment_type"),
        is_completed: q.flag("is_completed"),
        date_from: q.date("start_date"),
        date_to: q.date("end_date"),
    };
    let page = q.page();
    q.finish()?;

    let conn = ctx.db()?;
    Ok(Json(oasis::list(&conn, &auth.actor, &filter, &page)?))
}

async fn by_completion(
    ctx: ApiContext,
    auth: AuthUser,
    raw: HashMap<String, String>,
    completed: bool,
) -> Result<Json<Paged<AssessmentView>>, ApiError> {
    let mut q = QueryParams::new(raw);
    let page = q.page();
    q.finish()?;
    let conn = ctx.db()?;
    Ok(Json(oasis::list_by_completion(&conn, &auth.actor, completed, &page)?))
}

/// `GET /api/oasis/assessments/pending`
pub async fn pending(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<AssessmentView>>, ApiError> {
    by_completion(ctx, auth, raw, false).await
}

/// `GET /api/oasis/assessments/completed`
pub async fn completed(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<AssessmentView>>, ApiError> {
    by_completion(ctx, auth, raw, true).await
}

/// `POST /api/oasis/assessments`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(input): ApiJson<AssessmentInput>,
) -> Result<(StatusCode, Json<AssessmentView>), ApiError> {
    let conn = ctx.db()?;
    let view = oasis::create(&conn, &auth.actor, input, Utc::now())?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/oasis/assessments/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<AssessmentView>, ApiError> {
    let id = parse_id(&id, "Assessment")?;
    let conn = ctx.db()?;
    Ok(Json(oasis::get(&conn, &auth.actor, &id)?))
}

/// `PUT /api/oasis/assessments/:id`
pub async fn replace(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<AssessmentInput>,
) -> Result<Json<AssessmentView>, ApiError> {
    let id = parse_id(&id, "Assessment")?;
    let conn = ctx.db()?;
    Ok(Json(oasis::update(&conn, &auth.actor, &id, input, false, Utc::now())?))
}

/// `PATCH /api/oasis/assessments/:id`
pub async fn patch(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<AssessmentInput>,
) -> Result<Json<AssessmentView>, ApiError> {
    let id = parse_id(&id, "Assessment")?;
    let conn = ctx.db()?;
    Ok(Json(oasis::update(&conn, &auth.actor, &id, input, true, Utc::now())?))
}

/// `DELETE /api/oasis/assessments/:id`
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "Assessment")?;
    let conn = ctx.db()?;
    oasis::delete(&conn, &auth.actor, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ═══════════════════════════════════════════════════════════
// Workflow
// ═══════════════════════════════════════════════════════════

/// `POST /api/oasis/assessments/:id/submit`
pub async fn submit(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<AssessmentView>, ApiError> {
    let id = parse_id(&id, "Assessment")?;
    let conn = ctx.db()?;
    Ok(Json(oasis::submit(&conn, &auth.actor, &id, Utc::now())?))
}

/// `GET /api/oasis/assessments/:id/completion`
pub async fn completion(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Completion>, ApiError> {
    let id = parse_id(&id, "Assessment")?;
    let conn = ctx.db()?;
    Ok(Json(oasis::completion(&conn, &auth.actor, &id)?))
}

/// `POST /api/oasis/assessments/:id/analyze`
pub async fn analyze(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<AssessmentView>, ApiError> {
    let id = parse_id(&id, "Assessment")?;
    let generator = ctx.core.generator.clone();
    let view = blocking(move || {
        let conn = ctx.db()?;
        Ok(oasis::analyze(&conn, generator.as_ref(), &auth.actor, &id, Utc::now())?)
    })
    .await?;
    Ok(Json(view))
}

/// `POST /api/oasis/assessments/bulk-create`
pub async fn bulk_create(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<BulkCreateRequest>,
) -> Result<(StatusCode, Json<BulkResult>), ApiError> {
    let mut conn = ctx.db()?;
    let result = oasis::bulk_create(&mut conn, &auth.actor, request, Utc::now())?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// `POST /api/oasis/assessments/bulk-submit`
pub async fn bulk_submit(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(request): ApiJson<BulkSubmitRequest>,
) -> Result<Json<BulkResult>, ApiError> {
    let mut conn = ctx.db()?;
    Ok(Json(oasis::bulk_submit(&mut conn, &auth.actor, request, Utc::now())?))
}

// ═══════════════════════════════════════════════════════════
// Reporting and templates
// ═══════════════════════════════════════════════════════════

/// `GET /api/oasis/patients/:id/timeline`
pub async fn timeline(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Timeline>, ApiError> {
    let id = parse_id(&id, "Patient")?;
    let conn = ctx.db()?;
    Ok(Json(oasis::timeline(&conn, &auth.actor, &id)?))
}

/// `GET /api/oasis/quality-measures?start_date=&end_date=`
pub async fn quality_measures(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<QualityMeasures>, ApiError> {
    let mut q = QueryParams::new(raw);
    let start = q.date("start_date");
    let end = q.date("end_date");
    q.finish()?;
    let conn = ctx.db()?;
    let today = Utc::now().date_naive();
    Ok(Json(oasis::quality_measures(&conn, &auth.actor, start, end, today)?))
}

/// `GET /api/oasis/templates?assessment_type=&discipline=`
pub async fn templates(
    State(ctx): State<ApiContext>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Vec<OasisTemplate>>, ApiError> {
    let q = QueryParams::new(raw);
    let conn = ctx.db()?;
    let list = oasis::templates(&conn, q.text("assessment_type").as_deref(), q.text("discipline").as_deref())?;
    Ok(Json(list))
}

/// `GET /api/oasis/templates/:id`
pub async fn template(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<OasisTemplate>, ApiError> {
    let id = parse_id(&id, "Template")?;
    let conn = ctx.db()?;
    Ok(Json(oasis::template(&conn, &id)?))
}

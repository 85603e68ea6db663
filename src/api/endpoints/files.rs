//! Document intake endpoints: multipart upload, listing, download, reprocessing.

use std::collections::HashMap;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::Utc;

use crate::api::error::ApiError;
use crate::api::types::{blocking, parse_id, ApiContext, AuthUser, QueryParams};
use crate::intake::{self, UploadInput};
use crate::models::*;

/// `POST /api/files/upload` — multipart fields: patient_id, category,
/// description, tags, file.
pub async fn upload(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<FileView>), ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let mut input = UploadInput::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                input.filename = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                input.bytes = Some(data.to_vec());
            }
            "patient_id" | "category" | "description" | "tags" => {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                let slot = match name.as_str() {
                    "patient_id" => &mut input.patient_id,
                    "category" => &mut input.category,
                    "description" => &mut input.description,
                    _ => &mut input.tags,
                };
                *slot = Some(text);
            }
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    let max_bytes = ctx.core.config.max_upload_bytes;
    let view = blocking(move || {
        let conn = ctx.db()?;
        let core = &ctx.core;
        Ok(intake::upload(
            &conn,
            &core.store,
            &core.extraction,
            &auth.actor,
            input,
            max_bytes,
            Utc::now(),
        )?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /api/files` — filters: patient_id, category, processing_status, search.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paged<FileView>>, ApiError> {
    let mut q = QueryParams::new(raw);
    let filter = FileFilter {
        patient_id: q.uuid("patient_id"),
        category: q.parsed("category"),
        processing_status: q.parsed("processing_status"),
        search: q.text("search"),
    };
    let page = q.page();
    q.finish()?;

    let conn = ctx.db()?;
    Ok(Json(intake::list(&conn, &auth.actor, &filter, &page)?))
}

/// `GET /api/files/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<FileView>, ApiError> {
    let id = parse_id(&id, "File")?;
    let conn = ctx.db()?;
    Ok(Json(intake::get(&conn, &auth.actor, &id)?))
}

/// `DELETE /api/files/:id` — removes the row and the stored blob.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "File")?;
    let conn = ctx.db()?;
    intake::delete(&conn, &ctx.core.store, &auth.actor, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/files/:id/content` — raw bytes with the stored content type.
pub async fn content(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "File")?;
    let file = blocking(move || {
        let conn = ctx.db()?;
        Ok(intake::content(&conn, &ctx.core.store, &auth.actor, &id)?)
    })
    .await?;

    let disposition = format!("attachment; filename=\"{}\"", file.filename.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    ))
}

/// `POST /api/files/:id/process` — reset and re-queue extraction.
pub async fn process(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<FileView>, ApiError> {
    let id = parse_id(&id, "File")?;
    let view = blocking(move || {
        let conn = ctx.db()?;
        Ok(intake::reprocess(&conn, &ctx.core.extraction, &auth.actor, &id, Utc::now())?)
    })
    .await?;
    Ok(Json(view))
}

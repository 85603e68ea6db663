//! Identity endpoints: registration, sessions, profile, roles and groups.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Extension;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{parse_id, ApiContext, ApiJson, AuthUser};
use crate::identity::{self, AccessCredential, Credential, Permissions, Profile, ProfileUpdate, RegisterRequest, RoleInfo};

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

#[derive(Deserialize)]
pub struct PasswordChange {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct GroupRequest {
    #[serde(default)]
    pub group: String,
}

#[derive(Serialize)]
pub struct Ack {
    pub message: String,
}

fn refresh_token(req: &RefreshRequest) -> Result<&str, ApiError> {
    req.refresh
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| crate::error::CareError::invalid("refresh", "This field is required.").into())
}

/// `POST /api/auth/register`
pub async fn register(
    State(ctx): State<ApiContext>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Credential>), ApiError> {
    let conn = ctx.db()?;
    let credential = identity::register(&conn, &ctx.core.auth, req, Utc::now())?;
    Ok((StatusCode::CREATED, Json(credential)))
}

/// `POST /api/auth/login`
pub async fn login(
    State(ctx): State<ApiContext>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<Credential>, ApiError> {
    let conn = ctx.db()?;
    let credential = identity::login(&conn, &ctx.core.auth, &req.username, &req.password, Utc::now())?;
    Ok(Json(credential))
}

/// `POST /api/auth/token/refresh`
pub async fn refresh(
    State(ctx): State<ApiContext>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<AccessCredential>, ApiError> {
    let token = refresh_token(&req)?;
    let conn = ctx.db()?;
    Ok(Json(identity::refresh(&conn, &ctx.core.auth, token, Utc::now())?))
}

/// `POST /api/auth/logout` — revokes the refresh token and its access tokens.
pub async fn logout(
    State(ctx): State<ApiContext>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<StatusCode, ApiError> {
    let token = refresh_token(&req)?;
    let conn = ctx.db()?;
    identity::logout(&conn, token, Utc::now())?;
    Ok(StatusCode::RESET_CONTENT)
}

/// `GET /api/auth/profile`
pub async fn profile(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Profile>, ApiError> {
    let conn = ctx.db()?;
    Ok(Json(identity::get_profile(&conn, &auth.user.id)?))
}

/// `PUT /api/auth/profile`
pub async fn replace_profile(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> Result<Json<Profile>, ApiError> {
    let conn = ctx.db()?;
    Ok(Json(identity::update_profile(&conn, &auth.user.id, update, false, Utc::now())?))
}

/// `PATCH /api/auth/profile`
pub async fn patch_profile(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> Result<Json<Profile>, ApiError> {
    let conn = ctx.db()?;
    Ok(Json(identity::update_profile(&conn, &auth.user.id, update, true, Utc::now())?))
}

/// `POST /api/auth/change-password`
pub async fn change_password(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<PasswordChange>,
) -> Result<Json<Ack>, ApiError> {
    let conn = ctx.db()?;
    identity::change_password(
        &conn,
        &ctx.core.auth,
        &auth.user.id,
        &req.old_password,
        &req.new_password,
        Utc::now(),
    )?;
    Ok(Json(Ack {
        message: "Password changed successfully".into(),
    }))
}

/// `GET /api/auth/roles`
pub async fn roles() -> Json<Vec<RoleInfo>> {
    Json(identity::roles())
}

/// `GET /api/auth/permissions`
pub async fn permissions(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Permissions>, ApiError> {
    let conn = ctx.db()?;
    Ok(Json(identity::permissions(&conn, &auth.user)?))
}

async fn set_group(ctx: ApiContext, auth: AuthUser, user_id: String, req: GroupRequest, add: bool) -> Result<Json<Ack>, ApiError> {
    let target = parse_id(&user_id, "User")?;
    let conn = ctx.db()?;
    identity::set_group_membership(&conn, ctx.core.policy(), &auth.user, &target, &req.group, add, Utc::now())?;
    let verb = if add { "added to" } else { "removed from" };
    Ok(Json(Ack {
        message: format!("User {verb} group {}", req.group.trim()),
    }))
}

/// `POST /api/auth/users/:id/groups`
pub async fn add_group(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<String>,
    ApiJson(req): ApiJson<GroupRequest>,
) -> Result<Json<Ack>, ApiError> {
    set_group(ctx, auth, user_id, req, true).await
}

/// `DELETE /api/auth/users/:id/groups`
pub async fn remove_group(
    State(ctx): State<ApiContext>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<String>,
    ApiJson(req): ApiJson<GroupRequest>,
) -> Result<Json<Ack>, ApiError> {
    set_group(ctx, auth, user_id, req, false).await
}

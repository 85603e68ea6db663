//! Accounts, credentials and role/group administration.
//!
//! Credentials are opaque random tokens. Only their SHA-256 digests are
//! stored; an access token records the refresh token it was minted from so
//! logout can revoke the whole family.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::AccessPolicy;
use crate::config::Config;
use crate::crypto::{generate_token, hash_password, hash_token, verify_password};
use crate::db::repository;
use crate::error::{AuthFailure, CareError, FieldErrors};
use crate::models::{AuthToken, Role, TokenKind, User};

pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Token lifetimes and hashing cost.
#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub password_iterations: u32,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access_ttl: Duration::minutes(config.access_token_minutes),
            refresh_ttl: Duration::days(config.refresh_token_days),
            password_iterations: config.password_iterations,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Request / response types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
    pub license_number: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

/// Access + refresh pair issued at registration and login.
#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    pub access: String,
    pub refresh: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessCredential {
    pub access: String,
    pub access_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub full_name: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub license_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleInfo {
    pub value: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Permissions {
    pub role: Role,
    pub groups: Vec<String>,
    pub permissions: Vec<&'static str>,
}

// ═══════════════════════════════════════════════════════════
// Registration and sessions
// ═══════════════════════════════════════════════════════════

pub fn register(
    conn: &Connection,
    settings: &AuthSettings,
    req: RegisterRequest,
    now: DateTime<Utc>,
) -> Result<Credential, CareError> {
    let mut errors = FieldErrors::new();
    errors.require(req.username.as_deref(), "username");
    errors.require(req.first_name.as_deref(), "first_name");
    errors.require(req.last_name.as_deref(), "last_name");
    check_email(&mut errors, req.email.as_deref(), true);

    let role = match req.role.as_deref().map(str::trim) {
        None | Some("") => Some(Role::Nurse),
        Some(raw) => raw.parse::<Role>().ok(),
    };
    errors.check(role.is_some(), "role", "Not a valid role.");

    let password = req.password.clone().unwrap_or_default();
    check_password_strength(&mut errors, "password", &password);
    errors.check(
        req.password_confirm.as_deref() == Some(password.as_str()),
        "password_confirm",
        "Passwords do not match.",
    );

    let username = req.username.as_deref().map(str::trim).unwrap_or_default();
    if !username.is_empty() && repository::username_exists(conn, username)? {
        errors.add("username", "A user with that username already exists.");
    }
    errors.finish()?;

    let user = User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        email: trimmed(req.email).unwrap_or_default(),
        first_name: trimmed(req.first_name).unwrap_or_default(),
        last_name: trimmed(req.last_name).unwrap_or_default(),
        role: role.unwrap_or(Role::Nurse),
        license_number: trimmed(req.license_number),
        phone: trimmed(req.phone),
        is_verified: false,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let hash = hash_password(&password, settings.password_iterations);
    repository::insert_user(conn, &user, &hash).map_err(|e| {
        if e.is_unique_violation() {
            CareError::invalid("username", "A user with that username already exists.")
        } else {
            e.into()
        }
    })?;

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "User registered");
    issue_credential(conn, settings, user, now)
}

/// Same error for unknown user, wrong password and inactive account.
pub fn login(
    conn: &Connection,
    settings: &AuthSettings,
    username: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<Credential, CareError> {
    let invalid = || CareError::Unauthorized(AuthFailure::InvalidCredentials);

    let user = repository::get_user_by_username(conn, username.trim())?.ok_or_else(invalid)?;
    let stored = repository::get_password_hash(conn, &user.id)?.ok_or_else(invalid)?;
    let verified = verify_password(password, &stored).unwrap_or_else(|e| {
        tracing::warn!(user_id = %user.id, error = %e, "Stored password hash unreadable");
        false
    });
    if !verified || !user.is_active {
        tracing::info!(user_id = %user.id, "Login rejected");
        return Err(invalid());
    }

    let pruned = repository::prune_expired_tokens(conn, now)?;
    if pruned > 0 {
        tracing::debug!(pruned, "Expired tokens pruned");
    }
    issue_credential(conn, settings, user, now)
}

fn issue_credential(
    conn: &Connection,
    settings: &AuthSettings,
    user: User,
    now: DateTime<Utc>,
) -> Result<Credential, CareError> {
    let refresh = generate_token();
    let refresh_hash = hash_token(&refresh);
    let refresh_expires_at = now + settings.refresh_ttl;
    repository::insert_token(
        conn,
        &AuthToken {
            token_hash: refresh_hash.clone(),
            user_id: user.id,
            kind: TokenKind::Refresh,
            parent_hash: None,
            issued_at: now,
            expires_at: refresh_expires_at,
            revoked_at: None,
        },
    )?;
    let access = mint_access(conn, settings, user.id, &refresh_hash, now)?;

    Ok(Credential {
        access: access.access,
        refresh,
        access_expires_at: access.access_expires_at,
        refresh_expires_at,
        user,
    })
}

fn mint_access(
    conn: &Connection,
    settings: &AuthSettings,
    user_id: Uuid,
    refresh_hash: &str,
    now: DateTime<Utc>,
) -> Result<AccessCredential, CareError> {
    let access = generate_token();
    let access_expires_at = now + settings.access_ttl;
    repository::insert_token(
        conn,
        &AuthToken {
            token_hash: hash_token(&access),
            user_id,
            kind: TokenKind::Access,
            parent_hash: Some(refresh_hash.to_string()),
            issued_at: now,
            expires_at: access_expires_at,
            revoked_at: None,
        },
    )?;
    Ok(AccessCredential {
        access,
        access_expires_at,
    })
}

/// Look up a live token of the given kind and its (active) owner.
fn live_token(
    conn: &Connection,
    token: &str,
    kind: TokenKind,
    now: DateTime<Utc>,
) -> Result<(AuthToken, User), AuthFailure> {
    let hash = hash_token(token);
    let record = match repository::get_token(conn, &hash) {
        Ok(Some(record)) if record.kind == kind => record,
        Ok(_) => return Err(AuthFailure::InvalidToken),
        Err(e) => {
            tracing::error!(error = %e, "Token lookup failed");
            return Err(AuthFailure::InvalidToken);
        }
    };
    if record.revoked_at.is_some() {
        return Err(AuthFailure::InvalidToken);
    }
    if record.expires_at <= now {
        return Err(AuthFailure::TokenExpired);
    }
    match repository::get_user(conn, &record.user_id) {
        Ok(Some(user)) if user.is_active => Ok((record, user)),
        _ => Err(AuthFailure::InvalidToken),
    }
}

pub fn refresh(
    conn: &Connection,
    settings: &AuthSettings,
    refresh_token: &str,
    now: DateTime<Utc>,
) -> Result<AccessCredential, CareError> {
    let (record, user) =
        live_token(conn, refresh_token, TokenKind::Refresh, now).map_err(CareError::Unauthorized)?;
    mint_access(conn, settings, user.id, &record.token_hash, now)
}

/// Revoke a refresh token and every access token minted from it. A token
/// that is unknown, already revoked or expired is a validation error.
pub fn logout(conn: &Connection, refresh_token: &str, now: DateTime<Utc>) -> Result<(), CareError> {
    let (record, user) = live_token(conn, refresh_token, TokenKind::Refresh, now)
        .map_err(|_| CareError::invalid("refresh", "Token is invalid or expired."))?;
    let revoked = repository::revoke_token_family(conn, &record.token_hash, now)?;
    tracing::info!(user_id = %user.id, revoked, "Logged out");
    Ok(())
}

/// Resolve a bearer access token to its user.
pub fn authenticate(conn: &Connection, access_token: &str, now: DateTime<Utc>) -> Result<User, AuthFailure> {
    live_token(conn, access_token, TokenKind::Access, now).map(|(_, user)| user)
}

// ═══════════════════════════════════════════════════════════
// Profile
// ═══════════════════════════════════════════════════════════

pub fn get_profile(conn: &Connection, user_id: &Uuid) -> Result<Profile, CareError> {
    let user = repository::get_user(conn, user_id)?.ok_or_else(|| CareError::not_found("user", user_id))?;
    let groups = repository::get_user_groups(conn, user_id)?;
    Ok(Profile {
        full_name: user.full_name(),
        user,
        groups,
    })
}

/// Apply a profile update. `partial = false` (PUT) requires email and both names.
pub fn update_profile(
    conn: &Connection,
    user_id: &Uuid,
    update: ProfileUpdate,
    partial: bool,
    now: DateTime<Utc>,
) -> Result<Profile, CareError> {
    let mut user = repository::get_user(conn, user_id)?.ok_or_else(|| CareError::not_found("user", user_id))?;

    let mut errors = FieldErrors::new();
    if !partial {
        errors.require(update.first_name.as_deref(), "first_name");
        errors.require(update.last_name.as_deref(), "last_name");
    } else {
        if update.first_name.is_some() {
            errors.require(update.first_name.as_deref(), "first_name");
        }
        if update.last_name.is_some() {
            errors.require(update.last_name.as_deref(), "last_name");
        }
    }
    if !partial || update.email.is_some() {
        check_email(&mut errors, update.email.as_deref(), true);
    }
    errors.finish()?;

    if let Some(email) = trimmed(update.email) {
        user.email = email;
    }
    if let Some(first) = trimmed(update.first_name) {
        user.first_name = first;
    }
    if let Some(last) = trimmed(update.last_name) {
        user.last_name = last;
    }
    if !partial || update.phone.is_some() {
        user.phone = trimmed(update.phone);
    }
    if !partial || update.license_number.is_some() {
        user.license_number = trimmed(update.license_number);
    }
    user.updated_at = now;
    repository::update_user_profile(conn, &user)?;
    get_profile(conn, user_id)
}

pub fn change_password(
    conn: &Connection,
    settings: &AuthSettings,
    user_id: &Uuid,
    old_password: &str,
    new_password: &str,
    now: DateTime<Utc>,
) -> Result<(), CareError> {
    let stored = repository::get_password_hash(conn, user_id)?
        .ok_or_else(|| CareError::not_found("user", user_id))?;
    let mut errors = FieldErrors::new();
    errors.check(
        verify_password(old_password, &stored).unwrap_or(false),
        "old_password",
        "Old password is incorrect.",
    );
    check_password_strength(&mut errors, "new_password", new_password);
    errors.finish()?;

    repository::set_password_hash(conn, user_id, &hash_password(new_password, settings.password_iterations), now)?;
    tracing::info!(user_id = %user_id, "Password changed");
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Roles, groups, permissions
// ═══════════════════════════════════════════════════════════

pub fn roles() -> Vec<RoleInfo> {
    Role::ALL
        .iter()
        .map(|r| RoleInfo {
            value: r.as_str(),
            label: r.label(),
        })
        .collect()
}

/// Capabilities implied by a role.
pub fn capabilities(role: Role) -> Vec<&'static str> {
    let mut caps = vec![
        "view_patients",
        "view_assessments",
        "view_files",
        "use_communication",
        "add_visit_notes",
    ];
    match role {
        Role::Admin => caps.extend([
            "manage_patients",
            "view_all_visits",
            "manage_visits",
            "manage_assessments",
            "upload_files",
            "manage_user_groups",
        ]),
        Role::Physician => caps.extend(["manage_patients", "review_assessments"]),
        Role::Nurse => caps.extend([
            "manage_patients",
            "manage_visits",
            "manage_assessments",
            "upload_files",
        ]),
        Role::PhysicalTherapist | Role::OccupationalTherapist => {
            caps.extend(["manage_visits", "manage_assessments", "upload_files"])
        }
        Role::SocialWorker => caps.extend(["manage_visits", "upload_files"]),
    }
    caps
}

pub fn permissions(conn: &Connection, user: &User) -> Result<Permissions, CareError> {
    Ok(Permissions {
        role: user.role,
        groups: repository::get_user_groups(conn, &user.id)?,
        permissions: capabilities(user.role),
    })
}

/// Add (`add = true`) or remove a named group. Returns whether anything changed.
pub fn set_group_membership(
    conn: &Connection,
    policy: &AccessPolicy,
    actor: &User,
    target: &Uuid,
    group: &str,
    add: bool,
    now: DateTime<Utc>,
) -> Result<bool, CareError> {
    if !policy.can_assign_roles(&crate::access::Actor::new(actor.id, actor.role)) {
        return Err(CareError::Forbidden("Only administrators may change user groups".into()));
    }
    let group = group.trim();
    if group.is_empty() {
        return Err(CareError::invalid("group", "This field is required."));
    }
    if repository::get_user(conn, target)?.is_none() {
        return Err(CareError::not_found("user", target));
    }
    let changed = if add {
        repository::add_user_group(conn, target, group, now)?
    } else {
        repository::remove_user_group(conn, target, group)?
    };
    tracing::info!(actor = %actor.id, target = %target, group, add, changed, "Group membership updated");
    Ok(changed)
}

// ── Helpers ─────────────────────────────────────────────────

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_email(errors: &mut FieldErrors, email: Option<&str>, required: bool) {
    match email.map(str::trim).filter(|e| !e.is_empty()) {
        Some(email) => errors.check(EMAIL.is_match(email), "email", "Enter a valid email address."),
        None if required => errors.add("email", "This field is required."),
        None => {}
    }
}

fn check_password_strength(errors: &mut FieldErrors, field: &str, password: &str) {
    errors.check(
        password.chars().count() >= MIN_PASSWORD_LEN,
        field,
        format!("Password must be at least {MIN_PASSWORD_LEN} characters."),
    );
}

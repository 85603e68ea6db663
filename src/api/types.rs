//! Shared types for the HTTP layer: context, authenticated caller,
//! extractors and the rate limiter.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{FromRequest, Request};
use axum::Json;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::access::Actor;
use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::error::FieldErrors;
use crate::models::{Page, User};

// ═══════════════════════════════════════════════════════════
// API context — shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        let limiter = RateLimiter::new(core.config.rate_per_minute, core.config.rate_per_hour);
        Self {
            core,
            rate_limiter: Arc::new(Mutex::new(limiter)),
        }
    }

    /// Open a per-request database connection.
    pub fn db(&self) -> Result<rusqlite::Connection, ApiError> {
        Ok(self.core.open_db()?)
    }
}

// ═══════════════════════════════════════════════════════════
// Authenticated caller — injected by auth middleware
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub actor: Actor,
}

impl AuthUser {
    pub fn new(user: User) -> Self {
        let actor = Actor::new(user.id, user.role);
        Self { user, actor }
    }
}

// ═══════════════════════════════════════════════════════════
// Extractors and helpers
// ═══════════════════════════════════════════════════════════

/// `Json` whose rejections render as API errors (400 with the reason).
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

/// Path ids that do not parse name nothing, so they are reported as absent.
pub fn parse_id(raw: &str, entity: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("{entity} not found")))
}

/// Run blocking work (generator calls, file I/O) off the async runtime.
pub async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
}

/// Query-string reader that collects parse failures as field errors.
pub struct QueryParams {
    raw: HashMap<String, String>,
    errors: FieldErrors,
}

impl QueryParams {
    pub fn new(raw: HashMap<String, String>) -> Self {
        Self {
            raw,
            errors: FieldErrors::new(),
        }
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.raw
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn parsed<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.text(key)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                self.errors.add(key, format!("\"{raw}\" is not a valid value."));
                None
            }
        }
    }

    pub fn uuid(&mut self, key: &str) -> Option<Uuid> {
        self.parsed(key)
    }

    pub fn date(&mut self, key: &str) -> Option<NaiveDate> {
        let raw = self.text(key)?;
        match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                self.errors.add(key, "Date has wrong format. Use YYYY-MM-DD.");
                None
            }
        }
    }

    /// Accepts `true`/`false` and `1`/`0`.
    pub fn flag(&mut self, key: &str) -> Option<bool> {
        let raw = self.text(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => {
                self.errors.add(key, "Must be true or false.");
                None
            }
        }
    }

    pub fn page(&mut self) -> Page {
        Page {
            page: self.parsed("page"),
            page_size: self.parsed("page_size"),
        }
    }

    /// Fail with every collected parse error at once.
    pub fn finish(self) -> Result<(), ApiError> {
        self.errors.finish().map_err(ApiError::from)
    }
}

// ═══════════════════════════════════════════════════════════
// Rate limiter — per-key sliding window
// ═══════════════════════════════════════════════════════════

/// Per-caller rate limiter with per-minute and per-hour limits.
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            windows: HashMap::new(),
            per_minute,
            per_hour,
        }
    }

    /// `Err(retry_after_secs)` when the key is over either limit.
    pub fn check(&mut self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&mut self, key: &str, now: Instant) -> Result<(), u64> {
        let hour = Duration::from_secs(3600);
        // Keys whose whole window has lapsed are dropped so the map stays bounded.
        self.windows.retain(|_, entries| {
            entries.retain(|ts| now.saturating_duration_since(*ts) < hour);
            !entries.is_empty()
        });

        let entries = self.windows.entry(key.to_string()).or_default();

        let last_minute = entries
            .iter()
            .filter(|ts| now.saturating_duration_since(**ts) < Duration::from_secs(60))
            .count() as u32;
        if last_minute >= self.per_minute {
            return Err(60);
        }

        if entries.len() as u32 >= self.per_hour {
            return Err(3600);
        }

        entries.push(now);
        Ok(())
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(100, 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VisitStatus;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        QueryParams::new(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn rate_limiter_allows_under_limit() {
        let mut limiter = RateLimiter::default();
        assert!(limiter.check("token:a").is_ok());
        assert!(limiter.check("token:a").is_ok());
    }

    #[test]
    fn rate_limiter_rejects_over_per_minute() {
        let mut limiter = RateLimiter::new(2, 1000);
        assert!(limiter.check("token:a").is_ok());
        assert!(limiter.check("token:a").is_ok());
        assert_eq!(limiter.check("token:a"), Err(60));
    }

    #[test]
    fn rate_limiter_rejects_over_per_hour() {
        let mut limiter = RateLimiter::new(100, 3);
        for _ in 0..3 {
            assert!(limiter.check("token:a").is_ok());
        }
        assert_eq!(limiter.check("token:a"), Err(3600));
    }

    #[test]
    fn rate_limiter_isolates_keys() {
        let mut limiter = RateLimiter::new(1, 1000);
        assert!(limiter.check("token:a").is_ok());
        assert!(limiter.check("token:b").is_ok());
        assert_eq!(limiter.check("token:a"), Err(60));
    }

    #[test]
    fn rate_limiter_evicts_lapsed_keys() {
        let mut limiter = RateLimiter::new(10, 1000);
        let start = Instant::now();
        for i in 0..50 {
            assert!(limiter.check_at(&format!("token:{i}"), start).is_ok());
        }
        assert_eq!(limiter.tracked_keys(), 50);

        let later = start + Duration::from_secs(3601);
        assert!(limiter.check_at("client:10.0.0.1", later).is_ok());
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn query_params_parse_and_collect_errors() {
        let mut q = params(&[("status", "in_progress"), ("date_from", "2024-02-30"), ("page", "2"), ("urgent", "yes")]);
        assert_eq!(q.parsed::<VisitStatus>("status"), Some(VisitStatus::InProgress));
        assert_eq!(q.date("date_from"), None);
        assert_eq!(q.flag("urgent"), None);
        assert_eq!(q.page().page, Some(2));
        assert_eq!(q.text("missing"), None);
        assert!(matches!(q.finish(), Err(ApiError::Validation(ref f)) if f.contains_key("date_from") && f.contains_key("urgent")));
    }

    #[test]
    fn blank_values_are_absent() {
        let mut q = params(&[("patient_id", "  ")]);
        assert_eq!(q.uuid("patient_id"), None);
        assert!(q.finish().is_ok());
    }

    #[test]
    fn bad_path_id_is_not_found() {
        assert!(matches!(parse_id("nope", "Visit"), Err(ApiError::NotFound(_))));
        assert!(parse_id(&Uuid::new_v4().to_string(), "Visit").is_ok());
    }
}

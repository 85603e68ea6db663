//! API endpoint handlers.
//!
//! One module per resource family. Handlers parse the request, open a
//! connection and delegate to the service modules.

pub mod auth;
pub mod communication;
pub mod files;
pub mod health;
pub mod oasis;
pub mod patients;
pub mod visits;

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::api::error::ApiError;

/// Parse an optional JSON body: empty means defaults.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Malformed JSON body: {e}")))
}

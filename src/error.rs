//! Domain errors shared by every service module.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::db::DatabaseError;
use crate::pipeline::generation::GenerationError;
use crate::storage::StorageError;

/// Field name → validation messages. Serializes as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// Record `message` under `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) {
        if !ok {
            self.add(field, message);
        }
    }

    /// Record a "required" error when the value is missing or blank.
    pub fn require(&mut self, value: Option<&str>, field: &str) {
        self.check(
            value.is_some_and(|v| !v.trim().is_empty()),
            field,
            "This field is required.",
        );
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }

    /// `Ok(())` when nothing was recorded, otherwise a validation error.
    pub fn finish(self) -> Result<(), CareError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CareError::Validation(self))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    InvalidToken,
    TokenExpired,
}

#[derive(Error, Debug)]
pub enum CareError {
    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("Authentication failed: {0:?}")]
    Unauthorized(AuthFailure),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Cannot {attempted} {entity} in state {current}")]
    StateConflict {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Content generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl CareError {
    /// Single-field validation error.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, message);
        CareError::Validation(errors)
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CareError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, current: impl ToString, attempted: &str) -> Self {
        CareError::StateConflict {
            entity,
            current: current.to_string(),
            attempted: attempted.to_string(),
        }
    }
}

impl From<rusqlite::Error> for CareError {
    fn from(err: rusqlite::Error) -> Self {
        CareError::Database(err.into())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{FileCategory, ProcessingStatus};

/// Outcome of text extraction. Success data and failure reasons never share a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Extracted { data: serde_json::Value },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub uploaded_by: Uuid,
    pub original_filename: String,
    #[serde(skip_serializing)]
    pub stored_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub category: FileCategory,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub processing_status: ProcessingStatus,
    pub is_processed: bool,
    pub ocr_text: Option<String>,
    pub extraction: Option<ExtractionOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadedFile {
    pub fn is_image(&self) -> bool {
        self.file_type.starts_with("image/")
    }

    pub fn is_text(&self) -> bool {
        self.file_type.starts_with("text/")
    }

    pub fn file_size_mb(&self) -> f64 {
        (self.file_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }

    pub fn view(self, patient_name: String, uploaded_by_name: String) -> FileView {
        FileView {
            file_size_mb: self.file_size_mb(),
            file: self,
            patient_name,
            uploaded_by_name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileView {
    #[serde(flatten)]
    pub file: UploadedFile,
    pub file_size_mb: f64,
    pub patient_name: String,
    pub uploaded_by_name: String,
}

//! Text extraction for uploaded documents.
//!
//! A file moves `pending -> processing -> completed | failed`. Images go
//! through an [`OcrEngine`]; text files are decoded directly. The result is
//! recorded as an [`ExtractionOutcome`] together with a category-shaped
//! projection of the text.

pub mod format;
pub mod ocr;
pub mod structured;
pub mod worker;

pub use format::*;
pub use ocr::*;
pub use structured::project;
pub use worker::ExtractionQueue;

use chrono::Utc;
use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::db::repository;
use crate::db::DatabaseError;
use crate::models::{ExtractionOutcome, ProcessingStatus};
use crate::storage::{FileStore, StorageError};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR engine unavailable: {0}")]
    OcrUnavailable(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Text encoding error: {0}")]
    Encoding(String),

    #[error("Unsupported format for extraction: {0}")]
    UnsupportedFormat(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Pull text out of raw bytes according to their sniffed MIME type.
pub fn extract_text(engine: &dyn OcrEngine, bytes: &[u8], mime: &str) -> Result<String, ExtractionError> {
    if is_image(mime) {
        engine.recognize(bytes)
    } else if is_text(mime) {
        String::from_utf8(bytes.to_vec())
            .map(|s| s.trim().to_string())
            .map_err(|e| ExtractionError::Encoding(e.to_string()))
    } else {
        Err(ExtractionError::UnsupportedFormat(mime.to_string()))
    }
}

/// Run extraction for one pending file and record the outcome.
///
/// Returns `Ok(None)` when the file is no longer pending (claimed by another
/// worker, already done, or deleted). Failures of the extraction itself are
/// recorded as [`ExtractionOutcome::Failed`]; only infrastructure errors
/// (database) surface as `Err`.
pub fn process_file(
    conn: &Connection,
    store: &FileStore,
    engine: &dyn OcrEngine,
    file_id: &Uuid,
) -> Result<Option<ExtractionOutcome>, ExtractionError> {
    if !repository::claim_file_for_processing(conn, file_id, ProcessingStatus::Pending, Utc::now())? {
        tracing::debug!(file_id = %file_id, "File not pending, skipping extraction");
        return Ok(None);
    }
    let Some(joined) = repository::get_file(conn, file_id)? else {
        return Ok(None);
    };
    let file = joined.record;

    let extracted = store
        .read(&file.stored_name)
        .map_err(ExtractionError::from)
        .and_then(|bytes| extract_text(engine, &bytes, &file.file_type));

    let (text, outcome) = match extracted {
        Ok(text) => {
            let data = project(file.category, &text);
            (Some(text), ExtractionOutcome::Extracted { data })
        }
        Err(e) => {
            tracing::warn!(file_id = %file_id, error = %e, "Extraction failed");
            (None, ExtractionOutcome::Failed { reason: e.to_string() })
        }
    };

    repository::record_extraction(conn, file_id, text.as_deref(), &outcome, Utc::now())?;
    tracing::info!(
        file_id = %file_id,
        category = file.category.as_str(),
        success = matches!(outcome, ExtractionOutcome::Extracted { .. }),
        "Extraction finished"
    );
    Ok(Some(outcome))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repository::fixtures::{make_patient, make_user};
    use crate::db::sqlite::open_memory_database;
    use crate::models::*;

    /// Store `bytes` and insert a pending file row for them.
    pub(crate) fn stage_file(
        conn: &Connection,
        store: &FileStore,
        patient_id: Uuid,
        uploader: Uuid,
        name: &str,
        bytes: &[u8],
        category: FileCategory,
    ) -> UploadedFile {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let stored_name = store.save(&id, name, bytes).unwrap();
        let file = UploadedFile {
            id,
            patient_id,
            uploaded_by: uploader,
            original_filename: name.into(),
            stored_name,
            file_size: bytes.len() as i64,
            file_type: sniff_mime(bytes, name),
            category,
            description: None,
            tags: None,
            processing_status: ProcessingStatus::Pending,
            is_processed: false,
            ocr_text: None,
            extraction: None,
            created_at: now,
            updated_at: now,
        };
        repository::insert_file(conn, &file).unwrap();
        file
    }

    #[test]
    fn text_file_extracted_without_ocr() {
        let conn = open_memory_database().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "X1", None);
        let file = stage_file(&conn, &store, patient.id, nurse.id, "labs.txt", b"Glucose: 120", FileCategory::LabResults);
        let ocr = MockOcr::new("unused");

        let outcome = process_file(&conn, &store, &ocr, &file.id).unwrap().unwrap();
        assert!(matches!(outcome, ExtractionOutcome::Extracted { ref data } if data["glucose"] == "120"));
        assert_eq!(ocr.calls(), 0);

        let stored = repository::get_file(&conn, &file.id).unwrap().unwrap().record;
        assert_eq!(stored.processing_status, ProcessingStatus::Completed);
        assert!(stored.is_processed);
        assert_eq!(stored.ocr_text.as_deref(), Some("Glucose: 120"));
    }

    #[test]
    fn image_ocr_failure_is_recorded() {
        let conn = open_memory_database().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "X2", None);
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        let file = stage_file(&conn, &store, patient.id, nurse.id, "scan.png", &png, FileCategory::Forms);

        let outcome = process_file(&conn, &store, &MockOcr::failing("unreadable"), &file.id)
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ExtractionOutcome::Failed { ref reason } if reason.contains("unreadable")));

        let stored = repository::get_file(&conn, &file.id).unwrap().unwrap().record;
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert!(!stored.is_processed);
    }

    #[test]
    fn non_pending_file_is_skipped() {
        let conn = open_memory_database().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "X3", None);
        let file = stage_file(&conn, &store, patient.id, nurse.id, "a.txt", b"text", FileCategory::Other);
        let ocr = MockOcr::new("");

        assert!(process_file(&conn, &store, &ocr, &file.id).unwrap().is_some());
        assert!(process_file(&conn, &store, &ocr, &file.id).unwrap().is_none());
        assert!(process_file(&conn, &store, &ocr, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn pdf_is_unsupported() {
        let err = extract_text(&MockOcr::new(""), b"%PDF-1.4", "application/pdf").unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }
}

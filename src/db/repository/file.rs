use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{count_rows, Joined, ScopeTarget, SqlFilter};
use crate::access::Scope;
use crate::db::{
    decode_json, decode_opt_uuid, decode_timestamp, decode_uuid, encode_timestamp, DatabaseError,
};
use crate::models::*;

const FILE_SELECT: &str = "SELECT f.id, f.patient_id, f.uploaded_by, f.original_filename,
     f.stored_name, f.file_size, f.file_type, f.category, f.description, f.tags,
     f.processing_status, f.is_processed, f.ocr_text, f.structured_data, f.extraction_error,
     f.created_at, f.updated_at,
     p.first_name || ' ' || p.last_name, p.assigned_physician,
     TRIM(u.first_name || ' ' || u.last_name)";

const FILE_FROM: &str = "FROM uploaded_files f
     JOIN patients p ON p.id = f.patient_id
     JOIN users u ON u.id = f.uploaded_by";

pub fn insert_file(conn: &Connection, file: &UploadedFile) -> Result<(), DatabaseError> {
    let (structured, error) = split_outcome(file.extraction.as_ref());
    conn.execute(
        "INSERT INTO uploaded_files (id, patient_id, uploaded_by, original_filename, stored_name,
         file_size, file_type, category, description, tags, processing_status, is_processed,
         ocr_text, structured_data, extraction_error, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            file.id.to_string(),
            file.patient_id.to_string(),
            file.uploaded_by.to_string(),
            file.original_filename,
            file.stored_name,
            file.file_size,
            file.file_type,
            file.category.as_str(),
            file.description,
            file.tags,
            file.processing_status.as_str(),
            file.is_processed as i32,
            file.ocr_text,
            structured,
            error,
            encode_timestamp(&file.created_at),
            encode_timestamp(&file.updated_at),
        ],
    )?;
    Ok(())
}

fn split_outcome(outcome: Option<&ExtractionOutcome>) -> (Option<String>, Option<String>) {
    match outcome {
        Some(ExtractionOutcome::Extracted { data }) => (Some(data.to_string()), None),
        Some(ExtractionOutcome::Failed { reason }) => (None, Some(reason.clone())),
        None => (None, None),
    }
}

pub fn get_file(conn: &Connection, id: &Uuid) -> Result<Option<Joined<UploadedFile>>, DatabaseError> {
    let sql = format!("{FILE_SELECT} {FILE_FROM} WHERE f.id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let result = stmt.query_row(params![id.to_string()], file_row_from_rusqlite);
    match result {
        Ok(row) => Ok(Some(file_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Scoped, filtered, paged files, newest upload first. `search` matches
/// extracted text, filename and description.
pub fn list_files(
    conn: &Connection,
    scope: &Scope,
    filter: &FileFilter,
    page: &Page,
) -> Result<Paged<Joined<UploadedFile>>, DatabaseError> {
    let mut f = SqlFilter::new();
    f.scope(scope, ScopeTarget::Records { clinician: None });
    if let Some(patient_id) = filter.patient_id {
        f.and_eq("f.patient_id", patient_id.to_string());
    }
    if let Some(category) = filter.category {
        f.and_eq("f.category", category.as_str());
    }
    if let Some(status) = filter.processing_status {
        f.and_eq("f.processing_status", status.as_str());
    }
    if let Some(search) = &filter.search {
        f.and_contains_any(&["f.ocr_text", "f.original_filename", "f.description"], search);
    }

    let count = count_rows(conn, FILE_FROM, &f)?;
    let sql = f.paged(
        &format!("{FILE_SELECT} {FILE_FROM}"),
        "f.created_at DESC, f.id",
        page.limit(),
        page.offset(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(f.params().as_slice(), |row| Ok(file_row_from_rusqlite(row)))?;
    let mut results = Vec::new();
    for row in rows {
        results.push(file_from_row(row??)?);
    }
    Ok(Paged { count, results })
}

/// Claim a file for extraction: `from` → processing. Returns `false` if the
/// file was not in `from` (another worker got it, or it was deleted).
pub fn claim_file_for_processing(
    conn: &Connection,
    id: &Uuid,
    from: ProcessingStatus,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE uploaded_files SET processing_status = 'processing', updated_at = ?3
         WHERE id = ?1 AND processing_status = ?2",
        params![id.to_string(), from.as_str(), encode_timestamp(&now)],
    )?;
    Ok(changed == 1)
}

/// Reset a finished or failed file to pending for manual reprocessing.
pub fn reset_file_for_reprocessing(conn: &Connection, id: &Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE uploaded_files SET processing_status = 'pending', is_processed = 0,
         ocr_text = NULL, structured_data = NULL, extraction_error = NULL, updated_at = ?2
         WHERE id = ?1 AND processing_status != 'processing'",
        params![id.to_string(), encode_timestamp(&now)],
    )?;
    Ok(changed == 1)
}

/// Store the result of an extraction run and settle the status.
pub fn record_extraction(
    conn: &Connection,
    id: &Uuid,
    text: Option<&str>,
    outcome: &ExtractionOutcome,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let (structured, error) = split_outcome(Some(outcome));
    let (status, processed) = match outcome {
        ExtractionOutcome::Extracted { .. } => (ProcessingStatus::Completed, 1),
        ExtractionOutcome::Failed { .. } => (ProcessingStatus::Failed, 0),
    };
    conn.execute(
        "UPDATE uploaded_files SET processing_status = ?2, is_processed = ?3, ocr_text = ?4,
         structured_data = ?5, extraction_error = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            id.to_string(),
            status.as_str(),
            processed,
            text,
            structured,
            error,
            encode_timestamp(&now),
        ],
    )?;
    Ok(())
}

/// Files stuck in `processing` (e.g. after a crash) go back to `pending`.
/// Returns the ids that were reset.
pub fn reset_stuck_processing(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Uuid>, DatabaseError> {
    let ids = {
        let mut stmt = conn.prepare(
            "SELECT id FROM uploaded_files WHERE processing_status = 'processing'",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(decode_uuid("uploaded_files.id", &row?)?);
        }
        ids
    };
    conn.execute(
        "UPDATE uploaded_files SET processing_status = 'pending', updated_at = ?1
         WHERE processing_status = 'processing'",
        params![encode_timestamp(&now)],
    )?;
    Ok(ids)
}

/// Returns the stored blob name of the deleted row.
pub fn delete_file(conn: &Connection, id: &Uuid) -> Result<Option<String>, DatabaseError> {
    let stored: Option<String> = match conn.query_row(
        "SELECT stored_name FROM uploaded_files WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    ) {
        Ok(name) => Some(name),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(e.into()),
    };
    if stored.is_some() {
        conn.execute("DELETE FROM uploaded_files WHERE id = ?1", params![id.to_string()])?;
    }
    Ok(stored)
}

// ── Row mapping ─────────────────────────────────────────────

struct FileRow {
    id: String,
    patient_id: String,
    uploaded_by: String,
    original_filename: String,
    stored_name: String,
    file_size: i64,
    file_type: String,
    category: String,
    description: Option<String>,
    tags: Option<String>,
    processing_status: String,
    is_processed: i32,
    ocr_text: Option<String>,
    structured_data: Option<String>,
    extraction_error: Option<String>,
    created_at: String,
    updated_at: String,
    patient_name: String,
    patient_physician: Option<String>,
    uploaded_by_name: String,
}

fn file_row_from_rusqlite(row: &Row<'_>) -> Result<FileRow, rusqlite::Error> {
    Ok(FileRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        uploaded_by: row.get(2)?,
        original_filename: row.get(3)?,
        stored_name: row.get(4)?,
        file_size: row.get(5)?,
        file_type: row.get(6)?,
        category: row.get(7)?,
        description: row.get(8)?,
        tags: row.get(9)?,
        processing_status: row.get(10)?,
        is_processed: row.get(11)?,
        ocr_text: row.get(12)?,
        structured_data: row.get(13)?,
        extraction_error: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
        patient_name: row.get(17)?,
        patient_physician: row.get(18)?,
        uploaded_by_name: row.get(19)?,
    })
}

fn file_from_row(row: FileRow) -> Result<Joined<UploadedFile>, DatabaseError> {
    let extraction = match (row.structured_data, row.extraction_error) {
        (_, Some(reason)) => Some(ExtractionOutcome::Failed { reason }),
        (Some(data), None) => Some(ExtractionOutcome::Extracted {
            data: decode_json("uploaded_files.structured_data", &data)?,
        }),
        (None, None) => None,
    };
    let file = UploadedFile {
        id: decode_uuid("uploaded_files.id", &row.id)?,
        patient_id: decode_uuid("uploaded_files.patient_id", &row.patient_id)?,
        uploaded_by: decode_uuid("uploaded_files.uploaded_by", &row.uploaded_by)?,
        original_filename: row.original_filename,
        stored_name: row.stored_name,
        file_size: row.file_size,
        file_type: row.file_type,
        category: FileCategory::from_str(&row.category)?,
        description: row.description,
        tags: row.tags,
        processing_status: ProcessingStatus::from_str(&row.processing_status)?,
        is_processed: row.is_processed != 0,
        ocr_text: row.ocr_text,
        extraction,
        created_at: decode_timestamp("uploaded_files.created_at", &row.created_at)?,
        updated_at: decode_timestamp("uploaded_files.updated_at", &row.updated_at)?,
    };
    Ok(Joined {
        record: file,
        patient_name: row.patient_name,
        patient_physician: decode_opt_uuid("patients.assigned_physician", row.patient_physician)?,
        user_name: row.uploaded_by_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::patient::tests::make_patient;
    use crate::db::repository::user::tests::make_user;
    use crate::db::sqlite::open_memory_database;

    fn make_file(conn: &Connection, patient_id: Uuid, uploader: Uuid, mime: &str) -> UploadedFile {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let file = UploadedFile {
            id,
            patient_id,
            uploaded_by: uploader,
            original_filename: "labs.txt".into(),
            stored_name: format!("{id}.bin"),
            file_size: 42,
            file_type: mime.into(),
            category: FileCategory::LabResults,
            description: None,
            tags: None,
            processing_status: ProcessingStatus::Pending,
            is_processed: false,
            ocr_text: None,
            extraction: None,
            created_at: now,
            updated_at: now,
        };
        insert_file(conn, &file).unwrap();
        file
    }

    #[test]
    fn claim_then_record_success() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "F1", None);
        let file = make_file(&conn, patient.id, nurse.id, "text/plain");

        assert!(claim_file_for_processing(&conn, &file.id, ProcessingStatus::Pending, Utc::now()).unwrap());
        assert!(!claim_file_for_processing(&conn, &file.id, ProcessingStatus::Pending, Utc::now()).unwrap());

        let outcome = ExtractionOutcome::Extracted {
            data: serde_json::json!({"glucose": 110.0}),
        };
        record_extraction(&conn, &file.id, Some("Glucose: 110"), &outcome, Utc::now()).unwrap();

        let stored = get_file(&conn, &file.id).unwrap().unwrap().record;
        assert_eq!(stored.processing_status, ProcessingStatus::Completed);
        assert!(stored.is_processed);
        assert_eq!(stored.extraction, Some(outcome));

        let filter = FileFilter {
            search: Some("glucose".into()),
            ..Default::default()
        };
        assert_eq!(list_files(&conn, &Scope::All, &filter, &Page::default()).unwrap().count, 1);
    }

    #[test]
    fn failure_is_tagged_not_stored_as_data() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "F2", None);
        let file = make_file(&conn, patient.id, nurse.id, "image/png");
        let outcome = ExtractionOutcome::Failed {
            reason: "engine unavailable".into(),
        };
        record_extraction(&conn, &file.id, None, &outcome, Utc::now()).unwrap();
        let stored = get_file(&conn, &file.id).unwrap().unwrap().record;
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert_eq!(stored.extraction, Some(outcome));
    }

    #[test]
    fn stuck_files_reset_to_pending() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "F3", None);
        let file = make_file(&conn, patient.id, nurse.id, "image/png");
        claim_file_for_processing(&conn, &file.id, ProcessingStatus::Pending, Utc::now()).unwrap();

        let reset = reset_stuck_processing(&conn, Utc::now()).unwrap();
        assert_eq!(reset, vec![file.id]);
        let stored = get_file(&conn, &file.id).unwrap().unwrap().record;
        assert_eq!(stored.processing_status, ProcessingStatus::Pending);
    }

    #[test]
    fn delete_returns_stored_name() {
        let conn = open_memory_database().unwrap();
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "F4", None);
        let file = make_file(&conn, patient.id, nurse.id, "text/plain");
        assert_eq!(delete_file(&conn, &file.id).unwrap(), Some(file.stored_name.clone()));
        assert_eq!(delete_file(&conn, &file.id).unwrap(), None);
    }
}

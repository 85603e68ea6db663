//! Document intake: upload, listing, download, deletion and reprocessing of
//! patient files.
//!
//! Uploads are stored and recorded as pending, then handed to the
//! [`ExtractionQueue`] when their type has an extraction path.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::access::{can_view, scope_query, Actor, Resource, ResourceKind};
use crate::db::repository::{self, Joined};
use crate::error::{CareError, FieldErrors};
use crate::models::*;
use crate::patients::patient_for_record;
use crate::pipeline::extraction::{is_extractable, sniff_mime, ExtractionQueue};
use crate::storage::FileStore;

/// A multipart upload after the transport layer has taken it apart.
#[derive(Debug, Default)]
pub struct UploadInput {
    pub patient_id: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub filename: Option<String>,
    pub bytes: Option<Vec<u8>>,
}

/// Raw bytes for a download.
#[derive(Debug)]
pub struct FileContent {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

fn to_view(joined: Joined<UploadedFile>) -> FileView {
    joined.record.view(joined.patient_name, joined.user_name)
}

fn visible_file(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<Joined<UploadedFile>, CareError> {
    repository::get_file(conn, id)?
        .filter(|j| {
            can_view(
                actor,
                ResourceKind::File,
                Resource::Record {
                    patient_physician: j.patient_physician,
                    clinician: None,
                },
            )
        })
        .ok_or_else(|| CareError::not_found("file", id))
}

fn fetch_view(conn: &Connection, id: &Uuid) -> Result<FileView, CareError> {
    repository::get_file(conn, id)?
        .map(to_view)
        .ok_or_else(|| CareError::not_found("file", id))
}

/// Store an upload and record it as pending. Images and text are queued for
/// extraction; anything else stays pending.
pub fn upload(
    conn: &Connection,
    store: &FileStore,
    queue: &ExtractionQueue,
    actor: &Actor,
    input: UploadInput,
    max_bytes: usize,
    now: DateTime<Utc>,
) -> Result<FileView, CareError> {
    let mut errors = FieldErrors::new();
    let patient_id = match input.patient_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<Uuid>() {
            Ok(id) => Some(id),
            Err(_) => {
                errors.add("patient_id", "Must be a valid UUID.");
                None
            }
        },
        None => {
            errors.add("patient_id", "This field is required.");
            None
        }
    };
    let category = match input.category.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => {
            let parsed = raw.parse::<FileCategory>().ok();
            errors.check(parsed.is_some(), "category", format!("\"{raw}\" is not a valid choice."));
            parsed.unwrap_or(FileCategory::Other)
        }
        None => FileCategory::Other,
    };
    let bytes = input.bytes.unwrap_or_default();
    let filename = input
        .filename
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload.bin".into());
    if bytes.is_empty() {
        errors.add("file", "The submitted file is empty.");
    } else if bytes.len() > max_bytes {
        errors.add(
            "file",
            format!("File exceeds the maximum upload size of {} MB.", max_bytes / (1024 * 1024)),
        );
    }
    if let Some(pid) = patient_id {
        match patient_for_record(conn, actor, &pid) {
            Ok(_) => {}
            Err(CareError::Validation(e)) => {
                for msg in e.get("patient_id").unwrap_or_default() {
                    errors.add("patient_id", msg.clone());
                }
            }
            Err(other) => return Err(other),
        }
    }
    errors.finish()?;

    let id = Uuid::new_v4();
    let file_type = sniff_mime(&bytes, &filename);
    let stored_name = store.save(&id, &filename, &bytes)?;
    let file = UploadedFile {
        id,
        patient_id: patient_id.unwrap_or_default(),
        uploaded_by: actor.id,
        original_filename: filename,
        stored_name,
        file_size: bytes.len() as i64,
        file_type,
        category,
        description: input.description.filter(|s| !s.trim().is_empty()),
        tags: input.tags.filter(|s| !s.trim().is_empty()),
        processing_status: ProcessingStatus::Pending,
        is_processed: false,
        ocr_text: None,
        extraction: None,
        created_at: now,
        updated_at: now,
    };
    if let Err(e) = repository::insert_file(conn, &file) {
        store.remove_all(std::slice::from_ref(&file.stored_name));
        return Err(e.into());
    }
    tracing::info!(
        file_id = %file.id,
        file_type = %file.file_type,
        size = file.file_size,
        "File uploaded"
    );

    if is_extractable(&file.file_type) {
        queue.enqueue(file.id);
    }
    fetch_view(conn, &file.id)
}

pub fn list(conn: &Connection, actor: &Actor, filter: &FileFilter, page: &Page) -> Result<Paged<FileView>, CareError> {
    let scope = scope_query(actor, ResourceKind::File);
    let paged = repository::list_files(conn, &scope, filter, page)?;
    Ok(Paged {
        count: paged.count,
        results: paged.results.into_iter().map(to_view).collect(),
    })
}

pub fn get(conn: &Connection, actor: &Actor, id: &Uuid) -> Result<FileView, CareError> {
    visible_file(conn, actor, id).map(to_view)
}

pub fn content(conn: &Connection, store: &FileStore, actor: &Actor, id: &Uuid) -> Result<FileContent, CareError> {
    let file = visible_file(conn, actor, id)?.record;
    let bytes = store.read(&file.stored_name)?;
    Ok(FileContent {
        filename: file.original_filename,
        content_type: file.file_type,
        bytes,
    })
}

/// Delete the row, then the blob. A blob that cannot be removed is logged.
pub fn delete(conn: &Connection, store: &FileStore, actor: &Actor, id: &Uuid) -> Result<(), CareError> {
    visible_file(conn, actor, id)?;
    if let Some(stored_name) = repository::delete_file(conn, id)? {
        store.remove_all(&[stored_name]);
    }
    tracing::info!(file_id = %id, "File deleted");
    Ok(())
}

/// Run extraction again from scratch. Only images and text qualify.
pub fn reprocess(
    conn: &Connection,
    queue: &ExtractionQueue,
    actor: &Actor,
    id: &Uuid,
    now: DateTime<Utc>,
) -> Result<FileView, CareError> {
    let file = visible_file(conn, actor, id)?.record;
    if !file.is_image() && !file.is_text() {
        return Err(CareError::invalid("file", "File type not supported for processing."));
    }
    if !repository::reset_file_for_reprocessing(conn, id, now)? {
        return Err(CareError::conflict("file", file.processing_status.as_str(), "process"));
    }
    queue.enqueue(*id);
    fetch_view(conn, id)
}

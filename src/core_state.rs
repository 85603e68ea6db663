//! Shared application state.
//!
//! `CoreState` is built once at startup, wrapped in `Arc`, and handed to the
//! HTTP layer. Request handlers open their own SQLite connection per request
//! through [`CoreState::open_db`]; long-lived collaborators (file store,
//! content generator, extraction workers, audit buffer) live here.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::access::AccessPolicy;
use crate::config::Config;
use crate::db::repository::{self, AuditRecord};
use crate::db::{self, sqlite};
use crate::identity::AuthSettings;
use crate::pipeline::extraction::worker::ExtractionContext;
use crate::pipeline::extraction::{ExtractionError, ExtractionQueue, OcrEngine, TesseractCli};
use crate::pipeline::generation::{build_generator, ContentGenerator, GenerationError};
use crate::storage::{FileStore, StorageError};

/// Maximum audit buffer size before flush.
const AUDIT_BUFFER_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Generator setup failed: {0}")]
    Generator(#[from] GenerationError),
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),
}

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub config: Config,
    db_path: PathBuf,
    pub store: FileStore,
    pub generator: Arc<dyn ContentGenerator>,
    pub extraction: ExtractionQueue,
    pub auth: AuthSettings,
    audit: AuditLogger,
}

impl CoreState {
    /// Create the data directory, migrate the database and start the
    /// extraction workers with the configured generator and OCR command.
    pub fn open(config: Config) -> Result<Self, CoreError> {
        let generator = build_generator(&config.generator)?;
        let ocr: Arc<dyn OcrEngine> = Arc::new(TesseractCli::new(&config.ocr_command));
        Self::with_engines(config, generator, ocr)
    }

    /// Like [`CoreState::open`] with explicit collaborators.
    pub fn with_engines(
        config: Config,
        generator: Arc<dyn ContentGenerator>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Result<Self, CoreError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.db_path();
        drop(sqlite::open_database(&db_path)?);
        let store = FileStore::open(config.files_dir())?;

        let extraction = ExtractionQueue::start(
            ExtractionContext {
                db_path: db_path.clone(),
                store: store.clone(),
                engine: ocr,
            },
            config.extraction_workers,
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            generator_remote = generator.is_remote(),
            "Core state ready"
        );
        Ok(Self {
            auth: AuthSettings::from_config(&config),
            config,
            db_path,
            store,
            generator,
            extraction,
            audit: AuditLogger::new(),
        })
    }

    /// Open a connection to the (already migrated) database.
    pub fn open_db(&self) -> Result<rusqlite::Connection, db::DatabaseError> {
        sqlite::connect(&self.db_path)
    }

    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.config.policy
    }

    /// Re-queue interrupted extractions and prune old audit rows.
    pub fn startup_maintenance(&self) -> Result<(), CoreError> {
        let requeued = self.extraction.recover()?;
        let conn = self.open_db()?;
        let pruned = repository::prune_audit_log(&conn, Utc::now(), self.config.audit_retention_days)?;
        tracing::info!(requeued, pruned, "Startup maintenance done");
        Ok(())
    }

    /// Flush the audit buffer and stop extraction workers.
    pub fn shutdown(&self) {
        if let Err(e) = self.flush_audit() {
            tracing::warn!("Final audit flush failed: {e}");
        }
        self.extraction.shutdown();
    }

    // ── Audit logging ───────────────────────────────────────

    /// Buffer an audit row. Auto-flushes to DB when the buffer is full.
    pub fn log_access(&self, user_id: Option<Uuid>, action: &str, entity: &str) {
        let needs_flush = self.audit.log(user_id, action, entity);
        if needs_flush {
            if let Err(e) = self.flush_audit() {
                tracing::warn!("Auto-flush audit failed: {e}");
            }
        }
    }

    pub fn audit_entries(&self) -> Vec<AuditRecord> {
        self.audit.entries()
    }

    pub fn flush_audit(&self) -> Result<usize, CoreError> {
        let conn = self.open_db()?;
        self.audit.flush_to_db(&conn)
    }
}

// ═══════════════════════════════════════════════════════════
// AuditLogger
// ═══════════════════════════════════════════════════════════

/// In-memory audit buffer, flushed to `audit_log` in batches.
pub struct AuditLogger {
    buffer: Mutex<Vec<AuditRecord>>,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::with_capacity(AUDIT_BUFFER_CAPACITY)),
        }
    }

    /// Returns `true` once the buffer has reached the flush threshold.
    pub fn log(&self, user_id: Option<Uuid>, action: &str, entity: &str) -> bool {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(AuditRecord {
                timestamp: Utc::now(),
                user_id,
                action: action.to_string(),
                entity: entity.to_string(),
            });
            buf.len() >= AUDIT_BUFFER_CAPACITY
        } else {
            false
        }
    }

    pub fn entries(&self) -> Vec<AuditRecord> {
        self.buffer.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<AuditRecord> {
        self.buffer
            .lock()
            .map(|mut buf| buf.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn flush_to_db(&self, conn: &rusqlite::Connection) -> Result<usize, CoreError> {
        let entries = self.drain();
        if entries.is_empty() {
            return Ok(0);
        }
        if let Err(e) = repository::insert_audit_entries(conn, &entries) {
            tracing::warn!(count = entries.len(), error = %e, "Audit flush failed, entries kept");
            self.restore(entries);
            return Err(e.into());
        }
        tracing::debug!(count = entries.len(), "Flushed audit entries to database");
        Ok(entries.len())
    }

    /// Put unflushed entries back ahead of anything logged since the drain.
    fn restore(&self, entries: Vec<AuditRecord>) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.splice(0..0, entries);
        }
    }
}

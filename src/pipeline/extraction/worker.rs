//! Extraction worker pool.
//!
//! Upload handlers hand file ids to [`ExtractionQueue::enqueue`] and return
//! immediately; a fixed set of threads drains the channel. Each job opens its
//! own connection. With zero workers, jobs run inline on the caller.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::Utc;
use uuid::Uuid;

use super::{process_file, ExtractionError, OcrEngine};
use crate::db::{repository, sqlite};
use crate::storage::FileStore;

/// Everything a job needs, shared by all workers.
pub struct ExtractionContext {
    pub db_path: PathBuf,
    pub store: FileStore,
    pub engine: Arc<dyn OcrEngine>,
}

impl ExtractionContext {
    fn run(&self, file_id: &Uuid) {
        let result = sqlite::connect(&self.db_path)
            .map_err(ExtractionError::from)
            .and_then(|conn| process_file(&conn, &self.store, self.engine.as_ref(), file_id));
        if let Err(e) = result {
            tracing::error!(file_id = %file_id, error = %e, "Extraction job failed");
        }
    }
}

pub struct ExtractionQueue {
    context: Arc<ExtractionContext>,
    sender: Mutex<Option<Sender<Uuid>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExtractionQueue {
    /// Spawn `workers` threads. Zero means jobs run inline in `enqueue`.
    pub fn start(context: ExtractionContext, workers: usize) -> Self {
        let context = Arc::new(context);
        if workers == 0 {
            return Self {
                context,
                sender: Mutex::new(None),
                workers: Mutex::new(Vec::new()),
            };
        }

        let (tx, rx) = mpsc::channel::<Uuid>();
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers)
            .map(|n| {
                let rx = Arc::clone(&rx);
                let ctx = Arc::clone(&context);
                std::thread::Builder::new()
                    .name(format!("extraction-{n}"))
                    .spawn(move || worker_loop(n, &rx, &ctx))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to spawn extraction worker");
                    None
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = handles.len(), "Extraction workers started");
        Self {
            context,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    pub fn enqueue(&self, file_id: Uuid) {
        let sent = match self.sender.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(tx) => tx.send(file_id).is_ok(),
                None => false,
            },
            Err(_) => false,
        };
        if !sent {
            self.context.run(&file_id);
        }
    }

    /// Reset files left in `processing` by a previous run and queue them again.
    pub fn recover(&self) -> Result<usize, ExtractionError> {
        let conn = sqlite::connect(&self.context.db_path)?;
        let stuck = repository::reset_stuck_processing(&conn, Utc::now())?;
        if !stuck.is_empty() {
            tracing::info!(count = stuck.len(), "Re-queueing interrupted extractions");
        }
        for id in &stuck {
            self.enqueue(*id);
        }
        Ok(stuck.len())
    }

    /// Close the channel and wait for in-flight jobs to finish.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for ExtractionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(n: usize, rx: &Mutex<Receiver<Uuid>>, ctx: &ExtractionContext) {
    loop {
        let next = match rx.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => break,
        };
        match next {
            Ok(file_id) => ctx.run(&file_id),
            Err(_) => break,
        }
    }
    tracing::debug!(worker = n, "Extraction worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::fixtures::{make_patient, make_user};
    use crate::models::*;
    use crate::pipeline::extraction::tests::stage_file;
    use crate::pipeline::extraction::MockOcr;

    fn setup(workers: usize) -> (tempfile::TempDir, ExtractionQueue, rusqlite::Connection, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("homecare.db");
        let conn = sqlite::open_database(&db_path).unwrap();
        let store = FileStore::open(dir.path().join("files")).unwrap();
        let queue = ExtractionQueue::start(
            ExtractionContext {
                db_path,
                store: store.clone(),
                engine: Arc::new(MockOcr::new("BP 120/80")),
            },
            workers,
        );
        (dir, queue, conn, store)
    }

    fn status(conn: &rusqlite::Connection, id: &Uuid) -> ProcessingStatus {
        repository::get_file(conn, id).unwrap().unwrap().record.processing_status
    }

    #[test]
    fn inline_queue_processes_immediately() {
        let (_dir, queue, conn, store) = setup(0);
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "Q1", None);
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        let file = stage_file(&conn, &store, patient.id, nurse.id, "v.png", &png, FileCategory::Forms);

        queue.enqueue(file.id);
        assert_eq!(status(&conn, &file.id), ProcessingStatus::Completed);
    }

    #[test]
    fn worker_pool_drains_queue_before_shutdown() {
        let (_dir, queue, conn, store) = setup(2);
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "Q2", None);
        let ids: Vec<Uuid> = (0..4)
            .map(|i| {
                stage_file(&conn, &store, patient.id, nurse.id, &format!("n{i}.txt"), b"HR 70", FileCategory::Forms).id
            })
            .collect();

        for id in &ids {
            queue.enqueue(*id);
        }
        queue.shutdown();
        for id in &ids {
            assert_eq!(status(&conn, id), ProcessingStatus::Completed);
        }
    }

    #[test]
    fn recover_requeues_stuck_files() {
        let (_dir, queue, conn, store) = setup(0);
        let nurse = make_user(&conn, "nurse", Role::Nurse);
        let patient = make_patient(&conn, "Q3", None);
        let file = stage_file(&conn, &store, patient.id, nurse.id, "s.txt", b"notes", FileCategory::Other);
        repository::claim_file_for_processing(&conn, &file.id, ProcessingStatus::Pending, Utc::now()).unwrap();

        assert_eq!(queue.recover().unwrap(), 1);
        assert_eq!(status(&conn, &file.id), ProcessingStatus::Completed);
    }
}

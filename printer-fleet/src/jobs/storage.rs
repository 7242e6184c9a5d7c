//! Durable pending-job store
//!
//! The manager loads everything once on start and writes through on every
//! mutation. Values are JSON-encoded [`PrinterJob`]s keyed by job id.

use super::types::PrinterJob;
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Jobs table: key = job_id, value = JSON
const JOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("printer_jobs");

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type JobStoreResult<T> = Result<T, JobStoreError>;

/// Key-value contract for pending jobs
pub trait JobStore: Send + Sync {
    fn load_all(&self) -> JobStoreResult<Vec<PrinterJob>>;
    /// Insert or replace
    fn put(&self, job: &PrinterJob) -> JobStoreResult<()>;
    /// Removing a missing id is not an error
    fn delete(&self, job_id: &str) -> JobStoreResult<()>;
}

/// redb-backed job store
#[derive(Clone)]
pub struct RedbJobStore {
    db: Arc<Database>,
}

impl RedbJobStore {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> JobStoreResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open in-memory database
    pub fn open_in_memory() -> JobStoreResult<Self> {
        let db =
            Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> JobStoreResult<Self> {
        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(JOBS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl JobStore for RedbJobStore {
    fn load_all(&self) -> JobStoreResult<Vec<PrinterJob>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(JOBS_TABLE)?;

        let mut jobs = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            match serde_json::from_slice::<PrinterJob>(value.value()) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::error!(error = %e, "Skipping unreadable stored job"),
            }
        }
        Ok(jobs)
    }

    fn put(&self, job: &PrinterJob) -> JobStoreResult<()> {
        let value = serde_json::to_vec(job)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(JOBS_TABLE)?;
            table.insert(job.job_id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, job_id: &str) -> JobStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(JOBS_TABLE)?;
            table.remove(job_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Non-durable store
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, PrinterJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn load_all(&self) -> JobStoreResult<Vec<PrinterJob>> {
        Ok(self.jobs.lock().values().cloned().collect())
    }

    fn put(&self, job: &PrinterJob) -> JobStoreResult<()> {
        self.jobs.lock().insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    fn delete(&self, job_id: &str) -> JobStoreResult<()> {
        self.jobs.lock().remove(job_id);
        Ok(())
    }
}

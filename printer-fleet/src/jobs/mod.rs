//! Job queue
//!
//! Pending jobs, their durable store and the manager that (re)delivers them.

mod manager;
mod storage;
mod types;

pub use manager::JobManager;
pub use storage::{JobStore, JobStoreError, JobStoreResult, MemoryJobStore, RedbJobStore};
pub use types::{
    PendingJobSummary, PrinterJob, SubmitOutcome, default_printer_name, generate_job_id,
};

//! # printer-fleet
//!
//! Keeps a set of network thermal printers fed.
//!
//! - [`PrinterPool`]: registered printers, their reachability and a
//!   periodic monitor that reports transitions once each
//! - [`JobManager`]: a durable queue of jobs that could not be delivered,
//!   retried when their printer comes back or moved to another printer
//! - [`EventBus`]: reachability and job events for the host
//!
//! Encoding and the wire protocol live in `thermal-printer`.
//!
//! ```ignore
//! let fleet = PrinterFleet::open(FleetConfig::from_env())?;
//! fleet.pool().add(PrinterConfig::new("192.168.1.100").with_name("Kitchen"))?;
//! fleet.start();
//!
//! match fleet.jobs().submit("192.168.1.100", items, r#"{"order":7}"#).await? {
//!     SubmitOutcome::Delivered { .. } => {}
//!     SubmitOutcome::Queued(job) => tracing::warn!(job_id = %job.job_id, "Queued"),
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod logger;
pub mod pool;

pub use config::{FleetConfig, RetentionPolicy};
pub use error::{FleetError, FleetResult};
pub use events::{EventBus, PrinterEvent};
pub use jobs::{
    JobManager, JobStore, JobStoreError, MemoryJobStore, PendingJobSummary, PrinterJob,
    RedbJobStore, SubmitOutcome,
};
pub use pool::{
    PoolConfig, PrinterConfig, PrinterPool, PrinterPoolEntry, Reachability, ReachabilityProbe,
    TcpProbe,
};

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Pool, job queue and event bus wired together
#[derive(Clone)]
pub struct PrinterFleet {
    config: FleetConfig,
    pool: PrinterPool,
    jobs: JobManager,
}

impl PrinterFleet {
    /// Open with the store named by `config.job_db_path`, in memory if unset
    pub fn open(config: FleetConfig) -> FleetResult<Self> {
        let store: Arc<dyn JobStore> = match &config.job_db_path {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        FleetError::invalid(format!(
                            "cannot create job store directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
                Arc::new(RedbJobStore::open(path)?)
            }
            None => Arc::new(MemoryJobStore::new()),
        };
        Self::new(config, store)
    }

    pub fn new(config: FleetConfig, store: Arc<dyn JobStore>) -> FleetResult<Self> {
        let pool = PrinterPool::new(&config, EventBus::new());
        Self::with_pool(config, pool, store)
    }

    /// Use a pool built elsewhere, e.g. with a custom probe
    pub fn with_pool(
        config: FleetConfig,
        pool: PrinterPool,
        store: Arc<dyn JobStore>,
    ) -> FleetResult<Self> {
        let jobs = JobManager::open(&config, pool.clone(), store)?;
        Ok(Self { config, pool, jobs })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn pool(&self) -> &PrinterPool {
        &self.pool
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.pool.events().subscribe()
    }

    /// Start the reachability monitor and automatic retries
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) {
        self.jobs.start_retry_listener();
        self.pool.start_periodic_reachability_check();
        info!(
            printers = self.pool.status().len(),
            pending = self.jobs.pending_job_details().len(),
            "Printer fleet started"
        );
    }

    /// Stop background work; queued jobs stay in the store
    pub fn close(&self) {
        self.pool.stop_periodic_reachability_check();
        self.jobs.stop_retry_listener();
        info!("Printer fleet stopped");
    }
}

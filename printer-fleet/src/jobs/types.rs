//! Job types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thermal_printer::PrintItem;

/// A unit of print work for one printer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterJob {
    pub job_id: String,
    pub target_printer_ip: String,
    pub printer_name: String,
    /// Never modified after enqueue
    pub job_content: Vec<PrintItem>,
    /// Opaque to the fleet
    pub metadata: String,
    pub pending: bool,
    pub created_at: DateTime<Utc>,
    /// Queue position; lower goes first
    pub seq: u64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl PrinterJob {
    pub fn summary(&self) -> PendingJobSummary {
        PendingJobSummary {
            job_id: self.job_id.clone(),
            printer_ip: self.target_printer_ip.clone(),
            printer_name: self.printer_name.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
        }
    }
}

/// What a host sees of a pending job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingJobSummary {
    pub job_id: String,
    pub printer_ip: String,
    pub printer_name: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Result of [`JobManager::submit`](super::JobManager::submit)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Printed right away
    Delivered { job_id: String },
    /// Kept for a later retry
    Queued(PrinterJob),
}

impl SubmitOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            SubmitOutcome::Delivered { job_id } => job_id,
            SubmitOutcome::Queued(job) => &job.job_id,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, SubmitOutcome::Delivered { .. })
    }
}

/// `PJ-<yyyyMMddHHmmss>-<8 hex>`
pub fn generate_job_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("PJ-{}-{}", stamp, &simple[..8])
}

/// Name shown for printers the pool has no name for
pub fn default_printer_name(ip: &str) -> String {
    format!("PrinterName_{}", ip)
}

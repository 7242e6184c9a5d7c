//! Fleet configuration
//!
//! Every setting has a default; `from_env` overrides them from environment
//! variables.

use std::path::PathBuf;
use std::time::Duration;
use thermal_printer::{EncoderConfig, PaperWidth};

/// What happens to a job once it has been delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Remove the job from the queue and the store
    #[default]
    Delete,
    /// Keep it with `pending = false` for audit
    KeepDelivered,
}

impl RetentionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" => Some(Self::Delete),
            "keep" | "keep_delivered" => Some(Self::KeepDelivered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Port for printers added without one, and for ad-hoc ips
    pub printer_port: u16,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub probe_timeout: Duration,
    pub probe_interval: Duration,
    pub max_concurrent_probes: usize,
    /// Consecutive failed probes before a printer counts as unreachable
    pub unreachable_after: u32,
    pub retention: RetentionPolicy,
    pub paper_width: PaperWidth,
    /// redb file for pending jobs; in-memory when unset
    pub job_db_path: Option<PathBuf>,
    pub log_level: String,
    pub log_dir: Option<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            printer_port: 9100,
            connect_timeout: Duration::from_millis(5000),
            io_timeout: Duration::from_millis(5000),
            probe_timeout: Duration::from_millis(500),
            probe_interval: Duration::from_millis(5000),
            max_concurrent_probes: 8,
            unreachable_after: 1,
            retention: RetentionPolicy::Delete,
            paper_width: PaperWidth::Mm80,
            job_db_path: None,
            log_level: "info".into(),
            log_dir: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl FleetConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            printer_port: env_parse("PRINTER_PORT").unwrap_or(defaults.printer_port),
            connect_timeout: env_parse("CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            io_timeout: env_parse("IO_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.io_timeout),
            probe_timeout: env_parse("PROBE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_timeout),
            probe_interval: env_parse("PROBE_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_interval),
            max_concurrent_probes: env_parse("MAX_CONCURRENT_PROBES")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_probes),
            unreachable_after: env_parse("UNREACHABLE_AFTER")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.unreachable_after),
            retention: std::env::var("JOB_RETENTION")
                .ok()
                .and_then(|v| RetentionPolicy::parse(&v))
                .unwrap_or(defaults.retention),
            paper_width: std::env::var("PAPER_WIDTH")
                .ok()
                .and_then(|v| PaperWidth::parse(&v))
                .unwrap_or(defaults.paper_width),
            job_db_path: std::env::var("JOB_DB_PATH").ok().map(PathBuf::from),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_dir: std::env::var("LOG_DIR").ok(),
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig::new(self.paper_width)
    }

    /// Short timeouts and a fast monitor tick, for tests
    pub fn for_tests() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            io_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(200),
            probe_interval: Duration::from_millis(50),
            ..Self::default()
        }
    }
}

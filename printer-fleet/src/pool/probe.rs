//! Reachability probes

use async_trait::async_trait;
use std::time::Duration;

/// A short connectivity check, distinct from a job delivery
///
/// Implementations must bound their own running time.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync + 'static {
    async fn probe(&self, ip: &str, port: u16) -> bool;
}

/// Connect-and-drop TCP probe
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self, ip: &str, port: u16) -> bool {
        thermal_printer::probe(ip, port, self.timeout).await
    }
}

//! Connection pool & reachability tracking
//!
//! The pool owns one entry per printer ip. Liveness is only ever changed by
//! [`PrinterPool::apply_probe`], which runs under the entry table's write
//! lock and publishes transition events before releasing it, so events for
//! an ip come out in the order the transitions happened.
//!
//! Per ip there is at most one probe in flight (probe gate) and at most one
//! job delivery in flight (device lock).

mod monitor;
mod probe;

pub use probe::{ReachabilityProbe, TcpProbe};

use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::events::{EventBus, PrinterEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Printer registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterConfig {
    pub ip: String,
    /// Defaults to the fleet's printer port
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl PrinterConfig {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    /// Not probed since it was added
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterPoolEntry {
    pub ip: String,
    pub port: u16,
    pub name: Option<String>,
    pub model: Option<String>,
    pub reachability: Reachability,
    /// An unreachable event went out and no reachable event since
    pub notified: bool,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(skip)]
    generation: u64,
}

impl PrinterPoolEntry {
    pub fn is_reachable(&self) -> bool {
        self.reachability == Reachability::Reachable
    }
}

/// Pool tuning, taken from [`FleetConfig`]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub default_port: u16,
    pub unreachable_after: u32,
    pub probe_interval: Duration,
    pub max_concurrent_probes: usize,
}

impl From<&FleetConfig> for PoolConfig {
    fn from(config: &FleetConfig) -> Self {
        Self {
            default_port: config.printer_port,
            unreachable_after: config.unreachable_after.max(1),
            probe_interval: config.probe_interval,
            max_concurrent_probes: config.max_concurrent_probes.max(1),
        }
    }
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    entries: RwLock<HashMap<String, PrinterPoolEntry>>,
    probe_gates: DashMap<String, Arc<AsyncMutex<()>>>,
    device_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    probe: Arc<dyn ReachabilityProbe>,
    events: EventBus,
    generation: AtomicU64,
    monitor: Mutex<Option<CancellationToken>>,
}

/// Where a liveness observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observation {
    Probe,
    Delivery,
}

#[derive(Clone)]
pub struct PrinterPool {
    inner: Arc<PoolInner>,
}

impl PrinterPool {
    pub fn new(config: &FleetConfig, events: EventBus) -> Self {
        let probe = Arc::new(TcpProbe::new(config.probe_timeout));
        Self::with_probe(PoolConfig::from(config), events, probe)
    }

    pub fn with_probe(
        config: PoolConfig,
        events: EventBus,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                entries: RwLock::new(HashMap::new()),
                probe_gates: DashMap::new(),
                device_locks: DashMap::new(),
                probe,
                events,
                generation: AtomicU64::new(0),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Register a printer, replacing any entry for the same ip
    ///
    /// A replaced entry starts over as `Unknown`; results of probes issued
    /// for the old entry are discarded.
    #[instrument(skip(self, config), fields(ip = %config.ip))]
    pub fn add(&self, config: PrinterConfig) -> FleetResult<()> {
        let ip = config.ip.trim().to_string();
        if ip.is_empty() || ip.contains(char::is_whitespace) {
            return Err(FleetError::invalid(format!("invalid printer ip {:?}", config.ip)));
        }
        let port = config.port.unwrap_or(self.inner.config.default_port);
        if port == 0 {
            return Err(FleetError::invalid(format!("invalid port for printer {}", ip)));
        }

        let entry = PrinterPoolEntry {
            ip: ip.clone(),
            port,
            name: config.name,
            model: config.model,
            reachability: Reachability::Unknown,
            notified: false,
            consecutive_failures: 0,
            last_checked: None,
            generation: self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1,
        };
        if self.inner.entries.write().insert(ip.clone(), entry).is_some() {
            info!("Printer replaced");
        } else {
            info!(port, "Printer added");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn remove(&self, ip: &str) -> FleetResult<PrinterPoolEntry> {
        let removed = self.inner.entries.write().remove(ip);
        match removed {
            Some(entry) => {
                self.inner
                    .probe_gates
                    .remove_if(ip, |_, gate| Arc::strong_count(gate) == 1);
                self.release_device(ip);
                info!("Printer removed");
                Ok(entry)
            }
            None => Err(FleetError::NotFound(format!("printer {}", ip))),
        }
    }

    pub fn get(&self, ip: &str) -> Option<PrinterPoolEntry> {
        self.inner.entries.read().get(ip).cloned()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.inner.entries.read().contains_key(ip)
    }

    /// Snapshot of all entries, ordered by ip
    pub fn status(&self) -> Vec<PrinterPoolEntry> {
        let mut entries: Vec<_> = self.inner.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.ip.cmp(&b.ip));
        entries
    }

    /// Port to use for `ip`, falling back to the default for unknown ips
    pub fn port_for(&self, ip: &str) -> u16 {
        self.get(ip)
            .map(|e| e.port)
            .unwrap_or(self.inner.config.default_port)
    }

    pub fn name_for(&self, ip: &str) -> Option<String> {
        self.inner.entries.read().get(ip).and_then(|e| e.name.clone())
    }

    /// Last known reachability; `None` for ips not in the pool
    pub fn reachability(&self, ip: &str) -> Option<Reachability> {
        self.inner.entries.read().get(ip).map(|e| e.reachability)
    }

    /// Probe `ip` now, outside the periodic schedule
    ///
    /// Waits for any probe already running for the ip. Ips not in the pool
    /// are probed on the default port and nothing is recorded.
    #[instrument(skip(self))]
    pub async fn check_reachable(&self, ip: &str) -> bool {
        let Some((port, generation)) = self.target(ip) else {
            return self.inner.probe.probe(ip, self.inner.config.default_port).await;
        };

        let gate = self.probe_gate(ip);
        let _guard = gate.lock().await;
        let ok = self.inner.probe.probe(ip, port).await;
        self.apply_probe(ip, generation, ok, Observation::Probe, None);
        ok
    }

    /// Force a fresh probe of a registered printer
    ///
    /// On success the entry is reachable and its notified flag is clear, so
    /// the next outage is reported again.
    #[instrument(skip(self))]
    pub async fn retry_connection(&self, ip: &str) -> FleetResult<bool> {
        if !self.contains(ip) {
            return Err(FleetError::NotFound(format!("printer {}", ip)));
        }
        let ok = self.check_reachable(ip).await;
        if ok {
            info!("Printer connection restored");
        } else {
            warn!("Printer still unreachable");
        }
        Ok(ok)
    }

    /// Feed the outcome of a job delivery into liveness
    pub(crate) fn observe_delivery(&self, ip: &str, ok: bool) {
        if let Some((_, generation)) = self.target(ip) {
            self.apply_probe(ip, generation, ok, Observation::Delivery, None);
        }
    }

    /// Exclusive access to the printer for one delivery
    pub async fn lock_device(&self, ip: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .device_locks
            .entry(ip.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the device lock of an ip that is not in the pool and not in use
    pub(crate) fn release_device(&self, ip: &str) {
        if self.contains(ip) {
            return;
        }
        self.inner
            .device_locks
            .remove_if(ip, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn probe_gate(&self, ip: &str) -> Arc<AsyncMutex<()>> {
        self.inner
            .probe_gates
            .entry(ip.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn target(&self, ip: &str) -> Option<(u16, u64)> {
        self.inner
            .entries
            .read()
            .get(ip)
            .map(|e| (e.port, e.generation))
    }

    /// Apply one liveness observation
    ///
    /// Dropped when the entry was removed or replaced since the observation
    /// started, or when `monitor` is given and has been cancelled.
    fn apply_probe(
        &self,
        ip: &str,
        generation: u64,
        ok: bool,
        origin: Observation,
        monitor: Option<&CancellationToken>,
    ) {
        let mut entries = self.inner.entries.write();
        if monitor.is_some_and(|token| token.is_cancelled()) {
            debug!(ip, "Monitor stopped, probe result dropped");
            return;
        }
        let Some(entry) = entries.get_mut(ip) else {
            return;
        };
        if entry.generation != generation {
            debug!(ip, "Entry replaced, probe result dropped");
            return;
        }

        if origin == Observation::Probe {
            entry.last_checked = Some(Utc::now());
        }

        if ok {
            entry.consecutive_failures = 0;
            if entry.reachability != Reachability::Reachable {
                entry.reachability = Reachability::Reachable;
                entry.notified = false;
                info!(ip, "Printer reachable");
                self.inner.events.publish(PrinterEvent::Reachable { ip: ip.to_string() });
            }
            return;
        }

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        if entry.consecutive_failures >= self.inner.config.unreachable_after
            && entry.reachability != Reachability::Unreachable
        {
            entry.reachability = Reachability::Unreachable;
            self.send_printer_unreachable_event_once(entry);
        }
    }

    fn send_printer_unreachable_event_once(&self, entry: &mut PrinterPoolEntry) {
        if entry.notified {
            return;
        }
        entry.notified = true;
        warn!(
            ip = %entry.ip,
            failures = entry.consecutive_failures,
            "Printer unreachable"
        );
        self.inner.events.publish(PrinterEvent::Unreachable {
            ip: entry.ip.clone(),
        });
    }
}

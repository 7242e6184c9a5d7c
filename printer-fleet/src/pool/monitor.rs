//! Periodic reachability monitor
//!
//! One tick probes every entry concurrently. A printer whose previous probe
//! is still running is skipped for that tick, so one hung printer never
//! holds up the others.

use super::{Observation, PoolInner, PrinterPool};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

impl PrinterPool {
    /// Start the monitor; returns false if it was already running
    pub fn start_periodic_reachability_check(&self) -> bool {
        let mut monitor = self.inner.monitor.lock();
        if monitor.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *monitor = Some(token.clone());
        drop(monitor);

        info!(
            interval_ms = self.inner.config.probe_interval.as_millis() as u64,
            "Reachability monitor started"
        );
        tokio::spawn(run(Arc::downgrade(&self.inner), token));
        true
    }

    /// Stop the monitor; returns false if it was not running
    ///
    /// Probes already issued may still finish, but their results are
    /// dropped once this returns.
    pub fn stop_periodic_reachability_check(&self) -> bool {
        let Some(token) = self.inner.monitor.lock().take() else {
            return false;
        };
        token.cancel();
        // wait out any result being applied right now
        drop(self.inner.entries.write());
        info!("Reachability monitor stopped");
        true
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitor.lock().is_some()
    }

    /// Launch one round of probes without waiting for them
    fn probe_all(&self, token: &CancellationToken, permits: &Arc<Semaphore>) {
        let targets: Vec<(String, u16, u64)> = self
            .inner
            .entries
            .read()
            .values()
            .map(|e| (e.ip.clone(), e.port, e.generation))
            .collect();

        for (ip, port, generation) in targets {
            let Ok(guard) = self.probe_gate(&ip).try_lock_owned() else {
                debug!(ip = %ip, "Probe still running, skipped");
                continue;
            };
            let pool = self.clone();
            let token = token.clone();
            let permits = permits.clone();

            tokio::spawn(async move {
                let _guard = guard;
                let _permit = tokio::select! {
                    _ = token.cancelled() => return,
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                if token.is_cancelled() {
                    return;
                }
                let ok = pool.inner.probe.probe(&ip, port).await;
                pool.apply_probe(&ip, generation, ok, Observation::Probe, Some(&token));
            });
        }
    }
}

async fn run(inner: Weak<PoolInner>, token: CancellationToken) {
    let (period, max_concurrent) = match inner.upgrade() {
        Some(inner) => (
            inner.config.probe_interval,
            inner.config.max_concurrent_probes,
        ),
        None => return,
    };
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                // pool dropped without stop
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                PrinterPool { inner }.probe_all(&token, &permits);
            }
        }
    }
    debug!("Reachability monitor loop exited");
}

#[cfg(test)]
mod tests {
    use super::super::{PoolConfig, PrinterConfig, Reachability, ReachabilityProbe};
    use super::*;
    use crate::events::{EventBus, PrinterEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// "hung" never answers within a test; everything else follows `up`
    struct FlakyProbe {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReachabilityProbe for FlakyProbe {
        async fn probe(&self, ip: &str, _port: u16) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ip == "hung" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.up.load(Ordering::SeqCst)
        }
    }

    fn setup(up: bool) -> (PrinterPool, Arc<FlakyProbe>) {
        let probe = Arc::new(FlakyProbe {
            up: AtomicBool::new(up),
            calls: AtomicUsize::new(0),
        });
        let config = PoolConfig {
            default_port: 9100,
            unreachable_after: 1,
            probe_interval: Duration::from_millis(20),
            max_concurrent_probes: 2,
        };
        let pool = PrinterPool::with_probe(config, EventBus::new(), probe.clone());
        (pool, probe)
    }

    async fn wait_for(pool: &PrinterPool, ip: &str, want: Reachability) {
        for _ in 0..200 {
            if pool.reachability(ip) == Some(want) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never became {:?}", ip, want);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (pool, _) = setup(true);
        assert!(pool.start_periodic_reachability_check());
        assert!(!pool.start_periodic_reachability_check());
        assert!(pool.is_monitoring());
        assert!(pool.stop_periodic_reachability_check());
        assert!(!pool.stop_periodic_reachability_check());
        assert!(!pool.is_monitoring());
    }

    #[tokio::test]
    async fn test_monitor_tracks_transitions() {
        let (pool, probe) = setup(true);
        let mut rx = pool.events().subscribe();
        pool.add(PrinterConfig::new("10.1.0.1")).unwrap();
        pool.start_periodic_reachability_check();

        wait_for(&pool, "10.1.0.1", Reachability::Reachable).await;
        probe.up.store(false, Ordering::SeqCst);
        wait_for(&pool, "10.1.0.1", Reachability::Unreachable).await;
        // several more failing ticks
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.stop_periodic_reachability_check();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                PrinterEvent::Reachable { ip: "10.1.0.1".into() },
                PrinterEvent::Unreachable { ip: "10.1.0.1".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_hung_probe_does_not_block_others() {
        let (pool, probe) = setup(true);
        pool.add(PrinterConfig::new("hung")).unwrap();
        pool.add(PrinterConfig::new("10.1.0.2")).unwrap();
        pool.start_periodic_reachability_check();

        wait_for(&pool, "10.1.0.2", Reachability::Reachable).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.stop_periodic_reachability_check();

        assert_eq!(pool.reachability("hung"), Some(Reachability::Unknown));
        // the hung printer was probed once, later ticks skipped it
        let calls = probe.calls.load(Ordering::SeqCst);
        assert!(calls >= 3, "calls = {}", calls);
    }

    #[tokio::test]
    async fn test_results_after_stop_are_dropped() {
        let (pool, probe) = setup(false);
        pool.add(PrinterConfig::new("10.1.0.3")).unwrap();
        pool.start_periodic_reachability_check();
        wait_for(&pool, "10.1.0.3", Reachability::Unreachable).await;
        pool.stop_periodic_reachability_check();

        probe.up.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.reachability("10.1.0.3"), Some(Reachability::Unreachable));
    }
}

//! Job Queue Manager
//!
//! Owns the pending-job table. Every mutation goes to the store before the
//! table lock is released, so the store never lags behind memory.
//!
//! Deliveries hold the pool's device lock for the target ip. Automatic
//! retries for an ip hold it for the whole batch and go in `seq` order,
//! stopping at the first failure, so queued jobs print first-in first-out.

use super::storage::JobStore;
use super::types::{
    PendingJobSummary, PrinterJob, SubmitOutcome, default_printer_name, generate_job_id,
};
use crate::config::{FleetConfig, RetentionPolicy};
use crate::error::{FleetError, FleetResult};
use crate::events::{EventBus, PrinterEvent};
use crate::pool::{PrinterPool, Reachability};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thermal_printer::{Encoder, NetworkPrinter, PrintItem, PrintResult, Printer};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

struct JobsInner {
    jobs: Mutex<HashMap<String, PrinterJob>>,
    /// Jobs with a delivery on the wire
    in_flight: Mutex<HashSet<String>>,
    next_seq: AtomicU64,
    store: Arc<dyn JobStore>,
    pool: PrinterPool,
    events: EventBus,
    encoder: Encoder,
    retention: RetentionPolicy,
    connect_timeout: Duration,
    io_timeout: Duration,
    listener: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<JobsInner>,
}

/// Marks a job in flight until dropped
struct InFlight {
    inner: Arc<JobsInner>,
    job_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.job_id);
    }
}

impl JobManager {
    /// Create the manager and load every stored job
    pub fn open(
        config: &FleetConfig,
        pool: PrinterPool,
        store: Arc<dyn JobStore>,
    ) -> FleetResult<Self> {
        let stored = store.load_all()?;
        let next_seq = stored.iter().map(|j| j.seq).max().map_or(1, |s| s + 1);
        let pending = stored.iter().filter(|j| j.pending).count();
        let jobs: HashMap<String, PrinterJob> = stored
            .into_iter()
            .map(|j| (j.job_id.clone(), j))
            .collect();
        info!(jobs = jobs.len(), pending, "Job queue loaded");

        Ok(Self {
            inner: Arc::new(JobsInner {
                jobs: Mutex::new(jobs),
                in_flight: Mutex::new(HashSet::new()),
                next_seq: AtomicU64::new(next_seq),
                store,
                events: pool.events().clone(),
                pool,
                encoder: Encoder::new(config.encoder_config()),
                retention: config.retention,
                connect_timeout: config.connect_timeout,
                io_timeout: config.io_timeout,
                listener: Mutex::new(None),
            }),
        })
    }

    pub fn encoder(&self) -> &Encoder {
        &self.inner.encoder
    }

    /// Queue a job without trying to print it
    ///
    /// The content is encoded first, so a malformed document is rejected
    /// before anything is stored. A supplied `job_id` must be unused.
    #[instrument(skip(self, content, metadata), fields(items = content.len()))]
    pub fn enqueue(
        &self,
        ip: &str,
        content: Vec<PrintItem>,
        metadata: impl Into<String>,
        job_id: Option<String>,
    ) -> FleetResult<PrinterJob> {
        check_ip(ip)?;
        self.inner.encoder.encode(&content)?;
        self.insert_job(ip, content, metadata.into(), job_id, true)
    }

    /// Print now if the printer can take it, otherwise queue
    ///
    /// A printer the pool knows to be unreachable is not tried. A failed
    /// delivery queues the job and reports the failure to the pool.
    #[instrument(skip(self, content, metadata), fields(items = content.len()))]
    pub async fn submit(
        &self,
        ip: &str,
        content: Vec<PrintItem>,
        metadata: impl Into<String>,
    ) -> FleetResult<SubmitOutcome> {
        check_ip(ip)?;
        let data = self.inner.encoder.encode(&content)?;
        let metadata = metadata.into();
        let job_id = generate_job_id();

        if self.inner.pool.reachability(ip) == Some(Reachability::Unreachable) {
            info!(job_id = %job_id, "Printer unreachable, job queued");
            let job = self.insert_job(ip, content, metadata, Some(job_id), true)?;
            return Ok(SubmitOutcome::Queued(job));
        }

        let result = {
            let _device = self.inner.pool.lock_device(ip).await;
            self.send(ip, &data).await
        };
        self.inner.pool.release_device(ip);

        match result {
            Ok(()) => {
                if self.inner.retention == RetentionPolicy::KeepDelivered {
                    self.insert_job(ip, content, metadata, Some(job_id.clone()), false)?;
                }
                self.inner.events.publish(PrinterEvent::JobDelivered {
                    job_id: job_id.clone(),
                    ip: ip.to_string(),
                });
                Ok(SubmitOutcome::Delivered { job_id })
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Delivery failed, job queued");
                let mut job = PrinterJob {
                    attempts: 1,
                    last_error: Some(e.to_string()),
                    ..self.new_job(ip, content, metadata, job_id, true)
                };
                self.store_new(&mut job)?;
                self.inner.events.publish(PrinterEvent::JobFailed {
                    job_id: job.job_id.clone(),
                    ip: ip.to_string(),
                    reason: e.to_string(),
                });
                Ok(SubmitOutcome::Queued(job))
            }
        }
    }

    /// Point a pending job at another printer and try to print it there
    ///
    /// The new target is kept even when the attempt fails; the content is
    /// never touched. A job already being delivered is left as it is and
    /// `Ok(false)` is returned. Returns whether the job printed.
    #[instrument(skip(self))]
    pub async fn retry_from_new_printer(&self, job_id: &str, new_ip: &str) -> FleetResult<bool> {
        check_ip(new_ip)?;
        let Some(_flight) = self.begin_flight(job_id) else {
            if !self.inner.jobs.lock().contains_key(job_id) {
                return Err(FleetError::NotFound(format!("job {}", job_id)));
            }
            warn!("Job is already being delivered");
            return Ok(false);
        };
        let content = {
            let mut jobs = self.inner.jobs.lock();
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| FleetError::NotFound(format!("job {}", job_id)))?;
            if !job.pending {
                return Err(FleetError::invalid(format!("job {} was already delivered", job_id)));
            }
            if job.target_printer_ip != new_ip {
                job.target_printer_ip = new_ip.to_string();
                job.printer_name = self.printer_name(new_ip);
                self.inner.store.put(job)?;
                info!("Job retargeted");
            }
            job.job_content.clone()
        };

        let data = self.inner.encoder.encode(&content)?;
        let result = {
            let _device = self.inner.pool.lock_device(new_ip).await;
            self.send(new_ip, &data).await
        };
        self.inner.pool.release_device(new_ip);
        self.finish(job_id, new_ip, result)
    }

    /// Remove the job with exactly this id; returns how many were removed
    #[instrument(skip(self))]
    pub fn delete_jobs(&self, job_id: &str) -> FleetResult<usize> {
        let mut jobs = self.inner.jobs.lock();
        if !jobs.contains_key(job_id) {
            return Err(FleetError::NotFound(format!("job {}", job_id)));
        }
        self.inner.store.delete(job_id)?;
        jobs.remove(job_id);
        info!("Job deleted");
        Ok(1)
    }

    /// Pending jobs in queue order
    pub fn pending_job_details(&self) -> Vec<PendingJobSummary> {
        let jobs = self.inner.jobs.lock();
        let mut pending: Vec<&PrinterJob> = jobs.values().filter(|j| j.pending).collect();
        pending.sort_by_key(|j| j.seq);
        pending.into_iter().map(PrinterJob::summary).collect()
    }

    pub fn get(&self, job_id: &str) -> Option<PrinterJob> {
        self.inner.jobs.lock().get(job_id).cloned()
    }

    /// Every known job, delivered ones included, in queue order
    pub fn jobs(&self) -> Vec<PrinterJob> {
        let mut jobs: Vec<PrinterJob> = self.inner.jobs.lock().values().cloned().collect();
        jobs.sort_by_key(|j| j.seq);
        jobs
    }

    /// Move every pending job for `old_ip` to `new_ip`
    ///
    /// Jobs being delivered right now are left alone. Returns whether any
    /// job changed.
    #[instrument(skip(self))]
    pub fn update_jobs_for_printer(&self, old_ip: &str, new_ip: &str) -> FleetResult<bool> {
        check_ip(new_ip)?;
        if old_ip == new_ip {
            return Ok(false);
        }
        let name = self.printer_name(new_ip);
        let mut jobs = self.inner.jobs.lock();
        let in_flight = self.inner.in_flight.lock();
        let mut updated = 0;
        let mut skipped = 0;
        for job in jobs
            .values_mut()
            .filter(|j| j.pending && j.target_printer_ip == old_ip)
        {
            if in_flight.contains(&job.job_id) {
                skipped += 1;
                continue;
            }
            job.target_printer_ip = new_ip.to_string();
            job.printer_name = name.clone();
            self.inner.store.put(job)?;
            updated += 1;
        }
        if updated > 0 || skipped > 0 {
            info!(updated, skipped, "Jobs retargeted");
        }
        Ok(updated > 0)
    }

    /// Deliver the pending jobs for `ip` oldest first
    ///
    /// Stops at the first failure so later jobs never overtake it. Returns
    /// how many jobs printed.
    #[instrument(skip(self))]
    pub async fn retry_pending_for(&self, ip: &str) -> FleetResult<usize> {
        let result = self.deliver_queue(ip).await;
        self.inner.pool.release_device(ip);
        result
    }

    async fn deliver_queue(&self, ip: &str) -> FleetResult<usize> {
        let _device = self.inner.pool.lock_device(ip).await;

        let queue: Vec<String> = {
            let jobs = self.inner.jobs.lock();
            let mut queue: Vec<&PrinterJob> = jobs
                .values()
                .filter(|j| j.pending && j.target_printer_ip == ip)
                .collect();
            queue.sort_by_key(|j| j.seq);
            queue.into_iter().map(|j| j.job_id.clone()).collect()
        };
        if queue.is_empty() {
            return Ok(0);
        }
        info!(jobs = queue.len(), "Retrying pending jobs");

        let mut delivered = 0;
        for job_id in queue {
            let Some(_flight) = self.begin_flight(&job_id) else {
                // an explicit retry has it; do not let later jobs overtake
                break;
            };
            // deleted, retargeted or delivered meanwhile
            let content = match self.get(&job_id) {
                Some(job) if job.pending && job.target_printer_ip == ip => job.job_content,
                _ => continue,
            };
            let data = self.inner.encoder.encode(&content)?;
            let result = self.send(ip, &data).await;
            if self.finish(&job_id, ip, result)? {
                delivered += 1;
            } else {
                break;
            }
        }
        Ok(delivered)
    }

    /// Run [`retry_pending_for`](Self::retry_pending_for) for every printer
    /// with pending jobs, printers in parallel
    ///
    /// Printers the pool reports unreachable are skipped. Returns how many
    /// jobs printed in total.
    pub async fn retry_all_pending(&self) -> usize {
        let mut ips: Vec<String> = {
            let jobs = self.inner.jobs.lock();
            jobs.values()
                .filter(|j| j.pending)
                .map(|j| j.target_printer_ip.clone())
                .collect()
        };
        ips.sort();
        ips.dedup();
        ips.retain(|ip| self.inner.pool.reachability(ip) != Some(Reachability::Unreachable));

        let results = join_all(ips.iter().map(|ip| self.retry_pending_for(ip))).await;
        ips.iter()
            .zip(results)
            .map(|(ip, result)| match result {
                Ok(n) => n,
                Err(e) => {
                    error!(ip = %ip, error = %e, "Pending job retry failed");
                    0
                }
            })
            .sum()
    }

    /// Retry an ip's queue whenever the pool reports it reachable
    ///
    /// Returns false if the listener was already running.
    pub fn start_retry_listener(&self) -> bool {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *listener = Some(token.clone());
        drop(listener);

        let rx = self.inner.events.subscribe();
        tokio::spawn(run_listener(Arc::downgrade(&self.inner), rx, token));
        info!("Job retry listener started");
        true
    }

    pub fn stop_retry_listener(&self) -> bool {
        match self.inner.listener.lock().take() {
            Some(token) => {
                token.cancel();
                info!("Job retry listener stopped");
                true
            }
            None => false,
        }
    }

    fn new_job(
        &self,
        ip: &str,
        content: Vec<PrintItem>,
        metadata: String,
        job_id: String,
        pending: bool,
    ) -> PrinterJob {
        let now = Utc::now();
        PrinterJob {
            job_id,
            target_printer_ip: ip.to_string(),
            printer_name: self.printer_name(ip),
            job_content: content,
            metadata,
            pending,
            created_at: now,
            seq: 0,
            attempts: 0,
            last_error: None,
            delivered_at: (!pending).then_some(now),
        }
    }

    fn insert_job(
        &self,
        ip: &str,
        content: Vec<PrintItem>,
        metadata: String,
        job_id: Option<String>,
        pending: bool,
    ) -> FleetResult<PrinterJob> {
        let job_id = match job_id {
            Some(id) if id.trim().is_empty() => {
                return Err(FleetError::invalid("job id is empty"));
            }
            Some(id) => id,
            None => generate_job_id(),
        };
        let mut job = self.new_job(ip, content, metadata, job_id, pending);
        self.store_new(&mut job)?;
        if pending {
            self.inner.events.publish(PrinterEvent::JobQueued {
                job_id: job.job_id.clone(),
                ip: ip.to_string(),
            });
        }
        Ok(job)
    }

    /// Assign a queue position and persist a job that must not exist yet
    fn store_new(&self, job: &mut PrinterJob) -> FleetResult<()> {
        let mut jobs = self.inner.jobs.lock();
        if jobs.contains_key(&job.job_id) {
            return Err(FleetError::invalid(format!("job id {} already exists", job.job_id)));
        }
        job.seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.store.put(job)?;
        jobs.insert(job.job_id.clone(), job.clone());
        debug!(job_id = %job.job_id, seq = job.seq, pending = job.pending, "Job stored");
        Ok(())
    }

    fn printer_name(&self, ip: &str) -> String {
        self.inner
            .pool
            .name_for(ip)
            .unwrap_or_else(|| default_printer_name(ip))
    }

    fn begin_flight(&self, job_id: &str) -> Option<InFlight> {
        if !self.inner.in_flight.lock().insert(job_id.to_string()) {
            return None;
        }
        Some(InFlight {
            inner: self.inner.clone(),
            job_id: job_id.to_string(),
        })
    }

    /// One connect-write-disconnect; caller holds the device lock
    async fn send(&self, ip: &str, data: &[u8]) -> PrintResult<()> {
        let port = self.inner.pool.port_for(ip);
        let printer = NetworkPrinter::new(ip, port)?
            .with_timeouts(self.inner.connect_timeout, self.inner.io_timeout);
        let result = printer.print(data).await;
        match &result {
            Ok(()) => self.inner.pool.observe_delivery(ip, true),
            Err(e) if e.is_transport() => self.inner.pool.observe_delivery(ip, false),
            Err(_) => {}
        }
        result
    }

    /// Record a delivery attempt for a job that was sent to `ip`
    ///
    /// A job that printed is settled wherever it points now. A failure is
    /// only recorded while the job still targets `ip`.
    fn finish(&self, job_id: &str, ip: &str, result: PrintResult<()>) -> FleetResult<bool> {
        let delivered = result.is_ok();
        let event = {
            let mut jobs = self.inner.jobs.lock();
            let Some(job) = jobs
                .get_mut(job_id)
                .filter(|j| j.pending && (delivered || j.target_printer_ip == ip))
            else {
                debug!(job_id, ip, "Job changed during delivery, outcome dropped");
                return Ok(delivered);
            };
            job.attempts += 1;

            match result {
                Ok(()) => {
                    match self.inner.retention {
                        RetentionPolicy::Delete => {
                            self.inner.store.delete(job_id)?;
                            jobs.remove(job_id);
                        }
                        RetentionPolicy::KeepDelivered => {
                            job.pending = false;
                            job.last_error = None;
                            job.delivered_at = Some(Utc::now());
                            self.inner.store.put(job)?;
                        }
                    }
                    info!(job_id, ip, "Job delivered");
                    PrinterEvent::JobDelivered {
                        job_id: job_id.to_string(),
                        ip: ip.to_string(),
                    }
                }
                Err(e) => {
                    warn!(job_id, ip, error = %e, "Job delivery failed");
                    job.last_error = Some(e.to_string());
                    self.inner.store.put(job)?;
                    PrinterEvent::JobFailed {
                        job_id: job_id.to_string(),
                        ip: ip.to_string(),
                        reason: e.to_string(),
                    }
                }
            }
        };
        self.inner.events.publish(event);
        Ok(delivered)
    }
}

fn check_ip(ip: &str) -> FleetResult<()> {
    if ip.trim().is_empty() || ip.contains(char::is_whitespace) {
        return Err(FleetError::invalid(format!("invalid printer ip {:?}", ip)));
    }
    Ok(())
}

async fn run_listener(
    inner: Weak<JobsInner>,
    mut rx: tokio::sync::broadcast::Receiver<PrinterEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = rx.recv() => {
                let ip = match event {
                    Ok(PrinterEvent::Reachable { ip }) => ip,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Job retry listener lagged behind events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let manager = JobManager { inner };
                let token = token.clone();
                tokio::spawn(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    match manager.retry_pending_for(&ip).await {
                        Ok(0) => {}
                        Ok(n) => info!(ip = %ip, delivered = n, "Pending jobs delivered"),
                        Err(e) => error!(ip = %ip, error = %e, "Pending job retry failed"),
                    }
                });
            }
        }
    }
    debug!("Job retry listener exited");
}

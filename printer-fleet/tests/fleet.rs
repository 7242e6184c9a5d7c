// printer-fleet/tests/fleet.rs
// Pool + job queue against loopback "printers"

use async_trait::async_trait;
use printer_fleet::{
    EventBus, FleetConfig, MemoryJobStore, PoolConfig, PrinterConfig, PrinterEvent, PrinterFleet,
    PrinterPool, Reachability, ReachabilityProbe, RetentionPolicy, SubmitOutcome,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thermal_printer::{Alignment, PrintItem, Raster, encode};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};

const UP: &str = "127.0.0.1";
const DOWN: &str = "127.0.0.2";

/// Accepts sessions one at a time and reports what each one sent
struct FakePrinter {
    port: u16,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl FakePrinter {
    async fn start() -> Self {
        let listener = TcpListener::bind((UP, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut received = Vec::new();
                let _ = socket.read_to_end(&mut received).await;
                if tx.send(received).is_err() {
                    break;
                }
            }
        });
        Self { port, rx }
    }

    async fn next(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("printer received nothing")
            .unwrap()
    }
}

/// Does not read a session until released, so the sender stays blocked
struct HeldPrinter {
    port: u16,
    accepted: mpsc::UnboundedReceiver<()>,
    release: Arc<Notify>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl HeldPrinter {
    async fn start() -> Self {
        let listener = TcpListener::bind((UP, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (accepted_tx, accepted) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = accepted_tx.send(());
                gate.notified().await;
                let mut received = Vec::new();
                let _ = socket.read_to_end(&mut received).await;
                if tx.send(received).is_err() {
                    break;
                }
            }
        });
        Self {
            port,
            accepted,
            release,
            rx,
        }
    }

    async fn wait_accepted(&mut self) {
        tokio::time::timeout(Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("no session opened")
            .unwrap();
    }

    async fn release_next(&mut self) -> Vec<u8> {
        self.release.notify_one();
        tokio::time::timeout(Duration::from_secs(10), self.rx.recv())
            .await
            .expect("printer received nothing")
            .unwrap()
    }
}

/// Open sessions, current and highest seen
#[derive(Default)]
struct Gauge {
    open: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Holds every session open for a while before reading it
///
/// A session counts as open from accept until reading starts. A sender
/// with a payload larger than the socket buffers cannot finish before
/// that, so two open sessions mean two deliveries on the wire at once.
async fn slow_printer(ip: &str, own: Arc<Gauge>, all: Arc<Gauge>) -> u16 {
    let listener = TcpListener::bind((ip, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let own = own.clone();
            let all = all.clone();
            tokio::spawn(async move {
                own.enter();
                all.enter();
                tokio::time::sleep(Duration::from_millis(500)).await;
                own.leave();
                all.leave();
                let mut received = Vec::new();
                let _ = socket.read_to_end(&mut received).await;
            });
        }
    });
    port
}

/// Far larger than loopback socket buffers
fn bulky_receipt() -> Vec<PrintItem> {
    vec![
        PrintItem::image(Raster::blank(576, 300_000), Alignment::Left),
        PrintItem::cut(),
    ]
}

fn patient_config() -> FleetConfig {
    FleetConfig {
        io_timeout: Duration::from_secs(10),
        ..FleetConfig::for_tests()
    }
}

/// A port nobody listens on
async fn closed_port(ip: &str) -> u16 {
    let listener = TcpListener::bind((ip, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

fn fleet(config: FleetConfig) -> PrinterFleet {
    PrinterFleet::new(config, Arc::new(MemoryJobStore::new())).unwrap()
}

fn receipt(line: &str) -> Vec<PrintItem> {
    vec![PrintItem::text(line), PrintItem::feed(2), PrintItem::cut()]
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<PrinterEvent>) -> Vec<PrinterEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_submit_delivers_to_live_printer() {
    let mut printer = FakePrinter::start().await;
    let fleet = fleet(FleetConfig::for_tests());
    fleet
        .pool()
        .add(PrinterConfig::new(UP).with_port(printer.port))
        .unwrap();
    let mut rx = fleet.subscribe();

    let content = receipt("Table 4");
    let outcome = fleet.jobs().submit(UP, content.clone(), "").await.unwrap();
    assert!(outcome.is_delivered());
    assert_eq!(printer.next().await, encode(&content).unwrap());
    assert!(fleet.jobs().pending_job_details().is_empty());

    let events = drain(&mut rx);
    assert!(events.contains(&PrinterEvent::Reachable { ip: UP.into() }));
    assert!(events.contains(&PrinterEvent::JobDelivered {
        job_id: outcome.job_id().to_string(),
        ip: UP.into(),
    }));
}

#[tokio::test]
async fn test_failed_submit_queues_and_moves_to_new_printer() {
    let mut printer = FakePrinter::start().await;
    let fleet = fleet(FleetConfig::for_tests());
    fleet
        .pool()
        .add(PrinterConfig::new(DOWN).with_port(closed_port(DOWN).await))
        .unwrap();
    fleet
        .pool()
        .add(PrinterConfig::new(UP).with_port(printer.port).with_name("Bar"))
        .unwrap();

    let content = receipt("Order 17");
    let outcome = fleet
        .jobs()
        .submit(DOWN, content.clone(), r#"{"order":17}"#)
        .await
        .unwrap();
    let SubmitOutcome::Queued(job) = outcome else {
        panic!("expected queued");
    };
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.is_some());
    assert_eq!(
        fleet.pool().reachability(DOWN),
        Some(Reachability::Unreachable)
    );

    let pending = fleet.jobs().pending_job_details();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].metadata, r#"{"order":17}"#);

    assert!(
        fleet
            .jobs()
            .retry_from_new_printer(&job.job_id, UP)
            .await
            .unwrap()
    );
    assert_eq!(printer.next().await, encode(&content).unwrap());
    assert!(fleet.jobs().pending_job_details().is_empty());
    assert!(fleet.jobs().get(&job.job_id).is_none());
}

#[tokio::test]
async fn test_failed_retry_keeps_new_target() {
    let fleet = fleet(FleetConfig::for_tests());
    fleet
        .pool()
        .add(PrinterConfig::new(DOWN).with_port(closed_port(DOWN).await))
        .unwrap();
    let job = fleet
        .jobs()
        .enqueue(UP, receipt("a"), "", None)
        .unwrap();

    let delivered = fleet
        .jobs()
        .retry_from_new_printer(&job.job_id, DOWN)
        .await
        .unwrap();
    assert!(!delivered);

    let job = fleet.jobs().get(&job.job_id).unwrap();
    assert!(job.pending);
    assert_eq!(job.target_printer_ip, DOWN);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.is_some());
}

#[tokio::test]
async fn test_keep_delivered_retention() {
    let mut printer = FakePrinter::start().await;
    let config = FleetConfig {
        retention: RetentionPolicy::KeepDelivered,
        ..FleetConfig::for_tests()
    };
    let fleet = fleet(config);
    fleet
        .pool()
        .add(PrinterConfig::new(UP).with_port(printer.port))
        .unwrap();

    let job = fleet.jobs().enqueue(DOWN, receipt("a"), "", None).unwrap();
    assert!(
        fleet
            .jobs()
            .retry_from_new_printer(&job.job_id, UP)
            .await
            .unwrap()
    );
    printer.next().await;

    let kept = fleet.jobs().get(&job.job_id).unwrap();
    assert!(!kept.pending);
    assert!(kept.delivered_at.is_some());
    assert!(fleet.jobs().pending_job_details().is_empty());

    let again = fleet.jobs().retry_from_new_printer(&job.job_id, UP).await;
    assert!(again.unwrap_err().is_invalid_argument());

    // delivered jobs are not moved
    assert!(!fleet.jobs().update_jobs_for_printer(UP, DOWN).unwrap());
}

#[tokio::test]
async fn test_retry_all_pending() {
    let mut printer = FakePrinter::start().await;
    let fleet = fleet(FleetConfig::for_tests());
    fleet
        .pool()
        .add(PrinterConfig::new(UP).with_port(printer.port))
        .unwrap();
    let first = receipt("first");
    let second = receipt("second");
    fleet.jobs().enqueue(UP, first.clone(), "", None).unwrap();
    fleet.jobs().enqueue(UP, second.clone(), "", None).unwrap();

    assert_eq!(fleet.jobs().retry_all_pending().await, 2);
    assert_eq!(printer.next().await, encode(&first).unwrap());
    assert_eq!(printer.next().await, encode(&second).unwrap());
}

/// Reachability controlled by the test
struct SwitchProbe {
    up: AtomicBool,
}

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn probe(&self, _ip: &str, _port: u16) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_reachable_printer_gets_queue_in_order() {
    let mut printer = FakePrinter::start().await;
    let config = FleetConfig::for_tests();
    let probe = Arc::new(SwitchProbe {
        up: AtomicBool::new(false),
    });
    let pool = PrinterPool::with_probe(PoolConfig::from(&config), EventBus::new(), probe.clone());
    let fleet =
        PrinterFleet::with_pool(config, pool, Arc::new(MemoryJobStore::new())).unwrap();
    fleet
        .pool()
        .add(PrinterConfig::new(UP).with_port(printer.port))
        .unwrap();
    fleet.start();

    for _ in 0..200 {
        if fleet.pool().reachability(UP) == Some(Reachability::Unreachable) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        fleet.pool().reachability(UP),
        Some(Reachability::Unreachable)
    );

    let receipts: Vec<Vec<PrintItem>> = ["1", "2", "3"].iter().map(|s| receipt(s)).collect();
    for content in &receipts {
        let outcome = fleet.jobs().submit(UP, content.clone(), "").await.unwrap();
        assert!(!outcome.is_delivered());
    }
    assert_eq!(fleet.jobs().pending_job_details().len(), 3);

    probe.up.store(true, Ordering::SeqCst);
    for content in &receipts {
        assert_eq!(printer.next().await, encode(content).unwrap());
    }

    for _ in 0..200 {
        if fleet.jobs().pending_job_details().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(fleet.jobs().pending_job_details().is_empty());
    fleet.close();
}

#[tokio::test]
async fn test_pending_jobs_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = FleetConfig {
        job_db_path: Some(dir.path().join("data").join("jobs.redb")),
        ..FleetConfig::for_tests()
    };

    let (a, b) = {
        let fleet = PrinterFleet::open(config.clone()).unwrap();
        let a = fleet.jobs().enqueue(DOWN, receipt("a"), "m", None).unwrap();
        let b = fleet.jobs().enqueue(DOWN, receipt("b"), "", None).unwrap();
        fleet.jobs().update_jobs_for_printer(DOWN, UP).unwrap();
        (a, b)
    };

    let fleet = PrinterFleet::open(config).unwrap();
    let pending = fleet.jobs().pending_job_details();
    let ids: Vec<&str> = pending.iter().map(|p| p.job_id.as_str()).collect();
    assert_eq!(ids, vec![a.job_id.as_str(), b.job_id.as_str()]);
    assert!(pending.iter().all(|p| p.printer_ip == UP));
    assert_eq!(pending[0].metadata, "m");
    assert_eq!(fleet.jobs().get(&a.job_id).unwrap().job_content, a.job_content);

    assert_eq!(fleet.jobs().delete_jobs(&a.job_id).unwrap(), 1);
    drop(fleet);
    let fleet = PrinterFleet::open(
        FleetConfig {
            job_db_path: Some(dir.path().join("data").join("jobs.redb")),
            ..FleetConfig::for_tests()
        },
    )
    .unwrap();
    assert_eq!(fleet.jobs().pending_job_details().len(), 1);
}

#[tokio::test]
async fn test_job_in_delivery_is_not_moved_or_printed_twice() {
    let mut printer = HeldPrinter::start().await;
    let fleet = fleet(patient_config());
    fleet
        .pool()
        .add(PrinterConfig::new(UP).with_port(printer.port))
        .unwrap();

    let content = bulky_receipt();
    let job = fleet.jobs().enqueue(UP, content.clone(), "", None).unwrap();
    let jobs = fleet.jobs().clone();
    let retry = tokio::spawn(async move { jobs.retry_pending_for(UP).await });

    // the sender is now stuck on a full socket
    printer.wait_accepted().await;
    assert!(!fleet.jobs().update_jobs_for_printer(UP, DOWN).unwrap());
    assert!(
        !fleet
            .jobs()
            .retry_from_new_printer(&job.job_id, DOWN)
            .await
            .unwrap()
    );
    assert_eq!(fleet.jobs().get(&job.job_id).unwrap().target_printer_ip, UP);

    assert_eq!(printer.release_next().await, encode(&content).unwrap());
    assert_eq!(retry.await.unwrap().unwrap(), 1);
    assert!(fleet.jobs().get(&job.job_id).is_none());
    assert!(fleet.jobs().pending_job_details().is_empty());
}

#[tokio::test]
async fn test_one_delivery_at_a_time_per_printer() {
    const OTHER: &str = "127.0.0.3";
    let all = Arc::new(Gauge::default());
    let first = Arc::new(Gauge::default());
    let second = Arc::new(Gauge::default());
    let first_port = slow_printer(UP, first.clone(), all.clone()).await;
    let second_port = slow_printer(OTHER, second.clone(), all.clone()).await;

    let fleet = fleet(patient_config());
    fleet
        .pool()
        .add(PrinterConfig::new(UP).with_port(first_port))
        .unwrap();
    fleet
        .pool()
        .add(PrinterConfig::new(OTHER).with_port(second_port))
        .unwrap();
    let queued = fleet
        .jobs()
        .enqueue(UP, bulky_receipt(), "", None)
        .unwrap();

    let jobs = fleet.jobs();
    let (retried, same, other) = tokio::join!(
        jobs.retry_from_new_printer(&queued.job_id, UP),
        jobs.submit(UP, bulky_receipt(), ""),
        jobs.submit(OTHER, bulky_receipt(), ""),
    );
    assert!(retried.unwrap());
    assert!(same.unwrap().is_delivered());
    assert!(other.unwrap().is_delivered());

    assert_eq!(first.peak(), 1);
    assert_eq!(second.peak(), 1);
    // the two printers were fed side by side
    assert_eq!(all.peak(), 2);
}

//! Fleet events
//!
//! Reachability transitions and job outcomes go out on one broadcast bus.
//! Reachability events for an ip are published in transition order.

use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrinterEvent {
    /// Printer stopped answering (once per transition)
    Unreachable { ip: String },
    /// Printer answers again (once per transition)
    Reachable { ip: String },
    JobDelivered { job_id: String, ip: String },
    JobQueued { job_id: String, ip: String },
    JobFailed {
        job_id: String,
        ip: String,
        reason: String,
    },
}

impl PrinterEvent {
    pub fn ip(&self) -> &str {
        match self {
            PrinterEvent::Unreachable { ip }
            | PrinterEvent::Reachable { ip }
            | PrinterEvent::JobDelivered { ip, .. }
            | PrinterEvent::JobQueued { ip, .. }
            | PrinterEvent::JobFailed { ip, .. } => ip,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PrinterEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.tx.subscribe()
    }

    /// Publish; having no subscriber is fine
    pub fn publish(&self, event: PrinterEvent) {
        tracing::debug!(?event, "printer event");
        let _ = self.tx.send(event);
    }
}

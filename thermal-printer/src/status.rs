//! Real-time printer status
//!
//! The printer answers each DLE EOT n request with one byte. Fixed bits
//! (bit 1 and bit 4 set, bits 0 and 7 clear) identify a status byte; the
//! remaining bits are flags.

use crate::error::PrintError;
use serde::Serialize;

/// Mask/value of the fixed bits every status byte carries
const FIXED_MASK: u8 = 0b1001_0011;
const FIXED_VALUE: u8 = 0b0001_0010;

/// Decoded printer condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrinterStatus {
    pub offline: bool,
    pub error: bool,
    pub cover_open: bool,
    pub cutter_error: bool,
    pub paper_empty: bool,
    pub paper_near_empty: bool,
    pub drawer_open: bool,
}

/// Which DLE EOT request a byte answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusKind {
    Printer = 1,
    Offline = 2,
    Error = 3,
    Paper = 4,
}

impl StatusKind {
    pub const ALL: [StatusKind; 4] = [
        StatusKind::Printer,
        StatusKind::Offline,
        StatusKind::Error,
        StatusKind::Paper,
    ];
}

/// Whether a byte has the shape of a status reply
pub fn is_status_byte(byte: u8) -> bool {
    byte & FIXED_MASK == FIXED_VALUE
}

impl PrinterStatus {
    /// Fold one status reply into the flags
    ///
    /// Returns false and leaves the flags untouched when the byte is not a
    /// status reply.
    pub fn apply(&mut self, kind: StatusKind, byte: u8) -> bool {
        if !is_status_byte(byte) {
            return false;
        }
        let bit = |n: u8| byte & (1 << n) != 0;
        match kind {
            StatusKind::Printer => {
                // drawer kick-out connector pin 3 reads high
                self.drawer_open |= bit(2);
                self.offline |= bit(3);
            }
            StatusKind::Offline => {
                self.cover_open |= bit(2);
                self.paper_empty |= bit(5);
                self.error |= bit(6);
            }
            StatusKind::Error => {
                self.cutter_error |= bit(3);
                self.error |= bit(5) || bit(6);
            }
            StatusKind::Paper => {
                self.paper_near_empty |= bit(2) || bit(3);
                self.paper_empty |= bit(5) || bit(6);
            }
        }
        true
    }

    /// True when the printer can take a job
    pub fn is_ready(&self) -> bool {
        !(self.offline || self.error || self.cover_open || self.cutter_error || self.paper_empty)
    }
}

/// Outcome of a status query
///
/// A failed query still yields a report: the printer is reported offline and
/// the error that caused it travels along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: PrinterStatus,
    pub error: Option<PrintError>,
}

impl StatusReport {
    pub fn ok(status: PrinterStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn failed(error: PrintError) -> Self {
        Self {
            status: PrinterStatus {
                offline: true,
                ..Default::default()
            },
            error: Some(error),
        }
    }
}

//! Error types for the printer library

use thiserror::Error;

/// Printer error types
///
/// Transport variants always carry the printer ip so a caller can tell
/// which device failed and whether it ever connected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrintError {
    /// Malformed document or configuration, rejected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Could not open a session to the printer
    #[error("Connection failed: {ip}: {reason}")]
    ConnectionFailed { ip: String, reason: String },

    /// Session was open but sending failed
    #[error("Write failed: {ip}: {reason}")]
    WriteFailed { ip: String, reason: String },

    /// Session was open but receiving failed
    #[error("Read failed: {ip}: {reason}")]
    ReadFailed { ip: String, reason: String },

    /// A network operation exceeded its bound
    #[error("Timeout: {operation} on {ip}")]
    Timeout { ip: String, operation: &'static str },

    /// Unknown printer or job
    #[error("Not found: {0}")]
    NotFound(String),
}

impl PrintError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True for errors raised by the socket layer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::WriteFailed { .. }
                | Self::ReadFailed { .. }
                | Self::Timeout { .. }
        )
    }

    /// True when the printer could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }
}

/// Result type for printer operations
pub type PrintResult<T> = Result<T, PrintError>;

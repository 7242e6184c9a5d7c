//! Raw socket sessions to network printers
//!
//! Most thermal printers accept raw ESC/POS on TCP port 9100.
//! [`PrinterConnection`] is the session state machine; [`NetworkPrinter`]
//! is the one-shot "connect, send, disconnect" adapter used for jobs.

use crate::error::{PrintError, PrintResult};
use crate::escpos::status_request_command;
use crate::status::{PrinterStatus, StatusKind, StatusReport};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_PORT: u16 = 9100;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Session state
///
/// `Disconnected -> Connecting -> Connected -> (Writing | Reading) -> Connected`,
/// with `Failed` reachable from any step. A failed session must be
/// reconnected before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Writing,
    Reading,
    Failed,
}

/// One TCP session to one printer
#[derive(Debug)]
pub struct PrinterConnection {
    ip: String,
    port: u16,
    state: ConnectionState,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl Default for PrinterConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl PrinterConnection {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT)
    }

    pub fn with_timeouts(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            ip: String::new(),
            port: DEFAULT_PORT,
            state: ConnectionState::Disconnected,
            stream: None,
            connect_timeout,
            io_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Open the session
    ///
    /// Connecting to the address the session is already connected to is a
    /// no-op; any other open session is closed first.
    #[instrument(skip(self), fields(timeout_ms = self.connect_timeout.as_millis() as u64))]
    pub async fn connect(&mut self, ip: &str, port: u16) -> PrintResult<()> {
        if self.is_connected() && self.ip == ip && self.port == port {
            return Ok(());
        }
        self.disconnect().await;

        self.ip = ip.to_string();
        self.port = port;
        self.state = ConnectionState::Connecting;
        debug!("Connecting to printer");

        let result = timeout(self.connect_timeout, TcpStream::connect((ip, port))).await;
        match result {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                info!("Connected");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = ConnectionState::Failed;
                warn!(error = %e, "Connect failed");
                Err(PrintError::ConnectionFailed {
                    ip: ip.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.state = ConnectionState::Failed;
                warn!("Connect timed out");
                Err(PrintError::ConnectionFailed {
                    ip: ip.to_string(),
                    reason: format!(
                        "no answer within {}ms",
                        self.connect_timeout.as_millis()
                    ),
                })
            }
        }
    }

    /// Send bytes; the session stays connected on success
    #[instrument(skip(self, data), fields(ip = %self.ip, data_len = data.len()))]
    pub async fn write(&mut self, data: &[u8]) -> PrintResult<()> {
        let io_timeout = self.io_timeout;
        let ip = self.ip.clone();
        let stream = self.begin(ConnectionState::Writing, "write")?;

        let result = timeout(io_timeout, write_all_flush(stream, data)).await;

        match result {
            Ok(Ok(())) => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Ok(Err(e)) => Err(self.fail(PrintError::WriteFailed {
                ip,
                reason: e.to_string(),
            })),
            Err(_) => Err(self.fail(PrintError::Timeout {
                ip,
                operation: "write",
            })),
        }
    }

    /// Read whatever the printer sends next, waiting at most `wait`
    ///
    /// A timeout leaves the session failed: a late reply would otherwise be
    /// taken as the answer to the next request.
    #[instrument(skip(self), fields(ip = %self.ip))]
    pub async fn read(&mut self, wait: Duration) -> PrintResult<Vec<u8>> {
        let ip = self.ip.clone();
        let stream = self.begin(ConnectionState::Reading, "read")?;

        let mut buf = vec![0u8; 256];
        let result = timeout(wait, stream.read(&mut buf)).await;
        match result {
            Ok(Ok(0)) => Err(self.fail(PrintError::ReadFailed {
                ip,
                reason: "connection closed by printer".to_string(),
            })),
            Ok(Ok(n)) => {
                buf.truncate(n);
                self.state = ConnectionState::Connected;
                Ok(buf)
            }
            Ok(Err(e)) => Err(self.fail(PrintError::ReadFailed {
                ip,
                reason: e.to_string(),
            })),
            Err(_) => Err(self.fail(PrintError::Timeout {
                ip,
                operation: "read",
            })),
        }
    }

    /// Close the session; always succeeds
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(ip = %self.ip, "Disconnected");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Ask the printer for its real-time status (DLE EOT 1..4)
    ///
    /// Never fails: a printer that cannot answer is reported offline with
    /// the error attached.
    #[instrument(skip(self), fields(ip = %self.ip))]
    pub async fn query_status(&mut self) -> StatusReport {
        let mut status = PrinterStatus::default();
        for kind in StatusKind::ALL {
            if let Err(e) = self.write(&status_request_command(kind as u8)).await {
                return StatusReport::failed(e);
            }
            let reply = match self.read_byte().await {
                Ok(b) => b,
                Err(e) => return StatusReport::failed(e),
            };
            if !status.apply(kind, reply) {
                let e = self.fail(PrintError::ReadFailed {
                    ip: self.ip.clone(),
                    reason: format!("unexpected status byte 0x{:02X}", reply),
                });
                return StatusReport::failed(e);
            }
        }
        debug!(?status, "Status received");
        StatusReport::ok(status)
    }

    async fn read_byte(&mut self) -> PrintResult<u8> {
        let io_timeout = self.io_timeout;
        let ip = self.ip.clone();
        let stream = self.begin(ConnectionState::Reading, "read")?;

        let result = timeout(io_timeout, stream.read_u8()).await;
        match result {
            Ok(Ok(b)) => {
                self.state = ConnectionState::Connected;
                Ok(b)
            }
            Ok(Err(e)) => Err(self.fail(PrintError::ReadFailed {
                ip,
                reason: e.to_string(),
            })),
            Err(_) => Err(self.fail(PrintError::Timeout {
                ip,
                operation: "read",
            })),
        }
    }

    /// Enter `next` from `Connected` and hand out the socket
    fn begin(
        &mut self,
        next: ConnectionState,
        operation: &'static str,
    ) -> PrintResult<&mut TcpStream> {
        let not_connected = |ip: &str, reason: &str| match operation {
            "write" => PrintError::WriteFailed {
                ip: ip.to_string(),
                reason: reason.to_string(),
            },
            _ => PrintError::ReadFailed {
                ip: ip.to_string(),
                reason: reason.to_string(),
            },
        };

        match self.state {
            ConnectionState::Connected => {}
            // an earlier write/read was dropped half way
            ConnectionState::Writing | ConnectionState::Reading => {
                self.stream = None;
                self.state = ConnectionState::Failed;
                return Err(not_connected(&self.ip, "previous operation was interrupted"));
            }
            _ => return Err(not_connected(&self.ip, "not connected")),
        }

        match self.stream.as_mut() {
            Some(stream) => {
                self.state = next;
                Ok(stream)
            }
            None => {
                self.state = ConnectionState::Failed;
                Err(not_connected(&self.ip, "not connected"))
            }
        }
    }

    fn fail(&mut self, error: PrintError) -> PrintError {
        warn!(ip = %self.ip, error = %error, "Printer session failed");
        self.stream = None;
        self.state = ConnectionState::Failed;
        error
    }
}

async fn write_all_flush(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    stream.write_all(data).await?;
    stream.flush().await
}

/// Trait for printer adapters
#[allow(async_fn_in_trait)]
pub trait Printer {
    /// Send raw ESC/POS data to the printer
    async fn print(&self, data: &[u8]) -> PrintResult<()>;

    /// Check if the printer is online/reachable
    async fn is_online(&self) -> bool;
}

/// Network printer (TCP port 9100)
#[derive(Debug, Clone)]
pub struct NetworkPrinter {
    ip: String,
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
    probe_timeout: Duration,
}

impl NetworkPrinter {
    pub fn new(ip: &str, port: u16) -> PrintResult<Self> {
        if ip.trim().is_empty() {
            return Err(PrintError::invalid("printer ip is empty"));
        }
        if port == 0 {
            return Err(PrintError::invalid(format!("invalid port for {}", ip)));
        }
        Ok(Self {
            ip: ip.to_string(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        })
    }

    /// Set connect and write timeouts
    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connection(&self) -> PrinterConnection {
        PrinterConnection::with_timeouts(self.connect_timeout, self.io_timeout)
    }
}

impl Printer for NetworkPrinter {
    #[instrument(skip(self, data), fields(ip = %self.ip, port = self.port, data_len = data.len()))]
    async fn print(&self, data: &[u8]) -> PrintResult<()> {
        let mut conn = self.connection();
        conn.connect(&self.ip, self.port).await?;
        let result = conn.write(data).await;
        conn.disconnect().await;
        if result.is_ok() {
            info!("Print job sent successfully");
        }
        result
    }

    async fn is_online(&self) -> bool {
        probe(&self.ip, self.port, self.probe_timeout).await
    }
}

/// Short connect attempt; true if the printer accepted the connection
#[instrument(skip(wait))]
pub async fn probe(ip: &str, port: u16, wait: Duration) -> bool {
    match timeout(wait, TcpStream::connect((ip, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Printer offline");
            false
        }
        Err(_) => {
            debug!("Printer check timeout");
            false
        }
    }
}

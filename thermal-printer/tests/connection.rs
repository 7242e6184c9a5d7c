// thermal-printer/tests/connection.rs
// Session state machine against loopback "printers"

use std::time::Duration;
use thermal_printer::{
    ConnectionState, NetworkPrinter, PrintError, Printer, PrinterConnection, encode, probe,
    PrintItem,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A port nobody listens on
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_connect_write_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });

    let mut conn = PrinterConnection::new();
    conn.connect("127.0.0.1", port).await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);

    // reconnecting to the same printer keeps the session
    conn.connect("127.0.0.1", port).await.unwrap();

    conn.write(b"hello ").await.unwrap();
    conn.write(b"printer").await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);

    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    conn.disconnect().await;

    assert_eq!(server.await.unwrap(), b"hello printer");
}

#[tokio::test]
async fn test_connect_refused() {
    let port = closed_port().await;
    let mut conn = PrinterConnection::with_timeouts(Duration::from_millis(500), Duration::from_millis(500));

    let err = conn.connect("127.0.0.1", port).await.unwrap_err();
    match &err {
        PrintError::ConnectionFailed { ip, .. } => assert_eq!(ip, "127.0.0.1"),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.is_unreachable());
    assert_eq!(conn.state(), ConnectionState::Failed);

    // a failed session refuses I/O until reconnected
    assert!(matches!(
        conn.write(b"x").await,
        Err(PrintError::WriteFailed { .. })
    ));
}

#[tokio::test]
async fn test_read_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(socket);
    });

    let mut conn = PrinterConnection::new();
    conn.connect("127.0.0.1", port).await.unwrap();
    let err = conn.read(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, PrintError::Timeout { operation: "read", .. }));
    assert_eq!(conn.state(), ConnectionState::Failed);

    server.await.unwrap();
}

#[tokio::test]
async fn test_read_after_peer_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);
    });

    let mut conn = PrinterConnection::new();
    conn.connect("127.0.0.1", port).await.unwrap();
    server.await.unwrap();

    let err = conn.read(Duration::from_secs(2)).await.unwrap_err();
    assert!(matches!(err, PrintError::ReadFailed { .. }));
}

#[tokio::test]
async fn test_query_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // answers DLE EOT 1..4: idle, idle, idle, paper near end
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        for reply in [0x12u8, 0x12, 0x12, 0x1E] {
            let mut request = [0u8; 3];
            socket.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..2], &[0x10, 0x04]);
            socket.write_all(&[reply]).await.unwrap();
        }
    });

    let mut conn = PrinterConnection::new();
    conn.connect("127.0.0.1", port).await.unwrap();
    let report = conn.query_status().await;
    assert!(report.error.is_none());
    assert!(!report.status.offline);
    assert!(report.status.paper_near_empty);
    assert!(!report.status.paper_empty);
    assert_eq!(conn.state(), ConnectionState::Connected);

    server.await.unwrap();
}

#[tokio::test]
async fn test_query_status_silent_printer_is_offline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(socket);
    });

    let mut conn = PrinterConnection::with_timeouts(Duration::from_secs(1), Duration::from_millis(50));
    conn.connect("127.0.0.1", port).await.unwrap();
    let report = conn.query_status().await;
    assert!(report.status.offline);
    assert!(matches!(
        report.error,
        Some(PrintError::Timeout { operation: "read", .. })
    ));

    server.await.unwrap();
}

#[tokio::test]
async fn test_network_printer_print_and_probe() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let data = encode(&[PrintItem::text("Order #42"), PrintItem::cut()]).unwrap();
    let expected = data.clone();

    let server = tokio::spawn(async move {
        // first connection is the probe
        let (probe_socket, _) = listener.accept().await.unwrap();
        drop(probe_socket);
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });

    let printer = NetworkPrinter::new("127.0.0.1", port).unwrap();
    assert!(printer.is_online().await);
    printer.print(&data).await.unwrap();
    assert_eq!(server.await.unwrap(), expected);

    let offline = closed_port().await;
    assert!(!probe("127.0.0.1", offline, Duration::from_millis(200)).await);
}

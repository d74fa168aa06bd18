//! Shared helpers for roverd integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use rover_core::RegistrySnapshot;
use rover_protocol::ServerMessage;
use roverd::broker::{spawn_broker, BrokerHandle};
use roverd::config::BrokerConfig;
use roverd::server::BrokerServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);
pub const SILENCE_WINDOW: Duration = Duration::from_millis(150);
const POLL_INTERVAL: Duration = Duration::from_millis(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Test Server
// ============================================================================

pub struct TestServer {
    pub addr: SocketAddr,
    pub broker: BrokerHandle,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    #[allow(dead_code)]
    pub async fn spawn() -> Self {
        Self::spawn_with_config(BrokerConfig::default()).await
    }

    pub async fn spawn_with_config(config: BrokerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = spawn_broker();
        let cancel_token = CancellationToken::new();
        let server = BrokerServer::new(config, broker.clone(), cancel_token.clone());

        let task = tokio::spawn(async move {
            server.run_with_listener(listener).await;
        });

        Self {
            addr,
            broker,
            cancel_token,
            task,
        }
    }

    pub async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect to server");
        TestClient::new(stream)
    }

    /// Polls the broker until `predicate` holds.
    pub async fn wait_for<F>(&self, what: &str, predicate: F) -> RegistrySnapshot
    where
        F: Fn(&RegistrySnapshot) -> bool,
    {
        let start = tokio::time::Instant::now();
        loop {
            let snapshot = self.broker.snapshot().await.unwrap();
            if predicate(&snapshot) {
                return snapshot;
            }
            assert!(start.elapsed() < RECV_TIMEOUT, "timed out waiting for {what}: {snapshot:?}");
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Connects and registers a device, waiting until the broker has it.
    pub async fn device(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.send_line(&format!("DC:{name}")).await;
        self.wait_for(name, |s| s.devices.iter().any(|d| d.as_str() == name))
            .await;
        client
    }

    /// Connects and registers a controller, consuming its `DL` snapshot.
    pub async fn controller(&self, name: &str) -> (TestClient, String) {
        let mut client = self.connect().await;
        client.send_line(&format!("CC:{name}")).await;
        let snapshot = client.recv_line().await;
        assert!(snapshot.starts_with("DL:"), "expected DL snapshot, got {snapshot:?}");
        (client, snapshot)
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(SHUTDOWN_TIMEOUT, self.task)
            .await
            .expect("server did not stop in time")
            .unwrap();
    }
}

// ============================================================================
// Test Client
// ============================================================================

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends one line terminated with `\r\n`.
    pub async fn send_line(&mut self, line: &str) {
        self.send_raw(format!("{line}\r\n").as_bytes()).await;
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Reads one line and checks its `\r\n` terminator.
    pub async fn recv_line(&mut self) -> String {
        let mut line = String::new();
        let read = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        assert!(read > 0, "connection closed while waiting for a line");
        line.strip_suffix("\r\n")
            .unwrap_or_else(|| panic!("line not terminated with CRLF: {line:?}"))
            .to_string()
    }

    /// Reads one line as raw bytes, without its `\r\n`.
    #[allow(dead_code)]
    pub async fn recv_bytes(&mut self) -> Vec<u8> {
        let mut line = Vec::new();
        let read = timeout(RECV_TIMEOUT, self.reader.read_until(b'\n', &mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        assert!(read > 0, "connection closed while waiting for a line");
        assert!(line.ends_with(b"\r\n"), "line not terminated with CRLF: {line:?}");
        line.truncate(line.len() - 2);
        line
    }

    #[allow(dead_code)]
    pub async fn recv(&mut self) -> ServerMessage {
        let line = self.recv_line().await;
        ServerMessage::decode(&line).unwrap()
    }

    /// Asserts that nothing arrives for a short while.
    pub async fn expect_silence(&mut self) {
        let mut line = String::new();
        if let Ok(result) = timeout(SILENCE_WINDOW, self.reader.read_line(&mut line)).await {
            panic!("expected silence, got {result:?} {line:?}");
        }
    }

    /// Asserts the server closes the connection.
    #[allow(dead_code)]
    pub async fn expect_closed(&mut self) {
        let mut line = String::new();
        loop {
            line.clear();
            let result = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for close");
            match result {
                Ok(0) | Err(_) => return,
                // Lines queued before the close may still arrive
                Ok(_) => continue,
            }
        }
    }
}

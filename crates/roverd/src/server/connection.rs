//! Connection handler for individual TCP clients.
//!
//! Each accepted socket gets its own `ConnectionHandler` that:
//! - Attaches the connection to the broker and receives its id
//! - Reads lines, decodes them and forwards them to the broker
//! - Drains the connection's outbox to the socket on a separate writer task
//! - Reports the disconnect, with its reason, exactly once
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rover_core::ConnectionId;
use rover_protocol::{decode_bytes, ServerMessage, LINE_TERMINATOR};

use crate::broker::{BrokerError, BrokerHandle, DisconnectReason};
use crate::config::BrokerConfig;

/// Initial capacity of the per-connection read buffer
const READ_BUFFER_CAPACITY: usize = 256;

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// The accepted socket
    stream: TcpStream,

    /// Peer address, for logs and the registry
    remote_addr: SocketAddr,

    /// Handle to the broker actor
    broker: BrokerHandle,

    /// Longest accepted line, terminator excluded
    max_line_length: usize,

    /// Outbox capacity in lines
    outbound_buffer: usize,

    /// Per-line write timeout
    write_timeout: Duration,

    /// Server-wide shutdown signal
    cancel_token: CancellationToken,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        broker: BrokerHandle,
        config: &BrokerConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            stream,
            remote_addr,
            broker,
            max_line_length: config.max_line_length,
            outbound_buffer: config.outbound_buffer,
            write_timeout: config.write_timeout(),
            cancel_token,
        }
    }

    /// Runs the connection until the client leaves, the socket fails or the
    /// server shuts down. Returns why the connection ended.
    pub async fn run(self) -> DisconnectReason {
        if let Err(e) = self.stream.set_nodelay(true) {
            debug!(remote = %self.remote_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let (outbox, inbox) = mpsc::channel(self.outbound_buffer);
        let id = match self.broker.connect(Some(self.remote_addr), outbox).await {
            Ok(id) => id,
            Err(e) => {
                warn!(remote = %self.remote_addr, error = %e, "Broker unavailable, dropping connection");
                return DisconnectReason::BrokerUnavailable;
            }
        };
        info!(connection = %id, remote = %self.remote_addr, "Client connected");

        let (reader, writer) = self.stream.into_split();
        let (failed_tx, failed_rx) = oneshot::channel();
        let writer_task = tokio::spawn(write_loop(id, writer, inbox, self.write_timeout, failed_tx));

        let reason = read_loop(
            id,
            BufReader::new(reader),
            &self.broker,
            self.max_line_length,
            &self.cancel_token,
            failed_rx,
        )
        .await;

        // The actor drops the outbox on disconnect, which lets the writer
        // drain what is queued and finish.
        if self.broker.disconnect(id, reason.clone()).await.is_err() {
            debug!(connection = %id, "Broker gone before disconnect could be reported");
        }
        if let Err(e) = writer_task.await {
            warn!(connection = %id, error = %e, "Writer task failed");
        }

        info!(connection = %id, reason = %reason, "Client disconnected");
        reason
    }
}

/// Reads lines until the connection has to end.
async fn read_loop<R>(
    id: ConnectionId,
    mut reader: R,
    broker: &BrokerHandle,
    max_line_length: usize,
    cancel_token: &CancellationToken,
    mut write_failed: oneshot::Receiver<ConnectionError>,
) -> DisconnectReason
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(READ_BUFFER_CAPACITY);

    loop {
        line.clear();

        let result = tokio::select! {
            _ = cancel_token.cancelled() => return DisconnectReason::Shutdown,

            failure = &mut write_failed => {
                return match failure {
                    Ok(e) => e.into(),
                    // Writer ended without a failure: its outbox was closed
                    // by a broker that is no longer running.
                    Err(_) => DisconnectReason::BrokerUnavailable,
                };
            }

            result = read_line(&mut reader, &mut line, max_line_length) => result,
        };

        if let Err(e) = result {
            debug!(connection = %id, error = %e, "Stopped reading");
            return e.into();
        }

        debug!(connection = %id, bytes = line.len(), "Received line");
        if let Err(e) = broker.submit(id, decode_bytes(&line)).await {
            return ConnectionError::from(e).into();
        }
    }
}

/// Reads one `\n`-terminated line into `buf`, enforcing the length limit.
///
/// A trailing partial line at end of stream is discarded.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> Result<(), ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the longest allowed line plus "\r\n"
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(2);

    let read = (&mut *reader)
        .take(limit)
        .read_until(b'\n', buf)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;

    if read == 0 {
        return Err(ConnectionError::Eof);
    }

    if buf.last() != Some(&b'\n') {
        if u64::try_from(read).unwrap_or(u64::MAX) >= limit {
            return Err(ConnectionError::LineTooLong { size: read, max });
        }
        return Err(ConnectionError::Eof);
    }

    let terminator = if buf.ends_with(b"\r\n") { 2 } else { 1 };
    let size = buf.len().saturating_sub(terminator);
    if size > max {
        return Err(ConnectionError::LineTooLong { size, max });
    }
    Ok(())
}

/// Drains the outbox to the socket, one line at a time.
async fn write_loop(
    id: ConnectionId,
    writer: OwnedWriteHalf,
    mut inbox: mpsc::Receiver<ServerMessage>,
    write_timeout: Duration,
    failed: oneshot::Sender<ConnectionError>,
) {
    let mut writer = BufWriter::new(writer);

    while let Some(message) = inbox.recv().await {
        if let Err(e) = send_line(&mut writer, &message, write_timeout).await {
            debug!(connection = %id, error = %e, line = %message, "Failed to send line");
            let _ = failed.send(e);
            return;
        }
        debug!(connection = %id, line = %message, "Sent line");
    }

    if let Err(e) = writer.shutdown().await {
        debug!(connection = %id, error = %e, "Failed to shut down socket");
    }
}

/// Writes one terminated line and flushes it.
async fn send_line(
    writer: &mut BufWriter<OwnedWriteHalf>,
    message: &ServerMessage,
    write_timeout: Duration,
) -> Result<(), ConnectionError> {
    let line = message.to_bytes();

    match timeout(write_timeout, async {
        writer.write_all(&line).await?;
        writer.write_all(LINE_TERMINATOR.as_bytes()).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Write(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that end a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Eof,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Line too long: {size} bytes (max: {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl From<ConnectionError> for DisconnectReason {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Eof => Self::Eof,
            ConnectionError::Io(e) => Self::Io(e),
            ConnectionError::Write(e) => Self::WriteFailed(e),
            ConnectionError::WriteTimeout => Self::WriteTimeout,
            ConnectionError::LineTooLong { size, max } => Self::LineTooLong { size, max },
            ConnectionError::Broker(_) => Self::BrokerUnavailable,
        }
    }
}

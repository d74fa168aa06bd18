//! Broker actor - owns the broker state and every session's send path.
//!
//! The BrokerActor is the single writer for pairing state. Connection tasks
//! send it decoded lines and lifecycle events; it applies them one at a time
//! and pushes the resulting lines into per-connection outboxes.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Outbox send failures are logged, never raised

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use rover_core::ConnectionId;
use rover_protocol::ServerMessage;

use super::commands::{BrokerCommand, DisconnectReason};
use super::machine::{Broker, Outbound};

/// The broker actor.
///
/// # Delivery
///
/// Lines are pushed with `try_send`, so one slow client can never stall the
/// actor. A full outbox drops the line; a closed outbox means the writer is
/// already gone and its disconnect is on the way.
pub struct BrokerActor {
    /// Command receiver
    receiver: mpsc::Receiver<BrokerCommand>,

    /// Registry plus protocol rules
    broker: Broker,

    /// Send path of every open connection
    outboxes: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,

    /// Next connection id to hand out
    next_connection: u64,
}

impl BrokerActor {
    /// Creates a new broker actor.
    pub fn new(receiver: mpsc::Receiver<BrokerCommand>) -> Self {
        Self {
            receiver,
            broker: Broker::new(),
            outboxes: HashMap::new(),
            next_connection: 1,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Broker actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            connections = self.outboxes.len(),
            registered = self.broker.registry().len(),
            "Broker actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: BrokerCommand) {
        match cmd {
            BrokerCommand::Connect {
                remote_addr,
                outbox,
                respond_to,
            } => {
                let id = self.handle_connect(remote_addr, outbox);
                // Ignore send error - the connection task may have gone away
                let _ = respond_to.send(id);
            }
            BrokerCommand::Inbound { connection, frame } => {
                if !self.outboxes.contains_key(&connection) {
                    warn!(connection = %connection, "Line from connection that is not open, ignoring");
                    return;
                }
                let out = self.broker.handle_frame(connection, frame);
                self.deliver(out);
            }
            BrokerCommand::Disconnect { connection, reason } => {
                self.handle_disconnect(connection, &reason);
            }
            BrokerCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.broker.registry().snapshot());
            }
            BrokerCommand::Reset { respond_to } => {
                self.broker.reset();
                let _ = respond_to.send(());
            }
        }
    }

    fn handle_connect(
        &mut self,
        remote_addr: Option<SocketAddr>,
        outbox: mpsc::Sender<ServerMessage>,
    ) -> ConnectionId {
        let id = ConnectionId::new(self.next_connection);
        self.next_connection = self.next_connection.saturating_add(1);

        self.broker.connect(id, remote_addr);
        self.outboxes.insert(id, outbox);
        debug!(connection = %id, open = self.outboxes.len(), "Connection attached");
        id
    }

    fn handle_disconnect(&mut self, id: ConnectionId, reason: &DisconnectReason) {
        // Drop the outbox first so nothing more is queued for this connection.
        if self.outboxes.remove(&id).is_none() {
            debug!(connection = %id, "Disconnect for connection without outbox");
        }
        let out = self.broker.disconnect(id, reason);
        self.deliver(out);
    }

    /// Pushes lines into their outboxes in order.
    fn deliver(&self, out: Vec<Outbound>) {
        for Outbound { to, message } in out {
            let Some(outbox) = self.outboxes.get(&to) else {
                warn!(connection = %to, line = %message, "No outbox for connection, dropping line");
                continue;
            };

            match outbox.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    warn!(connection = %to, line = %message, "Outbox full, dropping line");
                }
                Err(TrySendError::Closed(message)) => {
                    debug!(connection = %to, line = %message, "Outbox closed, dropping line");
                }
            }
        }
    }
}

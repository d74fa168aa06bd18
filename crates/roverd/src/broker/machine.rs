//! Broker state machine.
//!
//! `Broker` applies one decoded client command (or one connection event) to
//! the registry and returns the lines that must go out, in order. It does
//! no I/O; the actor owns delivery.
//!
//! Every failed request produces exactly one `SE:<code>` line to the sender
//! and leaves the registry untouched.

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use rover_core::{ClientName, ConnectionId, DomainError, DomainResult, Registry, Role};
use rover_protocol::{ClientCommand, ErrorCode, ProtocolError, ServerMessage};

use super::commands::DisconnectReason;
use super::notifier;

/// A line addressed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: ConnectionId,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn new(to: ConnectionId, message: ServerMessage) -> Self {
        Self { to, message }
    }
}

/// Applies client commands and connection events to a registry.
#[derive(Debug, Default)]
pub struct Broker {
    registry: Registry,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access for queries and tests.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ========================================================================
    // Connection events
    // ========================================================================

    /// Starts tracking a freshly accepted connection.
    pub fn connect(&mut self, id: ConnectionId, remote_addr: Option<SocketAddr>) -> bool {
        let opened = self.registry.open(id, remote_addr);
        if opened {
            debug!(connection = %id, remote = ?remote_addr, "Connection opened");
        }
        opened
    }

    /// Cleans up after a closed connection.
    ///
    /// A paired device's controller hears `DD:` first, then every controller
    /// gets the new device list. Unknown or unregistered connections only
    /// produce a log line.
    pub fn disconnect(&mut self, id: ConnectionId, reason: &DisconnectReason) -> Vec<Outbound> {
        let mut out = Vec::new();

        let registered = match self.registry.session(id) {
            Some(session) => session.is_registered(),
            None => {
                warn!(connection = %id, reason = %reason, "Disconnect for unknown connection");
                return out;
            }
        };

        if !registered {
            warn!(connection = %id, reason = %reason, "Unregistered connection closed");
            self.registry.unregister(id);
            return out;
        }

        let Some(departure) = self.registry.unregister(id) else {
            return out;
        };

        info!(
            connection = %id,
            name = %departure.name,
            role = %departure.role,
            remote = ?departure.session.remote_addr(),
            reason = %reason,
            lifetime_secs = departure.session.lifetime().num_seconds(),
            "Client disconnected"
        );

        match departure.role {
            Role::Device => {
                if let Some(controller) = departure.peer {
                    out.push(Outbound::new(controller.id, ServerMessage::DeviceDisconnected));
                }
                notifier::broadcast_availability(&self.registry, &mut out);
            }
            Role::Controller => {
                // The device goes back into the pool; it is not told.
                if departure.peer.is_some() {
                    notifier::broadcast_availability(&self.registry, &mut out);
                }
            }
        }

        out
    }

    /// Forgets every registration and pairing. Connections stay open.
    pub fn reset(&mut self) {
        self.registry.reset();
    }

    // ========================================================================
    // Client commands
    // ========================================================================

    /// Handles one decoded line, including lines that failed to decode.
    pub fn handle_frame(
        &mut self,
        id: ConnectionId,
        frame: Result<ClientCommand, ProtocolError>,
    ) -> Vec<Outbound> {
        match frame {
            Ok(command) => self.handle(id, command),
            Err(e) => {
                debug!(connection = %id, error = %e, "Rejected malformed line");
                vec![Outbound::new(id, ServerMessage::error(ErrorCode::from(&e)))]
            }
        }
    }

    /// Handles one client command.
    pub fn handle(&mut self, id: ConnectionId, command: ClientCommand) -> Vec<Outbound> {
        let code = command.code();
        let mut out = Vec::new();

        let result = match command {
            ClientCommand::DeviceConnect { name } => self.register(id, name, Role::Device, &mut out),
            ClientCommand::ControllerConnect { name } => {
                self.register(id, name, Role::Controller, &mut out)
            }
            ClientCommand::SelectDevice { device } => self.select_device(id, device, &mut out),
            ClientCommand::Relay { payload } => self.relay(id, payload, &mut out),
        };

        if let Err(e) = result {
            let error = ErrorCode::from(&e);
            debug!(connection = %id, command = %code, error = %e, code = %error, "Request rejected");
            // A rejected request never leaves partial output behind.
            out.clear();
            out.push(Outbound::new(id, ServerMessage::error(error)));
        }

        out
    }

    fn register(
        &mut self,
        id: ConnectionId,
        name: ClientName,
        role: Role,
        out: &mut Vec<Outbound>,
    ) -> DomainResult<()> {
        self.registry.register(id, name, role)?;
        match role {
            Role::Device => {
                notifier::broadcast_availability(&self.registry, out);
            }
            Role::Controller => out.push(notifier::snapshot_for(&self.registry, id)),
        }
        Ok(())
    }

    fn select_device(
        &mut self,
        id: ConnectionId,
        device: ClientName,
        out: &mut Vec<Outbound>,
    ) -> DomainResult<()> {
        self.require_role(id, Role::Controller)?;

        let target = self
            .registry
            .lookup(device.as_str())
            .ok_or_else(|| DomainError::UnknownDevice { name: device.clone() })?;
        let target_id = target.id();
        if target.role() != Some(Role::Device) {
            return Err(DomainError::RoleMismatch {
                connection: target_id,
                expected: Role::Device,
            });
        }

        match self.registry.peer_of(target_id) {
            Some(peer) if peer.id == id => {
                out.push(Outbound::new(id, ServerMessage::SelectOk));
                return Ok(());
            }
            Some(peer) => {
                return Err(DomainError::DeviceUnavailable {
                    name: device,
                    controller: peer.name,
                });
            }
            None => {}
        }

        let released = self.registry.pair(target_id, id)?;
        for peer in &released {
            debug!(controller = %id, released = %peer.name, "Previous device released");
        }

        out.push(Outbound::new(id, ServerMessage::SelectOk));
        notifier::broadcast_availability(&self.registry, out);
        Ok(())
    }

    fn relay(&mut self, id: ConnectionId, payload: Vec<u8>, out: &mut Vec<Outbound>) -> DomainResult<()> {
        let peer = self.registry.peer_of(id).ok_or(DomainError::NotPaired(id))?;
        debug!(from = %id, to = %peer.id, bytes = payload.len(), "Relaying payload");
        out.push(Outbound::new(peer.id, ServerMessage::relay(payload)));
        Ok(())
    }

    fn require_role(&self, id: ConnectionId, expected: Role) -> DomainResult<()> {
        let session = self
            .registry
            .session(id)
            .ok_or(DomainError::UnknownConnection(id))?;
        if session.role() == Some(expected) {
            Ok(())
        } else {
            Err(DomainError::RoleMismatch {
                connection: id,
                expected,
            })
        }
    }
}

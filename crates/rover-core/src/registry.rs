//! Registry of live sessions, their names and their pairings.
//!
//! The registry is the single authority for "who is connected". It holds:
//! - every accepted connection, registered or not
//! - a name index covering registered sessions
//! - device and controller name lists, in registration order
//! - the pairing relation, stored once per direction
//!
//! It performs no I/O: callers (the broker) decide what to tell clients
//! based on the values returned here.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::{ClientName, ConnectionId, DomainError, DomainResult, Identity, Role, Session, SessionState};

/// The other end of a pairing, captured at the moment it was broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: ConnectionId,
    pub name: ClientName,
    pub role: Role,
}

/// What a registered session left behind when it was unregistered.
#[derive(Debug, Clone)]
pub struct Departure {
    /// The removed session, identity already stripped.
    pub session: Session,
    pub name: ClientName,
    pub role: Role,
    /// The session it was paired with, now unpaired.
    pub peer: Option<Peer>,
}

/// Point-in-time copy of the registry contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Registered devices in registration order.
    pub devices: Vec<ClientName>,
    /// Registered controllers in registration order.
    pub controllers: Vec<ClientName>,
    /// Devices with no controller attached.
    pub available: Vec<ClientName>,
    /// `(device, controller)` pairs in device registration order.
    pub pairs: Vec<(ClientName, ClientName)>,
    /// Accepted connections that have not registered.
    pub unregistered: usize,
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<ConnectionId, Session>,
    by_name: HashMap<ClientName, ConnectionId>,
    devices: Vec<ClientName>,
    controllers: Vec<ClientName>,
    /// Symmetric pairing relation: both `a -> b` and `b -> a` are present.
    peers: HashMap<ClientName, ClientName>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Tracks a freshly accepted, unregistered connection.
    ///
    /// Returns `false` (and changes nothing) if the id is already tracked.
    pub fn open(&mut self, id: ConnectionId, remote_addr: Option<SocketAddr>) -> bool {
        if self.sessions.contains_key(&id) {
            warn!(connection = %id, "Connection opened twice, ignoring");
            return false;
        }
        self.sessions.insert(id, Session::new(id, remote_addr));
        true
    }

    /// Gives an unregistered session its name and role.
    ///
    /// # Errors
    ///
    /// - `DomainError::UnknownConnection` if the connection was never opened
    /// - `DomainError::AlreadyRegistered` if the session already has a name
    /// - `DomainError::NameTaken` if another live session holds `name`
    pub fn register(&mut self, id: ConnectionId, name: ClientName, role: Role) -> DomainResult<()> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(DomainError::UnknownConnection(id))?;
        if let Some(existing) = session.name() {
            return Err(DomainError::AlreadyRegistered {
                connection: id,
                name: existing.clone(),
            });
        }
        if self.by_name.contains_key(&name) {
            return Err(DomainError::NameTaken { name });
        }

        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(DomainError::UnknownConnection(id))?;
        session.set_identity(Identity {
            name: name.clone(),
            role,
        });
        self.by_name.insert(name.clone(), id);
        match role {
            Role::Device => self.devices.push(name.clone()),
            Role::Controller => self.controllers.push(name.clone()),
        }

        info!(
            connection = %id,
            name = %name,
            role = %role,
            devices = self.devices.len(),
            controllers = self.controllers.len(),
            "Session registered"
        );
        Ok(())
    }

    /// Removes a connection and, if it was registered, its name and pairing.
    ///
    /// Returns `None` for a connection that never registered or is unknown;
    /// the latter is a consistency violation and is logged, never raised.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Departure> {
        let Some(mut session) = self.sessions.remove(&id) else {
            warn!(connection = %id, "Unregister for unknown connection, nothing to clean up");
            return None;
        };

        let Some(Identity { name, role }) = session.take_identity() else {
            debug!(connection = %id, "Dropped connection that never registered");
            return None;
        };

        if self.by_name.remove(&name).is_none() {
            warn!(connection = %id, name = %name, "Registered session missing from name index");
        }
        let list = match role {
            Role::Device => &mut self.devices,
            Role::Controller => &mut self.controllers,
        };
        list.retain(|n| n != &name);

        let peer = self.unlink(&name).and_then(|peer_name| self.peer_by_name(peer_name));

        info!(
            connection = %id,
            name = %name,
            role = %role,
            peer = ?peer.as_ref().map(|p| p.name.as_str()),
            "Session unregistered"
        );

        Some(Departure {
            session,
            name,
            role,
            peer,
        })
    }

    /// Strips every session back to unregistered and drops all pairings.
    ///
    /// Connections stay tracked so their later disconnects remain clean.
    pub fn reset(&mut self) {
        for session in self.sessions.values_mut() {
            session.take_identity();
        }
        self.by_name.clear();
        self.devices.clear();
        self.controllers.clear();
        self.peers.clear();
        info!(connections = self.sessions.len(), "Registry reset");
    }

    // ========================================================================
    // Pairing
    // ========================================================================

    /// Pairs a device session with a controller session.
    ///
    /// Idempotent for an identical pair. Any previous pairing on either side
    /// is broken first so the relation stays symmetric; the sessions left
    /// without a partner are returned.
    ///
    /// # Errors
    ///
    /// - `DomainError::UnknownConnection` / `NotRegistered` for either side
    /// - `DomainError::RoleMismatch` if the roles are not device + controller
    pub fn pair(&mut self, device: ConnectionId, controller: ConnectionId) -> DomainResult<Vec<Peer>> {
        let device_name = self.registered_as(device, Role::Device)?;
        let controller_name = self.registered_as(controller, Role::Controller)?;

        if self.peers.get(&device_name) == Some(&controller_name) {
            debug!(device = %device_name, controller = %controller_name, "Already paired");
            return Ok(Vec::new());
        }

        let mut displaced = Vec::new();
        for name in [&device_name, &controller_name] {
            if let Some(peer) = self.unlink(name).and_then(|old| self.peer_by_name(old)) {
                displaced.push(peer);
            }
        }

        self.peers.insert(device_name.clone(), controller_name.clone());
        self.peers.insert(controller_name.clone(), device_name.clone());

        info!(device = %device_name, controller = %controller_name, "Paired");
        debug_assert!(self.is_consistent());
        Ok(displaced)
    }

    /// Breaks the pairing of `id`, returning its former partner.
    pub fn unpair(&mut self, id: ConnectionId) -> Option<Peer> {
        let name = self.sessions.get(&id)?.name()?.clone();
        let peer_name = self.unlink(&name)?;
        debug!(name = %name, peer = %peer_name, "Unpaired");
        self.peer_by_name(peer_name)
    }

    /// Removes both directions of the pairing that involves `name`.
    fn unlink(&mut self, name: &ClientName) -> Option<ClientName> {
        let other = self.peers.remove(name)?;
        self.peers.remove(&other);
        Some(other)
    }

    fn registered_as(&self, id: ConnectionId, expected: Role) -> DomainResult<ClientName> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(DomainError::UnknownConnection(id))?;
        let identity = session.identity().ok_or(DomainError::NotRegistered(id))?;
        if identity.role != expected {
            return Err(DomainError::RoleMismatch {
                connection: id,
                expected,
            });
        }
        Ok(identity.name.clone())
    }

    fn peer_by_name(&self, name: ClientName) -> Option<Peer> {
        let id = *self.by_name.get(&name)?;
        let role = self.sessions.get(&id)?.role()?;
        Some(Peer { id, name, role })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Looks up a registered session by name.
    pub fn lookup(&self, name: &str) -> Option<&Session> {
        self.by_name.get(name).and_then(|id| self.sessions.get(id))
    }

    /// Looks up any tracked session by connection id.
    pub fn session(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Derives the protocol state of a tracked session.
    pub fn state(&self, id: ConnectionId) -> Option<SessionState> {
        let session = self.sessions.get(&id)?;
        let state = match session.name() {
            None => SessionState::Unregistered,
            Some(name) => match self.peers.get(name) {
                Some(peer) => SessionState::Paired { peer: peer.clone() },
                None => SessionState::Unpaired,
            },
        };
        Some(state)
    }

    /// Returns the partner of a paired session.
    pub fn peer_of(&self, id: ConnectionId) -> Option<Peer> {
        let name = self.sessions.get(&id)?.name()?;
        let peer_name = self.peers.get(name)?.clone();
        self.peer_by_name(peer_name)
    }

    /// Registered, unpaired devices in registration order.
    pub fn available_devices(&self) -> Vec<ClientName> {
        self.devices
            .iter()
            .filter(|name| !self.peers.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Connection ids of registered controllers in registration order.
    pub fn controller_ids(&self) -> Vec<ConnectionId> {
        self.controllers
            .iter()
            .filter_map(|name| self.by_name.get(name).copied())
            .collect()
    }

    pub fn device_names(&self) -> &[ClientName] {
        &self.devices
    }

    pub fn controller_names(&self) -> &[ClientName] {
        &self.controllers
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Number of tracked connections, registered or not.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let pairs = self
            .devices
            .iter()
            .filter_map(|device| {
                self.peers
                    .get(device)
                    .map(|controller| (device.clone(), controller.clone()))
            })
            .collect();

        RegistrySnapshot {
            devices: self.devices.clone(),
            controllers: self.controllers.clone(),
            available: self.available_devices(),
            pairs,
            unregistered: self.sessions.len().saturating_sub(self.by_name.len()),
        }
    }

    /// Checks every structural invariant of the registry.
    ///
    /// Used by debug assertions and tests.
    pub fn is_consistent(&self) -> bool {
        let disjoint = self.devices.iter().all(|d| !self.controllers.contains(d));

        let listed = |names: &[ClientName], role: Role| {
            names.iter().all(|name| {
                self.lookup(name.as_str())
                    .is_some_and(|s| s.role() == Some(role) && s.name() == Some(name))
            })
        };

        let indexed = self.by_name.len() == self.devices.len() + self.controllers.len()
            && self.by_name.iter().all(|(name, id)| {
                self.sessions
                    .get(id)
                    .is_some_and(|s| s.name() == Some(name))
            });

        let symmetric = self.peers.iter().all(|(a, b)| {
            self.peers.get(b) == Some(a)
                && match (self.lookup(a.as_str()), self.lookup(b.as_str())) {
                    (Some(sa), Some(sb)) => sa.role().map(Role::counterpart) == sb.role(),
                    _ => false,
                }
        });

        disjoint
            && listed(&self.devices, Role::Device)
            && listed(&self.controllers, Role::Controller)
            && indexed
            && symmetric
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> ClientName {
        ClientName::parse(raw).unwrap()
    }

    /// Opens and registers a connection in one step.
    fn join(registry: &mut Registry, id: u64, raw: &str, role: Role) -> ConnectionId {
        let id = ConnectionId::new(id);
        assert!(registry.open(id, None));
        registry.register(id, name(raw), role).unwrap();
        id
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.available_devices().is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_register_device_and_controller() {
        let mut registry = Registry::new();
        let rover = join(&mut registry, 1, "rover1", Role::Device);
        let ctrl = join(&mut registry, 2, "ctrl1", Role::Controller);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.device_names(), &[name("rover1")]);
        assert_eq!(registry.controller_names(), &[name("ctrl1")]);
        assert_eq!(registry.lookup("rover1").map(Session::id), Some(rover));
        assert_eq!(registry.controller_ids(), vec![ctrl]);
        assert_eq!(registry.state(rover), Some(SessionState::Unpaired));
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_register_rejects_taken_name() {
        let mut registry = Registry::new();
        join(&mut registry, 1, "rover1", Role::Device);

        let second = ConnectionId::new(2);
        registry.open(second, None);
        let err = registry
            .register(second, name("rover1"), Role::Controller)
            .unwrap_err();

        assert_eq!(err, DomainError::NameTaken { name: name("rover1") });
        // The original holder is untouched, the newcomer stays unregistered
        assert_eq!(registry.lookup("rover1").map(Session::id), Some(ConnectionId::new(1)));
        assert_eq!(registry.state(second), Some(SessionState::Unregistered));
        assert!(registry.controller_names().is_empty());
    }

    #[test]
    fn test_register_twice_on_same_connection_fails() {
        let mut registry = Registry::new();
        let id = join(&mut registry, 1, "rover1", Role::Device);

        let err = registry.register(id, name("rover2"), Role::Device).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyRegistered { .. }));

        let err = registry.register(id, name("rover1"), Role::Device).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyRegistered { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_unknown_connection_fails() {
        let mut registry = Registry::new();
        let err = registry
            .register(ConnectionId::new(9), name("ghost"), Role::Device)
            .unwrap_err();
        assert_eq!(err, DomainError::UnknownConnection(ConnectionId::new(9)));
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let mut registry = Registry::new();
        assert!(registry.open(ConnectionId::new(1), None));
        assert!(!registry.open(ConnectionId::new(1), None));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_pair_is_symmetric() {
        let mut registry = Registry::new();
        let rover = join(&mut registry, 1, "rover1", Role::Device);
        let ctrl = join(&mut registry, 2, "ctrl1", Role::Controller);

        let displaced = registry.pair(rover, ctrl).unwrap();
        assert!(displaced.is_empty());

        assert_eq!(registry.peer_of(rover).map(|p| p.id), Some(ctrl));
        assert_eq!(registry.peer_of(ctrl).map(|p| p.id), Some(rover));
        assert_eq!(
            registry.state(ctrl),
            Some(SessionState::Paired { peer: name("rover1") })
        );
        assert!(registry.available_devices().is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_pair_is_idempotent() {
        let mut registry = Registry::new();
        let rover = join(&mut registry, 1, "rover1", Role::Device);
        let ctrl = join(&mut registry, 2, "ctrl1", Role::Controller);

        registry.pair(rover, ctrl).unwrap();
        let displaced = registry.pair(rover, ctrl).unwrap();

        assert!(displaced.is_empty());
        assert_eq!(registry.snapshot().pairs, vec![(name("rover1"), name("ctrl1"))]);
    }

    #[test]
    fn test_pair_breaks_previous_pairing() {
        let mut registry = Registry::new();
        let rover1 = join(&mut registry, 1, "rover1", Role::Device);
        let rover2 = join(&mut registry, 2, "rover2", Role::Device);
        let ctrl = join(&mut registry, 3, "ctrl1", Role::Controller);

        registry.pair(rover1, ctrl).unwrap();
        let displaced = registry.pair(rover2, ctrl).unwrap();

        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced.first().map(|p| p.id), Some(rover1));
        assert_eq!(registry.state(rover1), Some(SessionState::Unpaired));
        assert_eq!(registry.available_devices(), vec![name("rover1")]);
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_pair_rejects_wrong_roles() {
        let mut registry = Registry::new();
        let rover = join(&mut registry, 1, "rover1", Role::Device);
        let other = join(&mut registry, 2, "rover2", Role::Device);

        let err = registry.pair(rover, other).unwrap_err();
        assert_eq!(
            err,
            DomainError::RoleMismatch {
                connection: other,
                expected: Role::Controller
            }
        );
    }

    #[test]
    fn test_pair_rejects_unregistered() {
        let mut registry = Registry::new();
        let rover = join(&mut registry, 1, "rover1", Role::Device);
        let fresh = ConnectionId::new(2);
        registry.open(fresh, None);

        let err = registry.pair(rover, fresh).unwrap_err();
        assert_eq!(err, DomainError::NotRegistered(fresh));
    }

    #[test]
    fn test_available_devices_keeps_registration_order() {
        let mut registry = Registry::new();
        join(&mut registry, 1, "zeta", Role::Device);
        join(&mut registry, 2, "alpha", Role::Device);
        let mid = join(&mut registry, 3, "mid", Role::Device);
        let ctrl = join(&mut registry, 4, "ctrl", Role::Controller);

        registry.pair(mid, ctrl).unwrap();
        assert_eq!(registry.available_devices(), vec![name("zeta"), name("alpha")]);

        registry.unpair(ctrl);
        assert_eq!(
            registry.available_devices(),
            vec![name("zeta"), name("alpha"), name("mid")]
        );
    }

    #[test]
    fn test_unregister_paired_device_returns_controller() {
        let mut registry = Registry::new();
        let rover = join(&mut registry, 1, "rover1", Role::Device);
        let ctrl = join(&mut registry, 2, "ctrl1", Role::Controller);
        registry.pair(rover, ctrl).unwrap();

        let departure = registry.unregister(rover).unwrap();
        assert_eq!(departure.name, name("rover1"));
        assert_eq!(departure.role, Role::Device);
        assert!(!departure.session.is_registered());
        assert_eq!(
            departure.peer,
            Some(Peer {
                id: ctrl,
                name: name("ctrl1"),
                role: Role::Controller
            })
        );

        assert_eq!(registry.state(ctrl), Some(SessionState::Unpaired));
        assert!(registry.lookup("rover1").is_none());
        assert!(registry.device_names().is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn test_unregister_frees_name_for_reuse() {
        let mut registry = Registry::new();
        let first = join(&mut registry, 1, "rover1", Role::Device);
        registry.unregister(first);

        let second = join(&mut registry, 2, "rover1", Role::Device);
        assert_eq!(registry.lookup("rover1").map(Session::id), Some(second));
    }

    #[test]
    fn test_unregister_unregistered_is_silent() {
        let mut registry = Registry::new();
        let fresh = ConnectionId::new(5);
        registry.open(fresh, None);

        assert!(registry.unregister(fresh).is_none());
        assert_eq!(registry.connection_count(), 0);

        // Second call targets an unknown connection, still no panic
        assert!(registry.unregister(fresh).is_none());
    }

    #[test]
    fn test_reset_keeps_connections_unregistered() {
        let mut registry = Registry::new();
        let rover = join(&mut registry, 1, "rover1", Role::Device);
        let ctrl = join(&mut registry, 2, "ctrl1", Role::Controller);
        registry.pair(rover, ctrl).unwrap();

        registry.reset();

        assert!(registry.is_empty());
        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.state(rover), Some(SessionState::Unregistered));
        assert!(registry.peer_of(ctrl).is_none());
        assert!(registry.is_consistent());

        // Names can be taken again after a reset
        registry.register(ctrl, name("rover1"), Role::Device).unwrap();
    }

    #[test]
    fn test_snapshot_contents() {
        let mut registry = Registry::new();
        let rover1 = join(&mut registry, 1, "rover1", Role::Device);
        join(&mut registry, 2, "rover2", Role::Device);
        let ctrl = join(&mut registry, 3, "ctrl1", Role::Controller);
        registry.open(ConnectionId::new(4), None);
        registry.pair(rover1, ctrl).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.devices, vec![name("rover1"), name("rover2")]);
        assert_eq!(snapshot.controllers, vec![name("ctrl1")]);
        assert_eq!(snapshot.available, vec![name("rover2")]);
        assert_eq!(snapshot.pairs, vec![(name("rover1"), name("ctrl1"))]);
        assert_eq!(snapshot.unregistered, 1);
    }

    #[test]
    fn test_random_operations_preserve_invariants() {
        // Deterministic pseudo-random walk over register/pair/unpair/unregister
        let mut registry = Registry::new();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for step in 0..2_000u64 {
            let id = ConnectionId::new(next() % 12);
            match next() % 5 {
                0 => {
                    registry.open(id, None);
                }
                1 => {
                    let role = if next() % 2 == 0 { Role::Device } else { Role::Controller };
                    let raw = format!("client{}", next() % 8);
                    let _ = registry.register(id, name(&raw), role);
                }
                2 => {
                    let other = ConnectionId::new(next() % 12);
                    let _ = registry.pair(id, other);
                }
                3 => {
                    registry.unpair(id);
                }
                _ => {
                    registry.unregister(id);
                }
            }

            assert!(registry.is_consistent(), "invariants broken at step {step}");
            let available = registry.available_devices();
            for device in registry.device_names() {
                let paired = registry.snapshot().pairs.iter().any(|(d, _)| d == device);
                assert_eq!(available.contains(device), !paired);
            }
        }
    }
}

//! Availability notifications.
//!
//! Derives the `DL:` device list from registry state. Holds no state of its
//! own; the broker calls in here after every mutation that can change which
//! devices are available.

use tracing::debug;

use rover_core::{ConnectionId, Registry};
use rover_protocol::ServerMessage;

use super::machine::Outbound;

/// The current `DL:` line.
pub fn availability(registry: &Registry) -> ServerMessage {
    ServerMessage::device_list(registry.available_devices())
}

/// Targeted snapshot for a single, newly registered controller.
pub fn snapshot_for(registry: &Registry, controller: ConnectionId) -> Outbound {
    Outbound::new(controller, availability(registry))
}

/// Queues one `DL:` line for every registered controller, in
/// controller-registration order. Returns how many were queued.
pub fn broadcast_availability(registry: &Registry, out: &mut Vec<Outbound>) -> usize {
    let controllers = registry.controller_ids();
    if controllers.is_empty() {
        return 0;
    }

    let message = availability(registry);
    debug!(
        controllers = controllers.len(),
        line = %message,
        "Broadcasting device availability"
    );

    out.extend(
        controllers
            .iter()
            .map(|id| Outbound::new(*id, message.clone())),
    );
    controllers.len()
}

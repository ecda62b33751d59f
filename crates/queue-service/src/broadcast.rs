//! Best-effort fan-out of queue positions and occupancy.
//!
//! Sends are non-blocking `try_send`s onto each client's outbound channel. A
//! full or closed channel costs that client one message and nothing else.

use crate::observability::metrics;
use crate::protocol::ServerMessage;
use crate::queue::AdmissionQueue;
use crate::registry::{Client, ClientRegistry};

use common::types::ClientId;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

/// Outcome of a fan-out. Counts deliveries attempted, not confirmed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub failed: usize,
}

impl BroadcastReport {
    fn record(&mut self, delivered: bool) {
        self.attempted += 1;
        if !delivered {
            self.failed += 1;
        }
    }
}

/// Enqueue `message` for one client. Returns `false` if it was dropped.
pub fn send_to(client: &Client, message: ServerMessage) -> bool {
    let kind = message.kind();
    match client.outbound.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(
                target: "queue.broadcast",
                client_id = %client.id,
                message_type = kind,
                "Outbound channel full, message dropped"
            );
            metrics::record_broadcast_failure(kind);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(
                target: "queue.broadcast",
                client_id = %client.id,
                message_type = kind,
                "Outbound channel closed, message dropped"
            );
            metrics::record_broadcast_failure(kind);
            false
        }
    }
}

/// Send every queued client its 1-based position and the queue length.
pub fn broadcast_queue_update(
    registry: &ClientRegistry,
    queue: &AdmissionQueue,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    let queue_size = queue.size();

    for (offset, id) in queue.iter().enumerate() {
        let client = registry.get(&id);
        debug_assert!(client.is_some(), "queued client {id} missing from registry");
        let Some(client) = client else {
            error!(
                target: "queue.broadcast",
                client_id = %id,
                "Queued client missing from registry"
            );
            continue;
        };

        report.record(send_to(
            client,
            ServerMessage::QueueUpdate {
                position: offset + 1,
                queue_size,
            },
        ));
    }

    debug!(
        target: "queue.broadcast",
        queue_size,
        attempted = report.attempted,
        failed = report.failed,
        "Queue positions broadcast"
    );
    report
}

/// Send every connected client the current availability, skipping `except`.
pub fn broadcast_occupancy(
    registry: &ClientRegistry,
    queue_size: usize,
    session_active: bool,
    except: Option<ClientId>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for client in registry.iter().filter(|c| Some(c.id) != except) {
        report.record(send_to(
            client,
            ServerMessage::Status {
                queue_size,
                session_active,
            },
        ));
    }

    debug!(
        target: "queue.broadcast",
        queue_size,
        session_active,
        attempted = report.attempted,
        failed = report.failed,
        "Occupancy broadcast"
    );
    report
}

//! Message types for the coordinator mailbox.
//!
//! Client operations are fire-and-forget: their results reach the client as
//! addressed `ServerMessage`s, not as replies. Only registration and status
//! queries use `oneshot` replies.

use crate::errors::QueueError;
use crate::registry::Outbound;

use common::types::ClientId;
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages sent to `SessionCoordinator`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// A socket passed admission checks and wants a client entry.
    Connect {
        client_id: ClientId,
        source_address: String,
        outbound: Outbound,
        respond_to: oneshot::Sender<Result<(), QueueError>>,
    },

    /// Client asks for the resource.
    JoinQueue {
        client_id: ClientId,
        invite_token: String,
    },

    /// Client gives up its queue position.
    LeaveQueue { client_id: ClientId },

    /// Client presents a token from a previous connection.
    Reconnect {
        client_id: ClientId,
        previous_session_token: String,
        invite_token: Option<String>,
    },

    /// Client releases the resource it holds.
    EndSession { client_id: ClientId },

    /// Socket closed.
    Disconnect { client_id: ClientId },

    /// Holder grace timer fired.
    GraceExpired { generation: u64 },

    /// Maximum session duration reached.
    SessionTimeout { generation: u64 },

    /// Snapshot for the status endpoint and tests.
    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub queue_size: usize,
    pub session_active: bool,
    pub connected_clients: usize,
    /// The holder dropped and its grace period is running.
    pub awaiting_reconnect: bool,
}

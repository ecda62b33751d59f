//! Wire protocol: JSON text frames with a `type` discriminator.
//!
//! Field names are camelCase on the wire, variant tags are snake_case.

use crate::errors::QueueError;

use common::types::SessionId;
use serde::{Deserialize, Serialize};

/// Close code for origin policy violations.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Close code for rate limit denials (private-use range).
pub const CLOSE_RATE_LIMITED: u16 = 4029;

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request the exclusive resource.
    #[serde(rename_all = "camelCase")]
    JoinQueue { invite_token: String },

    /// Give up a queue position.
    LeaveQueue,

    /// Liveness ping.
    Heartbeat,

    /// Resume a session held before a connection drop.
    #[serde(rename_all = "camelCase")]
    Reconnect {
        previous_session_token: String,
        /// Used for the fresh join when the session cannot be resumed.
        #[serde(default)]
        invite_token: Option<String>,
    },

    /// Holder releases the resource.
    EndSession,
}

/// Messages sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current occupancy, sent on connect and on every occupancy change.
    #[serde(rename_all = "camelCase")]
    Status {
        queue_size: usize,
        session_active: bool,
    },

    /// The recipient's 1-based queue position.
    #[serde(rename_all = "camelCase")]
    QueueUpdate { position: usize, queue_size: usize },

    /// The recipient now holds the resource.
    #[serde(rename_all = "camelCase")]
    SessionGranted {
        session_id: SessionId,
        /// Present with `reconnect` to resume this session after a drop.
        reconnect_token: String,
        /// True when an existing session was resumed.
        resumed: bool,
    },

    /// The recipient's session has ended.
    SessionRevoked { reason: RevokeReason },

    /// A request from the recipient failed.
    Error { message: String },

    /// Reply to `heartbeat`.
    HeartbeatAck,
}

impl ServerMessage {
    /// Error message carrying the client-safe text of `err`.
    #[must_use]
    pub fn error(err: &QueueError) -> Self {
        ServerMessage::Error {
            message: err.client_message(),
        }
    }

    /// Bounded label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Status { .. } => "status",
            ServerMessage::QueueUpdate { .. } => "queue_update",
            ServerMessage::SessionGranted { .. } => "session_granted",
            ServerMessage::SessionRevoked { .. } => "session_revoked",
            ServerMessage::Error { .. } => "error",
            ServerMessage::HeartbeatAck => "heartbeat_ack",
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    /// Holder did not reconnect within the grace period.
    Disconnected,
    /// Maximum session duration reached.
    Timeout,
    /// Holder sent `end_session`.
    UserEnded,
    /// Server is shutting down.
    Shutdown,
}

impl RevokeReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RevokeReason::Disconnected => "disconnected",
            RevokeReason::Timeout => "timeout",
            RevokeReason::UserEnded => "user_ended",
            RevokeReason::Shutdown => "shutdown",
        }
    }
}

/// Parse one inbound text frame.
///
/// Frames that are valid JSON objects with an unrecognized `type` yield
/// `UnknownMessageType`; everything else that fails yields `InvalidMessage`.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, QueueError> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => Ok(message),
        Err(err) => {
            let kind = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|value| {
                    value
                        .get("type")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string)
                });

            match kind {
                Some(kind) if !is_known_type(&kind) => Err(QueueError::UnknownMessageType(kind)),
                _ => Err(QueueError::InvalidMessage(err.to_string())),
            }
        }
    }
}

fn is_known_type(kind: &str) -> bool {
    matches!(
        kind,
        "join_queue" | "leave_queue" | "heartbeat" | "reconnect" | "end_session"
    )
}

/// Human-readable close reason for a rate limit denial.
#[must_use]
pub fn rate_limit_close_reason(retry_after_seconds: u64) -> String {
    format!("Rate limit exceeded. Retry after {retry_after_seconds} seconds")
}

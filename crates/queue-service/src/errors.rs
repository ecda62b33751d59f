//! Queue service error types.
//!
//! Error types map to client-facing `error` messages. Internal details are
//! logged server-side but not exposed to clients.

use thiserror::Error;

/// Queue service error type.
///
/// Maps to wire error codes:
/// - `InvalidMessage`, `UnknownMessageType`: `BAD_REQUEST` (1)
/// - `Invite`: `UNAUTHORIZED` (2)
/// - `NotSessionHolder`: `FORBIDDEN` (3)
/// - `QueueFull`: `CAPACITY_EXCEEDED` (7)
/// - `Internal`, `Config`: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum QueueError {
    /// Inbound frame could not be parsed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Inbound frame carried an unrecognized `type`.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Invite token rejected by the validator.
    #[error("Invite rejected: {0}")]
    Invite(#[from] InviteError),

    /// Queue is at its configured capacity.
    #[error("Queue is full")]
    QueueFull,

    /// Operation requires holding the active session.
    #[error("Not the session holder")]
    NotSessionHolder,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor mailbox closed, response dropped).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Invite token validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InviteError {
    /// No token supplied.
    #[error("Invite token required")]
    Missing,

    /// Token is empty, too long, or uses characters outside `[A-Za-z0-9_-]`.
    #[error("Invalid invite token format")]
    InvalidFormat,

    /// Token is in the revocation set.
    #[error("Invite token has been revoked")]
    Revoked,
}

impl QueueError {
    /// Returns the wire error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            QueueError::InvalidMessage(_) | QueueError::UnknownMessageType(_) => 1, // BAD_REQUEST
            QueueError::Invite(_) => 2,            // UNAUTHORIZED
            QueueError::NotSessionHolder => 3,     // FORBIDDEN
            QueueError::Config(_) | QueueError::Internal(_) => 6, // INTERNAL_ERROR
            QueueError::QueueFull => 7,            // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            QueueError::InvalidMessage(_) => "Invalid message format".to_string(),
            QueueError::UnknownMessageType(kind) => format!("Unknown message type: {kind}"),
            QueueError::Invite(e) => e.to_string(),
            QueueError::QueueFull => "Queue is full, please try again later".to_string(),
            QueueError::NotSessionHolder => "You do not hold the active session".to_string(),
            QueueError::Config(_) | QueueError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

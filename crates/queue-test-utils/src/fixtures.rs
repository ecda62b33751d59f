//! Coordinator and client fixtures.
//!
//! `TestCoordinator` spawns a real `SessionCoordinator` with a fixed test
//! secret. `TestClient` stands in for a socket: it owns the receiving end of
//! the outbound channel the gateway would normally drain.

use common::secret::SecretBox;
use common::types::{ClientId, SessionId};
use queue_service::actors::coordinator::{CoordinatorSettings, SessionCoordinator};
use queue_service::actors::{SessionBindingManager, SessionCoordinatorHandle};
use queue_service::invite::{InviteValidator, RevocationListValidator};
use queue_service::protocol::{RevokeReason, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Base64 of a 35-byte secret, usable as `QUEUE_SESSION_SECRET`.
pub const TEST_SESSION_SECRET_B64: &str = "dGVzdC1zZWNyZXQtdGhhdC1pcy1hdC1sZWFzdC0zMi1ieXRlcw==";

/// Invite token accepted by the default validator.
pub const TEST_INVITE: &str = "demo-invite";

/// Outbound buffer for test clients; large enough that tests never fill it.
const TEST_OUTBOUND_BUFFER: usize = 256;

/// Binding manager keyed with a fixed 32-byte secret.
#[must_use]
pub fn test_binding_manager() -> SessionBindingManager {
    SessionBindingManager::new(&SecretBox::new(Box::new(vec![0x42u8; 32])))
        .expect("32-byte secret is valid")
}

/// Let spawned tasks run without moving the paused clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// A spawned coordinator plus the means to stop it.
pub struct TestCoordinator {
    pub handle: SessionCoordinatorHandle,
    pub task: JoinHandle<()>,
    pub cancel_token: CancellationToken,
}

impl TestCoordinator {
    #[must_use]
    pub fn builder() -> TestCoordinatorBuilder {
        TestCoordinatorBuilder::default()
    }

    /// Cancel and wait for the actor to finish its shutdown pass.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        self.task.await.expect("coordinator task panicked");
    }
}

/// Builder for [`TestCoordinator`].
pub struct TestCoordinatorBuilder {
    settings: CoordinatorSettings,
    validator: Arc<dyn InviteValidator>,
}

impl Default for TestCoordinatorBuilder {
    fn default() -> Self {
        Self {
            settings: CoordinatorSettings {
                grace_period: Duration::from_secs(30),
                session_timeout: Duration::from_secs(3600),
                max_queue_size: 10,
            },
            validator: Arc::new(RevocationListValidator::default()),
        }
    }
}

impl TestCoordinatorBuilder {
    #[must_use]
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.settings.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn session_timeout(mut self, session_timeout: Duration) -> Self {
        self.settings.session_timeout = session_timeout;
        self
    }

    #[must_use]
    pub fn max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.settings.max_queue_size = max_queue_size;
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn InviteValidator>) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn spawn(self) -> TestCoordinator {
        let cancel_token = CancellationToken::new();
        let (handle, task) = SessionCoordinator::spawn(
            self.settings,
            self.validator,
            test_binding_manager(),
            cancel_token.clone(),
        );
        TestCoordinator {
            handle,
            task,
            cancel_token,
        }
    }
}

/// Session details from a `session_granted` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub session_id: SessionId,
    pub reconnect_token: String,
    pub resumed: bool,
}

/// In-process stand-in for a connected socket.
pub struct TestClient {
    pub id: ClientId,
    rx: mpsc::Receiver<ServerMessage>,
}

impl TestClient {
    /// Register a fresh client and consume its initial `status`.
    pub async fn connect(handle: &SessionCoordinatorHandle) -> Self {
        let id = ClientId::new();
        let (tx, mut rx) = mpsc::channel(TEST_OUTBOUND_BUFFER);
        handle
            .connect(id, "127.0.0.1".to_string(), tx)
            .await
            .expect("connect failed");

        match rx.recv().await {
            Some(ServerMessage::Status { .. }) => {}
            other => panic!("expected initial status, got {other:?}"),
        }

        Self { id, rx }
    }

    pub async fn join(&self, handle: &SessionCoordinatorHandle, invite_token: &str) {
        handle
            .join_queue(self.id, invite_token.to_string())
            .await
            .expect("join_queue not delivered");
    }

    pub async fn disconnect(&self, handle: &SessionCoordinatorHandle) {
        handle
            .disconnect(self.id)
            .await
            .expect("disconnect not delivered");
    }

    /// Everything delivered so far.
    ///
    /// Round-trips a status query first so every message sent before this
    /// call has been handled by the coordinator.
    pub async fn drain(&mut self, handle: &SessionCoordinatorHandle) -> Vec<ServerMessage> {
        handle.get_status().await.expect("coordinator stopped");
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Wait for the next message. `None` once the coordinator has dropped
    /// this client's sender.
    pub async fn next(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Drain and return the grant, if one was delivered.
    pub async fn granted(&mut self, handle: &SessionCoordinatorHandle) -> Option<Grant> {
        self.drain(handle).await.into_iter().find_map(|m| match m {
            ServerMessage::SessionGranted {
                session_id,
                reconnect_token,
                resumed,
            } => Some(Grant {
                session_id,
                reconnect_token,
                resumed,
            }),
            _ => None,
        })
    }

    /// Drain and panic unless a grant was delivered.
    pub async fn expect_granted(&mut self, handle: &SessionCoordinatorHandle) -> Grant {
        self.granted(handle).await.expect("expected session_granted")
    }

    /// Drain and return the last queue position reported, if any.
    pub async fn last_position(&mut self, handle: &SessionCoordinatorHandle) -> Option<usize> {
        self.drain(handle)
            .await
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::QueueUpdate { position, .. } => Some(position),
                _ => None,
            })
            .last()
    }

    /// Drain and return the revoke reason, if one was delivered.
    pub async fn revoked(&mut self, handle: &SessionCoordinatorHandle) -> Option<RevokeReason> {
        self.drain(handle).await.into_iter().find_map(|m| match m {
            ServerMessage::SessionRevoked { reason } => Some(reason),
            _ => None,
        })
    }
}

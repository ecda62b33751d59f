//! `SessionCoordinator` - singleton actor that owns admission state.
//!
//! The coordinator owns the client registry, the admission queue and the
//! single `ActiveSession`. Every mutation runs here, one message at a time.
//!
//! # Resource lifecycle
//!
//! ```text
//! Idle ──join/promote──▶ Granted ──holder drops──▶ GracePeriod
//!  ▲                       │  ▲                        │
//!  │                       │  └──────reconnect─────────┤
//!  └──end/timeout/expiry───┴───────────────────────────┘
//! ```
//!
//! When the holder's connection drops, the session stays reserved for the
//! grace period. A reconnect with the current token resumes it under the same
//! session id; otherwise the grace timer ends it and the queue head is promoted.

use crate::broadcast::{self, send_to};
use crate::config::Config;
use crate::errors::{InviteError, QueueError};
use crate::invite::InviteValidator;
use crate::observability::metrics;
use crate::protocol::{RevokeReason, ServerMessage};
use crate::queue::AdmissionQueue;
use crate::registry::{Client, ClientRegistry, ClientState, Outbound};

use super::messages::{CoordinatorMessage, CoordinatorStatus};
use super::metrics::{ActorType, MailboxMonitor};
use super::session::SessionBindingManager;
use super::timer::TimerHandle;

use chrono::Utc;
use common::types::{ClientId, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1024;

/// Timing and capacity knobs for the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub grace_period: Duration,
    pub session_timeout: Duration,
    pub max_queue_size: usize,
}

impl CoordinatorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            grace_period: config.grace_period,
            session_timeout: config.session_timeout,
            max_queue_size: config.max_queue_size,
        }
    }
}

/// Handle to the `SessionCoordinator`.
#[derive(Clone)]
pub struct SessionCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl SessionCoordinatorHandle {
    /// Register a new client. The client receives the initial `status`.
    pub async fn connect(
        &self,
        client_id: ClientId,
        source_address: String,
        outbound: Outbound,
    ) -> Result<(), QueueError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Connect {
            client_id,
            source_address,
            outbound,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| QueueError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn join_queue(
        &self,
        client_id: ClientId,
        invite_token: String,
    ) -> Result<(), QueueError> {
        self.send(CoordinatorMessage::JoinQueue {
            client_id,
            invite_token,
        })
        .await
    }

    pub async fn leave_queue(&self, client_id: ClientId) -> Result<(), QueueError> {
        self.send(CoordinatorMessage::LeaveQueue { client_id }).await
    }

    pub async fn reconnect(
        &self,
        client_id: ClientId,
        previous_session_token: String,
        invite_token: Option<String>,
    ) -> Result<(), QueueError> {
        self.send(CoordinatorMessage::Reconnect {
            client_id,
            previous_session_token,
            invite_token,
        })
        .await
    }

    pub async fn end_session(&self, client_id: ClientId) -> Result<(), QueueError> {
        self.send(CoordinatorMessage::EndSession { client_id }).await
    }

    pub async fn disconnect(&self, client_id: ClientId) -> Result<(), QueueError> {
        self.send(CoordinatorMessage::Disconnect { client_id }).await
    }

    pub async fn get_status(&self) -> Result<CoordinatorStatus, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| QueueError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the coordinator.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: CoordinatorMessage) -> Result<(), QueueError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| QueueError::Internal(format!("channel send failed: {e}")))
    }
}

/// The single granted session.
#[derive(Debug)]
struct ActiveSession {
    session_id: SessionId,
    /// Current holder. Kept across the grace period after the client entry
    /// is gone.
    client_id: ClientId,
    started_at: Instant,
    disconnected_at: Option<Instant>,
    awaiting_reconnect: bool,
    /// Present exactly while `awaiting_reconnect`.
    grace_timer: Option<TimerHandle>,
    session_timer: Option<TimerHandle>,
    /// Nonce of the only reconnect token currently accepted.
    reconnect_nonce: String,
}

/// The `SessionCoordinator` implementation.
pub struct SessionCoordinator {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Timers post back through this; weak so the mailbox can still close.
    mailbox_sender: mpsc::WeakSender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    settings: CoordinatorSettings,
    registry: ClientRegistry,
    queue: AdmissionQueue,
    active: Option<ActiveSession>,
    validator: Arc<dyn InviteValidator>,
    binding_manager: SessionBindingManager,
    /// Last timer generation handed out.
    timer_generation: u64,
    mailbox: MailboxMonitor,
}

impl SessionCoordinator {
    /// Spawn the coordinator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        settings: CoordinatorSettings,
        validator: Arc<dyn InviteValidator>,
        binding_manager: SessionBindingManager,
        cancel_token: CancellationToken,
    ) -> (SessionCoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            mailbox_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            settings,
            registry: ClientRegistry::new(),
            queue: AdmissionQueue::new(),
            active: None,
            validator,
            binding_manager,
            timer_generation: 0,
            mailbox: MailboxMonitor::new(ActorType::Coordinator, "coordinator"),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionCoordinatorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "queue.actor.coordinator")]
    async fn run(mut self) {
        info!(
            target: "queue.actor.coordinator",
            grace_period_secs = self.settings.grace_period.as_secs(),
            session_timeout_secs = self.settings.session_timeout.as_secs(),
            max_queue_size = self.settings.max_queue_size,
            "SessionCoordinator started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "queue.actor.coordinator",
                        "SessionCoordinator received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_processed(self.receiver.len());
                            self.handle_message(message);
                        }
                        None => {
                            info!(
                                target: "queue.actor.coordinator",
                                "SessionCoordinator channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "queue.actor.coordinator",
            clients = self.registry.len(),
            queued = self.queue.size(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionCoordinator stopped"
        );
    }

    fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Connect {
                client_id,
                source_address,
                outbound,
                respond_to,
            } => {
                let result = self.handle_connect(client_id, source_address, outbound);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::JoinQueue {
                client_id,
                invite_token,
            } => self.handle_join(client_id, &invite_token),

            CoordinatorMessage::LeaveQueue { client_id } => self.handle_leave(client_id),

            CoordinatorMessage::Reconnect {
                client_id,
                previous_session_token,
                invite_token,
            } => self.handle_reconnect(client_id, &previous_session_token, invite_token),

            CoordinatorMessage::EndSession { client_id } => self.handle_end_request(client_id),

            CoordinatorMessage::Disconnect { client_id } => self.handle_disconnect(client_id),

            CoordinatorMessage::GraceExpired { generation } => {
                self.handle_grace_expired(generation);
            }

            CoordinatorMessage::SessionTimeout { generation } => {
                self.handle_session_timeout(generation);
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    fn handle_connect(
        &mut self,
        client_id: ClientId,
        source_address: String,
        outbound: Outbound,
    ) -> Result<(), QueueError> {
        if !self
            .registry
            .register(Client::new(client_id, source_address, outbound))
        {
            return Err(QueueError::Internal(format!(
                "client {client_id} already registered"
            )));
        }

        if let Some(client) = self.registry.get(&client_id) {
            send_to(
                client,
                ServerMessage::Status {
                    queue_size: self.queue.size(),
                    session_active: self.active.is_some(),
                },
            );
            debug!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                source_address = %client.source_address,
                "Client registered"
            );
        }

        self.update_gauges();
        Ok(())
    }

    #[instrument(skip_all, fields(client_id = %client_id))]
    fn handle_join(&mut self, client_id: ClientId, invite_token: &str) {
        let Some(state) = self.registry.state_of(&client_id) else {
            debug!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                "Join from unknown client ignored"
            );
            return;
        };

        if let Err(e) = self.validator.validate(invite_token) {
            info!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                reason = %e,
                "Join rejected: invalid invite"
            );
            self.send_error(client_id, &QueueError::Invite(e));
            return;
        }

        match state {
            ClientState::Active => {
                debug!(
                    target: "queue.actor.coordinator",
                    client_id = %client_id,
                    "Join from session holder ignored"
                );
                return;
            }
            ClientState::Queued => {
                if let (Some(client), Some(position)) = (
                    self.registry.get(&client_id),
                    self.queue.position_of(&client_id),
                ) {
                    send_to(
                        client,
                        ServerMessage::QueueUpdate {
                            position,
                            queue_size: self.queue.size(),
                        },
                    );
                }
                return;
            }
            ClientState::Connected => {}
        }

        if self.active.is_some() && self.queue.size() >= self.settings.max_queue_size {
            info!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                queue_size = self.queue.size(),
                "Join rejected: queue full"
            );
            self.send_error(client_id, &QueueError::QueueFull);
            return;
        }

        if let Some(client) = self.registry.get_mut(&client_id) {
            client.set_invite_token(invite_token);
            client.joined_at = Some(Utc::now());
        }

        if self.active.is_none() {
            if self.grant_session(client_id) {
                self.publish_changes(Some(client_id));
            }
            return;
        }

        self.queue.enqueue(client_id);
        if let Some(client) = self.registry.get_mut(&client_id) {
            client.state = ClientState::Queued;
        }

        info!(
            target: "queue.actor.coordinator",
            client_id = %client_id,
            position = self.queue.size(),
            "Client queued"
        );

        self.publish_changes(None);
    }

    fn handle_leave(&mut self, client_id: ClientId) {
        if self.registry.state_of(&client_id) != Some(ClientState::Queued) {
            debug!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                "Leave from client not in queue ignored"
            );
            return;
        }

        self.queue.remove(&client_id);
        if let Some(client) = self.registry.get_mut(&client_id) {
            client.state = ClientState::Connected;
            client.joined_at = None;
        }

        info!(
            target: "queue.actor.coordinator",
            client_id = %client_id,
            queue_size = self.queue.size(),
            "Client left queue"
        );

        self.publish_changes(None);
    }

    #[instrument(skip_all, fields(client_id = %client_id))]
    fn handle_disconnect(&mut self, client_id: ClientId) {
        let Some(client) = self.registry.remove(&client_id) else {
            debug!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                "Disconnect from unknown client ignored"
            );
            return;
        };

        debug!(
            target: "queue.actor.coordinator",
            client_id = %client_id,
            state = ?client.state,
            "Client disconnected"
        );

        match client.state {
            ClientState::Connected => self.update_gauges(),
            ClientState::Queued => {
                self.queue.remove(&client_id);
                self.publish_changes(None);
            }
            ClientState::Active => {
                self.begin_grace_period(client_id);
                self.update_gauges();
            }
        }
    }

    fn begin_grace_period(&mut self, client_id: ClientId) {
        let generation = self.next_generation();
        let grace_period = self.settings.grace_period;
        let parent = self.cancel_token.clone();
        let mailbox = self.mailbox_sender.clone();

        let holds_session = self
            .active
            .as_ref()
            .is_some_and(|session| session.client_id == client_id);
        debug_assert!(holds_session, "active client {client_id} does not hold the session");

        let Some(session) = self.active.as_mut().filter(|_| holds_session) else {
            error!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                "Active client has no matching session"
            );
            return;
        };

        session.disconnected_at = Some(Instant::now());
        session.awaiting_reconnect = true;
        // Replacing the handle cancels any earlier grace timer.
        session.grace_timer = Some(TimerHandle::schedule(
            grace_period,
            generation,
            mailbox,
            CoordinatorMessage::GraceExpired { generation },
            &parent,
        ));

        info!(
            target: "queue.actor.coordinator",
            client_id = %client_id,
            session_id = %session.session_id,
            grace_period_secs = grace_period.as_secs(),
            "Holder disconnected, grace period started"
        );
    }

    #[instrument(skip_all, fields(client_id = %client_id))]
    fn handle_reconnect(
        &mut self,
        client_id: ClientId,
        previous_session_token: &str,
        invite_token: Option<String>,
    ) {
        let resumable = self.registry.state_of(&client_id) == Some(ClientState::Connected)
            && self.active.as_ref().is_some_and(|session| {
                session.awaiting_reconnect
                    && self.binding_manager.validate_token(
                        &session.session_id,
                        &session.reconnect_nonce,
                        previous_session_token,
                    )
            });

        if resumable {
            self.resume_session(client_id);
            return;
        }

        debug!(
            target: "queue.actor.coordinator",
            client_id = %client_id,
            "Reconnect not resumable, treating as join"
        );

        match invite_token {
            Some(token) => self.handle_join(client_id, &token),
            None => self.send_error(client_id, &QueueError::Invite(InviteError::Missing)),
        }
    }

    fn resume_session(&mut self, client_id: ClientId) {
        let Some(session_id) = self.active.as_ref().map(|session| session.session_id) else {
            return;
        };

        let issued = match self.binding_manager.generate_token(&session_id) {
            Ok(issued) => issued,
            Err(e) => {
                error!(
                    target: "queue.actor.coordinator",
                    client_id = %client_id,
                    error = %e,
                    "Failed to rotate reconnect token"
                );
                self.send_error(client_id, &e);
                return;
            }
        };

        // Nothing is committed until the resume is delivered, so the previous
        // token stays valid and the grace timer keeps running on failure.
        let delivered = self.registry.get(&client_id).is_some_and(|client| {
            send_to(
                client,
                ServerMessage::SessionGranted {
                    session_id,
                    reconnect_token: issued.token,
                    resumed: true,
                },
            )
        });
        if !delivered {
            self.evict_undeliverable(client_id, "resume");
            return;
        }

        let Some(session) = self.active.as_mut() else {
            return;
        };
        let downtime = session
            .disconnected_at
            .take()
            .map(|at| at.elapsed())
            .unwrap_or_default();
        session.grace_timer = None;
        session.awaiting_reconnect = false;
        session.client_id = client_id;
        session.reconnect_nonce = issued.nonce;

        if let Some(client) = self.registry.get_mut(&client_id) {
            client.state = ClientState::Active;
        }

        metrics::record_session_started(true);
        info!(
            target: "queue.actor.coordinator",
            client_id = %client_id,
            session_id = %session_id,
            downtime_ms = u64::try_from(downtime.as_millis()).unwrap_or(u64::MAX),
            "Session resumed"
        );
    }

    fn handle_end_request(&mut self, client_id: ClientId) {
        let is_holder = self
            .active
            .as_ref()
            .is_some_and(|session| session.client_id == client_id && !session.awaiting_reconnect);

        if is_holder {
            self.end_session(RevokeReason::UserEnded);
        } else {
            debug!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                "End session from non-holder rejected"
            );
            self.send_error(client_id, &QueueError::NotSessionHolder);
        }
    }

    fn handle_grace_expired(&mut self, generation: u64) {
        let current = self.active.as_ref().is_some_and(|session| {
            session.awaiting_reconnect
                && session
                    .grace_timer
                    .as_ref()
                    .is_some_and(|timer| timer.generation() == generation)
        });

        if current {
            info!(
                target: "queue.actor.coordinator",
                generation,
                "Grace period expired without reconnect"
            );
            self.end_session(RevokeReason::Disconnected);
        } else {
            debug!(
                target: "queue.actor.coordinator",
                generation,
                "Stale grace timer ignored"
            );
        }
    }

    fn handle_session_timeout(&mut self, generation: u64) {
        let current = self.active.as_ref().is_some_and(|session| {
            session
                .session_timer
                .as_ref()
                .is_some_and(|timer| timer.generation() == generation)
        });

        if current {
            info!(
                target: "queue.actor.coordinator",
                generation,
                "Maximum session duration reached"
            );
            self.end_session(RevokeReason::Timeout);
        } else {
            debug!(
                target: "queue.actor.coordinator",
                generation,
                "Stale session timer ignored"
            );
        }
    }

    /// Free the resource and hand it to the queue head.
    fn end_session(&mut self, reason: RevokeReason) {
        // Dropping the session drops both timer handles, which cancels them.
        let Some(session) = self.active.take() else {
            return;
        };

        if let Some(holder) = self.registry.get_mut(&session.client_id) {
            holder.state = ClientState::Connected;
            holder.joined_at = None;
            send_to(holder, ServerMessage::SessionRevoked { reason });
        }

        metrics::record_session_ended(reason.as_str(), session.started_at.elapsed());
        info!(
            target: "queue.actor.coordinator",
            client_id = %session.client_id,
            session_id = %session.session_id,
            reason = reason.as_str(),
            "Session ended"
        );

        self.promote_next();
    }

    /// Grant the resource to the oldest queued client, if any.
    ///
    /// Candidates whose grant cannot be delivered are dropped and the next one
    /// is tried. Everyone except the promoted client then gets the new
    /// positions and occupancy; the promoted client learns both from its
    /// `session_granted`.
    fn promote_next(&mut self) {
        debug_assert!(self.active.is_none(), "promote_next called while a session exists");
        if self.active.is_some() {
            error!(
                target: "queue.actor.coordinator",
                "Promotion refused: a session is already active"
            );
            return;
        }

        let mut promoted = None;
        while let Some(next) = self.queue.pop_front() {
            let state = self.registry.state_of(&next);
            debug_assert_eq!(state, Some(ClientState::Queued), "queued id {next} not in Queued state");
            if state != Some(ClientState::Queued) {
                error!(
                    target: "queue.actor.coordinator",
                    client_id = %next,
                    "Queued id missing from registry, skipping"
                );
                continue;
            }

            if self.grant_session(next) {
                promoted = Some(next);
                break;
            }
        }

        self.publish_changes(promoted);
    }

    /// Make `client_id` the holder of a fresh session. Returns `false` if the
    /// grant was refused.
    fn grant_session(&mut self, client_id: ClientId) -> bool {
        debug_assert!(self.active.is_none(), "grant while a session exists");
        if self.active.is_some() {
            error!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                "Grant refused: a session is already active"
            );
            return false;
        }

        let session_id = SessionId::new();
        let issued = match self.binding_manager.generate_token(&session_id) {
            Ok(issued) => issued,
            Err(e) => {
                error!(
                    target: "queue.actor.coordinator",
                    client_id = %client_id,
                    error = %e,
                    "Failed to issue reconnect token"
                );
                if let Some(client) = self.registry.get_mut(&client_id) {
                    client.state = ClientState::Connected;
                }
                self.send_error(client_id, &e);
                return false;
            }
        };

        let generation = self.next_generation();
        let session_timer = TimerHandle::schedule(
            self.settings.session_timeout,
            generation,
            self.mailbox_sender.clone(),
            CoordinatorMessage::SessionTimeout { generation },
            &self.cancel_token,
        );

        let Some(client) = self.registry.get_mut(&client_id) else {
            return false;
        };
        // A grant the client never sees would hold the resource until timeout.
        if !send_to(
            client,
            ServerMessage::SessionGranted {
                session_id,
                reconnect_token: issued.token,
                resumed: false,
            },
        ) {
            drop(session_timer);
            self.evict_undeliverable(client_id, "grant");
            return false;
        }
        client.state = ClientState::Active;
        if let Some(joined_at) = client.joined_at {
            metrics::record_wait_duration((Utc::now() - joined_at).to_std().unwrap_or_default());
        }

        self.active = Some(ActiveSession {
            session_id,
            client_id,
            started_at: Instant::now(),
            disconnected_at: None,
            awaiting_reconnect: false,
            grace_timer: None,
            session_timer: Some(session_timer),
            reconnect_nonce: issued.nonce,
        });

        metrics::record_session_started(false);
        info!(
            target: "queue.actor.coordinator",
            client_id = %client_id,
            session_id = %session_id,
            "Session granted"
        );
        true
    }

    /// Broadcast positions and occupancy, then refresh gauges.
    ///
    /// `except` is a client that was just granted the session and already
    /// knows the resource is taken.
    fn publish_changes(&self, except: Option<ClientId>) {
        broadcast::broadcast_queue_update(&self.registry, &self.queue);
        broadcast::broadcast_occupancy(
            &self.registry,
            self.queue.size(),
            self.active.is_some(),
            except,
        );
        self.update_gauges();
    }

    fn update_gauges(&self) {
        metrics::set_connections_active(self.registry.len());
        metrics::set_waiting_clients(self.queue.size());
        metrics::set_session_active(self.active.is_some());
    }

    /// Drop a client whose outbound channel refused an addressed message.
    ///
    /// Removing the registry entry releases the last strong outbound sender,
    /// so the connection's writer drains and closes the socket.
    fn evict_undeliverable(&mut self, client_id: ClientId, what: &'static str) {
        if let Some(client) = self.registry.remove(&client_id) {
            warn!(
                target: "queue.actor.coordinator",
                client_id = %client_id,
                state = ?client.state,
                message = what,
                "Client not reading its connection, closing it"
            );
        }
        self.queue.remove(&client_id);
        self.update_gauges();
    }

    fn send_error(&self, client_id: ClientId, err: &QueueError) {
        if let Some(client) = self.registry.get(&client_id) {
            send_to(client, ServerMessage::error(err));
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.timer_generation += 1;
        self.timer_generation
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            queue_size: self.queue.size(),
            session_active: self.active.is_some(),
            connected_clients: self.registry.len(),
            awaiting_reconnect: self
                .active
                .as_ref()
                .is_some_and(|session| session.awaiting_reconnect),
        }
    }

    /// Revoke the active session without promoting anyone.
    fn graceful_shutdown(&mut self) {
        info!(
            target: "queue.actor.coordinator",
            clients = self.registry.len(),
            queued = self.queue.size(),
            "Performing graceful shutdown"
        );

        if let Some(session) = self.active.take() {
            if let Some(holder) = self.registry.get(&session.client_id) {
                send_to(
                    holder,
                    ServerMessage::SessionRevoked {
                        reason: RevokeReason::Shutdown,
                    },
                );
            }
            metrics::record_session_ended(
                RevokeReason::Shutdown.as_str(),
                session.started_at.elapsed(),
            );
        }

        if !self.queue.is_empty() {
            warn!(
                target: "queue.actor.coordinator",
                queued = self.queue.size(),
                "Shutting down with clients still queued"
            );
        }
        metrics::set_session_active(false);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::invite::RevocationListValidator;
    use common::secret::SecretBox;

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            grace_period: Duration::from_secs(30),
            session_timeout: Duration::from_secs(3600),
            max_queue_size: 2,
        }
    }

    fn spawn(settings: CoordinatorSettings) -> SessionCoordinatorHandle {
        let binding_manager =
            SessionBindingManager::new(&SecretBox::new(Box::new(vec![7u8; 32]))).unwrap();
        let validator = Arc::new(RevocationListValidator::new(["revoked-invite"]));
        let (handle, _task) = SessionCoordinator::spawn(
            settings,
            validator,
            binding_manager,
            CancellationToken::new(),
        );
        handle
    }

    async fn connect(
        handle: &SessionCoordinatorHandle,
    ) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        connect_with_buffer(handle, 32).await
    }

    async fn connect_with_buffer(
        handle: &SessionCoordinatorHandle,
        buffer: usize,
    ) -> (ClientId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        let id = ClientId::new();
        handle
            .connect(id, "127.0.0.1".to_string(), tx)
            .await
            .unwrap();
        (id, rx)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_connect_sends_initial_status() {
        let handle = spawn(settings());
        let (_id, mut rx) = connect(&handle).await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::Status {
                queue_size: 0,
                session_active: false
            }]
        );

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.connected_clients, 1);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_connect_rejected() {
        let handle = spawn(settings());
        let (id, _rx) = connect(&handle).await;
        let (tx, _rx2) = mpsc::channel(4);

        let result = handle.connect(id, "127.0.0.1".to_string(), tx).await;
        assert!(matches!(result, Err(QueueError::Internal(_))));
        handle.cancel();
    }

    #[tokio::test]
    async fn test_join_when_idle_grants() {
        let handle = spawn(settings());
        let (a, mut rx_a) = connect(&handle).await;
        let (_b, mut rx_b) = connect(&handle).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle.join_queue(a, "invite-a".to_string()).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert!(status.session_active);
        assert_eq!(status.queue_size, 0);

        let granted = drain(&mut rx_a);
        assert!(matches!(
            granted.as_slice(),
            [ServerMessage::SessionGranted { resumed: false, .. }]
        ));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::Status {
                queue_size: 0,
                session_active: true
            }]
        );
        handle.cancel();
    }

    #[tokio::test]
    async fn test_invalid_invite_keeps_client_connected() {
        let handle = spawn(settings());
        let (a, mut rx_a) = connect(&handle).await;
        drain(&mut rx_a);

        handle.join_queue(a, "bad token!".to_string()).await.unwrap();
        handle.join_queue(a, "revoked-invite".to_string()).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert!(!status.session_active);

        assert_eq!(
            drain(&mut rx_a),
            vec![
                ServerMessage::Error {
                    message: "Invalid invite token format".to_string()
                },
                ServerMessage::Error {
                    message: "Invite token has been revoked".to_string()
                },
            ]
        );
        handle.cancel();
    }

    #[tokio::test]
    async fn test_queue_full_rejected() {
        let handle = spawn(settings());
        let mut clients = Vec::new();
        for _ in 0..4 {
            clients.push(connect(&handle).await);
        }
        for (id, _) in &clients {
            handle.join_queue(*id, "invite".to_string()).await.unwrap();
        }

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.queue_size, 2);

        let (_, last_rx) = clients.last_mut().unwrap();
        let messages = drain(last_rx);
        assert!(messages.contains(&ServerMessage::Error {
            message: "Queue is full, please try again later".to_string()
        }));
        handle.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_join_not_enqueued_twice() {
        let handle = spawn(settings());
        let (holder, _rx_h) = connect(&handle).await;
        let (waiter, mut rx_w) = connect(&handle).await;

        handle.join_queue(holder, "invite".to_string()).await.unwrap();
        handle.join_queue(holder, "invite".to_string()).await.unwrap();
        handle.join_queue(waiter, "invite".to_string()).await.unwrap();
        let _ = handle.get_status().await.unwrap();
        drain(&mut rx_w);
        handle.join_queue(waiter, "invite".to_string()).await.unwrap();

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.queue_size, 1);
        assert_eq!(
            drain(&mut rx_w),
            vec![ServerMessage::QueueUpdate {
                position: 1,
                queue_size: 1
            }]
        );
        handle.cancel();
    }

    #[tokio::test]
    async fn test_leave_queue_is_noop_when_not_queued() {
        let handle = spawn(settings());
        let (a, mut rx_a) = connect(&handle).await;
        drain(&mut rx_a);

        handle.leave_queue(a).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.queue_size, 0);
        assert!(drain(&mut rx_a).is_empty());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_end_session_from_non_holder_rejected() {
        let handle = spawn(settings());
        let (holder, _rx_h) = connect(&handle).await;
        let (other, mut rx_o) = connect(&handle).await;

        handle.join_queue(holder, "invite".to_string()).await.unwrap();
        let _ = handle.get_status().await.unwrap();
        drain(&mut rx_o);
        handle.end_session(other).await.unwrap();
        let status = handle.get_status().await.unwrap();

        assert!(status.session_active);
        assert_eq!(
            drain(&mut rx_o),
            vec![ServerMessage::Error {
                message: "You do not hold the active session".to_string()
            }]
        );
        handle.cancel();
    }

    #[tokio::test]
    async fn test_end_session_promotes_head() {
        let handle = spawn(settings());
        let (holder, mut rx_h) = connect(&handle).await;
        let (waiter, mut rx_w) = connect(&handle).await;

        handle.join_queue(holder, "invite".to_string()).await.unwrap();
        handle.join_queue(waiter, "invite".to_string()).await.unwrap();
        let _ = handle.get_status().await.unwrap();
        drain(&mut rx_h);
        drain(&mut rx_w);

        handle.end_session(holder).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert!(status.session_active);
        assert_eq!(status.queue_size, 0);

        let holder_messages = drain(&mut rx_h);
        assert!(holder_messages.contains(&ServerMessage::SessionRevoked {
            reason: RevokeReason::UserEnded
        }));
        // The promoted client learns occupancy from the grant alone.
        assert!(matches!(
            drain(&mut rx_w).as_slice(),
            [ServerMessage::SessionGranted { resumed: false, .. }]
        ));
        handle.cancel();
    }

    #[tokio::test]
    async fn test_leave_queue_updates_positions() {
        let handle = spawn(CoordinatorSettings {
            max_queue_size: 10,
            ..settings()
        });
        let (holder, _rx_h) = connect(&handle).await;
        let (a, mut rx_a) = connect(&handle).await;
        let (b, mut rx_b) = connect(&handle).await;
        let (c, mut rx_c) = connect(&handle).await;

        handle.join_queue(holder, "invite".to_string()).await.unwrap();
        for id in [a, b, c] {
            handle.join_queue(id, "invite".to_string()).await.unwrap();
        }
        let _ = handle.get_status().await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        handle.leave_queue(b).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.queue_size, 2);

        assert!(drain(&mut rx_c).contains(&ServerMessage::QueueUpdate {
            position: 2,
            queue_size: 2
        }));
        assert!(drain(&mut rx_a).contains(&ServerMessage::QueueUpdate {
            position: 1,
            queue_size: 2
        }));
        // B is Connected again: occupancy only, no position.
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::Status {
                queue_size: 2,
                session_active: true
            }]
        );

        handle.join_queue(b, "invite".to_string()).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.queue_size, 3);
        assert!(drain(&mut rx_b).contains(&ServerMessage::QueueUpdate {
            position: 3,
            queue_size: 3
        }));
        handle.cancel();
    }

    #[tokio::test]
    async fn test_undeliverable_grant_skips_to_next_waiter() {
        let handle = spawn(CoordinatorSettings {
            max_queue_size: 10,
            ..settings()
        });
        let (holder, _rx_h) = connect(&handle).await;
        handle.join_queue(holder, "invite".to_string()).await.unwrap();

        // Room for the initial status, one position and one occupancy update.
        let (stalled, mut rx_stalled) = connect_with_buffer(&handle, 3).await;
        let (next, mut rx_next) = connect(&handle).await;
        handle.join_queue(stalled, "invite".to_string()).await.unwrap();
        handle.join_queue(next, "invite".to_string()).await.unwrap();
        let _ = handle.get_status().await.unwrap();
        drain(&mut rx_next);

        handle.end_session(holder).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert!(status.session_active);
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.connected_clients, 2);

        assert!(drain(&mut rx_next)
            .iter()
            .any(|m| matches!(m, ServerMessage::SessionGranted { resumed: false, .. })));

        // The stalled client was dropped: buffered messages, then closed.
        let stalled_messages = drain(&mut rx_stalled);
        assert_eq!(stalled_messages.len(), 3);
        assert!(!stalled_messages
            .iter()
            .any(|m| matches!(m, ServerMessage::SessionGranted { .. })));
        assert!(rx_stalled.recv().await.is_none());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_undeliverable_grant_when_idle_leaves_resource_free() {
        let handle = spawn(settings());
        let (stalled, mut rx_stalled) = connect_with_buffer(&handle, 1).await;

        handle.join_queue(stalled, "invite".to_string()).await.unwrap();
        let status = handle.get_status().await.unwrap();

        assert!(!status.session_active);
        assert_eq!(status.connected_clients, 0);
        assert_eq!(
            drain(&mut rx_stalled),
            vec![ServerMessage::Status {
                queue_size: 0,
                session_active: false
            }]
        );
        assert!(rx_stalled.recv().await.is_none());
        handle.cancel();
    }

    #[tokio::test]
    async fn test_undeliverable_resume_keeps_token_valid() {
        let handle = spawn(settings());
        let (holder, mut rx_h) = connect(&handle).await;
        handle.join_queue(holder, "invite".to_string()).await.unwrap();
        let _ = handle.get_status().await.unwrap();
        let token = drain(&mut rx_h)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::SessionGranted {
                    reconnect_token, ..
                } => Some(reconnect_token),
                _ => None,
            })
            .unwrap();
        handle.disconnect(holder).await.unwrap();

        // Initial status fills the buffer.
        let (stalled, _rx_stalled) = connect_with_buffer(&handle, 1).await;
        handle.reconnect(stalled, token.clone(), None).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert!(status.awaiting_reconnect);
        assert_eq!(status.connected_clients, 0);

        let (retry, mut rx_retry) = connect(&handle).await;
        drain(&mut rx_retry);
        handle.reconnect(retry, token, None).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert!(!status.awaiting_reconnect);
        assert!(drain(&mut rx_retry)
            .iter()
            .any(|m| matches!(m, ServerMessage::SessionGranted { resumed: true, .. })));
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_timeout_revokes() {
        let handle = spawn(CoordinatorSettings {
            session_timeout: Duration::from_secs(60),
            ..settings()
        });
        let (holder, mut rx_h) = connect(&handle).await;
        handle.join_queue(holder, "invite".to_string()).await.unwrap();
        settle().await;
        drain(&mut rx_h);

        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;

        let status = handle.get_status().await.unwrap();
        assert!(!status.session_active);
        assert_eq!(
            drain(&mut rx_h),
            vec![
                ServerMessage::SessionRevoked {
                    reason: RevokeReason::Timeout
                },
                ServerMessage::Status {
                    queue_size: 0,
                    session_active: false
                },
            ]
        );
        handle.cancel();
    }

    #[tokio::test]
    async fn test_reconnect_without_grace_falls_back_to_join() {
        let handle = spawn(settings());
        let (a, mut rx_a) = connect(&handle).await;
        drain(&mut rx_a);

        handle
            .reconnect(a, "00.ff".to_string(), Some("invite".to_string()))
            .await
            .unwrap();
        let status = handle.get_status().await.unwrap();
        assert!(status.session_active);
        assert!(drain(&mut rx_a)
            .iter()
            .any(|m| matches!(m, ServerMessage::SessionGranted { resumed: false, .. })));

        let (b, mut rx_b) = connect(&handle).await;
        drain(&mut rx_b);
        handle.reconnect(b, "00.ff".to_string(), None).await.unwrap();
        let _ = handle.get_status().await.unwrap();
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::Error {
                message: "Invite token required".to_string()
            }]
        );
        handle.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_revokes_holder() {
        let handle = spawn(settings());
        let (holder, mut rx_h) = connect(&handle).await;
        handle.join_queue(holder, "invite".to_string()).await.unwrap();
        let _ = handle.get_status().await.unwrap();
        drain(&mut rx_h);

        handle.cancel();
        settle().await;

        assert_eq!(
            drain(&mut rx_h),
            vec![ServerMessage::SessionRevoked {
                reason: RevokeReason::Shutdown
            }]
        );
        assert!(handle.get_status().await.is_err());
    }
}

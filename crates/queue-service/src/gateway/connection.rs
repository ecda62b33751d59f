//! Per-socket connection loop.
//!
//! Each admitted socket is split into:
//! - a writer task draining the client's outbound channel into the sink
//! - the reader loop, which parses frames and forwards them to the coordinator
//!
//! # Lifecycle
//!
//! 1. Registered with the coordinator, which sends the initial `status`
//! 2. Runs until the peer closes, the socket errors, or the gateway is cancelled
//! 3. Always ends with a `Disconnect` so the coordinator can clean up
//!
//! The coordinator's registry entry holds the only strong outbound sender.
//! When the coordinator drops a client, the writer drains what is buffered,
//! closes the socket and stops the reader.

use crate::actors::{ActorType, MailboxMonitor, SessionCoordinatorHandle};
use crate::errors::QueueError;
use crate::protocol::{parse_client_message, ClientMessage, ServerMessage};

use super::GatewayState;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use common::types::ClientId;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Outbound channel depth per client.
const OUTBOUND_BUFFER: usize = 64;

/// How long to wait for the writer to flush after the reader stops.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Close a socket that failed admission. Nothing was registered.
pub async fn reject(mut socket: WebSocket, code: u16, reason: String) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(target: "queue.gateway", error = %e, "Failed to send close frame");
    }
}

/// Serve an admitted socket until it closes.
#[instrument(skip_all, name = "queue.gateway.connection", fields(client_id))]
pub async fn serve(socket: WebSocket, state: Arc<GatewayState>, source_address: String) {
    let client_id = ClientId::new();
    tracing::Span::current().record("client_id", tracing::field::display(client_id));

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let outbound = outbound_tx.downgrade();

    if let Err(e) = state
        .coordinator
        .connect(client_id, source_address.clone(), outbound_tx)
        .await
    {
        warn!(
            target: "queue.gateway",
            client_id = %client_id,
            error = %e,
            "Coordinator refused registration"
        );
        reject(socket, 1011, e.client_message()).await;
        return;
    }

    state.actor_metrics.connection_created();
    info!(
        target: "queue.gateway",
        client_id = %client_id,
        source_address = %source_address,
        "Client connected"
    );

    let (mut sink, mut stream) = socket.split();
    let cancel_token = state.cancel_token.child_token();
    let writer_done = cancel_token.clone();

    let writer = tokio::spawn(async move {
        // Stops the reader however the writer exits.
        let _stop_reader = writer_done.drop_guard();
        let mailbox = MailboxMonitor::new(ActorType::Connection, client_id.to_string());
        while let Some(message) = outbound_rx.recv().await {
            mailbox.record_processed(outbound_rx.len());
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "queue.gateway", error = %e, "Failed to serialize message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "queue.gateway", client_id = %client_id, "Connection closed by server");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Some(outbound_tx) = outbound.upgrade() else {
                            break;
                        };
                        if let Err(e) =
                            handle_frame(&state.coordinator, client_id, &outbound_tx, &text).await
                        {
                            warn!(
                                target: "queue.gateway",
                                client_id = %client_id,
                                error = %e,
                                "Coordinator unavailable, closing connection"
                            );
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let err = QueueError::InvalidMessage("binary frame".to_string());
                        if let Some(outbound_tx) = outbound.upgrade() {
                            let _ = outbound_tx.try_send(ServerMessage::error(&err));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong are answered by the protocol layer.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "queue.gateway",
                            client_id = %client_id,
                            error = %e,
                            "Socket read failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = state.coordinator.disconnect(client_id).await {
        debug!(
            target: "queue.gateway",
            client_id = %client_id,
            error = %e,
            "Disconnect not delivered"
        );
    }
    drop(outbound);

    match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_panic() => state.actor_metrics.record_panic(ActorType::Connection),
        Ok(Err(_)) => {}
        Err(_) => {
            warn!(
                target: "queue.gateway",
                client_id = %client_id,
                "Writer shutdown timed out"
            );
        }
    }

    state.actor_metrics.connection_closed();
    info!(target: "queue.gateway", client_id = %client_id, "Client disconnected");
}

/// Handle one inbound text frame.
///
/// Protocol errors are answered on `outbound`; only a dead coordinator is
/// returned as an error.
pub async fn handle_frame(
    coordinator: &SessionCoordinatorHandle,
    client_id: ClientId,
    outbound: &mpsc::Sender<ServerMessage>,
    text: &str,
) -> Result<(), QueueError> {
    let message = match parse_client_message(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(
                target: "queue.gateway",
                client_id = %client_id,
                error = %e,
                "Rejected inbound frame"
            );
            let _ = outbound.try_send(ServerMessage::error(&e));
            return Ok(());
        }
    };

    match message {
        ClientMessage::Heartbeat => {
            let _ = outbound.try_send(ServerMessage::HeartbeatAck);
            Ok(())
        }
        ClientMessage::JoinQueue { invite_token } => {
            coordinator.join_queue(client_id, invite_token).await
        }
        ClientMessage::LeaveQueue => coordinator.leave_queue(client_id).await,
        ClientMessage::Reconnect {
            previous_session_token,
            invite_token,
        } => {
            coordinator
                .reconnect(client_id, previous_session_token, invite_token)
                .await
        }
        ClientMessage::EndSession => coordinator.end_session(client_id).await,
    }
}

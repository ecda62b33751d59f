//! WebSocket gateway and status API.
//!
//! Defines the Axum router for client traffic:
//! - `/ws` - WebSocket endpoint; admission checks run before registration
//! - `/api/status` - JSON occupancy snapshot from the coordinator
//!
//! Rejected sockets are still upgraded so the refusal can be delivered as a
//! close frame the browser can read.

pub mod connection;

use crate::actors::{ActorMetrics, CoordinatorStatus, SessionCoordinatorHandle};
use crate::config::Config;
use crate::observability::metrics;
use crate::protocol::{rate_limit_close_reason, CLOSE_POLICY_VIOLATION, CLOSE_RATE_LIMITED};
use crate::rate_limit::{RateDecision, RateLimiter};

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest inbound WebSocket message accepted.
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024;

/// Outcome of the admission checks for one inbound socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accept { source_address: String },
    Reject { code: u16, reason: String },
}

/// Shared state for gateway handlers.
pub struct GatewayState {
    pub coordinator: SessionCoordinatorHandle,
    pub actor_metrics: Arc<ActorMetrics>,
    /// Closes open sockets on shutdown.
    pub cancel_token: CancellationToken,
    rate_limiter: Mutex<RateLimiter>,
    allowed_origins: Vec<String>,
    trust_proxy: bool,
}

impl GatewayState {
    #[must_use]
    pub fn new(
        config: &Config,
        coordinator: SessionCoordinatorHandle,
        actor_metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            actor_metrics,
            cancel_token,
            rate_limiter: Mutex::new(RateLimiter::new(
                config.rate_limit_window,
                config.rate_limit_max_connections,
                config.rate_limit_cleanup_threshold,
            )),
            allowed_origins: config.allowed_origins.clone(),
            trust_proxy: config.trust_proxy,
        }
    }

    /// Run the rate limit and origin checks for a connection from `peer`.
    pub fn admit(&self, peer: SocketAddr, headers: &HeaderMap) -> Admission {
        let source_address = self.source_address(peer, headers);

        let decision = self
            .rate_limiter
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .check_and_record(&source_address);

        if let RateDecision::Denied {
            retry_after_seconds,
        } = decision
        {
            info!(
                target: "queue.gateway",
                source_address = %source_address,
                retry_after_seconds,
                "Connection rate limited"
            );
            metrics::record_connection_rejected("rate_limited");
            return Admission::Reject {
                code: CLOSE_RATE_LIMITED,
                reason: rate_limit_close_reason(retry_after_seconds),
            };
        }

        if let Some(origin) = headers.get(header::ORIGIN) {
            let allowed = self.allowed_origins.is_empty()
                || origin
                    .to_str()
                    .is_ok_and(|origin| self.allowed_origins.iter().any(|o| o == origin));
            if !allowed {
                warn!(
                    target: "queue.gateway",
                    source_address = %source_address,
                    origin = ?origin,
                    "Connection from disallowed origin"
                );
                metrics::record_connection_rejected("origin");
                return Admission::Reject {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "Origin not allowed".to_string(),
                };
            }
        }

        Admission::Accept { source_address }
    }

    fn source_address(&self, peer: SocketAddr, headers: &HeaderMap) -> String {
        if self.trust_proxy {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(address) = forwarded {
                return address.to_string();
            }
        }
        peer.ip().to_string()
    }
}

/// Build the client-facing router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let admission = state.admit(peer, &headers);

    ws.max_message_size(MAX_MESSAGE_BYTES)
        .max_frame_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| async move {
            match admission {
                Admission::Accept { source_address } => {
                    connection::serve(socket, state, source_address).await;
                }
                Admission::Reject { code, reason } => {
                    connection::reject(socket, code, reason).await;
                }
            }
        })
}

async fn status_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<CoordinatorStatus>, StatusCode> {
    state.coordinator.get_status().await.map(Json).map_err(|e| {
        warn!(target: "queue.gateway", error = %e, "Status query failed");
        StatusCode::SERVICE_UNAVAILABLE
    })
}

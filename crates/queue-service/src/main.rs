//! Demo Queue Service
//!
//! Single-occupancy admission queue over WebSocket.
//!
//! # Servers
//!
//! - HTTP/WebSocket server for clients: `/ws` and `/api/status` (default: 0.0.0.0:3000)
//! - HTTP server for operations: `/health`, `/ready`, `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Install the Prometheus metrics recorder
//! 4. Derive the reconnect token key from the session secret
//! 5. Spawn the `SessionCoordinator`
//! 6. Start the health server, then the client gateway
//! 7. Mark ready and wait for a shutdown signal
//!
//! # Shutdown
//!
//! Readiness goes false first, then the root cancellation token fires. The
//! coordinator revokes the active session, connection loops exit, and both
//! servers drain.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use queue_service::actors::coordinator::CoordinatorSettings;
use queue_service::actors::{ActorMetrics, ActorType, SessionBindingManager, SessionCoordinator};
use queue_service::config::Config;
use queue_service::gateway::{self, GatewayState};
use queue_service::invite::RevocationListValidator;
use queue_service::observability::{health_router, init_metrics_recorder, HealthState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the coordinator gets to revoke the session and stop.
const COORDINATOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "queue_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Demo Queue Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        grace_period_secs = config.grace_period.as_secs(),
        session_timeout_secs = config.session_timeout.as_secs(),
        max_queue_size = config.max_queue_size,
        rate_limit_window_secs = config.rate_limit_window.as_secs(),
        rate_limit_max_connections = config.rate_limit_max_connections,
        allowed_origins = config.allowed_origins.len(),
        trust_proxy = config.trust_proxy,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let session_secret = config.decode_session_secret().map_err(|e| {
        error!(error = %e, "Invalid session secret");
        e
    })?;
    let binding_manager = SessionBindingManager::new(&session_secret).map_err(|e| {
        error!(error = %e, "Failed to initialize reconnect token key");
        e
    })?;
    drop(session_secret);

    let validator = Arc::new(RevocationListValidator::new(
        config.revoked_invites.iter().cloned(),
    ));

    let root_token = CancellationToken::new();
    let actor_metrics = ActorMetrics::new();

    let (coordinator, coordinator_task) = SessionCoordinator::spawn(
        CoordinatorSettings::from_config(&config),
        validator,
        binding_manager,
        root_token.child_token(),
    );
    info!("SessionCoordinator spawned");

    // Health server (liveness, readiness, metrics)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));
    let health_token = root_token.child_token();
    let health_server = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app)
            .with_graceful_shutdown(health_token.cancelled_owned());
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Client gateway (WebSocket + status API)
    let bind_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
        error!(error = %e, addr = %bind_addr, "Failed to bind gateway");
        format!("Failed to bind gateway to {bind_addr}: {e}")
    })?;

    let gateway_state = Arc::new(GatewayState::new(
        &config,
        coordinator.clone(),
        Arc::clone(&actor_metrics),
        root_token.child_token(),
    ));
    let gateway_app = gateway::router(gateway_state);
    let gateway_token = root_token.child_token();
    let gateway_server = tokio::spawn(async move {
        info!(addr = %bind_addr, "Gateway starting");
        let server = axum::serve(
            listener,
            gateway_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(gateway_token.cancelled_owned());
        if let Err(e) = server.await {
            error!(error = %e, "Gateway server failed");
        }
    });

    health_state.set_ready();
    info!("Demo Queue Service running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();
    root_token.cancel();

    match tokio::time::timeout(COORDINATOR_SHUTDOWN_TIMEOUT, coordinator_task).await {
        Ok(Ok(())) => info!("SessionCoordinator stopped"),
        Ok(Err(e)) => {
            if e.is_panic() {
                actor_metrics.record_panic(ActorType::Coordinator);
            }
            warn!(error = %e, "SessionCoordinator task failed");
        }
        Err(_) => warn!("SessionCoordinator shutdown timed out"),
    }

    for (name, task) in [("gateway", gateway_server), ("health", health_server)] {
        if let Err(e) = task.await {
            warn!(server = name, error = %e, "Server task failed");
        }
    }

    info!("Demo Queue Service shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed, that signal is logged and ignored; the
/// other one still triggers shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

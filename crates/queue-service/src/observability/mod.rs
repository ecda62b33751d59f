//! Observability module for the queue service.
//!
//! # Privacy by Default
//!
//! Actor loops and handlers use `#[instrument(skip_all)]` with explicit safe
//! fields. Invite tokens and reconnect tokens are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `queue_connections_active` | Gauge | none | Registered WebSocket connections |
//! | `queue_waiting_clients` | Gauge | none | Admission queue length |
//! | `queue_session_active` | Gauge | none | 1 while the resource is held |
//! | `queue_sessions_started_total` | Counter | `kind` | Grants and resumes |
//! | `queue_sessions_ended_total` | Counter | `reason` | Session ends by cause |
//! | `queue_session_duration_seconds` | Histogram | none | Holder time per session |
//! | `queue_wait_duration_seconds` | Histogram | none | Join-to-grant wait |
//! | `queue_connections_rejected_total` | Counter | `reason` | Gateway refusals |
//! | `queue_broadcast_failures_total` | Counter | `message_type` | Dropped deliveries |
//! | `queue_coordinator_mailbox_depth` | Gauge | none | Pending coordinator messages |
//! | `queue_actor_panics_total` | Counter | `actor_type` | Panicked actor tasks |

pub mod health;
pub mod metrics;

// Re-exports for convenience
pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;

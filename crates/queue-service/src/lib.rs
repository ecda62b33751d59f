//! Demo Queue Service Library
//!
//! Single-occupancy admission queue over WebSocket. One client at a time holds
//! the demo session; everyone else waits in a FIFO queue and is told their
//! position as it changes.
//!
//! # Architecture
//!
//! ```text
//! WebSocket gateway (axum)
//! ├── admission: rate limit + origin allow-list
//! └── one connection loop per socket
//!         │ CoordinatorMessage
//!         ▼
//! SessionCoordinator (singleton actor)
//! ├── ClientRegistry, AdmissionQueue, ActiveSession
//! ├── grace + session timers (generation-gated)
//! └── Broadcaster (best-effort try_send fan-out)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: all admission state lives in one actor; no locks
//! - **Grace period**: a dropped holder keeps the session until the grace
//!   timer fires, and can resume it with the reconnect token
//! - **Strict FIFO**: promotion always takes the queue head
//!
//! # Modules
//!
//! - [`actors`] - Coordinator actor, timers, reconnect tokens
//! - [`broadcast`] - Queue position and occupancy fan-out
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages
//! - [`gateway`] - WebSocket endpoint and status API
//! - [`invite`] - Invite token validation
//! - [`observability`] - Health probes and Prometheus metrics
//! - [`protocol`] - Wire message types
//! - [`queue`] - FIFO with O(1) removal
//! - [`rate_limit`] - Per-address connection rate limiting
//! - [`registry`] - Live client registry

pub mod actors;
pub mod broadcast;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod invite;
pub mod observability;
pub mod protocol;
pub mod queue;
pub mod rate_limit;
pub mod registry;

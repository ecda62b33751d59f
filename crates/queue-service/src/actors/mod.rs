//! Actor model implementation for the queue service.
//!
//! ```text
//! SessionCoordinator (singleton)
//! ├── owns ClientRegistry, AdmissionQueue, ActiveSession
//! ├── schedules grace and session timers (TimerHandle)
//! └── receives CoordinatorMessage from every connection task
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: every state mutation runs inside the coordinator task
//! - **Generation-gated timers**: expiry messages carry the generation they were
//!   scheduled with and are ignored once superseded
//! - **CancellationToken propagation**: timers hang off the coordinator's token
//! - **Message passing**: all communication via `tokio::sync::mpsc` channels
//!
//! # Modules
//!
//! - [`coordinator`] - `SessionCoordinator` actor and handle
//! - [`messages`] - Message types for the coordinator mailbox
//! - [`metrics`] - Mailbox monitoring and actor counters
//! - [`session`] - Reconnect token generation and validation
//! - [`timer`] - Cancellable one-shot timers

pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod session;
pub mod timer;

// Re-export primary types
pub use coordinator::{SessionCoordinator, SessionCoordinatorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use session::SessionBindingManager;
pub use timer::TimerHandle;

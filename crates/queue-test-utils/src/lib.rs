//! # Queue Test Utilities
//!
//! Shared fixtures and mocks for exercising the queue service without a
//! network listener.
//!
//! - `fixtures` - Coordinator spawning with short timers, in-process clients
//! - `mock_invites` - Invite validators with fixed answers and call recording
//!
//! ## Usage
//!
//! ```rust,ignore
//! use queue_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let coordinator = TestCoordinator::builder()
//!         .grace_period(Duration::from_secs(30))
//!         .spawn();
//!
//!     let mut alice = TestClient::connect(&coordinator.handle).await;
//!     alice.join(&coordinator.handle, "demo-invite").await;
//!     let grant = alice.expect_granted(&coordinator.handle).await;
//! }
//! ```

pub mod fixtures;
pub mod mock_invites;

pub use fixtures::*;
pub use mock_invites::*;

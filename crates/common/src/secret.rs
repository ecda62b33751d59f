//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] wrappers used throughout the queue service.
//! `SecretString` and `SecretBox<T>` implement `Debug` with redaction, so any
//! struct deriving `Debug` that holds one is safe to log via `{:?}` or tracing.
//! Values are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct SessionKeys {
//!     service: String,
//!     session_secret: SecretString,
//! }
//!
//! let keys = SessionKeys {
//!     service: "queue".to_string(),
//!     session_secret: SecretString::from("c2VjcmV0"),
//! };
//!
//! assert!(!format!("{keys:?}").contains("c2VjcmV0"));
//! assert_eq!(keys.session_secret.expose_secret(), "c2VjcmV0");
//! ```
//!
//! # Usage Guidelines
//!
//! Use `SecretString` for:
//! - The reconnect-token signing secret (base64 in configuration)
//! - Invite tokens when they are held beyond a single validation call
//!
//! Use `SecretBox<T>` for:
//! - Decoded key material (`SecretBox<Vec<u8>>`)

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

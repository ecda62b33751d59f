//! Invite validators with fixed answers.
//!
//! # Example
//!
//! ```rust,ignore
//! use queue_test_utils::MockInviteValidator;
//!
//! let validator = MockInviteValidator::accept_all();
//! // ... spawn a coordinator with Arc::new(validator.clone()) ...
//! assert_eq!(validator.calls(), vec!["demo-invite".to_string()]);
//! ```

use queue_service::errors::InviteError;
use queue_service::invite::InviteValidator;
use std::sync::{Arc, Mutex};

/// Validator that answers every token the same way and records what it saw.
///
/// Clones share the call log, so a test can keep one copy and hand the
/// other to the coordinator.
#[derive(Debug, Clone)]
pub struct MockInviteValidator {
    answer: Result<(), InviteError>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockInviteValidator {
    /// Accept any token, including ones the real validator would reject.
    #[must_use]
    pub fn accept_all() -> Self {
        Self {
            answer: Ok(()),
            calls: Arc::default(),
        }
    }

    /// Reject every token with `error`.
    #[must_use]
    pub fn reject_all(error: InviteError) -> Self {
        Self {
            answer: Err(error),
            calls: Arc::default(),
        }
    }

    /// Tokens passed to `validate`, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl InviteValidator for MockInviteValidator {
    fn validate(&self, token: &str) -> Result<(), InviteError> {
        self.calls.lock().unwrap().push(token.to_string());
        self.answer.clone()
    }
}

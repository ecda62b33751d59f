//! Invite token validation.
//!
//! Token issuance and persistence live outside this service. The coordinator
//! only needs to know whether a presented token is well-formed and not
//! revoked, which is what [`InviteValidator`] answers.

use crate::errors::InviteError;

use std::collections::HashSet;

/// Maximum invite token length in characters.
pub const MAX_INVITE_TOKEN_LENGTH: usize = 128;

/// Validates invite tokens presented with `join_queue`.
pub trait InviteValidator: Send + Sync {
    /// Returns `Ok(())` if the token grants admission to the queue.
    fn validate(&self, token: &str) -> Result<(), InviteError>;
}

/// Checks the token alphabet and length: 1..=128 chars of `[A-Za-z0-9_-]`.
pub fn check_token_format(token: &str) -> Result<(), InviteError> {
    if token.is_empty() || token.len() > MAX_INVITE_TOKEN_LENGTH {
        return Err(InviteError::InvalidFormat);
    }

    if token
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        Ok(())
    } else {
        Err(InviteError::InvalidFormat)
    }
}

/// Validator backed by an in-memory revocation set.
#[derive(Debug, Default, Clone)]
pub struct RevocationListValidator {
    revoked: HashSet<String>,
}

impl RevocationListValidator {
    #[must_use]
    pub fn new<I, S>(revoked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            revoked: revoked.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a token to the revocation set.
    pub fn revoke(&mut self, token: impl Into<String>) {
        self.revoked.insert(token.into());
    }
}

impl InviteValidator for RevocationListValidator {
    fn validate(&self, token: &str) -> Result<(), InviteError> {
        check_token_format(token)?;

        if self.revoked.contains(token) {
            return Err(InviteError::Revoked);
        }

        Ok(())
    }
}

//! Reconnect token generation and validation.
//!
//! - **Key derivation**: `HKDF-SHA256(session_secret, salt="demo-queue", info="session-reconnect")`,
//!   done once at startup.
//! - **Generation**: `HMAC-SHA256(key, session_id || nonce)` with a fresh 16-byte nonce.
//! - **Wire form**: `"{nonce_hex}.{tag_hex}"`.
//! - **Validation**: `hmac::verify` (constant time) plus a match against the
//!   nonce currently stored on the session, so rotated tokens stop working.

use crate::errors::QueueError;

use common::secret::{ExposeSecret, SecretBox};
use common::types::SessionId;
use ring::{hkdf, hmac, rand};

/// Minimum decoded session secret length.
pub const MIN_SECRET_LENGTH: usize = 32;

const KEY_SALT: &[u8] = b"demo-queue";
const KEY_INFO: &[u8] = b"session-reconnect";
const NONCE_LENGTH: usize = 16;

/// A reconnect token as handed to the client, plus the nonce kept server-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub nonce: String,
}

/// Issues and checks reconnect tokens for the active session.
pub struct SessionBindingManager {
    key: hmac::Key,
    rng: rand::SystemRandom,
}

impl SessionBindingManager {
    /// Derive the signing key from `master_secret`.
    ///
    /// # Errors
    ///
    /// `QueueError::Config` if the secret is shorter than 32 bytes.
    pub fn new(master_secret: &SecretBox<Vec<u8>>) -> Result<Self, QueueError> {
        let secret = master_secret.expose_secret();
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(QueueError::Config(format!(
                "session secret must be at least {MIN_SECRET_LENGTH} bytes"
            )));
        }

        let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, KEY_SALT).extract(secret);
        let key: hmac::Key = prk
            .expand(&[KEY_INFO], hmac::HMAC_SHA256)
            .map_err(|_| QueueError::Internal("reconnect key derivation failed".to_string()))?
            .into();

        Ok(Self {
            key,
            rng: rand::SystemRandom::new(),
        })
    }

    /// Issue a fresh token bound to `session_id`.
    ///
    /// # Errors
    ///
    /// `QueueError::Internal` if the system RNG fails.
    pub fn generate_token(&self, session_id: &SessionId) -> Result<IssuedToken, QueueError> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::SecureRandom::fill(&self.rng, &mut nonce_bytes)
            .map_err(|_| QueueError::Internal("nonce generation failed".to_string()))?;
        let nonce = hex::encode(nonce_bytes);

        let tag = hmac::sign(&self.key, &signing_input(session_id, &nonce));
        Ok(IssuedToken {
            token: format!("{nonce}.{}", hex::encode(tag.as_ref())),
            nonce,
        })
    }

    /// True if `token` was issued for `session_id` with `expected_nonce`.
    #[must_use]
    pub fn validate_token(&self, session_id: &SessionId, expected_nonce: &str, token: &str) -> bool {
        let Some((nonce, tag_hex)) = token.split_once('.') else {
            return false;
        };
        if nonce != expected_nonce {
            return false;
        }
        let Ok(tag) = hex::decode(tag_hex) else {
            return false;
        };

        hmac::verify(&self.key, &signing_input(session_id, nonce), &tag).is_ok()
    }
}

fn signing_input(session_id: &SessionId, nonce: &str) -> Vec<u8> {
    let mut input = Vec::with_capacity(16 + nonce.len());
    input.extend_from_slice(session_id.0.as_bytes());
    input.extend_from_slice(nonce.as_bytes());
    input
}

//! Queue service configuration.
//!
//! Configuration is loaded from environment variables. The session secret is
//! redacted in Debug output.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::secret::{ExposeSecret, SecretBox, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket + status API bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default holder disconnect grace period in seconds.
pub const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 30;

/// Default maximum session duration in seconds (60 minutes).
pub const DEFAULT_SESSION_TIMEOUT_SECONDS: u64 = 3600;

/// Default maximum number of waiting clients.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10;

/// Default rate limit window in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;

/// Default maximum connections per source address per window.
pub const DEFAULT_RATE_LIMIT_MAX_CONNECTIONS: u32 = 10;

/// Minimum decoded length of the session secret.
pub const MIN_SESSION_SECRET_BYTES: usize = 32;

/// Default rate limiter map size that triggers expired-record cleanup.
pub const DEFAULT_RATE_LIMIT_CLEANUP_THRESHOLD: usize = 1000;

/// Queue service configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket and status API bind address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Secret for reconnect token HMAC (base64-encoded, >= 32 bytes decoded).
    /// Protected by `SecretString` to prevent accidental logging.
    pub session_secret: SecretString,

    /// How long the resource stays reserved after the holder drops.
    pub grace_period: Duration,

    /// Maximum duration of a single session.
    pub session_timeout: Duration,

    /// Maximum number of waiting clients.
    pub max_queue_size: usize,

    /// Fixed rate limit window.
    pub rate_limit_window: Duration,

    /// Connections allowed per source address per window.
    pub rate_limit_max_connections: u32,

    /// Rate limiter map size above which expired records are purged.
    pub rate_limit_cleanup_threshold: usize,

    /// Allowed `Origin` header values. Empty means no origin restriction.
    pub allowed_origins: Vec<String>,

    /// Use the first `X-Forwarded-For` entry as the source address.
    pub trust_proxy: bool,

    /// Invite tokens that must be rejected.
    pub revoked_invites: Vec<String>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("session_secret", &"[REDACTED]")
            .field("grace_period", &self.grace_period)
            .field("session_timeout", &self.session_timeout)
            .field("max_queue_size", &self.max_queue_size)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "rate_limit_max_connections",
                &self.rate_limit_max_connections,
            )
            .field(
                "rate_limit_cleanup_threshold",
                &self.rate_limit_cleanup_threshold,
            )
            .field("allowed_origins", &self.allowed_origins)
            .field("trust_proxy", &self.trust_proxy)
            .field("revoked_invites", &self.revoked_invites.len())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let session_secret = SecretString::from(
            vars.get("QUEUE_SESSION_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("QUEUE_SESSION_SECRET".to_string()))?
                .clone(),
        );

        let bind_address = vars
            .get("QUEUE_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("QUEUE_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let grace_period = Duration::from_secs(parse_positive(
            vars,
            "QUEUE_GRACE_PERIOD_SECONDS",
            DEFAULT_GRACE_PERIOD_SECONDS,
        )?);

        let session_timeout = Duration::from_secs(parse_positive(
            vars,
            "QUEUE_SESSION_TIMEOUT_SECONDS",
            DEFAULT_SESSION_TIMEOUT_SECONDS,
        )?);

        let max_queue_size = parse_positive(vars, "QUEUE_MAX_SIZE", DEFAULT_MAX_QUEUE_SIZE)?;

        let rate_limit_window = Duration::from_secs(parse_positive(
            vars,
            "QUEUE_RATE_LIMIT_WINDOW_SECONDS",
            DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
        )?);

        let rate_limit_max_connections = parse_positive(
            vars,
            "QUEUE_RATE_LIMIT_MAX_CONNECTIONS",
            DEFAULT_RATE_LIMIT_MAX_CONNECTIONS,
        )?;

        let rate_limit_cleanup_threshold = parse_positive(
            vars,
            "QUEUE_RATE_LIMIT_CLEANUP_THRESHOLD",
            DEFAULT_RATE_LIMIT_CLEANUP_THRESHOLD,
        )?;

        let allowed_origins = parse_list(vars.get("QUEUE_ALLOWED_ORIGINS"));
        let revoked_invites = parse_list(vars.get("QUEUE_REVOKED_INVITES"));

        let trust_proxy = match vars.get("QUEUE_TRUST_PROXY").map(|s| s.trim()) {
            None | Some("") => false,
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            Some(v) => {
                return Err(ConfigError::InvalidValue(format!(
                    "QUEUE_TRUST_PROXY must be true or false, got '{v}'"
                )))
            }
        };

        Ok(Config {
            bind_address,
            health_bind_address,
            session_secret,
            grace_period,
            session_timeout,
            max_queue_size,
            rate_limit_window,
            rate_limit_max_connections,
            rate_limit_cleanup_threshold,
            allowed_origins,
            trust_proxy,
            revoked_invites,
        })
    }
}

impl Config {
    /// Decode the base64 session secret into key material.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` if the secret is not valid base64 or decodes
    /// to fewer than 32 bytes.
    pub fn decode_session_secret(&self) -> Result<SecretBox<Vec<u8>>, ConfigError> {
        let bytes = STANDARD
            .decode(self.session_secret.expose_secret().trim())
            .map_err(|e| {
                ConfigError::InvalidValue(format!("QUEUE_SESSION_SECRET is not valid base64: {e}"))
            })?;

        if bytes.len() < MIN_SESSION_SECRET_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "QUEUE_SESSION_SECRET must decode to at least {MIN_SESSION_SECRET_BYTES} bytes, got {}",
                bytes.len()
            )));
        }

        Ok(SecretBox::new(Box::new(bytes)))
    }
}

/// Parse a numeric variable that must be greater than zero.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: fmt::Display,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = raw.trim().parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{raw}': {e}"
        ))
    })?;

    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(value)
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(raw: Option<&String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "QUEUE_SESSION_SECRET".to_string(),
            "dGVzdC1zZWNyZXQtMTIzNDU2Nzg5MC0xMjM0NTY3ODkwMTI=".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(
            config.session_secret.expose_secret(),
            "dGVzdC1zZWNyZXQtMTIzNDU2Nzg5MC0xMjM0NTY3ODkwMTI="
        );
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(
            config.grace_period,
            Duration::from_secs(DEFAULT_GRACE_PERIOD_SECONDS)
        );
        assert_eq!(
            config.session_timeout,
            Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECONDS)
        );
        assert_eq!(config.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
        assert_eq!(
            config.rate_limit_window,
            Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECONDS)
        );
        assert_eq!(
            config.rate_limit_max_connections,
            DEFAULT_RATE_LIMIT_MAX_CONNECTIONS
        );
        assert_eq!(
            config.rate_limit_cleanup_threshold,
            DEFAULT_RATE_LIMIT_CLEANUP_THRESHOLD
        );
        assert!(config.allowed_origins.is_empty());
        assert!(!config.trust_proxy);
        assert!(config.revoked_invites.is_empty());
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("QUEUE_BIND_ADDRESS".to_string(), "127.0.0.1:3001".to_string());
        vars.insert(
            "QUEUE_HEALTH_BIND_ADDRESS".to_string(),
            "127.0.0.1:8082".to_string(),
        );
        vars.insert("QUEUE_GRACE_PERIOD_SECONDS".to_string(), "45".to_string());
        vars.insert("QUEUE_SESSION_TIMEOUT_SECONDS".to_string(), "600".to_string());
        vars.insert("QUEUE_MAX_SIZE".to_string(), "25".to_string());
        vars.insert("QUEUE_RATE_LIMIT_WINDOW_SECONDS".to_string(), "10".to_string());
        vars.insert("QUEUE_RATE_LIMIT_MAX_CONNECTIONS".to_string(), "2".to_string());
        vars.insert(
            "QUEUE_RATE_LIMIT_CLEANUP_THRESHOLD".to_string(),
            "50".to_string(),
        );
        vars.insert(
            "QUEUE_ALLOWED_ORIGINS".to_string(),
            "https://demo.example.com, http://localhost:8080,".to_string(),
        );
        vars.insert("QUEUE_TRUST_PROXY".to_string(), "true".to_string());
        vars.insert(
            "QUEUE_REVOKED_INVITES".to_string(),
            "old-invite,leaked_invite".to_string(),
        );

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:3001");
        assert_eq!(config.health_bind_address, "127.0.0.1:8082");
        assert_eq!(config.grace_period, Duration::from_secs(45));
        assert_eq!(config.session_timeout, Duration::from_secs(600));
        assert_eq!(config.max_queue_size, 25);
        assert_eq!(config.rate_limit_window, Duration::from_secs(10));
        assert_eq!(config.rate_limit_max_connections, 2);
        assert_eq!(config.rate_limit_cleanup_threshold, 50);
        assert_eq!(
            config.allowed_origins,
            vec![
                "https://demo.example.com".to_string(),
                "http://localhost:8080".to_string()
            ]
        );
        assert!(config.trust_proxy);
        assert_eq!(config.revoked_invites.len(), 2);
    }

    #[test]
    fn test_from_vars_missing_session_secret() {
        let result = Config::from_vars(&HashMap::new());
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "QUEUE_SESSION_SECRET")
        );
    }

    #[test]
    fn test_from_vars_rejects_zero_values() {
        let mut vars = base_vars();
        vars.insert("QUEUE_RATE_LIMIT_MAX_CONNECTIONS".to_string(), "0".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("greater than 0")));
    }

    #[test]
    fn test_from_vars_rejects_non_numeric_values() {
        let mut vars = base_vars();
        vars.insert("QUEUE_GRACE_PERIOD_SECONDS".to_string(), "soon".to_string());

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("QUEUE_GRACE_PERIOD_SECONDS"))
        );
    }

    #[test]
    fn test_from_vars_rejects_bad_trust_proxy() {
        let mut vars = base_vars();
        vars.insert("QUEUE_TRUST_PROXY".to_string(), "maybe".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_decode_session_secret() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let secret = config.decode_session_secret().unwrap();
        assert_eq!(secret.expose_secret().len(), 35);
    }

    #[test]
    fn test_decode_session_secret_rejects_short_or_invalid() {
        let mut vars = base_vars();
        vars.insert(
            "QUEUE_SESSION_SECRET".to_string(),
            "c2hvcnQtc2VjcmV0".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        assert!(matches!(
            config.decode_session_secret(),
            Err(ConfigError::InvalidValue(msg)) if msg.contains("at least 32 bytes")
        ));

        vars.insert("QUEUE_SESSION_SECRET".to_string(), "not base64!".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert!(matches!(
            config.decode_session_secret(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let mut vars = base_vars();
        vars.insert("QUEUE_REVOKED_INVITES".to_string(), "leaked-invite".to_string());
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("dGVzdC1zZWNyZXQ"));
        assert!(!debug_output.contains("leaked-invite"));
    }
}

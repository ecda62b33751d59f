//! Actor mailbox monitoring and shared actor counters.
//!
//! | Actor Type  | Normal | Warning | Critical |
//! |-------------|--------|---------|----------|
//! | Coordinator | < 100  | 100-500 | > 500    |
//! | Connection  | < 16   | 16-48   | > 48     |

use crate::observability::metrics;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the coordinator.
pub const COORDINATOR_MAILBOX_NORMAL: usize = 100;
pub const COORDINATOR_MAILBOX_WARNING: usize = 500;

/// Outbound depth thresholds for per-connection writers.
pub const CONNECTION_MAILBOX_NORMAL: usize = 16;
pub const CONNECTION_MAILBOX_WARNING: usize = 48;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// SessionCoordinator (singleton).
    Coordinator,
    /// Per-socket reader/writer pair.
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Coordinator => "coordinator",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator => COORDINATOR_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator => COORDINATOR_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth for one mailbox.
///
/// Depth is derived from the channel itself (`max_capacity - capacity`), so
/// senders do not need to cooperate.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record one message taken off the mailbox, with `pending` messages still
    /// waiting behind it.
    pub fn record_processed(&self, pending: usize) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.peak_depth.fetch_max(pending, Ordering::Relaxed);
        // One coordinator, many connections: only the singleton gets a gauge.
        if self.actor_type == ActorType::Coordinator {
            metrics::set_coordinator_mailbox_depth(pending);
        }

        match self.level_for_depth(pending) {
            MailboxLevel::Critical => {
                warn!(
                    target: "queue.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = pending,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if pending == self.actor_type.normal_threshold() + 1 => {
                debug!(
                    target: "queue.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = pending,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Counters shared between the gateway and the coordinator.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Sockets currently inside the connection loop.
    pub active_connections: AtomicUsize,
    /// Connection or coordinator tasks that panicked.
    pub actor_panics: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_created(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero so a double close cannot wrap the count.
    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Count a panicked coordinator or connection task and export it.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "queue.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(ActorType::Coordinator.normal_threshold(), 100);
        assert_eq!(ActorType::Coordinator.warning_threshold(), 500);
        assert_eq!(ActorType::Connection.normal_threshold(), 16);
        assert_eq!(ActorType::Connection.warning_threshold(), 48);
    }

    #[test]
    fn test_levels() {
        let monitor = MailboxMonitor::new(ActorType::Coordinator, "coordinator");

        assert_eq!(monitor.level_for_depth(0), MailboxLevel::Normal);
        assert_eq!(monitor.level_for_depth(100), MailboxLevel::Normal);
        assert_eq!(monitor.level_for_depth(101), MailboxLevel::Warning);
        assert_eq!(monitor.level_for_depth(501), MailboxLevel::Critical);
    }

    #[test]
    fn test_peak_and_processed() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn-1");

        monitor.record_processed(3);
        monitor.record_processed(7);
        monitor.record_processed(0);

        assert_eq!(monitor.peak_depth(), 7);
        assert_eq!(monitor.messages_processed(), 3);
    }

    #[test]
    fn test_actor_metrics_connections_and_panics() {
        let metrics = ActorMetrics::new();

        metrics.connection_created();
        metrics.connection_created();
        metrics.connection_closed();
        assert_eq!(metrics.connection_count(), 1);

        metrics.record_panic(ActorType::Connection);
        assert_eq!(metrics.actor_panics.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_connection_count_does_not_wrap() {
        let metrics = ActorMetrics::new();

        metrics.connection_closed();
        assert_eq!(metrics.connection_count(), 0);
    }
}

//! Connector identity and live-channel tracking.
//!
//! # Responsibilities
//! - Generate unique connector IDs for tracing
//! - Count live channels so a listener can drain them on shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Global atomic counter for connector IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectorId(u64);

impl ConnectorId {
    pub fn new() -> Self {
        Self(CONNECTOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connector-{}", self.0)
    }
}

/// Counts live channels owned by a listener.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live channel. The returned guard releases it on drop.
    pub fn track(&self, id: ConnectorId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every tracked channel is gone or `limit` elapses.
    /// Returns `true` when fully drained.
    pub async fn wait_drained(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.active_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

/// Guard that tracks a channel's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectorId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectorId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connector_id = %self.id, "Channel released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_id_unique() {
        let id1 = ConnectorId::new();
        let id2 = ConnectorId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("connector-"));
    }

    #[test]
    fn tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track(ConnectorId::new());
        let guard2 = tracker.track(ConnectorId::new());
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_drained_is_bounded() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(ConnectorId::new());

        assert!(!tracker.wait_drained(Duration::from_millis(120)).await);

        drop(guard);
        assert!(tracker.wait_drained(Duration::from_millis(120)).await);
    }
}

//! Per-listener connection tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count active connections per listener
//! - Publish connection events to the metrics attached at registration
//! - Let shutdown wait for open connections to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metrics::{Counter, Gauge};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Metric handles a listener reports its connection events to.
#[derive(Clone)]
pub struct ConnectionGauges {
    pub connected: Gauge,
    pub accepted: Counter,
}

impl std::fmt::Debug for ConnectionGauges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGauges").finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    gauges: OnceLock<ConnectionGauges>,
}

/// Tracks the active connections of one listener.
///
/// Clones share the same counters, so the metrics registry can hold one
/// while the accept loop holds another.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach metric handles. Only the first attachment takes effect.
    pub fn attach_gauges(&self, gauges: ConnectionGauges) -> bool {
        let active = self.active_count();
        match self.inner.gauges.set(gauges) {
            Ok(()) => {
                if let Some(gauges) = self.inner.gauges.get() {
                    gauges.connected.set(active as f64);
                }
                true
            }
            Err(_) => false,
        }
    }

    pub fn has_gauges(&self) -> bool {
        self.inner.gauges.get().is_some()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        if let Some(gauges) = self.inner.gauges.get() {
            gauges.connected.increment(1.0);
            gauges.accepted.increment(1);
        }
        ConnectionGuard {
            inner: Arc::clone(&self.inner),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed.
    pub async fn wait_for_drain(&self) {
        while self.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    inner: Arc<TrackerInner>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        if let Some(gauges) = self.inner.gauges.get() {
            gauges.connected.decrement(1.0);
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

//! Provider status snapshots and their broadcast hub. Every cooldown
//! transition and pool rebuild pushes a fresh snapshot; admin surfaces read
//! the latest or follow the feed over SSE.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub enabled: bool,
    /// True while the provider sits out a cooldown window.
    pub auto_disabled: bool,
    pub status: &'static str,
    pub cooldown_remaining_seconds: Option<f64>,
    pub last_error: Option<String>,
    pub priority: i32,
    pub last_test_latency_ms: Option<u64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_test_time: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub providers: Vec<ProviderStatus>,
}

impl StatusUpdate {
    pub fn now(providers: Vec<ProviderStatus>) -> Self {
        Self {
            at: OffsetDateTime::now_utc(),
            providers,
        }
    }
}

/// Bounded fan-out; slow subscribers lag and drop instead of blocking the
/// dispatch path.
#[derive(Clone)]
pub struct StatusHub {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<StatusUpdate>,
}

impl StatusHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(Inner { tx }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.inner.tx.subscribe()
    }

    pub fn broadcast(&self, update: StatusUpdate) {
        let _ = self.inner.tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let hub = StatusHub::new(4);
        let mut rx = hub.subscribe();
        hub.broadcast(StatusUpdate::now(Vec::new()));
        let update = rx.recv().await.unwrap();
        assert!(update.providers.is_empty());
    }

    #[test]
    fn broadcast_without_subscribers_is_a_noop() {
        let hub = StatusHub::new(4);
        hub.broadcast(StatusUpdate::now(Vec::new()));
    }
}

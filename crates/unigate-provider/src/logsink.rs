//! The request-log boundary the dispatcher records into. The gateway itself
//! only depends on the trait; the in-memory sink backs the admin log viewer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// One completed (or synthesized) downstream response.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogRecord {
    pub trace_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub method: String,
    pub path: String,
    pub model: Option<String>,
    /// The provider that produced the response, when one did.
    pub provider: Option<String>,
    pub status: u16,
    pub elapsed_ms: u64,
    pub is_stream: bool,
    /// `"<provider>: <reason>"` per failed attempt, in attempt order.
    pub failover: Vec<String>,
}

pub trait RequestLogSink: Send + Sync {
    fn record(&self, record: RequestLogRecord);
}

pub type SharedLogSink = Arc<dyn RequestLogSink>;

#[derive(Debug, Default)]
pub struct NoopLogSink;

impl RequestLogSink for NoopLogSink {
    fn record(&self, _record: RequestLogRecord) {}
}

/// Ring buffer plus a live feed. Recording never blocks: the buffer drops its
/// oldest entry and lagging feed subscribers miss updates.
pub struct MemoryLogSink {
    capacity: usize,
    buffer: Mutex<VecDeque<RequestLogRecord>>,
    tx: broadcast::Sender<RequestLogRecord>,
}

impl MemoryLogSink {
    pub fn new(capacity: usize, feed_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(feed_buffer);
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            tx,
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<RequestLogRecord> {
        let buffer = self.buffer.lock().expect("log buffer lock poisoned");
        buffer
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestLogRecord> {
        self.tx.subscribe()
    }
}

impl RequestLogSink for MemoryLogSink {
    fn record(&self, record: RequestLogRecord) {
        {
            let mut buffer = self.buffer.lock().expect("log buffer lock poisoned");
            if buffer.len() == self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(record.clone());
        }
        let _ = self.tx.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(trace_id: &str) -> RequestLogRecord {
        RequestLogRecord {
            trace_id: trace_id.to_string(),
            at: OffsetDateTime::now_utc(),
            method: "POST".into(),
            path: "/v1/chat/completions".into(),
            model: Some("gpt-4".into()),
            provider: Some("a".into()),
            status: 200,
            elapsed_ms: 12,
            is_stream: false,
            failover: Vec::new(),
        }
    }

    #[test]
    fn ring_buffer_keeps_newest() {
        let sink = MemoryLogSink::new(2, 4);
        sink.record(record("one"));
        sink.record(record("two"));
        sink.record(record("three"));

        let recent = sink.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].trace_id, "two");
        assert_eq!(recent[1].trace_id, "three");
        assert_eq!(sink.recent(1)[0].trace_id, "three");
    }

    #[tokio::test]
    async fn feed_delivers_records() {
        let sink = MemoryLogSink::new(8, 4);
        let mut rx = sink.subscribe();
        sink.record(record("live"));
        assert_eq!(rx.recv().await.unwrap().trace_id, "live");
    }
}

//! The seam between the recorder and wherever ended spans go.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::observe::SpanRecord;

/// Outcome of a flush.
///
/// Counts cover the period since the previous flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Spans delivered to the sink.
    pub exported: usize,
    /// Spans given up on (queue overflow or exhausted retries).
    pub dropped: usize,
    /// Spans still queued when the flush returned.
    pub pending: usize,
    /// Whether the flush gave up waiting.
    pub timed_out: bool,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        !self.timed_out && self.pending == 0
    }
}

/// Receives ended spans from a [`SpanRecorder`](crate::SpanRecorder).
#[async_trait]
pub trait SpanExporter: Send + Sync + Debug {
    /// Accepts an ended span. Must not block on I/O.
    fn enqueue(&self, record: SpanRecord);

    /// Delivers everything enqueued so far, waiting at most `timeout`.
    async fn flush(&self, timeout: Duration) -> FlushReport;
}

/// Keeps every span in memory.
///
/// Enqueued spans sit in a pending queue until `flush` moves them to the
/// exported list.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    pending: Mutex<VecDeque<SpanRecord>>,
    exported: Mutex<Vec<SpanRecord>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans delivered by previous flushes, in enqueue order.
    pub fn exported(&self) -> Vec<SpanRecord> {
        self.exported.lock().clone()
    }

    /// Spans enqueued but not yet flushed.
    pub fn pending(&self) -> Vec<SpanRecord> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
        self.exported.lock().clear();
    }
}

#[async_trait]
impl SpanExporter for InMemoryExporter {
    fn enqueue(&self, record: SpanRecord) {
        self.pending.lock().push_back(record);
    }

    async fn flush(&self, _timeout: Duration) -> FlushReport {
        let drained: Vec<SpanRecord> = self.pending.lock().drain(..).collect();
        let exported = drained.len();
        self.exported.lock().extend(drained);
        FlushReport {
            exported,
            ..FlushReport::default()
        }
    }
}

/// Discards spans. Used when a recorder is built without an exporter.
#[derive(Debug, Default)]
pub struct NoopExporter {
    discarded: AtomicUsize,
}

impl NoopExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpanExporter for NoopExporter {
    fn enqueue(&self, record: SpanRecord) {
        tracing::trace!(span_id = %record.span_id, "discarding span");
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    async fn flush(&self, _timeout: Duration) -> FlushReport {
        FlushReport {
            dropped: self.discarded.swap(0, Ordering::Relaxed),
            ..FlushReport::default()
        }
    }
}

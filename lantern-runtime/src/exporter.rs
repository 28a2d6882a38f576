//! Batching span exporter.
//!
//! `enqueue` pushes onto an unbounded channel and returns. A background worker
//! owns the buffer and the sink. It sends a batch when the buffer fills, when
//! the flush interval has passed since the oldest buffered span arrived, and
//! on flush or shutdown. Failed batches are retried with exponential backoff
//! while the error is retryable; after that they are dropped and counted.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lantern_core::{FlushReport, SpanExporter, SpanRecord};
use lantern_net::{SinkError, TraceSink};
use tokio::sync::{mpsc, oneshot};

use crate::ExportRuntime;

/// Batching and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Spans per batch, further capped by the sink's own limit.
    pub max_batch_size: usize,
    /// Longest a buffered span waits before a partial batch is sent.
    pub flush_interval: Duration,
    /// Spans accepted but not yet delivered beyond which new spans are dropped.
    pub max_queue: usize,
    /// Send attempts per batch, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles on each further retry.
    pub retry_backoff: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 15,
            flush_interval: Duration::from_secs(1),
            max_queue: 10_000,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl BatchConfig {
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn max_queue(mut self, max: usize) -> Self {
        self.max_queue = max;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_backoff.saturating_mul(factor)
    }
}

#[derive(Debug, Default)]
struct Stats {
    /// Accepted by `enqueue` and not yet delivered or dropped.
    in_flight: AtomicUsize,
    exported: AtomicUsize,
    dropped: AtomicUsize,
}

impl Stats {
    fn settle(&self, n: usize) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(n)));
    }

    fn take_report(&self, timed_out: bool) -> FlushReport {
        FlushReport {
            exported: self.exported.swap(0, Ordering::SeqCst),
            dropped: self.dropped.swap(0, Ordering::SeqCst),
            pending: self.in_flight.load(Ordering::SeqCst),
            timed_out,
        }
    }
}

enum Command {
    Span(SpanRecord),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// A [`SpanExporter`] that delivers to a [`TraceSink`] in the background.
pub struct BatchExporter<R: ExportRuntime> {
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<Stats>,
    config: BatchConfig,
    runtime: Arc<R>,
}

impl<R: ExportRuntime> fmt::Debug for BatchExporter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExporter")
            .field("config", &self.config)
            .field("in_flight", &self.stats.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(feature = "tokio")]
impl BatchExporter<crate::TokioRuntime> {
    /// Starts an exporter on the ambient Tokio runtime.
    pub fn tokio(sink: Arc<dyn TraceSink>, config: BatchConfig) -> Self {
        Self::new(sink, config, crate::TokioRuntime::new())
    }
}

impl<R: ExportRuntime> BatchExporter<R> {
    /// Spawns the delivery worker on `runtime`.
    pub fn new(sink: Arc<dyn TraceSink>, config: BatchConfig, runtime: R) -> Self {
        Self::with_shared_runtime(sink, config, Arc::new(runtime))
    }

    pub fn with_shared_runtime(sink: Arc<dyn TraceSink>, config: BatchConfig, runtime: Arc<R>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Stats::default());
        let batch_size = config
            .max_batch_size
            .min(sink.capabilities().max_batch_size)
            .max(1);

        let worker = Worker {
            runtime: Arc::clone(&runtime),
            sink,
            config: config.clone(),
            batch_size,
            stats: Arc::clone(&stats),
            buffer: Vec::with_capacity(batch_size),
            deadline_ms: None,
        };
        runtime.spawn(worker.run(rx));
        tracing::debug!(batch_size, "batch exporter started");

        Self {
            tx,
            stats,
            config,
            runtime,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Flushes, then stops the worker. Spans enqueued afterwards are dropped.
    pub async fn shutdown(&self, timeout: Duration) -> FlushReport {
        let report = self.round_trip(Command::Shutdown, timeout).await;
        tracing::debug!(exported = report.exported, dropped = report.dropped, "batch exporter stopped");
        report
    }

    async fn round_trip(
        &self,
        command: impl FnOnce(oneshot::Sender<()>) -> Command,
        timeout: Duration,
    ) -> FlushReport {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(command(done_tx)).is_err() {
            return self.stats.take_report(false);
        }
        // Wall-clock bound on the caller's wait.
        let timed_out = match tokio::time::timeout(timeout, done_rx).await {
            Ok(_) => false,
            Err(_) => {
                tracing::warn!(?timeout, "span export did not finish in time");
                true
            }
        };
        self.stats.take_report(timed_out)
    }

    fn drop_span(&self, record: &SpanRecord, reason: &'static str) {
        if self.stats.dropped.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::warn!(span_id = %record.span_id, reason, "dropping span");
        }
    }
}

#[async_trait]
impl<R: ExportRuntime> SpanExporter for BatchExporter<R> {
    fn enqueue(&self, record: SpanRecord) {
        let accepted = self
            .stats
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v < self.config.max_queue).then_some(v + 1)
            })
            .is_ok();
        if !accepted {
            self.drop_span(&record, "queue full");
            return;
        }
        if let Err(mpsc::error::SendError(Command::Span(record))) =
            self.tx.send(Command::Span(record))
        {
            self.stats.settle(1);
            self.drop_span(&record, "exporter stopped");
        }
    }

    async fn flush(&self, timeout: Duration) -> FlushReport {
        self.round_trip(Command::Flush, timeout).await
    }
}

enum Wake {
    Command(Option<Command>),
    Tick,
}

struct Worker<R: ExportRuntime> {
    runtime: Arc<R>,
    sink: Arc<dyn TraceSink>,
    config: BatchConfig,
    batch_size: usize,
    stats: Arc<Stats>,
    buffer: Vec<SpanRecord>,
    deadline_ms: Option<u64>,
}

impl<R: ExportRuntime> Worker<R> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let wake = match self.deadline_ms {
                None => Wake::Command(rx.recv().await),
                Some(deadline) => {
                    let runtime = Arc::clone(&self.runtime);
                    let wait = Duration::from_millis(deadline.saturating_sub(runtime.now_millis()));
                    tokio::select! {
                        biased;
                        command = rx.recv() => Wake::Command(command),
                        _ = runtime.sleep(wait) => Wake::Tick,
                    }
                }
            };

            match wake {
                Wake::Tick => self.deliver_all().await,
                Wake::Command(Some(Command::Span(record))) => {
                    if self.buffer.is_empty() {
                        let interval = u64::try_from(self.config.flush_interval.as_millis())
                            .unwrap_or(u64::MAX);
                        self.deadline_ms = Some(self.runtime.now_millis().saturating_add(interval));
                    }
                    self.buffer.push(record);
                    if self.buffer.len() >= self.batch_size {
                        self.deliver_all().await;
                    }
                }
                Wake::Command(Some(Command::Flush(done))) => {
                    self.deliver_all().await;
                    let _ = done.send(());
                }
                Wake::Command(Some(Command::Shutdown(done))) => {
                    self.deliver_all().await;
                    self.reject_queued(&mut rx);
                    let _ = done.send(());
                    break;
                }
                Wake::Command(None) => {
                    self.deliver_all().await;
                    break;
                }
            }
        }
        tracing::trace!("batch export worker exiting");
    }

    /// Closes the queue and counts spans that arrived behind a shutdown as dropped.
    fn reject_queued(&self, rx: &mut mpsc::UnboundedReceiver<Command>) {
        rx.close();
        let mut rejected = 0;
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Span(_) => rejected += 1,
                Command::Flush(done) | Command::Shutdown(done) => {
                    let _ = done.send(());
                }
            }
        }
        if rejected > 0 {
            tracing::warn!(spans = rejected, "dropping spans enqueued after shutdown");
            self.stats.dropped.fetch_add(rejected, Ordering::SeqCst);
            self.stats.settle(rejected);
        }
    }

    async fn deliver_all(&mut self) {
        self.deadline_ms = None;
        while !self.buffer.is_empty() {
            let take = self.buffer.len().min(self.batch_size);
            let batch: Vec<SpanRecord> = self.buffer.drain(..take).collect();
            self.deliver(batch).await;
        }
    }

    async fn deliver(&self, batch: Vec<SpanRecord>) {
        let n = batch.len();
        let mut attempt = 1;
        loop {
            match self.sink.send_batch(&batch).await {
                Ok(()) => {
                    tracing::trace!(spans = n, attempt, "batch delivered");
                    self.stats.exported.fetch_add(n, Ordering::SeqCst);
                    break;
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff_for(attempt);
                    tracing::warn!(error = %err, attempt, ?backoff, "batch delivery failed, retrying");
                    self.runtime.sleep(backoff).await;
                    attempt += 1;
                }
                Err(SinkError::Partial { failed, total }) => {
                    let lost = failed.min(n);
                    tracing::warn!(failed, total, spans = n, "batch partially rejected");
                    self.stats.exported.fetch_add(n - lost, Ordering::SeqCst);
                    self.stats.dropped.fetch_add(lost, Ordering::SeqCst);
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt, spans = n, "batch delivery failed, dropping");
                    self.stats.dropped.fetch_add(n, Ordering::SeqCst);
                    break;
                }
            }
        }
        self.stats.settle(n);
    }
}

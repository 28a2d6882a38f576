//! The span recorder.
//!
//! A [`SpanRecorder`] owns a working set of spans keyed by [`SpanId`]. Each span
//! lives in its own cell behind a mutex, so updates to different spans never
//! contend and updates to the same span are serialized. Ending a span freezes
//! its record and hands a copy to the configured [`SpanExporter`]; the next
//! [`SpanRecorder::flush`] drops ended spans from the working set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::export::{FlushReport, NoopExporter, SpanExporter};
use crate::observe::{
    IdGenerator, Level, ObservationKind, SpanId, SpanRecord, TraceId, SCHEMA_VERSION_V1,
};
use crate::payload::{Metadata, Payload};
use crate::{Error, Result};

const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fields to merge into an open span.
///
/// Scalar fields are last-writer-wins. Metadata merges per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanUpdate {
    pub name: Option<String>,
    pub output: Option<Payload>,
    pub level: Option<Level>,
    pub status_message: Option<String>,
    pub metadata: Metadata,
}

impl SpanUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure: the message becomes both the output and the status
    /// message, and the level becomes `ERROR`.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            output: Some(Payload::Text(message.clone())),
            level: Some(Level::Error),
            status_message: Some(message),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn output(mut self, output: impl Into<Payload>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Payload>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn merge_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    fn apply(self, record: &mut SpanRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(output) = self.output {
            record.output = Some(output);
        }
        if let Some(level) = self.level {
            record.level = level;
        }
        if let Some(message) = self.status_message {
            record.status_message = Some(message);
        }
        record.metadata.extend(self.metadata);
    }
}

/// Result of applying a [`SpanUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The span had already ended; nothing changed.
    Ignored,
}

/// Result of ending a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended,
    /// A previous call already ended the span; its end time is unchanged.
    AlreadyEnded,
}

#[derive(Debug)]
struct SpanCell {
    id: SpanId,
    trace_id: TraceId,
    parent: Option<SpanId>,
    record: Mutex<SpanRecord>,
}

impl SpanCell {
    fn is_ended(&self) -> bool {
        self.record.lock().end_unix_nanos.is_some()
    }
}

struct Inner {
    spans: RwLock<HashMap<SpanId, Arc<SpanCell>>>,
    exporter: Arc<dyn SpanExporter>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    flush_timeout: Duration,
}

/// Records nested, timed observations.
///
/// Cloning is cheap and every clone shares the same working set and exporter.
#[derive(Clone)]
pub struct SpanRecorder {
    inner: Arc<Inner>,
}

impl fmt::Debug for SpanRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanRecorder")
            .field("working_set", &self.working_set_len())
            .field("exporter", &self.inner.exporter)
            .field("flush_timeout", &self.inner.flush_timeout)
            .finish()
    }
}

impl Default for SpanRecorder {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SpanRecorder {
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::default()
    }

    /// Starts a root span in a new trace.
    pub fn start_span(&self, name: impl Into<String>, input: Option<Payload>) -> SpanHandle {
        let trace_id = self.inner.ids.trace_id();
        self.register(trace_id, None, ObservationKind::Span, name.into(), None, input)
    }

    /// Starts a child span under `parent`.
    pub fn start_child(
        &self,
        parent: SpanId,
        name: impl Into<String>,
        input: Option<Payload>,
    ) -> Result<SpanHandle> {
        let parent = self.lookup(parent)?;
        Ok(self.register(
            parent.trace_id,
            Some(parent.id),
            ObservationKind::Span,
            name.into(),
            None,
            input,
        ))
    }

    /// Starts a root observation in a new trace.
    pub fn start_observation(
        &self,
        name: impl Into<String>,
        model: impl Into<String>,
        input: Option<Payload>,
        kind: ObservationKind,
    ) -> Result<SpanHandle> {
        let model = validate_model(model.into(), kind)?;
        let trace_id = self.inner.ids.trace_id();
        Ok(self.register(trace_id, None, kind, name.into(), model, input))
    }

    /// Starts a child observation under `parent`.
    pub fn start_child_observation(
        &self,
        parent: SpanId,
        name: impl Into<String>,
        model: impl Into<String>,
        input: Option<Payload>,
        kind: ObservationKind,
    ) -> Result<SpanHandle> {
        let model = validate_model(model.into(), kind)?;
        let parent = self.lookup(parent)?;
        Ok(self.register(
            parent.trace_id,
            Some(parent.id),
            kind,
            name.into(),
            model,
            input,
        ))
    }

    pub fn update(&self, span: SpanId, update: SpanUpdate) -> Result<UpdateOutcome> {
        let cell = self.lookup(span)?;
        Ok(apply_update(&cell, update))
    }

    pub fn end(&self, span: SpanId) -> Result<EndOutcome> {
        let cell = self.lookup(span)?;
        Ok(self.end_cell(&cell))
    }

    /// Flushes the exporter with the configured timeout.
    pub async fn flush(&self) -> FlushReport {
        self.flush_with_timeout(self.inner.flush_timeout).await
    }

    /// Flushes the exporter, then drops ended spans from the working set.
    pub async fn flush_with_timeout(&self, timeout: Duration) -> FlushReport {
        let report = self.inner.exporter.flush(timeout).await;
        let purged = {
            let mut spans = self.inner.spans.write();
            let before = spans.len();
            spans.retain(|_, cell| !cell.is_ended());
            before - spans.len()
        };
        tracing::debug!(
            exported = report.exported,
            dropped = report.dropped,
            pending = report.pending,
            timed_out = report.timed_out,
            purged,
            "recorder flushed"
        );
        if report.timed_out {
            tracing::warn!(pending = report.pending, "flush timed out before delivery finished");
        }
        report
    }

    /// A copy of the span's current record, if it is still in the working set.
    pub fn snapshot(&self, span: SpanId) -> Option<SpanRecord> {
        let cell = self.inner.spans.read().get(&span).cloned()?;
        let record = cell.record.lock().clone();
        Some(record)
    }

    /// Snapshots of every span that has not ended, ordered by start time.
    pub fn open_spans(&self) -> Vec<SpanRecord> {
        let cells: Vec<Arc<SpanCell>> = self.inner.spans.read().values().cloned().collect();
        let mut open: Vec<SpanRecord> = cells
            .iter()
            .map(|cell| cell.record.lock().clone())
            .filter(|record| record.end_unix_nanos.is_none())
            .collect();
        open.sort_by_key(|record| record.start_unix_nanos);
        open
    }

    /// Number of spans held, open or ended-but-unflushed.
    pub fn working_set_len(&self) -> usize {
        self.inner.spans.read().len()
    }

    pub fn is_ended(&self, span: SpanId) -> Result<bool> {
        Ok(self.lookup(span)?.is_ended())
    }

    fn lookup(&self, id: SpanId) -> Result<Arc<SpanCell>> {
        self.inner
            .spans
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownSpan(id))
    }

    fn register(
        &self,
        trace_id: TraceId,
        parent: Option<SpanId>,
        kind: ObservationKind,
        name: String,
        model: Option<String>,
        input: Option<Payload>,
    ) -> SpanHandle {
        let id = self.inner.ids.span_id();
        let record = SpanRecord {
            schema_version: SCHEMA_VERSION_V1,
            trace_id,
            span_id: id,
            parent_span_id: parent,
            kind,
            name,
            model,
            input,
            output: None,
            level: Level::Default,
            status_message: None,
            metadata: Metadata::new(),
            start_unix_nanos: self.inner.clock.now_unix_nanos(),
            end_unix_nanos: None,
        };
        tracing::trace!(
            span_id = %id,
            trace_id = %trace_id,
            parent = ?parent.map(|p| p.to_string()),
            kind = %kind,
            name = %record.name,
            "span started"
        );
        let cell = Arc::new(SpanCell {
            id,
            trace_id,
            parent,
            record: Mutex::new(record),
        });
        self.inner.spans.write().insert(id, Arc::clone(&cell));
        SpanHandle {
            recorder: self.clone(),
            cell,
        }
    }

    fn end_cell(&self, cell: &SpanCell) -> EndOutcome {
        let snapshot = {
            let mut record = cell.record.lock();
            if record.end_unix_nanos.is_some() {
                tracing::debug!(span_id = %cell.id, "span already ended");
                return EndOutcome::AlreadyEnded;
            }
            let now = self.inner.clock.now_unix_nanos();
            record.end_unix_nanos = Some(now.max(record.start_unix_nanos));
            record.clone()
        };
        tracing::debug!(
            span_id = %cell.id,
            name = %snapshot.name,
            level = %snapshot.level,
            duration_nanos = snapshot.duration_nanos().unwrap_or_default(),
            "span ended"
        );
        self.inner.exporter.enqueue(snapshot);
        EndOutcome::Ended
    }
}

fn validate_model(model: String, kind: ObservationKind) -> Result<Option<String>> {
    if model.trim().is_empty() {
        return Err(Error::EmptyModel);
    }
    Ok(match kind {
        ObservationKind::Generation => Some(model),
        ObservationKind::Span => None,
    })
}

fn apply_update(cell: &SpanCell, update: SpanUpdate) -> UpdateOutcome {
    let mut record = cell.record.lock();
    if record.end_unix_nanos.is_some() {
        tracing::debug!(span_id = %cell.id, "update after end ignored");
        return UpdateOutcome::Ignored;
    }
    update.apply(&mut record);
    UpdateOutcome::Applied
}

/// Configures a [`SpanRecorder`].
#[derive(Default)]
pub struct RecorderBuilder {
    exporter: Option<Arc<dyn SpanExporter>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<IdGenerator>,
    flush_timeout: Option<Duration>,
}

impl RecorderBuilder {
    pub fn exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = Some(ids);
        self
    }

    /// How long [`SpanRecorder::flush`] waits for delivery. Defaults to 10s.
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> SpanRecorder {
        SpanRecorder {
            inner: Arc::new(Inner {
                spans: RwLock::new(HashMap::new()),
                exporter: self
                    .exporter
                    .unwrap_or_else(|| Arc::new(NoopExporter::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                ids: self.ids.unwrap_or_default(),
                flush_timeout: self.flush_timeout.unwrap_or(DEFAULT_FLUSH_TIMEOUT),
            }),
        }
    }
}

/// A reference to one span.
///
/// Handles stay usable after the span is flushed out of the working set: updates
/// report [`UpdateOutcome::Ignored`] and `end` reports
/// [`EndOutcome::AlreadyEnded`]. Starting a child from a flushed span fails.
#[derive(Clone)]
pub struct SpanHandle {
    recorder: SpanRecorder,
    cell: Arc<SpanCell>,
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanHandle")
            .field("id", &self.cell.id)
            .field("trace_id", &self.cell.trace_id)
            .field("parent", &self.cell.parent)
            .finish()
    }
}

impl SpanHandle {
    pub fn id(&self) -> SpanId {
        self.cell.id
    }

    pub fn trace_id(&self) -> TraceId {
        self.cell.trace_id
    }

    pub fn parent_id(&self) -> Option<SpanId> {
        self.cell.parent
    }

    pub fn recorder(&self) -> &SpanRecorder {
        &self.recorder
    }

    pub fn start_span(&self, name: impl Into<String>, input: Option<Payload>) -> Result<SpanHandle> {
        self.recorder.start_child(self.cell.id, name, input)
    }

    pub fn start_observation(
        &self,
        name: impl Into<String>,
        model: impl Into<String>,
        input: Option<Payload>,
        kind: ObservationKind,
    ) -> Result<SpanHandle> {
        self.recorder
            .start_child_observation(self.cell.id, name, model, input, kind)
    }

    pub fn start_generation(
        &self,
        name: impl Into<String>,
        model: impl Into<String>,
        input: Option<Payload>,
    ) -> Result<SpanHandle> {
        self.start_observation(name, model, input, ObservationKind::Generation)
    }

    pub fn update(&self, update: SpanUpdate) -> UpdateOutcome {
        apply_update(&self.cell, update)
    }

    pub fn end(&self) -> EndOutcome {
        self.recorder.end_cell(&self.cell)
    }

    pub fn snapshot(&self) -> SpanRecord {
        self.cell.record.lock().clone()
    }

    pub fn is_ended(&self) -> bool {
        self.cell.is_ended()
    }
}

//! # Lantern Core
//!
//! Vendor-neutral span recording for LLM workflows.
//!
//! This crate provides:
//! - Trace and span identity ([`TraceId`], [`SpanId`]) with hex encodings
//! - The exported record schema ([`SpanRecord`]) and its [`Payload`] values
//! - The [`SpanRecorder`], which owns a tree of timed observations with an
//!   explicit start/update/end lifecycle
//! - The [`SpanExporter`] seam that ended spans are handed to
//!
//! The recorder is an ordinary value: construct it once, pass it (or clones of
//! it) to the code that needs to trace, and call [`SpanRecorder::flush`] before
//! the process exits.
//!
//! ```rust
//! use std::sync::Arc;
//! use lantern_core::prelude::*;
//!
//! # async fn demo() -> lantern_core::Result<()> {
//! let exporter = Arc::new(InMemoryExporter::new());
//! let recorder = SpanRecorder::builder().exporter(exporter.clone()).build();
//!
//! let root = recorder.start_span("pipeline", Some("What is Kubernetes?".into()));
//! let llm = root.start_generation("llm_call", "gpt-3.5-turbo", None)?;
//! llm.update(SpanUpdate::new().output("Kubernetes orchestrates containers."));
//! llm.end();
//! root.end();
//!
//! recorder.flush().await;
//! assert_eq!(exporter.exported().len(), 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod clock;
pub mod export;
pub mod observe;
pub mod payload;
pub mod recorder;

pub use clock::{Clock, ManualClock, SystemClock};
pub use export::{FlushReport, InMemoryExporter, NoopExporter, SpanExporter};
pub use observe::{
    hex_lower, IdGenerator, Level, ObservationKind, ParseIdError, SpanId, SpanRecord, TraceId,
    SCHEMA_VERSION_V1,
};
pub use payload::{Metadata, Payload};
pub use recorder::{
    EndOutcome, RecorderBuilder, SpanHandle, SpanRecorder, SpanUpdate, UpdateOutcome,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::export::*;
    pub use crate::observe::{Level, ObservationKind, SpanId, SpanRecord, TraceId};
    pub use crate::payload::{Metadata, Payload};
    pub use crate::recorder::*;
}

/// Result type for recorder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for recorder operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An operation referenced a span this recorder does not hold.
    #[error("unknown span {0}")]
    UnknownSpan(SpanId),
    /// A model-bearing observation was started without a model identifier.
    #[error("observation model identifier must be non-empty")]
    EmptyModel,
}

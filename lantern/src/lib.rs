//! # Lantern
//!
//! **Vendor-neutral tracing for LLM workflows.**
//!
//! Lantern records each step of a workflow (chat turns, retrieval, context
//! assembly, model calls) as a tree of timed spans, batches the ended spans in
//! the background, and delivers them to a trace sink: a Langfuse-compatible
//! ingestion API or a local trace bundle that `lantern report` can render.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lantern::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     lantern::config::load_dotenv();
//!     let config = LanternConfig::from_env()?;
//!     let session = Session::from_config(&config)?;
//!
//!     let ctx = session.context();
//!     chat::chat_with_llm(&ctx, None, "What is Kubernetes?").await?;
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Crate Structure
//!
//! - [`lantern_core`]: span recorder, IDs, records and the exporter seam
//! - [`lantern_net`]: completion provider and trace sink traits and clients
//! - [`lantern_runtime`]: runtime seam and the batching exporter
//! - [`lantern_workflows`]: the traced chat, RAG and chain workflows

#![forbid(unsafe_code)]

pub use lantern_core as core;
pub use lantern_net as net;
pub use lantern_runtime as runtime;
pub use lantern_workflows as workflows;

pub use lantern_core::{
    Error, FlushReport, Level, Payload, Result, SpanHandle, SpanId, SpanRecord, SpanRecorder,
    SpanUpdate, TraceId,
};
pub use lantern_net::{CompletionProvider, TraceSink};

/// Local trace bundles and the sink that writes them.
pub mod artifacts;

/// Environment configuration.
pub mod config;

/// Text and HTML trace reports.
pub mod report;

/// Recorder, exporter and provider wiring.
pub mod session;

/// Log subscriber setup.
pub mod telemetry;

pub use artifacts::{TraceBundle, TraceBundleSink};
pub use config::{ConfigError, LanternConfig, LanternConfigBuilder};
pub use session::{Session, SessionError};
pub use telemetry::{init_logging, LogConfig, LogError, LogFormat};

/// Prelude module for convenient imports
///
/// ```rust
/// use lantern::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::prelude::*;
    pub use crate::net::prelude::*;
    pub use crate::workflows::{chains, chat, rag, Demo, DemoSuite, KnowledgeBase, WorkflowContext};

    pub use crate::{LanternConfig, Session};
}

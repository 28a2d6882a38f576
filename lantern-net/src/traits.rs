//! Collaborator traits
//!
//! The recorder and workflows only ever see these two seams.

use std::fmt::Debug;

use async_trait::async_trait;
use lantern_core::SpanRecord;

use crate::protocol::{Completion, CompletionRequest};
use crate::{ProviderResult, SinkResult};

/// Generates text from a conversation.
#[async_trait]
pub trait CompletionProvider: Send + Sync + Debug {
    /// Short provider name, used in logs.
    fn name(&self) -> &str;

    /// Runs one completion. Implementations do not retry.
    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<Completion>;
}

/// What a sink can accept per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkCapabilities {
    /// Largest batch the sink takes in one `send_batch` call.
    pub max_batch_size: usize,
}

impl Default for SinkCapabilities {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
        }
    }
}

/// Destination for ended span records.
#[async_trait]
pub trait TraceSink: Send + Sync + Debug {
    /// Delivers one batch.
    async fn send_batch(&self, spans: &[SpanRecord]) -> SinkResult<()>;

    fn capabilities(&self) -> SinkCapabilities;
}

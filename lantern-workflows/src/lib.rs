//! # Lantern Workflows
//!
//! Small LLM jobs, each fully traced through a [`SpanRecorder`]:
//! - [`chat`]: single chat turns and a multi-question session
//! - [`rag`]: keyword retrieval, context assembly and a grounded answer
//! - [`chains`]: explanation, multi-turn conversation and analyze-then-solve
//! - [`suite`]: runs the demos above in sequence
//!
//! Workflows run sequentially. A failed completion never aborts a workflow:
//! the error text takes the place of the answer, the span is marked `ERROR`,
//! and the next unit of work runs.

use std::sync::Arc;

use lantern_core::{SpanHandle, SpanRecorder, SpanUpdate};
use lantern_net::{ChatMessage, Completion, CompletionProvider, CompletionRequest, ProviderResult};

pub mod chains;
pub mod chat;
pub mod knowledge;
pub mod rag;
pub mod suite;

pub use knowledge::KnowledgeBase;
pub use suite::{Demo, DemoSuite, SuiteSummary};

/// Default chat model.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Workflow failures. Completion errors are not among them; those are
/// recorded on spans and turned into answer text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("recorder error: {0}")]
    Recorder(#[from] lantern_core::Error),
}

/// What every workflow needs: where to record and whom to ask.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub recorder: SpanRecorder,
    pub provider: Arc<dyn CompletionProvider>,
    pub model: String,
}

impl WorkflowContext {
    pub fn new(recorder: SpanRecorder, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            recorder,
            provider,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub(crate) async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> ProviderResult<Completion> {
        let request = CompletionRequest::new(self.model.clone(), messages)
            .temperature(temperature)
            .max_tokens(max_tokens);
        self.provider.complete(&request).await
    }
}

/// Answer text for one step, or the error text that replaced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub failed: bool,
}

impl Reply {
    fn ok(text: String) -> Self {
        Self {
            text,
            failed: false,
        }
    }

    fn error(text: String) -> Self {
        Self { text, failed: true }
    }
}

/// Records a completion outcome on `span` without ending it.
///
/// Success sets the output, plus token usage as metadata when reported.
/// Failure records `"{error_prefix}{error}"` as an error.
pub(crate) fn record_outcome(
    span: &SpanHandle,
    outcome: ProviderResult<Completion>,
    error_prefix: &str,
) -> Reply {
    match outcome {
        Ok(completion) => {
            let mut update = SpanUpdate::new().output(completion.text.as_str());
            if let Some(usage) = completion.usage {
                update = update.merge_metadata(usage.to_metadata());
            }
            span.update(update);
            Reply::ok(completion.text)
        }
        Err(err) => {
            tracing::warn!(span = %span.id(), error = %err, "completion failed");
            let message = format!("{error_prefix}{err}");
            span.update(SpanUpdate::error(message.as_str()));
            Reply::error(message)
        }
    }
}

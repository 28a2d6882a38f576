//! # Lantern Network
//!
//! The two remote collaborators of a traced workflow.
//!
//! This crate provides:
//! - [`CompletionProvider`]: role-tagged messages in, generated text out
//! - [`TraceSink`]: accepts batches of ended span records
//! - Wire types for the OpenAI chat completions API and Langfuse-style
//!   batch ingestion
//! - HTTP implementations of both (feature `http`)
//! - Scripted and recording mocks for tests and offline runs

pub mod protocol;
pub mod traits;

#[cfg(feature = "http")]
mod ingestion;
#[cfg(feature = "http")]
mod openai;

mod mock;

#[cfg(feature = "http")]
pub use ingestion::HttpTraceSink;
#[cfg(feature = "http")]
pub use openai::OpenAiProvider;

pub use mock::{MockSink, ScriptedProvider};
pub use protocol::{ChatMessage, Completion, CompletionRequest, Role, Usage};
pub use traits::{CompletionProvider, SinkCapabilities, TraceSink};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::protocol::{ChatMessage, Completion, CompletionRequest, Role, Usage};
    pub use crate::traits::*;
    pub use crate::{ProviderError, SinkError};
}

/// Result type for completion calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Result type for sink deliveries
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Completion provider failures.
///
/// Callers recover from these locally; they are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The request never got an HTTP response.
    #[error("network error: {0}")]
    Network(String),
    /// Credentials were rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The provider throttled the request (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// No provider is able to serve the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Maps a non-success HTTP status and its body to an error.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Authentication(body),
            429 => Self::RateLimited(body),
            _ => Self::Http { status, body },
        }
    }
}

/// Trace sink delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("network error: {0}")]
    Network(String),
    /// The sink answered with a non-success status.
    #[error("rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    /// The sink accepted the batch but refused some events.
    #[error("{failed} of {total} events rejected")]
    Partial { failed: usize, total: usize },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("io error: {0}")]
    Io(String),
}

impl SinkError {
    /// Whether sending the same batch again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Io(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Partial { .. } | Self::Encode(_) => false,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

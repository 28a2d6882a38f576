//! Wire formats
//!
//! Two protocols live here:
//! - the OpenAI-compatible chat completions request/response
//! - Langfuse-compatible batch ingestion (`POST /api/public/ingestion`)

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use lantern_core::{Level, Metadata, ObservationKind, Payload, SpanRecord};

use crate::ProviderError;

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A chat completion request. Serializes as the OpenAI request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
            max_tokens: 500,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Content of the most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Usage as span metadata entries.
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("prompt_tokens".into(), self.prompt_tokens.into());
        metadata.insert("completion_tokens".into(), self.completion_tokens.into());
        metadata.insert("total_tokens".into(), self.total_tokens.into());
        metadata
    }
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Takes the first choice. `requested_model` is used when the response
    /// does not name one.
    pub fn into_completion(self, requested_model: &str) -> Result<Completion, ProviderError> {
        let text = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".into()))?
            .message
            .content
            .unwrap_or_default();
        Ok(Completion {
            text: text.trim().to_string(),
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            usage: self.usage,
        })
    }
}

/// Body of `POST /api/public/ingestion`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionBatch {
    pub batch: Vec<IngestionEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionEvent {
    /// Deterministic per span and event type, so resends deduplicate.
    pub id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub body: IngestionBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum IngestionBody {
    TraceCreate(TraceBody),
    SpanCreate(ObservationBody),
    GenerationCreate(ObservationBody),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceBody {
    pub id: String,
    pub name: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationBody {
    pub id: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<String>,
    pub name: String,
    pub start_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub level: Level,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Multi-status reply to an ingestion batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestionResponse {
    #[serde(default)]
    pub successes: Vec<IngestionStatus>,
    #[serde(default)]
    pub errors: Vec<IngestionStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionStatus {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub message: Option<String>,
}

/// RFC 3339 UTC with microsecond precision.
pub fn rfc3339_from_unix_nanos(nanos: u64) -> String {
    let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Builds the ingestion events for a batch of span records.
///
/// Root spans produce a `trace-create` event ahead of their observation event.
pub fn encode_ingestion_batch(spans: &[SpanRecord]) -> IngestionBatch {
    let mut batch = Vec::with_capacity(spans.len() + spans.len() / 4);
    for span in spans {
        let start = rfc3339_from_unix_nanos(span.start_unix_nanos);
        let end = span.end_unix_nanos.map(rfc3339_from_unix_nanos);
        let timestamp = end.clone().unwrap_or_else(|| start.clone());

        if span.is_root() {
            batch.push(IngestionEvent {
                id: format!("{}-trace", span.span_id),
                timestamp: timestamp.clone(),
                body: IngestionBody::TraceCreate(TraceBody {
                    id: span.trace_id.to_hex(),
                    name: span.name.clone(),
                    timestamp: start.clone(),
                    input: span.input.clone(),
                    output: span.output.clone(),
                    metadata: span.metadata.clone(),
                }),
            });
        }

        let observation = ObservationBody {
            id: span.span_id.to_hex(),
            trace_id: span.trace_id.to_hex(),
            parent_observation_id: span.parent_span_id.map(|p| p.to_hex()),
            name: span.name.clone(),
            start_time: start,
            end_time: end,
            model: span.model.clone(),
            input: span.input.clone(),
            output: span.output.clone(),
            metadata: span.metadata.clone(),
            level: span.level,
            status_message: span.status_message.clone(),
        };
        let (suffix, body) = match span.kind {
            ObservationKind::Span => ("span", IngestionBody::SpanCreate(observation)),
            ObservationKind::Generation => {
                ("generation", IngestionBody::GenerationCreate(observation))
            }
        };
        batch.push(IngestionEvent {
            id: format!("{}-{suffix}", span.span_id),
            timestamp,
            body,
        });
    }
    IngestionBatch { batch }
}

//! Mock collaborators for testing
//!
//! [`ScriptedProvider`] answers from a queue and [`MockSink`] records what it
//! is sent. Both also back the offline demo mode.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lantern_core::SpanRecord;
use parking_lot::Mutex;

use crate::protocol::{Completion, CompletionRequest, Usage};
use crate::traits::{CompletionProvider, SinkCapabilities, TraceSink};
use crate::{ProviderError, ProviderResult, SinkError, SinkResult};

/// What a [`ScriptedProvider`] does once its script runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exhausted {
    Echo,
    Fail,
}

/// A completion provider that replays queued outcomes.
#[derive(Debug)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderResult<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    exhausted: Exhausted,
}

impl ScriptedProvider {
    /// Replies from the script, then echoes the last user message.
    pub fn new() -> Self {
        Self::with_fallback(Exhausted::Echo)
    }

    /// Replies from the script, then fails every call.
    pub fn strict() -> Self {
        Self::with_fallback(Exhausted::Fail)
    }

    fn with_fallback(exhausted: Exhausted) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            exhausted,
        }
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push_reply(text);
        self
    }

    pub fn error(self, error: ProviderError) -> Self {
        self.push_error(error);
        self
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.script.lock().push_back(Ok(text.into()));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.script.lock().push_back(Err(error));
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<Completion> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        let text = match (next, self.exhausted) {
            (Some(outcome), _) => outcome?,
            (None, Exhausted::Echo) => {
                format!("Echo: {}", request.last_user_message().unwrap_or_default())
            }
            (None, Exhausted::Fail) => {
                return Err(ProviderError::Unavailable("script exhausted".into()))
            }
        };
        let words = text.split_whitespace().count();
        let usage = Usage {
            prompt_tokens: 0,
            completion_tokens: u32::try_from(words).unwrap_or(u32::MAX),
            total_tokens: u32::try_from(words).unwrap_or(u32::MAX),
        };
        Ok(Completion {
            text,
            model: request.model.clone(),
            usage: Some(usage),
        })
    }
}

/// A trace sink that keeps every batch it accepts.
#[derive(Debug)]
pub struct MockSink {
    batches: Mutex<Vec<Vec<SpanRecord>>>,
    attempts: AtomicUsize,
    fail_remaining: AtomicUsize,
    failure: SinkError,
    max_batch_size: usize,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            failure: SinkError::Network("mock failure".into()),
            max_batch_size: 100,
        }
    }

    /// Fails the first `n` sends with `error`.
    pub fn failing_first(mut self, n: usize, error: SinkError) -> Self {
        self.fail_remaining = AtomicUsize::new(n);
        self.failure = error;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }

    /// Accepted batches, in delivery order.
    pub fn batches(&self) -> Vec<Vec<SpanRecord>> {
        self.batches.lock().clone()
    }

    /// All accepted records, flattened.
    pub fn records(&self) -> Vec<SpanRecord> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of `send_batch` calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TraceSink for MockSink {
    async fn send_batch(&self, spans: &[SpanRecord]) -> SinkResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.failure.clone());
        }
        self.batches.lock().push(spans.to_vec());
        Ok(())
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            max_batch_size: self.max_batch_size,
        }
    }
}

//! Single-turn chat and a multi-question conversation session.

use lantern_core::{Payload, SpanHandle, SpanUpdate};
use lantern_net::ChatMessage;

use crate::{record_outcome, Reply, Result, WorkflowContext};

pub const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant specializing in cloud-native technologies and DevOps.";

pub const TEMPERATURE: f32 = 0.7;
pub const MAX_TOKENS: u32 = 500;

/// Questions asked by [`run_conversation`].
pub const SAMPLE_QUESTIONS: [&str; 5] = [
    "What is Kubernetes and why is it important for cloud-native applications?",
    "How can I implement observability for microservices?",
    "What are the best practices for container security?",
    "Explain the difference between Docker and Kubernetes",
    "How do I set up monitoring with Prometheus and Grafana?",
];

/// One traced chat turn.
///
/// Records a `chat_completion` span (a new root, or a child of `parent`) with
/// an `llm_call` generation under it. On failure both carry
/// `Sorry, I encountered an error: {e}` at level `ERROR`.
pub async fn chat_with_llm(
    ctx: &WorkflowContext,
    parent: Option<&SpanHandle>,
    user_message: &str,
) -> Result<Reply> {
    let span = match parent {
        Some(parent) => parent.start_span("chat_completion", Some(user_message.into()))?,
        None => ctx
            .recorder
            .start_span("chat_completion", Some(user_message.into())),
    };
    let generation = match span.start_generation("llm_call", ctx.model.as_str(), Some(user_message.into())) {
        Ok(generation) => generation,
        Err(err) => {
            span.update(SpanUpdate::error(err.to_string()));
            span.end();
            return Err(err.into());
        }
    };

    let outcome = ctx
        .complete(
            vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(user_message),
            ],
            TEMPERATURE,
            MAX_TOKENS,
        )
        .await;
    let reply = record_outcome(&generation, outcome, "Sorry, I encountered an error: ");
    generation.end();

    if reply.failed {
        span.update(SpanUpdate::error(reply.text.as_str()));
    } else {
        span.update(SpanUpdate::new().output(reply.text.as_str()));
    }
    span.end();
    Ok(reply)
}

/// A question and the answer (or error text) it got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub question: String,
    pub answer: Reply,
}

/// Asks each question in turn under one `conversation_session` span.
pub async fn run_conversation(ctx: &WorkflowContext, questions: &[&str]) -> Result<Vec<Exchange>> {
    let session = ctx.recorder.start_span("conversation_session", None);
    let mut exchanges = Vec::with_capacity(questions.len());

    for (i, question) in questions.iter().enumerate() {
        tracing::info!(n = i + 1, question, "asking");
        let answer = match chat_with_llm(ctx, Some(&session), question).await {
            Ok(answer) => answer,
            Err(err) => {
                session.end();
                return Err(err);
            }
        };
        tracing::info!(n = i + 1, failed = answer.failed, answer = %answer.text, "answered");
        exchanges.push(Exchange {
            question: question.to_string(),
            answer,
        });
    }

    session.update(
        SpanUpdate::new()
            .output(format!("Completed conversation with {} questions", questions.len()))
            .metadata("total_questions", questions.len())
            .metadata(
                "topics",
                Payload::from(questions.iter().map(|q| q.to_string()).collect::<Vec<_>>()),
            ),
    );
    session.end();
    Ok(exchanges)
}

//! Retrieval-augmented generation pipeline.
//!
//! ```text
//! rag_pipeline
//! ├── document_retrieval
//! ├── context_assembly
//! └── llm_generation   (generation)
//! ```

use lantern_core::{Level, Payload, SpanHandle, SpanUpdate};
use lantern_net::ChatMessage;

use crate::knowledge::{KnowledgeBase, DEFAULT_TOP_K};
use crate::{record_outcome, Reply, Result, WorkflowContext};

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions based on provided context. Be accurate and cite specific information when possible.";

pub const TEMPERATURE: f32 = 0.3;
pub const MAX_TOKENS: u32 = 600;

const INSTRUCTION: &str = "Please answer the question based on the provided information. If the information doesn't contain enough details, say so.";

/// Queries run by the RAG demo.
pub const SAMPLE_QUERIES: [&str; 4] = [
    "What is Kubernetes and how does it help with container orchestration?",
    "How can I implement observability in my microservices architecture?",
    "What are the key principles of DevOps and how do they apply to cloud-native development?",
    "Explain the benefits and challenges of microservices architecture",
];

/// Everything a pipeline run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagResult {
    pub query: String,
    pub retrieved_documents: Vec<String>,
    pub context: String,
    pub answer: Reply,
}

impl RagResult {
    fn to_payload(&self) -> Payload {
        Payload::map([
            ("query", Payload::from(self.query.as_str())),
            ("retrieved_documents", Payload::from(self.retrieved_documents.clone())),
            ("context", Payload::from(self.context.as_str())),
            ("answer", Payload::from(self.answer.text.as_str())),
        ])
    }
}

/// Numbered documents, the question, and the answering instruction.
pub fn build_context(documents: &[String], query: &str) -> String {
    let mut context = String::from("Relevant information:\n\n");
    for (i, doc) in documents.iter().enumerate() {
        context.push_str(&format!("{}. {doc}\n\n", i + 1));
    }
    context.push_str(&format!("Question: {query}\n\n"));
    context.push_str(INSTRUCTION);
    context
}

/// [`build_context`] inside a `context_assembly` child span.
pub fn assemble_context(parent: &SpanHandle, documents: &[String], query: &str) -> Result<String> {
    let input = Payload::map([
        ("documents", Payload::from(documents.to_vec())),
        ("query", Payload::from(query)),
    ]);
    let span = parent.start_span("context_assembly", Some(input))?;
    let context = build_context(documents, query);
    span.update(
        SpanUpdate::new()
            .output(context.as_str())
            .metadata("doc_count", documents.len()),
    );
    span.end();
    Ok(context)
}

/// Asks the model to answer from `context`, inside an `llm_generation` span.
pub async fn generate_answer(
    ctx: &WorkflowContext,
    parent: &SpanHandle,
    context: &str,
) -> Result<Reply> {
    let generation = parent.start_generation("llm_generation", ctx.model.as_str(), Some(context.into()))?;
    let outcome = ctx
        .complete(
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(context)],
            TEMPERATURE,
            MAX_TOKENS,
        )
        .await;
    let reply = record_outcome(&generation, outcome, "Error generating answer: ");
    generation.end();
    Ok(reply)
}

/// Retrieve, assemble and generate under one `rag_pipeline` root span.
///
/// The root always ends, and is marked `ERROR` if generation failed.
pub async fn rag_pipeline(ctx: &WorkflowContext, kb: &KnowledgeBase, query: &str) -> Result<RagResult> {
    let root = ctx.recorder.start_span("rag_pipeline", Some(query.into()));
    let result = run_steps(ctx, kb, &root, query).await;

    if let Ok(result) = &result {
        let mut update = SpanUpdate::new()
            .name("rag_pipeline")
            .output(result.to_payload())
            .metadata("doc_count", result.retrieved_documents.len());
        if result.answer.failed {
            update = update
                .level(Level::Error)
                .status_message(result.answer.text.as_str());
        }
        root.update(update);
    }
    root.end();
    result
}

async fn run_steps(
    ctx: &WorkflowContext,
    kb: &KnowledgeBase,
    root: &SpanHandle,
    query: &str,
) -> Result<RagResult> {
    tracing::info!(query, "processing query");
    let documents = kb.retrieve_traced(root, query, DEFAULT_TOP_K)?;
    let context = assemble_context(root, &documents, query)?;
    let answer = generate_answer(ctx, root, &context).await?;
    Ok(RagResult {
        query: query.to_string(),
        retrieved_documents: documents,
        context,
        answer,
    })
}

/// Runs every query through the pipeline.
pub async fn run_rag_demo(
    ctx: &WorkflowContext,
    kb: &KnowledgeBase,
    queries: &[&str],
) -> Result<Vec<RagResult>> {
    let mut results = Vec::with_capacity(queries.len());
    for query in queries {
        let result = rag_pipeline(ctx, kb, query).await?;
        tracing::info!(
            documents = result.retrieved_documents.len(),
            failed = result.answer.failed,
            answer = %result.answer.text,
            "query answered"
        );
        results.push(result);
    }
    Ok(results)
}

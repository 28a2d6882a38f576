//! RAG Pipeline Example
//!
//! Runs one query through retrieval, context assembly and generation, writing
//! the trace to a local bundle under `./example-traces`, then prints the
//! trace tree.

use std::sync::Arc;
use std::time::Duration;

use lantern::core::IdGenerator;
use lantern::net::ScriptedProvider;
use lantern::prelude::*;
use lantern::report;
use lantern::runtime::BatchConfig;
use lantern::{TraceBundle, TraceBundleSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bundle = TraceBundle::create("example-traces", IdGenerator::new().trace_id())?;
    let provider = ScriptedProvider::new()
        .reply("Kubernetes automates deployment, scaling and management of containers.");
    let session = Session::new(
        Arc::new(provider),
        Arc::new(TraceBundleSink::new(bundle.clone())),
        "gpt-3.5-turbo",
        BatchConfig::default(),
        Duration::from_secs(5),
    );

    let kb = KnowledgeBase::cloud_native();
    let result = rag::rag_pipeline(&session.context(), &kb, "What is Kubernetes?").await?;
    println!("Retrieved {} documents", result.retrieved_documents.len());
    println!("Answer: {}", result.answer.text);

    session.shutdown().await;
    let report = report::load_report(bundle.dir())?;
    println!("\n{}", report::render_text(&report));
    Ok(())
}

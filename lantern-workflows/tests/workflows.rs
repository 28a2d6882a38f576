//! Trace-shape checks across whole workflows.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lantern_core::{InMemoryExporter, Level, SpanId, SpanRecord, SpanRecorder};
use lantern_net::{ProviderError, ScriptedProvider};
use lantern_workflows::{chains, chat, rag, KnowledgeBase, WorkflowContext};

fn setup(provider: ScriptedProvider) -> (WorkflowContext, Arc<InMemoryExporter>) {
    let exporter = Arc::new(InMemoryExporter::new());
    let recorder = SpanRecorder::builder().exporter(exporter.clone()).build();
    (
        WorkflowContext::new(recorder, Arc::new(provider)).with_model("gpt-4o-mini"),
        exporter,
    )
}

/// Every parent exists, shares the trace, and encloses its children in time.
fn assert_well_formed(spans: &[SpanRecord]) {
    let by_id: HashMap<SpanId, &SpanRecord> = spans.iter().map(|s| (s.span_id, s)).collect();
    for span in spans {
        assert!(span.is_ended(), "{} not ended", span.name);
        if let Some(parent_id) = span.parent_span_id {
            let parent = by_id
                .get(&parent_id)
                .unwrap_or_else(|| panic!("{} has no exported parent", span.name));
            assert_eq!(span.trace_id, parent.trace_id);
            assert!(parent.start_unix_nanos <= span.start_unix_nanos);
            assert!(span.end_unix_nanos <= parent.end_unix_nanos);
        }
    }
}

#[tokio::test]
async fn rag_demo_builds_one_trace_per_query() {
    let (ctx, exporter) = setup(ScriptedProvider::new());
    let kb = KnowledgeBase::cloud_native();
    let results = rag::run_rag_demo(&ctx, &kb, &rag::SAMPLE_QUERIES).await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| !r.answer.failed));

    ctx.recorder.flush().await;
    let spans = exporter.exported();
    assert_eq!(spans.len(), 16);
    assert_well_formed(&spans);

    let roots: Vec<&SpanRecord> = spans.iter().filter(|s| s.is_root()).collect();
    assert_eq!(roots.len(), 4);
    let traces: HashSet<_> = roots.iter().map(|r| r.trace_id).collect();
    assert_eq!(traces.len(), 4);

    let generation = spans.iter().find(|s| s.name == "llm_generation").unwrap();
    assert_eq!(generation.model.as_deref(), Some("gpt-4o-mini"));
}

#[tokio::test]
async fn provider_failures_do_not_stop_a_workflow() {
    let provider = ScriptedProvider::new()
        .error(ProviderError::Unavailable("down".into()))
        .error(ProviderError::Authentication("bad key".into()));
    let (ctx, exporter) = setup(provider);

    let exchanges = chat::run_conversation(&ctx, &chat::SAMPLE_QUESTIONS[..3]).await.unwrap();
    let failed: Vec<bool> = exchanges.iter().map(|e| e.answer.failed).collect();
    assert_eq!(failed, [true, true, false]);
    assert!(exchanges[0].answer.text.starts_with("Sorry, I encountered an error: "));

    ctx.recorder.flush().await;
    let spans = exporter.exported();
    assert_well_formed(&spans);
    let errors = spans.iter().filter(|s| s.level == Level::Error).count();
    // chat_completion and llm_call for each failed turn
    assert_eq!(errors, 4);
    let session = spans.iter().find(|s| s.name == "conversation_session").unwrap();
    assert_eq!(session.level, Level::Default);
}

#[tokio::test]
async fn chains_demo_records_every_chain() {
    let (ctx, exporter) = setup(ScriptedProvider::new());
    chains::run_chains_demo(&ctx).await.unwrap();
    ctx.recorder.flush().await;

    let spans = exporter.exported();
    assert_well_formed(&spans);
    let count = |name: &str| spans.iter().filter(|s| s.name == name).count();
    assert_eq!(count("explanation_chain"), 4);
    assert_eq!(count("llm_explanation"), 4);
    assert_eq!(count("conversation_chain"), 1);
    assert_eq!(count("conversation_turn_4"), 1);
    assert_eq!(count("multi_step_workflow"), 3);
    assert_eq!(count("solution_generation"), 3);
    assert_eq!(ctx.recorder.working_set_len(), 0);
}

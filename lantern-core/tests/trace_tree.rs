//! Integration tests for building and exporting a complete trace tree.

use std::sync::Arc;

use lantern_core::prelude::*;
use lantern_core::{Error, IdGenerator, ManualClock};

fn traced_pipeline(recorder: &SpanRecorder, fail_generation: bool) -> lantern_core::Result<SpanId> {
    let root = recorder.start_span("rag_pipeline", Some("What is Kubernetes?".into()));

    let retrieval = root.start_span("document_retrieval", Some("What is Kubernetes?".into()))?;
    retrieval.update(
        SpanUpdate::new()
            .output(vec!["doc one", "doc two"])
            .metadata("total_docs", 2usize),
    );
    retrieval.end();

    let generation = root.start_generation("llm_generation", "gpt-3.5-turbo", None)?;
    if fail_generation {
        generation.update(SpanUpdate::error("Error generating answer: timeout"));
        root.update(SpanUpdate::new().level(Level::Error));
    } else {
        generation.update(SpanUpdate::new().output("Kubernetes orchestrates containers."));
    }
    generation.end();

    root.update(SpanUpdate::new().metadata("doc_count", 2usize));
    root.end();
    Ok(root.id())
}

fn recorder() -> (SpanRecorder, Arc<InMemoryExporter>) {
    let exporter = Arc::new(InMemoryExporter::new());
    let recorder = SpanRecorder::builder()
        .exporter(exporter.clone())
        .clock(Arc::new(ManualClock::new(1_700_000_000_000_000_000)))
        .id_generator(IdGenerator::seeded(1))
        .build();
    (recorder, exporter)
}

#[tokio::test]
async fn pipeline_exports_linked_tree() {
    let (recorder, exporter) = recorder();
    let root_id = traced_pipeline(&recorder, false).unwrap();

    let report = recorder.flush().await;
    assert_eq!(report.exported, 3);
    assert_eq!(recorder.working_set_len(), 0);

    let spans = exporter.exported();
    let root = spans.iter().find(|s| s.span_id == root_id).unwrap();
    assert!(spans.iter().all(|s| s.trace_id == root.trace_id));
    assert!(spans.iter().all(|s| s.end_unix_nanos.is_some()));

    let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["document_retrieval", "llm_generation", "rag_pipeline"]);

    let generation = &spans[1];
    assert_eq!(generation.kind, ObservationKind::Generation);
    assert_eq!(generation.model.as_deref(), Some("gpt-3.5-turbo"));
    assert_eq!(generation.parent_span_id, Some(root_id));
    assert_eq!(root.metadata["doc_count"], Payload::Int(2));
}

#[tokio::test]
async fn failed_generation_still_ends_every_span() {
    let (recorder, exporter) = recorder();
    traced_pipeline(&recorder, true).unwrap();
    recorder.flush().await;

    let spans = exporter.exported();
    assert_eq!(spans.len(), 3);
    let generation = spans.iter().find(|s| s.name == "llm_generation").unwrap();
    assert_eq!(generation.level, Level::Error);
    assert_eq!(
        generation.status_message.as_deref(),
        Some("Error generating answer: timeout")
    );
    let root = spans.iter().find(|s| s.is_root()).unwrap();
    assert_eq!(root.level, Level::Error);
}

#[tokio::test]
async fn records_survive_ndjson() {
    let (recorder, exporter) = recorder();
    traced_pipeline(&recorder, false).unwrap();
    recorder.flush().await;

    let ndjson: String = exporter
        .exported()
        .iter()
        .map(|r| serde_json::to_string(r).unwrap() + "\n")
        .collect();
    let parsed: Vec<SpanRecord> = ndjson
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(parsed, exporter.exported());

    let first: serde_json::Value = serde_json::from_str(ndjson.lines().next().unwrap()).unwrap();
    assert_eq!(first["schema_version"], 1);
    assert_eq!(first["kind"], "span");
    assert_eq!(first["level"], "DEFAULT");
    assert_eq!(first["output"], serde_json::json!(["doc one", "doc two"]));
}

#[test]
fn flushed_parent_rejects_children() {
    let (recorder, _) = recorder();
    let root = recorder.start_span("root", None);
    root.end();
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    runtime.block_on(recorder.flush());

    assert_eq!(
        root.start_generation("llm", "gpt-4", None).unwrap_err(),
        Error::UnknownSpan(root.id())
    );
}

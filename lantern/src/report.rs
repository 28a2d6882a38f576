//! Offline trace reports.
//!
//! Reads a trace bundle, validates its manifest, rebuilds the trace forest
//! from `spans.ndjson`, and renders it as an indented text tree or a
//! self-contained HTML page.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lantern_core::{Level, ObservationKind, Payload, SpanId, SpanRecord, TraceId};

use crate::artifacts::TraceBundle;

/// Characters of output shown per span before truncating.
const OUTPUT_PREVIEW: usize = 120;

/// A span and its children, ordered by start time.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanNode {
    pub span: SpanRecord,
    pub children: Vec<SpanNode>,
}

impl SpanNode {
    /// This span plus all of its descendants.
    pub fn span_count(&self) -> usize {
        1 + self.children.iter().map(SpanNode::span_count).sum::<usize>()
    }

    fn error_count(&self) -> usize {
        usize::from(self.span.level == Level::Error)
            + self.children.iter().map(SpanNode::error_count).sum::<usize>()
    }
}

/// Every root span recorded under one trace id.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceTree {
    pub trace_id: TraceId,
    /// Usually one. Spans whose parent never reached the bundle are roots too.
    pub roots: Vec<SpanNode>,
}

impl TraceTree {
    pub fn span_count(&self) -> usize {
        self.roots.iter().map(SpanNode::span_count).sum()
    }

    pub fn error_count(&self) -> usize {
        self.roots.iter().map(SpanNode::error_count).sum()
    }
}

/// Report data loaded from a trace bundle.
#[derive(Debug, Clone)]
pub struct TraceReport {
    pub bundle_dir: PathBuf,
    pub bundle_id: TraceId,
    pub span_count: usize,
    pub traces: Vec<TraceTree>,
}

/// Opens and validates a bundle, then builds its trace forest.
pub fn load_report(bundle_dir: impl AsRef<Path>) -> io::Result<TraceReport> {
    let bundle = TraceBundle::open(&bundle_dir)?;
    bundle.validate_manifest()?;
    let spans = bundle.read_spans()?;
    Ok(TraceReport {
        bundle_dir: bundle.dir().to_path_buf(),
        bundle_id: bundle.bundle_id(),
        span_count: spans.len(),
        traces: build_forest(spans),
    })
}

/// Writes the HTML report for `bundle_dir` to `out_path`.
pub fn generate_report_html(bundle_dir: impl AsRef<Path>, out_path: impl AsRef<Path>) -> io::Result<()> {
    let report = load_report(bundle_dir)?;
    fs::write(out_path, render_html(&report))
}

/// Groups spans into trees by parent link, and trees by trace id.
///
/// Traces are ordered by their earliest root. A span whose parent is absent
/// becomes a root of its trace.
pub fn build_forest(spans: Vec<SpanRecord>) -> Vec<TraceTree> {
    let ids: HashSet<SpanId> = spans.iter().map(|s| s.span_id).collect();
    let mut children: HashMap<SpanId, Vec<SpanRecord>> = HashMap::new();
    let mut roots = Vec::new();
    for span in spans {
        match span.parent_span_id {
            Some(parent) if ids.contains(&parent) => children.entry(parent).or_default().push(span),
            _ => roots.push(span),
        }
    }
    roots.sort_by_key(|s| (s.start_unix_nanos, s.span_id));

    let mut traces: Vec<TraceTree> = Vec::new();
    for root in roots {
        let node = attach(root, &mut children);
        match traces.iter().position(|t| t.trace_id == node.span.trace_id) {
            Some(i) => traces[i].roots.push(node),
            None => traces.push(TraceTree {
                trace_id: node.span.trace_id,
                roots: vec![node],
            }),
        }
    }
    traces
}

fn attach(span: SpanRecord, children: &mut HashMap<SpanId, Vec<SpanRecord>>) -> SpanNode {
    let mut kids = children.remove(&span.span_id).unwrap_or_default();
    kids.sort_by_key(|s| (s.start_unix_nanos, s.span_id));
    SpanNode {
        children: kids.into_iter().map(|k| attach(k, children)).collect(),
        span,
    }
}

/// Renders the forest as an indented tree, one span per line.
pub fn render_text(report: &TraceReport) -> String {
    let mut out = format!(
        "bundle {} ({} traces, {} spans)\n",
        report.bundle_id,
        report.traces.len(),
        report.span_count
    );
    for trace in &report.traces {
        out.push_str(&format!(
            "\ntrace {} ({} spans, {} errors)\n",
            trace.trace_id,
            trace.span_count(),
            trace.error_count()
        ));
        let last = trace.roots.len().saturating_sub(1);
        for (i, root) in trace.roots.iter().enumerate() {
            write_text_node(&mut out, root, "", i == last);
        }
    }
    out
}

fn write_text_node(out: &mut String, node: &SpanNode, prefix: &str, last: bool) {
    let span = &node.span;
    out.push_str(prefix);
    out.push_str(if last { "└─ " } else { "├─ " });
    out.push_str(&span.name);
    if span.kind == ObservationKind::Generation {
        out.push_str(" [generation");
        if let Some(model) = &span.model {
            out.push(' ');
            out.push_str(model);
        }
        out.push(']');
    }
    out.push_str(&format!("  {}", format_duration(span)));
    if span.level == Level::Error {
        out.push_str("  ERROR");
        if let Some(message) = &span.status_message {
            out.push_str(": ");
            out.push_str(&preview(message));
        }
    }
    out.push('\n');

    let child_prefix = format!("{prefix}{}", if last { "   " } else { "│  " });
    let last_child = node.children.len().saturating_sub(1);
    for (i, child) in node.children.iter().enumerate() {
        write_text_node(out, child, &child_prefix, i == last_child);
    }
}

fn format_duration(span: &SpanRecord) -> String {
    match span.duration_nanos() {
        Some(nanos) => format!("{:.1} ms", nanos as f64 / 1_000_000.0),
        None => "open".to_string(),
    }
}

fn format_start(unix_nanos: u64) -> String {
    let nanos = i64::try_from(unix_nanos).unwrap_or(i64::MAX);
    let at: DateTime<Utc> = DateTime::from_timestamp_nanos(nanos);
    at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(OUTPUT_PREVIEW).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

fn payload_preview(payload: Option<&Payload>) -> String {
    match payload {
        None | Some(Payload::Null) => String::new(),
        Some(Payload::Text(text)) => preview(text),
        Some(other) => preview(&serde_json::to_string(other).unwrap_or_default()),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Renders a self-contained HTML page: one table per trace.
pub fn render_html(report: &TraceReport) -> String {
    let errors: usize = report.traces.iter().map(TraceTree::error_count).sum();

    let mut html = String::new();
    html.push_str("<!doctype html><html><head><meta charset=\"utf-8\"/>");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\"/>");
    html.push_str("<title>Lantern Trace Report</title>");
    html.push_str("<style>body{font:15px ui-sans-serif,system-ui,-apple-system,Segoe UI,Roboto,Helvetica,Arial,sans-serif;max-width:1200px;margin:24px auto;padding:0 16px;color:#111}h1,h2{margin:18px 0 10px}code,.mono{font-family:ui-monospace,SFMono-Regular,Menlo,Monaco,monospace;font-size:13px}table{border-collapse:collapse;width:100%;margin:8px 0 16px}th,td{border:1px solid #ddd;padding:6px 8px;vertical-align:top}th{background:#fafafa;text-align:left}tr.error td{background:#fff5f5}.gen{color:#5b2a86}.warn{border:2px solid #b00020;padding:10px;border-radius:10px;background:#fff5f5}.ok{border:2px solid #2e7d32;padding:10px;border-radius:10px;background:#f5fff7}</style>");
    html.push_str("</head><body>");
    html.push_str("<h1>Lantern Trace Report</h1>");
    html.push_str(&format!(
        "<p><strong>Bundle:</strong> <code>{}</code> &middot; {} traces &middot; {} spans</p>",
        escape_html(&report.bundle_dir.display().to_string()),
        report.traces.len(),
        report.span_count
    ));

    if errors == 0 {
        html.push_str("<div class=\"ok\"><strong>Errors:</strong> none recorded.</div>");
    } else {
        html.push_str(&format!(
            "<div class=\"warn\"><strong>{errors} span(s) recorded an error.</strong></div>"
        ));
    }

    for trace in &report.traces {
        let title = trace
            .roots
            .first()
            .map(|r| r.span.name.as_str())
            .unwrap_or("trace");
        html.push_str(&format!(
            "<section><h2>{} <code>{}</code></h2>",
            escape_html(title),
            trace.trace_id
        ));
        html.push_str("<table><thead><tr><th>span</th><th>model</th><th>started (UTC)</th><th>duration</th><th>level</th><th>output</th></tr></thead><tbody>");
        for root in &trace.roots {
            write_html_rows(&mut html, root, 0);
        }
        html.push_str("</tbody></table></section>");
    }

    html.push_str("</body></html>");
    html
}

fn write_html_rows(html: &mut String, node: &SpanNode, depth: usize) {
    let span = &node.span;
    let class = if span.level == Level::Error { " class=\"error\"" } else { "" };
    let name_class = if span.kind == ObservationKind::Generation { "mono gen" } else { "mono" };
    let output = match (&span.status_message, span.level) {
        (Some(message), Level::Error) => preview(message),
        _ => payload_preview(span.output.as_ref()),
    };
    html.push_str(&format!(
        "<tr{class}><td class=\"{name_class}\" style=\"padding-left:{}px\">{}</td><td class=\"mono\">{}</td><td class=\"mono\">{}</td><td class=\"mono\">{}</td><td>{}</td><td>{}</td></tr>",
        8 + depth * 20,
        escape_html(&span.name),
        escape_html(span.model.as_deref().unwrap_or("")),
        format_start(span.start_unix_nanos),
        format_duration(span),
        span.level,
        escape_html(&output)
    ));
    for child in &node.children {
        write_html_rows(html, child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use lantern_core::SCHEMA_VERSION_V1;

    use super::*;

    fn record(trace: u8, id: u8, parent: Option<u8>, name: &str, start: u64) -> SpanRecord {
        SpanRecord {
            schema_version: SCHEMA_VERSION_V1,
            trace_id: TraceId::from_bytes([trace; 16]),
            span_id: SpanId::from_bytes([id; 8]),
            parent_span_id: parent.map(|p| SpanId::from_bytes([p; 8])),
            kind: ObservationKind::Span,
            name: name.to_string(),
            model: None,
            input: None,
            output: None,
            level: Level::Default,
            status_message: None,
            metadata: Default::default(),
            start_unix_nanos: start,
            end_unix_nanos: Some(start + 2_500_000),
        }
    }

    fn report(spans: Vec<SpanRecord>) -> TraceReport {
        TraceReport {
            bundle_dir: PathBuf::from("/tmp/traces/x"),
            bundle_id: TraceId::from_bytes([9; 16]),
            span_count: spans.len(),
            traces: build_forest(spans),
        }
    }

    #[test]
    fn forest_follows_parent_links_in_start_order() {
        // export order: children before parents
        let spans = vec![
            record(1, 3, Some(1), "context_assembly", 30),
            record(1, 2, Some(1), "document_retrieval", 20),
            record(1, 1, None, "rag_pipeline", 10),
            record(2, 4, None, "chat_completion", 5),
        ];
        let forest = build_forest(spans);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].roots[0].span.name, "chat_completion");

        let rag = &forest[1].roots[0];
        assert_eq!(rag.span.name, "rag_pipeline");
        let names: Vec<&str> = rag.children.iter().map(|c| c.span.name.as_str()).collect();
        assert_eq!(names, ["document_retrieval", "context_assembly"]);
        assert_eq!(forest[1].span_count(), 3);
    }

    #[test]
    fn missing_parent_becomes_root() {
        let forest = build_forest(vec![
            record(1, 2, Some(7), "orphan", 20),
            record(1, 1, None, "root", 10),
        ]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].roots.len(), 2);
        assert_eq!(forest[0].roots[1].span.name, "orphan");
    }

    #[test]
    fn text_tree_shows_nesting_and_errors() {
        let mut generation = record(1, 3, Some(2), "llm_call", 30);
        generation.kind = ObservationKind::Generation;
        generation.model = Some("gpt-3.5-turbo".into());
        generation.level = Level::Error;
        generation.status_message = Some("Sorry, I encountered an error: rate limited".into());

        let text = render_text(&report(vec![
            generation,
            record(1, 2, Some(1), "chat_completion", 20),
            record(1, 1, None, "conversation_session", 10),
        ]));
        assert!(text.starts_with("bundle 09090909"));
        assert!(text.contains("(3 spans, 1 errors)"));
        assert!(text.contains("└─ conversation_session  2.5 ms\n"));
        assert!(text.contains("   └─ chat_completion  2.5 ms\n"));
        assert!(text.contains(
            "      └─ llm_call [generation gpt-3.5-turbo]  2.5 ms  ERROR: Sorry, I encountered an error: rate limited\n"
        ));
    }

    #[test]
    fn html_escapes_and_indents() {
        let mut root = record(1, 1, None, "<script>", 1_700_000_000_000_000_000);
        root.output = Some(Payload::from("a & b"));
        let html = render_html(&report(vec![root, record(1, 2, Some(1), "child", 1_700_000_000_000_000_100)]));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("a &amp; b"));
        assert!(html.contains("padding-left:28px"));
        assert!(html.contains("2023-11-14 22:13:20.000"));
        assert!(html.contains("none recorded"));
    }

    #[test]
    fn long_output_is_truncated() {
        let long = "x".repeat(OUTPUT_PREVIEW + 10);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), OUTPUT_PREVIEW + 1);
        assert!(shown.ends_with('…'));
        assert_eq!(payload_preview(Some(&Payload::map([("k", 1)]))), "{\"k\":1}");
    }
}

//! Process-lifetime wiring of recorder, exporter and provider.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lantern_core::{FlushReport, IdGenerator, SpanRecorder};
use lantern_net::{
    CompletionProvider, HttpTraceSink, OpenAiProvider, ProviderError, ScriptedProvider, SinkError,
    TraceSink,
};
use lantern_runtime::{BatchConfig, BatchExporter, TokioRuntime};
use lantern_workflows::WorkflowContext;

use crate::artifacts::{TraceBundle, TraceBundleSink};
use crate::config::{ConfigError, LanternConfig};

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("completion provider setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("trace sink setup failed: {0}")]
    Sink(#[from] SinkError),
    #[error("trace bundle setup failed: {0}")]
    Bundle(#[from] io::Error),
}

/// Owns the recorder, its batching exporter and the completion provider.
///
/// Create one per process, inside a Tokio runtime, and call
/// [`shutdown`](Self::shutdown) before exiting so queued spans reach the sink.
#[derive(Debug)]
pub struct Session {
    recorder: SpanRecorder,
    exporter: Arc<BatchExporter<TokioRuntime>>,
    provider: Arc<dyn CompletionProvider>,
    model: String,
    bundle: Option<TraceBundle>,
    flush_timeout: Duration,
}

impl Session {
    /// Wires a session from explicit parts.
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        sink: Arc<dyn TraceSink>,
        model: impl Into<String>,
        batch: BatchConfig,
        flush_timeout: Duration,
    ) -> Self {
        let exporter = Arc::new(BatchExporter::tokio(sink, batch));
        let recorder = SpanRecorder::builder()
            .exporter(exporter.clone())
            .flush_timeout(flush_timeout)
            .build();
        Self {
            recorder,
            exporter,
            provider,
            model: model.into(),
            bundle: None,
            flush_timeout,
        }
    }

    /// Builds the provider and sink that `config` describes.
    ///
    /// Offline sessions use the scripted provider. A session writes to a
    /// local trace bundle when offline or when `bundle_dir` is set, and to
    /// the ingestion API otherwise.
    pub fn from_config(config: &LanternConfig) -> Result<Self, SessionError> {
        let provider: Arc<dyn CompletionProvider> = if config.offline {
            Arc::new(ScriptedProvider::new())
        } else {
            let mut provider = OpenAiProvider::new(config.provider_api_key.as_str())?;
            if let Some(base_url) = &config.provider_base_url {
                provider = provider.with_base_url(base_url);
            }
            Arc::new(provider)
        };

        let bundle_base = match (&config.bundle_dir, config.offline) {
            (Some(dir), _) => Some(dir.clone()),
            (None, true) => Some(PathBuf::from(".")),
            (None, false) => None,
        };

        let (sink, bundle): (Arc<dyn TraceSink>, Option<TraceBundle>) = match bundle_base {
            Some(base) => {
                let bundle = TraceBundle::create(base, IdGenerator::new().trace_id())?;
                tracing::info!(dir = %bundle.dir().display(), "writing traces to local bundle");
                (Arc::new(TraceBundleSink::new(bundle.clone())), Some(bundle))
            }
            None => {
                let sink = HttpTraceSink::new(
                    &config.endpoint_url,
                    config.public_key.as_str(),
                    config.secret_key.as_str(),
                )?;
                tracing::info!(url = sink.url(), "sending traces to ingestion API");
                (Arc::new(sink), None)
            }
        };

        let mut session = Self::new(
            provider,
            sink,
            config.model_name.as_str(),
            BatchConfig::default(),
            config.flush_timeout,
        );
        session.bundle = bundle;
        Ok(session)
    }

    pub fn recorder(&self) -> &SpanRecorder {
        &self.recorder
    }

    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The local bundle spans are written to, if any.
    pub fn bundle(&self) -> Option<&TraceBundle> {
        self.bundle.as_ref()
    }

    /// A workflow context sharing this session's recorder and provider.
    pub fn context(&self) -> WorkflowContext {
        WorkflowContext::new(self.recorder.clone(), self.provider.clone()).with_model(self.model.as_str())
    }

    /// Flushes ended spans, then stops the exporter.
    ///
    /// Spans still open at this point are never exported.
    pub async fn shutdown(self) -> FlushReport {
        let open = self.recorder.open_spans();
        if !open.is_empty() {
            tracing::warn!(count = open.len(), "shutting down with open spans");
        }

        let flushed = self.recorder.flush_with_timeout(self.flush_timeout).await;
        let stopped = self.exporter.shutdown(self.flush_timeout).await;
        let report = FlushReport {
            exported: flushed.exported + stopped.exported,
            dropped: flushed.dropped + stopped.dropped,
            pending: stopped.pending,
            timed_out: flushed.timed_out || stopped.timed_out,
        };
        tracing::info!(
            exported = report.exported,
            dropped = report.dropped,
            timed_out = report.timed_out,
            "session shut down"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use lantern_net::MockSink;

    use super::*;

    #[tokio::test]
    async fn shutdown_delivers_ended_spans() {
        let sink = Arc::new(MockSink::new());
        let session = Session::new(
            Arc::new(ScriptedProvider::new()),
            sink.clone(),
            "test-model",
            BatchConfig::default(),
            Duration::from_secs(5),
        );
        let ctx = session.context();
        assert_eq!(ctx.model, "test-model");

        let root = session.recorder().start_span("job", None);
        root.start_span("step", None).unwrap().end();
        root.end();

        let report = session.shutdown().await;
        assert_eq!(report.exported, 2);
        assert!(report.is_complete());
        assert_eq!(sink.records().len(), 2);
    }

    #[tokio::test]
    async fn offline_config_writes_a_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let config = LanternConfig::builder()
            .offline(true)
            .bundle_dir(dir.path())
            .build()
            .unwrap();
        let session = Session::from_config(&config).unwrap();
        let bundle = session.bundle().cloned().unwrap();
        assert!(bundle.dir().starts_with(dir.path().join("traces")));

        session.recorder().start_span("offline", None).end();
        session.shutdown().await;

        let spans = bundle.read_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "offline");
        bundle.validate_manifest().unwrap();
    }
}

//! Runs the demos in sequence and tallies the results.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::knowledge::KnowledgeBase;
use crate::{chains, chat, rag, Error, Result, WorkflowContext};

/// Pause between demos when none is configured.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(5);

/// One runnable demo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Demo {
    SimpleChat,
    Rag,
    Chains,
}

impl Demo {
    pub const ALL: [Demo; 3] = [Demo::SimpleChat, Demo::Rag, Demo::Chains];

    pub fn as_str(&self) -> &'static str {
        match self {
            Demo::SimpleChat => "chat",
            Demo::Rag => "rag",
            Demo::Chains => "chains",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Demo::SimpleChat => "Simple Chat Demo",
            Demo::Rag => "RAG (Retrieval Augmented Generation) Demo",
            Demo::Chains => "Chain Workflows Demo",
        }
    }

    /// Runs the demo with its sample inputs.
    pub async fn run(&self, ctx: &WorkflowContext) -> Result<()> {
        match self {
            Demo::SimpleChat => {
                chat::run_conversation(ctx, &chat::SAMPLE_QUESTIONS).await?;
            }
            Demo::Rag => {
                let kb = KnowledgeBase::cloud_native();
                rag::run_rag_demo(ctx, &kb, &rag::SAMPLE_QUERIES).await?;
            }
            Demo::Chains => chains::run_chains_demo(ctx).await?,
        }
        Ok(())
    }
}

impl fmt::Display for Demo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a demo name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown demo `{0}` (expected chat, rag or chains)")]
pub struct UnknownDemo(pub String);

impl FromStr for Demo {
    type Err = UnknownDemo;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chat" | "simple_chat" => Ok(Demo::SimpleChat),
            "rag" => Ok(Demo::Rag),
            "chains" => Ok(Demo::Chains),
            _ => Err(UnknownDemo(s.to_string())),
        }
    }
}

/// Outcome of [`DemoSuite::run_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteSummary {
    pub successful: usize,
    pub total: usize,
    pub failures: Vec<(Demo, Error)>,
}

impl SuiteSummary {
    pub fn failed(&self) -> usize {
        self.total - self.successful
    }

    pub fn all_succeeded(&self) -> bool {
        self.successful == self.total
    }
}

/// Demos to run, in order, with a pause between consecutive demos.
#[derive(Debug, Clone)]
pub struct DemoSuite {
    demos: Vec<Demo>,
    pause: Duration,
}

impl DemoSuite {
    pub fn new(demos: impl IntoIterator<Item = Demo>) -> Self {
        Self {
            demos: demos.into_iter().collect(),
            pause: DEFAULT_PAUSE,
        }
    }

    pub fn all() -> Self {
        Self::new(Demo::ALL)
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn demos(&self) -> &[Demo] {
        &self.demos
    }

    /// Runs every demo. A failing demo is counted and the next one still runs.
    ///
    /// Finished spans are flushed after each demo.
    pub async fn run_all(&self, ctx: &WorkflowContext) -> SuiteSummary {
        let mut summary = SuiteSummary {
            total: self.demos.len(),
            ..SuiteSummary::default()
        };

        for (i, demo) in self.demos.iter().enumerate() {
            tracing::info!(demo = %demo, "starting {}", demo.description());
            match demo.run(ctx).await {
                Ok(()) => {
                    summary.successful += 1;
                    tracing::info!(demo = %demo, "completed");
                }
                Err(err) => {
                    tracing::error!(demo = %demo, error = %err, "demo failed");
                    summary.failures.push((*demo, err));
                }
            }

            let report = ctx.recorder.flush().await;
            if !report.is_complete() {
                tracing::warn!(
                    demo = %demo,
                    dropped = report.dropped,
                    pending = report.pending,
                    timed_out = report.timed_out,
                    "flush incomplete"
                );
            }

            if i + 1 < self.demos.len() && !self.pause.is_zero() {
                tracing::debug!(pause_ms = self.pause.as_millis() as u64, "pausing before next demo");
                tokio::time::sleep(self.pause).await;
            }
        }

        tracing::info!(
            successful = summary.successful,
            total = summary.total,
            "demo suite finished"
        );
        summary
    }
}

impl Default for DemoSuite {
    fn default() -> Self {
        Self::all()
    }
}

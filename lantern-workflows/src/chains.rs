//! Multi-call chains: explanation, conversation and analyze-then-solve.

use lantern_core::{Level, Payload, SpanUpdate};
use lantern_net::ChatMessage;

use crate::{record_outcome, Reply, Result, WorkflowContext};

const EXPLAINER_PROMPT: &str =
    "You are a helpful technical expert who explains complex topics clearly.";
const CONVERSATION_PROMPT: &str = "You are a helpful cloud-native expert. Continue the conversation naturally based on the previous context.";
const ANALYST_PROMPT: &str = "You are a cloud-native expert. Analyze problems and identify key challenges and potential solutions.";
const PLANNER_PROMPT: &str = "You are a cloud-native expert. Provide detailed implementation plans with specific tools and steps.";

/// `(topic, audience)` pairs for the explanation chain.
pub const EXPLANATION_TOPICS: [(&str, &str); 4] = [
    ("Kubernetes", "a beginner developer"),
    ("Microservices", "a DevOps engineer"),
    ("Observability", "a product manager"),
    ("Container Security", "a security analyst"),
];

/// User turns for the conversation chain.
pub const CONVERSATION_STEPS: [&str; 4] = [
    "Hi! I'm working on a cloud-native application. Can you help me understand the basics?",
    "What are the key components I need to consider for monitoring?",
    "How does this differ from traditional application monitoring?",
    "What tools would you recommend for a Kubernetes environment?",
];

/// Problems for the multi-step workflow.
pub const WORKFLOW_PROBLEMS: [&str; 3] = [
    "Our microservices are experiencing high latency and we can't identify the bottleneck",
    "We need to implement zero-downtime deployments for our Kubernetes applications",
    "Our application logs are scattered across multiple services and hard to correlate",
];

/// Explains `topic` to `audience` under an `explanation_chain` root span.
pub async fn explanation_chain(ctx: &WorkflowContext, topic: &str, audience: &str) -> Result<Reply> {
    let input = Payload::map([("topic", topic), ("audience", audience)]);
    let root = ctx.recorder.start_span("explanation_chain", Some(input));

    let prompt = format!("Explain {topic} to {audience} in simple terms. Include practical examples.");
    let generation = match root.start_generation("llm_explanation", ctx.model.as_str(), Some(prompt.as_str().into())) {
        Ok(generation) => generation,
        Err(err) => {
            root.end();
            return Err(err.into());
        }
    };

    let outcome = ctx
        .complete(
            vec![ChatMessage::system(EXPLAINER_PROMPT), ChatMessage::user(prompt)],
            0.7,
            400,
        )
        .await;
    let reply = record_outcome(&generation, outcome, "Error: ");
    generation.end();

    let update = SpanUpdate::new().name("explanation_chain");
    root.update(if reply.failed {
        update.output(reply.text.as_str()).level(Level::Error).status_message(reply.text.as_str())
    } else {
        update.output(reply.text.as_str())
    });
    root.end();
    Ok(reply)
}

/// A multi-turn conversation under one `conversation_chain` root span.
///
/// Each turn is a `conversation_turn_{i}` child. Only successful turns are
/// added to the history sent with later turns.
pub async fn conversation_chain(ctx: &WorkflowContext, steps: &[&str]) -> Result<Vec<Reply>> {
    let root = ctx.recorder.start_span("conversation_chain", None);
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut replies = Vec::with_capacity(steps.len());

    for (i, message) in steps.iter().enumerate() {
        let turn = match root.start_span(format!("conversation_turn_{}", i + 1), Some((*message).into())) {
            Ok(turn) => turn,
            Err(err) => {
                root.end();
                return Err(err.into());
            }
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(CONVERSATION_PROMPT));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(*message));

        let outcome = ctx.complete(messages, 0.7, 300).await;
        let reply = record_outcome(&turn, outcome, "Error: ");
        turn.end();

        if !reply.failed {
            history.push(ChatMessage::user(*message));
            history.push(ChatMessage::assistant(reply.text.as_str()));
        }
        tracing::info!(turn = i + 1, failed = reply.failed, "conversation turn finished");
        replies.push(reply);
    }

    root.update(
        SpanUpdate::new()
            .name("conversation_chain")
            .output(format!("Completed conversation with {} turns", steps.len()))
            .metadata("total_turns", steps.len()),
    );
    root.end();
    Ok(replies)
}

/// What the analyze-then-solve workflow produced for one problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOutcome {
    pub problem: String,
    pub analysis: Reply,
    /// `None` when analysis failed and the solution step was skipped.
    pub solution: Option<Reply>,
}

/// Analysis, then a solution plan, under one `multi_step_workflow` root span.
pub async fn multi_step_workflow(ctx: &WorkflowContext, problem: &str) -> Result<WorkflowOutcome> {
    let root = ctx.recorder.start_span("multi_step_workflow", Some(problem.into()));
    let result = workflow_steps(ctx, &root, problem).await;
    if result.is_err() {
        root.end();
    }
    result
}

async fn workflow_steps(
    ctx: &WorkflowContext,
    root: &lantern_core::SpanHandle,
    problem: &str,
) -> Result<WorkflowOutcome> {
    let analysis_span = root.start_span("problem_analysis", Some(problem.into()))?;
    let outcome = ctx
        .complete(
            vec![
                ChatMessage::system(ANALYST_PROMPT),
                ChatMessage::user(format!(
                    "Analyze this cloud-native problem: {problem}. Identify the key challenges and potential solutions."
                )),
            ],
            0.3,
            400,
        )
        .await;
    let analysis = record_outcome(&analysis_span, outcome, "Analysis error: ");
    analysis_span.end();

    if analysis.failed {
        root.update(SpanUpdate::new().level(Level::Error).status_message(analysis.text.as_str()));
        root.end();
        return Ok(WorkflowOutcome {
            problem: problem.to_string(),
            analysis,
            solution: None,
        });
    }

    let input = Payload::map([("problem", problem), ("analysis", analysis.text.as_str())]);
    let solution_span = root.start_span("solution_generation", Some(input))?;
    let outcome = ctx
        .complete(
            vec![
                ChatMessage::system(PLANNER_PROMPT),
                ChatMessage::user(format!(
                    "Based on this analysis: {}\n\nFor the original problem: {problem}\n\nProvide a detailed implementation plan with specific tools and steps.",
                    analysis.text
                )),
            ],
            0.3,
            500,
        )
        .await;
    let solution = record_outcome(&solution_span, outcome, "Solution error: ");
    solution_span.end();

    root.update(
        SpanUpdate::new()
            .name("multi_step_workflow")
            .output(format!("Completed analysis and solution for: {problem}"))
            .metadata("problem", problem),
    );
    root.end();
    Ok(WorkflowOutcome {
        problem: problem.to_string(),
        analysis,
        solution: Some(solution),
    })
}

/// Runs all three chains with their sample inputs.
pub async fn run_chains_demo(ctx: &WorkflowContext) -> Result<()> {
    for (topic, audience) in EXPLANATION_TOPICS {
        tracing::info!(topic, audience, "explaining");
        explanation_chain(ctx, topic, audience).await?;
    }
    conversation_chain(ctx, &CONVERSATION_STEPS).await?;
    for problem in WORKFLOW_PROBLEMS {
        tracing::info!(problem, "solving");
        multi_step_workflow(ctx, problem).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lantern_core::{InMemoryExporter, ObservationKind, SpanRecorder};
    use lantern_net::{ProviderError, Role, ScriptedProvider};

    use super::*;

    fn context(provider: ScriptedProvider) -> (WorkflowContext, Arc<InMemoryExporter>, Arc<ScriptedProvider>) {
        let exporter = Arc::new(InMemoryExporter::new());
        let recorder = SpanRecorder::builder().exporter(exporter.clone()).build();
        let provider = Arc::new(provider);
        (WorkflowContext::new(recorder, provider.clone()), exporter, provider)
    }

    fn err() -> ProviderError {
        ProviderError::Http {
            status: 500,
            body: "upstream".into(),
        }
    }

    #[tokio::test]
    async fn explanation_uses_prompt_template() {
        let (ctx, exporter, provider) = context(ScriptedProvider::new().reply("Pods are..."));
        let reply = explanation_chain(&ctx, "Kubernetes", "a beginner developer").await.unwrap();
        assert_eq!(reply.text, "Pods are...");

        let request = &provider.requests()[0];
        assert_eq!(
            request.last_user_message(),
            Some("Explain Kubernetes to a beginner developer in simple terms. Include practical examples.")
        );
        assert_eq!(request.max_tokens, 400);

        ctx.recorder.flush().await;
        let spans = exporter.exported();
        assert_eq!(spans[0].name, "llm_explanation");
        assert_eq!(spans[0].kind, ObservationKind::Generation);
        assert_eq!(spans[1].name, "explanation_chain");
        assert_eq!(
            spans[1].input.as_ref().and_then(|i| i.get("audience")),
            Some(&Payload::from("a beginner developer"))
        );
        assert_eq!(spans[1].output, Some(Payload::from("Pods are...")));
    }

    #[tokio::test]
    async fn explanation_failure_uses_error_prefix() {
        let (ctx, exporter, _) = context(ScriptedProvider::new().error(err()));
        let reply = explanation_chain(&ctx, "Observability", "a product manager").await.unwrap();
        assert_eq!(reply.text, "Error: HTTP 500: upstream");
        ctx.recorder.flush().await;
        assert!(exporter.exported().iter().all(|s| s.level == Level::Error));
    }

    #[tokio::test]
    async fn conversation_history_grows_only_on_success() {
        let provider = ScriptedProvider::new()
            .reply("Sure.")
            .error(err())
            .reply("Compared to monoliths...")
            .reply("Prometheus.");
        let (ctx, exporter, provider) = context(provider);
        let replies = conversation_chain(&ctx, &CONVERSATION_STEPS).await.unwrap();
        assert_eq!(replies.len(), 4);
        assert!(replies[1].failed);
        assert_eq!(replies[1].text, "Error: HTTP 500: upstream");

        let requests = provider.requests();
        let lens: Vec<usize> = requests.iter().map(|r| r.messages.len()).collect();
        // system + history + user; the failed second turn adds nothing.
        assert_eq!(lens, vec![2, 4, 4, 6]);
        assert_eq!(requests[3].messages[2].content, "Sure.");
        assert_eq!(requests[3].messages[4].role, Role::Assistant);
        assert_eq!(requests[3].messages[4].content, "Compared to monoliths...");

        ctx.recorder.flush().await;
        let spans = exporter.exported();
        assert_eq!(spans.len(), 5);
        assert_eq!(spans[1].name, "conversation_turn_2");
        assert_eq!(spans[1].level, Level::Error);
        let root = &spans[4];
        assert_eq!(root.name, "conversation_chain");
        assert_eq!(root.metadata["total_turns"], Payload::Int(4));
        assert_eq!(
            root.output,
            Some(Payload::from("Completed conversation with 4 turns"))
        );
    }

    #[tokio::test]
    async fn workflow_runs_analysis_then_solution() {
        let provider = ScriptedProvider::new().reply("Tracing gaps.").reply("Adopt OpenTelemetry.");
        let (ctx, exporter, provider) = context(provider);
        let outcome = multi_step_workflow(&ctx, WORKFLOW_PROBLEMS[0]).await.unwrap();
        assert_eq!(outcome.solution.unwrap().text, "Adopt OpenTelemetry.");
        assert!(provider.requests()[1]
            .last_user_message()
            .unwrap()
            .starts_with("Based on this analysis: Tracing gaps.\n\nFor the original problem: "));

        ctx.recorder.flush().await;
        let spans = exporter.exported();
        let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["problem_analysis", "solution_generation", "multi_step_workflow"]);
        assert_eq!(
            spans[1].input.as_ref().and_then(|i| i.get("analysis")),
            Some(&Payload::from("Tracing gaps."))
        );
        assert_eq!(
            spans[2].output,
            Some(Payload::from(format!(
                "Completed analysis and solution for: {}",
                WORKFLOW_PROBLEMS[0]
            )))
        );
        assert_eq!(spans[2].metadata["problem"], Payload::from(WORKFLOW_PROBLEMS[0]));
    }

    #[tokio::test]
    async fn failed_analysis_skips_solution() {
        let (ctx, exporter, provider) = context(ScriptedProvider::new().error(err()));
        let outcome = multi_step_workflow(&ctx, WORKFLOW_PROBLEMS[1]).await.unwrap();
        assert!(outcome.analysis.failed);
        assert_eq!(outcome.analysis.text, "Analysis error: HTTP 500: upstream");
        assert!(outcome.solution.is_none());
        assert_eq!(provider.call_count(), 1);

        ctx.recorder.flush().await;
        let spans = exporter.exported();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].level, Level::Error);
        assert_eq!(spans[1].name, "multi_step_workflow");
        assert_eq!(spans[1].level, Level::Error);
    }

    #[tokio::test]
    async fn failed_solution_still_completes_workflow() {
        let provider = ScriptedProvider::new().reply("Analysis.").error(err());
        let (ctx, exporter, _) = context(provider);
        let outcome = multi_step_workflow(&ctx, WORKFLOW_PROBLEMS[2]).await.unwrap();
        assert_eq!(outcome.solution.unwrap().text, "Solution error: HTTP 500: upstream");

        ctx.recorder.flush().await;
        let spans = exporter.exported();
        assert_eq!(spans[1].level, Level::Error);
        assert_eq!(spans[2].level, Level::Default);
    }
}

//! Steps that delegate to an external agent or reasoning routine.

use super::StepExecutor;
use crate::context::{NodeInputs, PipelineContext, DEFAULT_INPUT_HANDLE};
use crate::errors::StepError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// An external language-model agent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Agent: Send + Sync {
    /// Runs the agent on a prompt and returns its answer.
    async fn run(&self, prompt: Value) -> anyhow::Result<Value>;
}

/// Result of a reasoning routine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningOutcome {
    /// The final answer.
    pub output: Value,
    /// Number of reasoning steps taken.
    pub steps_taken: usize,
    /// Whether the routine reached an answer.
    pub success: bool,
}

/// A multi-step reasoning routine driving an agent (chain-of-thought,
/// reflection, and so on).
#[async_trait]
pub trait ReasoningPattern: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs the routine.
    async fn execute(&self, agent: &dyn Agent, input: Value) -> anyhow::Result<ReasoningOutcome>;
}

/// Where an agent step takes its prompt from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    /// A single input handle, falling back to the pipeline input.
    Handle(String),
    /// Every input as one JSON object keyed by handle.
    Bundle,
}

impl Default for PromptSource {
    fn default() -> Self {
        Self::Handle(DEFAULT_INPUT_HANDLE.to_string())
    }
}

impl PromptSource {
    fn resolve(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        match self {
            Self::Handle(handle) => Ok(inputs
                .get(handle)?
                .cloned()
                .unwrap_or_else(|| ctx.input().clone())),
            Self::Bundle => inputs.to_object(),
        }
    }
}

/// Runs an [`Agent`] on the node's input.
#[derive(Clone)]
pub struct AgentStep {
    agent: Arc<dyn Agent>,
    prompt: PromptSource,
}

impl AgentStep {
    /// Creates an agent step reading the `input` handle.
    #[must_use]
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            prompt: PromptSource::default(),
        }
    }

    /// Reads the prompt from another handle.
    #[must_use]
    pub fn with_prompt_key(mut self, handle: impl Into<String>) -> Self {
        self.prompt = PromptSource::Handle(handle.into());
        self
    }

    /// Passes all inputs to the agent as one object.
    #[must_use]
    pub fn with_input_bundle(mut self) -> Self {
        self.prompt = PromptSource::Bundle;
        self
    }
}

impl Debug for AgentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStep")
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for AgentStep {
    fn kind(&self) -> &'static str {
        "agent"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        let prompt = self.prompt.resolve(ctx, inputs)?;
        Ok(self.agent.run(prompt).await?)
    }
}

/// Runs a [`ReasoningPattern`] with an agent on the node's input.
///
/// An outcome that did not reach an answer fails the attempt, so the node's
/// retry policy and failure strategy apply to it.
#[derive(Clone)]
pub struct ReasoningStep {
    pattern: Arc<dyn ReasoningPattern>,
    agent: Arc<dyn Agent>,
    input_key: String,
}

impl ReasoningStep {
    /// Creates a reasoning step reading the `input` handle.
    #[must_use]
    pub fn new(pattern: Arc<dyn ReasoningPattern>, agent: Arc<dyn Agent>) -> Self {
        Self {
            pattern,
            agent,
            input_key: DEFAULT_INPUT_HANDLE.to_string(),
        }
    }

    /// Reads the input from another handle.
    #[must_use]
    pub fn with_input_key(mut self, handle: impl Into<String>) -> Self {
        self.input_key = handle.into();
        self
    }
}

impl Debug for ReasoningStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningStep")
            .field("pattern", &self.pattern.name())
            .field("input_key", &self.input_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for ReasoningStep {
    fn kind(&self) -> &'static str {
        "reasoning"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        let input = inputs
            .get(&self.input_key)?
            .cloned()
            .unwrap_or_else(|| ctx.input().clone());

        let outcome = self.pattern.execute(self.agent.as_ref(), input).await?;
        debug!(
            pattern = %self.pattern.name(),
            steps_taken = outcome.steps_taken,
            success = outcome.success,
            "Reasoning finished"
        );

        if outcome.success {
            Ok(outcome.output)
        } else {
            Err(StepError::message(format!(
                "reasoning pattern '{}' gave up after {} step(s)",
                self.pattern.name(),
                outcome.steps_taken
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Delivered;
    use mockall::predicate::eq;
    use serde_json::json;

    struct TwoPass;

    #[async_trait]
    impl ReasoningPattern for TwoPass {
        fn name(&self) -> &str {
            "two-pass"
        }

        async fn execute(&self, agent: &dyn Agent, input: Value) -> anyhow::Result<ReasoningOutcome> {
            let draft = agent.run(input).await?;
            let output = agent.run(draft).await?;
            Ok(ReasoningOutcome {
                output,
                steps_taken: 2,
                success: true,
            })
        }
    }

    struct GiveUp;

    #[async_trait]
    impl ReasoningPattern for GiveUp {
        fn name(&self) -> &str {
            "give-up"
        }

        async fn execute(&self, _agent: &dyn Agent, _input: Value) -> anyhow::Result<ReasoningOutcome> {
            Ok(ReasoningOutcome {
                output: Value::Null,
                steps_taken: 5,
                success: false,
            })
        }
    }

    #[tokio::test]
    async fn test_agent_step_uses_input_handle() {
        let mut agent = MockAgent::new();
        agent
            .expect_run()
            .with(eq(json!("question")))
            .times(1)
            .returning(|_| Ok(json!("answer")));

        let step = AgentStep::new(Arc::new(agent));
        let ctx = PipelineContext::detached(json!("unused"));
        let inputs = NodeInputs::from_values([("input", json!("question"))]);

        assert_eq!(step.execute(&ctx, &inputs).await.unwrap(), json!("answer"));
    }

    #[tokio::test]
    async fn test_agent_step_falls_back_to_pipeline_input() {
        let mut agent = MockAgent::new();
        agent
            .expect_run()
            .with(eq(json!({"topic": "rust"})))
            .returning(|p| Ok(p));

        let step = AgentStep::new(Arc::new(agent)).with_prompt_key("prompt");
        let ctx = PipelineContext::detached(json!({"topic": "rust"}));

        let out = step.execute(&ctx, &NodeInputs::new()).await.unwrap();
        assert_eq!(out, json!({"topic": "rust"}));
    }

    #[tokio::test]
    async fn test_agent_step_bundle_and_errors() {
        let mut agent = MockAgent::new();
        agent
            .expect_run()
            .with(eq(json!({"a": 1, "b": null})))
            .returning(|_| Err(anyhow::anyhow!("rate limited")));

        let step = AgentStep::new(Arc::new(agent)).with_input_bundle();
        let ctx = PipelineContext::detached(json!(null));
        let mut inputs = NodeInputs::from_values([("a", json!(1))]);
        inputs.push("b", Delivered::Absent { node_id: "x".into() });

        let err = step.execute(&ctx, &inputs).await.unwrap_err();
        assert!(matches!(err, StepError::Collaborator(_)));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_reasoning_step_returns_pattern_output() {
        let mut agent = MockAgent::new();
        agent.expect_run().times(2).returning(|p| Ok(json!(format!("{}!", p.as_str().unwrap_or("")))));

        let step = ReasoningStep::new(Arc::new(TwoPass), Arc::new(agent));
        let ctx = PipelineContext::detached(json!(null));
        let inputs = NodeInputs::from_values([("input", json!("hm"))]);

        assert_eq!(step.execute(&ctx, &inputs).await.unwrap(), json!("hm!!"));
    }

    #[tokio::test]
    async fn test_reasoning_step_fails_when_pattern_gives_up() {
        let step = ReasoningStep::new(Arc::new(GiveUp), Arc::new(MockAgent::new()));
        let ctx = PipelineContext::detached(json!("x"));

        let err = step.execute(&ctx, &NodeInputs::new()).await.unwrap_err();
        assert!(err.to_string().contains("give-up"));
    }
}

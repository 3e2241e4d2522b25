//! Step executors: the work bound to each node.
//!
//! The engine only talks to [`StepExecutor`]. Fan-out and fan-in nodes tell
//! the scheduler what they need through the trait's hook methods, so the
//! engine never inspects concrete step types.

mod agent;
mod batch;
mod branch;
mod callable;
mod fan;

pub use agent::{Agent, AgentStep, PromptSource, ReasoningOutcome, ReasoningPattern, ReasoningStep};
pub use batch::{BatchCallback, BatchLlmStep, BatchReport};
pub use branch::BranchStep;
pub use callable::{CallableStep, FnStep};
pub use fan::{
    branch_handle, merge_handle, FanInStep, FanOutStep, MergeFn, MergeStrategy, SplitFn,
    SplitStrategy,
};

#[cfg(test)]
pub use agent::MockAgent;

use crate::context::{NodeInputs, PipelineContext};
use crate::errors::StepError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;

/// A unit of work executed for one node.
#[async_trait]
pub trait StepExecutor: Send + Sync + Debug {
    /// Short name of the step variant, used in logs and events.
    fn kind(&self) -> &'static str;

    /// Runs one attempt of the step.
    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs)
        -> Result<Value, StepError>;

    /// Input handles that must each be fed by at least one edge.
    fn required_input_handles(&self) -> &[String] {
        &[]
    }

    /// Maximum number of direct successors allowed to run at once.
    fn branch_concurrency(&self) -> Option<usize> {
        None
    }

    /// How long to wait for the remaining inputs once the first
    /// predecessor has settled.
    fn merge_timeout(&self) -> Option<Duration> {
        None
    }
}

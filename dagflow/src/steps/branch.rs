//! Router steps for conditional branching.

use super::StepExecutor;
use crate::context::{NodeInputs, PipelineContext};
use crate::errors::StepError;
use crate::pipeline::Condition;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Picks a branch key; downstream nodes gate on it with
/// [`BranchStep::route_is`].
pub struct BranchStep<F>
where
    F: Fn(&PipelineContext, &NodeInputs) -> Result<String, StepError> + Send + Sync,
{
    router: F,
}

impl<F> BranchStep<F>
where
    F: Fn(&PipelineContext, &NodeInputs) -> Result<String, StepError> + Send + Sync,
{
    /// Creates a router step.
    pub const fn new(router: F) -> Self {
        Self { router }
    }
}

impl BranchStep<fn(&PipelineContext, &NodeInputs) -> Result<String, StepError>> {
    /// A condition that holds when `router_id` completed with `key`.
    #[must_use]
    pub fn route_is(router_id: impl Into<String>, key: impl Into<String>) -> Condition {
        let router_id = router_id.into();
        let key = key.into();
        Arc::new(move |ctx: &PipelineContext| {
            ctx.completed_result(&router_id).as_ref().and_then(Value::as_str) == Some(key.as_str())
        })
    }
}

impl<F> Debug for BranchStep<F>
where
    F: Fn(&PipelineContext, &NodeInputs) -> Result<String, StepError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> StepExecutor for BranchStep<F>
where
    F: Fn(&PipelineContext, &NodeInputs) -> Result<String, StepError> + Send + Sync,
{
    fn kind(&self) -> &'static str {
        "branch"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        (self.router)(ctx, inputs).map(Value::String)
    }
}

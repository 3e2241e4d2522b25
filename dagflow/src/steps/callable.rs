//! Steps wrapping plain Rust closures.

use super::StepExecutor;
use crate::context::{NodeInputs, PipelineContext};
use crate::errors::StepError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// A step backed by a synchronous closure.
pub struct FnStep<F>
where
    F: Fn(&PipelineContext, &NodeInputs) -> Result<Value, StepError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&PipelineContext, &NodeInputs) -> Result<Value, StepError> + Send + Sync,
{
    /// Creates a new function-based step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStep<F>
where
    F: Fn(&PipelineContext, &NodeInputs) -> Result<Value, StepError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> StepExecutor for FnStep<F>
where
    F: Fn(&PipelineContext, &NodeInputs) -> Result<Value, StepError> + Send + Sync,
{
    fn kind(&self) -> &'static str {
        "callable"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        (self.func)(ctx, inputs)
    }
}

/// A step backed by an async closure.
///
/// The closure receives its own handle to the context and a copy of the
/// inputs, so the returned future can be `'static`.
pub struct CallableStep<F, Fut>
where
    F: Fn(PipelineContext, NodeInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> CallableStep<F, Fut>
where
    F: Fn(PipelineContext, NodeInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    /// Creates a new async function-based step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for CallableStep<F, Fut>
where
    F: Fn(PipelineContext, NodeInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallableStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F, Fut> StepExecutor for CallableStep<F, Fut>
where
    F: Fn(PipelineContext, NodeInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send,
{
    fn kind(&self) -> &'static str {
        "callable"
    }

    async fn execute(&self, ctx: &PipelineContext, inputs: &NodeInputs) -> Result<Value, StepError> {
        (self.func)(ctx.clone(), inputs.clone()).await
    }
}

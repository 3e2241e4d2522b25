//! The concurrent scheduler.
//!
//! One engine loop owns all bookkeeping for a run: remaining in-degrees,
//! the ready queue, recorded results and fan-in deadlines. Node work runs in
//! spawned tokio tasks that report back through their join handles; the
//! loop reacts to whichever task finishes first.

use super::{
    with_retry, Dag, DagNode, FailureStrategy, PipelineResult, RetryPolicy, SuccessorClosure,
};
use crate::config::EngineConfig;
use crate::context::{Delivered, NodeInputs, PipelineContext, RunIdentity, DEFAULT_INPUT_HANDLE};
use crate::core::{NodeOutcome, NodeResult, PipelineStatus, SkipReason, TraceEntry};
use crate::errors::{
    FanInTimeoutError, NodeError, NodeExecutionError, PipelineCancelledError, StepError,
};
use crate::events::{event_types, EventSink, NoOpEventSink};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinError};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

type Joined = (String, Result<Result<Value, StepError>, JoinError>);

/// Runs [`Dag`]s.
///
/// An engine holds configuration and an event sink and can run any number
/// of graphs, sequentially or concurrently; each run gets its own context.
pub struct PipelineEngine {
    config: EngineConfig,
    event_sink: Arc<dyn EventSink>,
}

impl Default for PipelineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineEngine {
    /// Creates an engine with default configuration and no event sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a graph with a fresh run identity.
    pub async fn run(&self, dag: &Dag, input: Value) -> PipelineResult {
        self.run_with_identity(dag, input, RunIdentity::new()).await
    }

    /// Runs a graph under a caller-supplied identity.
    ///
    /// Every node reaches a terminal state before this returns; failures
    /// are reported in the result, never as an error.
    pub async fn run_with_identity(
        &self,
        dag: &Dag,
        input: Value,
        identity: RunIdentity,
    ) -> PipelineResult {
        let dag = Arc::new(dag.clone());
        let sink: Arc<dyn EventSink> = if self.config.emit_events {
            self.event_sink.clone()
        } else {
            Arc::new(NoOpEventSink)
        };
        let ctx = PipelineContext::from_parts(dag.clone(), input, identity, sink);

        let span = info_span!(
            "pipeline",
            pipeline = %dag.name(),
            run_id = %ctx.run_id(),
            correlation_id = %ctx.correlation_id(),
        );
        Run::new(&self.config, dag, ctx).execute().instrument(span).await
    }
}

struct Launch {
    started_at: DateTime<Utc>,
    clock: Instant,
    attempts: Arc<AtomicU32>,
}

enum Wake {
    Finished(Joined),
    FanInDeadline,
    AbortDeadline,
    Idle,
}

/// State of one run, owned by the engine loop.
struct Run<'e> {
    config: &'e EngineConfig,
    dag: Arc<Dag>,
    ctx: PipelineContext,
    remaining: HashMap<String, usize>,
    ready: VecDeque<String>,
    results: HashMap<String, NodeResult>,
    trace: Vec<TraceEntry>,
    in_flight: FuturesUnordered<BoxFuture<'static, Joined>>,
    launches: HashMap<String, Launch>,
    abort_handles: HashMap<String, AbortHandle>,
    global_limit: Option<Arc<Semaphore>>,
    branch_limits: HashMap<String, Arc<Semaphore>>,
    fan_in_deadlines: HashMap<String, Instant>,
    closure: Option<SuccessorClosure>,
    aborted_by: Option<String>,
    abort_deadline: Option<Instant>,
}

impl<'e> Run<'e> {
    fn new(config: &'e EngineConfig, dag: Arc<Dag>, ctx: PipelineContext) -> Self {
        let remaining: HashMap<String, usize> = dag
            .node_ids()
            .iter()
            .map(|id| (id.clone(), dag.in_degree(id)))
            .collect();
        let ready = dag
            .node_ids()
            .iter()
            .filter(|id| remaining.get(*id) == Some(&0))
            .cloned()
            .collect();
        let branch_limits = dag
            .nodes()
            .filter_map(|node| {
                node.step
                    .branch_concurrency()
                    .map(|limit| (node.id.clone(), Arc::new(Semaphore::new(limit.max(1)))))
            })
            .collect();

        Self {
            config,
            global_limit: config
                .max_concurrency
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
            dag,
            ctx,
            remaining,
            ready,
            results: HashMap::new(),
            trace: Vec::new(),
            in_flight: FuturesUnordered::new(),
            launches: HashMap::new(),
            abort_handles: HashMap::new(),
            branch_limits,
            fan_in_deadlines: HashMap::new(),
            closure: None,
            aborted_by: None,
            abort_deadline: None,
        }
    }

    async fn execute(mut self) -> PipelineResult {
        let started_at = Utc::now();
        let clock = Instant::now();

        info!(nodes = self.dag.node_count(), edges = self.dag.edge_count(), "Pipeline started");
        self.ctx.try_emit_event(
            event_types::PIPELINE_STARTED,
            Some(json!({ "nodes": self.dag.node_count() })),
        );

        loop {
            if self.aborted_by.is_none() {
                while let Some(id) = self.ready.pop_front() {
                    self.launch(id);
                }
            }

            let idle = self.in_flight.is_empty()
                && (self.aborted_by.is_some() || self.fan_in_deadlines.is_empty());
            if idle {
                break;
            }

            let fan_in_deadline = self.fan_in_deadlines.values().min().copied();
            let abort_deadline = self.abort_deadline;
            let wake = tokio::select! {
                Some(joined) = self.in_flight.next() => Wake::Finished(joined),
                () = sleep_until(fan_in_deadline) => Wake::FanInDeadline,
                () = sleep_until(abort_deadline) => Wake::AbortDeadline,
                else => Wake::Idle,
            };

            match wake {
                Wake::Finished((id, joined)) => self.on_task_finished(id, joined),
                Wake::FanInDeadline => self.expire_fan_ins(),
                Wake::AbortDeadline => self.abort_stragglers(),
                Wake::Idle => break,
            }
        }

        if let Some(aborted_by) = self.aborted_by.clone() {
            let leftover: Vec<String> = self
                .dag
                .node_ids()
                .iter()
                .filter(|id| !self.results.contains_key(*id))
                .cloned()
                .collect();
            for id in leftover {
                self.record_skip(&id, SkipReason::PipelineAborted {
                    node: aborted_by.clone(),
                });
            }
        }

        self.finish(started_at, clock)
    }

    fn launch(&mut self, id: String) {
        let Some(node) = self.dag.node(&id).cloned() else {
            return;
        };

        if !self.condition_holds(&node) {
            debug!(node = %id, "Condition not met, skipping");
            self.record_skip(&id, SkipReason::ConditionNotMet);
            self.release_successors(&id);
            return;
        }

        let inputs = self.gather_inputs(&id);
        let semaphores = self.semaphores_for(&id);
        let retry = node
            .options
            .retry
            .clone()
            .unwrap_or_else(|| self.config.default_retry.clone());
        let timeout = node.options.timeout.or_else(|| self.config.default_timeout());
        let attempts = Arc::new(AtomicU32::new(0));

        let span = info_span!("node", node = %id, kind = node.step.kind());
        let task = run_node(
            node,
            self.ctx.clone(),
            inputs,
            semaphores,
            retry,
            timeout,
            attempts.clone(),
        )
        .instrument(span);
        let handle = tokio::spawn(task);

        self.abort_handles.insert(id.clone(), handle.abort_handle());
        self.launches.insert(
            id.clone(),
            Launch {
                started_at: Utc::now(),
                clock: Instant::now(),
                attempts,
            },
        );
        self.in_flight.push(Box::pin(async move { (id, handle.await) }));
    }

    fn condition_holds(&self, node: &DagNode) -> bool {
        let Some(condition) = node.options.condition.as_ref() else {
            return true;
        };
        let ctx = &self.ctx;
        std::panic::catch_unwind(AssertUnwindSafe(|| condition(ctx))).unwrap_or_else(|_| {
            warn!(node = %node.id, "Condition panicked, treating as false");
            false
        })
    }

    fn gather_inputs(&self, id: &str) -> NodeInputs {
        let mut inputs = NodeInputs::new();
        let mut incoming = self.dag.incoming_edges(id).peekable();
        if incoming.peek().is_none() {
            inputs.push(DEFAULT_INPUT_HANDLE, Delivered::Value(self.ctx.input().clone()));
            return inputs;
        }

        for edge in incoming {
            let absent = || Delivered::Absent {
                node_id: edge.source.clone(),
            };
            let delivered = match self.results.get(&edge.source).map(|r| &r.outcome) {
                Some(NodeOutcome::Completed(value)) if edge.carries_whole_output() => {
                    Delivered::Value(value.clone())
                }
                Some(NodeOutcome::Completed(value)) => value
                    .get(&edge.source_handle)
                    .cloned()
                    .map_or_else(absent, Delivered::Value),
                Some(NodeOutcome::Failed(err)) => Delivered::Failed {
                    node_id: edge.source.clone(),
                    message: err.to_string(),
                },
                Some(NodeOutcome::Skipped(_)) | None => absent(),
            };
            inputs.push(edge.target_handle.clone(), delivered);
        }
        inputs
    }

    /// Global limit first, then fan-out limits by predecessor id.
    fn semaphores_for(&self, id: &str) -> Vec<Arc<Semaphore>> {
        let mut semaphores: Vec<Arc<Semaphore>> = self.global_limit.iter().cloned().collect();
        let mut predecessors: Vec<&String> = self.dag.predecessors(id).iter().collect();
        predecessors.sort();
        for pred in predecessors {
            if let Some(limit) = self.branch_limits.get(pred) {
                semaphores.push(limit.clone());
            }
        }
        semaphores
    }

    fn on_task_finished(&mut self, id: String, joined: Result<Result<Value, StepError>, JoinError>) {
        self.abort_handles.remove(&id);
        let launch = self.launches.remove(&id);
        let attempts = launch
            .as_ref()
            .map_or(0, |l| l.attempts.load(Ordering::SeqCst));
        let started_at = launch.as_ref().map(|l| l.started_at);
        let latency_ms = launch.as_ref().map_or(0.0, |l| l.clock.elapsed().as_secs_f64() * 1000.0);

        let outcome = joined.unwrap_or_else(|e| Err(join_error_to_step(e)));

        if let Some(aborted_by) = self.aborted_by.clone() {
            if outcome.is_ok() {
                debug!(node = %id, "Discarding result that arrived after abort");
            }
            let err = NodeError::from(PipelineCancelledError {
                node_id: id.clone(),
                aborted_by,
            });
            self.record_failure(&id, err, attempts, started_at, latency_ms);
            return;
        }

        match outcome {
            Ok(value) => {
                if let Err(e) = self.ctx.set_node_result(&id, value.clone()) {
                    warn!(node = %id, error = %e, "Result already recorded");
                }
                info!(node = %id, attempts, latency_ms, "Node completed");
                self.ctx.try_emit_event(
                    event_types::NODE_COMPLETED,
                    Some(json!({
                        "node": id,
                        "attempts": attempts,
                        "duration_ms": latency_ms,
                    })),
                );
                self.record(NodeResult {
                    node_id: id.clone(),
                    outcome: NodeOutcome::Completed(value),
                    attempts,
                    latency_ms,
                    started_at,
                    finished_at: Utc::now(),
                });
                self.release_successors(&id);
            }
            Err(step_error) => {
                let err = NodeError::from(NodeExecutionError::new(&id, attempts.max(1), step_error));
                self.record_failure(&id, err, attempts.max(1), started_at, latency_ms);
                self.apply_failure_strategy(&id);
            }
        }
    }

    fn apply_failure_strategy(&mut self, id: &str) {
        let strategy = self
            .dag
            .node(id)
            .map(|n| n.options.failure_strategy)
            .unwrap_or_default();

        match strategy {
            FailureStrategy::Propagate => self.release_successors(id),
            FailureStrategy::SkipDownstream => {
                let doomed = self.skip_downstream(id);
                self.release_successors(id);
                for node in doomed {
                    self.release_successors(&node);
                }
            }
            FailureStrategy::FailPipeline => self.abort(id),
        }
    }

    /// Skips every descendant of `failed` whose predecessors are all blocked.
    fn skip_downstream(&mut self, failed: &str) -> Vec<String> {
        if self.closure.is_none() {
            match self.dag.successor_closure() {
                Ok(closure) => self.closure = Some(closure),
                Err(e) => {
                    error!(error = %e, "Cannot compute descendants");
                    return Vec::new();
                }
            }
        }
        let descendants = self
            .closure
            .as_mut()
            .map(|c| c.descendants_in_order(failed))
            .unwrap_or_default();

        let mut blocked: HashSet<String> = HashSet::from([failed.to_string()]);
        let mut doomed = Vec::new();
        for node in descendants {
            if self.results.contains_key(&node) {
                continue;
            }
            let all_blocked = self
                .dag
                .predecessors(&node)
                .iter()
                .all(|p| blocked.contains(p) || self.is_blocking(p));
            if all_blocked {
                self.record_skip(&node, SkipReason::UpstreamFailure {
                    node: failed.to_string(),
                });
                blocked.insert(node.clone());
                doomed.push(node);
            }
        }
        doomed
    }

    /// Whether a settled node blocks its successors.
    fn is_blocking(&self, id: &str) -> bool {
        match self.results.get(id).map(|r| &r.outcome) {
            Some(NodeOutcome::Failed(_)) => self
                .dag
                .node(id)
                .is_some_and(|n| n.options.failure_strategy == FailureStrategy::SkipDownstream),
            Some(NodeOutcome::Skipped(SkipReason::UpstreamFailure { .. })) => true,
            _ => false,
        }
    }

    fn abort(&mut self, id: &str) {
        error!(node = %id, "Node failed, aborting pipeline");
        self.aborted_by = Some(id.to_string());
        self.fan_in_deadlines.clear();
        self.ctx
            .cancellation()
            .cancel(format!("node '{id}' failed"));
        if !self.in_flight.is_empty() {
            self.abort_deadline = Instant::now().checked_add(self.config.cancellation_grace());
        }
    }

    fn abort_stragglers(&mut self) {
        self.abort_deadline = None;
        for (id, handle) in self.abort_handles.drain() {
            warn!(node = %id, "Grace period elapsed, aborting task");
            handle.abort();
        }
    }

    fn expire_fan_ins(&mut self) {
        let now = Instant::now();
        let mut expired: Vec<String> = self
            .fan_in_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort_by_key(|id| self.insertion_position(id));

        for id in expired {
            self.fan_in_deadlines.remove(&id);
            let Some(timeout) = self.dag.node(&id).and_then(|n| n.step.merge_timeout()) else {
                continue;
            };
            let pending: Vec<String> = self
                .dag
                .predecessors(&id)
                .iter()
                .filter(|p| !self.results.contains_key(*p))
                .cloned()
                .collect();
            warn!(node = %id, ?pending, "Fan-in timed out");
            let err = NodeError::from(FanInTimeoutError {
                node_id: id.clone(),
                timeout,
                pending,
            });
            self.record_failure(&id, err, 0, None, 0.0);
            self.apply_failure_strategy(&id);
            if self.aborted_by.is_some() {
                break;
            }
        }
    }

    fn insertion_position(&self, id: &str) -> usize {
        self.dag
            .node_ids()
            .iter()
            .position(|n| n == id)
            .unwrap_or(usize::MAX)
    }

    /// Decrements the remaining in-degree of each successor, once per edge.
    fn release_successors(&mut self, id: &str) {
        let targets: Vec<String> = self.dag.outgoing_edges(id).map(|e| e.target.clone()).collect();
        for target in targets {
            if self.results.contains_key(&target) {
                continue;
            }
            let Some(count) = self.remaining.get_mut(&target) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.fan_in_deadlines.remove(&target);
                if !self.ready.contains(&target) {
                    self.ready.push_back(target);
                }
            } else if !self.fan_in_deadlines.contains_key(&target) && self.aborted_by.is_none() {
                if let Some(timeout) = self.dag.node(&target).and_then(|n| n.step.merge_timeout()) {
                    debug!(node = %target, ?timeout, "Fan-in timer started");
                    if let Some(deadline) = Instant::now().checked_add(timeout) {
                        self.fan_in_deadlines.insert(target, deadline);
                    }
                }
            }
        }
    }

    fn record_skip(&mut self, id: &str, reason: SkipReason) {
        self.ctx.try_emit_event(
            event_types::NODE_SKIPPED,
            Some(json!({ "node": id, "reason": reason.to_string() })),
        );
        self.record(NodeResult::skipped(id, reason));
    }

    fn record_failure(
        &mut self,
        id: &str,
        err: NodeError,
        attempts: u32,
        started_at: Option<DateTime<Utc>>,
        latency_ms: f64,
    ) {
        let message = err.to_string();
        if let Err(e) = self.ctx.set_node_failure(id, &message) {
            warn!(node = %id, error = %e, "Result already recorded");
        }
        warn!(node = %id, error = %message, attempts, "Node failed");
        self.ctx.try_emit_event(
            event_types::NODE_FAILED,
            Some(json!({
                "node": id,
                "error": message,
                "error_type": err.error_type(),
                "attempts": attempts,
            })),
        );
        self.record(NodeResult {
            node_id: id.to_string(),
            outcome: NodeOutcome::Failed(err),
            attempts,
            latency_ms,
            started_at,
            finished_at: Utc::now(),
        });
    }

    fn record(&mut self, result: NodeResult) {
        self.fan_in_deadlines.remove(&result.node_id);
        self.trace.push(TraceEntry::from_result(&result));
        self.results.insert(result.node_id.clone(), result);
    }

    fn finish(self, started_at: DateTime<Utc>, clock: Instant) -> PipelineResult {
        let terminals = self.dag.terminal_nodes();
        let terminal_failed = terminals.iter().any(|id| {
            self.results.get(id).is_some_and(|r| match &r.outcome {
                NodeOutcome::Failed(_) => true,
                NodeOutcome::Skipped(reason) => reason.is_failure_induced(),
                NodeOutcome::Completed(_) => false,
            })
        });
        let success = self.aborted_by.is_none() && !terminal_failed;
        let status = if success {
            PipelineStatus::Completed
        } else {
            PipelineStatus::Failed
        };

        let final_output = match terminals.as_slice() {
            [] => None,
            [only] => self.results.get(only).and_then(|r| r.outcome.output().cloned()),
            many => Some(Value::Object(
                many.iter()
                    .filter_map(|id| {
                        self.results
                            .get(id)
                            .and_then(|r| r.outcome.output())
                            .map(|v| (id.clone(), v.clone()))
                    })
                    .collect(),
            )),
        };

        let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
        info!(%status, duration_ms, aborted_by = ?self.aborted_by, "Pipeline finished");
        self.ctx.try_emit_event(
            event_types::PIPELINE_COMPLETED,
            Some(json!({
                "success": success,
                "status": status.to_string(),
                "duration_ms": duration_ms,
                "aborted_by": self.aborted_by,
            })),
        );

        PipelineResult {
            pipeline_name: self.dag.name().to_string(),
            run_id: self.ctx.run_id(),
            correlation_id: self.ctx.correlation_id().to_string(),
            success,
            status,
            nodes: self.results,
            final_output,
            execution_trace: self.trace,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            aborted_by: self.aborted_by,
        }
    }
}

/// Body of a node task: permits, retries, timeouts and cancellation.
async fn run_node(
    node: Arc<DagNode>,
    ctx: PipelineContext,
    inputs: NodeInputs,
    semaphores: Vec<Arc<Semaphore>>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    attempts: Arc<AtomicU32>,
) -> Result<Value, StepError> {
    let work = async {
        let _permits = acquire_permits(semaphores).await?;
        ctx.try_emit_event(
            event_types::NODE_STARTED,
            Some(json!({ "node": node.id, "kind": node.step.kind() })),
        );
        debug!("Node started");

        let attempt_loop = with_retry(
            &retry,
            |attempt| {
                attempts.store(attempt, Ordering::SeqCst);
                let fut = node.step.execute(&ctx, &inputs);
                async move {
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, fut)
                            .await
                            .unwrap_or(Err(StepError::Timeout(limit))),
                        None => fut.await,
                    }
                }
            },
            StepError::is_retryable,
            |attempt: u32, err: &StepError, delay: Duration| {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(attempt, error = %err, delay_ms, "Attempt failed, retrying");
                ctx.try_emit_event(
                    event_types::NODE_RETRYING,
                    Some(json!({
                        "node": node.id,
                        "attempt": attempt,
                        "error": err.to_string(),
                        "delay_ms": delay_ms,
                    })),
                );
            },
        );

        match node.options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, attempt_loop)
                .await
                .unwrap_or(Err(StepError::Timeout(deadline))),
            None => attempt_loop.await,
        }
    };

    tokio::select! {
        biased;
        () = ctx.cancellation().cancelled() => Err(StepError::Cancelled),
        result = work => result,
    }
}

async fn acquire_permits(
    semaphores: Vec<Arc<Semaphore>>,
) -> Result<Vec<OwnedSemaphorePermit>, StepError> {
    let mut permits = Vec::with_capacity(semaphores.len());
    for semaphore in semaphores {
        permits.push(semaphore.acquire_owned().await.map_err(|_| StepError::Cancelled)?);
    }
    Ok(permits)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn join_error_to_step(err: JoinError) -> StepError {
    if err.is_cancelled() {
        return StepError::Cancelled;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    StepError::Panicked(message)
}

//! Scenario tests for pipeline execution.

use crate::context::{Delivered, NodeInputs, PipelineContext, RunIdentity};
use crate::core::{NodeStatus, PipelineStatus, SkipReason};
use crate::errors::{NodeError, StepError};
use crate::events::{event_types, CollectingEventSink};
use crate::config::EngineConfig;
use crate::pipeline::{
    DagEdge, FailureStrategy, FluentPipelineBuilder, JitterStrategy, NodeOptions, PipelineBuilder,
    PipelineEngine, RetryPolicy, BackoffStrategy,
};
use crate::steps::{
    BatchLlmStep, BranchStep, FanInStep, FanOutStep, FnStep, MergeStrategy, MockAgent,
    StepExecutor,
};
use crate::testing::{
    assert_completed, assert_failed, assert_skipped, intervals_overlap, EchoStep, FailingStep,
    FlakyStep, IntervalRecorder, RecordingStep, SlowStep,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn add_one() -> impl StepExecutor {
    FnStep::new("add_one", |_ctx: &PipelineContext, inputs: &NodeInputs| {
        let n = inputs.require("input")?.as_i64().unwrap_or_default();
        Ok(json!(n + 1))
    })
}

fn propagate() -> NodeOptions {
    NodeOptions::default().with_failure_strategy(FailureStrategy::Propagate)
}

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::attempts(attempts)
        .with_base_delay_ms(1)
        .with_backoff(BackoffStrategy::Constant)
        .with_jitter(JitterStrategy::None)
}

fn recording(label: &str, ms: u64, recorder: &IntervalRecorder) -> RecordingStep {
    RecordingStep::new(label, Duration::from_millis(ms), recorder.clone())
}

#[derive(Debug)]
struct PanicStep;

#[async_trait]
impl StepExecutor for PanicStep {
    fn kind(&self) -> &'static str {
        "panic"
    }

    async fn execute(&self, _ctx: &PipelineContext, _inputs: &NodeInputs) -> Result<Value, StepError> {
        panic!("step exploded")
    }
}

#[tokio::test]
async fn test_linear_chain_passes_data() {
    let dag = PipelineBuilder::new("linear")
        .add_step("a", add_one())
        .add_step("b", add_one())
        .add_step("c", add_one())
        .chain(&["a", "b", "c"])
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(1)).await;

    assert!(result.success);
    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.final_output, Some(json!(4)));
    assert_eq!(assert_completed(&result, "b"), &json!(3));
    let order: Vec<&str> = result.execution_trace.iter().map(|t| t.node_id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_empty_dag_succeeds() {
    let dag = PipelineBuilder::new("empty").build().unwrap();
    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    assert!(result.success);
    assert!(result.nodes.is_empty());
    assert_eq!(result.final_output, None);
}

#[tokio::test]
async fn test_diamond_with_propagate_runs_join() {
    let join = FnStep::new("join", |ctx: &PipelineContext, inputs: &NodeInputs| {
        let failed = inputs
            .iter()
            .filter(|(_, d)| matches!(d, Delivered::Failed { .. }))
            .count();
        let marker = ctx.get_node_result("b").is_err();
        Ok(json!({ "failed_inputs": failed, "marker": marker }))
    });

    let dag = PipelineBuilder::new("diamond")
        .add_step("a", EchoStep::new())
        .add_node("b", Arc::new(FailingStep::new("b broke")), propagate())
        .add_step("c", EchoStep::new())
        .add_step("d", join)
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .add_edge("c", "d")
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!("x")).await;

    assert_failed(&result, "b");
    assert_completed(&result, "c");
    assert_eq!(
        assert_completed(&result, "d"),
        &json!({ "failed_inputs": 1, "marker": true })
    );
    assert!(result.success);
}

#[tokio::test]
async fn test_diamond_with_failing_root_under_propagate() {
    let sees_marker = |label: &'static str| {
        FnStep::new(label, |ctx: &PipelineContext, inputs: &NodeInputs| {
            let delivered_failure = matches!(inputs.delivered("input"), Some(Delivered::Failed { .. }));
            Ok(json!({
                "marker": ctx.get_node_result("a").is_err(),
                "delivered_failure": delivered_failure,
            }))
        })
    };
    let join = FnStep::new("join", |ctx: &PipelineContext, _inputs: &NodeInputs| {
        let both = ctx.completed_result("b").is_some() && ctx.completed_result("c").is_some();
        Ok(json!({ "after_both": both }))
    });

    let dag = PipelineBuilder::new("diamond")
        .add_node("a", Arc::new(FailingStep::new("a broke")), propagate())
        .add_step("b", sees_marker("b"))
        .add_step("c", sees_marker("c"))
        .add_step("d", join)
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .add_edge("c", "d")
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!("x")).await;

    assert_failed(&result, "a");
    for id in ["b", "c"] {
        assert_eq!(
            assert_completed(&result, id),
            &json!({ "marker": true, "delivered_failure": true })
        );
    }
    assert_eq!(assert_completed(&result, "d"), &json!({ "after_both": true }));
    let order: Vec<&str> = result.execution_trace.iter().map(|t| t.node_id.as_str()).collect();
    assert_eq!(order.last(), Some(&"d"));
    assert!(result.success);
    assert_eq!(result.final_output, Some(json!({ "after_both": true })));
}

#[tokio::test]
async fn test_failing_join_decides_propagate_diamond() {
    let dag = PipelineBuilder::new("diamond")
        .add_node("a", Arc::new(FailingStep::new("a broke")), propagate())
        .add_step("b", EchoStep::returning(json!("b")))
        .add_step("c", EchoStep::returning(json!("c")))
        .add_step("d", FailingStep::new("d broke"))
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .add_edge("c", "d")
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!("x")).await;

    assert_completed(&result, "b");
    assert_completed(&result, "c");
    assert_failed(&result, "d");
    assert!(!result.success);
}

#[tokio::test]
async fn test_diamond_with_skip_downstream() {
    let dag = PipelineBuilder::new("diamond")
        .add_step("a", FailingStep::new("a broke"))
        .add_step("b", EchoStep::new())
        .add_step("c", EchoStep::new())
        .add_step("d", EchoStep::new())
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .add_edge("c", "d")
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!("x")).await;

    assert!(!result.success);
    assert_eq!(result.status, PipelineStatus::Failed);
    for id in ["b", "c", "d"] {
        assert_eq!(
            assert_skipped(&result, id),
            &SkipReason::UpstreamFailure { node: "a".to_string() }
        );
    }
    assert_eq!(result.failed_nodes(), vec!["a"]);
}

#[tokio::test]
async fn test_skip_downstream_spares_other_paths() {
    let dag = PipelineBuilder::new("partial")
        .add_step("a", EchoStep::new())
        .add_step("b", FailingStep::new("b broke"))
        .add_step("c", SlowStep::with_delay_ms(20).returning(json!("c")))
        .add_step("d", EchoStep::new())
        .add_step("only_b", EchoStep::new())
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .add_edge("c", "d")
        .add_edge("b", "only_b")
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!("x")).await;

    assert_skipped(&result, "only_b");
    assert_eq!(assert_completed(&result, "d"), &json!("c"));
}

#[tokio::test]
async fn test_independent_branch_survives_failure() {
    let dag = PipelineBuilder::new("branches")
        .add_step("a", FailingStep::new("a broke"))
        .add_step("b", EchoStep::new())
        .add_step("x", EchoStep::returning(json!("x")))
        .add_step("y", EchoStep::new())
        .add_edge("a", "b")
        .add_edge("x", "y")
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    assert_skipped(&result, "b");
    assert_eq!(assert_completed(&result, "y"), &json!("x"));
    assert!(!result.success);
    assert_eq!(result.final_output, Some(json!({ "y": "x" })));
}

#[tokio::test]
async fn test_fail_pipeline_aborts_run() {
    let slow = Arc::new(SlowStep::with_delay_ms(2_000));
    let dag = PipelineBuilder::new("abort")
        .add_node("slow", slow, NodeOptions::default())
        .add_node(
            "fatal",
            Arc::new(FailingStep::new("fatal")),
            NodeOptions::default().with_failure_strategy(FailureStrategy::FailPipeline),
        )
        .add_step("after_fatal", EchoStep::new())
        .add_step("after_slow", EchoStep::new())
        .add_edge("fatal", "after_fatal")
        .add_edge("slow", "after_slow")
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert!(!result.success);
    assert_eq!(result.aborted_by.as_deref(), Some("fatal"));
    assert!(matches!(assert_failed(&result, "fatal"), NodeError::Execution(_)));
    match assert_failed(&result, "slow") {
        NodeError::Cancelled(e) => assert_eq!(e.aborted_by, "fatal"),
        other => panic!("expected cancellation, got {other}"),
    }
    for id in ["after_fatal", "after_slow"] {
        assert_eq!(
            assert_skipped(&result, id),
            &SkipReason::PipelineAborted { node: "fatal".to_string() }
        );
    }
    assert!(result.completed_nodes().is_empty());
}

#[tokio::test]
async fn test_condition_false_skips_node() {
    let dag = PipelineBuilder::new("conditional")
        .add_step("a", EchoStep::new())
        .add_node(
            "b",
            Arc::new(EchoStep::returning(json!("never"))),
            NodeOptions::default().with_condition(|_| false),
        )
        .add_step("c", EchoStep::new())
        .chain(&["a", "b", "c"])
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!("seed")).await;

    assert_eq!(assert_skipped(&result, "b"), &SkipReason::ConditionNotMet);
    assert_eq!(assert_completed(&result, "c"), &json!("seed"));
    assert!(result.success);
}

#[tokio::test]
async fn test_panicking_condition_counts_as_false() {
    let dag = PipelineBuilder::new("conditional")
        .add_node(
            "a",
            Arc::new(EchoStep::new()),
            NodeOptions::default().with_condition(|_| panic!("bad condition")),
        )
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;
    assert_eq!(assert_skipped(&result, "a"), &SkipReason::ConditionNotMet);
}

#[tokio::test]
async fn test_conditional_branch_routes() {
    let router = BranchStep::new(|_ctx: &PipelineContext, inputs: &NodeInputs| {
        let size = inputs.require("input")?.as_i64().unwrap_or_default();
        Ok(if size > 10 { "big" } else { "small" }.to_string())
    });

    let dag = FluentPipelineBuilder::new("routing")
        .with_conditional_branch(
            "router",
            Arc::new(router),
            vec![
                ("big", Arc::new(EchoStep::returning(json!("handled big"))) as Arc<dyn StepExecutor>),
                ("small", Arc::new(EchoStep::returning(json!("handled small"))) as Arc<dyn StepExecutor>),
            ],
            "merge",
            &[],
        )
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(3)).await;

    assert_skipped(&result, "big");
    assert_eq!(
        assert_completed(&result, "merge"),
        &json!({ "big": null, "small": "handled small" })
    );
    assert!(result.success);
}

#[tokio::test]
async fn test_retry_until_success() {
    let flaky = Arc::new(FlakyStep::new(2, json!("ok")));
    let sink = Arc::new(CollectingEventSink::new());
    let dag = PipelineBuilder::new("retry")
        .add_node("flaky", flaky.clone(), NodeOptions::default().with_retry(fast_retry(3)))
        .build()
        .unwrap();

    let result = PipelineEngine::new()
        .with_event_sink(sink.clone())
        .run(&dag, json!(null))
        .await;

    assert_eq!(assert_completed(&result, "flaky"), &json!("ok"));
    assert_eq!(result.nodes["flaky"].attempts, 3);
    assert_eq!(flaky.call_count(), 3);
    assert_eq!(sink.events_for_node(event_types::NODE_RETRYING, "flaky").len(), 2);
}

#[tokio::test]
async fn test_retry_exhaustion() {
    let failing = Arc::new(FailingStep::new("still broken"));
    let dag = PipelineBuilder::new("retry")
        .add_node("f", failing.clone(), NodeOptions::default().with_retry(fast_retry(2)))
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    let err = assert_failed(&result, "f");
    assert_eq!(err.attempts(), 2);
    assert_eq!(failing.call_count(), 2);
    assert!(err.to_string().contains("still broken"));
}

#[tokio::test]
async fn test_engine_default_retry_applies() {
    let flaky = Arc::new(FlakyStep::new(1, json!(1)));
    let dag = PipelineBuilder::new("retry")
        .add_node("flaky", flaky, NodeOptions::default())
        .build()
        .unwrap();

    let engine = PipelineEngine::new().with_config(EngineConfig::new().with_default_retry(fast_retry(2)));
    let result = engine.run(&dag, json!(null)).await;

    assert_completed(&result, "flaky");
}

#[tokio::test]
async fn test_attempt_timeout() {
    let dag = PipelineBuilder::new("timeout")
        .add_node(
            "slow",
            Arc::new(SlowStep::with_delay_ms(500)),
            NodeOptions::default().with_timeout(Duration::from_millis(20)),
        )
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    match assert_failed(&result, "slow") {
        NodeError::Execution(e) => assert!(e.timed_out()),
        other => panic!("expected execution error, got {other}"),
    }
}

#[tokio::test]
async fn test_node_deadline_bounds_all_attempts() {
    let failing = Arc::new(FailingStep::new("nope"));
    let policy = RetryPolicy::attempts(10)
        .with_base_delay_ms(50)
        .with_backoff(BackoffStrategy::Constant)
        .with_jitter(JitterStrategy::None);
    let dag = PipelineBuilder::new("deadline")
        .add_node(
            "f",
            failing.clone(),
            NodeOptions::default()
                .with_retry(policy)
                .with_deadline(Duration::from_millis(80)),
        )
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    match assert_failed(&result, "f") {
        NodeError::Execution(e) => assert!(e.timed_out()),
        other => panic!("expected execution error, got {other}"),
    }
    assert!(failing.call_count() < 10);
}

#[tokio::test]
async fn test_panicking_step_fails_node() {
    let dag = PipelineBuilder::new("panic")
        .add_step("p", PanicStep)
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    let err = assert_failed(&result, "p");
    assert!(err.to_string().contains("step exploded"));
}

#[tokio::test]
async fn test_fan_out_limit_serialises_branches() {
    let recorder = IntervalRecorder::new();
    let workers: Vec<Arc<dyn StepExecutor>> = (1..=3)
        .map(|i| Arc::new(recording(&format!("w{i}"), 20, &recorder)) as Arc<dyn StepExecutor>)
        .collect();

    let dag = FluentPipelineBuilder::new("fan")
        .with_fan_out_fan_in(
            "split",
            FanOutStep::items().with_max_concurrent(1),
            "w",
            workers,
            "join",
            MergeStrategy::Collect,
            &[],
        )
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!([1, 2, 3])).await;

    assert_eq!(assert_completed(&result, "join"), &json!([1, 2, 3]));
    let intervals = recorder.intervals();
    assert_eq!(intervals.len(), 3);
    for (i, a) in intervals.iter().enumerate() {
        for b in &intervals[i + 1..] {
            assert!(!intervals_overlap(a, b), "{} overlapped {}", a.label, b.label);
        }
    }
}

#[tokio::test]
async fn test_unrelated_branches_overlap() {
    let recorder = IntervalRecorder::new();
    let dag = PipelineBuilder::new("parallel")
        .add_step("left", recording("left", 60, &recorder))
        .add_step("right", recording("right", 60, &recorder))
        .build()
        .unwrap();

    PipelineEngine::new().run(&dag, json!(null)).await;

    let left = recorder.interval("left").unwrap();
    let right = recorder.interval("right").unwrap();
    assert!(intervals_overlap(&left, &right));
}

#[tokio::test]
async fn test_global_concurrency_limit() {
    let recorder = IntervalRecorder::new();
    let dag = PipelineBuilder::new("limited")
        .add_step("a", recording("a", 20, &recorder))
        .add_step("b", recording("b", 20, &recorder))
        .add_step("c", recording("c", 20, &recorder))
        .build()
        .unwrap();

    let engine = PipelineEngine::new().with_config(EngineConfig::new().with_max_concurrency(1));
    let result = engine.run(&dag, json!(null)).await;

    assert!(result.success);
    let intervals = recorder.intervals();
    for (i, a) in intervals.iter().enumerate() {
        for b in &intervals[i + 1..] {
            assert!(!intervals_overlap(a, b));
        }
    }
}

#[tokio::test]
async fn test_fan_in_waits_for_all_branches() {
    let dag = PipelineBuilder::new("fan_in")
        .add_step("fast", SlowStep::with_delay_ms(5).returning(json!("fast")))
        .add_step("slow", SlowStep::with_delay_ms(60).returning(json!("slow")))
        .add_step(
            "merge",
            FanInStep::with_branches(2, MergeStrategy::Concat("+".to_string()))
                .with_merge_timeout(Duration::from_secs(5)),
        )
        .add_edge_with(DagEdge::new("fast", "merge").with_target_handle("in-1"))
        .add_edge_with(DagEdge::new("slow", "merge").with_target_handle("in-2"))
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    assert_eq!(assert_completed(&result, "merge"), &json!("fast+slow"));
}

#[tokio::test]
async fn test_fan_in_timeout() {
    let dag = PipelineBuilder::new("fan_in")
        .add_step("fast", SlowStep::with_delay_ms(5).returning(json!(1)))
        .add_step("slow", SlowStep::with_delay_ms(400).returning(json!(2)))
        .add_step(
            "merge",
            FanInStep::with_branches(2, MergeStrategy::Collect)
                .with_merge_timeout(Duration::from_millis(50)),
        )
        .add_edge_with(DagEdge::new("fast", "merge").with_target_handle("in-1"))
        .add_edge_with(DagEdge::new("slow", "merge").with_target_handle("in-2"))
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    match assert_failed(&result, "merge") {
        NodeError::FanInTimeout(e) => {
            assert_eq!(e.pending, vec!["slow"]);
            assert_eq!(e.timeout, Duration::from_millis(50));
        }
        other => panic!("expected fan-in timeout, got {other}"),
    }
    assert_completed(&result, "slow");
    assert!(!result.success);
}

#[tokio::test]
async fn test_fan_in_merges_condition_skipped_branch_as_absent() {
    let dag = PipelineBuilder::new("fan_in")
        .add_node(
            "skipped",
            Arc::new(EchoStep::returning(json!("never"))),
            NodeOptions::default().with_condition(|_| false),
        )
        .add_step("slow", SlowStep::with_delay_ms(30).returning(json!("slow")))
        .add_step(
            "merge",
            FanInStep::with_branches(2, MergeStrategy::Object)
                .with_merge_timeout(Duration::from_secs(5)),
        )
        .add_edge_with(DagEdge::new("skipped", "merge").with_target_handle("in-1"))
        .add_edge_with(DagEdge::new("slow", "merge").with_target_handle("in-2"))
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    assert_eq!(assert_skipped(&result, "skipped"), &SkipReason::ConditionNotMet);
    assert_eq!(
        assert_completed(&result, "merge"),
        &json!({ "in-1": null, "in-2": "slow" })
    );
    assert!(result.success);
}

#[tokio::test]
async fn test_fan_in_merges_branch_skipped_by_upstream_failure() {
    let dag = PipelineBuilder::new("fan_in")
        .add_step("broken", FailingStep::new("upstream broke"))
        .add_step("worker", EchoStep::returning(json!("never")))
        .add_step("healthy", SlowStep::with_delay_ms(20).returning(json!("ok")))
        .add_step(
            "merge",
            FanInStep::with_branches(2, MergeStrategy::Object)
                .with_merge_timeout(Duration::from_secs(5)),
        )
        .add_edge("broken", "worker")
        .add_edge_with(DagEdge::new("worker", "merge").with_target_handle("in-1"))
        .add_edge_with(DagEdge::new("healthy", "merge").with_target_handle("in-2"))
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    assert_failed(&result, "broken");
    assert_eq!(assert_skipped(&result, "worker"), &SkipReason::UpstreamFailure { node: "broken".to_string() });
    assert_eq!(
        assert_completed(&result, "merge"),
        &json!({ "in-1": null, "in-2": "ok" })
    );
}

#[tokio::test]
async fn test_unbounded_merge_timeout_does_not_overflow() {
    let dag = PipelineBuilder::new("fan_in")
        .add_step("a", EchoStep::returning(json!("a")))
        .add_step("b", SlowStep::with_delay_ms(30).returning(json!("b")))
        .add_step(
            "merge",
            FanInStep::with_branches(2, MergeStrategy::Collect).with_merge_timeout(Duration::MAX),
        )
        .add_edge_with(DagEdge::new("a", "merge").with_target_handle("in-1"))
        .add_edge_with(DagEdge::new("b", "merge").with_target_handle("in-2"))
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;

    assert_eq!(assert_completed(&result, "merge"), &json!(["a", "b"]));
    assert!(result.success);
}

#[tokio::test]
async fn test_unbounded_grace_period_still_cancels() {
    let dag = PipelineBuilder::new("abort")
        .add_step("slow", SlowStep::with_delay_ms(2_000))
        .add_node(
            "fatal",
            Arc::new(FailingStep::new("fatal")),
            NodeOptions::default().with_failure_strategy(FailureStrategy::FailPipeline),
        )
        .build()
        .unwrap();
    let engine = PipelineEngine::new()
        .with_config(EngineConfig::default().with_cancellation_grace_ms(u64::MAX));

    let result = engine.run(&dag, json!(null)).await;

    assert_eq!(result.aborted_by.as_deref(), Some("fatal"));
    assert!(matches!(assert_failed(&result, "slow"), NodeError::Cancelled(_)));
}

#[tokio::test]
async fn test_batch_partial_success() {
    let mut agent = MockAgent::new();
    agent.expect_run().returning(|prompt| {
        if prompt == json!("bad") {
            Err(anyhow::anyhow!("refused"))
        } else {
            Ok(json!(format!("answer to {}", prompt.as_str().unwrap_or_default())))
        }
    });
    let batch = BatchLlmStep::new(Arc::new(agent)).with_min_success_ratio(0.5);

    let dag = PipelineBuilder::new("batch").add_step("batch", batch).build().unwrap();
    let result = PipelineEngine::new().run(&dag, json!(["q1", "bad", "q2"])).await;

    let output = assert_completed(&result, "batch");
    assert_eq!(output[0], json!("answer to q1"));
    assert_eq!(output[1]["index"], json!(1));
    assert_eq!(output[2], json!("answer to q2"));
}

#[tokio::test]
async fn test_batch_below_threshold_fails_node() {
    let mut agent = MockAgent::new();
    agent.expect_run().returning(|_| Err(anyhow::anyhow!("down")));
    let batch = BatchLlmStep::new(Arc::new(agent)).with_min_success_ratio(0.5);

    let dag = PipelineBuilder::new("batch").add_step("batch", batch).build().unwrap();
    let result = PipelineEngine::new().run(&dag, json!(["q1", "q2"])).await;

    let err = assert_failed(&result, "batch");
    assert!(err.to_string().contains("2 of 2 items failed"));
}

#[tokio::test]
async fn test_events_carry_identity() {
    let sink = Arc::new(CollectingEventSink::new());
    let dag = PipelineBuilder::new("events")
        .add_step("a", EchoStep::new())
        .add_node("b", Arc::new(EchoStep::new()), NodeOptions::default().with_condition(|_| false))
        .add_edge("a", "b")
        .build()
        .unwrap();

    let identity = RunIdentity::new().with_correlation_id("corr-42");
    let result = PipelineEngine::new()
        .with_event_sink(sink.clone())
        .run_with_identity(&dag, json!(null), identity)
        .await;

    assert_eq!(result.correlation_id, "corr-42");
    let types = sink.event_types();
    assert_eq!(types.first().map(String::as_str), Some(event_types::PIPELINE_STARTED));
    assert_eq!(types.last().map(String::as_str), Some(event_types::PIPELINE_COMPLETED));
    assert_eq!(sink.events_for_node(event_types::NODE_STARTED, "a").len(), 1);
    assert_eq!(sink.events_for_node(event_types::NODE_COMPLETED, "a").len(), 1);
    assert_eq!(sink.events_for_node(event_types::NODE_SKIPPED, "b").len(), 1);

    for (_, data) in sink.events() {
        let data = data.unwrap();
        assert_eq!(data["correlation_id"], "corr-42");
        assert_eq!(data["pipeline"], "events");
        assert_eq!(data["run_id"], result.run_id.to_string());
    }
}

#[tokio::test]
async fn test_events_disabled() {
    let sink = Arc::new(CollectingEventSink::new());
    let dag = PipelineBuilder::new("quiet").add_step("a", EchoStep::new()).build().unwrap();

    PipelineEngine::new()
        .with_config(EngineConfig::new().with_emit_events(false))
        .with_event_sink(sink.clone())
        .run(&dag, json!(null))
        .await;

    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_rerun_is_deterministic() {
    let dag = PipelineBuilder::new("rerun")
        .add_step("a", add_one())
        .add_step("b", FailingStep::new("no"))
        .add_step("c", add_one())
        .add_step("d", EchoStep::new())
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge("b", "d")
        .build()
        .unwrap();
    let engine = PipelineEngine::new();

    let first = engine.run(&dag, json!(1)).await;
    let second = engine.run(&dag, json!(1)).await;

    assert_ne!(first.run_id, second.run_id);
    for id in ["a", "b", "c", "d"] {
        assert_eq!(first.node_status(id), second.node_status(id));
        assert_eq!(first.output(id), second.output(id));
    }
    assert_eq!(first.node_status("d"), Some(NodeStatus::Skipped));
}

#[tokio::test]
async fn test_edge_source_handle_selects_field() {
    let producer = EchoStep::returning(json!({ "title": "Report", "body": "..." }));
    let dag = PipelineBuilder::new("handles")
        .add_step("produce", producer)
        .add_step("title", EchoStep::new())
        .add_step("missing", EchoStep::new())
        .add_edge_with(DagEdge::new("produce", "title").with_source_handle("title"))
        .add_edge_with(DagEdge::new("produce", "missing").with_source_handle("footer"))
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!("fallback")).await;

    assert_eq!(assert_completed(&result, "title"), &json!("Report"));
    assert_eq!(assert_completed(&result, "missing"), &json!("fallback"));
}

#[tokio::test]
async fn test_failure_summary_and_trace() {
    let dag = PipelineBuilder::new("summary")
        .add_step("ok", EchoStep::new())
        .add_node("bad", Arc::new(FailingStep::new("x")), propagate())
        .build()
        .unwrap();

    let result = PipelineEngine::new().run(&dag, json!(null)).await;
    let summary = result.failure_summary();

    assert_eq!(summary.total_nodes, 2);
    assert_eq!(summary.failed_nodes, 1);
    assert_eq!(summary.failures[0].node_id, "bad");
    assert_eq!(result.execution_trace.len(), 2);
    assert_eq!(result.to_json()["status"], "failed");
}

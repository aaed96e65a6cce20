//! Generic priority-ordered step sequencer with confidence-gated winners.
//!
//! Steps run one at a time in ascending priority. Each step is raced
//! against the shared timeout, and a timeout or panic is reported exactly
//! like a returned error, so one bad step never aborts the sequence.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::CompletionConfig;
use crate::decision::{DecisionCategory, DecisionLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Partial,
    Skip,
    Fail,
    Error,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Partial => "partial",
            StepStatus::Skip => "skip",
            StepStatus::Fail => "fail",
            StepStatus::Error => "error",
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult<T> {
    pub status: StepStatus,
    pub data: Option<T>,
    /// 0-100.
    pub confidence: u8,
    pub reason: String,
    pub duration_ms: u64,
}

impl<T> StepResult<T> {
    fn new(status: StepStatus, data: Option<T>, confidence: u8, reason: impl Into<String>) -> Self {
        Self {
            status,
            data,
            confidence: confidence.min(100),
            reason: reason.into(),
            duration_ms: 0,
        }
    }

    pub fn success(data: T, confidence: u8, reason: impl Into<String>) -> Self {
        Self::new(StepStatus::Success, Some(data), confidence, reason)
    }

    pub fn partial(data: T, confidence: u8, reason: impl Into<String>) -> Self {
        Self::new(StepStatus::Partial, Some(data), confidence, reason)
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::new(StepStatus::Skip, None, 0, reason)
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(StepStatus::Fail, None, 0, reason)
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(StepStatus::Error, None, 0, reason)
    }

    /// Attach data to a result that carries none by default (`Fail`, `Skip`).
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether the sequence should move on after this result.
    pub fn should_continue(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Fail | StepStatus::Skip | StepStatus::Partial
        )
    }
}

/// One strategy in a pipeline.
#[async_trait]
pub trait PipelineStep<C, T>: Send + Sync
where
    C: Send + Sync,
{
    fn name(&self) -> &str;

    /// Lower runs earlier.
    fn priority(&self) -> i64;

    async fn is_applicable(&self, _ctx: &C) -> bool {
        true
    }

    /// An `Err` is treated the same as [`StepStatus::Error`].
    async fn execute(&self, ctx: &C) -> Result<StepResult<T>, String>;
}

/// A step built from a closure, for strategies that need no context.
pub struct FnStep<C, T, F> {
    name: String,
    priority: i64,
    f: F,
    _marker: PhantomData<fn() -> (C, T)>,
}

impl<C, T, F> FnStep<C, T, F> {
    pub fn new(name: impl Into<String>, priority: i64, f: F) -> Self {
        Self {
            name: name.into(),
            priority,
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, T, F, Fut> PipelineStep<C, T> for FnStep<C, T, F>
where
    C: Send + Sync,
    T: Send,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepResult<T>, String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    async fn execute(&self, _ctx: &C) -> Result<StepResult<T>, String> {
        (self.f)().await
    }
}

/// Winner selection and timing rules.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub step_timeout: Duration,
    pub confidence_threshold: u8,
    pub stop_on_first_success: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(10),
            confidence_threshold: 50,
            stop_on_first_success: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_completion(config: &CompletionConfig, stop_on_first_success: bool) -> Self {
        Self {
            step_timeout: config.step_timeout(),
            confidence_threshold: config.confidence_threshold,
            stop_on_first_success,
        }
    }
}

/// A step's name with what it returned.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome<T> {
    pub name: String,
    pub priority: i64,
    pub result: StepResult<T>,
}

/// What a full run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput<T> {
    /// First step to succeed at or above the confidence threshold.
    pub winner: Option<String>,
    pub winner_data: Option<T>,
    /// Data from every `Success` and `Partial` step, in run order.
    pub aggregate: Vec<T>,
    pub steps: Vec<StepOutcome<T>>,
    /// Stopped before running every step.
    pub halted: bool,
}

/// Ordered collection of steps sharing one context type.
pub struct FallbackPipeline<C, T>
where
    C: Send + Sync,
{
    name: String,
    config: PipelineConfig,
    steps: Vec<Box<dyn PipelineStep<C, T>>>,
}

impl<C, T> FallbackPipeline<C, T>
where
    C: Send + Sync,
    T: Clone + Send,
{
    pub fn new(name: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            name: name.into(),
            config,
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: Box<dyn PipelineStep<C, T>>) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(&self, ctx: &C, log: &mut DecisionLog) -> PipelineOutput<T> {
        let mut order: Vec<&dyn PipelineStep<C, T>> = self.steps.iter().map(|s| s.as_ref()).collect();
        order.sort_by_key(|s| s.priority());

        let mut out = PipelineOutput {
            winner: None,
            winner_data: None,
            aggregate: Vec::new(),
            steps: Vec::new(),
            halted: false,
        };

        for (i, step) in order.iter().enumerate() {
            let name = step.name().to_string();
            let result = self.run_step(*step, ctx).await;

            log.record_with(
                DecisionCategory::Pipeline,
                &name,
                result.status.as_str(),
                &result.reason,
                json!({
                    "pipeline": self.name,
                    "confidence": result.confidence,
                    "durationMs": result.duration_ms,
                }),
            );

            let mut halt = false;
            match result.status {
                StepStatus::Success | StepStatus::Partial => {
                    if let Some(data) = &result.data {
                        out.aggregate.push(data.clone());
                    }
                    let wins = result.status == StepStatus::Success
                        && result.confidence >= self.config.confidence_threshold;
                    if wins && out.winner.is_none() {
                        out.winner = Some(name.clone());
                        out.winner_data = result.data.clone();
                        halt = self.config.stop_on_first_success;
                    }
                }
                StepStatus::Fail | StepStatus::Error => {
                    if let Some(next) = order.get(i + 1) {
                        log.record(
                            DecisionCategory::Fallback,
                            &name,
                            "activate",
                            format!("{} -> {}", result.reason, next.name()),
                        );
                    }
                }
                StepStatus::Skip => {}
            }

            out.steps.push(StepOutcome {
                name,
                priority: step.priority(),
                result,
            });
            if halt {
                out.halted = i + 1 < order.len();
                break;
            }
        }

        log.record(
            DecisionCategory::Pipeline,
            format!("{}:summary", self.name),
            out.winner.as_deref().unwrap_or("no winner"),
            format!("{} of {} steps run", out.steps.len(), order.len()),
        );
        out
    }

    async fn run_step(&self, step: &dyn PipelineStep<C, T>, ctx: &C) -> StepResult<T> {
        if !step.is_applicable(ctx).await {
            return StepResult::skip("not applicable");
        }
        let started = Instant::now();
        let guarded = AssertUnwindSafe(step.execute(ctx)).catch_unwind();
        let mut result = match tokio::time::timeout(self.config.step_timeout, guarded).await {
            Err(_) => StepResult::error(format!(
                "timed out after {}ms",
                self.config.step_timeout.as_millis()
            )),
            Ok(Err(panic)) => StepResult::error(format!("panicked: {}", panic_message(&panic))),
            Ok(Ok(Err(message))) => StepResult::error(message),
            Ok(Ok(Ok(result))) => result,
        };
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

pub(crate) fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Step = Box<dyn PipelineStep<(), &'static str>>;

    fn step(name: &'static str, priority: i64, result: StepResult<&'static str>) -> Step {
        Box::new(FnStep::<(), &'static str, _>::new(name, priority, move || {
            let r = result.clone();
            async move { Ok(r) }
        }))
    }

    fn pipeline(stop: bool) -> FallbackPipeline<(), &'static str> {
        FallbackPipeline::new(
            "test",
            PipelineConfig {
                step_timeout: Duration::from_millis(100),
                confidence_threshold: 50,
                stop_on_first_success: stop,
            },
        )
    }

    #[tokio::test]
    async fn test_confidence_gated_winner() {
        let mut p = pipeline(true);
        p.add_step(step("C", 3, StepResult::success("c", 90, "strong")))
            .add_step(step("A", 1, StepResult::fail("nothing there")))
            .add_step(step("B", 2, StepResult::success("b", 40, "weak")));
        let mut log = DecisionLog::default();
        let out = p.run(&(), &mut log).await;

        assert_eq!(out.winner.as_deref(), Some("C"));
        assert_eq!(out.winner_data, Some("c"));
        assert_eq!(out.aggregate, vec!["b", "c"]);
        let fallbacks = log.by_category(DecisionCategory::Fallback);
        assert_eq!(fallbacks.len(), 1);
        assert_eq!(fallbacks[0].step, "A");
        assert!(fallbacks[0].reason.ends_with("-> B"));
        let step_records = log
            .by_category(DecisionCategory::Pipeline)
            .into_iter()
            .filter(|r| !r.step.ends_with(":summary"))
            .count();
        assert_eq!(step_records, 3);
    }

    #[tokio::test]
    async fn test_stop_halts_remaining_steps() {
        let mut p = pipeline(true);
        p.add_step(step("first", 1, StepResult::success("x", 80, "ok")))
            .add_step(step("second", 2, StepResult::success("y", 80, "ok")));
        let out = p.run(&(), &mut DecisionLog::default()).await;
        assert_eq!(out.steps.len(), 1);
        assert!(out.halted);
    }

    #[tokio::test]
    async fn test_no_stop_runs_everything() {
        let mut p = pipeline(false);
        p.add_step(step("first", 1, StepResult::success("x", 80, "ok")))
            .add_step(step("second", 2, StepResult::partial("y", 20, "some")));
        let out = p.run(&(), &mut DecisionLog::default()).await;
        assert_eq!(out.winner.as_deref(), Some("first"));
        assert_eq!(out.steps.len(), 2);
        assert_eq!(out.aggregate, vec!["x", "y"]);
        assert!(!out.halted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_and_panic_become_errors() {
        let mut p = pipeline(true);
        p.add_step(Box::new(FnStep::<(), &'static str, _>::new("slow", 1, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(StepResult::success("late", 100, "too late"))
        })))
        .add_step(Box::new(FnStep::<(), &'static str, _>::new("boom", 2, || async {
            if true {
                panic!("step exploded");
            }
            Ok(StepResult::skip("unreachable"))
        })))
        .add_step(step("last", 3, StepResult::fail("still nothing")));
        let mut log = DecisionLog::default();
        let out = p.run(&(), &mut log).await;

        assert_eq!(out.steps[0].result.status, StepStatus::Error);
        assert!(out.steps[0].result.reason.contains("timed out"));
        assert_eq!(out.steps[1].result.status, StepStatus::Error);
        assert!(out.steps[1].result.reason.contains("step exploded"));
        assert!(out.winner.is_none());
        // The last step has nothing to fall back to.
        assert_eq!(log.by_category(DecisionCategory::Fallback).len(), 2);
    }

    struct NeverApplicable;

    #[async_trait]
    impl PipelineStep<(), &'static str> for NeverApplicable {
        fn name(&self) -> &str {
            "gated"
        }
        fn priority(&self) -> i64 {
            0
        }
        async fn is_applicable(&self, _ctx: &()) -> bool {
            false
        }
        async fn execute(&self, _ctx: &()) -> Result<StepResult<&'static str>, String> {
            unreachable!("never applicable")
        }
    }

    #[tokio::test]
    async fn test_inapplicable_step_skipped() {
        let mut p = pipeline(true);
        p.add_step(Box::new(NeverApplicable));
        let out = p.run(&(), &mut DecisionLog::default()).await;
        assert_eq!(out.steps[0].result.status, StepStatus::Skip);
        assert!(out.steps[0].result.should_continue());
    }

    #[test]
    fn test_should_continue() {
        assert!(StepResult::<()>::fail("x").should_continue());
        assert!(StepResult::<()>::skip("x").should_continue());
        assert!(StepResult::partial((), 10, "x").should_continue());
        assert!(!StepResult::success((), 90, "x").should_continue());
        assert!(!StepResult::<()>::error("x").should_continue());
    }
}

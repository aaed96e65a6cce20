//! Exhaustive fallback: every discovered API, every matching driver.
//!
//! Built on [`FallbackPipeline`]; each API becomes one step so ordering,
//! timeouts, panics and the decision trail are all handled by the engine.
//! Steps run strictly one after another because two drivers writing the
//! same host state at once would race.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::decision::DecisionLog;
use crate::discovery::DiscoveredApi;
use crate::drivers::DriverSet;
use crate::pipeline::{FallbackPipeline, PipelineConfig, PipelineStep, StepResult, StepStatus};
use crate::types::{Assurance, CompletionOptions, Operation, ProtocolKind, VerificationResult};

/// One (API, driver) attempt in the sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepAttempt {
    #[serde(rename = "type")]
    pub api_type: ProtocolKind,
    pub location: String,
    pub success: bool,
    pub assurance: Assurance,
    pub operations: Vec<Operation>,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

impl SweepAttempt {
    /// Driver succeeded and verification (strong or assumed) agreed.
    pub fn verified(&self) -> bool {
        self.success && self.verification.as_ref().is_some_and(|v| v.verified)
    }
}

/// Outcome of a full sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KitchenSinkResult {
    /// At least one attempt succeeded and verified.
    pub success: bool,
    pub timestamp: String,
    pub attempts: Vec<SweepAttempt>,
    /// Locations of every API whose driver reported success.
    pub succeeded: Vec<String>,
    /// Highest-priority attempt at or above the confidence threshold.
    pub winner: Option<String>,
    pub stopped_early: bool,
    pub errors: Vec<String>,
}

impl KitchenSinkResult {
    pub(crate) fn empty(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            timestamp: chrono::Utc::now().to_rfc3339(),
            attempts: Vec::new(),
            succeeded: Vec::new(),
            winner: None,
            stopped_early: false,
            errors: vec![reason.into()],
        }
    }
}

/// Shared state for every sweep step.
pub(crate) struct SweepContext {
    pub drivers: Arc<DriverSet>,
    pub options: CompletionOptions,
    pub verify_settle: Duration,
}

struct SweepStep {
    api: DiscoveredApi,
    priority: i64,
}

#[async_trait]
impl PipelineStep<SweepContext, SweepAttempt> for SweepStep {
    fn name(&self) -> &str {
        &self.api.location
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    async fn execute(&self, ctx: &SweepContext) -> Result<StepResult<SweepAttempt>, String> {
        let driver = ctx.drivers.for_kind(self.api.kind);
        let drive = CompletionOptions {
            terminate: false,
            ..ctx.options.clone()
        };
        let result = driver.complete(&self.api, &drive).await;
        let mut attempt = SweepAttempt {
            api_type: self.api.kind,
            location: self.api.location.clone(),
            success: result.success,
            assurance: result.assurance,
            operations: result.operations,
            errors: result.errors,
            verification: None,
        };

        if !attempt.success {
            let reason = attempt
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| "driver reported failure".to_string());
            return Ok(StepResult::fail(reason).with_data(attempt));
        }

        if !ctx.verify_settle.is_zero() {
            tokio::time::sleep(ctx.verify_settle).await;
        }
        let verification = driver.verify(&self.api, ctx.options.status).await;
        if ctx.options.terminate {
            if let Some(op) = driver.terminate(&self.api).await {
                attempt.operations.push(op);
            }
        }

        let confidence = attempt.assurance.confidence();
        let verified = verification.verified;
        let how = if verification.assumed { "assumed" } else { "verified" };
        attempt.verification = Some(verification);
        let result = if verified {
            StepResult::success(attempt, confidence, format!("{} {how}", self.api.kind))
        } else {
            StepResult::partial(
                attempt,
                confidence / 2,
                format!("{} driven but unverified", self.api.kind),
            )
        };
        Ok(result)
    }
}

/// Run every driver against every API in `apis` (already priority-ordered).
pub(crate) async fn sweep(
    apis: &[DiscoveredApi],
    ctx: &SweepContext,
    config: PipelineConfig,
    log: &mut DecisionLog,
) -> KitchenSinkResult {
    if apis.is_empty() {
        return KitchenSinkResult::empty("no completion APIs discovered");
    }

    let mut pipeline = FallbackPipeline::new("kitchen-sink", config);
    let kinds: HashMap<String, ProtocolKind> =
        apis.iter().map(|a| (a.location.clone(), a.kind)).collect();
    for (index, api) in apis.iter().enumerate() {
        let priority = (api.kind.priority() * 100 + index) as i64;
        pipeline.add_step(Box::new(SweepStep {
            api: api.clone(),
            priority,
        }));
    }

    let output = pipeline.run(ctx, log).await;

    let mut attempts = Vec::new();
    let mut errors = Vec::new();
    for step in output.steps {
        let attempt = match step.result.data {
            Some(attempt) => attempt,
            // Timed out or panicked before producing an attempt.
            None => SweepAttempt {
                api_type: kinds.get(&step.name).copied().unwrap_or(ProtocolKind::Custom),
                location: step.name.clone(),
                success: false,
                assurance: Assurance::None,
                operations: Vec::new(),
                errors: vec![step.result.reason.clone()],
                verification: None,
            },
        };
        if matches!(step.result.status, StepStatus::Fail | StepStatus::Error) {
            errors.push(format!("{}: {}", step.name, step.result.reason));
        }
        attempts.push(attempt);
    }

    let succeeded: Vec<String> = attempts
        .iter()
        .filter(|a| a.success)
        .map(|a| a.location.clone())
        .collect();
    tracing::info!(
        "kitchen sink: {}/{} attempts succeeded",
        succeeded.len(),
        attempts.len()
    );

    KitchenSinkResult {
        success: attempts.iter().any(SweepAttempt::verified),
        timestamp: chrono::Utc::now().to_rfc3339(),
        attempts,
        succeeded,
        winner: output.winner,
        stopped_early: output.halted,
        errors,
    }
}

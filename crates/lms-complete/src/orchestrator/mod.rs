//! Completion orchestrator: discover, inject, drive, verify, fall back.
//!
//! One orchestrator is one session. It owns the API registry and the
//! decision log, and walks the phase machine below for every request:
//!
//! ```text
//! Idle -> Discovering -> Injecting -> Driving -> Verifying -> Done
//!                                        \-> FallingBack -> Verifying -> Done
//! ```
//!
//! Nothing escapes a request as an error; every failure ends up in the
//! result's `errors` or `warnings`.

pub mod inject;
pub mod kitchen_sink;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::json;

pub use inject::InjectionRecord;
pub use kitchen_sink::{KitchenSinkResult, SweepAttempt};

use crate::config::CompletionConfig;
use crate::decision::{DecisionCategory, DecisionLog};
use crate::discovery::{ApiDiscovery, ApiRegistry, DiscoveredApi};
use crate::drivers::{DriverSet, ProtocolDriver};
use crate::host::ContextHandle;
use crate::http::HttpClient;
use crate::pipeline::{panic_message, PipelineConfig};
use crate::types::{
    Assurance, CompletionOptions, DriverResult, Operation, ProtocolKind, VerificationResult,
};
use kitchen_sink::SweepContext;

/// Where the orchestrator is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Discovering,
    Injecting,
    Driving,
    Verifying,
    FallingBack,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Discovering => "discovering",
            Phase::Injecting => "injecting",
            Phase::Driving => "driving",
            Phase::Verifying => "verifying",
            Phase::FallingBack => "fallingBack",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// The primary driver invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveRecord {
    #[serde(rename = "type")]
    pub api_type: ProtocolKind,
    pub location: String,
    pub success: bool,
    pub assurance: Assurance,
    pub operations: Vec<Operation>,
    pub errors: Vec<String>,
}

/// One executed phase in a [`CompletionResult`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum PhaseRecord {
    Storyline(InjectionRecord),
    LmsApi(DriveRecord),
    Verification(VerificationResult),
    KitchenSinkFallback(KitchenSinkResult),
}

/// Structured answer to a completion request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub success: bool,
    pub timestamp: String,
    pub api_type: Option<ProtocolKind>,
    pub api_location: Option<String>,
    pub operations: Vec<PhaseRecord>,
    pub verification: Option<VerificationResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
}

impl CompletionResult {
    fn new() -> Self {
        Self {
            success: false,
            timestamp: String::new(),
            api_type: None,
            api_location: None,
            operations: Vec::new(),
            verification: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            fallback_used: None,
        }
    }

    /// The primary driver's record, if driving ran.
    pub fn lms_api(&self) -> Option<&DriveRecord> {
        self.operations.iter().find_map(|p| match p {
            PhaseRecord::LmsApi(r) => Some(r),
            _ => None,
        })
    }

    fn lms_api_mut(&mut self) -> Option<&mut DriveRecord> {
        self.operations.iter_mut().find_map(|p| match p {
            PhaseRecord::LmsApi(r) => Some(r),
            _ => None,
        })
    }
}

/// Session-scoped completion orchestrator.
pub struct CompletionOrchestrator {
    origin: ContextHandle,
    config: CompletionConfig,
    discovery: ApiDiscovery,
    drivers: Arc<DriverSet>,
    registry: ApiRegistry,
    log: DecisionLog,
    phase: Phase,
}

impl CompletionOrchestrator {
    /// An orchestrator rooted at `origin`, the context the course runs in.
    pub fn new(origin: ContextHandle, config: CompletionConfig) -> Self {
        let http = HttpClient::new(config.aicc_http_timeout_ms);
        Self::with_http(origin, config, http)
    }

    pub fn with_http(origin: ContextHandle, config: CompletionConfig, http: HttpClient) -> Self {
        Self {
            origin,
            discovery: ApiDiscovery::new(&config),
            drivers: Arc::new(DriverSet::new(&config, http)),
            registry: ApiRegistry::new(),
            log: DecisionLog::with_capacity(config.decision_log_capacity),
            phase: Phase::Idle,
            config,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ApiRegistry {
        &self.registry
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.log
    }

    /// Drop the cached registry; the next request re-discovers.
    pub fn invalidate(&mut self) {
        self.registry.invalidate();
        self.log.record(
            DecisionCategory::Orchestrator,
            "registry",
            "invalidate",
            "explicit invalidation",
        );
    }

    fn transition(&mut self, next: Phase, reason: &str) {
        let from = self.phase;
        self.phase = next;
        tracing::info!("phase {from} -> {next}: {reason}");
        self.log.record(
            DecisionCategory::Orchestrator,
            "phase",
            format!("{from} -> {next}"),
            reason,
        );
    }

    /// Fresh discovery pass, replacing the registry.
    pub async fn discover(&mut self) -> &ApiRegistry {
        self.registry = self.discovery.discover(&self.origin, &mut self.log).await;
        &self.registry
    }

    async fn ensure_discovered(&mut self) {
        if self.registry.is_empty() {
            self.transition(Phase::Discovering, "no cached APIs");
            self.discover().await;
        } else {
            self.transition(Phase::Discovering, "using cached APIs");
        }
    }

    /// Re-discover and return what was found.
    pub async fn request_discovery(&mut self) -> Vec<DiscoveredApi> {
        self.begin();
        self.transition(Phase::Discovering, "discovery requested");
        self.discover().await;
        self.transition(Phase::Done, "discovery complete");
        self.registry.apis().to_vec()
    }

    fn begin(&mut self) {
        if self.phase != Phase::Idle {
            self.transition(Phase::Idle, "new request");
        }
    }

    /// Drive the best API into the requested state and verify it.
    pub async fn request_completion(&mut self, options: &CompletionOptions) -> CompletionResult {
        self.begin();
        let mut result = CompletionResult::new();
        self.ensure_discovered().await;

        self.transition(Phase::Injecting, "auxiliary state");
        self.inject(options, &mut result).await;

        self.transition(Phase::Driving, "primary API");
        let Some(api) = self.registry.primary(options.api_index).cloned() else {
            let error = match options.api_index {
                Some(i) => format!("apiIndex {i} out of range ({} APIs discovered)", self.registry.len()),
                None => "no completion API discovered".to_string(),
            };
            tracing::warn!("{error}");
            self.log.record(DecisionCategory::Driver, "primary", "none", &error);
            result.errors.push(error);
            self.transition(Phase::Done, "nothing to drive");
            return self.finish(result);
        };
        result.api_type = Some(api.kind);
        result.api_location = Some(api.location.clone());

        let drivers = Arc::clone(&self.drivers);
        let driver = drivers.for_kind(api.kind);
        // Terminate is deferred until after verification.
        let drive_options = CompletionOptions {
            terminate: false,
            ..options.clone()
        };
        let driven = self.drive(driver, &api, &drive_options).await;
        result.errors.extend(driven.errors.iter().cloned());
        result.operations.push(PhaseRecord::LmsApi(DriveRecord {
            api_type: api.kind,
            location: api.location.clone(),
            success: driven.success,
            assurance: driven.assurance,
            operations: driven.operations,
            errors: driven.errors,
        }));

        if driven.success {
            self.transition(Phase::Verifying, "driver reported success");
            self.settle(self.config.verify_settle()).await;
            let verification = self.verify(driver, &api, options).await;
            if options.terminate {
                if let Some(op) = driver.terminate(&api).await {
                    if let Some(record) = result.lms_api_mut() {
                        record.operations.push(op);
                    }
                }
            }
            if verification.assumed {
                result.warnings.push(format!(
                    "{} has no read-back; success is assumed ({:?} assurance)",
                    api.kind, driven.assurance
                ));
            }
            if !verification.verified {
                result
                    .warnings
                    .push("driver reported success but verification did not confirm it".into());
            }
            result.success = verification.verified;
            result.verification = Some(verification.clone());
            result.operations.push(PhaseRecord::Verification(verification));
            self.transition(Phase::Done, if result.success { "verified" } else { "unverified" });
            return self.finish(result);
        }

        if !self.config.kitchen_sink_enabled {
            self.log.record(
                DecisionCategory::Fallback,
                "kitchen-sink",
                "disabled",
                "primary driver failed",
            );
            self.transition(Phase::Done, "primary failed, fallback disabled");
            return self.finish(result);
        }

        self.transition(Phase::FallingBack, "primary driver failed");
        let sink = self.sweep(options).await;
        result.fallback_used = Some(true);
        self.transition(Phase::Verifying, "fallback sweep complete");
        if let Some(attempt) = sink.attempts.iter().find(|a| a.verified()) {
            result.verification = attempt.verification.clone();
            result.warnings.push(format!(
                "primary {} failed; completed through fallback {}",
                api.kind, attempt.location
            ));
        }
        result.success = sink.success;
        result.errors.extend(sink.errors.iter().cloned());
        result.operations.push(PhaseRecord::KitchenSinkFallback(sink));
        self.transition(
            Phase::Done,
            if result.success { "fallback succeeded" } else { "fallback failed" },
        );
        self.finish(result)
    }

    /// Exhaustive sweep on demand, independent of a primary attempt.
    pub async fn request_kitchen_sink(&mut self, options: &CompletionOptions) -> KitchenSinkResult {
        self.begin();
        self.ensure_discovered().await;
        self.transition(Phase::FallingBack, "kitchen sink requested");
        let result = self.sweep(options).await;
        self.transition(Phase::Done, "sweep complete");
        result
    }

    async fn inject(&mut self, options: &CompletionOptions, result: &mut CompletionResult) {
        let contexts = self.discovery.contexts(&self.origin).await;
        let record = inject::inject_storyline(
            &contexts,
            options,
            self.config.call_timeout(),
            &mut self.log,
        )
        .await;
        if let Some(record) = record {
            if record.success {
                self.settle(self.config.injection_settle()).await;
            } else {
                result
                    .warnings
                    .extend(record.errors.iter().map(|e| format!("storyline: {e}")));
            }
            result.operations.push(PhaseRecord::Storyline(record));
        }
    }

    /// Run one driver under the step timeout, converting panics and
    /// timeouts into a failed result.
    async fn drive(
        &mut self,
        driver: &dyn ProtocolDriver,
        api: &DiscoveredApi,
        options: &CompletionOptions,
    ) -> DriverResult {
        let limit = self.config.step_timeout();
        let guarded = AssertUnwindSafe(driver.complete(api, options)).catch_unwind();
        let result = match tokio::time::timeout(limit, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => DriverResult::failure(
                vec![format!("{} driver panicked: {}", api.kind, panic_message(&panic))],
                Vec::new(),
            ),
            Err(_) => DriverResult::failure(
                vec![format!("{} driver timed out after {}ms", api.kind, limit.as_millis())],
                Vec::new(),
            ),
        };
        if result.success {
            tracing::info!("{} at {} driven", api.kind, api.location);
        } else {
            tracing::warn!("{} at {} failed: {:?}", api.kind, api.location, result.errors);
        }
        self.log.record_with(
            DecisionCategory::Driver,
            &api.location,
            if result.success { "success" } else { "failure" },
            result
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| format!("{:?} assurance", result.assurance)),
            json!({
                "type": api.kind,
                "operations": result.operations.len(),
            }),
        );
        result
    }

    async fn verify(
        &mut self,
        driver: &dyn ProtocolDriver,
        api: &DiscoveredApi,
        options: &CompletionOptions,
    ) -> VerificationResult {
        let limit = self.config.step_timeout();
        let verification = match tokio::time::timeout(limit, driver.verify(api, options.status)).await {
            Ok(v) => v,
            Err(_) => VerificationResult::unverified(vec![format!(
                "verification timed out after {}ms",
                limit.as_millis()
            )]),
        };
        self.log.record_with(
            DecisionCategory::Verification,
            &api.location,
            if verification.verified { "verified" } else { "unverified" },
            verification
                .status
                .clone()
                .unwrap_or_else(|| verification.errors.join("; ")),
            json!({ "assumed": verification.assumed }),
        );
        verification
    }

    async fn sweep(&mut self, options: &CompletionOptions) -> KitchenSinkResult {
        let apis = self.registry.apis().to_vec();
        let ctx = SweepContext {
            drivers: Arc::clone(&self.drivers),
            options: options.clone(),
            verify_settle: self.config.verify_settle(),
        };
        let config = PipelineConfig::from_completion(
            &self.config,
            self.config.kitchen_sink_stop_on_first_success,
        );
        kitchen_sink::sweep(&apis, &ctx, config, &mut self.log).await
    }

    async fn settle(&self, delay: std::time::Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn finish(&self, mut result: CompletionResult) -> CompletionResult {
        result.timestamp = chrono::Utc::now().to_rfc3339();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryContext;
    use crate::host::mocks::{ScormMock, StorylineMock};

    fn config() -> CompletionConfig {
        CompletionConfig::default().without_delays()
    }

    #[tokio::test]
    async fn test_every_transition_recorded() {
        let top = MemoryContext::root("https://lms.example/");
        top.scope().insert_object("API", ScormMock::scorm12().object());
        let mut orch = CompletionOrchestrator::new(top.handle(), config());

        let result = orch.request_completion(&CompletionOptions::default()).await;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(orch.phase(), Phase::Done);

        let phases: Vec<String> = orch
            .decisions()
            .by_category(DecisionCategory::Orchestrator)
            .into_iter()
            .map(|r| r.decision.clone())
            .collect();
        assert_eq!(
            phases,
            vec![
                "idle -> discovering",
                "discovering -> injecting",
                "injecting -> driving",
                "driving -> verifying",
                "verifying -> done",
            ]
        );
    }

    #[tokio::test]
    async fn test_storyline_recorded_before_lms_api() {
        let top = MemoryContext::root("https://lms.example/");
        top.scope().insert_object("API_1484_11", ScormMock::scorm2004().object());
        let player = StorylineMock::install(&top.scope());
        let mut orch = CompletionOrchestrator::new(top.handle(), config());

        let result = orch.request_completion(&CompletionOptions::default()).await;
        assert!(result.success);
        assert!(matches!(result.operations[0], PhaseRecord::Storyline(_)));
        assert!(matches!(result.operations[1], PhaseRecord::LmsApi(_)));
        assert!(matches!(result.operations[2], PhaseRecord::Verification(_)));
        assert_eq!(player.var("CompletionStatus"), Some(json!("passed")));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["operations"][0]["phase"], "storyline");
        assert_eq!(value["operations"][1]["phase"], "lmsApi");
        assert_eq!(value["apiType"], "scorm2004");
        assert!(value.get("fallbackUsed").is_none());
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back() {
        let top = MemoryContext::root("https://lms.example/");
        let broken = ScormMock::scorm2004();
        broken.reject_element("cmi.completion_status");
        top.scope().insert_object("API_1484_11", broken.object());
        let healthy = ScormMock::scorm12();
        top.scope().insert_object("API", healthy.object());
        let mut orch = CompletionOrchestrator::new(top.handle(), config());

        let result = orch.request_completion(&CompletionOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.fallback_used, Some(true));
        assert_eq!(result.api_type, Some(ProtocolKind::Scorm2004));
        assert_eq!(
            healthy.value("cmi.core.lesson_status").as_deref(),
            Some("passed")
        );
        assert!(matches!(
            result.operations.last(),
            Some(PhaseRecord::KitchenSinkFallback(_))
        ));
        assert_eq!(
            orch.decisions()
                .by_category(DecisionCategory::Fallback)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_fallback_disabled() {
        let top = MemoryContext::root("https://lms.example/");
        let broken = ScormMock::scorm12();
        broken.throw_on("LMSSetValue");
        top.scope().insert_object("API", broken.object());
        let mut cfg = config();
        cfg.kitchen_sink_enabled = false;
        let mut orch = CompletionOrchestrator::new(top.handle(), cfg);

        let result = orch.request_completion(&CompletionOptions::default()).await;
        assert!(!result.success);
        assert!(result.fallback_used.is_none());
        assert!(!result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_no_api_is_structured_failure() {
        let top = MemoryContext::root("https://example.com/");
        let mut orch = CompletionOrchestrator::new(top.handle(), config());
        let result = orch.request_completion(&CompletionOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.errors, vec!["no completion API discovered"]);
        assert!(!result.timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_after_verification() {
        let top = MemoryContext::root("https://lms.example/");
        let scorm = ScormMock::scorm12();
        top.scope().insert_object("API", scorm.object());
        let mut orch = CompletionOrchestrator::new(top.handle(), config());

        let opts = CompletionOptions {
            terminate: true,
            ..Default::default()
        };
        let result = orch.request_completion(&opts).await;
        assert!(result.success);
        assert!(scorm.is_terminated());
        let ops = &result.lms_api().unwrap().operations;
        assert_eq!(ops.last().map(|o| o.method()), Some("LMSFinish"));
    }

    #[tokio::test]
    async fn test_registry_cached_until_invalidated() {
        let top = MemoryContext::root("https://lms.example/");
        top.scope().insert_object("API", ScormMock::scorm12().object());
        let mut orch = CompletionOrchestrator::new(top.handle(), config());
        assert_eq!(orch.request_discovery().await.len(), 1);

        top.scope().insert_object("API_1484_11", ScormMock::scorm2004().object());
        let result = orch.request_completion(&CompletionOptions::default()).await;
        assert_eq!(result.api_type, Some(ProtocolKind::Scorm12));

        orch.invalidate();
        let result = orch.request_completion(&CompletionOptions::default()).await;
        assert_eq!(result.api_type, Some(ProtocolKind::Scorm2004));
    }
}

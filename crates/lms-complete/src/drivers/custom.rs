//! Proprietary completion functions (`setComplete(1)`, `SetCourseComplete(1)`).
//!
//! There is no protocol here to acknowledge anything: success means the
//! function returned without throwing, and the result carries
//! [`Assurance::DidNotThrow`] so callers can weigh it accordingly.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::call::call_host;
use super::ProtocolDriver;
use crate::discovery::DiscoveredApi;
use crate::types::{
    format_decimal, Assurance, CompletionOptions, CompletionStatus, DriverResult, Operation,
    ProtocolKind, VerificationResult,
};

/// Score setters tried after the completion call, first match only.
pub const SCORE_SETTERS: [&str; 3] = ["setScore", "SetScore", "setCourseScore"];

pub struct CustomDriver {
    call_timeout: Duration,
}

impl CustomDriver {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }
}

#[async_trait]
impl ProtocolDriver for CustomDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Custom
    }

    async fn complete(&self, api: &DiscoveredApi, options: &CompletionOptions) -> DriverResult {
        let Some(function) = api.methods.first() else {
            return DriverResult::failure(vec!["no completion function recorded".into()], Vec::new());
        };
        let flag = if options.status.is_success() { 1 } else { 0 };
        let call = format!("{function}({flag})");

        let mut operations = Vec::new();
        match call_host(&api.object, function, vec![json!(flag).into()], self.call_timeout).await {
            Ok(v) => operations.push(Operation::ok(call, Some(v))),
            Err(e) => {
                let message = e.to_string();
                operations.push(Operation::failed(call, None, message.clone()));
                return DriverResult::failure(vec![message], operations);
            }
        }

        let mut errors = Vec::new();
        for setter in SCORE_SETTERS {
            if !api.object.is_callable(setter).await {
                continue;
            }
            let score = options.clamped_score();
            let call = format!("{setter}({})", format_decimal(score, 2));
            match call_host(&api.object, setter, vec![json!(score).into()], self.call_timeout).await {
                Ok(v) => operations.push(Operation::ok(call, Some(v))),
                Err(e) => {
                    errors.push(format!("non-fatal: {e}"));
                    operations.push(Operation::failed(call, None, e.to_string()));
                }
            }
            break;
        }

        DriverResult {
            success: true,
            operations,
            errors,
            assurance: Assurance::DidNotThrow,
        }
    }

    async fn verify(&self, _api: &DiscoveredApi, _expected: CompletionStatus) -> VerificationResult {
        VerificationResult::assumed_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryObject;
    use crate::host::mocks::CustomFunctionMock;
    use crate::host::{HostReply, HostValue};

    fn api(global: &std::sync::Arc<MemoryObject>, function: &str) -> DiscoveredApi {
        DiscoveredApi {
            kind: ProtocolKind::Custom,
            location: format!("self.{function}"),
            object: global.clone(),
            methods: vec![function.to_string()],
            functional: false,
            standalone: true,
            launch_urls: Vec::new(),
        }
    }

    fn driver() -> CustomDriver {
        CustomDriver::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_pass_flag_and_score() {
        let global = MemoryObject::new("window");
        let mock = CustomFunctionMock::new();
        mock.install(&global, "SetCourseComplete");
        mock.install(&global, "setScore");

        let result = driver()
            .complete(
                &api(&global, "SetCourseComplete"),
                &CompletionOptions {
                    score: 75.0,
                    ..Default::default()
                },
            )
            .await;
        assert!(result.success);
        assert_eq!(result.assurance, Assurance::DidNotThrow);
        let calls = mock.calls();
        assert_eq!(calls[0], ("SetCourseComplete".to_string(), vec![json!(1)]));
        assert_eq!(calls[1], ("setScore".to_string(), vec![json!(75.0)]));
    }

    #[tokio::test]
    async fn test_failed_status_sends_zero() {
        let global = MemoryObject::new("window");
        let mock = CustomFunctionMock::new();
        mock.install(&global, "setComplete");
        let opts = CompletionOptions {
            status: CompletionStatus::Failed,
            ..Default::default()
        };
        assert!(driver().complete(&api(&global, "setComplete"), &opts).await.success);
        assert_eq!(mock.calls()[0].1, vec![json!(0)]);
    }

    #[tokio::test]
    async fn test_throwing_function_fails() {
        let global = MemoryObject::new("window");
        CustomFunctionMock::new().install_throwing(&global, "markComplete");
        let result = driver()
            .complete(&api(&global, "markComplete"), &CompletionOptions::default())
            .await;
        assert!(!result.success);
        assert!(result.errors[0].contains("course not ready"));
    }

    #[tokio::test]
    async fn test_score_setter_failure_not_fatal() {
        let global = MemoryObject::new("window");
        global.insert_method("setComplete", |_| Ok(HostReply::Ready(HostValue::Undefined)));
        CustomFunctionMock::new().install_throwing(&global, "setScore");
        let result = driver()
            .complete(&api(&global, "setComplete"), &CompletionOptions::default())
            .await;
        assert!(result.success);
        assert_eq!(result.errors.len(), 1);
    }
}

//! Shared SCORM runtime driver, parameterised by API generation.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;

use super::call::{call_host, describe_call, is_truthy, value_text};
use super::ProtocolDriver;
use crate::discovery::DiscoveredApi;
use crate::error::DriverError;
use crate::host::ObjectHandle;
use crate::types::{
    Assurance, CompletionOptions, CompletionStatus, DriverResult, Operation, ProtocolKind,
    VerificationResult,
};

/// One data-model write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScormElement {
    pub name: &'static str,
    pub value: String,
    /// A rejected required element fails the whole drive.
    pub required: bool,
}

impl ScormElement {
    pub fn required(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            required: true,
        }
    }

    pub fn optional(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
            required: false,
        }
    }
}

/// Method names and data-model layout of one SCORM generation.
pub trait ScormDialect: Send + Sync + 'static {
    const KIND: ProtocolKind;
    const INITIALIZE: &'static str;
    const TERMINATE: &'static str;
    const GET_VALUE: &'static str;
    const SET_VALUE: &'static str;
    const COMMIT: &'static str;
    const GET_LAST_ERROR: &'static str;
    const GET_ERROR_STRING: &'static str;
    /// Error codes meaning "Initialize was already called".
    const ALREADY_INITIALIZED: &'static [&'static str];
    /// Elements read back by `verify`.
    const STATUS_ELEMENTS: &'static [&'static str];
    const SCORE_ELEMENT: &'static str;

    /// Writes in issue order: score, status, time, interaction.
    fn elements(options: &CompletionOptions) -> Vec<ScormElement>;

    /// Judge the read-back values (same order as `STATUS_ELEMENTS`).
    /// Returns whether they satisfy `expected` and the status to report.
    fn judge(expected: CompletionStatus, values: &[String]) -> (bool, String);
}

/// Driver for either SCORM generation.
pub struct ScormDriver<D: ScormDialect> {
    call_timeout: Duration,
    _dialect: PhantomData<D>,
}

impl<D: ScormDialect> ScormDriver<D> {
    pub fn new(_dialect: D, call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            _dialect: PhantomData,
        }
    }

    /// The host's own error accessor pair: `(code, text)`.
    async fn last_error(&self, obj: &ObjectHandle) -> (String, String) {
        let code = call_host(obj, D::GET_LAST_ERROR, vec![], self.call_timeout)
            .await
            .map(|v| value_text(&v))
            .unwrap_or_default();
        if code.is_empty() {
            return (String::from("?"), String::from("error code unavailable"));
        }
        let text = call_host(
            obj,
            D::GET_ERROR_STRING,
            vec![code.clone().into()],
            self.call_timeout,
        )
        .await
        .map(|v| value_text(&v))
        .unwrap_or_default();
        (code, text)
    }

    /// Call a method whose return value must be truthy.
    async fn accepted_call(
        &self,
        obj: &ObjectHandle,
        method: &str,
        args: &[&str],
    ) -> (Operation, Option<DriverError>) {
        let call = describe_call(method, args);
        let host_args = args.iter().map(|a| (*a).into()).collect();
        match call_host(obj, method, host_args, self.call_timeout).await {
            Ok(v) if is_truthy(&v) => (Operation::ok(call, Some(v)), None),
            Ok(v) => {
                let (code, message) = self.last_error(obj).await;
                let err = DriverError::Rejected {
                    call: call.clone(),
                    code,
                    message,
                };
                (Operation::failed(call, Some(v), err.to_string()), Some(err))
            }
            Err(err) => (Operation::failed(call, None, err.to_string()), Some(err)),
        }
    }

    async fn read(&self, obj: &ObjectHandle, element: &str) -> Result<String, String> {
        match call_host(obj, D::GET_VALUE, vec![element.into()], self.call_timeout).await {
            Ok(v) => {
                let text = value_text(&v);
                if text.is_empty() {
                    let (code, message) = self.last_error(obj).await;
                    if code != "0" {
                        return Err(format!("{element}: code {code} ({message})"));
                    }
                }
                Ok(text)
            }
            Err(e) => Err(format!("{element}: {e}")),
        }
    }
}

#[async_trait]
impl<D: ScormDialect> ProtocolDriver for ScormDriver<D> {
    fn kind(&self) -> ProtocolKind {
        D::KIND
    }

    async fn complete(&self, api: &DiscoveredApi, options: &CompletionOptions) -> DriverResult {
        let obj = &api.object;
        let mut operations = Vec::new();
        let mut errors = Vec::new();
        let mut fatal = false;

        let (op, err) = self.accepted_call(obj, D::INITIALIZE, &[""]).await;
        operations.push(op);
        match err {
            Some(DriverError::Rejected { code, .. }) if D::ALREADY_INITIALIZED.contains(&code.as_str()) => {
                tracing::debug!("{} already initialized", api.location);
            }
            Some(e) => errors.push(e.to_string()),
            None => {}
        }

        for element in D::elements(options) {
            let (op, err) = self
                .accepted_call(obj, D::SET_VALUE, &[element.name, element.value.as_str()])
                .await;
            operations.push(op);
            if let Some(e) = err {
                tracing::warn!("{}: {e}", api.location);
                if element.required {
                    fatal = true;
                    errors.push(e.to_string());
                } else {
                    errors.push(format!("non-fatal: {e}"));
                }
            }
        }

        let (op, err) = self.accepted_call(obj, D::COMMIT, &[""]).await;
        operations.push(op);
        if let Some(e) = err {
            fatal = true;
            errors.push(e.to_string());
        }

        if options.terminate {
            if let Some(op) = self.terminate(api).await {
                if let Some(e) = &op.error {
                    errors.push(format!("non-fatal: {e}"));
                }
                operations.push(op);
            }
        }

        DriverResult {
            success: !fatal,
            operations,
            errors,
            assurance: if fatal {
                Assurance::None
            } else {
                Assurance::HostAcknowledged
            },
        }
    }

    async fn verify(&self, api: &DiscoveredApi, expected: CompletionStatus) -> VerificationResult {
        let obj = &api.object;
        let mut errors = Vec::new();
        let mut values = Vec::new();
        for element in D::STATUS_ELEMENTS {
            match self.read(obj, element).await {
                Ok(v) => values.push(v),
                Err(e) => {
                    errors.push(e);
                    values.push(String::new());
                }
            }
        }
        let score = match self.read(obj, D::SCORE_ELEMENT).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                errors.push(e);
                None
            }
        };

        let (verified, status) = D::judge(expected, &values);
        if !verified {
            errors.push(format!(
                "expected {expected}, host reports {}",
                if status.is_empty() { "nothing" } else { status.as_str() }
            ));
        }
        VerificationResult {
            verified,
            status: Some(status).filter(|s| !s.is_empty()),
            score,
            errors,
            assumed: false,
        }
    }

    async fn terminate(&self, api: &DiscoveredApi) -> Option<Operation> {
        let (op, _) = self.accepted_call(&api.object, D::TERMINATE, &[""]).await;
        Some(op)
    }
}

/// Convenience for dialect `judge` implementations.
pub(crate) fn lowered(values: &[String], index: usize) -> String {
    values
        .get(index)
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

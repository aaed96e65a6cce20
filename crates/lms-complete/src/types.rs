//! Core data types shared by discovery, drivers, and the orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The completion-reporting standards this library understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Scorm12,
    Scorm2004,
    Xapi,
    Aicc,
    Custom,
}

impl ProtocolKind {
    /// Priority order used for primary selection and the fallback sweep.
    pub const PRIORITY: [ProtocolKind; 5] = [
        ProtocolKind::Scorm2004,
        ProtocolKind::Scorm12,
        ProtocolKind::Xapi,
        ProtocolKind::Aicc,
        ProtocolKind::Custom,
    ];

    /// Position in [`ProtocolKind::PRIORITY`] (lower runs first).
    pub fn priority(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|k| *k == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolKind::Scorm12 => "scorm12",
            ProtocolKind::Scorm2004 => "scorm2004",
            ProtocolKind::Xapi => "xapi",
            ProtocolKind::Aicc => "aicc",
            ProtocolKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested completion outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    #[default]
    Passed,
    Completed,
    Failed,
}

impl CompletionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionStatus::Passed => "passed",
            CompletionStatus::Completed => "completed",
            CompletionStatus::Failed => "failed",
        }
    }

    /// `true` for passed/completed.
    pub fn is_success(self) -> bool {
        !matches!(self, CompletionStatus::Failed)
    }

    /// Whether a status string read back from a host satisfies this request.
    pub fn accepts(self, observed: &str) -> bool {
        let observed = observed.trim().to_ascii_lowercase();
        match self {
            CompletionStatus::Passed | CompletionStatus::Completed => {
                observed == "passed" || observed == "completed"
            }
            CompletionStatus::Failed => observed == "failed",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable input to one completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionOptions {
    pub status: CompletionStatus,
    pub score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub session_time_seconds: u64,
    /// Index into the priority-ordered registry; `None` picks the best API.
    pub api_index: Option<usize>,
    pub terminate: bool,
    pub include_interaction: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            status: CompletionStatus::Passed,
            score: 100.0,
            min_score: 0.0,
            max_score: 100.0,
            session_time_seconds: 300,
            api_index: None,
            terminate: false,
            include_interaction: false,
        }
    }
}

impl CompletionOptions {
    /// Score bounds ordered low to high. Inverted bounds are reordered with
    /// a warning; the command surface rejects them before any driver runs.
    pub fn bounds(&self) -> (f64, f64) {
        let (a, b) = (self.min_score, self.max_score);
        if a <= b {
            (a, b)
        } else {
            tracing::warn!(
                min_score = a,
                max_score = b,
                "inverted score bounds; using [{b}, {a}]"
            );
            (b, a)
        }
    }

    /// Raw score clamped into `[min_score, max_score]`.
    pub fn clamped_score(&self) -> f64 {
        let (min, max) = self.bounds();
        if !self.score.is_finite() {
            return min;
        }
        self.score.clamp(min, max)
    }

    /// Scaled score in `[0, 1]`: the clamped raw score's position between
    /// the bounds. A zero-width range scales to 1 at the bound.
    pub fn scaled_score(&self) -> f64 {
        let (min, max) = self.bounds();
        let range = max - min;
        let scaled = if range > 0.0 && range.is_finite() {
            (self.clamped_score() - min) / range
        } else if self.clamped_score() >= max {
            1.0
        } else {
            0.0
        };
        if scaled.is_finite() {
            scaled
        } else {
            0.0
        }
    }
}

/// Format a number the way SCORM hosts expect (`100`, `87.5`).
pub fn format_decimal(value: f64, max_fraction_digits: usize) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let s = format!("{value:.max_fraction_digits$}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// One atomic protocol call made by a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Method signature, e.g. `LMSSetValue("cmi.core.lesson_status", "passed")`.
    pub call: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Operation {
    pub fn ok(call: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            call: call.into(),
            success: true,
            value,
            error: None,
        }
    }

    pub fn failed(call: impl Into<String>, value: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            success: false,
            value,
            error: Some(error.into()),
        }
    }

    /// Method name portion of the call signature.
    pub fn method(&self) -> &str {
        self.call.split('(').next().unwrap_or(&self.call)
    }
}

/// How strongly a driver's success claim is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assurance {
    /// The host's own API accepted every required call.
    HostAcknowledged,
    /// A remote endpoint acknowledged the submission.
    TransportAcknowledged,
    /// Only known: the function did not throw.
    DidNotThrow,
    /// Nothing succeeded.
    None,
}

impl Assurance {
    /// Confidence (0-100) used when a driver runs as a pipeline step.
    pub fn confidence(self) -> u8 {
        match self {
            Assurance::HostAcknowledged => 90,
            Assurance::TransportAcknowledged => 80,
            Assurance::DidNotThrow => 30,
            Assurance::None => 0,
        }
    }
}

/// Audit trail of a single driver invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverResult {
    pub success: bool,
    pub operations: Vec<Operation>,
    pub errors: Vec<String>,
    pub assurance: Assurance,
}

impl DriverResult {
    pub fn failure(errors: Vec<String>, operations: Vec<Operation>) -> Self {
        Self {
            success: false,
            operations,
            errors,
            assurance: Assurance::None,
        }
    }
}

/// Outcome of reading back a protocol's state after a successful drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub status: Option<String>,
    pub score: Option<String>,
    pub errors: Vec<String>,
    /// `true` when the protocol has no read-back and success is assumed.
    #[serde(default)]
    pub assumed: bool,
}

impl VerificationResult {
    /// Status label used for the weak, no-read-back guarantee.
    pub const ASSUMED_SUCCESS: &'static str = "assumed_success";

    pub fn assumed_success() -> Self {
        Self {
            verified: true,
            status: Some(Self::ASSUMED_SUCCESS.to_string()),
            score: None,
            errors: Vec::new(),
            assumed: true,
        }
    }

    pub fn unverified(errors: Vec<String>) -> Self {
        Self {
            verified: false,
            status: None,
            score: None,
            errors,
            assumed: false,
        }
    }
}

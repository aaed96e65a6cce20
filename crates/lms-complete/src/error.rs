//! Error types for host access, driver plumbing, and configuration.

/// Failures reported by the host object graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A context or object boundary refused the access.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not callable: {0}")]
    NotCallable(String),

    /// The host code threw while servicing the call.
    #[error("host threw: {0}")]
    Thrown(String),

    /// The context or engine backing it is gone.
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

impl HostError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, HostError::AccessDenied(_))
    }
}

/// Errors raised inside a driver before they are flattened into
/// `DriverResult::errors`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("{0}")]
    Host(#[from] HostError),

    #[error("{call} timed out after {timeout_ms}ms")]
    Timeout { call: String, timeout_ms: u64 },

    #[error("{call} rejected (code {code}): {message}")]
    Rejected {
        call: String,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no valid xAPI actor could be resolved; refusing to send an unattributed statement")]
    ActorMissing,

    #[error("no xAPI activity id could be resolved")]
    ActivityMissing,

    #[error("no AICC transmission path available")]
    NoTransmissionPath,

    #[error("callback dropped before resolving: {0}")]
    CallbackDropped(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Configuration errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

/// Rejected command payloads.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid option {field}: {reason}")]
    InvalidOption { field: &'static str, reason: String },
}

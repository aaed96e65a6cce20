//! Time budgets and bounds, resolved from defaults and the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "LMS_COMPLETE_";

/// Every timeout, settle delay, and traversal bound the orchestrator uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Budget for one driver invocation or pipeline step.
    pub step_timeout_ms: u64,
    /// Budget for a single host method call.
    pub call_timeout_ms: u64,
    /// Budget for one xAPI statement send.
    pub xapi_send_timeout_ms: u64,
    /// Budget for one AICC HTTP round trip.
    pub aicc_http_timeout_ms: u64,
    /// Pause after auxiliary state injection.
    pub injection_settle_ms: u64,
    /// Pause between driving and verification.
    pub verify_settle_ms: u64,
    pub max_depth: usize,
    pub max_ancestor_hops: usize,
    pub decision_log_capacity: usize,
    /// Minimum confidence for a pipeline step to be declared the winner.
    pub confidence_threshold: u8,
    pub kitchen_sink_enabled: bool,
    pub kitchen_sink_stop_on_first_success: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 10_000,
            call_timeout_ms: 5_000,
            xapi_send_timeout_ms: 8_000,
            aicc_http_timeout_ms: 10_000,
            injection_settle_ms: 500,
            verify_settle_ms: 1_000,
            max_depth: 10,
            max_ancestor_hops: 10,
            decision_log_capacity: 500,
            confidence_threshold: 50,
            kitchen_sink_enabled: true,
            kitchen_sink_stop_on_first_success: false,
        }
    }
}

impl CompletionConfig {
    /// Defaults overridden by `LMS_COMPLETE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| {
            let var = format!("{ENV_PREFIX}{name}");
            lookup(&var).map(|value| (var, value))
        };

        if let Some((var, v)) = get("STEP_TIMEOUT_MS") {
            cfg.step_timeout_ms = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("CALL_TIMEOUT_MS") {
            cfg.call_timeout_ms = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("XAPI_SEND_TIMEOUT_MS") {
            cfg.xapi_send_timeout_ms = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("AICC_HTTP_TIMEOUT_MS") {
            cfg.aicc_http_timeout_ms = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("INJECTION_SETTLE_MS") {
            cfg.injection_settle_ms = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("VERIFY_SETTLE_MS") {
            cfg.verify_settle_ms = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("MAX_DEPTH") {
            cfg.max_depth = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("MAX_ANCESTOR_HOPS") {
            cfg.max_ancestor_hops = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("DECISION_LOG_CAPACITY") {
            cfg.decision_log_capacity = parse_num(&var, &v)?;
        }
        if let Some((var, v)) = get("CONFIDENCE_THRESHOLD") {
            let threshold: u8 = parse_num(&var, &v)?;
            if threshold > 100 {
                return Err(ConfigError::Invalid {
                    var,
                    value: v,
                    reason: "must be between 0 and 100".to_string(),
                });
            }
            cfg.confidence_threshold = threshold;
        }
        if let Some((var, v)) = get("KITCHEN_SINK") {
            cfg.kitchen_sink_enabled = parse_bool(&var, &v)?;
        }
        if let Some((var, v)) = get("KITCHEN_SINK_STOP_ON_FIRST_SUCCESS") {
            cfg.kitchen_sink_stop_on_first_success = parse_bool(&var, &v)?;
        }

        Ok(cfg)
    }

    /// Zero both settle delays.
    pub fn without_delays(mut self) -> Self {
        self.injection_settle_ms = 0;
        self.verify_settle_ms = 0;
        self
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn xapi_send_timeout(&self) -> Duration {
        Duration::from_millis(self.xapi_send_timeout_ms)
    }

    pub fn aicc_http_timeout(&self) -> Duration {
        Duration::from_millis(self.aicc_http_timeout_ms)
    }

    pub fn injection_settle(&self) -> Duration {
        Duration::from_millis(self.injection_settle_ms)
    }

    pub fn verify_settle(&self) -> Duration {
        Duration::from_millis(self.verify_settle_ms)
    }
}

fn parse_num<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        var: var.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var: var.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

//! AICC / HACP driver.
//!
//! Two independent paths are tried in order: a direct parameter API
//! (`PutParam`) living in the page, and an HTTP form post to the HACP
//! endpoint named by the launch URL. A response only counts as accepted
//! when it carries `error=0`; a 200 with a non-zero code is a failure.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::call::{call_host, describe_call, is_truthy, value_text};
use super::timefmt::aicc_time;
use super::ProtocolDriver;
use crate::discovery::{url_param, DiscoveredApi};
use crate::error::DriverError;
use crate::http::HttpClient;
use crate::types::{
    format_decimal, Assurance, CompletionOptions, CompletionStatus, DriverResult, Operation,
    ProtocolKind, VerificationResult,
};

/// HACP protocol version sent with every request.
pub const HACP_VERSION: &str = "4.0";

/// Parsed HACP response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiccResponse {
    pub error: Option<u32>,
    pub error_text: Option<String>,
    pub lesson_status: Option<String>,
    pub score: Option<String>,
}

impl AiccResponse {
    pub fn parse(body: &str) -> Self {
        static ERROR: OnceLock<Regex> = OnceLock::new();
        static TEXT: OnceLock<Regex> = OnceLock::new();
        static STATUS: OnceLock<Regex> = OnceLock::new();
        static SCORE: OnceLock<Regex> = OnceLock::new();
        let error = ERROR.get_or_init(|| {
            Regex::new(r"(?im)^\s*error\s*=\s*(\d+)").expect("error regex is valid")
        });
        let text = TEXT.get_or_init(|| {
            Regex::new(r"(?im)^\s*error_text\s*=\s*([^\r\n]*)").expect("error_text regex is valid")
        });
        let status = STATUS.get_or_init(|| {
            Regex::new(r"(?im)^\s*lesson_status\s*=\s*([^\r\n,]*)").expect("status regex is valid")
        });
        let score = SCORE.get_or_init(|| {
            Regex::new(r"(?im)^\s*score\s*=\s*([^\r\n,]*)").expect("score regex is valid")
        });
        let capture = |re: &Regex| {
            re.captures(body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        };
        Self {
            error: capture(error).and_then(|c| c.parse().ok()),
            error_text: capture(text),
            lesson_status: capture(status),
            score: capture(score),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error == Some(0)
    }

    fn describe(&self) -> String {
        match (self.error, &self.error_text) {
            (Some(code), Some(text)) => format!("error={code} ({text})"),
            (Some(code), None) => format!("error={code}"),
            (None, _) => "no error field in response".to_string(),
        }
    }
}

/// The `[Core]` block reported through `PutParam`.
pub fn aicc_block(options: &CompletionOptions) -> String {
    format!(
        "[Core]\r\nLesson_Status={}\r\nScore={}\r\nTime={}",
        options.status.as_str(),
        format_decimal(options.clamped_score(), 2),
        aicc_time(options.session_time_seconds)
    )
}

/// HACP endpoint and session id from the launch URLs.
pub fn hacp_endpoint(launch_urls: &[String]) -> Option<(String, String)> {
    let endpoint = launch_urls.iter().find_map(|u| url_param(u, "aicc_url"))?;
    let sid = launch_urls.iter().find_map(|u| url_param(u, "aicc_sid"))?;
    let parsed = url::Url::parse(&endpoint).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    Some((endpoint, sid))
}

pub struct AiccDriver {
    http: HttpClient,
    call_timeout: Duration,
    http_timeout: Duration,
}

impl AiccDriver {
    pub fn new(http: HttpClient, call_timeout: Duration, http_timeout: Duration) -> Self {
        Self {
            http,
            call_timeout,
            http_timeout,
        }
    }

    async fn direct_available(&self, api: &DiscoveredApi) -> bool {
        api.object.is_callable("PutParam").await
    }

    /// Path 1: `PutParam(block)` on the in-page API.
    async fn direct(&self, api: &DiscoveredApi, method: &str, arg: &str) -> Result<Operation, Operation> {
        let call = describe_call(method, &[arg]);
        match call_host(&api.object, method, vec![arg.into()], self.call_timeout).await {
            Ok(v) => {
                let text = value_text(&v);
                let parsed = AiccResponse::parse(&text);
                let accepted = match parsed.error {
                    Some(_) => parsed.is_ok(),
                    None => is_truthy(&v) || v.is_null(),
                };
                if accepted {
                    Ok(Operation::ok(call, Some(v)))
                } else {
                    Err(Operation::failed(call, Some(v), parsed.describe()))
                }
            }
            Err(e) => Err(Operation::failed(call, None, e.to_string())),
        }
    }

    /// Path 2: HACP form post.
    async fn post(
        &self,
        endpoint: &str,
        sid: &str,
        command: &str,
        data: &str,
    ) -> Result<(Operation, AiccResponse), Operation> {
        let call = format!("POST {endpoint} command={command}");
        let mut fields = vec![
            ("command", command),
            ("version", HACP_VERSION),
            ("session_id", sid),
        ];
        if !data.is_empty() {
            fields.push(("aicc_data", data));
        }
        let resp = match self.http.post_form(endpoint, &fields, self.http_timeout).await {
            Ok(r) => r,
            Err(e) => return Err(Operation::failed(call, None, e.to_string())),
        };
        let body = serde_json::Value::String(resp.body.clone());
        if !resp.is_success() {
            return Err(Operation::failed(
                call,
                Some(body),
                DriverError::Transport(format!("HTTP {}", resp.status)).to_string(),
            ));
        }
        let parsed = AiccResponse::parse(&resp.body);
        if parsed.is_ok() {
            Ok((Operation::ok(call, Some(body)), parsed))
        } else {
            let err = DriverError::Rejected {
                call: call.clone(),
                code: parsed.error.map(|c| c.to_string()).unwrap_or_else(|| "?".into()),
                message: parsed.error_text.clone().unwrap_or_else(|| parsed.describe()),
            };
            Err(Operation::failed(call, Some(body), err.to_string()))
        }
    }
}

#[async_trait]
impl ProtocolDriver for AiccDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Aicc
    }

    async fn complete(&self, api: &DiscoveredApi, options: &CompletionOptions) -> DriverResult {
        let block = aicc_block(options);
        let endpoint = hacp_endpoint(&api.launch_urls);
        let direct = self.direct_available(api).await;
        if !direct && endpoint.is_none() {
            return DriverResult::failure(
                vec![DriverError::NoTransmissionPath.to_string()],
                Vec::new(),
            );
        }

        let mut operations = Vec::new();
        let mut errors = Vec::new();
        let mut accepted = false;

        if direct {
            match self.direct(api, "PutParam", &block).await {
                Ok(op) => {
                    accepted = true;
                    operations.push(op);
                }
                Err(op) => {
                    errors.push(op.error.clone().unwrap_or_default());
                    operations.push(op);
                }
            }
        }

        if let Some((url, sid)) = &endpoint {
            match self.post(url, sid, "PutParam", &block).await {
                Ok((op, _)) => {
                    accepted = true;
                    operations.push(op);
                }
                Err(op) => {
                    errors.push(op.error.clone().unwrap_or_default());
                    operations.push(op);
                }
            }
        }

        if accepted && options.terminate {
            if let Some(op) = self.terminate(api).await {
                if let Some(e) = &op.error {
                    errors.push(format!("non-fatal: {e}"));
                }
                operations.push(op);
            }
        }

        DriverResult {
            success: accepted,
            operations,
            errors,
            assurance: if accepted {
                Assurance::TransportAcknowledged
            } else {
                Assurance::None
            },
        }
    }

    async fn verify(&self, api: &DiscoveredApi, expected: CompletionStatus) -> VerificationResult {
        let Some((url, sid)) = hacp_endpoint(&api.launch_urls) else {
            return VerificationResult::assumed_success();
        };
        match self.post(&url, &sid, "GetParam", "").await {
            Ok((_, parsed)) => {
                let status = parsed.lesson_status.clone().unwrap_or_default();
                let verified = expected.accepts(&expand_status(&status));
                VerificationResult {
                    verified,
                    errors: if verified {
                        Vec::new()
                    } else {
                        vec![format!("expected {expected}, LMS reports {status:?}")]
                    },
                    status: Some(status).filter(|s| !s.is_empty()),
                    score: parsed.score,
                    assumed: false,
                }
            }
            Err(op) => VerificationResult::unverified(vec![op.error.unwrap_or_default()]),
        }
    }

    async fn terminate(&self, api: &DiscoveredApi) -> Option<Operation> {
        if api.object.is_callable("ExitAU").await {
            return Some(match self.direct(api, "ExitAU", "").await {
                Ok(op) | Err(op) => op,
            });
        }
        let (url, sid) = hacp_endpoint(&api.launch_urls)?;
        Some(match self.post(&url, &sid, "ExitAU", "").await {
            Ok((op, _)) => op,
            Err(op) => op,
        })
    }
}

/// HACP allows single-letter statuses (`p`, `c`, `f`, ...).
fn expand_status(status: &str) -> String {
    let lowered = status.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "p" => "passed".into(),
        "c" => "completed".into(),
        "f" => "failed".into(),
        "i" => "incomplete".into(),
        "b" => "browsed".into(),
        "n" => "not attempted".into(),
        _ => lowered,
    }
}

//! One adapter for every host call a driver makes.
//!
//! Host APIs answer synchronously, through a callback, or with a promise.
//! Every call here races the configured timeout, and callbacks are funneled
//! through a resolve-once [`Completion`], so a late or repeated callback can
//! never reach a driver that has already moved on.

use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;

use crate::error::DriverError;
use crate::host::{Completion, HostArg, HostReply, HostValue, ObjectHandle};

fn timed_out(method: &str, limit: Duration) -> DriverError {
    DriverError::Timeout {
        call: method.to_string(),
        timeout_ms: limit.as_millis() as u64,
    }
}

/// Invoke `method` and return the raw host value. A promise is awaited and
/// its settled value returned as data.
pub async fn invoke_host(
    obj: &ObjectHandle,
    method: &str,
    args: Vec<HostArg>,
    limit: Duration,
) -> Result<HostValue, DriverError> {
    let call = async {
        match obj.invoke(method, args).await? {
            HostReply::Ready(value) => Ok(value),
            HostReply::Pending(rx) => rx
                .await
                .map(HostValue::Data)
                .map_err(|_| DriverError::CallbackDropped(method.to_string())),
        }
    };
    timeout(limit, call)
        .await
        .map_err(|_| timed_out(method, limit))?
}

/// Invoke `method` and return its result as JSON.
pub async fn call_host(
    obj: &ObjectHandle,
    method: &str,
    args: Vec<HostArg>,
    limit: Duration,
) -> Result<Value, DriverError> {
    let value = invoke_host(obj, method, args, limit).await?;
    Ok(value.to_json().await)
}

/// Invoke a method that reports through a callback, a promise, or both.
///
/// `build_args` receives the completion to embed in the argument list. The
/// first of callback or promise settlement wins; a synchronous return value
/// is used only if the callback has not already fired.
pub async fn call_with_callback<F>(
    obj: &ObjectHandle,
    method: &str,
    build_args: F,
    limit: Duration,
) -> Result<Value, DriverError>
where
    F: FnOnce(Completion) -> Vec<HostArg>,
{
    let (completion, mut rx) = Completion::channel();
    let args = build_args(completion);
    let call = async {
        match obj.invoke(method, args).await? {
            HostReply::Pending(settled) => tokio::select! {
                Ok(value) = &mut rx => Ok(value),
                value = settled => {
                    value.map_err(|_| DriverError::CallbackDropped(method.to_string()))
                }
            },
            HostReply::Ready(HostValue::Undefined) | HostReply::Ready(HostValue::Function) => rx
                .await
                .map_err(|_| DriverError::CallbackDropped(method.to_string())),
            HostReply::Ready(value) => match rx.try_recv() {
                Ok(from_callback) => Ok(from_callback),
                Err(_) => Ok(value.to_json().await),
            },
        }
    };
    timeout(limit, call)
        .await
        .map_err(|_| timed_out(method, limit))?
}

/// SCORM acceptance: `true`/`"true"`/`1`/`"1"` only.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s == "1"
        }
        _ => false,
    }
}

/// Render a call for the audit trail: `LMSSetValue("cmi.core.score.raw", "100")`.
pub fn describe_call(method: &str, args: &[&str]) -> String {
    let rendered: Vec<String> = args.iter().map(|a| format!("{a:?}")).collect();
    format!("{method}({})", rendered.join(", "))
}

/// Flatten a host result into a string (`"passed"`, `"0"`).
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

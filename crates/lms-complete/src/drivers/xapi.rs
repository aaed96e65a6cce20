//! xAPI / TinCan statement driver.
//!
//! Sends exactly one completion statement through the library object the
//! course already loaded. A statement is only sent when a real actor can be
//! resolved; an invented identity would be unattributable in the LRS.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::call::{call_with_callback, describe_call};
use super::timefmt::iso_duration;
use super::ProtocolDriver;
use crate::discovery::{url_param, DiscoveredApi};
use crate::error::DriverError;
use crate::host::{resolve_object_path, HostArg, HostObject, HostValue, ObjectHandle};
use crate::types::{
    format_decimal, Assurance, CompletionOptions, CompletionStatus, DriverResult, Operation,
    ProtocolKind, VerificationResult,
};

const VERB_BASE: &str = "http://adlnet.gov/expapi/verbs/";

/// Where the wrapper libraries keep their configured actor.
const ACTOR_CONFIG_PATHS: [&str; 3] = ["lrs.actor", "actor", "config.actor"];

pub struct XapiDriver {
    call_timeout: Duration,
    send_timeout: Duration,
}

impl XapiDriver {
    pub fn new(call_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            call_timeout,
            send_timeout,
        }
    }

    /// First valid actor from the library configuration, then launch URLs.
    async fn resolve_actor(&self, api: &DiscoveredApi) -> Option<Value> {
        for path in ACTOR_CONFIG_PATHS {
            let raw = tokio::time::timeout(self.call_timeout, read_path(&api.object, path))
                .await
                .ok()
                .flatten();
            if let Some(actor) = raw.as_ref().and_then(validate_actor) {
                tracing::debug!("xAPI actor from library config {path}");
                return Some(actor);
            }
        }
        for url in &api.launch_urls {
            if let Some(actor) = url_param(url, "actor")
                .map(Value::String)
                .as_ref()
                .and_then(validate_actor)
            {
                tracing::debug!("xAPI actor from launch URL {url}");
                return Some(actor);
            }
        }
        None
    }

    async fn send(&self, obj: &ObjectHandle, statement: &Value) -> (Operation, Result<(), String>) {
        let id = statement["id"].as_str().unwrap_or_default().to_string();
        let use_save = obj.is_callable("saveStatement").await;
        let method = if use_save { "saveStatement" } else { "sendStatement" };
        let call = describe_call(method, &[id.as_str()]);
        let stmt = statement.clone();

        let outcome = call_with_callback(
            obj,
            method,
            move |completion| {
                if use_save {
                    vec![
                        HostArg::Data(stmt),
                        HostArg::OptionsWithCallback(Map::new(), completion),
                    ]
                } else {
                    vec![HostArg::Data(stmt), HostArg::Callback(completion)]
                }
            },
            self.send_timeout,
        )
        .await;

        match outcome.map_err(|e| e.to_string()).and_then(interpret_send) {
            Ok(v) => (Operation::ok(call, Some(v)), Ok(())),
            Err(e) => (Operation::failed(call, None, e.clone()), Err(e)),
        }
    }
}

#[async_trait]
impl ProtocolDriver for XapiDriver {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Xapi
    }

    async fn complete(&self, api: &DiscoveredApi, options: &CompletionOptions) -> DriverResult {
        let Some(actor) = self.resolve_actor(api).await else {
            tracing::warn!("{}: no xAPI actor; statement not sent", api.location);
            return DriverResult::failure(vec![DriverError::ActorMissing.to_string()], Vec::new());
        };
        let Some(activity) = activity_id(&api.launch_urls) else {
            return DriverResult::failure(vec![DriverError::ActivityMissing.to_string()], Vec::new());
        };

        let statement = build_statement(actor, &activity, options);
        let (op, sent) = self.send(&api.object, &statement).await;
        match sent {
            Ok(()) => DriverResult {
                success: true,
                operations: vec![op],
                errors: Vec::new(),
                assurance: Assurance::TransportAcknowledged,
            },
            Err(e) => DriverResult::failure(vec![e], vec![op]),
        }
    }

    async fn verify(&self, _api: &DiscoveredApi, _expected: CompletionStatus) -> VerificationResult {
        // Statements are fire-and-forget from the course's side.
        VerificationResult::assumed_success()
    }
}

/// Read `a.b.c` from `root`, parsing JSON text values.
async fn read_path(root: &ObjectHandle, path: &str) -> Option<Value> {
    let (parent, member) = match path.rsplit_once('.') {
        Some((p, m)) => (resolve_object_path(root, p).await?, m),
        None => (root.clone(), path),
    };
    let value = match parent.get(member).await.ok()? {
        HostValue::Undefined | HostValue::Function => return None,
        other => other.to_json().await,
    };
    Some(value)
}

/// Normalize `candidate` to an Agent carrying exactly one valid inverse
/// functional identifier, or `None`.
///
/// Accepts JSON text and the TinCan launch format where every field is an
/// array (`"mbox": ["mailto:..."]`).
pub fn validate_actor(candidate: &Value) -> Option<Value> {
    let parsed;
    let obj = match candidate {
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s).ok()?;
            parsed.as_object()?
        }
        Value::Object(o) => o,
        _ => return None,
    };

    let field = |name: &str| -> Option<Value> {
        match obj.get(name)? {
            Value::Array(items) => items.first().cloned(),
            Value::Null => None,
            other => Some(other.clone()),
        }
    };
    let text = |name: &str| field(name).and_then(|v| v.as_str().map(|s| s.trim().to_string()));

    let mut actor = Map::new();
    actor.insert("objectType".into(), json!("Agent"));
    if let Some(name) = text("name").filter(|n| !n.is_empty()) {
        actor.insert("name".into(), json!(name));
    }

    if let Some(mbox) = text("mbox") {
        let valid = mbox
            .strip_prefix("mailto:")
            .is_some_and(|addr| addr.contains('@') && !addr.starts_with('@'));
        if valid {
            actor.insert("mbox".into(), json!(mbox));
            return Some(Value::Object(actor));
        }
    }
    if let Some(sha) = text("mbox_sha1sum") {
        if sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit()) {
            actor.insert("mbox_sha1sum".into(), json!(sha.to_ascii_lowercase()));
            return Some(Value::Object(actor));
        }
    }
    if let Some(openid) = text("openid") {
        if url::Url::parse(&openid).is_ok() {
            actor.insert("openid".into(), json!(openid));
            return Some(Value::Object(actor));
        }
    }
    if let Some(account) = field("account") {
        let get = |a: &str, b: &str| {
            account
                .get(a)
                .or_else(|| account.get(b))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        if let (Some(home), Some(name)) = (
            get("homePage", "accountServiceHomePage"),
            get("name", "accountName"),
        ) {
            actor.insert("account".into(), json!({"homePage": home, "name": name}));
            return Some(Value::Object(actor));
        }
    }
    None
}

/// `activity_id`/`activityId` from the launch URLs, else the owning
/// context's URL without query or fragment.
pub fn activity_id(launch_urls: &[String]) -> Option<String> {
    for url in launch_urls {
        for key in ["activity_id", "activityId"] {
            if let Some(id) = url_param(url, key) {
                return Some(id);
            }
        }
    }
    let mut own = url::Url::parse(launch_urls.first()?).ok()?;
    own.set_query(None);
    own.set_fragment(None);
    Some(own.to_string())
}

pub fn build_statement(actor: Value, activity: &str, options: &CompletionOptions) -> Value {
    let verb = options.status.as_str();
    let (min, max) = options.bounds();
    json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "actor": actor,
        "verb": {
            "id": format!("{VERB_BASE}{verb}"),
            "display": { "en-US": verb },
        },
        "object": {
            "objectType": "Activity",
            "id": activity,
        },
        "result": {
            "completion": true,
            "success": options.status.is_success(),
            "score": {
                "scaled": format_decimal(options.scaled_score(), 4).parse::<f64>().unwrap_or(0.0),
                "raw": options.clamped_score(),
                "min": min,
                "max": max,
            },
            "duration": iso_duration(options.session_time_seconds),
        },
    })
}

/// Judge what a send call settled with: callback arguments `[err, xhr]`,
/// a promise value, or a bare return.
fn interpret_send(settled: Value) -> Result<Value, String> {
    let status_of = |v: &Value| v.get("status").and_then(Value::as_u64);
    match &settled {
        Value::Array(args) => {
            let err = args.first().cloned().unwrap_or(Value::Null);
            if !matches!(err, Value::Null | Value::Bool(false)) {
                return Err(format!("LRS reported error: {}", text_of(&err)));
            }
            if let Some(status) = args.get(1).and_then(status_of) {
                if status >= 400 {
                    return Err(format!("LRS responded with status {status}"));
                }
            }
            Ok(settled)
        }
        Value::Object(_) => {
            if let Some(status) = status_of(&settled) {
                if status >= 400 {
                    return Err(format!("LRS responded with status {status}"));
                }
            }
            match settled.get("error") {
                None | Some(Value::Null) => Ok(settled),
                Some(err) => Err(format!("LRS reported error: {}", text_of(err))),
            }
        }
        _ => Ok(settled),
    }
}

fn text_of(v: &Value) -> String {
    v.as_str().map(String::from).unwrap_or_else(|| v.to_string())
}

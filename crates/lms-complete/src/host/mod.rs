//! Host abstraction for the execution-context graph a course runs in.
//!
//! Defines the `ExecutionContext` and `HostObject` traits that abstract over
//! where a course lives: a live page reached through a script engine
//! ([`script`]) or an in-memory graph ([`memory`]). Every access returns a
//! `Result` so a boundary violation can degrade one branch of the graph
//! without aborting the walk.

pub mod memory;
pub mod mocks;
pub mod script;

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::HostError;

/// Shared handle to an execution context.
pub type ContextHandle = Arc<dyn ExecutionContext>;

/// Shared handle to an object living in the host graph.
pub type ObjectHandle = Arc<dyn HostObject>;

/// Identity of a context or object, stable for the lifetime of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(pub u64);

/// A value read from the host.
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Data(Value),
    Function,
    Object(ObjectHandle),
}

impl HostValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            HostValue::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<ObjectHandle> {
        match self {
            HostValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// JSON view of the value; objects are snapshotted through the host.
    pub async fn to_json(&self) -> Value {
        match self {
            HostValue::Undefined | HostValue::Function => Value::Null,
            HostValue::Data(v) => v.clone(),
            HostValue::Object(o) => o.to_json().await.unwrap_or(Value::Null),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => f.write_str("Undefined"),
            HostValue::Data(v) => f.debug_tuple("Data").field(v).finish(),
            HostValue::Function => f.write_str("Function"),
            HostValue::Object(o) => write!(f, "Object({:?})", o.id()),
        }
    }
}

/// Resolve-once callback handed to host code.
///
/// Hosts may invoke a callback more than once or after the caller has given
/// up; only the first resolution is delivered and later ones are dropped.
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Mutex<Option<oneshot::Sender<Value>>>>,
}

impl Completion {
    /// A fresh callback and the receiver its first resolution lands in.
    pub fn channel() -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver `value`. Returns `false` if already resolved or abandoned.
    pub fn resolve(&self, value: Value) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        match self.slot.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// An argument passed into a host method.
#[derive(Debug, Clone)]
pub enum HostArg {
    Data(Value),
    /// A positional callback function.
    Callback(Completion),
    /// An options object whose `callback` member is the given completion.
    OptionsWithCallback(serde_json::Map<String, Value>, Completion),
}

impl HostArg {
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            HostArg::Data(v) => Some(v),
            _ => None,
        }
    }

    /// The callback carried by this argument, if any.
    pub fn completion(&self) -> Option<&Completion> {
        match self {
            HostArg::Callback(c) | HostArg::OptionsWithCallback(_, c) => Some(c),
            HostArg::Data(_) => None,
        }
    }
}

impl From<&str> for HostArg {
    fn from(s: &str) -> Self {
        HostArg::Data(Value::String(s.to_string()))
    }
}

impl From<String> for HostArg {
    fn from(s: String) -> Self {
        HostArg::Data(Value::String(s))
    }
}

impl From<Value> for HostArg {
    fn from(v: Value) -> Self {
        HostArg::Data(v)
    }
}

/// What a host method call handed back.
pub enum HostReply {
    /// Synchronous return value.
    Ready(HostValue),
    /// A promise; resolves with the settled value.
    Pending(oneshot::Receiver<Value>),
}

impl fmt::Debug for HostReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostReply::Ready(v) => f.debug_tuple("Ready").field(v).finish(),
            HostReply::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// An object in the host graph (an API object, a player, a global scope).
#[async_trait]
pub trait HostObject: Send + Sync {
    fn id(&self) -> HostId;
    /// Names of members visible on the object, own and inherited.
    async fn member_names(&self) -> Result<Vec<String>, HostError>;
    async fn is_callable(&self, name: &str) -> bool;
    async fn get(&self, name: &str) -> Result<HostValue, HostError>;
    async fn set(&self, name: &str, value: Value) -> Result<(), HostError>;
    async fn invoke(&self, method: &str, args: Vec<HostArg>) -> Result<HostReply, HostError>;
    /// Data-only snapshot of the object.
    async fn to_json(&self) -> Result<Value, HostError>;
}

/// One browsing-context-like scope: a window, frame, or popup.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    fn id(&self) -> HostId;
    /// Succeeds only when the context's contents are readable.
    async fn probe(&self) -> Result<(), HostError>;
    /// Parent context; a top-level context returns itself.
    async fn parent(&self) -> Result<Option<ContextHandle>, HostError>;
    async fn top(&self) -> Result<Option<ContextHandle>, HostError>;
    async fn opener(&self) -> Result<Option<ContextHandle>, HostError>;
    /// Directly nested sub-contexts.
    async fn frames(&self) -> Result<Vec<ContextHandle>, HostError>;
    /// Contexts held by a named property, single or array-valued.
    async fn context_property(&self, name: &str) -> Result<Vec<ContextHandle>, HostError>;
    /// The context's global scope.
    async fn global(&self) -> Result<ObjectHandle, HostError>;
    async fn url(&self) -> Result<String, HostError>;
}

/// Resolve a dotted member path (`ADL.XAPIWrapper`) starting at `root`.
pub async fn resolve_object_path(root: &ObjectHandle, path: &str) -> Option<ObjectHandle> {
    let mut current = Arc::clone(root);
    for segment in path.split('.') {
        match current.get(segment).await {
            Ok(HostValue::Object(next)) => current = next,
            _ => return None,
        }
    }
    Some(current)
}

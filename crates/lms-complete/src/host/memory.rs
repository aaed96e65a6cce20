//! In-memory execution-context graph.
//!
//! Mirrors the browser's window model closely enough to exercise discovery:
//! a top-level context is its own parent, `frames` and `parent`/`top`/
//! `opener` stay reachable on an inaccessible context, and everything else
//! (globals, URL, named properties) is refused with `AccessDenied`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde_json::Value;

use super::{ContextHandle, ExecutionContext, HostArg, HostId, HostObject, HostReply, HostValue, ObjectHandle};
use crate::error::HostError;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> HostId {
    HostId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Native implementation of a host method.
pub type MethodFn = Arc<dyn Fn(&[HostArg]) -> Result<HostReply, HostError> + Send + Sync>;

/// A member of a [`MemoryObject`].
#[derive(Clone)]
pub enum Member {
    Data(Value),
    Object(ObjectHandle),
    Method(MethodFn),
}

/// A host object backed by a member table.
pub struct MemoryObject {
    id: HostId,
    label: String,
    members: Mutex<BTreeMap<String, Member>>,
}

impl MemoryObject {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            label: label.into(),
            members: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn insert_data(&self, name: impl Into<String>, value: Value) {
        lock(&self.members).insert(name.into(), Member::Data(value));
    }

    pub fn insert_object(&self, name: impl Into<String>, object: ObjectHandle) {
        lock(&self.members).insert(name.into(), Member::Object(object));
    }

    pub fn insert_method<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[HostArg]) -> Result<HostReply, HostError> + Send + Sync + 'static,
    {
        lock(&self.members).insert(name.into(), Member::Method(Arc::new(f)));
    }

    pub fn remove(&self, name: &str) {
        lock(&self.members).remove(name);
    }

    pub fn data(&self, name: &str) -> Option<Value> {
        match lock(&self.members).get(name) {
            Some(Member::Data(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl HostObject for MemoryObject {
    fn id(&self) -> HostId {
        self.id
    }

    async fn member_names(&self) -> Result<Vec<String>, HostError> {
        Ok(lock(&self.members).keys().cloned().collect())
    }

    async fn is_callable(&self, name: &str) -> bool {
        matches!(lock(&self.members).get(name), Some(Member::Method(_)))
    }

    async fn get(&self, name: &str) -> Result<HostValue, HostError> {
        Ok(match lock(&self.members).get(name) {
            None => HostValue::Undefined,
            Some(Member::Data(v)) => HostValue::Data(v.clone()),
            Some(Member::Object(o)) => HostValue::Object(Arc::clone(o)),
            Some(Member::Method(_)) => HostValue::Function,
        })
    }

    async fn set(&self, name: &str, value: Value) -> Result<(), HostError> {
        self.insert_data(name, value);
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<HostArg>) -> Result<HostReply, HostError> {
        // Release the member lock before running user code.
        let f = match lock(&self.members).get(method) {
            Some(Member::Method(f)) => Arc::clone(f),
            _ => {
                return Err(HostError::NotCallable(format!("{}.{method}", self.label)));
            }
        };
        f(&args)
    }

    async fn to_json(&self) -> Result<Value, HostError> {
        let members: Vec<(String, Member)> = lock(&self.members)
            .iter()
            .map(|(k, m)| (k.clone(), m.clone()))
            .collect();
        let mut map = serde_json::Map::new();
        for (name, member) in members {
            match member {
                Member::Data(v) => {
                    map.insert(name, v);
                }
                Member::Object(o) => {
                    map.insert(name, o.to_json().await.unwrap_or(Value::Null));
                }
                Member::Method(_) => {}
            }
        }
        Ok(Value::Object(map))
    }
}

/// An in-memory window-like context.
pub struct MemoryContext {
    id: HostId,
    this: Weak<MemoryContext>,
    url: Mutex<String>,
    accessible: AtomicBool,
    parent: Mutex<Option<Weak<MemoryContext>>>,
    opener: Mutex<Option<Weak<MemoryContext>>>,
    frames: Mutex<Vec<Arc<MemoryContext>>>,
    properties: Mutex<BTreeMap<String, Vec<Arc<MemoryContext>>>>,
    scope: Arc<MemoryObject>,
}

impl MemoryContext {
    /// A new top-level context.
    pub fn root(url: impl Into<String>) -> Arc<Self> {
        Self::create(url.into(), None)
    }

    fn create(url: String, parent: Option<Weak<MemoryContext>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: next_id(),
            this: this.clone(),
            url: Mutex::new(url),
            accessible: AtomicBool::new(true),
            parent: Mutex::new(parent),
            opener: Mutex::new(None),
            frames: Mutex::new(Vec::new()),
            properties: Mutex::new(BTreeMap::new()),
            scope: MemoryObject::new("window"),
        })
    }

    /// Append a nested frame and return it.
    pub fn add_frame(self: &Arc<Self>, url: impl Into<String>) -> Arc<Self> {
        let child = Self::create(url.into(), Some(Arc::downgrade(self)));
        lock(&self.frames).push(Arc::clone(&child));
        child
    }

    /// A new top-level context whose opener is `self`.
    pub fn open_popup(self: &Arc<Self>, url: impl Into<String>) -> Arc<Self> {
        let popup = Self::create(url.into(), None);
        *lock(&popup.opener) = Some(Arc::downgrade(self));
        popup
    }

    /// Attach `ctx` under a named context-holding property.
    pub fn add_context_property(&self, name: impl Into<String>, ctx: &Arc<MemoryContext>) {
        lock(&self.properties)
            .entry(name.into())
            .or_default()
            .push(Arc::clone(ctx));
    }

    pub fn set_accessible(&self, accessible: bool) {
        self.accessible.store(accessible, Ordering::Relaxed);
    }

    pub fn is_accessible(&self) -> bool {
        self.accessible.load(Ordering::Relaxed)
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *lock(&self.url) = url.into();
    }

    /// The global scope object, bypassing the access check.
    pub fn scope(&self) -> Arc<MemoryObject> {
        Arc::clone(&self.scope)
    }

    /// This context as a trait-object handle.
    pub fn handle(self: &Arc<Self>) -> ContextHandle {
        Arc::clone(self) as ContextHandle
    }

    fn require_access(&self, what: &str) -> Result<(), HostError> {
        if self.is_accessible() {
            Ok(())
        } else {
            Err(HostError::AccessDenied(format!(
                "blocked reading {what} of a cross-origin context"
            )))
        }
    }

    fn self_handle(&self) -> Option<ContextHandle> {
        self.this.upgrade().map(|c| c as ContextHandle)
    }
}

#[async_trait]
impl ExecutionContext for MemoryContext {
    fn id(&self) -> HostId {
        self.id
    }

    async fn probe(&self) -> Result<(), HostError> {
        self.require_access("document")
    }

    async fn parent(&self) -> Result<Option<ContextHandle>, HostError> {
        let parent = lock(&self.parent).as_ref().and_then(Weak::upgrade);
        match parent {
            Some(p) => Ok(Some(p as ContextHandle)),
            None => Ok(self.self_handle()),
        }
    }

    async fn top(&self) -> Result<Option<ContextHandle>, HostError> {
        let mut current = match self.this.upgrade() {
            Some(c) => c,
            None => return Ok(None),
        };
        loop {
            let parent = lock(&current.parent).as_ref().and_then(Weak::upgrade);
            match parent {
                Some(p) => current = p,
                None => return Ok(Some(current as ContextHandle)),
            }
        }
    }

    async fn opener(&self) -> Result<Option<ContextHandle>, HostError> {
        Ok(lock(&self.opener)
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|c| c as ContextHandle))
    }

    async fn frames(&self) -> Result<Vec<ContextHandle>, HostError> {
        Ok(lock(&self.frames)
            .iter()
            .map(|c| Arc::clone(c) as ContextHandle)
            .collect())
    }

    async fn context_property(&self, name: &str) -> Result<Vec<ContextHandle>, HostError> {
        self.require_access(name)?;
        Ok(lock(&self.properties)
            .get(name)
            .map(|v| v.iter().map(|c| Arc::clone(c) as ContextHandle).collect())
            .unwrap_or_default())
    }

    async fn global(&self) -> Result<ObjectHandle, HostError> {
        self.require_access("globals")?;
        Ok(Arc::clone(&self.scope) as ObjectHandle)
    }

    async fn url(&self) -> Result<String, HostError> {
        self.require_access("location")?;
        Ok(lock(&self.url).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_root_is_its_own_parent() {
        let root = MemoryContext::root("https://lms.example/");
        let parent = root.parent().await.unwrap().unwrap();
        assert_eq!(parent.id(), ExecutionContext::id(root.as_ref()));
        let top = root.top().await.unwrap().unwrap();
        assert_eq!(top.id(), ExecutionContext::id(root.as_ref()));
    }

    #[tokio::test]
    async fn test_frame_parent_and_top() {
        let root = MemoryContext::root("https://lms.example/");
        let frame = root.add_frame("https://lms.example/player");
        let inner = frame.add_frame("https://lms.example/content");
        let parent = inner.parent().await.unwrap().unwrap();
        assert_eq!(parent.id(), ExecutionContext::id(frame.as_ref()));
        let top = inner.top().await.unwrap().unwrap();
        assert_eq!(top.id(), ExecutionContext::id(root.as_ref()));
        assert_eq!(root.frames().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inaccessible_context_refuses_globals() {
        let root = MemoryContext::root("https://lms.example/");
        let frame = root.add_frame("https://cdn.example/");
        frame.set_accessible(false);
        assert!(frame.probe().await.unwrap_err().is_access_denied());
        assert!(frame.global().await.is_err());
        assert!(frame.url().await.is_err());
        // Window-proxy members stay reachable.
        assert!(frame.parent().await.unwrap().is_some());
        assert!(frame.frames().await.is_ok());
    }

    #[tokio::test]
    async fn test_popup_opener() {
        let root = MemoryContext::root("https://lms.example/");
        let popup = root.open_popup("https://lms.example/course");
        let opener = popup.opener().await.unwrap().unwrap();
        assert_eq!(opener.id(), ExecutionContext::id(root.as_ref()));
    }

    #[tokio::test]
    async fn test_object_members() {
        let obj = MemoryObject::new("API");
        obj.insert_data("version", json!("1.0"));
        obj.insert_method("Ping", |_| Ok(HostReply::Ready(HostValue::Data(json!("pong")))));
        assert!(obj.is_callable("Ping").await);
        assert!(!obj.is_callable("version").await);
        assert!(obj.get("missing").await.unwrap().is_undefined());
        let reply = obj.invoke("Ping", vec![]).await.unwrap();
        assert!(matches!(reply, HostReply::Ready(HostValue::Data(v)) if v == json!("pong")));
        assert!(matches!(
            obj.invoke("version", vec![]).await,
            Err(HostError::NotCallable(_))
        ));
        assert_eq!(obj.to_json().await.unwrap(), json!({"version": "1.0"}));
    }
}

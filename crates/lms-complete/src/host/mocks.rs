//! Ready-made course runtimes for the in-memory host.
//!
//! Each mock installs a [`MemoryObject`] that behaves like the runtime a
//! course would find in an LMS frame, and keeps a shared state handle so
//! callers can inspect what the drivers did.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tokio::sync::oneshot;

use super::memory::MemoryObject;
use super::{HostArg, HostReply, HostValue, ObjectHandle};
use crate::error::HostError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn arg_str(args: &[HostArg], index: usize) -> String {
    match args.get(index).and_then(HostArg::as_data) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn ready(s: impl Into<String>) -> Result<HostReply, HostError> {
    Ok(HostReply::Ready(HostValue::Data(Value::String(s.into()))))
}

fn describe(method: &str, args: &[HostArg]) -> String {
    let rendered: Vec<String> = args
        .iter()
        .map(|a| match a {
            HostArg::Data(v) => v.to_string(),
            HostArg::Callback(_) => "<callback>".to_string(),
            HostArg::OptionsWithCallback(..) => "<options>".to_string(),
        })
        .collect();
    format!("{method}({})", rendered.join(", "))
}

// ── SCORM ─────────────────────────────

/// Which SCORM runtime generation a mock implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScormVersion {
    V12,
    V2004,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScormMethod {
    Initialize,
    Terminate,
    GetValue,
    SetValue,
    Commit,
    GetLastError,
    GetErrorString,
    GetDiagnostic,
}

impl ScormVersion {
    fn name(self, method: ScormMethod) -> &'static str {
        use ScormMethod::*;
        match (self, method) {
            (ScormVersion::V12, Initialize) => "LMSInitialize",
            (ScormVersion::V12, Terminate) => "LMSFinish",
            (ScormVersion::V12, GetValue) => "LMSGetValue",
            (ScormVersion::V12, SetValue) => "LMSSetValue",
            (ScormVersion::V12, Commit) => "LMSCommit",
            (ScormVersion::V12, GetLastError) => "LMSGetLastError",
            (ScormVersion::V12, GetErrorString) => "LMSGetErrorString",
            (ScormVersion::V12, GetDiagnostic) => "LMSGetDiagnostic",
            (ScormVersion::V2004, Initialize) => "Initialize",
            (ScormVersion::V2004, Terminate) => "Terminate",
            (ScormVersion::V2004, GetValue) => "GetValue",
            (ScormVersion::V2004, SetValue) => "SetValue",
            (ScormVersion::V2004, Commit) => "Commit",
            (ScormVersion::V2004, GetLastError) => "GetLastError",
            (ScormVersion::V2004, GetErrorString) => "GetErrorString",
            (ScormVersion::V2004, GetDiagnostic) => "GetDiagnostic",
        }
    }

    fn code(self, v12: u32, v2004: u32) -> u32 {
        match self {
            ScormVersion::V12 => v12,
            ScormVersion::V2004 => v2004,
        }
    }
}

fn scorm_error_string(code: u32) -> &'static str {
    match code {
        0 => "No error",
        101 => "General exception",
        103 => "Already Initialized",
        104 => "Content Instance Terminated",
        122 => "Retrieve Data Before Initialization",
        132 => "Store Data Before Initialization",
        133 => "Store Data After Termination",
        142 => "Commit Before Initialization",
        301 => "Not initialized",
        401 => "Not implemented error",
        405 => "Incorrect Data Type",
        406 => "Data Model Element Type Mismatch",
        _ => "Unknown error",
    }
}

/// Observable state of a SCORM mock.
#[derive(Debug, Default)]
pub struct ScormState {
    pub initialized: bool,
    pub terminated: bool,
    pub values: BTreeMap<String, String>,
    pub last_error: u32,
    pub calls: Vec<String>,
    pub commits: usize,
    rejected: BTreeSet<String>,
    silent_sets: bool,
    throwing: BTreeSet<&'static str>,
}

/// An in-memory SCORM 1.2 or 2004 runtime API.
#[derive(Clone)]
pub struct ScormMock {
    version: ScormVersion,
    state: Arc<Mutex<ScormState>>,
    object: Arc<MemoryObject>,
}

impl ScormMock {
    pub fn scorm12() -> Self {
        Self::new(ScormVersion::V12)
    }

    pub fn scorm2004() -> Self {
        Self::new(ScormVersion::V2004)
    }

    pub fn new(version: ScormVersion) -> Self {
        let mut initial = ScormState::default();
        match version {
            ScormVersion::V12 => {
                initial
                    .values
                    .insert("cmi.core.lesson_status".into(), "not attempted".into());
            }
            ScormVersion::V2004 => {
                initial
                    .values
                    .insert("cmi.completion_status".into(), "unknown".into());
                initial
                    .values
                    .insert("cmi.success_status".into(), "unknown".into());
            }
        }
        initial.values.insert("cmi.interactions._count".into(), "0".into());

        let state = Arc::new(Mutex::new(initial));
        let object = MemoryObject::new(match version {
            ScormVersion::V12 => "API",
            ScormVersion::V2004 => "API_1484_11",
        });

        use ScormMethod::*;
        for method in [
            Initialize,
            Terminate,
            GetValue,
            SetValue,
            Commit,
            GetLastError,
            GetErrorString,
            GetDiagnostic,
        ] {
            let st = Arc::clone(&state);
            object.insert_method(version.name(method), move |args| {
                scorm_call(version, method, &st, args)
            });
        }

        Self {
            version,
            state,
            object,
        }
    }

    pub fn version(&self) -> ScormVersion {
        self.version
    }

    pub fn object(&self) -> Arc<MemoryObject> {
        Arc::clone(&self.object)
    }

    /// Make every set of `element` return `"false"`.
    pub fn reject_element(&self, element: &str) {
        lock(&self.state).rejected.insert(element.to_string());
    }

    /// Accept every set without storing it.
    pub fn ignore_sets_silently(&self) {
        lock(&self.state).silent_sets = true;
    }

    /// Throw from the named method (e.g. `"LMSCommit"`).
    pub fn throw_on(&self, method_name: &str) {
        use ScormMethod::*;
        let known = [
            Initialize,
            Terminate,
            GetValue,
            SetValue,
            Commit,
            GetLastError,
            GetErrorString,
            GetDiagnostic,
        ];
        if let Some(m) = known
            .into_iter()
            .find(|m| self.version.name(*m) == method_name)
        {
            lock(&self.state).throwing.insert(self.version.name(m));
        }
    }

    pub fn preset(&self, element: &str, value: &str) {
        lock(&self.state)
            .values
            .insert(element.to_string(), value.to_string());
    }

    pub fn value(&self, element: &str) -> Option<String> {
        lock(&self.state).values.get(element).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn commit_count(&self) -> usize {
        lock(&self.state).commits
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.state).terminated
    }
}

fn scorm_call(
    version: ScormVersion,
    method: ScormMethod,
    state: &Mutex<ScormState>,
    args: &[HostArg],
) -> Result<HostReply, HostError> {
    let mut st = lock(state);
    let name = version.name(method);
    st.calls.push(describe(name, args));
    if st.throwing.contains(name) {
        return Err(HostError::Thrown(format!("{name} is not available")));
    }

    use ScormMethod::*;
    match method {
        Initialize => {
            if st.terminated {
                st.last_error = version.code(101, 104);
                ready("false")
            } else if st.initialized {
                st.last_error = version.code(101, 103);
                ready("false")
            } else {
                st.initialized = true;
                st.last_error = 0;
                ready("true")
            }
        }
        Terminate => {
            if !st.initialized || st.terminated {
                st.last_error = version.code(301, 112);
                ready("false")
            } else {
                st.terminated = true;
                st.last_error = 0;
                ready("true")
            }
        }
        GetValue => {
            if !st.initialized {
                st.last_error = version.code(301, 122);
                return ready("");
            }
            if st.terminated {
                st.last_error = version.code(101, 123);
                return ready("");
            }
            st.last_error = 0;
            let element = arg_str(args, 0);
            let value = st.values.get(&element).cloned().unwrap_or_default();
            ready(value)
        }
        SetValue => {
            if !st.initialized {
                st.last_error = version.code(301, 132);
                return ready("false");
            }
            if st.terminated {
                st.last_error = version.code(101, 133);
                return ready("false");
            }
            let element = arg_str(args, 0);
            let value = arg_str(args, 1);
            if st.rejected.contains(&element) {
                st.last_error = version.code(405, 406);
                return ready("false");
            }
            st.last_error = 0;
            if !st.silent_sets {
                track_interaction_count(&mut st.values, &element);
                st.values.insert(element, value);
            }
            ready("true")
        }
        Commit => {
            if !st.initialized {
                st.last_error = version.code(301, 142);
                return ready("false");
            }
            st.last_error = 0;
            st.commits += 1;
            ready("true")
        }
        GetLastError => ready(st.last_error.to_string()),
        GetErrorString => {
            let code = arg_str(args, 0).parse::<u32>().unwrap_or(101);
            ready(scorm_error_string(code))
        }
        GetDiagnostic => ready(""),
    }
}

/// Setting `cmi.interactions.N.id` at `N == _count` appends an interaction.
fn track_interaction_count(values: &mut BTreeMap<String, String>, element: &str) {
    let Some(rest) = element.strip_prefix("cmi.interactions.") else {
        return;
    };
    let Some((index, field)) = rest.split_once('.') else {
        return;
    };
    if field != "id" {
        return;
    }
    let count: usize = values
        .get("cmi.interactions._count")
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    if index.parse::<usize>().ok() == Some(count) {
        values.insert("cmi.interactions._count".into(), (count + 1).to_string());
    }
}

// ── xAPI ──────────────────────────────

/// The call shape an xAPI mock exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XapiStyle {
    /// `sendStatement(stmt, callback)` with `callback(err, xhr)`.
    Callback,
    /// `saveStatement(stmt, { callback })`.
    OptionsCallback,
    /// `sendStatement(stmt)` returning a promise.
    Promise,
    /// Accepts the statement and never answers.
    Silent,
}

#[derive(Debug, Default)]
pub struct XapiState {
    pub statements: Vec<Value>,
    pub response_status: u16,
    double_callback: bool,
    parked: Vec<oneshot::Sender<Value>>,
}

/// An in-memory xAPI library object (ADL wrapper / TinCan style).
#[derive(Clone)]
pub struct XapiMock {
    state: Arc<Mutex<XapiState>>,
    object: Arc<MemoryObject>,
}

impl XapiMock {
    pub fn new(style: XapiStyle) -> Self {
        let state = Arc::new(Mutex::new(XapiState {
            response_status: 200,
            ..Default::default()
        }));
        let object = MemoryObject::new("XAPIWrapper");

        let st = Arc::clone(&state);
        object.insert_method("sendStatement", move |args| match style {
            XapiStyle::OptionsCallback => Err(HostError::Thrown(
                "sendStatement is deprecated; use saveStatement".to_string(),
            )),
            _ => xapi_send(style, &st, args),
        });
        if style == XapiStyle::OptionsCallback {
            let st = Arc::clone(&state);
            object.insert_method("saveStatement", move |args| xapi_send(style, &st, args));
        }
        object.insert_method("getStatements", |_| {
            Ok(HostReply::Ready(HostValue::Data(json!({"statements": []}))))
        });

        Self { state, object }
    }

    pub fn object(&self) -> Arc<MemoryObject> {
        Arc::clone(&self.object)
    }

    /// Store `actor` in the library configuration (`lrs.actor`, JSON text).
    pub fn with_configured_actor(self, actor: Value) -> Self {
        let lrs = MemoryObject::new("lrs");
        lrs.insert_data("endpoint", json!("https://lrs.example/xapi/"));
        lrs.insert_data("actor", Value::String(actor.to_string()));
        self.object.insert_object("lrs", lrs as ObjectHandle);
        self
    }

    pub fn respond_with_status(&self, status: u16) {
        lock(&self.state).response_status = status;
    }

    /// Fire the callback twice; the second carries an error.
    pub fn double_callback(&self) {
        lock(&self.state).double_callback = true;
    }

    pub fn statements(&self) -> Vec<Value> {
        lock(&self.state).statements.clone()
    }
}

fn xapi_send(
    style: XapiStyle,
    state: &Mutex<XapiState>,
    args: &[HostArg],
) -> Result<HostReply, HostError> {
    let mut st = lock(state);
    let statement = args
        .first()
        .and_then(HostArg::as_data)
        .cloned()
        .unwrap_or(Value::Null);
    st.statements.push(statement);
    let status = st.response_status;
    let err = if status < 400 {
        Value::Null
    } else {
        json!(format!("LRS responded {status}"))
    };
    let xhr = json!({ "status": status });

    match style {
        XapiStyle::Callback | XapiStyle::OptionsCallback => {
            if let Some(cb) = args.iter().find_map(HostArg::completion) {
                cb.resolve(json!([err, xhr]));
                if st.double_callback {
                    cb.resolve(json!(["duplicate callback", { "status": 500 }]));
                }
            }
            Ok(HostReply::Ready(HostValue::Undefined))
        }
        XapiStyle::Promise => {
            let (tx, rx) = oneshot::channel();
            let settled = if status < 400 {
                json!({ "status": status, "id": "stored" })
            } else {
                json!({ "status": status, "error": err })
            };
            let _ = tx.send(settled);
            Ok(HostReply::Pending(rx))
        }
        XapiStyle::Silent => {
            let (tx, rx) = oneshot::channel();
            st.parked.push(tx);
            Ok(HostReply::Pending(rx))
        }
    }
}

// ── AICC ──────────────────────────────

#[derive(Debug, Default)]
pub struct AiccState {
    pub puts: Vec<String>,
    pub error_code: u32,
}

/// A direct AICC parameter API (`PutParam` / `GetParam`).
#[derive(Clone)]
pub struct AiccMock {
    state: Arc<Mutex<AiccState>>,
    object: Arc<MemoryObject>,
}

impl AiccMock {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(AiccState::default()));
        let object = MemoryObject::new("AICC_API");

        let st = Arc::clone(&state);
        object.insert_method("PutParam", move |args| {
            let mut s = lock(&st);
            s.puts.push(arg_str(args, 0));
            let code = s.error_code;
            ready(format!(
                "error={code}\r\nerror_text={}",
                if code == 0 { "Successful" } else { "Invalid session" }
            ))
        });
        let st = Arc::clone(&state);
        object.insert_method("GetParam", move |_| {
            let s = lock(&st);
            ready(format!(
                "error=0\r\nerror_text=Successful\r\naicc_data={}",
                s.puts.last().cloned().unwrap_or_default()
            ))
        });

        Self { state, object }
    }

    pub fn object(&self) -> Arc<MemoryObject> {
        Arc::clone(&self.object)
    }

    pub fn fail_with(&self, code: u32) {
        lock(&self.state).error_code = code;
    }

    pub fn puts(&self) -> Vec<String> {
        lock(&self.state).puts.clone()
    }
}

impl Default for AiccMock {
    fn default() -> Self {
        Self::new()
    }
}

// ── Storyline player ──────────────────

/// An Articulate Storyline player reachable through `GetPlayer()`.
#[derive(Clone)]
pub struct StorylineMock {
    vars: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl StorylineMock {
    /// Install `GetPlayer` on `scope`.
    pub fn install(scope: &MemoryObject) -> Self {
        let vars = Arc::new(Mutex::new(BTreeMap::new()));
        let player = MemoryObject::new("player");

        let v = Arc::clone(&vars);
        player.insert_method("SetVar", move |args| {
            let name = arg_str(args, 0);
            let value = args
                .get(1)
                .and_then(HostArg::as_data)
                .cloned()
                .unwrap_or(Value::Null);
            lock(&v).insert(name, value);
            Ok(HostReply::Ready(HostValue::Undefined))
        });
        let v = Arc::clone(&vars);
        player.insert_method("GetVar", move |args| {
            let value = lock(&v).get(&arg_str(args, 0)).cloned();
            Ok(HostReply::Ready(match value {
                Some(value) => HostValue::Data(value),
                None => HostValue::Undefined,
            }))
        });

        let handle: ObjectHandle = player;
        scope.insert_method("GetPlayer", move |_| {
            Ok(HostReply::Ready(HostValue::Object(Arc::clone(&handle))))
        });

        Self { vars }
    }

    pub fn var(&self, name: &str) -> Option<Value> {
        lock(&self.vars).get(name).cloned()
    }
}

// ── Custom completion functions ───────

/// Free-standing completion functions installed on a global scope.
#[derive(Clone, Default)]
pub struct CustomFunctionMock {
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
}

impl CustomFunctionMock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a recording function named `name` on `scope`.
    pub fn install(&self, scope: &MemoryObject, name: &str) {
        let calls = Arc::clone(&self.calls);
        let fn_name = name.to_string();
        scope.insert_method(name, move |args| {
            let values = args.iter().filter_map(HostArg::as_data).cloned().collect();
            lock(&calls).push((fn_name.clone(), values));
            Ok(HostReply::Ready(HostValue::Undefined))
        });
    }

    /// Install a function named `name` that always throws.
    pub fn install_throwing(&self, scope: &MemoryObject, name: &str) {
        let fn_name = name.to_string();
        scope.insert_method(name, move |_| {
            Err(HostError::Thrown(format!("{fn_name}: course not ready")))
        });
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        lock(&self.calls).clone()
    }
}

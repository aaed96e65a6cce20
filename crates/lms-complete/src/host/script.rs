//! Live host reached through a JavaScript engine.
//!
//! A [`ScriptContext`] or [`ScriptObject`] is a JS expression evaluated in
//! the page the engine drives (`window.frames[0].parent`, `window.API`).
//! Every access runs inside a try/catch envelope so a cross-origin read
//! surfaces as [`HostError::AccessDenied`] instead of a rejected evaluation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use super::{ContextHandle, ExecutionContext, HostArg, HostId, HostObject, HostReply, HostValue, ObjectHandle};
use crate::error::HostError;

/// Something that can evaluate JavaScript in a page and await the result.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// Evaluate `script`, awaiting it if it yields a promise.
    async fn execute_js(&self, script: &str) -> Result<Value, HostError>;
}

/// Helpers prepended to every evaluated body.
const PRELUDE: &str = r#"
function __tag(v) {
  try {
    if (!Object.prototype.hasOwnProperty.call(v, '__lmsCompleteId')) {
      Object.defineProperty(v, '__lmsCompleteId', {
        value: Math.floor(Math.random() * 9007199254740991),
        enumerable: false
      });
    }
    return v.__lmsCompleteId;
  } catch (e) {
    return null;
  }
}
function __plain(v) {
  try { return v === undefined ? null : JSON.parse(JSON.stringify(v)); } catch (e) { return null; }
}
function __hasFns(v) {
  for (var k in v) { try { if (typeof v[k] === 'function') return true; } catch (e) {} }
  return false;
}
function __keep(v) {
  var refs = window.__lmsCompleteRefs || (window.__lmsCompleteRefs = []);
  for (var i = 0; i < refs.length; i++) {
    if (refs[i] === v) return i;
  }
  refs.push(v);
  return refs.length - 1;
}
function __describe(v, keep) {
  if (v === undefined) return { kind: 'undefined' };
  if (typeof v === 'function') return { kind: 'function' };
  if (v !== null && typeof v === 'object' && !Array.isArray(v)) {
    if (!keep) return { kind: 'object', id: __tag(v) };
    if (__hasFns(v)) return { kind: 'ref', index: __keep(v), id: __tag(v) };
  }
  return { kind: 'data', value: __plain(v) };
}
"#;

const ENVELOPE: &str = r#"(async function () {
__PRELUDE__
  try {
__BODY__
  } catch (e) {
    return { err: (e && e.name) || 'Error', msg: String((e && e.message) || e) };
  }
})()"#;

/// Quote `s` as a JS string literal safe to splice into a script.
pub fn js_literal(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    result.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\u{2028}' => result.push_str("\\u2028"),
            '\u{2029}' => result.push_str("\\u2029"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result.push('\'');
    result
}

/// JSON text of `value` as a JS expression.
fn js_value(value: &Value) -> String {
    match value {
        Value::String(s) => js_literal(s),
        other => other.to_string().replace('<', "\\u003c"),
    }
}

fn fallback_id(expr: &str) -> HostId {
    let mut hasher = DefaultHasher::new();
    expr.hash(&mut hasher);
    HostId(hasher.finish() | (1 << 63))
}

fn id_from(value: Option<&Value>, expr: &str) -> HostId {
    value
        .and_then(Value::as_u64)
        .map(HostId)
        .unwrap_or_else(|| fallback_id(expr))
}

/// Map the envelope's `{ ok }` / `{ err, msg }` shape onto a `Result`.
fn decode_envelope(out: Value) -> Result<Value, HostError> {
    let Value::Object(mut map) = out else {
        return Err(HostError::Unavailable(format!(
            "unexpected script result: {out}"
        )));
    };
    if let Some(value) = map.remove("ok") {
        return Ok(value);
    }
    let name = map
        .get("err")
        .and_then(Value::as_str)
        .unwrap_or("Error")
        .to_string();
    let msg = map
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Err(match name.as_str() {
        "SecurityError" => HostError::AccessDenied(msg),
        "NotCallable" => HostError::NotCallable(msg),
        _ => HostError::Thrown(format!("{name}: {msg}")),
    })
}

async fn run(engine: &dyn ScriptEngine, body: &str) -> Result<Value, HostError> {
    let script = ENVELOPE
        .replace("__PRELUDE__", PRELUDE)
        .replace("__BODY__", body);
    decode_envelope(engine.execute_js(&script).await?)
}

/// A window reachable from the engine's page.
pub struct ScriptContext {
    engine: Arc<dyn ScriptEngine>,
    expr: String,
    id: HostId,
}

impl ScriptContext {
    /// The engine page's own window.
    pub async fn attach(engine: Arc<dyn ScriptEngine>) -> Result<ContextHandle, HostError> {
        let tag = run(engine.as_ref(), "    return { ok: __tag(window) };").await?;
        let expr = "window".to_string();
        let id = id_from(Some(&tag), &expr);
        Ok(Arc::new(Self { engine, expr, id }))
    }

    fn child(&self, expr: String, tag: Option<&Value>) -> ContextHandle {
        let id = id_from(tag, &expr);
        Arc::new(Self {
            engine: Arc::clone(&self.engine),
            expr,
            id,
        })
    }

    fn same(&self) -> ContextHandle {
        Arc::new(Self {
            engine: Arc::clone(&self.engine),
            expr: self.expr.clone(),
            id: self.id,
        })
    }

    async fn eval(&self, body: &str) -> Result<Value, HostError> {
        let body = format!("    var w = {};\n{body}", self.expr);
        run(self.engine.as_ref(), &body).await
    }

    /// Follow a window-proxy link (`parent`, `top`, `opener`).
    async fn link(&self, name: &str) -> Result<Option<ContextHandle>, HostError> {
        let out = self
            .eval(&format!(
                "    var l = w.{name};\n\
                 \x20   if (!l) return {{ ok: {{ none: true }} }};\n\
                 \x20   if (l === w) return {{ ok: {{ same: true }} }};\n\
                 \x20   return {{ ok: {{ id: __tag(l) }} }};"
            ))
            .await?;
        if out.get("none").is_some() {
            return Ok(None);
        }
        if out.get("same").is_some() {
            return Ok(Some(self.same()));
        }
        Ok(Some(self.child(format!("{}.{name}", self.expr), out.get("id"))))
    }
}

#[async_trait]
impl ExecutionContext for ScriptContext {
    fn id(&self) -> HostId {
        self.id
    }

    async fn probe(&self) -> Result<(), HostError> {
        self.eval("    void w.document.readyState;\n    return { ok: true };")
            .await
            .map(|_| ())
    }

    async fn parent(&self) -> Result<Option<ContextHandle>, HostError> {
        self.link("parent").await
    }

    async fn top(&self) -> Result<Option<ContextHandle>, HostError> {
        self.link("top").await
    }

    async fn opener(&self) -> Result<Option<ContextHandle>, HostError> {
        self.link("opener").await
    }

    async fn frames(&self) -> Result<Vec<ContextHandle>, HostError> {
        let out = self
            .eval(
                "    var ids = [];\n\
                 \x20   for (var i = 0; i < w.frames.length; i++) ids.push(__tag(w.frames[i]));\n\
                 \x20   return { ok: ids };",
            )
            .await?;
        let ids = out.as_array().cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .enumerate()
            .map(|(i, tag)| self.child(format!("{}.frames[{i}]", self.expr), Some(tag)))
            .collect())
    }

    async fn context_property(&self, name: &str) -> Result<Vec<ContextHandle>, HostError> {
        let prop = js_literal(name);
        let out = self
            .eval(&format!(
                "    var v = w[{prop}];\n\
                 \x20   function isWin(x) {{ try {{ return !!x && x.window === x; }} catch (e) {{ return false; }} }}\n\
                 \x20   if (isWin(v)) return {{ ok: {{ single: __tag(v) }} }};\n\
                 \x20   var ids = [];\n\
                 \x20   if (v && typeof v.length === 'number') {{\n\
                 \x20     for (var i = 0; i < v.length; i++) ids.push(isWin(v[i]) ? {{ index: i, id: __tag(v[i]) }} : null);\n\
                 \x20   }}\n\
                 \x20   return {{ ok: {{ many: ids }} }};"
            ))
            .await?;
        let base = format!("{}[{prop}]", self.expr);
        if let Some(tag) = out.get("single") {
            return Ok(vec![self.child(base, Some(tag))]);
        }
        let entries = out
            .get("many")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(entries
            .iter()
            .filter_map(|e| {
                let index = e.get("index")?.as_u64()?;
                Some(self.child(format!("{base}[{index}]"), e.get("id")))
            })
            .collect())
    }

    async fn global(&self) -> Result<ObjectHandle, HostError> {
        self.probe().await?;
        Ok(Arc::new(ScriptObject {
            engine: Arc::clone(&self.engine),
            expr: self.expr.clone(),
            id: self.id,
        }))
    }

    async fn url(&self) -> Result<String, HostError> {
        let out = self.eval("    return { ok: String(w.location.href) };").await?;
        Ok(out.as_str().unwrap_or_default().to_string())
    }
}

/// An object addressed by a JS expression in the engine's page.
pub struct ScriptObject {
    engine: Arc<dyn ScriptEngine>,
    expr: String,
    id: HostId,
}

impl ScriptObject {
    async fn eval(&self, body: &str) -> Result<Value, HostError> {
        let body = format!("    var o = {};\n{body}", self.expr);
        run(self.engine.as_ref(), &body).await
    }

    fn value_from(&self, desc: &Value, member_expr: String) -> HostValue {
        match desc.get("kind").and_then(Value::as_str) {
            Some("function") => HostValue::Function,
            Some("object") => HostValue::Object(Arc::new(ScriptObject {
                engine: Arc::clone(&self.engine),
                id: id_from(desc.get("id"), &member_expr),
                expr: member_expr,
            })),
            Some("ref") => {
                let index = desc.get("index").and_then(Value::as_u64).unwrap_or(0);
                let expr = format!("window.__lmsCompleteRefs[{index}]");
                HostValue::Object(Arc::new(ScriptObject {
                    engine: Arc::clone(&self.engine),
                    id: id_from(desc.get("id"), &expr),
                    expr,
                }))
            }
            Some("data") => HostValue::Data(desc.get("value").cloned().unwrap_or(Value::Null)),
            _ => HostValue::Undefined,
        }
    }
}

#[async_trait]
impl HostObject for ScriptObject {
    fn id(&self) -> HostId {
        self.id
    }

    async fn member_names(&self) -> Result<Vec<String>, HostError> {
        let out = self
            .eval(
                "    var seen = {}, names = [];\n\
                 \x20   for (var p = o; p && p !== Object.prototype; p = Object.getPrototypeOf(p)) {\n\
                 \x20     Object.getOwnPropertyNames(p).forEach(function (k) {\n\
                 \x20       if (!seen[k]) { seen[k] = true; names.push(k); }\n\
                 \x20     });\n\
                 \x20   }\n\
                 \x20   return { ok: names };",
            )
            .await?;
        Ok(out
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }

    async fn is_callable(&self, name: &str) -> bool {
        let body = format!("    return {{ ok: typeof o[{}] === 'function' }};", js_literal(name));
        matches!(self.eval(&body).await, Ok(Value::Bool(true)))
    }

    async fn get(&self, name: &str) -> Result<HostValue, HostError> {
        let prop = js_literal(name);
        let desc = self
            .eval(&format!("    return {{ ok: __describe(o[{prop}], false) }};"))
            .await?;
        Ok(self.value_from(&desc, format!("{}[{prop}]", self.expr)))
    }

    async fn set(&self, name: &str, value: Value) -> Result<(), HostError> {
        let body = format!(
            "    o[{}] = {};\n    return {{ ok: true }};",
            js_literal(name),
            js_value(&value)
        );
        self.eval(&body).await.map(|_| ())
    }

    async fn invoke(&self, method: &str, args: Vec<HostArg>) -> Result<HostReply, HostError> {
        let mut completion = None;
        let rendered: Vec<String> = args
            .iter()
            .map(|arg| match arg {
                HostArg::Data(v) => js_value(v),
                HostArg::Callback(c) => {
                    completion.get_or_insert_with(|| c.clone());
                    "__cb".to_string()
                }
                HostArg::OptionsWithCallback(map, c) => {
                    completion.get_or_insert_with(|| c.clone());
                    format!(
                        "Object.assign({}, {{ callback: __cb }})",
                        js_value(&Value::Object(map.clone()))
                    )
                }
            })
            .collect();
        let name = js_literal(method);
        let body = format!(
            "    var f = o[{name}];\n\
             \x20   if (typeof f !== 'function') return {{ err: 'NotCallable', msg: {name} }};\n\
             \x20   var out = await new Promise(function (resolve, reject) {{\n\
             \x20     var __cb = function () {{ resolve({{ callback: __plain(Array.prototype.slice.call(arguments)) }}); }};\n\
             \x20     var r;\n\
             \x20     try {{ r = f.apply(o, [{args}]); }} catch (e) {{ reject(e); return; }}\n\
             \x20     if (r && typeof r.then === 'function') {{\n\
             \x20       r.then(function (v) {{ resolve({{ settled: __plain(v) }}); }},\n\
             \x20              function (e) {{ resolve({{ settled: {{ error: String((e && e.message) || e) }} }}); }});\n\
             \x20     }} else if (!{has_cb} || r !== undefined) {{\n\
             \x20       resolve({{ ready: __describe(r, true) }});\n\
             \x20     }}\n\
             \x20   }});\n\
             \x20   return {{ ok: out }};",
            args = rendered.join(", "),
            has_cb = completion.is_some(),
        );
        let out = self.eval(&body).await?;

        if let Some(args) = out.get("callback") {
            if let Some(c) = &completion {
                c.resolve(args.clone());
            }
            return Ok(HostReply::Ready(HostValue::Undefined));
        }
        if let Some(settled) = out.get("settled") {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(settled.clone());
            return Ok(HostReply::Pending(rx));
        }
        let desc = out.get("ready").cloned().unwrap_or(Value::Null);
        Ok(HostReply::Ready(self.value_from(
            &desc,
            format!("{}[{name}]()", self.expr),
        )))
    }

    async fn to_json(&self) -> Result<Value, HostError> {
        self.eval("    return { ok: __plain(o) };").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Completion;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned envelopes and records every script it was given.
    struct ReplayEngine {
        replies: Mutex<Vec<Value>>,
        scripts: Mutex<Vec<String>>,
    }

    impl ReplayEngine {
        fn new(replies: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                scripts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ScriptEngine for ReplayEngine {
        async fn execute_js(&self, script: &str) -> Result<Value, HostError> {
            self.scripts.lock().unwrap().push(script.to_string());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(HostError::Unavailable("no reply queued".into()));
            }
            Ok(replies.remove(0))
        }
    }

    #[test]
    fn test_js_literal_escapes() {
        assert_eq!(js_literal("a'b"), "'a\\'b'");
        assert_eq!(js_literal("</script>"), "'\\x3c/script\\x3e'");
        assert_eq!(js_literal("x\ny"), "'x\\ny'");
    }

    #[test]
    fn test_kept_refs_are_reused_not_appended() {
        let keep = PRELUDE
            .split("function __keep(v) {")
            .nth(1)
            .and_then(|rest| rest.split("\n}\n").next())
            .unwrap();
        let lookup = keep.find("if (refs[i] === v) return i;").unwrap();
        let push = keep.find("refs.push(v);").unwrap();
        assert!(lookup < push, "existing entry must be checked before pushing");
        assert!(PRELUDE.contains("index: __keep(v)"));
        assert_eq!(PRELUDE.matches("refs.push(").count(), 1);
    }

    #[test]
    fn test_decode_envelope() {
        assert_eq!(decode_envelope(json!({"ok": 5})).unwrap(), json!(5));
        let err = decode_envelope(json!({"err": "SecurityError", "msg": "Blocked"})).unwrap_err();
        assert!(err.is_access_denied());
        let err = decode_envelope(json!({"err": "TypeError", "msg": "x is null"})).unwrap_err();
        assert!(matches!(err, HostError::Thrown(m) if m.contains("TypeError")));
        assert!(decode_envelope(json!("weird")).is_err());
    }

    #[tokio::test]
    async fn test_attach_and_parent_of_top() {
        let engine = ReplayEngine::new(vec![json!({"ok": 42}), json!({"ok": {"same": true}})]);
        let ctx = ScriptContext::attach(engine.clone()).await.unwrap();
        assert_eq!(ctx.id(), HostId(42));
        let parent = ctx.parent().await.unwrap().unwrap();
        assert_eq!(parent.id(), HostId(42));
    }

    #[tokio::test]
    async fn test_untaggable_frame_gets_path_id() {
        let engine = ReplayEngine::new(vec![json!({"ok": 1}), json!({"ok": [null, 7]})]);
        let ctx = ScriptContext::attach(engine).await.unwrap();
        let frames = ctx.frames().await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id(), fallback_id("window.frames[0]"));
        assert_eq!(frames[1].id(), HostId(7));
    }

    #[tokio::test]
    async fn test_invoke_with_callback_resolves_completion() {
        let engine = ReplayEngine::new(vec![
            json!({"ok": 1}),
            json!({"ok": true}),
            json!({"ok": {"callback": [null, {"status": 200}]}}),
        ]);
        let ctx = ScriptContext::attach(engine.clone()).await.unwrap();
        let global = ctx.global().await.unwrap();
        let (completion, rx) = Completion::channel();
        let reply = global
            .invoke(
                "sendStatement",
                vec![HostArg::Data(json!({"verb": "x"})), HostArg::Callback(completion)],
            )
            .await
            .unwrap();
        assert!(matches!(reply, HostReply::Ready(HostValue::Undefined)));
        assert_eq!(rx.await.unwrap(), json!([null, {"status": 200}]));
        let scripts = engine.scripts.lock().unwrap();
        assert!(scripts.last().unwrap().contains("f.apply(o, [{\"verb\":\"x\"}, __cb])"));
    }

    #[tokio::test]
    async fn test_invoke_returning_ref_object() {
        let engine = ReplayEngine::new(vec![
            json!({"ok": 1}),
            json!({"ok": true}),
            json!({"ok": {"ready": {"kind": "ref", "index": 3, "id": 99}}}),
        ]);
        let ctx = ScriptContext::attach(engine).await.unwrap();
        let global = ctx.global().await.unwrap();
        match global.invoke("GetPlayer", vec![]).await.unwrap() {
            HostReply::Ready(HostValue::Object(player)) => assert_eq!(player.id(), HostId(99)),
            other => panic!("unexpected reply {other:?}"),
        }
    }
}

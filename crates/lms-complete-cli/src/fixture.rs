//! JSON page-graph fixtures.
//!
//! A fixture describes a course page offline: its URL, the globals on its
//! scope, child frames, popups, and window-valued properties. Loading one
//! builds an in-memory context tree with mock LMS APIs installed, so the
//! whole pipeline can run without a browser.
//!
//! ```json
//! {
//!   "url": "https://lms.example/player",
//!   "globals": { "API": { "kind": "scorm12" } },
//!   "frames": [
//!     { "url": "https://lms.example/sco/index.html", "origin": true }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use lms_complete::host::memory::{MemoryContext, MemoryObject};
use lms_complete::host::mocks::{
    AiccMock, CustomFunctionMock, ScormMock, StorylineMock, XapiMock, XapiStyle,
};
use lms_complete::host::{ContextHandle, ObjectHandle};

#[derive(thiserror::Error, Debug)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid fixture: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One browsing context in the fixture.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSpec {
    pub url: String,
    /// Cross-origin contexts refuse property access.
    #[serde(default = "default_true")]
    pub accessible: bool,
    /// Run requests from this context instead of the root.
    #[serde(default)]
    pub origin: bool,
    #[serde(default)]
    pub globals: BTreeMap<String, GlobalSpec>,
    #[serde(default)]
    pub frames: Vec<ContextSpec>,
    #[serde(default)]
    pub popups: Vec<ContextSpec>,
    /// Window-valued globals other than `parent`/`opener`/`top`.
    #[serde(default)]
    pub properties: BTreeMap<String, ContextSpec>,
}

fn default_true() -> bool {
    true
}

/// A value placed on a context scope or inside a plain object.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GlobalSpec {
    #[serde(rename_all = "camelCase")]
    Scorm12 {
        #[serde(default)]
        preset: BTreeMap<String, String>,
        #[serde(default)]
        reject: Vec<String>,
        #[serde(default)]
        silent: bool,
    },
    #[serde(rename_all = "camelCase")]
    Scorm2004 {
        #[serde(default)]
        preset: BTreeMap<String, String>,
        #[serde(default)]
        reject: Vec<String>,
        #[serde(default)]
        silent: bool,
    },
    #[serde(rename_all = "camelCase")]
    Xapi {
        #[serde(default)]
        style: StyleSpec,
        actor: Option<Value>,
        response_status: Option<u16>,
    },
    #[serde(rename_all = "camelCase")]
    Aicc { fail_with: Option<u32> },
    /// Installs `GetPlayer` on the enclosing scope whatever the key is.
    Storyline,
    Function {
        #[serde(default)]
        throws: bool,
    },
    Object {
        #[serde(default)]
        members: BTreeMap<String, GlobalSpec>,
    },
    Data { value: Value },
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StyleSpec {
    #[default]
    Callback,
    OptionsCallback,
    Promise,
    Silent,
}

impl From<StyleSpec> for XapiStyle {
    fn from(style: StyleSpec) -> Self {
        match style {
            StyleSpec::Callback => XapiStyle::Callback,
            StyleSpec::OptionsCallback => XapiStyle::OptionsCallback,
            StyleSpec::Promise => XapiStyle::Promise,
            StyleSpec::Silent => XapiStyle::Silent,
        }
    }
}

/// A loaded fixture. Keeps every context alive for as long as it exists,
/// since contexts only hold weak links to their parents.
pub struct Fixture {
    contexts: Vec<Arc<MemoryContext>>,
    origin: Option<usize>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let text = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, FixtureError> {
        let spec: ContextSpec = serde_json::from_str(text)?;
        Ok(Self::build(&spec))
    }

    pub fn build(spec: &ContextSpec) -> Self {
        let root = MemoryContext::root(spec.url.clone());
        let mut fixture = Self {
            contexts: Vec::new(),
            origin: None,
        };
        fixture.populate(root, spec);
        tracing::debug!(
            contexts = fixture.contexts.len(),
            origin = fixture.origin.unwrap_or(0),
            "fixture loaded"
        );
        fixture
    }

    fn populate(&mut self, ctx: Arc<MemoryContext>, spec: &ContextSpec) {
        if spec.origin && self.origin.is_none() {
            self.origin = Some(self.contexts.len());
        }
        self.contexts.push(Arc::clone(&ctx));

        let scope = ctx.scope();
        for (name, global) in &spec.globals {
            install(&scope, name, global);
        }
        for frame in &spec.frames {
            let child = ctx.add_frame(frame.url.clone());
            self.populate(child, frame);
        }
        for popup in &spec.popups {
            let child = ctx.open_popup(popup.url.clone());
            self.populate(child, popup);
        }
        for (name, property) in &spec.properties {
            let other = MemoryContext::root(property.url.clone());
            ctx.add_context_property(name.clone(), &other);
            self.populate(other, property);
        }
        // Accessibility last, so population itself is never refused.
        ctx.set_accessible(spec.accessible);
    }

    /// The context requests start from.
    pub fn origin(&self) -> ContextHandle {
        self.contexts[self.origin.unwrap_or(0)].handle()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}

fn install(scope: &MemoryObject, name: &str, global: &GlobalSpec) {
    match global {
        GlobalSpec::Scorm12 {
            preset,
            reject,
            silent,
        } => {
            let mock = ScormMock::scorm12();
            configure_scorm(&mock, preset, reject, *silent);
            scope.insert_object(name, mock.object() as ObjectHandle);
        }
        GlobalSpec::Scorm2004 {
            preset,
            reject,
            silent,
        } => {
            let mock = ScormMock::scorm2004();
            configure_scorm(&mock, preset, reject, *silent);
            scope.insert_object(name, mock.object() as ObjectHandle);
        }
        GlobalSpec::Xapi {
            style,
            actor,
            response_status,
        } => {
            let mut mock = XapiMock::new((*style).into());
            if let Some(actor) = actor {
                mock = mock.with_configured_actor(actor.clone());
            }
            if let Some(status) = response_status {
                mock.respond_with_status(*status);
            }
            scope.insert_object(name, mock.object() as ObjectHandle);
        }
        GlobalSpec::Aicc { fail_with } => {
            let mock = AiccMock::new();
            if let Some(code) = fail_with {
                mock.fail_with(*code);
            }
            scope.insert_object(name, mock.object() as ObjectHandle);
        }
        GlobalSpec::Storyline => {
            StorylineMock::install(scope);
        }
        GlobalSpec::Function { throws } => {
            let mock = CustomFunctionMock::new();
            if *throws {
                mock.install_throwing(scope, name);
            } else {
                mock.install(scope, name);
            }
        }
        GlobalSpec::Object { members } => {
            let object = MemoryObject::new(name);
            for (member, spec) in members {
                install(&object, member, spec);
            }
            scope.insert_object(name, object as ObjectHandle);
        }
        GlobalSpec::Data { value } => scope.insert_data(name, value.clone()),
    }
}

fn configure_scorm(
    mock: &ScormMock,
    preset: &BTreeMap<String, String>,
    reject: &[String],
    silent: bool,
) {
    for (element, value) in preset {
        mock.preset(element, value);
    }
    for element in reject {
        mock.reject_element(element);
    }
    if silent {
        mock.ignore_sets_silently();
    }
}

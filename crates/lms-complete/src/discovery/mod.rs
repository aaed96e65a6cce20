//! API discovery: walk the context graph, identify protocol objects, and
//! collect them into an [`ApiRegistry`].

pub mod graph;
pub mod registry;
pub mod signature;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

pub use graph::{Access, ContextGraphSearch, ContextRef};
pub use registry::ApiRegistry;
pub use signature::{identify, search_standalone_functions, SignatureMatch};

use crate::config::CompletionConfig;
use crate::decision::{DecisionCategory, DecisionLog};
use crate::drivers::call::call_host;
use crate::host::{resolve_object_path, ContextHandle, HostId, ObjectHandle};
use crate::types::ProtocolKind;

/// Conventional global property paths where course runtimes live.
pub const CANDIDATE_PATHS: [&str; 8] = [
    "API",
    "API_1484_11",
    "ADL.XAPIWrapper",
    "TinCan",
    "tincan",
    "xAPI",
    "AICC_API",
    "CourseAPI",
];

/// A protocol object found during discovery.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredApi {
    #[serde(rename = "type")]
    pub kind: ProtocolKind,
    /// Context path plus member path; unique within one pass.
    pub location: String,
    /// Non-owning handle into the host graph.
    #[serde(skip)]
    pub object: ObjectHandle,
    pub methods: Vec<String>,
    pub functional: bool,
    pub standalone: bool,
    /// URL of the owning context followed by its ancestors' URLs.
    pub launch_urls: Vec<String>,
}

impl fmt::Debug for DiscoveredApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredApi")
            .field("kind", &self.kind)
            .field("location", &self.location)
            .field("methods", &self.methods)
            .field("functional", &self.functional)
            .field("standalone", &self.standalone)
            .finish()
    }
}

/// Value of the first query parameter named `name`, case-insensitively.
pub fn url_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Whether `url` carries an AICC launch (`aicc_url` + `aicc_sid`).
pub fn has_aicc_launch(url: &str) -> bool {
    url_param(url, "aicc_url").is_some() && url_param(url, "aicc_sid").is_some()
}

/// Runs a context-graph search and signature matching.
#[derive(Debug, Clone)]
pub struct ApiDiscovery {
    search: ContextGraphSearch,
    call_timeout: Duration,
}

impl ApiDiscovery {
    pub fn new(config: &CompletionConfig) -> Self {
        Self {
            search: ContextGraphSearch::new(config.max_depth, config.max_ancestor_hops),
            call_timeout: config.call_timeout(),
        }
    }

    /// Every context reachable from `origin`, searched afresh.
    pub async fn contexts(&self, origin: &ContextHandle) -> Vec<ContextRef> {
        self.search.search(origin).await
    }

    /// Discover every API reachable from `origin`. Always walks the graph
    /// afresh; nothing is cached between calls.
    pub async fn discover(&self, origin: &ContextHandle, log: &mut DecisionLog) -> ApiRegistry {
        let contexts = self.search.search(origin).await;
        let opaque = contexts.iter().filter(|c| !c.is_accessible()).count();
        log.record_with(
            DecisionCategory::Discovery,
            "context-graph",
            format!("{} contexts", contexts.len()),
            format!("{opaque} opaque"),
            json!(contexts.iter().map(|c| &c.name).collect::<Vec<_>>()),
        );

        let mut ancestor_urls = Vec::new();
        for ctx in contexts.iter().filter(|c| c.ancestor && c.is_accessible()) {
            if let Ok(url) = ctx.handle.url().await {
                if !ancestor_urls.contains(&url) {
                    ancestor_urls.push(url);
                }
            }
        }

        let mut registry = ApiRegistry::new();
        let mut seen: HashSet<HostId> = HashSet::new();

        for ctx in &contexts {
            if !ctx.is_accessible() {
                log.record(
                    DecisionCategory::Discovery,
                    &ctx.name,
                    "skip",
                    "context is opaque",
                );
                continue;
            }
            self.scan_context(ctx, &ancestor_urls, &mut registry, &mut seen, log)
                .await;
        }

        self.probe_all(&mut registry, log).await;

        tracing::info!("discovery found {} APIs", registry.len());
        log.record_with(
            DecisionCategory::Discovery,
            "summary",
            format!("{} APIs", registry.len()),
            "discovery complete",
            json!(registry
                .apis()
                .iter()
                .map(|a| json!({"type": a.kind, "location": a.location}))
                .collect::<Vec<_>>()),
        );
        registry
    }

    async fn scan_context(
        &self,
        ctx: &ContextRef,
        ancestor_urls: &[String],
        registry: &mut ApiRegistry,
        seen: &mut HashSet<HostId>,
        log: &mut DecisionLog,
    ) {
        let global = match ctx.handle.global().await {
            Ok(g) => g,
            Err(e) => {
                log.record(DecisionCategory::Discovery, &ctx.name, "skip", e.to_string());
                return;
            }
        };
        let url = ctx.handle.url().await.unwrap_or_default();
        let mut launch_urls = vec![url.clone()];
        launch_urls.extend(ancestor_urls.iter().filter(|u| **u != url).cloned());

        let mut add = |api: DiscoveredApi, log: &mut DecisionLog| {
            let kind = api.kind;
            let location = api.location.clone();
            if registry.insert(api) {
                tracing::debug!("found {kind} at {location}");
                log.record(DecisionCategory::Discovery, &location, "found", kind.as_str());
            }
        };

        for path in CANDIDATE_PATHS {
            let Some(object) = resolve_object_path(&global, path).await else {
                continue;
            };
            let Some(found) = identify(object.as_ref()).await else {
                tracing::debug!("{}.{path} matches no protocol signature", ctx.name);
                continue;
            };
            if !seen.insert(object.id()) {
                log.record(
                    DecisionCategory::Discovery,
                    format!("{}.{path}", ctx.name),
                    "skip",
                    "object already discovered under another path",
                );
                continue;
            }
            add(
                DiscoveredApi {
                    kind: found.kind,
                    location: format!("{}.{path}", ctx.name),
                    object,
                    methods: found.methods,
                    functional: false,
                    standalone: false,
                    launch_urls: launch_urls.clone(),
                },
                log,
            );
        }

        for name in search_standalone_functions(global.as_ref()).await {
            add(
                DiscoveredApi {
                    kind: ProtocolKind::Custom,
                    location: format!("{}.{name}", ctx.name),
                    object: Arc::clone(&global),
                    methods: vec![name],
                    functional: false,
                    standalone: true,
                    launch_urls: launch_urls.clone(),
                },
                log,
            );
        }

        if has_aicc_launch(&url) {
            add(
                DiscoveredApi {
                    kind: ProtocolKind::Aicc,
                    location: format!("{}.location", ctx.name),
                    object: Arc::clone(&global),
                    methods: Vec::new(),
                    functional: false,
                    standalone: false,
                    launch_urls,
                },
                log,
            );
        }
    }

    async fn probe_all(&self, registry: &mut ApiRegistry, log: &mut DecisionLog) {
        let targets: Vec<DiscoveredApi> = registry
            .apis()
            .iter()
            .filter(|a| matches!(a.kind, ProtocolKind::Scorm12 | ProtocolKind::Scorm2004))
            .cloned()
            .collect();
        for api in targets {
            let functional = probe_functional(&api, self.call_timeout).await;
            registry.mark_functional(&api.location, functional);
            log.record(
                DecisionCategory::Discovery,
                &api.location,
                if functional { "functional" } else { "unresponsive" },
                "read-only probe call",
            );
        }
    }
}

/// Issue a read-only call to confirm the API answers. Protocols without a
/// side-effect-free read are not probed and report `false`.
pub async fn probe_functional(api: &DiscoveredApi, limit: Duration) -> bool {
    let (method, element) = match api.kind {
        ProtocolKind::Scorm12 => ("LMSGetValue", "cmi.core.lesson_status"),
        ProtocolKind::Scorm2004 => ("GetValue", "cmi.completion_status"),
        _ => return false,
    };
    match call_host(&api.object, method, vec![element.into()], limit).await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("probe of {} failed: {e}", api.location);
            false
        }
    }
}

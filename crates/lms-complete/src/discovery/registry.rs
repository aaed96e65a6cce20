//! Session-owned registry of discovered APIs.

use super::DiscoveredApi;
use crate::types::ProtocolKind;

/// APIs found by one discovery pass, kept in protocol-priority order.
///
/// Locations are unique. The registry is owned by a single orchestrator
/// session and replaced wholesale on every re-discovery.
#[derive(Debug, Clone, Default)]
pub struct ApiRegistry {
    apis: Vec<DiscoveredApi>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `api` unless its location is already registered.
    /// Insertion keeps the list stably sorted by protocol priority.
    pub fn insert(&mut self, api: DiscoveredApi) -> bool {
        if self.apis.iter().any(|a| a.location == api.location) {
            return false;
        }
        let rank = api.kind.priority();
        let at = self
            .apis
            .iter()
            .position(|a| a.kind.priority() > rank)
            .unwrap_or(self.apis.len());
        self.apis.insert(at, api);
        true
    }

    pub fn apis(&self) -> &[DiscoveredApi] {
        &self.apis
    }

    pub fn get(&self, index: usize) -> Option<&DiscoveredApi> {
        self.apis.get(index)
    }

    pub fn by_kind(&self, kind: ProtocolKind) -> Vec<&DiscoveredApi> {
        self.apis.iter().filter(|a| a.kind == kind).collect()
    }

    /// The API to drive: the requested index, else the highest-priority
    /// functional API, else the highest-priority API.
    pub fn primary(&self, api_index: Option<usize>) -> Option<&DiscoveredApi> {
        if let Some(i) = api_index {
            return self.apis.get(i);
        }
        self.apis
            .iter()
            .find(|a| a.functional)
            .or_else(|| self.apis.first())
    }

    pub fn mark_functional(&mut self, location: &str, functional: bool) {
        if let Some(api) = self.apis.iter_mut().find(|a| a.location == location) {
            api.functional = functional;
        }
    }

    /// Drop every entry; the next request re-discovers.
    pub fn invalidate(&mut self) {
        self.apis.clear();
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

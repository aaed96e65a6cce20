//! Breadth-first enumeration of reachable execution contexts.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::host::{ContextHandle, HostId};

/// Properties that conventionally hold handles to other contexts.
pub const CONTEXT_PROPERTIES: [&str; 7] = [
    "contentWindow",
    "courseWindow",
    "scormWindow",
    "lmsWindow",
    "childWindows",
    "popups",
    "windows",
];

/// How much of a context could be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Full,
    /// Present, but a boundary refused reading its contents.
    Opaque,
}

/// A context reached during one search.
#[derive(Clone)]
pub struct ContextRef {
    /// Path label, e.g. `parent[1].frames[2]`.
    pub name: String,
    pub access: Access,
    /// Links followed from the search origin.
    pub depth: usize,
    /// Whether the context sits on the origin's ancestor/opener chain.
    pub ancestor: bool,
    pub handle: ContextHandle,
}

impl ContextRef {
    pub fn is_accessible(&self) -> bool {
        self.access == Access::Full
    }
}

impl fmt::Debug for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRef")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("depth", &self.depth)
            .field("id", &self.handle.id())
            .finish()
    }
}

/// Bounded, cycle-guarded walk over the context graph.
#[derive(Debug, Clone, Copy)]
pub struct ContextGraphSearch {
    pub max_depth: usize,
    pub max_ancestor_hops: usize,
}

struct Pending {
    name: String,
    handle: ContextHandle,
    depth: usize,
    ancestor: bool,
}

impl ContextGraphSearch {
    pub fn new(max_depth: usize, max_ancestor_hops: usize) -> Self {
        Self {
            max_depth,
            max_ancestor_hops,
        }
    }

    /// Every context reachable from `origin`, deduplicated by identity.
    ///
    /// Ancestors, `top`, the opener, and the opener's parent are seeded
    /// first; nested frames and context-holding properties of every readable
    /// context are then visited breadth-first. An opaque context is still
    /// reported but nothing below it is explored.
    pub async fn search(&self, origin: &ContextHandle) -> Vec<ContextRef> {
        let mut queue: VecDeque<Pending> = VecDeque::new();
        let seed = |queue: &mut VecDeque<Pending>, name: String, handle: ContextHandle| {
            queue.push_back(Pending {
                name,
                handle,
                depth: 0,
                ancestor: true,
            });
        };

        seed(&mut queue, "self".to_string(), Arc::clone(origin));

        let mut current = Arc::clone(origin);
        for hop in 1..=self.max_ancestor_hops {
            match current.parent().await {
                Ok(Some(parent)) if parent.id() != current.id() => {
                    seed(&mut queue, format!("parent[{hop}]"), Arc::clone(&parent));
                    current = parent;
                }
                Ok(_) => break,
                Err(e) => {
                    tracing::debug!("ancestor walk stopped at hop {hop}: {e}");
                    break;
                }
            }
        }

        if let Ok(Some(top)) = origin.top().await {
            seed(&mut queue, "top".to_string(), top);
        }
        if let Ok(Some(opener)) = origin.opener().await {
            let opener_parent = match opener.parent().await {
                Ok(Some(p)) if p.id() != opener.id() => Some(p),
                _ => None,
            };
            seed(&mut queue, "opener".to_string(), opener);
            if let Some(p) = opener_parent {
                seed(&mut queue, "opener.parent".to_string(), p);
            }
        }

        let mut visited: HashSet<HostId> = HashSet::new();
        let mut out = Vec::new();

        while let Some(next) = queue.pop_front() {
            let id = next.handle.id();
            if !visited.insert(id) {
                continue;
            }
            let access = match next.handle.probe().await {
                Ok(()) => Access::Full,
                Err(e) => {
                    tracing::debug!("context {} is opaque: {e}", next.name);
                    Access::Opaque
                }
            };

            if access == Access::Full && next.depth < self.max_depth {
                self.expand(&next, &mut queue).await;
            }

            out.push(ContextRef {
                name: next.name,
                access,
                depth: next.depth,
                ancestor: next.ancestor,
                handle: next.handle,
            });
        }

        out
    }

    async fn expand(&self, ctx: &Pending, queue: &mut VecDeque<Pending>) {
        match ctx.handle.frames().await {
            Ok(frames) => {
                for (i, frame) in frames.into_iter().enumerate() {
                    queue.push_back(Pending {
                        name: format!("{}.frames[{i}]", ctx.name),
                        handle: frame,
                        depth: ctx.depth + 1,
                        ancestor: false,
                    });
                }
            }
            Err(e) => tracing::debug!("frames of {} unreadable: {e}", ctx.name),
        }

        for prop in CONTEXT_PROPERTIES {
            match ctx.handle.context_property(prop).await {
                Ok(found) => {
                    for (i, handle) in found.into_iter().enumerate() {
                        queue.push_back(Pending {
                            name: format!("{}.{prop}[{i}]", ctx.name),
                            handle,
                            depth: ctx.depth + 1,
                            ancestor: false,
                        });
                    }
                }
                Err(e) => tracing::debug!("{}.{prop} unreadable: {e}", ctx.name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryContext;

    fn names(found: &[ContextRef]) -> Vec<&str> {
        found.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_walks_ancestors_and_frames() {
        let top = MemoryContext::root("https://lms.example/");
        let player = top.add_frame("https://lms.example/player");
        let content = player.add_frame("https://lms.example/content");
        let _sibling = top.add_frame("https://lms.example/nav");

        let found = ContextGraphSearch::new(10, 10).search(&content.handle()).await;
        assert_eq!(
            names(&found),
            vec!["self", "parent[1]", "parent[2]", "parent[2].frames[1]"]
        );
        assert!(found.iter().all(ContextRef::is_accessible));
    }

    #[tokio::test]
    async fn test_opaque_context_not_descended() {
        let top = MemoryContext::root("https://lms.example/");
        let foreign = top.add_frame("https://cdn.example/");
        foreign.add_frame("https://cdn.example/inner");
        foreign.set_accessible(false);

        let found = ContextGraphSearch::new(10, 10).search(&top.handle()).await;
        assert_eq!(names(&found), vec!["self", "self.frames[0]"]);
        assert_eq!(found[1].access, Access::Opaque);
    }

    #[tokio::test]
    async fn test_ancestors_climbed_through_opaque_parent() {
        let top = MemoryContext::root("https://lms.example/");
        let middle = top.add_frame("https://cdn.example/");
        let course = middle.add_frame("https://lms.example/course");
        middle.set_accessible(false);

        let found = ContextGraphSearch::new(10, 10).search(&course.handle()).await;
        let top_ref = found.iter().find(|c| c.name == "parent[2]").unwrap();
        assert!(top_ref.is_accessible());
    }

    #[tokio::test]
    async fn test_depth_bound_and_dedup() {
        let top = MemoryContext::root("https://lms.example/");
        let mut ctx = top.clone();
        for i in 0..5 {
            ctx = ctx.add_frame(format!("https://lms.example/{i}"));
        }
        // The same frame reachable twice is reported once.
        let first = top.add_frame("https://lms.example/dup");
        top.add_context_property("contentWindow", &first);

        let found = ContextGraphSearch::new(2, 10).search(&top.handle()).await;
        assert!(found.iter().all(|c| c.depth <= 2));
        let labels = names(&found);
        assert!(labels.contains(&"self.frames[1]"));
        assert!(!labels.contains(&"self.contentWindow[0]"));
        let ids: HashSet<HostId> = found.iter().map(|c| c.handle.id()).collect();
        assert_eq!(ids.len(), found.len());
    }

    #[tokio::test]
    async fn test_popup_reaches_opener() {
        let lms = MemoryContext::root("https://lms.example/");
        let launcher = lms.add_frame("https://lms.example/launch");
        let popup = launcher.open_popup("https://lms.example/course");

        let found = ContextGraphSearch::new(10, 10).search(&popup.handle()).await;
        let labels = names(&found);
        assert!(labels.contains(&"opener"));
        assert!(labels.contains(&"opener.parent"));
    }
}

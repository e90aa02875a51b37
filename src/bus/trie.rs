//! Subscription trie.
//!
//! Each node is keyed by one namespace segment and holds the handlers registered
//! directly at that path, the wildcard registrations whose base path ends there,
//! and its child segments. Nodes are created on registration and are only removed
//! by an explicit purge.

use std::collections::HashMap;

use crate::error::StateNetResult;
use crate::namespace::{self, NamespaceMatcher};

use super::handler::{HandlerId, HandlerRecord};

#[derive(Debug, Clone)]
pub(crate) struct HandlerEntry {
    pub id: HandlerId,
    pub record: HandlerRecord,
}

#[derive(Debug)]
pub(crate) struct WildcardEntry {
    pub suffix: String,
    pub matcher: NamespaceMatcher,
    pub handlers: Vec<HandlerEntry>,
}

#[derive(Debug, Default)]
pub(crate) struct ListenerNode {
    handlers: Vec<HandlerEntry>,
    wildcards: Vec<WildcardEntry>,
    children: HashMap<String, ListenerNode>,
}

impl ListenerNode {
    pub fn entry(&self, path: &[String]) -> Option<&Self> {
        let mut node = self;
        for segment in path {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    fn entry_mut(&mut self, path: &[String]) -> Option<&mut Self> {
        let mut node = self;
        for segment in path {
            node = node.children.get_mut(segment)?;
        }
        Some(node)
    }

    fn entry_or_create(&mut self, path: &[String]) -> &mut Self {
        let mut node = self;
        for segment in path {
            node = node.children.entry(segment.clone()).or_default();
        }
        node
    }

    /// Stores a direct handler at `base`.
    pub fn insert_direct(&mut self, base: &[String], entry: HandlerEntry) {
        self.entry_or_create(base).handlers.push(entry);
    }

    /// Stores a wildcard handler at `base`, compiling the matcher on first use of `suffix`.
    pub fn insert_wildcard(&mut self, base: &[String], suffix: &str, entry: HandlerEntry) -> StateNetResult<()> {
        let node = self.entry_or_create(base);
        if let Some(existing) = node.wildcards.iter_mut().find(|w| w.suffix == suffix) {
            existing.handlers.push(entry);
            return Ok(());
        }

        let matcher = namespace::compile(base, suffix)?;
        node.wildcards.push(WildcardEntry {
            suffix: suffix.to_string(),
            matcher,
            handlers: vec![entry],
        });
        Ok(())
    }

    pub fn remove_direct(&mut self, base: &[String], id: HandlerId) -> Option<HandlerRecord> {
        let node = self.entry_mut(base)?;
        let pos = node.handlers.iter().position(|e| e.id == id)?;
        Some(node.handlers.remove(pos).record)
    }

    /// Removes a wildcard handler; an emptied wildcard entry is dropped with it.
    pub fn remove_wildcard(&mut self, base: &[String], suffix: &str, id: HandlerId) -> Option<HandlerRecord> {
        let node = self.entry_mut(base)?;
        let wpos = node.wildcards.iter().position(|w| w.suffix == suffix)?;
        let wildcard = &mut node.wildcards[wpos];
        let pos = wildcard.handlers.iter().position(|e| e.id == id)?;
        let removed = wildcard.handlers.remove(pos).record;
        if wildcard.handlers.is_empty() {
            node.wildcards.remove(wpos);
        }
        Some(removed)
    }

    pub fn has_direct(&self) -> bool {
        !self.handlers.is_empty()
    }

    pub fn has_wildcard(&self, suffix: &str) -> bool {
        self.wildcards
            .iter()
            .any(|w| w.suffix == suffix && !w.handlers.is_empty())
    }

    /// Visits the root and every ancestor of `segments` down to its parent.
    fn ancestors<'a>(&'a self, segments: &[String], mut visit: impl FnMut(&'a Self) -> bool) {
        let mut node = self;
        if !visit(node) {
            return;
        }
        let parent_len = segments.len().saturating_sub(1);
        for segment in &segments[..parent_len] {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return,
            }
            if !visit(node) {
                return;
            }
        }
    }

    /// True when some ancestor wildcard accepts `namespace`.
    pub fn wildcard_matches(&self, segments: &[String], namespace: &str) -> bool {
        let mut found = false;
        self.ancestors(segments, |node| {
            found = node
                .wildcards
                .iter()
                .any(|w| !w.handlers.is_empty() && w.matcher.is_match(namespace));
            !found
        });
        found
    }

    /// Collects the full handler set for a literal namespace: direct handlers
    /// first, then wildcard handlers from the root down to the parent.
    pub fn collect(&self, segments: &[String], namespace: &str) -> Vec<HandlerEntry> {
        let mut out: Vec<HandlerEntry> = self
            .entry(segments)
            .map(|node| node.handlers.clone())
            .unwrap_or_default();

        self.ancestors(segments, |node| {
            for wildcard in &node.wildcards {
                if wildcard.matcher.is_match(namespace) {
                    out.extend(wildcard.handlers.iter().cloned());
                }
            }
            true
        });
        out
    }

    /// Detaches the subtree at `path` (which must be non-empty).
    pub fn take_subtree(&mut self, path: &[String]) -> Option<Self> {
        let (last, parent_path) = path.split_last()?;
        self.entry_mut(parent_path)?.children.remove(last)
    }

    /// Drains every handler id held by this subtree.
    pub fn drain_into(self, out: &mut Vec<HandlerEntry>) {
        out.extend(self.handlers);
        for wildcard in self.wildcards {
            out.extend(wildcard.handlers);
        }
        for child in self.children.into_values() {
            child.drain_into(out);
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        1 + self.children.values().map(Self::depth).max().unwrap_or(0)
    }
}

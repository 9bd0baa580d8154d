//! Path index bridge: node keys grouped by path, kept in an externally
//! supplied ordered store.
//!
//! The store is a capability, not a storage engine of our own; the
//! in-memory implementation backs tests and small resources.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::error::Result;
use crate::node::ROOT_KEY;
use crate::page::SubtreeKind;
use crate::tree;
use crate::trx::RecordSource;

/// Reserved store key denoting the virtual document root; queries seed
/// their traversal here. No path node ever takes this key as an index
/// entry of its own.
pub const DOCUMENT_ROOT_SENTINEL: u64 = 0;

/// Primary node keys realizing one path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeReferences {
    /// Node keys, ascending.
    pub nodes: BTreeSet<u64>,
}

impl NodeReferences {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no node realizes the path anymore.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Ordered associative store capability consumed by the bridge.
pub trait OrderedStore {
    /// Replaces the entry for `key`.
    fn put(&mut self, key: u64, value: NodeReferences) -> Result<()>;
    /// Looks up `key`; absence is soft.
    fn get(&self, key: u64) -> Result<Option<&NodeReferences>>;
    /// Drops the entry for `key`, if any.
    fn remove(&mut self, key: u64) -> Result<()>;
    /// Ordered iteration starting at the first key `>= from`.
    fn iter_from(&self, from: u64) -> Box<dyn Iterator<Item = (u64, &NodeReferences)> + '_>;
}

/// In-memory ordered store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<u64, NodeReferences>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OrderedStore for MemoryStore {
    fn put(&mut self, key: u64, value: NodeReferences) -> Result<()> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn get(&self, key: u64) -> Result<Option<&NodeReferences>> {
        Ok(self.entries.get(&key))
    }

    fn remove(&mut self, key: u64) -> Result<()> {
        self.entries.remove(&key);
        Ok(())
    }

    fn iter_from(&self, from: u64) -> Box<dyn Iterator<Item = (u64, &NodeReferences)> + '_> {
        Box::new(self.entries.range(from..).map(|(key, value)| (*key, value)))
    }
}

/// Incremental change to the path-to-nodes mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEvent {
    /// `node_key` now realizes `path_key`.
    Insert {
        /// Primary node.
        node_key: u64,
        /// Path summary node.
        path_key: u64,
    },
    /// `node_key` no longer realizes `path_key`.
    Delete {
        /// Primary node.
        node_key: u64,
        /// Path summary node.
        path_key: u64,
    },
}

/// Predicate over path keys narrowing a query.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    allowed: BTreeSet<u64>,
}

impl PathFilter {
    /// Filter admitting exactly `paths`.
    pub fn new(paths: impl IntoIterator<Item = u64>) -> Self {
        Self {
            allowed: paths.into_iter().collect(),
        }
    }

    /// Whether `path_key` passes.
    pub fn matches(&self, path_key: u64) -> bool {
        self.allowed.contains(&path_key)
    }
}

/// Path index over an ordered store.
pub struct PathIndex<S: OrderedStore> {
    store: S,
}

impl<S: OrderedStore> PathIndex<S> {
    /// Wraps an empty or previously populated store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The store, for persistence by the owner.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Populates the store from the existing document tree.
    pub fn build<Src: RecordSource>(&mut self, src: &mut Src) -> Result<()> {
        let mut grouped: BTreeMap<u64, NodeReferences> = BTreeMap::new();
        for key in tree::subtree_keys(src, ROOT_KEY)? {
            let Some(record) = src.record(SubtreeKind::Document, key)? else {
                continue;
            };
            if let Some(path_key) = record.path_node_key() {
                grouped.entry(path_key).or_default().nodes.insert(key);
            }
        }
        let count = grouped.len();
        for (path_key, references) in grouped {
            self.store.put(path_key, references)?;
        }
        trace!(paths = count, "path index built");
        Ok(())
    }

    /// Applies one change.
    pub fn apply(&mut self, event: IndexEvent) -> Result<()> {
        match event {
            IndexEvent::Insert { node_key, path_key } => {
                let mut references = self
                    .store
                    .get(path_key)?
                    .cloned()
                    .unwrap_or_default();
                references.nodes.insert(node_key);
                self.store.put(path_key, references)
            }
            IndexEvent::Delete { node_key, path_key } => {
                let Some(existing) = self.store.get(path_key)? else {
                    return Ok(());
                };
                let mut references = existing.clone();
                references.nodes.remove(&node_key);
                if references.is_empty() {
                    self.store.remove(path_key)
                } else {
                    self.store.put(path_key, references)
                }
            }
        }
    }

    /// Applies a stream of changes, e.g. one writer's drained events.
    pub fn listen(&mut self, events: impl IntoIterator<Item = IndexEvent>) -> Result<()> {
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    /// Lazily evaluated, non-restartable sequence of matching entries,
    /// seeded at the document-root sentinel and optionally narrowed by
    /// `filter`.
    pub fn open_for_query<'a>(
        &'a self,
        filter: Option<&'a PathFilter>,
    ) -> impl Iterator<Item = (u64, &'a NodeReferences)> + 'a {
        self.store
            .iter_from(DOCUMENT_ROOT_SENTINEL)
            .filter(move |(path_key, _)| filter.map_or(true, |f| f.matches(*path_key)))
    }
}

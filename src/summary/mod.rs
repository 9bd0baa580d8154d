//! Path summary: a tree of distinct structural paths over the document.
//!
//! Each path node stands for one root-to-node path signature (by label
//! and kind) and counts the live primary nodes realizing it. The writer
//! half keeps the tree consistent under insertion, rename, move and
//! deletion.

mod writer;

pub use writer::{OpType, PathSummaryWriter};

use std::collections::VecDeque;

use crate::error::{Result, StrataError};
use crate::node::{NodeKind, PathNode, QName, Record, ROOT_KEY};
use crate::page::SubtreeKind;
use crate::trx::RecordSource;

/// Key of the path-summary root node.
pub const SUMMARY_ROOT: u64 = ROOT_KEY;

/// Loads a path node whose presence the caller's contract guarantees.
pub(crate) fn path_node<S: RecordSource>(src: &mut S, key: u64) -> Result<PathNode> {
    let record = src
        .record(SubtreeKind::PathSummary, key)?
        .ok_or(StrataError::Invariant("path node missing"))?;
    Ok(record.as_path()?.clone())
}

pub(crate) fn path_record<S: RecordSource>(src: &mut S, key: u64) -> Result<Record> {
    src.record(SubtreeKind::PathSummary, key)?
        .ok_or(StrataError::Invariant("path node missing"))
}

/// Child keys of a path node, in sibling order.
pub fn children<S: RecordSource>(src: &mut S, parent: u64) -> Result<Vec<u64>> {
    let parent_node = path_node(src, parent)?;
    let mut keys = Vec::new();
    let mut next = parent_node.structure.first_child;
    while let Some(key) = next {
        let node = path_node(src, key)?;
        keys.push(key);
        next = node.structure.right_sibling;
    }
    Ok(keys)
}

/// Linear filtered scan of a parent's children for `{name, kind}`.
/// Namespace steps compare by prefix alone.
pub fn find_child<S: RecordSource>(
    src: &mut S,
    parent: u64,
    name: &QName,
    kind: NodeKind,
) -> Result<Option<u64>> {
    for key in children(src, parent)? {
        let node = path_node(src, key)?;
        if node.kind == kind && node.name.matches(name, kind) {
            return Ok(Some(key));
        }
    }
    Ok(None)
}

/// Keys of a path subtree in level order, root first.
pub fn subtree_keys<S: RecordSource>(src: &mut S, root: u64) -> Result<Vec<u64>> {
    let mut keys = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(key) = queue.pop_front() {
        keys.push(key);
        queue.extend(children(src, key)?);
    }
    Ok(keys)
}

/// Reference count of a path node, for assertions and diagnostics.
pub fn references<S: RecordSource>(src: &mut S, key: u64) -> Result<u64> {
    Ok(path_node(src, key)?.references)
}

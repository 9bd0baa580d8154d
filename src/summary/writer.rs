//! Write half of the path summary.
//!
//! Keeps the path tree and its reference counts exact while the primary
//! tree is edited. Rename and move adaptation runs in three phases:
//! moved contributions are subtracted from the affected path nodes, the
//! old path subtree is merged into (or rebuilt at) the destination, and
//! path nodes whose count stayed at zero are deleted.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::trace;

use crate::error::{Result, StrataError};
use crate::index::IndexEvent;
use crate::node::{NodeKind, PathNode, QName, Record, RecordBody, StructNode, ROOT_KEY};
use crate::page::SubtreeKind;
use crate::summary::{children, find_child, path_node, path_record, subtree_keys, SUMMARY_ROOT};
use crate::tree::name_bearing_keys;
use crate::trx::WriteTrx;

/// Edit class an adaptation reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    /// The node's label changed in place.
    SetName,
    /// The node's subtree moved under a different parent.
    Moved,
    /// The node's subtree moved among siblings of the same parent.
    MovedSameLevel,
}

/// Namespace for the path-summary maintenance operations.
pub struct PathSummaryWriter;

impl PathSummaryWriter {
    /// Returns the path node for `{name, kind}` under `parent`,
    /// incrementing its reference count, or inserts a fresh one as
    /// first child with a count of one.
    pub fn get_or_create_path_node(
        trx: &mut WriteTrx<'_>,
        parent: u64,
        name: &QName,
        kind: NodeKind,
    ) -> Result<u64> {
        if let Some(found) = find_child(trx, parent, name, kind)? {
            let mut record = path_record(trx, found)?;
            record.as_path_mut()?.references += 1;
            trx.put_record(SubtreeKind::PathSummary, record)?;
            return Ok(found);
        }
        Self::insert_path_node(trx, parent, name, kind, 1)
    }

    /// Inserts a path node as first child of `parent`.
    fn insert_path_node(
        trx: &mut WriteTrx<'_>,
        parent: u64,
        name: &QName,
        kind: NodeKind,
        references: u64,
    ) -> Result<u64> {
        let parent_record = path_record(trx, parent)?;
        let parent_node = parent_record.as_path()?;
        let old_first = parent_node.structure.first_child;
        let level = parent_node.level + 1;
        let key = trx.new_record_key(SubtreeKind::PathSummary);
        trace!(key, parent, level, ?kind, "inserting path node");
        trx.put_record(
            SubtreeKind::PathSummary,
            Record {
                key,
                body: RecordBody::Path(PathNode {
                    structure: StructNode {
                        parent: Some(parent),
                        left_sibling: None,
                        right_sibling: old_first,
                        first_child: None,
                        child_count: 0,
                    },
                    name: name.clone(),
                    kind,
                    level,
                    references,
                }),
            },
        )?;
        if let Some(first) = old_first {
            let mut record = path_record(trx, first)?;
            record.set_left_sibling(Some(key))?;
            trx.put_record(SubtreeKind::PathSummary, record)?;
        }
        let mut parent_record = parent_record;
        {
            let node = parent_record.as_path_mut()?;
            node.structure.first_child = Some(key);
            node.structure.child_count += 1;
        }
        trx.put_record(SubtreeKind::PathSummary, parent_record)?;
        Ok(key)
    }

    /// Drops one reference from `path_key`, deleting the node and its
    /// subtree when the count would reach zero. An already-deleted path
    /// node is tolerated.
    pub fn remove(trx: &mut WriteTrx<'_>, path_key: u64) -> Result<()> {
        let Some(mut record) = trx.get_record(SubtreeKind::PathSummary, path_key)? else {
            return Ok(());
        };
        let node = record.as_path_mut()?;
        if node.references > 1 {
            node.references -= 1;
            trx.put_record(SubtreeKind::PathSummary, record)?;
        } else {
            Self::delete_subtree(trx, path_key)?;
        }
        Ok(())
    }

    /// Unlinks `key` from its parent and siblings.
    fn detach(trx: &mut WriteTrx<'_>, key: u64) -> Result<()> {
        let record = path_record(trx, key)?;
        let structure = record.as_path()?.structure.clone();
        let parent = structure
            .parent
            .ok_or(StrataError::Invariant("detaching the summary root"))?;
        match structure.left_sibling {
            Some(left) => {
                let mut left_record = path_record(trx, left)?;
                left_record.set_right_sibling(structure.right_sibling)?;
                trx.put_record(SubtreeKind::PathSummary, left_record)?;
            }
            None => {
                let mut parent_record = path_record(trx, parent)?;
                parent_record.as_path_mut()?.structure.first_child = structure.right_sibling;
                trx.put_record(SubtreeKind::PathSummary, parent_record)?;
            }
        }
        if let Some(right) = structure.right_sibling {
            let mut right_record = path_record(trx, right)?;
            right_record.set_left_sibling(structure.left_sibling)?;
            trx.put_record(SubtreeKind::PathSummary, right_record)?;
        }
        let mut parent_record = path_record(trx, parent)?;
        parent_record.as_path_mut()?.structure.child_count -= 1;
        trx.put_record(SubtreeKind::PathSummary, parent_record)?;
        Ok(())
    }

    /// Deletes a path node and every descendant.
    fn delete_subtree(trx: &mut WriteTrx<'_>, key: u64) -> Result<()> {
        trace!(key, "deleting path subtree");
        Self::detach(trx, key)?;
        for member in subtree_keys(trx, key)? {
            trx.remove_record(SubtreeKind::PathSummary, member)?;
        }
        Ok(())
    }

    fn add_references(trx: &mut WriteTrx<'_>, key: u64, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let mut record = path_record(trx, key)?;
        record.as_path_mut()?.references += amount;
        trx.put_record(SubtreeKind::PathSummary, record)
    }

    /// Path-summary side of a rename or move of the primary node
    /// `node_key`. The primary structure must already reflect the edit
    /// for moves; for renames the node still carries its old name.
    /// Returns the path key the node references afterwards; re-pointing
    /// of every affected primary node's path reference (with index
    /// events) happens here.
    pub fn adapt_path_for_changed_node(
        trx: &mut WriteTrx<'_>,
        node_key: u64,
        new_name: &QName,
        op: OpType,
        events: &mut Vec<IndexEvent>,
    ) -> Result<u64> {
        let node = trx.expect_record(SubtreeKind::Document, node_key)?;
        let kind = node.kind();
        let old_path_key = node
            .path_node_key()
            .ok_or(StrataError::Invariant("adapting a node without a path"))?;
        let parent_key = node
            .parent()
            .ok_or(StrataError::Invariant("adapting the document root"))?;
        let parent_path = if parent_key == ROOT_KEY {
            SUMMARY_ROOT
        } else {
            trx.expect_record(SubtreeKind::Document, parent_key)?
                .path_node_key()
                .ok_or(StrataError::Invariant("parent node without a path"))?
        };
        let old = path_node(trx, old_path_key)?;

        if op == OpType::SetName && old.references == 1 {
            let dest = find_child(trx, parent_path, new_name, kind)?;
            if dest.is_none() || dest == Some(old_path_key) {
                // Rename in place: same key, same count, new label.
                let mut record = path_record(trx, old_path_key)?;
                record.set_name(new_name.clone())?;
                trx.put_record(SubtreeKind::PathSummary, record)?;
                return Ok(old_path_key);
            }
        }

        // Subtract each moved primary node from the path node it
        // realizes; nodes whose count would reach zero are marked and
        // deleted last, after the merge had a chance to raise them.
        let members = name_bearing_keys(trx, node_key)?;
        let mut moved_refs: BTreeMap<u64, u64> = BTreeMap::new();
        for (_, path_key) in &members {
            *moved_refs.entry(*path_key).or_insert(0) += 1;
        }
        let mut marked: BTreeSet<u64> = BTreeSet::new();
        for (&path_key, &count) in &moved_refs {
            let mut record = path_record(trx, path_key)?;
            let path = record.as_path_mut()?;
            if path.references <= count {
                path.references = 0;
                marked.insert(path_key);
            } else {
                path.references -= count;
            }
            trx.put_record(SubtreeKind::PathSummary, record)?;
        }

        let dest = find_child(trx, parent_path, new_name, kind)?;
        let new_paths: BTreeMap<u64, u64> = match dest {
            Some(dest) => {
                Self::merge_subtree(trx, old_path_key, dest, &moved_refs, &members)?
            }
            None => Self::rebuild_subtree(trx, node_key, parent_path, new_name, &members)?,
        };

        // Re-point the moved primary nodes and report the change.
        for (member, old_member_path) in &members {
            let target = *new_paths
                .get(member)
                .ok_or(StrataError::Invariant("moved node without a new path"))?;
            if target == *old_member_path {
                continue;
            }
            let mut record = trx.expect_record(SubtreeKind::Document, *member)?;
            record.set_path_node_key(target)?;
            trx.put_record(SubtreeKind::Document, record)?;
            events.push(IndexEvent::Delete {
                node_key: *member,
                path_key: *old_member_path,
            });
            events.push(IndexEvent::Insert {
                node_key: *member,
                path_key: target,
            });
        }

        for path_key in marked {
            let Some(record) = trx.get_record(SubtreeKind::PathSummary, path_key)? else {
                continue;
            };
            if record.as_path()?.references == 0 {
                Self::delete_subtree(trx, path_key)?;
            }
        }

        new_paths
            .get(&node_key)
            .copied()
            .ok_or(StrataError::Invariant("moved node without a new path"))
    }

    /// Folds the old path subtree into the destination, level by level.
    /// Correspondence requires agreeing relative depth, `{name, kind}`
    /// and absolute level; anything else gets a fresh sibling. Returns
    /// the new path key per moved primary node.
    fn merge_subtree(
        trx: &mut WriteTrx<'_>,
        old_path_key: u64,
        dest: u64,
        moved_refs: &BTreeMap<u64, u64>,
        members: &[(u64, u64)],
    ) -> Result<BTreeMap<u64, u64>> {
        let mut corresponding: BTreeMap<u64, u64> = BTreeMap::new();
        corresponding.insert(old_path_key, dest);
        let root_contribution = moved_refs
            .get(&old_path_key)
            .copied()
            .ok_or(StrataError::Invariant("subtree root contributed nothing"))?;
        Self::add_references(trx, dest, root_contribution)?;

        let mut queue = VecDeque::from([old_path_key]);
        while let Some(old_key) = queue.pop_front() {
            let dest_key = *corresponding
                .get(&old_key)
                .ok_or(StrataError::Invariant("merge visited an unmapped node"))?;
            for child in children(trx, old_key)? {
                let Some(&contribution) = moved_refs.get(&child) else {
                    continue;
                };
                let child_node = path_node(trx, child)?;
                let mut target = None;
                for candidate in children(trx, dest_key)? {
                    let node = path_node(trx, candidate)?;
                    if node.kind == child_node.kind
                        && node.name.matches(&child_node.name, node.kind)
                        && node.level == child_node.level
                    {
                        target = Some(candidate);
                        break;
                    }
                }
                let target = match target {
                    Some(found) => found,
                    None => Self::insert_path_node(
                        trx,
                        dest_key,
                        &child_node.name,
                        child_node.kind,
                        0,
                    )?,
                };
                Self::add_references(trx, target, contribution)?;
                corresponding.insert(child, target);
                queue.push_back(child);
            }
        }

        let mut new_paths = BTreeMap::new();
        for (member, old_member_path) in members {
            let target = *corresponding
                .get(old_member_path)
                .ok_or(StrataError::Invariant("moved path without correspondence"))?;
            new_paths.insert(*member, target);
        }
        Ok(new_paths)
    }

    /// No destination exists: mirror the moved primary subtree with
    /// fresh path nodes, sharing where moved nodes realize the same
    /// path. Walk order guarantees a primary parent is mirrored before
    /// its children.
    fn rebuild_subtree(
        trx: &mut WriteTrx<'_>,
        node_key: u64,
        parent_path: u64,
        new_name: &QName,
        members: &[(u64, u64)],
    ) -> Result<BTreeMap<u64, u64>> {
        let mut new_paths: BTreeMap<u64, u64> = BTreeMap::new();
        for (member, _) in members {
            let record = trx.expect_record(SubtreeKind::Document, *member)?;
            let name = if *member == node_key {
                new_name.clone()
            } else {
                record
                    .name()
                    .cloned()
                    .ok_or(StrataError::Invariant("name-bearing node without a name"))?
            };
            let target_parent = if *member == node_key {
                parent_path
            } else {
                let primary_parent = record
                    .parent()
                    .ok_or(StrataError::Invariant("subtree member without a parent"))?;
                *new_paths
                    .get(&primary_parent)
                    .ok_or(StrataError::Invariant("primary parent not yet mirrored"))?
            };
            let path = Self::get_or_create_path_node(trx, target_parent, &name, record.kind())?;
            new_paths.insert(*member, path);
        }
        Ok(new_paths)
    }
}

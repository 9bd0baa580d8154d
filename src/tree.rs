//! Document write layer: structural edits over the primary tree, each
//! one driving the path summary and emitting index events.

use std::collections::VecDeque;

use tracing::trace;

use crate::dewey::PosId;
use crate::error::{Result, StrataError};
use crate::index::IndexEvent;
use crate::node::{
    AttributeNode, ElementNode, NamespaceNode, NodeKind, QName, Record, RecordBody, StructNode,
    TextNode, ROOT_KEY,
};
use crate::page::SubtreeKind;
use crate::summary::{OpType, PathSummaryWriter, SUMMARY_ROOT};
use crate::trx::{ReadTrx, RecordSource, WriteTrx};

/// Every record of a document subtree, level order, root first.
/// Per-element attribute and namespace records are fanned in.
fn walk_subtree<S: RecordSource>(src: &mut S, root: u64) -> Result<Vec<Record>> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(key) = queue.pop_front() {
        let record = src
            .record(SubtreeKind::Document, key)?
            .ok_or(StrataError::Invariant("subtree member missing"))?;
        if let RecordBody::Element(element) = &record.body {
            queue.extend(element.attributes.iter().copied());
            queue.extend(element.namespaces.iter().copied());
        }
        let mut child = record.first_child();
        out.push(record);
        while let Some(child_key) = child {
            queue.push_back(child_key);
            child = src
                .record(SubtreeKind::Document, child_key)?
                .ok_or(StrataError::Invariant("subtree member missing"))?
                .right_sibling();
        }
    }
    Ok(out)
}

/// Keys of a document subtree, level order.
pub(crate) fn subtree_keys<S: RecordSource>(src: &mut S, root: u64) -> Result<Vec<u64>> {
    Ok(walk_subtree(src, root)?.into_iter().map(|r| r.key).collect())
}

/// `(node key, path key)` of every name-bearing record in a document
/// subtree, level order, so primary parents precede their children.
pub(crate) fn name_bearing_keys<S: RecordSource>(
    src: &mut S,
    root: u64,
) -> Result<Vec<(u64, u64)>> {
    let mut out = Vec::new();
    for record in walk_subtree(src, root)? {
        if let Some(path_key) = record.path_node_key() {
            out.push((record.key, path_key));
        }
    }
    Ok(out)
}

/// Editor over one write transaction. Structural edits keep sibling and
/// parent links, position identifiers, the path summary and the index
/// event stream consistent; `commit` publishes the revision.
pub struct TreeWriter<'r> {
    trx: WriteTrx<'r>,
    events: Vec<IndexEvent>,
}

impl<'r> TreeWriter<'r> {
    /// Wraps a write transaction.
    pub fn new(trx: WriteTrx<'r>) -> Self {
        Self {
            trx,
            events: Vec::new(),
        }
    }

    /// Revision this writer will publish.
    pub fn revision(&self) -> u64 {
        self.trx.revision()
    }

    /// Looks up a document record, seeing this writer's own edits.
    pub fn record(&mut self, key: u64) -> Result<Option<Record>> {
        self.trx.get_record(SubtreeKind::Document, key)
    }

    /// Index events accumulated since the last drain.
    pub fn events(&self) -> &[IndexEvent] {
        &self.events
    }

    /// Takes the accumulated index events.
    pub fn drain_events(&mut self) -> Vec<IndexEvent> {
        std::mem::take(&mut self.events)
    }

    /// The underlying write transaction, for path-summary inspection.
    pub fn trx_mut(&mut self) -> &mut WriteTrx<'r> {
        &mut self.trx
    }

    /// Publishes the revision.
    pub fn commit(self) -> Result<u64> {
        self.trx.commit()
    }

    fn expect(&mut self, key: u64) -> Result<Record> {
        self.trx.expect_record(SubtreeKind::Document, key)
    }

    /// Path node realized by the children of `parent`.
    fn parent_path(parent: &Record) -> Result<u64> {
        if parent.key == ROOT_KEY {
            Ok(SUMMARY_ROOT)
        } else {
            parent
                .path_node_key()
                .ok_or(StrataError::Invariant("parent node without a path"))
        }
    }

    fn child_pos(&mut self, parent: &Record, key: u64) -> Result<Option<PosId>> {
        if !self.trx.settings().position_ids {
            return Ok(None);
        }
        let base = match &parent.body {
            RecordBody::Document(_) => PosId::root(),
            RecordBody::Element(element) => element
                .pos_id
                .clone()
                .ok_or(StrataError::Invariant("element without a position id"))?,
            _ => return Err(StrataError::InvalidArgument("parent cannot hold children".into())),
        };
        // The record key doubles as the child ordinal: unique for the
        // lifetime of the resource, so reinsertions never collide.
        Ok(Some(base.child(key)))
    }

    /// Inserts an element as the first child of `parent_key`.
    pub fn insert_element_first_child(&mut self, parent_key: u64, name: QName) -> Result<u64> {
        let parent = self.expect(parent_key)?;
        let parent_path = Self::parent_path(&parent)?;
        let path_key = PathSummaryWriter::get_or_create_path_node(
            &mut self.trx,
            parent_path,
            &name,
            NodeKind::Element,
        )?;
        let key = self.trx.new_record_key(SubtreeKind::Document);
        let pos_id = self.child_pos(&parent, key)?;
        let old_first = parent
            .structure()
            .ok_or(StrataError::InvalidArgument("parent cannot hold children".into()))?
            .first_child;
        trace!(key, parent_key, path_key, "inserting element");
        self.trx.put_record(
            SubtreeKind::Document,
            Record {
                key,
                body: RecordBody::Element(ElementNode {
                    structure: StructNode {
                        parent: Some(parent_key),
                        left_sibling: None,
                        right_sibling: old_first,
                        first_child: None,
                        child_count: 0,
                    },
                    name,
                    path_node_key: path_key,
                    attributes: Vec::new(),
                    namespaces: Vec::new(),
                    pos_id,
                }),
            },
        )?;
        self.splice_in_first(parent_key, key, old_first)?;
        self.events.push(IndexEvent::Insert {
            node_key: key,
            path_key,
        });
        Ok(key)
    }

    /// Inserts an element as the right sibling of `left_key`.
    pub fn insert_element_right_sibling(&mut self, left_key: u64, name: QName) -> Result<u64> {
        let left = self.expect(left_key)?;
        let parent_key = left
            .parent()
            .ok_or(StrataError::InvalidArgument("the root has no siblings".into()))?;
        let parent = self.expect(parent_key)?;
        let parent_path = Self::parent_path(&parent)?;
        let path_key = PathSummaryWriter::get_or_create_path_node(
            &mut self.trx,
            parent_path,
            &name,
            NodeKind::Element,
        )?;
        let key = self.trx.new_record_key(SubtreeKind::Document);
        let pos_id = self.child_pos(&parent, key)?;
        let old_right = left.right_sibling();
        trace!(key, left_key, path_key, "inserting element sibling");
        self.trx.put_record(
            SubtreeKind::Document,
            Record {
                key,
                body: RecordBody::Element(ElementNode {
                    structure: StructNode {
                        parent: Some(parent_key),
                        left_sibling: Some(left_key),
                        right_sibling: old_right,
                        first_child: None,
                        child_count: 0,
                    },
                    name,
                    path_node_key: path_key,
                    attributes: Vec::new(),
                    namespaces: Vec::new(),
                    pos_id,
                }),
            },
        )?;
        self.splice_in_after(parent_key, left_key, key, old_right)?;
        self.events.push(IndexEvent::Insert {
            node_key: key,
            path_key,
        });
        Ok(key)
    }

    /// Inserts a text record as the first child of `parent_key`.
    pub fn insert_text_first_child(&mut self, parent_key: u64, value: impl Into<String>) -> Result<u64> {
        let parent = self.expect(parent_key)?;
        let key = self.trx.new_record_key(SubtreeKind::Document);
        let pos_id = self.child_pos(&parent, key)?;
        let old_first = parent
            .structure()
            .ok_or(StrataError::InvalidArgument("parent cannot hold children".into()))?
            .first_child;
        self.trx.put_record(
            SubtreeKind::Document,
            Record {
                key,
                body: RecordBody::Text(TextNode {
                    parent: parent_key,
                    left_sibling: None,
                    right_sibling: old_first,
                    value: value.into(),
                    pos_id,
                }),
            },
        )?;
        self.splice_in_first(parent_key, key, old_first)?;
        Ok(key)
    }

    /// Inserts a text record as the right sibling of `left_key`.
    pub fn insert_text_right_sibling(&mut self, left_key: u64, value: impl Into<String>) -> Result<u64> {
        let left = self.expect(left_key)?;
        let parent_key = left
            .parent()
            .ok_or(StrataError::InvalidArgument("the root has no siblings".into()))?;
        let parent = self.expect(parent_key)?;
        let key = self.trx.new_record_key(SubtreeKind::Document);
        let pos_id = self.child_pos(&parent, key)?;
        let old_right = left.right_sibling();
        self.trx.put_record(
            SubtreeKind::Document,
            Record {
                key,
                body: RecordBody::Text(TextNode {
                    parent: parent_key,
                    left_sibling: Some(left_key),
                    right_sibling: old_right,
                    value: value.into(),
                    pos_id,
                }),
            },
        )?;
        self.splice_in_after(parent_key, left_key, key, old_right)?;
        Ok(key)
    }

    /// Adds an attribute to `element_key`.
    pub fn insert_attribute(
        &mut self,
        element_key: u64,
        name: QName,
        value: impl Into<String>,
    ) -> Result<u64> {
        let mut element = self.expect(element_key)?;
        let element_path = element
            .path_node_key()
            .ok_or(StrataError::InvalidArgument("attributes require an element".into()))?;
        let path_key = PathSummaryWriter::get_or_create_path_node(
            &mut self.trx,
            element_path,
            &name,
            NodeKind::Attribute,
        )?;
        let key = self.trx.new_record_key(SubtreeKind::Document);
        self.trx.put_record(
            SubtreeKind::Document,
            Record {
                key,
                body: RecordBody::Attribute(AttributeNode {
                    parent: element_key,
                    name,
                    value: value.into(),
                    path_node_key: path_key,
                }),
            },
        )?;
        match &mut element.body {
            RecordBody::Element(node) => node.attributes.push(key),
            _ => return Err(StrataError::InvalidArgument("attributes require an element".into())),
        }
        self.trx.put_record(SubtreeKind::Document, element)?;
        self.events.push(IndexEvent::Insert {
            node_key: key,
            path_key,
        });
        Ok(key)
    }

    /// Adds a namespace declaration to `element_key`.
    pub fn insert_namespace(&mut self, element_key: u64, name: QName) -> Result<u64> {
        let mut element = self.expect(element_key)?;
        let element_path = element
            .path_node_key()
            .ok_or(StrataError::InvalidArgument("namespaces require an element".into()))?;
        let path_key = PathSummaryWriter::get_or_create_path_node(
            &mut self.trx,
            element_path,
            &name,
            NodeKind::Namespace,
        )?;
        let key = self.trx.new_record_key(SubtreeKind::Document);
        self.trx.put_record(
            SubtreeKind::Document,
            Record {
                key,
                body: RecordBody::Namespace(NamespaceNode {
                    parent: element_key,
                    name,
                    path_node_key: path_key,
                }),
            },
        )?;
        match &mut element.body {
            RecordBody::Element(node) => node.namespaces.push(key),
            _ => return Err(StrataError::InvalidArgument("namespaces require an element".into())),
        }
        self.trx.put_record(SubtreeKind::Document, element)?;
        self.events.push(IndexEvent::Insert {
            node_key: key,
            path_key,
        });
        Ok(key)
    }

    /// Renames a name-bearing node, adapting the path summary.
    pub fn set_name(&mut self, node_key: u64, new_name: QName) -> Result<()> {
        let node = self.expect(node_key)?;
        let old_name = node
            .name()
            .ok_or(StrataError::InvalidArgument("node has no name".into()))?;
        if node.path_node_key().is_none() {
            return Err(StrataError::InvalidArgument("node has no path".into()));
        }
        if old_name == &new_name {
            return Ok(());
        }
        // The adaptation re-points the node's path reference itself;
        // only the label remains to be written.
        PathSummaryWriter::adapt_path_for_changed_node(
            &mut self.trx,
            node_key,
            &new_name,
            OpType::SetName,
            &mut self.events,
        )?;
        let mut node = self.expect(node_key)?;
        node.set_name(new_name)?;
        self.trx.put_record(SubtreeKind::Document, node)?;
        Ok(())
    }

    /// Moves a subtree to become the first child of `new_parent_key`.
    pub fn move_to_first_child(&mut self, node_key: u64, new_parent_key: u64) -> Result<()> {
        self.check_movable(node_key, new_parent_key)?;
        let same_parent = self.expect(node_key)?.parent() == Some(new_parent_key);
        self.detach(node_key)?;
        let parent = self.expect(new_parent_key)?;
        let old_first = parent
            .structure()
            .ok_or(StrataError::InvalidArgument("target cannot hold children".into()))?
            .first_child;
        let mut node = self.expect(node_key)?;
        node.set_parent(new_parent_key)?;
        node.set_left_sibling(None)?;
        node.set_right_sibling(old_first)?;
        self.trx.put_record(SubtreeKind::Document, node)?;
        self.splice_in_first(new_parent_key, node_key, old_first)?;
        self.finish_move(node_key, same_parent)
    }

    /// Moves a subtree to become the right sibling of `left_key`.
    pub fn move_to_right_sibling(&mut self, node_key: u64, left_key: u64) -> Result<()> {
        if node_key == left_key {
            return Err(StrataError::InvalidArgument("node cannot follow itself".into()));
        }
        let left = self.expect(left_key)?;
        let new_parent_key = left
            .parent()
            .ok_or(StrataError::InvalidArgument("the root has no siblings".into()))?;
        self.check_movable(node_key, new_parent_key)?;
        if subtree_keys(&mut self.trx, node_key)?.contains(&left_key) {
            return Err(StrataError::InvalidArgument(
                "cannot move a subtree behind its own member".into(),
            ));
        }
        let same_parent = self.expect(node_key)?.parent() == Some(new_parent_key);
        self.detach(node_key)?;
        // Re-read: the detach may have touched the left sibling.
        let left = self.expect(left_key)?;
        let old_right = left.right_sibling();
        let mut node = self.expect(node_key)?;
        node.set_parent(new_parent_key)?;
        node.set_left_sibling(Some(left_key))?;
        node.set_right_sibling(old_right)?;
        self.trx.put_record(SubtreeKind::Document, node)?;
        self.splice_in_after(new_parent_key, left_key, node_key, old_right)?;
        self.finish_move(node_key, same_parent)
    }

    /// Removes a subtree, its attributes and namespaces, releasing
    /// every path reference it held.
    pub fn remove(&mut self, node_key: u64) -> Result<()> {
        if node_key == ROOT_KEY {
            return Err(StrataError::InvalidArgument("cannot remove the document root".into()));
        }
        let node = self.expect(node_key)?;
        let members = walk_subtree(&mut self.trx, node_key)?;
        match node.kind() {
            NodeKind::Attribute => self.unhook_from_element(node_key, node.parent(), false)?,
            NodeKind::Namespace => self.unhook_from_element(node_key, node.parent(), true)?,
            _ => self.detach(node_key)?,
        }
        for member in members {
            if let Some(path_key) = member.path_node_key() {
                PathSummaryWriter::remove(&mut self.trx, path_key)?;
                self.events.push(IndexEvent::Delete {
                    node_key: member.key,
                    path_key,
                });
            }
            self.trx.remove_record(SubtreeKind::Document, member.key)?;
        }
        Ok(())
    }

    fn unhook_from_element(
        &mut self,
        node_key: u64,
        element_key: Option<u64>,
        namespace: bool,
    ) -> Result<()> {
        let element_key =
            element_key.ok_or(StrataError::Invariant("attribute without an element"))?;
        let mut element = self.expect(element_key)?;
        match &mut element.body {
            RecordBody::Element(node) => {
                let list = if namespace {
                    &mut node.namespaces
                } else {
                    &mut node.attributes
                };
                list.retain(|key| *key != node_key);
            }
            _ => return Err(StrataError::Invariant("attribute without an element")),
        }
        self.trx.put_record(SubtreeKind::Document, element)
    }

    fn check_movable(&mut self, node_key: u64, new_parent_key: u64) -> Result<()> {
        if node_key == ROOT_KEY {
            return Err(StrataError::InvalidArgument("cannot move the document root".into()));
        }
        let node = self.expect(node_key)?;
        if !matches!(node.kind(), NodeKind::Element | NodeKind::Text) {
            return Err(StrataError::InvalidArgument("only subtrees and text move".into()));
        }
        if subtree_keys(&mut self.trx, node_key)?.contains(&new_parent_key) {
            return Err(StrataError::InvalidArgument(
                "cannot move a subtree into itself".into(),
            ));
        }
        Ok(())
    }

    fn finish_move(&mut self, node_key: u64, same_parent: bool) -> Result<()> {
        self.reassign_pos(node_key)?;
        let node = self.expect(node_key)?;
        if let Some(name) = node.name().cloned() {
            let op = if same_parent {
                OpType::MovedSameLevel
            } else {
                OpType::Moved
            };
            PathSummaryWriter::adapt_path_for_changed_node(
                &mut self.trx,
                node_key,
                &name,
                op,
                &mut self.events,
            )?;
        }
        Ok(())
    }

    /// Re-derives position identifiers for a relocated subtree from its
    /// new ancestry, top down.
    fn reassign_pos(&mut self, root: u64) -> Result<()> {
        if !self.trx.settings().position_ids {
            return Ok(());
        }
        let mut queue = VecDeque::from([root]);
        while let Some(key) = queue.pop_front() {
            let mut record = self.expect(key)?;
            if record.pos_id().is_some() {
                let parent_key = record
                    .parent()
                    .ok_or(StrataError::Invariant("relocated node without a parent"))?;
                let base = if parent_key == ROOT_KEY {
                    PosId::root()
                } else {
                    self.expect(parent_key)?
                        .pos_id()
                        .cloned()
                        .ok_or(StrataError::Invariant("parent without a position id"))?
                };
                record.set_pos_id(Some(base.child(key)))?;
                self.trx.put_record(SubtreeKind::Document, record.clone())?;
            }
            let mut child = record.first_child();
            while let Some(child_key) = child {
                queue.push_back(child_key);
                child = self
                    .expect(child_key)?
                    .right_sibling();
            }
        }
        Ok(())
    }

    /// Detaches a structural node from its parent and siblings. The
    /// node's own links are left for the caller to rewrite.
    fn detach(&mut self, node_key: u64) -> Result<()> {
        let node = self.expect(node_key)?;
        let parent_key = node
            .parent()
            .ok_or(StrataError::Invariant("detaching the document root"))?;
        let left = node.left_sibling();
        let right = node.right_sibling();
        match left {
            Some(left_key) => {
                let mut left_record = self.expect(left_key)?;
                left_record.set_right_sibling(right)?;
                self.trx.put_record(SubtreeKind::Document, left_record)?;
            }
            None => {
                let mut parent = self.expect(parent_key)?;
                parent
                    .structure_mut()
                    .ok_or(StrataError::Invariant("parent without structure"))?
                    .first_child = right;
                self.trx.put_record(SubtreeKind::Document, parent)?;
            }
        }
        if let Some(right_key) = right {
            let mut right_record = self.expect(right_key)?;
            right_record.set_left_sibling(left)?;
            self.trx.put_record(SubtreeKind::Document, right_record)?;
        }
        let mut parent = self.expect(parent_key)?;
        parent
            .structure_mut()
            .ok_or(StrataError::Invariant("parent without structure"))?
            .child_count -= 1;
        self.trx.put_record(SubtreeKind::Document, parent)?;
        Ok(())
    }

    /// Rewires `parent` and its displaced first child around the new
    /// first child `key`.
    fn splice_in_first(&mut self, parent_key: u64, key: u64, old_first: Option<u64>) -> Result<()> {
        if let Some(first) = old_first {
            let mut record = self.expect(first)?;
            record.set_left_sibling(Some(key))?;
            self.trx.put_record(SubtreeKind::Document, record)?;
        }
        let mut parent = self.expect(parent_key)?;
        let structure = parent
            .structure_mut()
            .ok_or(StrataError::InvalidArgument("parent cannot hold children".into()))?;
        structure.first_child = Some(key);
        structure.child_count += 1;
        self.trx.put_record(SubtreeKind::Document, parent)
    }

    /// Rewires `left`, its displaced right sibling and the parent's
    /// child count around the inserted `key`.
    fn splice_in_after(
        &mut self,
        parent_key: u64,
        left_key: u64,
        key: u64,
        old_right: Option<u64>,
    ) -> Result<()> {
        let mut left = self.expect(left_key)?;
        left.set_right_sibling(Some(key))?;
        self.trx.put_record(SubtreeKind::Document, left)?;
        if let Some(right) = old_right {
            let mut record = self.expect(right)?;
            record.set_left_sibling(Some(key))?;
            self.trx.put_record(SubtreeKind::Document, record)?;
        }
        let mut parent = self.expect(parent_key)?;
        parent
            .structure_mut()
            .ok_or(StrataError::InvalidArgument("parent cannot hold children".into()))?
            .child_count += 1;
        self.trx.put_record(SubtreeKind::Document, parent)
    }
}

/// Read-side companion over a committed revision.
pub struct DocReader<'r> {
    trx: ReadTrx<'r>,
}

impl<'r> DocReader<'r> {
    /// Wraps a read transaction.
    pub fn new(trx: ReadTrx<'r>) -> Self {
        Self { trx }
    }

    /// Revision this reader is pinned to.
    pub fn revision(&self) -> u64 {
        self.trx.revision()
    }

    /// Looks up a committed document record.
    pub fn record(&mut self, key: u64) -> Result<Option<Record>> {
        self.trx.get_record(SubtreeKind::Document, key)
    }

    /// Child keys of a structural node, in sibling order.
    pub fn children(&mut self, key: u64) -> Result<Vec<u64>> {
        let Some(record) = self.record(key)? else {
            return Ok(Vec::new());
        };
        let mut keys = Vec::new();
        let mut child = record.first_child();
        while let Some(child_key) = child {
            keys.push(child_key);
            child = self
                .record(child_key)?
                .ok_or(StrataError::Invariant("child link to a missing record"))?
                .right_sibling();
        }
        Ok(keys)
    }

    /// The underlying transaction, for path-summary lookups.
    pub fn trx_mut(&mut self) -> &mut ReadTrx<'r> {
        &mut self.trx
    }
}

//! Record model of the primary document tree and the path summary.
//!
//! Node-kind polymorphism is a closed tagged enum dispatched by pattern
//! matching. Parent/child/sibling relations are stored as record keys;
//! back-references (parent, left sibling) are lookup relations only.

use crate::bytes::{put_string, put_u32, put_u64, ByteReader};
use crate::dewey::PosId;
use crate::error::{Result, StrataError};

/// Record key of the document root and of the path-summary root, each in
/// its own keyspace.
pub const ROOT_KEY: u64 = 0;

const NULL_REF: u64 = u64::MAX;

/// Kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Virtual root of a document.
    Document,
    /// Element node.
    Element,
    /// Attribute of an element.
    Attribute,
    /// Namespace declaration on an element.
    Namespace,
    /// Text content.
    Text,
    /// Node of the path-summary tree.
    Path,
}

impl NodeKind {
    /// One-byte storage tag.
    pub fn tag(self) -> u8 {
        match self {
            NodeKind::Document => 0,
            NodeKind::Element => 1,
            NodeKind::Attribute => 2,
            NodeKind::Namespace => 3,
            NodeKind::Text => 4,
            NodeKind::Path => 5,
        }
    }

    /// Inverse of [`NodeKind::tag`].
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => NodeKind::Document,
            1 => NodeKind::Element,
            2 => NodeKind::Attribute,
            3 => NodeKind::Namespace,
            4 => NodeKind::Text,
            5 => NodeKind::Path,
            _ => return Err(StrataError::Corruption(format!("unknown node kind tag {tag}"))),
        })
    }
}

/// Qualified name with namespace URI, prefix and local part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QName {
    /// Namespace URI, empty when unqualified.
    pub uri: String,
    /// Namespace prefix, empty when unqualified.
    pub prefix: String,
    /// Local part.
    pub local: String,
}

impl QName {
    /// Unqualified name.
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            uri: String::new(),
            prefix: String::new(),
            local: local.into(),
        }
    }

    /// Fully qualified name.
    pub fn new(uri: impl Into<String>, prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            prefix: prefix.into(),
            local: local.into(),
        }
    }

    /// Display form used for path matching: `prefix:local`, or the local
    /// part alone when no prefix is set.
    pub fn lookup_name(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }

    /// Name equality as used by the path summary: namespace declarations
    /// compare by prefix, every other kind by the full lookup name.
    pub fn matches(&self, other: &QName, kind: NodeKind) -> bool {
        if kind == NodeKind::Namespace {
            self.prefix == other.prefix
        } else {
            self.lookup_name() == other.lookup_name()
        }
    }
}

/// Structural links shared by document, element and path records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructNode {
    /// Parent record key; `None` only for the root records.
    pub parent: Option<u64>,
    /// Left sibling, if any.
    pub left_sibling: Option<u64>,
    /// Right sibling, if any.
    pub right_sibling: Option<u64>,
    /// First child, if any.
    pub first_child: Option<u64>,
    /// Number of children.
    pub child_count: u64,
}

/// Virtual document root record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocumentNode {
    /// Structural links; parent and siblings are always `None`.
    pub structure: StructNode,
}

/// Element record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementNode {
    /// Structural links.
    pub structure: StructNode,
    /// Qualified name.
    pub name: QName,
    /// Key of the path-summary node this element realizes.
    pub path_node_key: u64,
    /// Attribute record keys, in insertion order.
    pub attributes: Vec<u64>,
    /// Namespace record keys, in insertion order.
    pub namespaces: Vec<u64>,
    /// Position identifier, present when the resource stores them.
    pub pos_id: Option<PosId>,
}

/// Attribute record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeNode {
    /// Owning element.
    pub parent: u64,
    /// Qualified name.
    pub name: QName,
    /// Attribute value.
    pub value: String,
    /// Key of the path-summary node this attribute realizes.
    pub path_node_key: u64,
}

/// Namespace declaration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceNode {
    /// Owning element.
    pub parent: u64,
    /// Prefix and URI; the local part is unused.
    pub name: QName,
    /// Key of the path-summary node this declaration realizes.
    pub path_node_key: u64,
}

/// Text record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
    /// Parent element or document root.
    pub parent: u64,
    /// Left sibling, if any.
    pub left_sibling: Option<u64>,
    /// Right sibling, if any.
    pub right_sibling: Option<u64>,
    /// Text content.
    pub value: String,
    /// Position identifier, present when the resource stores them.
    pub pos_id: Option<PosId>,
}

/// Path-summary record: one distinct root-to-node path signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    /// Structural links within the path-summary tree.
    pub structure: StructNode,
    /// Name of the path step.
    pub name: QName,
    /// Kind of primary node this step indexes (element, attribute or
    /// namespace; the summary root carries `Document`).
    pub kind: NodeKind,
    /// Depth below the summary root; the root is level 0.
    pub level: u32,
    /// Number of live primary nodes whose path matches this node
    /// exactly. Never negative.
    pub references: u64,
}

/// A storable record: a primary-tree node or a path-summary node,
/// together with its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key, unique within its subtree's keyspace.
    pub key: u64,
    /// Payload.
    pub body: RecordBody,
}

/// Closed set of record payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// Document root.
    Document(DocumentNode),
    /// Element.
    Element(ElementNode),
    /// Attribute.
    Attribute(AttributeNode),
    /// Namespace declaration.
    Namespace(NamespaceNode),
    /// Text.
    Text(TextNode),
    /// Path-summary node.
    Path(PathNode),
}

impl Record {
    /// Kind of the payload.
    pub fn kind(&self) -> NodeKind {
        match &self.body {
            RecordBody::Document(_) => NodeKind::Document,
            RecordBody::Element(_) => NodeKind::Element,
            RecordBody::Attribute(_) => NodeKind::Attribute,
            RecordBody::Namespace(_) => NodeKind::Namespace,
            RecordBody::Text(_) => NodeKind::Text,
            RecordBody::Path(_) => NodeKind::Path,
        }
    }

    /// Position identifier carried by the record, if any.
    pub fn pos_id(&self) -> Option<&PosId> {
        match &self.body {
            RecordBody::Element(node) => node.pos_id.as_ref(),
            RecordBody::Text(node) => node.pos_id.as_ref(),
            _ => None,
        }
    }

    /// Replaces the position identifier on a carrier record.
    pub fn set_pos_id(&mut self, pos_id: Option<PosId>) -> Result<()> {
        match &mut self.body {
            RecordBody::Element(node) => node.pos_id = pos_id,
            RecordBody::Text(node) => node.pos_id = pos_id,
            _ if pos_id.is_none() => {}
            _ => return Err(StrataError::Invariant("record cannot carry a position id")),
        }
        Ok(())
    }

    /// Qualified name of a name-bearing record.
    pub fn name(&self) -> Option<&QName> {
        match &self.body {
            RecordBody::Element(node) => Some(&node.name),
            RecordBody::Attribute(node) => Some(&node.name),
            RecordBody::Namespace(node) => Some(&node.name),
            RecordBody::Path(node) => Some(&node.name),
            _ => None,
        }
    }

    /// Path-summary reference of a name-bearing primary record.
    pub fn path_node_key(&self) -> Option<u64> {
        match &self.body {
            RecordBody::Element(node) => Some(node.path_node_key),
            RecordBody::Attribute(node) => Some(node.path_node_key),
            RecordBody::Namespace(node) => Some(node.path_node_key),
            _ => None,
        }
    }

    /// Replaces the path-summary reference of a name-bearing record.
    pub fn set_path_node_key(&mut self, key: u64) -> Result<()> {
        match &mut self.body {
            RecordBody::Element(node) => node.path_node_key = key,
            RecordBody::Attribute(node) => node.path_node_key = key,
            RecordBody::Namespace(node) => node.path_node_key = key,
            _ => return Err(StrataError::Invariant("record has no path reference")),
        }
        Ok(())
    }

    /// Replaces the name of a name-bearing record.
    pub fn set_name(&mut self, name: QName) -> Result<()> {
        match &mut self.body {
            RecordBody::Element(node) => node.name = name,
            RecordBody::Attribute(node) => node.name = name,
            RecordBody::Namespace(node) => node.name = name,
            RecordBody::Path(node) => node.name = name,
            _ => return Err(StrataError::Invariant("record has no name")),
        }
        Ok(())
    }

    /// Parent record key, if any.
    pub fn parent(&self) -> Option<u64> {
        match &self.body {
            RecordBody::Document(node) => node.structure.parent,
            RecordBody::Element(node) => node.structure.parent,
            RecordBody::Attribute(node) => Some(node.parent),
            RecordBody::Namespace(node) => Some(node.parent),
            RecordBody::Text(node) => Some(node.parent),
            RecordBody::Path(node) => node.structure.parent,
        }
    }

    /// Structural links of document, element or path records.
    pub fn structure(&self) -> Option<&StructNode> {
        match &self.body {
            RecordBody::Document(node) => Some(&node.structure),
            RecordBody::Element(node) => Some(&node.structure),
            RecordBody::Path(node) => Some(&node.structure),
            _ => None,
        }
    }

    /// Mutable structural links of document, element or path records.
    pub fn structure_mut(&mut self) -> Option<&mut StructNode> {
        match &mut self.body {
            RecordBody::Document(node) => Some(&mut node.structure),
            RecordBody::Element(node) => Some(&mut node.structure),
            RecordBody::Path(node) => Some(&mut node.structure),
            _ => None,
        }
    }

    /// First child, for records with structure.
    pub fn first_child(&self) -> Option<u64> {
        self.structure().and_then(|s| s.first_child)
    }

    /// Left sibling, honoring the text-node layout.
    pub fn left_sibling(&self) -> Option<u64> {
        match &self.body {
            RecordBody::Text(node) => node.left_sibling,
            _ => self.structure().and_then(|s| s.left_sibling),
        }
    }

    /// Right sibling, honoring the text-node layout.
    pub fn right_sibling(&self) -> Option<u64> {
        match &self.body {
            RecordBody::Text(node) => node.right_sibling,
            _ => self.structure().and_then(|s| s.right_sibling),
        }
    }

    /// Sets the left sibling on any sibling-bearing record.
    pub fn set_left_sibling(&mut self, key: Option<u64>) -> Result<()> {
        match &mut self.body {
            RecordBody::Text(node) => node.left_sibling = key,
            _ => {
                self.structure_mut()
                    .ok_or(StrataError::Invariant("record has no siblings"))?
                    .left_sibling = key;
            }
        }
        Ok(())
    }

    /// Sets the right sibling on any sibling-bearing record.
    pub fn set_right_sibling(&mut self, key: Option<u64>) -> Result<()> {
        match &mut self.body {
            RecordBody::Text(node) => node.right_sibling = key,
            _ => {
                self.structure_mut()
                    .ok_or(StrataError::Invariant("record has no siblings"))?
                    .right_sibling = key;
            }
        }
        Ok(())
    }

    /// Sets the parent on any record.
    pub fn set_parent(&mut self, key: u64) -> Result<()> {
        match &mut self.body {
            RecordBody::Attribute(node) => node.parent = key,
            RecordBody::Namespace(node) => node.parent = key,
            RecordBody::Text(node) => node.parent = key,
            _ => {
                self.structure_mut()
                    .ok_or(StrataError::Invariant("record has no parent link"))?
                    .parent = Some(key);
            }
        }
        Ok(())
    }

    /// The payload as a path node, failing on any other kind.
    pub fn as_path(&self) -> Result<&PathNode> {
        match &self.body {
            RecordBody::Path(node) => Ok(node),
            _ => Err(StrataError::Invariant("expected a path-summary record")),
        }
    }

    /// Mutable variant of [`Record::as_path`].
    pub fn as_path_mut(&mut self) -> Result<&mut PathNode> {
        match &mut self.body {
            RecordBody::Path(node) => Ok(node),
            _ => Err(StrataError::Invariant("expected a path-summary record")),
        }
    }
}

/// External codec seam: how records are laid out inside page slots.
///
/// The record key and the optional position identifier live at the page
/// level and are passed back in on deserialization.
pub trait RecordCodec: Send + Sync {
    /// Serializes `record` into `out`.
    fn serialize(&self, record: &Record, out: &mut Vec<u8>) -> Result<()>;
    /// Rebuilds a record from `bytes`, attaching `key` and `pos_id`.
    fn deserialize(&self, bytes: &[u8], key: u64, pos_id: Option<PosId>) -> Result<Record>;
}

/// Default codec for the built-in record model.
pub struct NodeCodec;

fn put_ref(out: &mut Vec<u8>, value: Option<u64>) {
    put_u64(out, value.unwrap_or(NULL_REF));
}

fn get_ref(reader: &mut ByteReader<'_>) -> Result<Option<u64>> {
    let value = reader.get_u64()?;
    Ok(if value == NULL_REF { None } else { Some(value) })
}

fn put_structure(out: &mut Vec<u8>, structure: &StructNode) {
    put_ref(out, structure.parent);
    put_ref(out, structure.left_sibling);
    put_ref(out, structure.right_sibling);
    put_ref(out, structure.first_child);
    put_u64(out, structure.child_count);
}

fn get_structure(reader: &mut ByteReader<'_>) -> Result<StructNode> {
    Ok(StructNode {
        parent: get_ref(reader)?,
        left_sibling: get_ref(reader)?,
        right_sibling: get_ref(reader)?,
        first_child: get_ref(reader)?,
        child_count: reader.get_u64()?,
    })
}

fn put_qname(out: &mut Vec<u8>, name: &QName) -> Result<()> {
    put_string(out, &name.uri)?;
    put_string(out, &name.prefix)?;
    put_string(out, &name.local)
}

fn get_qname(reader: &mut ByteReader<'_>) -> Result<QName> {
    Ok(QName {
        uri: reader.get_string()?,
        prefix: reader.get_string()?,
        local: reader.get_string()?,
    })
}

fn put_keys(out: &mut Vec<u8>, keys: &[u64]) -> Result<()> {
    let count: u32 = keys
        .len()
        .try_into()
        .map_err(|_| StrataError::Serialization("too many child references".into()))?;
    put_u32(out, count);
    for key in keys {
        put_u64(out, *key);
    }
    Ok(())
}

fn get_keys(reader: &mut ByteReader<'_>) -> Result<Vec<u64>> {
    let count = reader.get_u32()? as usize;
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        keys.push(reader.get_u64()?);
    }
    Ok(keys)
}

impl RecordCodec for NodeCodec {
    fn serialize(&self, record: &Record, out: &mut Vec<u8>) -> Result<()> {
        out.push(record.kind().tag());
        match &record.body {
            RecordBody::Document(node) => {
                put_structure(out, &node.structure);
            }
            RecordBody::Element(node) => {
                put_structure(out, &node.structure);
                put_qname(out, &node.name)?;
                put_u64(out, node.path_node_key);
                put_keys(out, &node.attributes)?;
                put_keys(out, &node.namespaces)?;
            }
            RecordBody::Attribute(node) => {
                put_u64(out, node.parent);
                put_qname(out, &node.name)?;
                put_string(out, &node.value)?;
                put_u64(out, node.path_node_key);
            }
            RecordBody::Namespace(node) => {
                put_u64(out, node.parent);
                put_qname(out, &node.name)?;
                put_u64(out, node.path_node_key);
            }
            RecordBody::Text(node) => {
                put_u64(out, node.parent);
                put_ref(out, node.left_sibling);
                put_ref(out, node.right_sibling);
                put_string(out, &node.value)?;
            }
            RecordBody::Path(node) => {
                put_structure(out, &node.structure);
                put_qname(out, &node.name)?;
                out.push(node.kind.tag());
                put_u32(out, node.level);
                put_u64(out, node.references);
            }
        }
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8], key: u64, pos_id: Option<PosId>) -> Result<Record> {
        let mut reader = ByteReader::new(bytes);
        let kind = NodeKind::from_tag(reader.get_u8()?)?;
        let body = match kind {
            NodeKind::Document => RecordBody::Document(DocumentNode {
                structure: get_structure(&mut reader)?,
            }),
            NodeKind::Element => RecordBody::Element(ElementNode {
                structure: get_structure(&mut reader)?,
                name: get_qname(&mut reader)?,
                path_node_key: reader.get_u64()?,
                attributes: get_keys(&mut reader)?,
                namespaces: get_keys(&mut reader)?,
                pos_id,
            }),
            NodeKind::Attribute => RecordBody::Attribute(AttributeNode {
                parent: reader.get_u64()?,
                name: get_qname(&mut reader)?,
                value: reader.get_string()?,
                path_node_key: reader.get_u64()?,
            }),
            NodeKind::Namespace => RecordBody::Namespace(NamespaceNode {
                parent: reader.get_u64()?,
                name: get_qname(&mut reader)?,
                path_node_key: reader.get_u64()?,
            }),
            NodeKind::Text => RecordBody::Text(TextNode {
                parent: reader.get_u64()?,
                left_sibling: get_ref(&mut reader)?,
                right_sibling: get_ref(&mut reader)?,
                value: reader.get_string()?,
                pos_id,
            }),
            NodeKind::Path => RecordBody::Path(PathNode {
                structure: get_structure(&mut reader)?,
                name: get_qname(&mut reader)?,
                kind: NodeKind::from_tag(reader.get_u8()?)?,
                level: reader.get_u32()?,
                references: reader.get_u64()?,
            }),
        };
        reader.ensure_consumed()?;
        Ok(Record { key, body })
    }
}

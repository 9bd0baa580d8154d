//! Page model of the append-only revision log.
//!
//! Three page kinds travel through the log: record pages holding slotted
//! records, overflow pages holding one oversized record payload, and the
//! revision root that anchors a committed revision. Every serialized page
//! starts with a one-byte kind tag.

mod container;
mod record;
mod revision_root;

pub use container::PageContainer;
pub use record::RecordPage;
pub use revision_root::RevisionRootPage;

use crate::bytes::{put_u32, ByteReader};
use crate::error::{Result, StrataError};
use crate::node::RecordCodec;
use crate::settings::ResourceSettings;

const TAG_RECORD: u8 = 1;
const TAG_OVERFLOW: u8 = 2;
const TAG_REVISION_ROOT: u8 = 3;

/// Keyspace a record page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubtreeKind {
    /// Primary document tree.
    Document,
    /// Path-summary tree.
    PathSummary,
}

impl SubtreeKind {
    fn tag(self) -> u8 {
        match self {
            SubtreeKind::Document => 0,
            SubtreeKind::PathSummary => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => SubtreeKind::Document,
            1 => SubtreeKind::PathSummary,
            _ => {
                return Err(StrataError::Corruption(format!(
                    "unknown subtree tag {tag}"
                )))
            }
        })
    }
}

/// Reference from a page to another page: a log offset once persisted,
/// an in-memory page while still dirty, or both after a write-through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRef {
    /// Log offset of the persisted page, if it has been appended.
    pub offset: Option<u64>,
}

impl PageRef {
    /// Reference to a page already in the log.
    pub fn at(offset: u64) -> Self {
        Self {
            offset: Some(offset),
        }
    }
}

/// Overflow page: the serialized payload of a single oversized record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowPage {
    /// Serialized record bytes, exactly as the codec produced them.
    pub data: Vec<u8>,
}

impl OverflowPage {
    fn serialize(&self, out: &mut Vec<u8>) -> Result<()> {
        let len: u32 = self
            .data
            .len()
            .try_into()
            .map_err(|_| StrataError::Serialization("overflow payload too large".into()))?;
        put_u32(out, len);
        out.extend_from_slice(&self.data);
        Ok(())
    }

    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self> {
        let len = reader.get_u32()? as usize;
        let data = reader.get_bytes(len)?.to_vec();
        Ok(Self { data })
    }
}

/// A page as it travels through the log.
#[derive(Debug)]
pub enum Page {
    /// Slotted record page.
    Record(RecordPage),
    /// Single oversized record payload.
    Overflow(OverflowPage),
    /// Revision anchor.
    RevisionRoot(RevisionRootPage),
}

impl Page {
    /// Serializes the page with its leading kind tag. `settings` drives
    /// the position-identifier layout of record pages.
    pub fn to_bytes(&self, settings: &ResourceSettings) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Page::Record(page) => {
                out.push(TAG_RECORD);
                page.serialize(&mut out, settings)?;
            }
            Page::Overflow(page) => {
                out.push(TAG_OVERFLOW);
                page.serialize(&mut out)?;
            }
            Page::RevisionRoot(page) => {
                out.push(TAG_REVISION_ROOT);
                page.serialize(&mut out)?;
            }
        }
        Ok(out)
    }

    /// Decodes a page from a log frame. `settings` drives the
    /// position-identifier layout of record pages.
    pub fn from_bytes(bytes: &[u8], settings: &ResourceSettings) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let page = match reader.get_u8()? {
            TAG_RECORD => Page::Record(RecordPage::deserialize(&mut reader, settings)?),
            TAG_OVERFLOW => Page::Overflow(OverflowPage::deserialize(&mut reader)?),
            TAG_REVISION_ROOT => Page::RevisionRoot(RevisionRootPage::deserialize(&mut reader)?),
            tag => return Err(StrataError::Corruption(format!("unknown page tag {tag}"))),
        };
        reader.ensure_consumed()?;
        Ok(page)
    }

    /// The record page inside, failing on any other kind.
    pub fn into_record(self) -> Result<RecordPage> {
        match self {
            Page::Record(page) => Ok(page),
            _ => Err(StrataError::Corruption("expected a record page".into())),
        }
    }

    /// The overflow page inside, failing on any other kind.
    pub fn into_overflow(self) -> Result<OverflowPage> {
        match self {
            Page::Overflow(page) => Ok(page),
            _ => Err(StrataError::Corruption("expected an overflow page".into())),
        }
    }

    /// The revision root inside, failing on any other kind.
    pub fn into_revision_root(self) -> Result<RevisionRootPage> {
        match self {
            Page::RevisionRoot(page) => Ok(page),
            _ => Err(StrataError::Corruption("expected a revision root".into())),
        }
    }
}

/// Record codec plus resource settings, threaded through page
/// (de)serialization and overflow classification.
pub struct PageContext<'a> {
    /// Codec for record payloads.
    pub codec: &'a dyn RecordCodec,
    /// Layout and threshold settings.
    pub settings: &'a ResourceSettings,
}

//! Revision anchor: the page the root pointer publishes.

use std::collections::BTreeMap;

use crate::bytes::{put_u64, put_varint, ByteReader};
use crate::error::Result;
use crate::page::SubtreeKind;

/// Root page of one committed revision. Holds the key-allocation high
/// water marks and, per subtree, the directory mapping page keys to the
/// log offsets of their current shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRootPage {
    /// Revision number, starting at 1.
    pub revision: u64,
    /// Log offset of the previous revision's root, if any.
    pub previous_root: Option<u64>,
    /// Next unassigned document record key.
    pub next_document_key: u64,
    /// Next unassigned path-summary record key.
    pub next_summary_key: u64,
    /// Document-subtree page directory.
    pub document_pages: BTreeMap<u64, u64>,
    /// Path-summary page directory.
    pub summary_pages: BTreeMap<u64, u64>,
}

impl RevisionRootPage {
    /// Root of the empty initial revision.
    pub fn initial() -> Self {
        Self {
            revision: 1,
            previous_root: None,
            // Key 0 is the root record of each subtree.
            next_document_key: 1,
            next_summary_key: 1,
            document_pages: BTreeMap::new(),
            summary_pages: BTreeMap::new(),
        }
    }

    /// Root for the revision following this one, sharing every page
    /// until the new transaction rewrites it.
    pub fn next(&self, own_offset: u64) -> Self {
        let mut next = self.clone();
        next.revision = self.revision + 1;
        next.previous_root = Some(own_offset);
        next
    }

    /// Page directory of `subtree`.
    pub fn directory(&self, subtree: SubtreeKind) -> &BTreeMap<u64, u64> {
        match subtree {
            SubtreeKind::Document => &self.document_pages,
            SubtreeKind::PathSummary => &self.summary_pages,
        }
    }

    /// Mutable page directory of `subtree`.
    pub fn directory_mut(&mut self, subtree: SubtreeKind) -> &mut BTreeMap<u64, u64> {
        match subtree {
            SubtreeKind::Document => &mut self.document_pages,
            SubtreeKind::PathSummary => &mut self.summary_pages,
        }
    }

    fn put_directory(out: &mut Vec<u8>, directory: &BTreeMap<u64, u64>) {
        put_varint(out, directory.len() as u64);
        for (page_key, offset) in directory {
            put_varint(out, *page_key);
            put_u64(out, *offset);
        }
    }

    fn get_directory(reader: &mut ByteReader<'_>) -> Result<BTreeMap<u64, u64>> {
        let count = reader.get_varint()? as usize;
        let mut directory = BTreeMap::new();
        for _ in 0..count {
            let page_key = reader.get_varint()?;
            let offset = reader.get_u64()?;
            directory.insert(page_key, offset);
        }
        Ok(directory)
    }

    /// Writes the page body (everything after the page tag).
    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<()> {
        put_u64(out, self.revision);
        match self.previous_root {
            Some(offset) => {
                out.push(1);
                put_u64(out, offset);
            }
            None => out.push(0),
        }
        put_u64(out, self.next_document_key);
        put_u64(out, self.next_summary_key);
        Self::put_directory(out, &self.document_pages);
        Self::put_directory(out, &self.summary_pages);
        Ok(())
    }

    /// Reads a page body produced by [`RevisionRootPage::serialize`].
    pub fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self> {
        let revision = reader.get_u64()?;
        let previous_root = match reader.get_u8()? {
            0 => None,
            _ => Some(reader.get_u64()?),
        };
        let next_document_key = reader.get_u64()?;
        let next_summary_key = reader.get_u64()?;
        let document_pages = Self::get_directory(reader)?;
        let summary_pages = Self::get_directory(reader)?;
        Ok(Self {
            revision,
            previous_root,
            next_document_key,
            next_summary_key,
            document_pages,
            summary_pages,
        })
    }
}

//! Slotted record page: one page-key shard of a subtree's records.
//!
//! Records live in three states inside a page: decoded (`records`),
//! serialized inline (`slots`, produced by deserialization or by
//! classification) and promoted to overflow (`overflow`). `get` resolves
//! through all three; a failed overflow read degrades to absent.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::bytes::{put_u32, put_u64, put_varint, ByteReader};
use crate::dewey::{self, PosId};
use crate::error::{Result, StrataError};
use crate::io::PageLog;
use crate::page::{Page, PageContext, PageRef, SubtreeKind};
use crate::node::Record;

/// One page-key shard of a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage {
    pub(crate) page_key: u64,
    pub(crate) subtree: SubtreeKind,
    /// Decoded records, authoritative when present.
    pub(crate) records: BTreeMap<u64, Record>,
    /// Serialized inline payloads not yet decoded.
    pub(crate) slots: BTreeMap<u64, Vec<u8>>,
    /// Position identifiers of serialized inline payloads.
    pub(crate) pos_ids: BTreeMap<u64, PosId>,
    /// Overflow references for oversized records.
    pub(crate) overflow: BTreeMap<u64, PageRef>,
    /// Log offset of this shard in the previous revision.
    pub(crate) previous: Option<u64>,
    pub(crate) dirty: bool,
    /// Whether every decoded record has been classified since the last
    /// mutation.
    classified: bool,
}

impl RecordPage {
    /// Fresh, empty shard.
    pub fn new(page_key: u64, subtree: SubtreeKind) -> Self {
        Self {
            page_key,
            subtree,
            records: BTreeMap::new(),
            slots: BTreeMap::new(),
            pos_ids: BTreeMap::new(),
            overflow: BTreeMap::new(),
            previous: None,
            dirty: false,
            classified: false,
        }
    }

    /// Empty shard sharing this page's identity (page key, subtree,
    /// previous pointer) but none of its contents.
    pub fn clone_identity(&self) -> Self {
        let mut page = Self::new(self.page_key, self.subtree);
        page.previous = self.previous;
        page
    }

    /// Page key of this shard.
    pub fn page_key(&self) -> u64 {
        self.page_key
    }

    /// Subtree this shard belongs to.
    pub fn subtree(&self) -> SubtreeKind {
        self.subtree
    }

    /// Previous-revision offset of this shard, if any.
    pub fn previous(&self) -> Option<u64> {
        self.previous
    }

    /// Points this shard at its previous-revision frame.
    pub fn set_previous(&mut self, offset: Option<u64>) {
        self.previous = offset;
    }

    /// Whether the page has uncommitted modifications.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True when the page holds no record in any state.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.slots.is_empty() && self.overflow.is_empty()
    }

    /// Keys of every record held by this page, in any state.
    pub fn keys(&self) -> BTreeSet<u64> {
        let mut keys: BTreeSet<u64> = self.records.keys().copied().collect();
        keys.extend(self.slots.keys().copied());
        keys.extend(self.overflow.keys().copied());
        keys
    }

    /// Whether the page holds `key` in any state.
    pub fn contains(&self, key: u64) -> bool {
        self.records.contains_key(&key)
            || self.slots.contains_key(&key)
            || self.overflow.contains_key(&key)
    }

    /// Looks up a record, decoding an inline slot or resolving an
    /// overflow reference on demand. Absence is not an error, and a
    /// failed overflow read is reported as absent.
    pub fn get(
        &mut self,
        key: u64,
        ctx: &PageContext<'_>,
        log: &PageLog,
    ) -> Result<Option<&Record>> {
        if !self.records.contains_key(&key) {
            // Decoded records are cached; the serialized state stays in
            // place so an untouched page serializes unchanged.
            if let Some(bytes) = self.slots.get(&key) {
                let pos_id = self.pos_ids.get(&key).cloned();
                let record = ctx.codec.deserialize(bytes, key, pos_id)?;
                self.records.insert(key, record);
            } else if let Some(reference) = self.overflow.get(&key) {
                let Some(offset) = reference.offset else {
                    return Err(StrataError::Invariant("unresolved overflow reference"));
                };
                let bytes = match log.read_frame(offset) {
                    Ok(bytes) => bytes,
                    Err(StrataError::Io(err)) => {
                        warn!(key, offset, error = %err, "overflow page unreadable");
                        return Ok(None);
                    }
                    Err(err) => return Err(err),
                };
                let page = Page::from_bytes(&bytes, ctx.settings)?.into_overflow()?;
                let record = ctx.codec.deserialize(&page.data, key, None)?;
                self.records.insert(key, record);
            }
        }
        Ok(self.records.get(&key))
    }

    /// Replaces the slot for the record's key. Any prior classification
    /// is invalidated.
    pub fn set(&mut self, record: Record) {
        let key = record.key;
        self.slots.remove(&key);
        self.pos_ids.remove(&key);
        self.overflow.remove(&key);
        self.records.insert(key, record);
        self.classified = false;
        self.dirty = true;
    }

    /// Drops the record with `key` from every state.
    pub fn remove(&mut self, key: u64) {
        self.records.remove(&key);
        self.slots.remove(&key);
        self.pos_ids.remove(&key);
        self.overflow.remove(&key);
        self.dirty = true;
    }

    /// Classifies every decoded record: payloads strictly above the
    /// inline threshold are returned for overflow persistence, the rest
    /// become inline slots. A payload exactly at the threshold stays
    /// inline. The caller must persist each returned payload and record
    /// its offset via [`RecordPage::set_overflow_ref`] before
    /// serializing.
    pub fn classify(&mut self, ctx: &PageContext<'_>) -> Result<Vec<(u64, Vec<u8>)>> {
        let mut spilled = Vec::new();
        let decoded = std::mem::take(&mut self.records);
        for (key, record) in decoded {
            let mut bytes = Vec::new();
            ctx.codec.serialize(&record, &mut bytes)?;
            if bytes.len() > ctx.settings.inline_threshold {
                spilled.push((key, bytes));
            } else {
                if let Some(pos_id) = record.pos_id() {
                    self.pos_ids.insert(key, pos_id.clone());
                }
                self.slots.insert(key, bytes);
            }
        }
        self.classified = true;
        Ok(spilled)
    }

    /// Registers the persisted offset of a spilled record.
    pub fn set_overflow_ref(&mut self, key: u64, offset: u64) {
        self.overflow.insert(key, PageRef::at(offset));
    }

    /// Writes the page body (everything after the page tag). The page
    /// must be classified. The position-identifier section exists only
    /// when the resource stores identifiers.
    pub fn serialize(
        &self,
        out: &mut Vec<u8>,
        settings: &crate::settings::ResourceSettings,
    ) -> Result<()> {
        if !self.classified && !self.records.is_empty() {
            return Err(StrataError::Invariant("record page serialized unclassified"));
        }
        put_varint(out, self.page_key);
        // Inline slots split by position identifier: identifier-bearing
        // entries first, ordered for delta encoding, then the rest.
        let mut with_pos: Vec<(&PosId, u64, &Vec<u8>)> = Vec::new();
        let mut without_pos: Vec<(u64, &Vec<u8>)> = Vec::new();
        for (key, bytes) in &self.slots {
            match self.pos_ids.get(key) {
                Some(pos_id) => with_pos.push((pos_id, *key, bytes)),
                None => without_pos.push((*key, bytes)),
            }
        }
        if settings.position_ids {
            // Serialization order is by byte length, then bytes, which
            // keeps shared prefixes adjacent for the delta encoder.
            with_pos.sort_by(|a, b| {
                (a.0.bytes().len(), a.0.bytes()).cmp(&(b.0.bytes().len(), b.0.bytes()))
            });
            put_varint(out, with_pos.len() as u64);
            let mut prev: Option<&PosId> = None;
            for (pos_id, key, bytes) in &with_pos {
                dewey::encode(out, prev, pos_id);
                put_varint(out, *key);
                let len: u32 = bytes
                    .len()
                    .try_into()
                    .map_err(|_| StrataError::Serialization("record payload too large".into()))?;
                put_u32(out, len);
                out.extend_from_slice(bytes);
                prev = Some(pos_id);
            }
        } else if !with_pos.is_empty() {
            return Err(StrataError::Invariant(
                "position identifiers present but disabled",
            ));
        }
        put_varint(out, without_pos.len() as u64);
        for (key, bytes) in &without_pos {
            put_varint(out, *key);
            let len: u32 = bytes
                .len()
                .try_into()
                .map_err(|_| StrataError::Serialization("record payload too large".into()))?;
            put_u32(out, len);
            out.extend_from_slice(bytes);
        }
        put_varint(out, self.overflow.len() as u64);
        for (key, reference) in &self.overflow {
            let offset = reference
                .offset
                .ok_or(StrataError::Invariant("unresolved overflow reference"))?;
            put_u64(out, *key);
            put_u64(out, offset);
        }
        match self.previous {
            Some(offset) => {
                out.push(1);
                put_u64(out, offset);
            }
            None => out.push(0),
        }
        out.push(self.subtree.tag());
        Ok(())
    }

    /// Reads a page body produced by [`RecordPage::serialize`]. Inline
    /// payloads stay serialized until first access.
    pub fn deserialize(
        reader: &mut ByteReader<'_>,
        settings: &crate::settings::ResourceSettings,
    ) -> Result<Self> {
        let page_key = reader.get_varint()?;
        let mut slots = BTreeMap::new();
        let mut pos_ids = BTreeMap::new();
        if settings.position_ids {
            let with_pos = reader.get_varint()? as usize;
            let mut prev: Option<PosId> = None;
            for _ in 0..with_pos {
                let pos_id = dewey::decode(reader, prev.as_ref())?;
                let key = reader.get_varint()?;
                let len = reader.get_u32()? as usize;
                slots.insert(key, reader.get_bytes(len)?.to_vec());
                pos_ids.insert(key, pos_id.clone());
                prev = Some(pos_id);
            }
        }
        let without_pos = reader.get_varint()? as usize;
        for _ in 0..without_pos {
            let key = reader.get_varint()?;
            let len = reader.get_u32()? as usize;
            slots.insert(key, reader.get_bytes(len)?.to_vec());
        }
        let mut overflow = BTreeMap::new();
        let overflow_count = reader.get_varint()? as usize;
        for _ in 0..overflow_count {
            let key = reader.get_u64()?;
            let offset = reader.get_u64()?;
            overflow.insert(key, PageRef::at(offset));
        }
        let previous = match reader.get_u8()? {
            0 => None,
            1 => Some(reader.get_u64()?),
            tag => {
                return Err(StrataError::Corruption(format!(
                    "bad previous-pointer tag {tag}"
                )))
            }
        };
        let subtree = SubtreeKind::from_tag(reader.get_u8()?)?;
        Ok(Self {
            page_key,
            subtree,
            records: BTreeMap::new(),
            slots,
            pos_ids,
            overflow,
            previous,
            dirty: false,
            classified: true,
        })
    }
}

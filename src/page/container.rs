//! Dual-view page container used by write transactions.
//!
//! A loaded container pairs the page as last committed (`complete`) with
//! the working copy (`modified`) and the set of keys removed in this
//! transaction. The `Empty` variant is the "nothing cached yet" sentinel
//! and is distinguishable from a container of genuinely empty pages.

use std::collections::BTreeSet;

use crate::bytes::put_u32;
use crate::error::{Result, StrataError};
use crate::page::RecordPage;

/// Stable and working views of one page-key shard.
#[derive(Debug)]
pub enum PageContainer {
    /// Nothing cached for this page key yet.
    Empty,
    /// Page views owned by the current write transaction.
    Loaded {
        /// Committed state, never mutated after load.
        complete: RecordPage,
        /// Working copy receiving this transaction's writes.
        modified: RecordPage,
        /// Keys removed in this transaction.
        removed: BTreeSet<u64>,
    },
}

impl PageContainer {
    /// Builds a container from the committed page alone. The working
    /// copy starts with the page's identity and no contents.
    pub fn from_complete(complete: RecordPage) -> Self {
        let modified = complete.clone_identity();
        PageContainer::Loaded {
            complete,
            modified,
            removed: BTreeSet::new(),
        }
    }

    /// Whether this is the sentinel.
    pub fn is_empty_sentinel(&self) -> bool {
        matches!(self, PageContainer::Empty)
    }

    /// Committed view. Fails on the sentinel.
    pub fn complete(&self) -> Result<&RecordPage> {
        match self {
            PageContainer::Loaded { complete, .. } => Ok(complete),
            PageContainer::Empty => Err(StrataError::Invariant("empty page container")),
        }
    }

    /// Working view. Fails on the sentinel.
    pub fn modified(&self) -> Result<&RecordPage> {
        match self {
            PageContainer::Loaded { modified, .. } => Ok(modified),
            PageContainer::Empty => Err(StrataError::Invariant("empty page container")),
        }
    }

    /// Mutable working view. Fails on the sentinel.
    pub fn modified_mut(&mut self) -> Result<&mut RecordPage> {
        match self {
            PageContainer::Loaded { modified, .. } => Ok(modified),
            PageContainer::Empty => Err(StrataError::Invariant("empty page container")),
        }
    }

    /// Marks `key` removed and drops it from the working copy.
    pub fn remove(&mut self, key: u64) -> Result<()> {
        match self {
            PageContainer::Loaded {
                modified, removed, ..
            } => {
                modified.remove(key);
                removed.insert(key);
                Ok(())
            }
            PageContainer::Empty => Err(StrataError::Invariant("empty page container")),
        }
    }

    /// Whether the transaction wrote or removed anything here.
    pub fn is_changed(&self) -> bool {
        match self {
            PageContainer::Loaded {
                modified, removed, ..
            } => modified.is_dirty() || !removed.is_empty(),
            PageContainer::Empty => false,
        }
    }

    /// Whether `key` was removed in this transaction.
    pub fn is_removed(&self, key: u64) -> bool {
        match self {
            PageContainer::Loaded { removed, .. } => removed.contains(&key),
            PageContainer::Empty => false,
        }
    }

    /// Folds every committed record the transaction left untouched into
    /// the working copy, making it the page's full next-revision state.
    /// Committed overflow references are carried by offset, their bytes
    /// never change.
    pub fn seal(&mut self) -> Result<()> {
        let PageContainer::Loaded {
            complete,
            modified,
            removed,
        } = self
        else {
            return Err(StrataError::Invariant("empty page container"));
        };
        for key in complete.keys() {
            if removed.contains(&key) || modified.contains(key) {
                continue;
            }
            if let Some(reference) = complete.overflow.get(&key) {
                modified.overflow.insert(key, reference.clone());
            } else if let Some(bytes) = complete.slots.get(&key) {
                modified.slots.insert(key, bytes.clone());
                if let Some(pos_id) = complete.pos_ids.get(&key) {
                    modified.pos_ids.insert(key, pos_id.clone());
                }
            } else if let Some(record) = complete.records.get(&key) {
                modified.set(record.clone());
            }
        }
        Ok(())
    }

    /// Serializes both views back to back, each length-prefixed, for
    /// embedding in an external cache entry.
    pub fn serialize(
        &self,
        out: &mut Vec<u8>,
        settings: &crate::settings::ResourceSettings,
    ) -> Result<()> {
        let PageContainer::Loaded {
            complete, modified, ..
        } = self
        else {
            return Err(StrataError::Invariant("empty page container"));
        };
        for page in [complete, modified] {
            let mut body = Vec::new();
            page.serialize(&mut body, settings)?;
            let len: u32 = body
                .len()
                .try_into()
                .map_err(|_| StrataError::Serialization("container page too large".into()))?;
            put_u32(out, len);
            out.extend_from_slice(&body);
        }
        Ok(())
    }
}

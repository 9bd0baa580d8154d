//! Read and write transaction contexts.
//!
//! A read transaction is pinned to one committed revision and caches the
//! pages it touches. The write transaction is exclusive per resource; it
//! owns dual-view containers for every page it loads and turns them into
//! the next revision at commit. Abort is a plain drop, nothing reaches
//! the log.

use std::collections::{btree_map::Entry, BTreeMap};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::MutexGuard;
use tracing::{debug, trace};

use crate::error::{Result, StrataError};
use crate::node::Record;
use crate::page::{
    OverflowPage, Page, PageContainer, RecordPage, RevisionRootPage, SubtreeKind,
};
use crate::resource::Resource;

const READ_CACHE_PAGES: usize = 256;

/// Anything that can produce records by key, used by subtree walks that
/// run against either transaction kind.
pub trait RecordSource {
    /// Looks up a record; absence is soft.
    fn record(&mut self, subtree: SubtreeKind, key: u64) -> Result<Option<Record>>;
}

/// Revision-pinned read transaction.
pub struct ReadTrx<'r> {
    resource: &'r Resource,
    root: RevisionRootPage,
    cache: LruCache<(SubtreeKind, u64), RecordPage>,
}

impl<'r> ReadTrx<'r> {
    pub(crate) fn new(resource: &'r Resource, root: RevisionRootPage) -> Self {
        let capacity = NonZeroUsize::new(READ_CACHE_PAGES)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            resource,
            root,
            cache: LruCache::new(capacity),
        }
    }

    /// Revision this transaction reads.
    pub fn revision(&self) -> u64 {
        self.root.revision
    }

    /// Looks up a committed record.
    pub fn get_record(&mut self, subtree: SubtreeKind, key: u64) -> Result<Option<Record>> {
        let resource = self.resource;
        let ctx = resource.page_ctx();
        let page_key = key / resource.settings().fan_out;
        if self.cache.get(&(subtree, page_key)).is_none() {
            let Some(&offset) = self.root.directory(subtree).get(&page_key) else {
                return Ok(None);
            };
            trace!(?subtree, page_key, offset, "loading page");
            let bytes = resource.log().read_frame(offset)?;
            let page = Page::from_bytes(&bytes, resource.settings())?.into_record()?;
            self.cache.put((subtree, page_key), page);
        }
        match self.cache.get_mut(&(subtree, page_key)) {
            Some(page) => Ok(page.get(key, &ctx, resource.log())?.cloned()),
            None => Ok(None),
        }
    }
}

impl RecordSource for ReadTrx<'_> {
    fn record(&mut self, subtree: SubtreeKind, key: u64) -> Result<Option<Record>> {
        self.get_record(subtree, key)
    }
}

/// Exclusive write transaction building the next revision.
pub struct WriteTrx<'r> {
    resource: &'r Resource,
    _token: MutexGuard<'r, ()>,
    root: RevisionRootPage,
    containers: BTreeMap<(SubtreeKind, u64), PageContainer>,
}

impl<'r> WriteTrx<'r> {
    pub(crate) fn new(
        resource: &'r Resource,
        token: MutexGuard<'r, ()>,
        root: RevisionRootPage,
    ) -> Self {
        Self {
            resource,
            _token: token,
            root,
            containers: BTreeMap::new(),
        }
    }

    /// Revision this transaction will publish.
    pub fn revision(&self) -> u64 {
        self.root.revision
    }

    pub(crate) fn settings(&self) -> &crate::settings::ResourceSettings {
        self.resource.settings()
    }

    /// Allocates a fresh record key in `subtree`. Keys are never reused.
    pub fn new_record_key(&mut self, subtree: SubtreeKind) -> u64 {
        let slot = match subtree {
            SubtreeKind::Document => &mut self.root.next_document_key,
            SubtreeKind::PathSummary => &mut self.root.next_summary_key,
        };
        let key = *slot;
        *slot += 1;
        key
    }

    fn load_container(
        &mut self,
        subtree: SubtreeKind,
        page_key: u64,
    ) -> Result<&mut PageContainer> {
        let Self {
            resource,
            root,
            containers,
            ..
        } = self;
        match containers.entry((subtree, page_key)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let container = match root.directory(subtree).get(&page_key) {
                    Some(&offset) => {
                        trace!(?subtree, page_key, offset, "loading page for write");
                        let bytes = resource.log().read_frame(offset)?;
                        let page =
                            Page::from_bytes(&bytes, resource.settings())?.into_record()?;
                        PageContainer::from_complete(page)
                    }
                    None => PageContainer::Empty,
                };
                Ok(entry.insert(container))
            }
        }
    }

    /// Looks up a record, preferring this transaction's own writes.
    pub fn get_record(&mut self, subtree: SubtreeKind, key: u64) -> Result<Option<Record>> {
        let resource = self.resource;
        let ctx = resource.page_ctx();
        let page_key = key / resource.settings().fan_out;
        match self.load_container(subtree, page_key)? {
            PageContainer::Empty => Ok(None),
            PageContainer::Loaded {
                complete,
                modified,
                removed,
            } => {
                if removed.contains(&key) {
                    return Ok(None);
                }
                if modified.contains(key) {
                    return Ok(modified.get(key, &ctx, resource.log())?.cloned());
                }
                Ok(complete.get(key, &ctx, resource.log())?.cloned())
            }
        }
    }

    /// Like [`WriteTrx::get_record`] but absence violates the caller's
    /// structural contract.
    pub fn expect_record(&mut self, subtree: SubtreeKind, key: u64) -> Result<Record> {
        self.get_record(subtree, key)?
            .ok_or(StrataError::NotFound("record"))
    }

    /// Writes a record into its shard's working copy.
    pub fn put_record(&mut self, subtree: SubtreeKind, record: Record) -> Result<()> {
        let page_key = record.key / self.resource.settings().fan_out;
        let key = record.key;
        let container = self.load_container(subtree, page_key)?;
        if container.is_empty_sentinel() {
            *container = PageContainer::from_complete(RecordPage::new(page_key, subtree));
        }
        if let PageContainer::Loaded { removed, .. } = container {
            removed.remove(&key);
        }
        container.modified_mut()?.set(record);
        Ok(())
    }

    /// Removes a record. Removing an absent record is a no-op.
    pub fn remove_record(&mut self, subtree: SubtreeKind, key: u64) -> Result<()> {
        let page_key = key / self.resource.settings().fan_out;
        let container = self.load_container(subtree, page_key)?;
        if container.is_empty_sentinel() {
            return Ok(());
        }
        container.remove(key)
    }

    /// Publishes this transaction's writes as the next revision and
    /// returns its number. On any error nothing becomes visible.
    pub fn commit(self) -> Result<u64> {
        let WriteTrx {
            resource,
            _token,
            mut root,
            containers,
        } = self;
        let ctx = resource.page_ctx();
        let log = resource.log();
        let mut pages_written = 0usize;
        for ((subtree, page_key), mut container) in containers {
            if container.is_empty_sentinel() || !container.is_changed() {
                continue;
            }
            container.seal()?;
            let PageContainer::Loaded { mut modified, .. } = container else {
                continue;
            };
            if modified.is_empty() {
                root.directory_mut(subtree).remove(&page_key);
                continue;
            }
            let old_offset = root.directory(subtree).get(&page_key).copied();
            modified.set_previous(old_offset);
            for (key, data) in modified.classify(&ctx)? {
                let frame = Page::Overflow(OverflowPage { data }).to_bytes(ctx.settings)?;
                let offset = log.append(&frame)?;
                modified.set_overflow_ref(key, offset);
            }
            let frame = Page::Record(modified).to_bytes(ctx.settings)?;
            let offset = log.append(&frame)?;
            root.directory_mut(subtree).insert(page_key, offset);
            pages_written += 1;
        }
        let revision = root.revision;
        let root_bytes = Page::RevisionRoot(root).to_bytes(ctx.settings)?;
        let root_offset = log.append(&root_bytes)?;
        log.publish_root(root_offset)?;
        debug!(revision, pages = pages_written, root_offset, "revision published");
        Ok(revision)
    }
}

impl RecordSource for WriteTrx<'_> {
    fn record(&mut self, subtree: SubtreeKind, key: u64) -> Result<Option<Record>> {
        self.get_record(subtree, key)
    }
}

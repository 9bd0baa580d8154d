//! Resource lifecycle: a directory holding the settings file and the
//! append-only page log, plus transaction entry points.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, StrataError};
use crate::io::{transform_for, PageLog, StdFileIo, NO_REVISION};
use crate::node::{
    DocumentNode, NodeCodec, NodeKind, PathNode, QName, Record, RecordBody, RecordCodec,
    ROOT_KEY,
};
use crate::page::{Page, PageContext, RevisionRootPage, SubtreeKind};
use crate::settings::{ResourceSettings, SETTINGS_FILE};
use crate::trx::{ReadTrx, WriteTrx};

const DATA_FILE: &str = "data.db";

/// One revisioned document store on disk.
pub struct Resource {
    path: PathBuf,
    settings: ResourceSettings,
    codec: Box<dyn RecordCodec>,
    log: PageLog,
    write_token: Mutex<()>,
}

impl Resource {
    /// Creates a resource directory with `settings` and commits the
    /// empty initial revision (the document root and the path-summary
    /// root). Creating over an existing resource keeps its persisted
    /// settings; committed pages stay decodable.
    pub fn create(dir: impl AsRef<Path>, settings: ResourceSettings) -> Result<Self> {
        Self::create_with_codec(dir, settings, Box::new(NodeCodec))
    }

    /// [`Resource::create`] with a caller-supplied record codec.
    pub fn create_with_codec(
        dir: impl AsRef<Path>,
        settings: ResourceSettings,
        codec: Box<dyn RecordCodec>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let settings = if dir.join(SETTINGS_FILE).exists() {
            ResourceSettings::load(dir)?
        } else {
            settings.save(dir)?;
            settings
        };
        let resource = Self::assemble(dir.to_path_buf(), settings, codec)?;
        if resource.log.root()? == NO_REVISION {
            resource.bootstrap()?;
        }
        Ok(resource)
    }

    /// Opens an existing resource, reading its settings file.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_codec(dir, Box::new(NodeCodec))
    }

    /// [`Resource::open`] with a caller-supplied record codec.
    pub fn open_with_codec(dir: impl AsRef<Path>, codec: Box<dyn RecordCodec>) -> Result<Self> {
        let dir = dir.as_ref();
        let settings = ResourceSettings::load(dir)?;
        Self::assemble(dir.to_path_buf(), settings, codec)
    }

    fn assemble(
        path: PathBuf,
        settings: ResourceSettings,
        codec: Box<dyn RecordCodec>,
    ) -> Result<Self> {
        let io = StdFileIo::open(path.join(DATA_FILE))?;
        let log = PageLog::open(Box::new(io), transform_for(settings.transform))?;
        Ok(Self {
            path,
            settings,
            codec,
            log,
            write_token: Mutex::new(()),
        })
    }

    fn bootstrap(&self) -> Result<()> {
        let mut trx = self.begin_write()?;
        trx.put_record(
            SubtreeKind::Document,
            Record {
                key: ROOT_KEY,
                body: RecordBody::Document(DocumentNode::default()),
            },
        )?;
        trx.put_record(
            SubtreeKind::PathSummary,
            Record {
                key: ROOT_KEY,
                body: RecordBody::Path(PathNode {
                    structure: Default::default(),
                    name: QName::default(),
                    kind: NodeKind::Document,
                    level: 0,
                    references: 1,
                }),
            },
        )?;
        let revision = trx.commit()?;
        debug!(path = %self.path.display(), revision, "resource bootstrapped");
        Ok(())
    }

    /// Directory this resource lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Settings the resource was created with.
    pub fn settings(&self) -> &ResourceSettings {
        &self.settings
    }

    pub(crate) fn log(&self) -> &PageLog {
        &self.log
    }

    pub(crate) fn page_ctx(&self) -> PageContext<'_> {
        PageContext {
            codec: self.codec.as_ref(),
            settings: &self.settings,
        }
    }

    fn root_at(&self, offset: u64) -> Result<RevisionRootPage> {
        let bytes = self.log.read_frame(offset)?;
        Page::from_bytes(&bytes, &self.settings)?.into_revision_root()
    }

    fn latest_root(&self) -> Result<RevisionRootPage> {
        let offset = self.log.root()?;
        if offset == NO_REVISION {
            return Err(StrataError::NotFound("committed revision"));
        }
        self.root_at(offset)
    }

    /// Number of the most recently committed revision.
    pub fn latest_revision(&self) -> Result<u64> {
        Ok(self.latest_root()?.revision)
    }

    /// Read transaction pinned to the latest revision.
    pub fn begin_read(&self) -> Result<ReadTrx<'_>> {
        Ok(ReadTrx::new(self, self.latest_root()?))
    }

    /// Read transaction pinned to `revision`, reachable through the
    /// root chain.
    pub fn begin_read_at(&self, revision: u64) -> Result<ReadTrx<'_>> {
        let mut root = self.latest_root()?;
        loop {
            if root.revision == revision {
                return Ok(ReadTrx::new(self, root));
            }
            let Some(previous) = root.previous_root else {
                return Err(StrataError::NotFound("committed revision"));
            };
            if root.revision < revision {
                return Err(StrataError::NotFound("committed revision"));
            }
            root = self.root_at(previous)?;
        }
    }

    /// Exclusive write transaction. Blocks while another writer holds
    /// the token.
    pub fn begin_write(&self) -> Result<WriteTrx<'_>> {
        let token = self.write_token.lock();
        let offset = self.log.root()?;
        let root = if offset == NO_REVISION {
            RevisionRootPage::initial()
        } else {
            self.root_at(offset)?.next(offset)
        };
        Ok(WriteTrx::new(self, token, root))
    }
}

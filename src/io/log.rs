//! Append-only page log with atomic revision publication.
//!
//! Layout: an 8-byte header at offset 0 holds the storage offset of the
//! latest committed revision root. Data frames follow from
//! [`FIRST_FRAME_OFFSET`], each `[4-byte length][length bytes of payload]`.
//! Frames are never rewritten; the header slot is the only mutation of
//! existing bytes and the single point at which a revision becomes
//! visible. A crash before the header write leaves the resource exactly
//! at the previous revision.

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, StrataError};
use crate::io::FileIo;
use crate::settings::TransformKind;

/// Offset of the first data frame, directly past the root-pointer header.
pub const FIRST_FRAME_OFFSET: u64 = 8;

/// Root-pointer value of a log that has never published a revision. The
/// header occupies offset 0, so no real frame can live there.
pub const NO_REVISION: u64 = 0;

/// Transform applied to page payloads on their way to and from the log.
pub trait ByteTransform: Send + Sync {
    /// Encodes a serialized page for storage.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// Decodes a stored payload back into a serialized page.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Identity transform.
pub struct Passthrough;

impl ByteTransform for Passthrough {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Snappy block compression.
pub struct Snappy;

impl ByteTransform for Snappy {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|err| StrataError::Serialization(format!("snappy encode: {err}")))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|err| StrataError::Corruption(format!("snappy decode: {err}")))
    }
}

/// Builds the transform selected by the resource settings.
pub fn transform_for(kind: TransformKind) -> Box<dyn ByteTransform> {
    match kind {
        TransformKind::Passthrough => Box::new(Passthrough),
        TransformKind::Snappy => Box::new(Snappy),
    }
}

/// The durable page writer/reader over one backing file.
///
/// Appends are serialized through an internal cursor; reads of already
/// written frames need no synchronization because committed bytes never
/// change.
pub struct PageLog {
    io: Box<dyn FileIo>,
    transform: Box<dyn ByteTransform>,
    end: Mutex<u64>,
}

impl PageLog {
    /// Opens the log over `io`, positioning the append cursor at the
    /// current end of file.
    pub fn open(io: Box<dyn FileIo>, transform: Box<dyn ByteTransform>) -> Result<Self> {
        let len = io.len()?;
        let end = len.max(FIRST_FRAME_OFFSET);
        Ok(Self {
            io,
            transform,
            end: Mutex::new(end),
        })
    }

    /// Appends one page payload and returns the frame offset used as its
    /// retrieval key.
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        let body = self.transform.encode(payload)?;
        let len: u32 = body
            .len()
            .try_into()
            .map_err(|_| StrataError::Serialization("page exceeds frame size limit".into()))?;
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);

        let mut end = self.end.lock();
        let offset = *end;
        self.io.write_at(offset, &frame)?;
        *end = offset + frame.len() as u64;
        trace!(offset, bytes = frame.len(), "appended page frame");
        Ok(offset)
    }

    /// Reads the frame at `offset` and returns the decoded payload.
    pub fn read_frame(&self, offset: u64) -> Result<Vec<u8>> {
        if offset < FIRST_FRAME_OFFSET {
            return Err(StrataError::Corruption(format!(
                "frame offset {offset} inside the log header"
            )));
        }
        let mut len_bytes = [0u8; 4];
        self.io.read_at(offset, &mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let mut body = vec![0u8; len];
        self.io.read_at(offset + 4, &mut body)?;
        self.transform.decode(&body)
    }

    /// Publishes the revision root at `offset`: appended data is synced,
    /// then the header slot is overwritten and synced. Readers cannot
    /// observe the new revision before the header write completes.
    pub fn publish_root(&self, offset: u64) -> Result<()> {
        self.io.sync_all()?;
        self.io.write_at(0, &offset.to_be_bytes())?;
        self.io.sync_all()?;
        debug!(offset, "published revision root");
        Ok(())
    }

    /// Returns the currently published root offset, or [`NO_REVISION`]
    /// for a log that has never committed.
    pub fn root(&self) -> Result<u64> {
        if self.io.len()? < FIRST_FRAME_OFFSET {
            return Ok(NO_REVISION);
        }
        let mut bytes = [0u8; 8];
        self.io.read_at(0, &mut bytes)?;
        Ok(u64::from_be_bytes(bytes))
    }
}

//! Crate-wide error type.

use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors surfaced by the storage engine and the path summary.
///
/// Absence of a record, page or index entry is a soft condition and is
/// reported as `Ok(None)` by lookups, never as an error. `NotFound` is
/// reserved for callers whose contract assumes structural presence.
#[derive(Debug, Error)]
pub enum StrataError {
    /// A read or write against the backing file failed. Aborts the
    /// enclosing transaction; there is no automatic retry.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A page or record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// On-disk bytes are inconsistent with the expected layout.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// A structurally required entity is missing.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The caller passed an argument outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The path-summary maintenance algorithm reached a state its own
    /// contract proves impossible. Fatal for the transaction; the
    /// resource stays at its last committed revision.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

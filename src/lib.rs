//! Strata is a multi-revision, tree-structured document store. Every commit
//! produces a new immutable revision; pages untouched by a transaction are
//! physically shared with earlier revisions through copy-on-write. A
//! secondary path-summary index over distinct root-to-node paths is kept
//! exactly consistent under insert, rename, move and delete.

#![warn(missing_docs)]

pub mod bytes;
pub mod dewey;
pub mod error;
pub mod index;
pub mod io;
pub mod node;
pub mod page;
pub mod resource;
pub mod settings;
pub mod summary;
pub mod tree;
pub mod trx;

pub use error::{Result, StrataError};
pub use resource::Resource;
pub use settings::ResourceSettings;
pub use tree::{DocReader, TreeWriter};

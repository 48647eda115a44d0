//! Filesystem collaborator layer for tabsync
//!
//! Provides the [`FileTree`] trait the sync engine reads and writes through,
//! plus the local-disk implementation.

pub mod error;
pub mod tree;

pub use error::{Error, Result};
pub use tree::{FileStat, FileTree, LocalTree, relative_to};

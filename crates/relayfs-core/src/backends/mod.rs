//! File system backends.

mod empty;
mod local;
mod memory;

use std::sync::Arc;

pub use empty::EmptyFileSystem;
pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;

use crate::fs::FileSystem;

/// A fresh local-disk backend.
pub fn local() -> Arc<dyn FileSystem> {
    Arc::new(LocalFileSystem::new())
}

/// A fresh backend with no files.
pub fn empty() -> Arc<dyn FileSystem> {
    Arc::new(EmptyFileSystem::new())
}

/// A fresh in-memory backend.
pub fn memory() -> Arc<dyn FileSystem> {
    Arc::new(MemoryFileSystem::new())
}

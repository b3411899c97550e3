//! Pluggable file system layer.
//!
//! Every backend implements [`FileSystem`]: local disk, an empty stub, an
//! in-memory tree, a remote machine (see `relayfs-client`), and the
//! [`CachingFileSystem`] wrapper around any of them.
//!
//! Change notification is layered on top. A [`WatchRegistry`] shares one
//! native watch per volume across many file subscriptions, and a
//! [`ChangeTracker`] turns the raw events into the changes users meant.

pub mod backends;
pub mod blocking;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod fs;
pub mod multiplex;
pub mod native;
pub mod retry;
pub mod stream;
pub mod types;
pub mod watcher;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backends::{EmptyFileSystem, LocalFileSystem, MemoryFileSystem};
pub use blocking::BlockingFileSystem;
pub use cache::CachingFileSystem;
pub use coalesce::ChangeTracker;
pub use config::CoreConfig;
pub use error::{FsError, FsResult};
pub use fs::{FileSystem, FileWatcher, SearchPattern, WatchStream};
pub use multiplex::{VolumeId, WatchMultiplexer, WatchRegistry, common_prefix};
pub use native::{NativeWatch, NotifyWatch};
pub use retry::{read_all_with_config, read_all_with_retry};
pub use stream::{FileStream, MemoryFile};
pub use types::{
    ChangeEvent, ChangeKind, EntryKind, FileAccess, FileShare, FileType, NotifyFilters, OpenMode,
    OpenOptions, PathComparison, PathRules, SearchOption, WatchEvent, WatcherOptions,
};
pub use watcher::{FilteredWatcher, WatchFilter};

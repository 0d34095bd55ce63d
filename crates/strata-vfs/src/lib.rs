//! Virtual filesystems over the path algebra of `strata-path`.
//!
//! Three implementations share one contract ([`FileSystem`]):
//!
//! - [`NativeFileSystem`] adapts the host OS;
//! - [`InMemoryFileSystem`] keeps an entire tree in memory;
//! - [`OverlayFileSystem`] layers immutable [`ReadOnlyFileSource`]s over a
//!   writable upstream with copy-on-write and tombstone-based deletion.
//!
//! Every implementation supports path mapping ([`PathMappings`]), known-path
//! resolution ([`KnownPath`]), Win32-glob enumeration, random and streamed
//! access, and scoped memory-mapped views ([`MemoryMappedHandle`]).

mod chunked;
mod error;
mod fs;
mod glob;
mod known_paths;
mod mapping;
mod memory;
mod mmap;
mod native;
mod overlay;
mod source;
mod types;

use std::sync::Arc;

pub use chunked::{
    read_at, read_at_async, ChunkedStream, ChunkedStreamSource, SliceChunkedSource,
    DEFAULT_CHUNK_SIZE,
};
pub use error::{VfsError, VfsResult};
pub use fs::{FileEntryIter, FileSystem, PathIter, VfsFile};
pub use glob::GlobPattern;
pub use known_paths::KnownPath;
pub use mapping::PathMappings;
pub use memory::InMemoryFileSystem;
pub use mmap::MemoryMappedHandle;
pub use native::NativeFileSystem;
use once_cell::sync::Lazy;
pub use overlay::OverlayFileSystem;
pub use source::{InMemorySource, InMemorySourceBuilder, ReadOnlyFileSource, ReadOnlyStream};
pub use types::{DirEntry, FileAccess, FileEntry, FileShare, OpenMode};

static SHARED: Lazy<Arc<NativeFileSystem>> = Lazy::new(|| Arc::new(NativeFileSystem::new()));

/// The process-wide native filesystem.
///
/// Constructed lazily on first access and never torn down.
pub fn shared() -> Arc<dyn FileSystem> {
    Arc::clone(&*SHARED) as Arc<dyn FileSystem>
}

//! Read-only sources mountable into an overlay filesystem.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use strata_path::{AbsolutePath, RelativePath};

use crate::chunked::{ChunkedStreamSource, SliceChunkedSource};
use crate::mmap::MemoryMappedHandle;
use crate::fs::VfsFile;
use crate::{VfsError, VfsResult};

/// An immutable set of files mounted at an absolute path.
///
/// Entries never change for the lifetime of the source; the overlay relies
/// on this to serve reads without coordination.
pub trait ReadOnlyFileSource: Send + Sync {
    /// The absolute path this source is attached at.
    fn mount_point(&self) -> &AbsolutePath;

    /// All file paths in this source, relative to the mount point.
    fn enumerate_files(&self) -> Box<dyn Iterator<Item = RelativePath> + '_>;

    fn exists(&self, path: &RelativePath) -> bool;

    fn size_of(&self, path: &RelativePath) -> VfsResult<u64>;

    /// Opens a seekable read stream; writes through the returned stream
    /// fail.
    fn open_read(&self, path: &RelativePath) -> VfsResult<Box<dyn VfsFile>>;

    /// A scoped byte view of `[offset, offset + length)` of the file.
    fn get_file_data(
        &self,
        path: &RelativePath,
        offset: u64,
        length: u64,
    ) -> VfsResult<MemoryMappedHandle>;

    /// A chunk-addressed view of the file for streaming random access.
    fn get_chunked_source(
        &self,
        path: &RelativePath,
        preferred_chunk_size: usize,
    ) -> VfsResult<Arc<dyn ChunkedStreamSource>>;
}

/// Wraps a seekable reader so it satisfies the file-stream contract while
/// rejecting writes.
pub struct ReadOnlyStream<R>(pub R);

impl<R: Read> Read for ReadOnlyStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Seek> Seek for ReadOnlyStream<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl<R> Write for ReadOnlyStream<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "stream is read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A [`ReadOnlyFileSource`] whose entries live in memory.
///
/// Built once via [`InMemorySource::build`] and immutable afterwards.
pub struct InMemorySource {
    mount: AbsolutePath,
    entries: BTreeMap<RelativePath, Arc<[u8]>>,
}

impl InMemorySource {
    pub fn build(mount: AbsolutePath) -> InMemorySourceBuilder {
        InMemorySourceBuilder {
            mount,
            entries: BTreeMap::new(),
        }
    }

    fn entry(&self, path: &RelativePath) -> VfsResult<&Arc<[u8]>> {
        self.entries
            .get(path)
            .ok_or_else(|| VfsError::FileNotFound(self.mount.join(path)))
    }
}

pub struct InMemorySourceBuilder {
    mount: AbsolutePath,
    entries: BTreeMap<RelativePath, Arc<[u8]>>,
}

impl InMemorySourceBuilder {
    pub fn with_file(mut self, path: RelativePath, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.entries.insert(path, bytes.into());
        self
    }

    pub fn finish(self) -> Arc<InMemorySource> {
        Arc::new(InMemorySource {
            mount: self.mount,
            entries: self.entries,
        })
    }
}

impl ReadOnlyFileSource for InMemorySource {
    fn mount_point(&self) -> &AbsolutePath {
        &self.mount
    }

    fn enumerate_files(&self) -> Box<dyn Iterator<Item = RelativePath> + '_> {
        Box::new(self.entries.keys().cloned())
    }

    fn exists(&self, path: &RelativePath) -> bool {
        self.entries.contains_key(path)
    }

    fn size_of(&self, path: &RelativePath) -> VfsResult<u64> {
        Ok(self.entry(path)?.len() as u64)
    }

    fn open_read(&self, path: &RelativePath) -> VfsResult<Box<dyn VfsFile>> {
        let data = Arc::clone(self.entry(path)?);
        Ok(Box::new(ReadOnlyStream(Cursor::new(data))))
    }

    fn get_file_data(
        &self,
        path: &RelativePath,
        offset: u64,
        length: u64,
    ) -> VfsResult<MemoryMappedHandle> {
        let data = Arc::clone(self.entry(path)?);
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(length as usize).min(data.len());
        Ok(MemoryMappedHandle::shared(data, start..end))
    }

    fn get_chunked_source(
        &self,
        path: &RelativePath,
        preferred_chunk_size: usize,
    ) -> VfsResult<Arc<dyn ChunkedStreamSource>> {
        let data = Arc::clone(self.entry(path)?);
        Ok(Arc::new(SliceChunkedSource::new(data, preferred_chunk_size)))
    }
}

//! Chunk-addressed random access and its adaptation to seekable streams.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{VfsError, VfsResult};

/// Default chunk granularity when a caller has no preference.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A read-only byte source partitioned into chunks for streaming.
///
/// Chunks may vary in size; `offset_of` is strictly increasing and
/// `offset_of(i) + chunk_size(i) == offset_of(i + 1)` for every interior
/// chunk.
#[async_trait]
pub trait ChunkedStreamSource: Send + Sync {
    /// Total size of the underlying data in bytes.
    fn size(&self) -> u64;

    fn chunk_count(&self) -> u64;

    /// Byte offset at which `chunk` starts.
    fn offset_of(&self, chunk: u64) -> u64;

    /// Size of `chunk` in bytes.
    fn chunk_size(&self, chunk: u64) -> usize;

    /// Fills `buf` (which must be exactly `chunk_size(chunk)` long) with the
    /// chunk's bytes.
    fn read_chunk(&self, buf: &mut [u8], chunk: u64) -> VfsResult<()>;

    async fn read_chunk_async(
        &self,
        buf: &mut [u8],
        chunk: u64,
        cancel: &CancellationToken,
    ) -> VfsResult<()> {
        if cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        self.read_chunk(buf, chunk)
    }
}

/// Index of the chunk containing `offset`. `offset` must be below
/// `source.size()`.
fn chunk_containing(source: &dyn ChunkedStreamSource, offset: u64) -> u64 {
    debug_assert!(offset < source.size());
    let mut lo = 0;
    let mut hi = source.chunk_count();
    // Largest chunk index whose start offset is <= offset.
    while lo + 1 < hi {
        let mid = lo + (hi - lo) / 2;
        if source.offset_of(mid) <= offset {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Reads up to `buf.len()` bytes starting at `offset`, crossing chunk
/// boundaries as needed. Returns the number of bytes read; short only at
/// end of data.
pub fn read_at(source: &dyn ChunkedStreamSource, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
    let size = source.size();
    let mut position = offset;
    let mut total = 0;
    let mut scratch = Vec::new();
    while total < buf.len() && position < size {
        let chunk = chunk_containing(source, position);
        scratch.resize(source.chunk_size(chunk), 0);
        source.read_chunk(&mut scratch, chunk)?;
        let within = (position - source.offset_of(chunk)) as usize;
        let n = (buf.len() - total).min(scratch.len() - within);
        buf[total..total + n].copy_from_slice(&scratch[within..within + n]);
        total += n;
        position += n as u64;
    }
    Ok(total)
}

/// Async twin of [`read_at`]; the cancellation token is honored between
/// chunk reads.
pub async fn read_at_async(
    source: &dyn ChunkedStreamSource,
    buf: &mut [u8],
    offset: u64,
    cancel: &CancellationToken,
) -> VfsResult<usize> {
    let size = source.size();
    let mut position = offset;
    let mut total = 0;
    let mut scratch = Vec::new();
    while total < buf.len() && position < size {
        if cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        let chunk = chunk_containing(source, position);
        scratch.resize(source.chunk_size(chunk), 0);
        source.read_chunk_async(&mut scratch, chunk, cancel).await?;
        let within = (position - source.offset_of(chunk)) as usize;
        let n = (buf.len() - total).min(scratch.len() - within);
        buf[total..total + n].copy_from_slice(&scratch[within..within + n]);
        total += n;
        position += n as u64;
    }
    Ok(total)
}

/// Adapts a [`ChunkedStreamSource`] into a seekable reader, loading one
/// chunk at a time.
pub struct ChunkedStream {
    source: Arc<dyn ChunkedStreamSource>,
    position: u64,
    /// Chunk index and bytes of the most recently loaded chunk.
    loaded: Option<(u64, Vec<u8>)>,
}

impl ChunkedStream {
    pub fn new(source: Arc<dyn ChunkedStreamSource>) -> Self {
        ChunkedStream {
            source,
            position: 0,
            loaded: None,
        }
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }

    fn load_chunk(&mut self, chunk: u64) -> io::Result<&[u8]> {
        if self.loaded.as_ref().map(|(i, _)| *i) != Some(chunk) {
            let mut buf = vec![0; self.source.chunk_size(chunk)];
            self.source
                .read_chunk(&mut buf, chunk)
                .map_err(io::Error::other)?;
            self.loaded = Some((chunk, buf));
        }
        Ok(self.loaded.as_ref().map(|(_, b)| b.as_slice()).unwrap())
    }
}

impl Read for ChunkedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.source.size() {
            return Ok(0);
        }
        let chunk = chunk_containing(self.source.as_ref(), self.position);
        let start = self.source.offset_of(chunk);
        let position = self.position;
        let bytes = self.load_chunk(chunk)?;
        let within = (position - start) as usize;
        let n = buf.len().min(bytes.len() - within);
        buf[..n].copy_from_slice(&bytes[within..within + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for ChunkedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.source.size().checked_add_signed(delta),
        };
        match target {
            Some(offset) => {
                self.position = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            )),
        }
    }
}

impl Write for ChunkedStream {
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

/// A chunked view over an immutable shared buffer, with uniform chunks.
pub struct SliceChunkedSource {
    data: Arc<[u8]>,
    chunk_size: usize,
}

impl SliceChunkedSource {
    pub fn new(data: Arc<[u8]>, preferred_chunk_size: usize) -> Self {
        SliceChunkedSource {
            data,
            chunk_size: preferred_chunk_size.max(1),
        }
    }
}

#[async_trait]
impl ChunkedStreamSource for SliceChunkedSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn chunk_count(&self) -> u64 {
        (self.data.len() as u64).div_ceil(self.chunk_size as u64).max(1)
    }

    fn offset_of(&self, chunk: u64) -> u64 {
        chunk * self.chunk_size as u64
    }

    fn chunk_size(&self, chunk: u64) -> usize {
        let start = self.offset_of(chunk);
        ((self.data.len() as u64).saturating_sub(start) as usize).min(self.chunk_size)
    }

    fn read_chunk(&self, buf: &mut [u8], chunk: u64) -> VfsResult<()> {
        let start = self.offset_of(chunk) as usize;
        let end = start + self.chunk_size(chunk);
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(len: usize, chunk: usize) -> Arc<SliceChunkedSource> {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        Arc::new(SliceChunkedSource::new(Arc::from(data), chunk))
    }

    #[test]
    fn chunk_geometry() {
        let s = source(100, 32);
        assert_eq!(s.size(), 100);
        assert_eq!(s.chunk_count(), 4);
        assert_eq!(s.offset_of(3), 96);
        assert_eq!(s.chunk_size(0), 32);
        assert_eq!(s.chunk_size(3), 4);
    }

    #[test]
    fn read_at_crosses_chunks() {
        let s = source(100, 16);
        let mut buf = vec![0u8; 40];
        let n = read_at(s.as_ref(), &mut buf, 10).unwrap();
        assert_eq!(n, 40);
        let expected: Vec<u8> = (10..50).map(|i| (i % 251) as u8).collect();
        assert_eq!(buf, expected);
    }

    #[test]
    fn read_at_short_at_end() {
        let s = source(100, 16);
        let mut buf = vec![0u8; 40];
        let n = read_at(s.as_ref(), &mut buf, 90).unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn stream_reads_sequentially() {
        let s = source(100, 16);
        let mut stream = ChunkedStream::new(s);
        let mut all = Vec::new();
        stream.read_to_end(&mut all).unwrap();
        assert_eq!(all.len(), 100);
        assert_eq!(all[17], (17 % 251) as u8);
    }

    #[test]
    fn stream_seeks() {
        let s = source(100, 16);
        let mut stream = ChunkedStream::new(s);
        stream.seek(SeekFrom::Start(50)).unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [50, 51, 52, 53]);
        stream.seek(SeekFrom::End(-2)).unwrap();
        let mut tail = Vec::new();
        stream.read_to_end(&mut tail).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(stream.seek(SeekFrom::Current(-1000)).is_err());
    }

    #[tokio::test]
    async fn async_read_honors_cancellation() {
        let s = source(100, 16);
        let mut buf = vec![0u8; 10];
        let token = CancellationToken::new();
        assert_eq!(
            read_at_async(s.as_ref(), &mut buf, 0, &token).await.unwrap(),
            10
        );
        token.cancel();
        let err = read_at_async(s.as_ref(), &mut buf, 0, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Cancelled));
    }
}

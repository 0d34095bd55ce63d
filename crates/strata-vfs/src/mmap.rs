//! Scoped byte views over mapped or pinned memory.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use memmap2::{Mmap, MmapMut};

enum MapBacking {
    /// A read-only OS mapping.
    Mapped(Mmap),
    /// A writable OS mapping.
    MappedMut(MmapMut),
    /// Bytes copied out of a backing store and pinned for the handle's
    /// lifetime.
    Pinned(Vec<u8>),
    /// A shared immutable buffer viewed without copying.
    Shared { data: Arc<[u8]>, range: Range<usize> },
    /// A private buffer flushed back to its origin on release.
    WriteBack {
        buffer: Vec<u8>,
        flush: Box<dyn FnMut(&[u8]) + Send>,
    },
}

/// A handle to a region of memory whose backing is released when the handle
/// drops.
///
/// The byte view borrows the handle, so observing the memory after release
/// is unrepresentable. Write-back handles propagate their final contents to
/// the origin on drop.
pub struct MemoryMappedHandle {
    backing: MapBacking,
}

impl MemoryMappedHandle {
    pub fn from_mapping(map: Mmap) -> Self {
        MemoryMappedHandle {
            backing: MapBacking::Mapped(map),
        }
    }

    pub fn from_mapping_mut(map: MmapMut) -> Self {
        MemoryMappedHandle {
            backing: MapBacking::MappedMut(map),
        }
    }

    /// Pins `bytes` for the lifetime of the handle.
    pub fn pinned(bytes: Vec<u8>) -> Self {
        MemoryMappedHandle {
            backing: MapBacking::Pinned(bytes),
        }
    }

    /// Zero-copy view of a slice of shared immutable bytes.
    pub fn shared(data: Arc<[u8]>, range: Range<usize>) -> Self {
        debug_assert!(range.end <= data.len());
        MemoryMappedHandle {
            backing: MapBacking::Shared { data, range },
        }
    }

    /// A writable buffer whose final contents are handed to `flush` when the
    /// handle is released.
    pub fn write_back(buffer: Vec<u8>, flush: impl FnMut(&[u8]) + Send + 'static) -> Self {
        MemoryMappedHandle {
            backing: MapBacking::WriteBack {
                buffer,
                flush: Box::new(flush),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.as_slice().as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            MapBacking::Mapped(m) => m,
            MapBacking::MappedMut(m) => m,
            MapBacking::Pinned(b) => b,
            MapBacking::Shared { data, range } => &data[range.clone()],
            MapBacking::WriteBack { buffer, .. } => buffer,
        }
    }

    /// Mutable view; `None` for read-only backings.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.backing {
            MapBacking::MappedMut(m) => Some(m),
            MapBacking::WriteBack { buffer, .. } => Some(buffer),
            MapBacking::Mapped(_) | MapBacking::Pinned(_) | MapBacking::Shared { .. } => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            self.backing,
            MapBacking::MappedMut(_) | MapBacking::WriteBack { .. }
        )
    }
}

impl Drop for MemoryMappedHandle {
    fn drop(&mut self) {
        if let MapBacking::WriteBack { buffer, flush } = &mut self.backing {
            flush(buffer);
        }
    }
}

impl fmt::Debug for MemoryMappedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.backing {
            MapBacking::Mapped(_) => "mapped",
            MapBacking::MappedMut(_) => "mapped-mut",
            MapBacking::Pinned(_) => "pinned",
            MapBacking::Shared { .. } => "shared",
            MapBacking::WriteBack { .. } => "write-back",
        };
        f.debug_struct("MemoryMappedHandle")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn pinned_view() {
        let handle = MemoryMappedHandle::pinned(b"payload".to_vec());
        assert_eq!(handle.as_slice(), b"payload");
        assert_eq!(handle.len(), 7);
        assert!(!handle.is_writable());
    }

    #[test]
    fn shared_view_is_ranged() {
        let data: Arc<[u8]> = Arc::from(&b"0123456789"[..]);
        let handle = MemoryMappedHandle::shared(data, 2..5);
        assert_eq!(handle.as_slice(), b"234");
    }

    #[test]
    fn write_back_flushes_on_drop() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&sink);
        let mut handle = MemoryMappedHandle::write_back(b"abc".to_vec(), move |bytes| {
            *observed.lock() = bytes.to_vec();
        });
        handle.as_mut_slice().unwrap()[0] = b'x';
        assert!(sink.lock().is_empty());
        drop(handle);
        assert_eq!(&*sink.lock(), b"xbc");
    }
}

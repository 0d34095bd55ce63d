//! The filesystem contract.

use std::io::{Read, Seek, Write};

use async_trait::async_trait;
use strata_path::AbsolutePath;
use tokio_util::sync::CancellationToken;

use crate::glob::GlobPattern;
use crate::known_paths::KnownPath;
use crate::mapping::PathMappings;
use crate::mmap::MemoryMappedHandle;
use crate::types::{validate_open, DirEntry, FileAccess, FileEntry, FileShare, OpenMode};
use crate::{VfsError, VfsResult};

/// A seekable byte stream returned by [`FileSystem::open_file`].
pub trait VfsFile: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> VfsFile for T {}

pub type FileEntryIter<'a> = Box<dyn Iterator<Item = VfsResult<FileEntry>> + 'a>;
pub type PathIter<'a> = Box<dyn Iterator<Item = VfsResult<AbsolutePath>> + 'a>;

/// The filesystem contract shared by the native, in-memory and overlay
/// implementations.
///
/// Callers use the provided entry points (`open_file`, `file_exists`, ...),
/// which rewrite the requested path through the instance's
/// [`PathMappings`] before dispatching to the `*_impl` backend operations.
/// Paths returned to the caller (enumeration results, entry metadata) are
/// rewritten back, so user code stays in its own namespace throughout.
///
/// Enumeration yields lazy, unordered sequences; each is consumed once.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// The rewrite tables applied at every entry point.
    fn mappings(&self) -> &PathMappings;

    // Backend operations; paths arriving here are already mapped.

    fn open_file_impl(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        share: FileShare,
    ) -> VfsResult<Box<dyn VfsFile>>;

    fn file_exists_impl(&self, path: &AbsolutePath) -> bool;

    fn dir_exists_impl(&self, path: &AbsolutePath) -> bool;

    fn get_file_entry_impl(&self, path: &AbsolutePath) -> VfsResult<FileEntry>;

    fn enumerate_file_entries_impl<'a>(
        &'a self,
        dir: &AbsolutePath,
        pattern: GlobPattern,
        recursive: bool,
    ) -> VfsResult<FileEntryIter<'a>>;

    fn enumerate_dirs_impl<'a>(
        &'a self,
        dir: &AbsolutePath,
        pattern: GlobPattern,
        recursive: bool,
    ) -> VfsResult<PathIter<'a>>;

    fn create_dir_impl(&self, path: &AbsolutePath) -> VfsResult<()>;

    fn delete_file_impl(&self, path: &AbsolutePath) -> VfsResult<()>;

    fn delete_dir_impl(&self, path: &AbsolutePath, recursive: bool) -> VfsResult<()>;

    fn move_file_impl(
        &self,
        source: &AbsolutePath,
        dest: &AbsolutePath,
        overwrite: bool,
    ) -> VfsResult<()>;

    fn read_bytes_random_impl(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
    ) -> VfsResult<usize>;

    async fn read_bytes_random_async_impl(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
        cancel: &CancellationToken,
    ) -> VfsResult<usize> {
        if cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        self.read_bytes_random_impl(path, buf, offset)
    }

    fn create_memory_mapped_file_impl(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        size: u64,
    ) -> VfsResult<MemoryMappedHandle>;

    fn enumerate_root_directories_impl(&self) -> VfsResult<Vec<AbsolutePath>>;

    /// Platform resolution of a known path, before mapping overrides.
    fn resolve_known_path(&self, _known: KnownPath) -> Option<AbsolutePath> {
        None
    }

    // Entry points.

    /// Opens `path` as a seekable stream. The mode/access combination is
    /// validated first.
    fn open_file(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        share: FileShare,
    ) -> VfsResult<Box<dyn VfsFile>> {
        validate_open(mode, access)?;
        self.open_file_impl(&self.mappings().map(path), mode, access, share)
    }

    fn file_exists(&self, path: &AbsolutePath) -> bool {
        self.file_exists_impl(&self.mappings().map(path))
    }

    fn dir_exists(&self, path: &AbsolutePath) -> bool {
        self.dir_exists_impl(&self.mappings().map(path))
    }

    fn get_file_entry(&self, path: &AbsolutePath) -> VfsResult<FileEntry> {
        let mut entry = self.get_file_entry_impl(&self.mappings().map(path))?;
        entry.path = self.mappings().unmap(&entry.path);
        Ok(entry)
    }

    fn get_dir_entry(&self, path: &AbsolutePath) -> VfsResult<DirEntry> {
        if self.dir_exists_impl(&self.mappings().map(path)) {
            Ok(DirEntry { path: path.clone() })
        } else {
            Err(VfsError::DirectoryNotFound(path.clone()))
        }
    }

    /// Enumerates file metadata under `dir`. `pattern` is a Win32 glob
    /// (`*`, `?`) matched case-insensitively against the whole path string.
    fn enumerate_file_entries<'a>(
        &'a self,
        dir: &AbsolutePath,
        pattern: &str,
        recursive: bool,
    ) -> VfsResult<FileEntryIter<'a>> {
        let mapped = self.mappings().map(dir);
        let iter = self.enumerate_file_entries_impl(&mapped, GlobPattern::new(pattern), recursive)?;
        let mappings = self.mappings();
        if mappings.is_empty() {
            return Ok(iter);
        }
        Ok(Box::new(iter.map(move |item| {
            item.map(|mut entry| {
                entry.path = mappings.unmap(&entry.path);
                entry
            })
        })))
    }

    fn enumerate_files<'a>(
        &'a self,
        dir: &AbsolutePath,
        pattern: &str,
        recursive: bool,
    ) -> VfsResult<PathIter<'a>> {
        let entries = self.enumerate_file_entries(dir, pattern, recursive)?;
        Ok(Box::new(entries.map(|item| item.map(|entry| entry.path))))
    }

    fn enumerate_dirs<'a>(
        &'a self,
        dir: &AbsolutePath,
        pattern: &str,
        recursive: bool,
    ) -> VfsResult<PathIter<'a>> {
        let mapped = self.mappings().map(dir);
        let iter = self.enumerate_dirs_impl(&mapped, GlobPattern::new(pattern), recursive)?;
        let mappings = self.mappings();
        if mappings.is_empty() {
            return Ok(iter);
        }
        Ok(Box::new(
            iter.map(move |item| item.map(|path| mappings.unmap(&path))),
        ))
    }

    /// Creates `path` and any missing parents. Idempotent.
    fn create_dir(&self, path: &AbsolutePath) -> VfsResult<()> {
        self.create_dir_impl(&self.mappings().map(path))
    }

    fn delete_file(&self, path: &AbsolutePath) -> VfsResult<()> {
        self.delete_file_impl(&self.mappings().map(path))
    }

    fn delete_dir(&self, path: &AbsolutePath, recursive: bool) -> VfsResult<()> {
        self.delete_dir_impl(&self.mappings().map(path), recursive)
    }

    fn move_file(
        &self,
        source: &AbsolutePath,
        dest: &AbsolutePath,
        overwrite: bool,
    ) -> VfsResult<()> {
        self.move_file_impl(
            &self.mappings().map(source),
            &self.mappings().map(dest),
            overwrite,
        )
    }

    /// Reads up to `buf.len()` bytes at `offset`; short only at end of file.
    fn read_bytes_random(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
    ) -> VfsResult<usize> {
        self.read_bytes_random_impl(&self.mappings().map(path), buf, offset)
    }

    async fn read_bytes_random_async(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
        cancel: &CancellationToken,
    ) -> VfsResult<usize> {
        self.read_bytes_random_async_impl(&self.mappings().map(path), buf, offset, cancel)
            .await
    }

    /// Maps `path` into memory. `size` of zero maps the whole file; a
    /// non-zero `size` sets the mapping length, extending the file for
    /// writable mappings.
    fn create_memory_mapped_file(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        size: u64,
    ) -> VfsResult<MemoryMappedHandle> {
        validate_open(mode, access)?;
        self.create_memory_mapped_file_impl(&self.mappings().map(path), mode, access, size)
    }

    fn enumerate_root_directories(&self) -> VfsResult<Vec<AbsolutePath>> {
        self.enumerate_root_directories_impl()
    }

    fn has_known_path(&self, known: KnownPath) -> bool {
        self.mappings().known(known).is_some() || self.resolve_known_path(known).is_some()
    }

    fn get_known_path(&self, known: KnownPath) -> VfsResult<AbsolutePath> {
        if let Some(path) = self.mappings().known(known) {
            return Ok(path.clone());
        }
        self.resolve_known_path(known)
            .ok_or(VfsError::PlatformNotSupported(known.name()))
    }

    // Conveniences.

    fn read_all_bytes(&self, path: &AbsolutePath) -> VfsResult<Vec<u8>> {
        let mut file = self.open_file(
            path,
            OpenMode::Open,
            FileAccess::Read,
            FileShare::default(),
        )?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn read_all_text(&self, path: &AbsolutePath) -> VfsResult<String> {
        let bytes = self.read_all_bytes(path)?;
        String::from_utf8(bytes).map_err(|e| {
            VfsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    fn write_all_bytes(&self, path: &AbsolutePath, data: &[u8]) -> VfsResult<()> {
        let mut file = self.open_file(
            path,
            OpenMode::Create,
            FileAccess::Write,
            FileShare::None,
        )?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    fn write_all_text(&self, path: &AbsolutePath, text: &str) -> VfsResult<()> {
        self.write_all_bytes(path, text.as_bytes())
    }

    /// Writes each line followed by `\n`.
    fn write_all_lines(&self, path: &AbsolutePath, lines: &[&str]) -> VfsResult<()> {
        let mut buffer = String::new();
        for line in lines {
            buffer.push_str(line);
            buffer.push('\n');
        }
        self.write_all_bytes(path, buffer.as_bytes())
    }

    async fn read_all_bytes_async(
        &self,
        path: &AbsolutePath,
        cancel: &CancellationToken,
    ) -> VfsResult<Vec<u8>> {
        let entry = self.get_file_entry(path)?;
        let mut bytes = vec![0u8; entry.size as usize];
        let read = self
            .read_bytes_random_async(path, &mut bytes, 0, cancel)
            .await?;
        bytes.truncate(read);
        Ok(bytes)
    }
}

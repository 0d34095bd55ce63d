//! The OS-backed filesystem.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use memmap2::MmapOptions;
use strata_path::{AbsolutePath, OsFamily};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use walkdir::WalkDir;

use crate::fs::{FileEntryIter, FileSystem, PathIter, VfsFile};
use crate::glob::GlobPattern;
use crate::known_paths::{self, KnownPath};
use crate::mapping::PathMappings;
use crate::mmap::MemoryMappedHandle;
use crate::types::{FileAccess, FileEntry, FileShare, OpenMode};
use crate::{VfsError, VfsResult};

/// A thin adapter over `std::fs`, `walkdir` and `memmap2`.
///
/// Sanitized paths are converted to the host's separator convention at the
/// boundary; results coming back from the OS are sanitized again. Name
/// comparison semantics inside the OS (case sensitivity, normalization) are
/// whatever the host filesystem provides.
pub struct NativeFileSystem {
    mappings: PathMappings,
}

impl Default for NativeFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeFileSystem {
    pub fn new() -> Self {
        Self::with_mappings(PathMappings::new())
    }

    pub fn with_mappings(mappings: PathMappings) -> Self {
        NativeFileSystem { mappings }
    }
}

fn to_os_path(path: &AbsolutePath) -> PathBuf {
    PathBuf::from(path.to_native_separators(OsFamily::current()))
}

fn to_abs(path: &Path) -> VfsResult<AbsolutePath> {
    Ok(AbsolutePath::parse(&path.to_string_lossy())?)
}

/// Translates the interesting `io::Error` kinds into tagged variants.
fn map_io_error(err: io::Error, path: &AbsolutePath) -> VfsError {
    match err.kind() {
        io::ErrorKind::NotFound => VfsError::FileNotFound(path.clone()),
        io::ErrorKind::AlreadyExists => VfsError::FileAlreadyExists(path.clone()),
        _ => VfsError::Io(err),
    }
}

fn open_options(mode: OpenMode, access: FileAccess, share: FileShare) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(access.is_readable());
    opts.write(access.is_writable());
    match mode {
        OpenMode::Open => {}
        OpenMode::OpenOrCreate => {
            if access.is_writable() {
                opts.create(true);
            }
        }
        OpenMode::Create => {
            opts.create(true);
            opts.truncate(true);
        }
        OpenMode::CreateNew => {
            opts.create_new(true);
        }
        OpenMode::Truncate => {
            opts.truncate(true);
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_SHARE_READ: u32 = 0x1;
        const FILE_SHARE_WRITE: u32 = 0x2;
        let bits = match share {
            FileShare::None => 0,
            FileShare::Read => FILE_SHARE_READ,
            FileShare::Write => FILE_SHARE_WRITE,
            FileShare::ReadWrite => FILE_SHARE_READ | FILE_SHARE_WRITE,
        };
        opts.share_mode(bits);
    }
    #[cfg(not(windows))]
    {
        let _ = share;
    }
    opts
}

/// Positional read that retries short reads until `buf` is full or the file
/// ends.
fn read_at_exactish(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        #[cfg(unix)]
        let n = {
            use std::os::unix::fs::FileExt;
            file.read_at(&mut buf[total..], offset + total as u64)?
        };
        #[cfg(windows)]
        let n = {
            use std::os::windows::fs::FileExt;
            file.seek_read(&mut buf[total..], offset + total as u64)?
        };
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn metadata_entry(path: &AbsolutePath, meta: &fs::Metadata) -> FileEntry {
    let modified = meta.modified().unwrap_or(UNIX_EPOCH);
    FileEntry {
        path: path.clone(),
        size: meta.len(),
        modified,
        created: meta.created().unwrap_or(modified),
        read_only: meta.permissions().readonly(),
        version: None,
    }
}

#[async_trait]
impl FileSystem for NativeFileSystem {
    fn mappings(&self) -> &PathMappings {
        &self.mappings
    }

    fn open_file_impl(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        share: FileShare,
    ) -> VfsResult<Box<dyn VfsFile>> {
        let os = to_os_path(path);
        match open_options(mode, access, share).open(&os) {
            Ok(file) => Ok(Box::new(file)),
            Err(err)
                if err.kind() == io::ErrorKind::NotFound
                    && mode == OpenMode::OpenOrCreate
                    && !access.is_writable() =>
            {
                // A read-only OpenOrCreate still creates the missing file.
                File::create(&os).map_err(|e| map_io_error(e, path))?;
                let file = open_options(OpenMode::Open, access, share)
                    .open(&os)
                    .map_err(|e| map_io_error(e, path))?;
                Ok(Box::new(file))
            }
            Err(err) => Err(map_io_error(err, path)),
        }
    }

    fn file_exists_impl(&self, path: &AbsolutePath) -> bool {
        fs::metadata(to_os_path(path))
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    fn dir_exists_impl(&self, path: &AbsolutePath) -> bool {
        fs::metadata(to_os_path(path))
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn get_file_entry_impl(&self, path: &AbsolutePath) -> VfsResult<FileEntry> {
        let meta = fs::metadata(to_os_path(path)).map_err(|e| map_io_error(e, path))?;
        if !meta.is_file() {
            return Err(VfsError::FileNotFound(path.clone()));
        }
        Ok(metadata_entry(path, &meta))
    }

    fn enumerate_file_entries_impl<'a>(
        &'a self,
        dir: &AbsolutePath,
        pattern: GlobPattern,
        recursive: bool,
    ) -> VfsResult<FileEntryIter<'a>> {
        if !self.dir_exists_impl(dir) {
            return Err(VfsError::DirectoryNotFound(dir.clone()));
        }
        let mut walker = WalkDir::new(to_os_path(dir)).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }
        let iter = walker.into_iter().filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => return Some(Err(VfsError::Io(err.into()))),
            };
            if !entry.file_type().is_file() {
                return None;
            }
            let abs = match to_abs(entry.path()) {
                Ok(abs) => abs,
                Err(err) => return Some(Err(err)),
            };
            if !pattern.matches(abs.as_str()) {
                return None;
            }
            match entry.metadata() {
                Ok(meta) => Some(Ok(metadata_entry(&abs, &meta))),
                Err(err) => Some(Err(VfsError::Io(err.into()))),
            }
        });
        Ok(Box::new(iter))
    }

    fn enumerate_dirs_impl<'a>(
        &'a self,
        dir: &AbsolutePath,
        pattern: GlobPattern,
        recursive: bool,
    ) -> VfsResult<PathIter<'a>> {
        if !self.dir_exists_impl(dir) {
            return Err(VfsError::DirectoryNotFound(dir.clone()));
        }
        let mut walker = WalkDir::new(to_os_path(dir)).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }
        let iter = walker.into_iter().filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => return Some(Err(VfsError::Io(err.into()))),
            };
            if !entry.file_type().is_dir() {
                return None;
            }
            match to_abs(entry.path()) {
                Ok(abs) if pattern.matches(abs.as_str()) => Some(Ok(abs)),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            }
        });
        Ok(Box::new(iter))
    }

    fn create_dir_impl(&self, path: &AbsolutePath) -> VfsResult<()> {
        fs::create_dir_all(to_os_path(path)).map_err(VfsError::Io)
    }

    fn delete_file_impl(&self, path: &AbsolutePath) -> VfsResult<()> {
        fs::remove_file(to_os_path(path)).map_err(|e| map_io_error(e, path))
    }

    fn delete_dir_impl(&self, path: &AbsolutePath, recursive: bool) -> VfsResult<()> {
        let os = to_os_path(path);
        let result = if recursive {
            fs::remove_dir_all(&os)
        } else {
            fs::remove_dir(&os)
        };
        result.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => VfsError::DirectoryNotFound(path.clone()),
            _ => VfsError::Io(err),
        })
    }

    fn move_file_impl(
        &self,
        source: &AbsolutePath,
        dest: &AbsolutePath,
        overwrite: bool,
    ) -> VfsResult<()> {
        let source_os = to_os_path(source);
        let dest_os = to_os_path(dest);
        if !self.file_exists_impl(source) {
            return Err(VfsError::FileNotFound(source.clone()));
        }
        if fs::metadata(&dest_os).map(|m| m.is_file()).unwrap_or(false) {
            if !overwrite {
                return Err(VfsError::FileAlreadyExists(dest.clone()));
            }
            // Windows refuses to rename onto an existing file.
            fs::remove_file(&dest_os).map_err(|e| map_io_error(e, dest))?;
        }
        fs::rename(&source_os, &dest_os).map_err(|e| map_io_error(e, source))
    }

    fn read_bytes_random_impl(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
    ) -> VfsResult<usize> {
        let file = File::open(to_os_path(path)).map_err(|e| map_io_error(e, path))?;
        read_at_exactish(&file, buf, offset).map_err(VfsError::Io)
    }

    async fn read_bytes_random_async_impl(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
        cancel: &CancellationToken,
    ) -> VfsResult<usize> {
        let os = to_os_path(path);
        let wanted = buf.len();
        let path_for_err = path.clone();
        let task = tokio::task::spawn_blocking(move || -> VfsResult<Vec<u8>> {
            let file = File::open(&os).map_err(|e| map_io_error(e, &path_for_err))?;
            let mut bytes = vec![0u8; wanted];
            let read = read_at_exactish(&file, &mut bytes, offset)?;
            bytes.truncate(read);
            Ok(bytes)
        });
        tokio::select! {
            _ = cancel.cancelled() => Err(VfsError::Cancelled),
            joined = task => {
                let bytes = joined.map_err(|e| VfsError::Io(io::Error::other(e)))??;
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
        }
    }

    fn create_memory_mapped_file_impl(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        size: u64,
    ) -> VfsResult<MemoryMappedHandle> {
        let os = to_os_path(path);
        let mut opts = open_options(mode, access, FileShare::ReadWrite);
        // Mapping always needs a readable descriptor.
        opts.read(true);
        let file = opts.open(&os).map_err(|e| map_io_error(e, path))?;
        let file_len = file.metadata().map_err(VfsError::Io)?.len();
        if access.is_writable() {
            if size > 0 && file_len < size {
                file.set_len(size).map_err(VfsError::Io)?;
            }
            let len = if size > 0 { size } else { file_len };
            if len == 0 {
                return Ok(MemoryMappedHandle::pinned(Vec::new()));
            }
            let mut options = MmapOptions::new();
            options.len(len as usize);
            let map = unsafe { options.map_mut(&file) }.map_err(VfsError::Io)?;
            Ok(MemoryMappedHandle::from_mapping_mut(map))
        } else {
            let len = if size > 0 { size.min(file_len) } else { file_len };
            if len == 0 {
                return Ok(MemoryMappedHandle::pinned(Vec::new()));
            }
            let mut options = MmapOptions::new();
            options.len(len as usize);
            let map = unsafe { options.map(&file) }.map_err(VfsError::Io)?;
            Ok(MemoryMappedHandle::from_mapping(map))
        }
    }

    fn enumerate_root_directories_impl(&self) -> VfsResult<Vec<AbsolutePath>> {
        #[cfg(windows)]
        {
            let roots = ('A'..='Z')
                .filter(|drive| Path::new(&format!("{drive}:\\")).exists())
                .map(|drive| AbsolutePath::from_sanitized(format!("{drive}:/")))
                .collect();
            Ok(roots)
        }
        #[cfg(not(windows))]
        {
            Ok(vec![AbsolutePath::from_sanitized("/")])
        }
    }

    fn resolve_known_path(&self, known: KnownPath) -> Option<AbsolutePath> {
        let resolved = known_paths::resolve(known);
        trace!(known = known.name(), ?resolved, "resolved known path");
        resolved
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Seek as _, SeekFrom, Write as _};

    use tempfile::TempDir;

    use super::*;

    fn scratch() -> (TempDir, AbsolutePath) {
        let dir = TempDir::new().unwrap();
        let abs = AbsolutePath::parse(&dir.path().to_string_lossy()).unwrap();
        (dir, abs)
    }

    #[test]
    fn write_read_roundtrip() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let file = root.join(&"nested/out.txt".parse().unwrap());
        fs.create_dir(&file.parent()).unwrap();
        fs.write_all_text(&file, "native bytes").unwrap();
        assert_eq!(fs.read_all_text(&file).unwrap(), "native bytes");
        assert!(fs.file_exists(&file));
        assert!(fs.dir_exists(&file.parent()));
    }

    #[test]
    fn open_missing_is_not_found() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let missing = root.join(&"missing".parse().unwrap());
        assert!(matches!(
            fs.read_all_bytes(&missing),
            Err(VfsError::FileNotFound(_))
        ));
    }

    #[test]
    fn create_new_refuses_existing() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let file = root.join(&"f".parse().unwrap());
        fs.write_all_text(&file, "x").unwrap();
        assert!(matches!(
            fs.open_file(&file, OpenMode::CreateNew, FileAccess::Write, FileShare::None),
            Err(VfsError::FileAlreadyExists(_))
        ));
    }

    #[test]
    fn enumerate_with_pattern() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        fs.write_all_text(&root.join(&"a.txt".parse().unwrap()), "").unwrap();
        fs.write_all_text(&root.join(&"b.bin".parse().unwrap()), "").unwrap();
        fs.write_all_text(&root.join(&"sub/c.txt".parse().unwrap()), "")
            .unwrap_err();
        fs.create_dir(&root.join(&"sub".parse().unwrap())).unwrap();
        fs.write_all_text(&root.join(&"sub/c.txt".parse().unwrap()), "")
            .unwrap();

        let flat: Vec<_> = fs
            .enumerate_files(&root, "*.txt", false)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(flat.len(), 1);

        let all_txt: Vec<_> = fs
            .enumerate_files(&root, "*.txt", true)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(all_txt.len(), 2);

        let dirs: Vec<_> = fs
            .enumerate_dirs(&root, "*", false)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(dirs, vec![root.join(&"sub".parse().unwrap())]);
    }

    #[test]
    fn move_and_overwrite() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let a = root.join(&"a".parse().unwrap());
        let b = root.join(&"b".parse().unwrap());
        fs.write_all_text(&a, "one").unwrap();
        fs.write_all_text(&b, "two").unwrap();
        assert!(matches!(
            fs.move_file(&a, &b, false),
            Err(VfsError::FileAlreadyExists(_))
        ));
        fs.move_file(&a, &b, true).unwrap();
        assert!(!fs.file_exists(&a));
        assert_eq!(fs.read_all_text(&b).unwrap(), "one");
    }

    #[test]
    fn random_read() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let file = root.join(&"rand".parse().unwrap());
        fs.write_all_bytes(&file, b"0123456789").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(fs.read_bytes_random(&file, &mut buf, 4).unwrap(), 3);
        assert_eq!(&buf, b"456");
    }

    #[tokio::test]
    async fn random_read_async_and_cancel() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let file = root.join(&"rand".parse().unwrap());
        fs.write_all_bytes(&file, b"0123456789").unwrap();

        let token = CancellationToken::new();
        let mut buf = [0u8; 5];
        let n = fs
            .read_bytes_random_async(&file, &mut buf, 5, &token)
            .await
            .unwrap();
        assert_eq!((n, &buf), (5, b"56789"));

        token.cancel();
        assert!(matches!(
            fs.read_bytes_random_async(&file, &mut buf, 0, &token).await,
            Err(VfsError::Cancelled)
        ));
    }

    #[test]
    fn memory_map_read_and_write() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let file = root.join(&"mapped".parse().unwrap());
        fs.write_all_bytes(&file, b"abcdef").unwrap();

        let view = fs
            .create_memory_mapped_file(&file, OpenMode::Open, FileAccess::Read, 0)
            .unwrap();
        assert_eq!(view.as_slice(), b"abcdef");
        drop(view);

        let mut map = fs
            .create_memory_mapped_file(&file, OpenMode::Open, FileAccess::ReadWrite, 0)
            .unwrap();
        map.as_mut_slice().unwrap()[0] = b'Z';
        drop(map);
        assert_eq!(fs.read_all_bytes(&file).unwrap(), b"Zbcdef");
    }

    #[test]
    fn file_entry_metadata() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let file = root.join(&"meta".parse().unwrap());
        fs.write_all_bytes(&file, b"12345").unwrap();
        let entry = fs.get_file_entry(&file).unwrap();
        assert_eq!(entry.size, 5);
        assert_eq!(entry.path, file);
        assert!(!entry.read_only);
        assert!(entry.modified >= entry.created);
    }

    #[test]
    fn streams_seek() {
        let fs = NativeFileSystem::new();
        let (_dir, root) = scratch();
        let file = root.join(&"seek".parse().unwrap());
        let mut handle = fs
            .open_file(&file, OpenMode::Create, FileAccess::ReadWrite, FileShare::None)
            .unwrap();
        handle.write_all(b"0123456789").unwrap();
        handle.seek(SeekFrom::Start(2)).unwrap();
        let mut buf = [0u8; 4];
        handle.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"2345");
    }

    #[test]
    fn known_paths_resolve() {
        let fs = NativeFileSystem::new();
        assert!(fs.has_known_path(KnownPath::Temp));
        assert!(fs.get_known_path(KnownPath::Temp).is_ok());
        assert!(fs.get_known_path(KnownPath::CurrentDirectory).is_ok());
    }

    #[test]
    fn enumerate_roots() {
        let fs = NativeFileSystem::new();
        let roots = fs.enumerate_root_directories().unwrap();
        assert!(!roots.is_empty());
    }
}

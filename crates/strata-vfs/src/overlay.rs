//! Read-only sources overlaid on a writable upstream.
//!
//! The overlay interposes on every operation to choose between three
//! answers for a path: a tombstone (deleted), the upstream filesystem, or
//! one of the mounted read-only sources, in that order of authority. Writes
//! never touch source data: the first write to a source-backed path copies
//! it to the upstream (copy-on-write), deletions hide source files behind
//! tombstones, and recreating a deleted path clears its tombstone.

use std::collections::HashSet;
use std::io::{Read, Write as _};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use parking_lot::Mutex;
use strata_path::{AbsolutePath, RelativePath};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::chunked::{self, DEFAULT_CHUNK_SIZE};
use crate::fs::{FileEntryIter, FileSystem, PathIter, VfsFile};
use crate::glob::GlobPattern;
use crate::mapping::PathMappings;
use crate::mmap::MemoryMappedHandle;
use crate::source::ReadOnlyFileSource;
use crate::types::{FileAccess, FileEntry, FileShare, OpenMode};
use crate::{VfsError, VfsResult};

/// A union filesystem: ordered read-only sources over a writable upstream,
/// with copy-on-write materialization and tombstone-based deletion.
pub struct OverlayFileSystem {
    upstream: Arc<dyn FileSystem>,
    /// Append-only after construction; read without locking.
    sources: Vec<Arc<dyn ReadOnlyFileSource>>,
    /// Paths the user deleted; hides source views until recreated.
    tombstones: Mutex<HashSet<AbsolutePath>>,
    /// Serializes copy-on-write so readers never observe a partial file.
    materialize_lock: Mutex<()>,
    mappings: PathMappings,
}

impl OverlayFileSystem {
    pub fn new(upstream: Arc<dyn FileSystem>, sources: Vec<Arc<dyn ReadOnlyFileSource>>) -> Self {
        Self::with_mappings(upstream, sources, PathMappings::new())
    }

    pub fn with_mappings(
        upstream: Arc<dyn FileSystem>,
        sources: Vec<Arc<dyn ReadOnlyFileSource>>,
        mappings: PathMappings,
    ) -> Self {
        OverlayFileSystem {
            upstream,
            sources,
            tombstones: Mutex::new(HashSet::new()),
            materialize_lock: Mutex::new(()),
            mappings,
        }
    }

    pub fn upstream(&self) -> &Arc<dyn FileSystem> {
        &self.upstream
    }

    pub fn sources(&self) -> &[Arc<dyn ReadOnlyFileSource>] {
        &self.sources
    }

    fn is_tombstoned(&self, path: &AbsolutePath) -> bool {
        self.tombstones.lock().contains(path)
    }

    fn add_tombstone(&self, path: &AbsolutePath) {
        trace!(%path, "tombstoning");
        self.tombstones.lock().insert(path.clone());
    }

    fn clear_tombstone(&self, path: &AbsolutePath) {
        if self.tombstones.lock().remove(path) {
            trace!(%path, "tombstone cleared");
        }
    }

    /// Upstream presence; a hit clears any stale tombstone (the user
    /// recreated the file directly on the upstream).
    fn upstream_file_exists(&self, path: &AbsolutePath) -> bool {
        if self.upstream.file_exists(path) {
            self.clear_tombstone(path);
            true
        } else {
            false
        }
    }

    /// First source serving `path`, honoring tombstones.
    fn resolve_source(
        &self,
        path: &AbsolutePath,
    ) -> Option<(&Arc<dyn ReadOnlyFileSource>, RelativePath)> {
        if self.is_tombstoned(path) {
            return None;
        }
        self.resolve_source_ignoring_tombstones(path)
    }

    fn resolve_source_ignoring_tombstones(
        &self,
        path: &AbsolutePath,
    ) -> Option<(&Arc<dyn ReadOnlyFileSource>, RelativePath)> {
        for source in &self.sources {
            let mount = source.mount_point();
            if path == mount {
                continue;
            }
            if path.in_folder(mount) {
                if let Ok(rel) = path.relative_to(mount) {
                    if source.exists(&rel) {
                        return Some((source, rel));
                    }
                }
            }
        }
        None
    }

    /// Whether any source implies the existence of directory `path`.
    fn source_contributes_dir(&self, path: &AbsolutePath) -> bool {
        self.sources.iter().any(|source| {
            let mount = source.mount_point();
            if mount.starts_with(path) {
                return source.enumerate_files().next().is_some();
            }
            if path.in_folder(mount) {
                if let Ok(rel) = path.relative_to(mount) {
                    return source
                        .enumerate_files()
                        .any(|file| file.starts_with(&rel) && file != rel);
                }
            }
            false
        })
    }

    /// Copies a source-backed file to the upstream.
    ///
    /// The copy is staged under a temporary name and moved into place, so
    /// concurrent readers see either the source bytes or the finished
    /// upstream file. A failed copy leaves nothing visible upstream.
    fn materialize(
        &self,
        path: &AbsolutePath,
        source: &Arc<dyn ReadOnlyFileSource>,
        rel: &RelativePath,
    ) -> VfsResult<()> {
        let _guard = self.materialize_lock.lock();
        if self.upstream.file_exists(path) {
            // Another writer materialized this path first.
            return Ok(());
        }
        debug!(%path, "materializing source file upstream");
        self.upstream.create_dir(&path.parent())?;
        let staging = path.append_extension("materializing");
        let copy = || -> VfsResult<()> {
            let mut reader = source.open_read(rel)?;
            let mut writer = self.upstream.open_file(
                &staging,
                OpenMode::Create,
                FileAccess::Write,
                FileShare::None,
            )?;
            std::io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
            Ok(())
        };
        let result = copy().and_then(|()| self.upstream.move_file(&staging, path, true));
        if result.is_err() {
            let _ = self.upstream.delete_file(&staging);
        }
        result
    }

    fn source_entry(
        &self,
        path: &AbsolutePath,
        source: &Arc<dyn ReadOnlyFileSource>,
        rel: &RelativePath,
    ) -> VfsResult<FileEntry> {
        Ok(FileEntry {
            path: path.clone(),
            size: source.size_of(rel)?,
            modified: UNIX_EPOCH,
            created: UNIX_EPOCH,
            read_only: true,
            version: None,
        })
    }

    /// Upstream enumeration when the upstream directory exists; absent
    /// directories contribute nothing to the union.
    fn upstream_entries<'a>(
        &'a self,
        dir: &AbsolutePath,
        pattern: &GlobPattern,
        recursive: bool,
    ) -> VfsResult<Option<FileEntryIter<'a>>> {
        if !self.upstream.dir_exists(dir) {
            return Ok(None);
        }
        Ok(Some(self.upstream.enumerate_file_entries(
            dir,
            pattern.as_str(),
            recursive,
        )?))
    }
}

/// Union file enumeration: upstream entries first (recording what was
/// seen), then source entries filtered by tombstones and deduplicated with
/// upstream winning.
struct OverlayEntries<'a> {
    overlay: &'a OverlayFileSystem,
    dir: AbsolutePath,
    pattern: GlobPattern,
    recursive: bool,
    upstream: Option<FileEntryIter<'a>>,
    seen: HashSet<AbsolutePath>,
    from_sources: Option<std::vec::IntoIter<VfsResult<FileEntry>>>,
}

impl<'a> OverlayEntries<'a> {
    fn collect_source_entries(&mut self) -> std::vec::IntoIter<VfsResult<FileEntry>> {
        let overlay = self.overlay;
        let mut out = Vec::new();
        for source in &overlay.sources {
            let mount = source.mount_point();
            if !(mount.starts_with(&self.dir) || self.dir.in_folder(mount)) {
                continue;
            }
            for rel in source.enumerate_files() {
                let abs = mount.join(&rel);
                let in_scope = if self.recursive {
                    abs.in_folder(&self.dir)
                } else {
                    abs.parent() == self.dir
                };
                if !in_scope
                    || !self.pattern.matches(abs.as_str())
                    || overlay.is_tombstoned(&abs)
                    || self.seen.contains(&abs)
                {
                    continue;
                }
                self.seen.insert(abs.clone());
                out.push(overlay.source_entry(&abs, source, &rel));
            }
        }
        out.into_iter()
    }
}

impl<'a> Iterator for OverlayEntries<'a> {
    type Item = VfsResult<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(upstream) = self.upstream.as_mut() {
            match upstream.next() {
                Some(Ok(entry)) => {
                    self.seen.insert(entry.path.clone());
                    return Some(Ok(entry));
                }
                Some(Err(err)) => return Some(Err(err)),
                None => self.upstream = None,
            }
        }
        if self.from_sources.is_none() {
            self.from_sources = Some(self.collect_source_entries());
        }
        self.from_sources.as_mut().unwrap().next()
    }
}

#[async_trait]
impl FileSystem for OverlayFileSystem {
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
        if self.upstream_file_exists(path) {
            return self.upstream.open_file(path, mode, access, share);
        }
        if self.is_tombstoned(path) {
            return match mode {
                OpenMode::Create | OpenMode::CreateNew | OpenMode::OpenOrCreate => {
                    self.upstream.create_dir(&path.parent())?;
                    let file = self.upstream.open_file(path, mode, access, share)?;
                    self.clear_tombstone(path);
                    Ok(file)
                }
                OpenMode::Open | OpenMode::Truncate => Err(VfsError::FileNotFound(path.clone())),
            };
        }
        if let Some((source, rel)) = self.resolve_source(path) {
            if !access.is_writable() {
                // Create/Truncate with read access were rejected up front.
                return match mode {
                    OpenMode::CreateNew => Err(VfsError::FileAlreadyExists(path.clone())),
                    _ => source.open_read(&rel),
                };
            }
            return match mode {
                OpenMode::Open | OpenMode::OpenOrCreate => {
                    self.materialize(path, source, &rel)?;
                    self.upstream.open_file(path, OpenMode::Open, access, share)
                }
                OpenMode::Truncate => {
                    self.materialize(path, source, &rel)?;
                    self.upstream
                        .open_file(path, OpenMode::Truncate, access, share)
                }
                OpenMode::Create => {
                    // Truncating write; the source bytes are never needed.
                    self.upstream.create_dir(&path.parent())?;
                    self.upstream
                        .open_file(path, OpenMode::Create, access, share)
                }
                OpenMode::CreateNew => Err(VfsError::FileAlreadyExists(path.clone())),
            };
        }
        if mode.can_create() {
            self.upstream.create_dir(&path.parent())?;
        }
        self.upstream.open_file(path, mode, access, share)
    }

    fn file_exists_impl(&self, path: &AbsolutePath) -> bool {
        self.upstream_file_exists(path) || self.resolve_source(path).is_some()
    }

    fn dir_exists_impl(&self, path: &AbsolutePath) -> bool {
        self.upstream.dir_exists(path) || self.source_contributes_dir(path)
    }

    fn get_file_entry_impl(&self, path: &AbsolutePath) -> VfsResult<FileEntry> {
        if self.upstream_file_exists(path) {
            return self.upstream.get_file_entry(path);
        }
        match self.resolve_source(path) {
            Some((source, rel)) => self.source_entry(path, source, &rel),
            None => Err(VfsError::FileNotFound(path.clone())),
        }
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
        let upstream = self.upstream_entries(dir, &pattern, recursive)?;
        Ok(Box::new(OverlayEntries {
            overlay: self,
            dir: dir.clone(),
            pattern,
            recursive,
            upstream,
            seen: HashSet::new(),
            from_sources: None,
        }))
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
        let mut seen: HashSet<AbsolutePath> = HashSet::new();
        let mut dirs: Vec<VfsResult<AbsolutePath>> = Vec::new();
        if self.upstream.dir_exists(dir) {
            for item in self
                .upstream
                .enumerate_dirs(dir, pattern.as_str(), recursive)?
            {
                match item {
                    Ok(path) => {
                        seen.insert(path.clone());
                        dirs.push(Ok(path));
                    }
                    Err(err) => dirs.push(Err(err)),
                }
            }
        }
        // Directories implied by source files under `dir`.
        for source in &self.sources {
            let mount = source.mount_point();
            if !(mount.starts_with(dir) || dir.in_folder(mount)) {
                continue;
            }
            for rel in source.enumerate_files() {
                let abs = mount.join(&rel);
                let mut implied = abs.parent();
                while implied.in_folder(dir) {
                    let in_scope = recursive || implied.parent() == *dir;
                    if in_scope
                        && pattern.matches(implied.as_str())
                        && !seen.contains(&implied)
                    {
                        seen.insert(implied.clone());
                        dirs.push(Ok(implied.clone()));
                    }
                    implied = implied.parent();
                }
            }
        }
        Ok(Box::new(dirs.into_iter()))
    }

    fn create_dir_impl(&self, path: &AbsolutePath) -> VfsResult<()> {
        self.upstream.create_dir(path)
    }

    fn delete_file_impl(&self, path: &AbsolutePath) -> VfsResult<()> {
        let upstream_has = self.upstream_file_exists(path);
        let visible = upstream_has || self.resolve_source(path).is_some();
        if !visible {
            return Err(VfsError::FileNotFound(path.clone()));
        }
        if upstream_has {
            self.upstream.delete_file(path)?;
        }
        // Hides any source view until the path is recreated.
        self.add_tombstone(path);
        Ok(())
    }

    fn delete_dir_impl(&self, path: &AbsolutePath, recursive: bool) -> VfsResult<()> {
        if self.upstream.dir_exists(path) {
            return self.upstream.delete_dir(path, recursive);
        }
        if self.source_contributes_dir(path) {
            return Err(VfsError::ReadOnly(path.clone()));
        }
        Err(VfsError::DirectoryNotFound(path.clone()))
    }

    fn move_file_impl(
        &self,
        source: &AbsolutePath,
        dest: &AbsolutePath,
        overwrite: bool,
    ) -> VfsResult<()> {
        if !overwrite && self.file_exists_impl(dest) {
            return Err(VfsError::FileAlreadyExists(dest.clone()));
        }
        if self.upstream_file_exists(source) {
            self.upstream.create_dir(&dest.parent())?;
            self.upstream.move_file(source, dest, overwrite)?;
        } else if let Some((src, rel)) = self.resolve_source(source) {
            self.materialize(source, src, &rel)?;
            self.upstream.create_dir(&dest.parent())?;
            self.upstream.move_file(source, dest, overwrite)?;
        } else {
            return Err(VfsError::FileNotFound(source.clone()));
        }
        if self.resolve_source_ignoring_tombstones(source).is_some() {
            self.add_tombstone(source);
        }
        self.clear_tombstone(dest);
        Ok(())
    }

    fn read_bytes_random_impl(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
    ) -> VfsResult<usize> {
        if self.upstream_file_exists(path) {
            return self.upstream.read_bytes_random(path, buf, offset);
        }
        match self.resolve_source(path) {
            Some((source, rel)) => {
                let chunked = source.get_chunked_source(&rel, DEFAULT_CHUNK_SIZE)?;
                chunked::read_at(chunked.as_ref(), buf, offset)
            }
            None => Err(VfsError::FileNotFound(path.clone())),
        }
    }

    async fn read_bytes_random_async_impl(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
        cancel: &CancellationToken,
    ) -> VfsResult<usize> {
        if self.upstream_file_exists(path) {
            return self
                .upstream
                .read_bytes_random_async(path, buf, offset, cancel)
                .await;
        }
        match self.resolve_source(path) {
            Some((source, rel)) => {
                let chunked = source.get_chunked_source(&rel, DEFAULT_CHUNK_SIZE)?;
                chunked::read_at_async(chunked.as_ref(), buf, offset, cancel).await
            }
            None => Err(VfsError::FileNotFound(path.clone())),
        }
    }

    fn create_memory_mapped_file_impl(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        size: u64,
    ) -> VfsResult<MemoryMappedHandle> {
        if self.upstream_file_exists(path) {
            return self
                .upstream
                .create_memory_mapped_file(path, mode, access, size);
        }
        if self.is_tombstoned(path) {
            if mode.can_create() {
                self.upstream.create_dir(&path.parent())?;
                let handle = self
                    .upstream
                    .create_memory_mapped_file(path, mode, access, size)?;
                self.clear_tombstone(path);
                return Ok(handle);
            }
            return Err(VfsError::FileNotFound(path.clone()));
        }
        if let Some((source, rel)) = self.resolve_source(path) {
            if access.is_writable() {
                return match mode {
                    OpenMode::CreateNew => Err(VfsError::FileAlreadyExists(path.clone())),
                    OpenMode::Create => {
                        self.upstream.create_dir(&path.parent())?;
                        self.upstream
                            .create_memory_mapped_file(path, OpenMode::Create, access, size)
                    }
                    OpenMode::Open | OpenMode::OpenOrCreate | OpenMode::Truncate => {
                        self.materialize(path, source, &rel)?;
                        let mode = if mode == OpenMode::Truncate {
                            OpenMode::Truncate
                        } else {
                            OpenMode::Open
                        };
                        self.upstream
                            .create_memory_mapped_file(path, mode, access, size)
                    }
                };
            }
            // Read-only view of source bytes, pinned for the handle's
            // lifetime.
            if mode == OpenMode::CreateNew {
                return Err(VfsError::FileAlreadyExists(path.clone()));
            }
            let mut reader = source.open_read(&rel)?;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            if size > 0 {
                bytes.truncate(size as usize);
            }
            return Ok(MemoryMappedHandle::pinned(bytes));
        }
        if mode.can_create() {
            self.upstream.create_dir(&path.parent())?;
        }
        self.upstream
            .create_memory_mapped_file(path, mode, access, size)
    }

    fn enumerate_root_directories_impl(&self) -> VfsResult<Vec<AbsolutePath>> {
        let mut roots = self.upstream.enumerate_root_directories()?;
        for source in &self.sources {
            let root = source.mount_point().root();
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        Ok(roots)
    }

    fn resolve_known_path(&self, known: crate::known_paths::KnownPath) -> Option<AbsolutePath> {
        self.upstream.get_known_path(known).ok()
    }
}

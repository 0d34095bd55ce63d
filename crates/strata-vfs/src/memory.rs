//! A filesystem held entirely in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;
use strata_path::AbsolutePath;

use crate::fs::{FileEntryIter, FileSystem, PathIter, VfsFile};
use crate::glob::GlobPattern;
use crate::mapping::PathMappings;
use crate::mmap::MemoryMappedHandle;
use crate::types::{FileAccess, FileEntry, FileShare, OpenMode};
use crate::{VfsError, VfsResult};

struct FilePayload {
    bytes: Vec<u8>,
    modified: SystemTime,
}

type SharedPayload = Arc<RwLock<FilePayload>>;

#[derive(Clone)]
enum Node {
    File {
        payload: SharedPayload,
        created: SystemTime,
    },
    Dir,
}

struct Entry {
    /// Original-case path, preserved for results.
    path: AbsolutePath,
    node: Node,
}

/// An in-memory implementation of the full filesystem contract.
///
/// The tree is a sorted map from case-folded path string to node, so
/// enumeration is a range scan over the folded keys. File payloads are
/// shared with open streams; a write through one handle is visible to every
/// reader of the same file. Roots (`/`, `C:/`, ...) exist implicitly.
///
/// Parent directories are created implicitly when files are created, in the
/// way archives and other virtual trees behave.
pub struct InMemoryFileSystem {
    nodes: RwLock<BTreeMap<String, Entry>>,
    mappings: PathMappings,
}

fn fold_key(path: &AbsolutePath) -> String {
    path.as_str().to_ascii_lowercase()
}

/// Folded key prefix under which all children of `dir` sort.
fn child_prefix(dir: &AbsolutePath) -> String {
    let mut prefix = dir.as_str().to_ascii_lowercase();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

impl Default for InMemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFileSystem {
    pub fn new() -> Self {
        Self::with_mappings(PathMappings::new())
    }

    pub fn with_mappings(mappings: PathMappings) -> Self {
        InMemoryFileSystem {
            nodes: RwLock::new(BTreeMap::new()),
            mappings,
        }
    }

    fn ensure_parent_dirs(
        nodes: &mut BTreeMap<String, Entry>,
        path: &AbsolutePath,
    ) -> VfsResult<()> {
        let mut missing = Vec::new();
        for dir in path.parent().get_all_parents() {
            if dir.is_root() {
                break;
            }
            match nodes.get(&fold_key(&dir)) {
                Some(Entry {
                    node: Node::File { .. },
                    ..
                }) => {
                    return Err(VfsError::Io(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("parent {dir} is a file"),
                    )))
                }
                Some(_) => break,
                None => missing.push(dir),
            }
        }
        for dir in missing {
            nodes.insert(
                fold_key(&dir),
                Entry {
                    path: dir,
                    node: Node::Dir,
                },
            );
        }
        Ok(())
    }

    /// Applies `mode` to the node at `path` and returns its payload.
    fn resolve_payload(&self, path: &AbsolutePath, mode: OpenMode) -> VfsResult<SharedPayload> {
        let mut nodes = self.nodes.write();
        let payload = match nodes.get(&fold_key(path)) {
            Some(Entry {
                node: Node::Dir, ..
            }) => {
                return Err(VfsError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{path} is a directory"),
                )))
            }
            Some(Entry {
                node: Node::File { payload, .. },
                ..
            }) => match mode {
                OpenMode::CreateNew => return Err(VfsError::FileAlreadyExists(path.clone())),
                _ => Arc::clone(payload),
            },
            None => match mode {
                OpenMode::Open | OpenMode::Truncate => {
                    return Err(VfsError::FileNotFound(path.clone()))
                }
                OpenMode::OpenOrCreate | OpenMode::Create | OpenMode::CreateNew => {
                    Self::ensure_parent_dirs(&mut nodes, path)?;
                    let payload = Arc::new(RwLock::new(FilePayload {
                        bytes: Vec::new(),
                        modified: SystemTime::now(),
                    }));
                    nodes.insert(
                        fold_key(path),
                        Entry {
                            path: path.clone(),
                            node: Node::File {
                                payload: Arc::clone(&payload),
                                created: SystemTime::now(),
                            },
                        },
                    );
                    payload
                }
            },
        };
        drop(nodes);
        if matches!(mode, OpenMode::Create | OpenMode::Truncate) {
            let mut guard = payload.write();
            guard.bytes.clear();
            guard.modified = SystemTime::now();
        }
        Ok(payload)
    }

    fn file_payload(&self, path: &AbsolutePath) -> VfsResult<SharedPayload> {
        match self.nodes.read().get(&fold_key(path)) {
            Some(Entry {
                node: Node::File { payload, .. },
                ..
            }) => Ok(Arc::clone(payload)),
            _ => Err(VfsError::FileNotFound(path.clone())),
        }
    }

    fn entry_of(path: &AbsolutePath, payload: &SharedPayload, created: SystemTime) -> FileEntry {
        let guard = payload.read();
        FileEntry {
            path: path.clone(),
            size: guard.bytes.len() as u64,
            modified: guard.modified,
            created,
            read_only: false,
            version: None,
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFileSystem {
    fn mappings(&self) -> &PathMappings {
        &self.mappings
    }

    fn open_file_impl(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        _share: FileShare,
    ) -> VfsResult<Box<dyn VfsFile>> {
        let payload = self.resolve_payload(path, mode)?;
        Ok(Box::new(InMemoryFile {
            payload,
            position: 0,
            access,
        }))
    }

    fn file_exists_impl(&self, path: &AbsolutePath) -> bool {
        matches!(
            self.nodes.read().get(&fold_key(path)),
            Some(Entry {
                node: Node::File { .. },
                ..
            })
        )
    }

    fn dir_exists_impl(&self, path: &AbsolutePath) -> bool {
        path.is_root()
            || matches!(
                self.nodes.read().get(&fold_key(path)),
                Some(Entry {
                    node: Node::Dir,
                    ..
                })
            )
    }

    fn get_file_entry_impl(&self, path: &AbsolutePath) -> VfsResult<FileEntry> {
        match self.nodes.read().get(&fold_key(path)) {
            Some(Entry {
                path: stored,
                node: Node::File { payload, created },
            }) => Ok(Self::entry_of(stored, payload, *created)),
            _ => Err(VfsError::FileNotFound(path.clone())),
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
        let prefix = child_prefix(dir);
        let nodes = self.nodes.read();
        let mut results = Vec::new();
        for (key, entry) in nodes.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if !recursive && key[prefix.len()..].contains('/') {
                continue;
            }
            if let Node::File { payload, created } = &entry.node {
                if pattern.matches(entry.path.as_str()) {
                    results.push(Self::entry_of(&entry.path, payload, *created));
                }
            }
        }
        Ok(Box::new(results.into_iter().map(Ok)))
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
        let prefix = child_prefix(dir);
        let nodes = self.nodes.read();
        let mut results = Vec::new();
        for (key, entry) in nodes.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if !recursive && key[prefix.len()..].contains('/') {
                continue;
            }
            if matches!(entry.node, Node::Dir) && pattern.matches(entry.path.as_str()) {
                results.push(entry.path.clone());
            }
        }
        Ok(Box::new(results.into_iter().map(Ok)))
    }

    fn create_dir_impl(&self, path: &AbsolutePath) -> VfsResult<()> {
        if path.is_root() {
            return Ok(());
        }
        let mut nodes = self.nodes.write();
        match nodes.get(&fold_key(path)) {
            Some(Entry {
                node: Node::File { .. },
                ..
            }) => Err(VfsError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{path} is a file"),
            ))),
            Some(_) => Ok(()),
            None => {
                Self::ensure_parent_dirs(&mut nodes, path)?;
                nodes.insert(
                    fold_key(path),
                    Entry {
                        path: path.clone(),
                        node: Node::Dir,
                    },
                );
                Ok(())
            }
        }
    }

    fn delete_file_impl(&self, path: &AbsolutePath) -> VfsResult<()> {
        let mut nodes = self.nodes.write();
        match nodes.get(&fold_key(path)) {
            Some(Entry {
                node: Node::File { .. },
                ..
            }) => {
                nodes.remove(&fold_key(path));
                Ok(())
            }
            _ => Err(VfsError::FileNotFound(path.clone())),
        }
    }

    fn delete_dir_impl(&self, path: &AbsolutePath, recursive: bool) -> VfsResult<()> {
        if path.is_root() {
            return Err(VfsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot delete a root directory",
            )));
        }
        let mut nodes = self.nodes.write();
        if !matches!(
            nodes.get(&fold_key(path)),
            Some(Entry {
                node: Node::Dir,
                ..
            })
        ) {
            return Err(VfsError::DirectoryNotFound(path.clone()));
        }
        let prefix = child_prefix(path);
        let children: Vec<String> = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        if !children.is_empty() && !recursive {
            return Err(VfsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("directory not empty: {path}"),
            )));
        }
        for key in children {
            nodes.remove(&key);
        }
        nodes.remove(&fold_key(path));
        Ok(())
    }

    fn move_file_impl(
        &self,
        source: &AbsolutePath,
        dest: &AbsolutePath,
        overwrite: bool,
    ) -> VfsResult<()> {
        let mut nodes = self.nodes.write();
        if !matches!(
            nodes.get(&fold_key(source)),
            Some(Entry {
                node: Node::File { .. },
                ..
            })
        ) {
            return Err(VfsError::FileNotFound(source.clone()));
        }
        match nodes.get(&fold_key(dest)) {
            Some(Entry {
                node: Node::File { .. },
                ..
            }) if !overwrite => return Err(VfsError::FileAlreadyExists(dest.clone())),
            Some(Entry {
                node: Node::Dir, ..
            }) => {
                return Err(VfsError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{dest} is a directory"),
                )))
            }
            _ => {}
        }
        Self::ensure_parent_dirs(&mut nodes, dest)?;
        let entry = nodes.remove(&fold_key(source)).expect("checked above");
        nodes.insert(
            fold_key(dest),
            Entry {
                path: dest.clone(),
                node: entry.node,
            },
        );
        Ok(())
    }

    fn read_bytes_random_impl(
        &self,
        path: &AbsolutePath,
        buf: &mut [u8],
        offset: u64,
    ) -> VfsResult<usize> {
        let payload = self.file_payload(path)?;
        let guard = payload.read();
        let len = guard.bytes.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(guard.bytes.len() - start);
        buf[..n].copy_from_slice(&guard.bytes[start..start + n]);
        Ok(n)
    }

    fn create_memory_mapped_file_impl(
        &self,
        path: &AbsolutePath,
        mode: OpenMode,
        access: FileAccess,
        size: u64,
    ) -> VfsResult<MemoryMappedHandle> {
        let payload = self.resolve_payload(path, mode)?;
        let mut bytes = payload.read().bytes.clone();
        if access.is_writable() {
            // A writable mapping with an explicit size extends the file,
            // the way a native mapping extends it via set_len.
            if size > 0 {
                bytes.resize(size as usize, 0);
            }
            let dest = Arc::clone(&payload);
            Ok(MemoryMappedHandle::write_back(bytes, move |final_bytes| {
                let mut guard = dest.write();
                guard.bytes = final_bytes.to_vec();
                guard.modified = SystemTime::now();
            }))
        } else {
            // A read-only view pins a snapshot, clamped to the requested
            // window.
            if size > 0 {
                bytes.truncate(size as usize);
            }
            Ok(MemoryMappedHandle::pinned(bytes))
        }
    }

    fn enumerate_root_directories_impl(&self) -> VfsResult<Vec<AbsolutePath>> {
        let mut roots: BTreeSet<AbsolutePath> = self
            .nodes
            .read()
            .values()
            .map(|entry| entry.path.root())
            .collect();
        roots.insert(AbsolutePath::from_sanitized("/"));
        Ok(roots.into_iter().collect())
    }
}

struct InMemoryFile {
    payload: SharedPayload,
    position: u64,
    access: FileAccess,
}

impl Read for InMemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.access.is_readable() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is not open for reading",
            ));
        }
        let guard = self.payload.read();
        let start = (self.position as usize).min(guard.bytes.len());
        let n = buf.len().min(guard.bytes.len() - start);
        buf[..n].copy_from_slice(&guard.bytes[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for InMemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.access.is_writable() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is not open for writing",
            ));
        }
        let mut guard = self.payload.write();
        let start = self.position as usize;
        let end = start + buf.len();
        if guard.bytes.len() < end {
            guard.bytes.resize(end, 0);
        }
        guard.bytes[start..end].copy_from_slice(buf);
        guard.modified = SystemTime::now();
        self.position = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for InMemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                (self.payload.read().bytes.len() as u64).checked_add_signed(delta)
            }
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

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Seek as _, SeekFrom, Write as _};

    use pretty_assertions::assert_eq;

    use super::*;

    fn abs(s: &str) -> AbsolutePath {
        AbsolutePath::parse(s).unwrap()
    }

    fn collect_paths(iter: PathIter<'_>) -> Vec<AbsolutePath> {
        let mut paths: Vec<_> = iter.map(|r| r.unwrap()).collect();
        paths.sort();
        paths
    }

    #[test]
    fn write_then_read_roundtrips() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_bytes(&abs("/dir/file.bin"), b"hello").unwrap();
        assert_eq!(fs.read_all_bytes(&abs("/dir/file.bin")).unwrap(), b"hello");
        assert!(fs.file_exists(&abs("/dir/file.bin")));
        assert!(fs.dir_exists(&abs("/dir")));
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_text(&abs("/Data/File.TXT"), "x").unwrap();
        assert!(fs.file_exists(&abs("/data/file.txt")));
        assert_eq!(fs.read_all_text(&abs("/DATA/FILE.txt")).unwrap(), "x");
        // Original casing is preserved in results.
        let entry = fs.get_file_entry(&abs("/data/file.txt")).unwrap();
        assert_eq!(entry.path.as_str(), "/Data/File.TXT");
    }

    #[test]
    fn open_modes() {
        let fs = InMemoryFileSystem::new();
        let path = abs("/f");
        assert!(matches!(
            fs.open_file(&path, OpenMode::Open, FileAccess::Read, FileShare::None),
            Err(VfsError::FileNotFound(_))
        ));
        fs.write_all_text(&path, "content").unwrap();
        assert!(matches!(
            fs.open_file(&path, OpenMode::CreateNew, FileAccess::Write, FileShare::None),
            Err(VfsError::FileAlreadyExists(_))
        ));
        let f = fs
            .open_file(&path, OpenMode::Truncate, FileAccess::Write, FileShare::None)
            .unwrap();
        drop(f);
        assert_eq!(fs.read_all_text(&path).unwrap(), "");
    }

    #[test]
    fn open_streams_share_content() {
        let fs = InMemoryFileSystem::new();
        let path = abs("/shared");
        fs.write_all_text(&path, "before").unwrap();
        let mut writer = fs
            .open_file(&path, OpenMode::Open, FileAccess::ReadWrite, FileShare::ReadWrite)
            .unwrap();
        writer.seek(SeekFrom::Start(0)).unwrap();
        writer.write_all(b"AFTER!").unwrap();
        let mut reader = fs
            .open_file(&path, OpenMode::Open, FileAccess::Read, FileShare::ReadWrite)
            .unwrap();
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "AFTER!");
    }

    #[test]
    fn enumeration_filters_and_recurses() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_text(&abs("/a/one.txt"), "").unwrap();
        fs.write_all_text(&abs("/a/two.bin"), "").unwrap();
        fs.write_all_text(&abs("/a/sub/three.txt"), "").unwrap();

        let flat = collect_paths(fs.enumerate_files(&abs("/a"), "*", false).unwrap());
        assert_eq!(flat, vec![abs("/a/one.txt"), abs("/a/two.bin")]);

        let recursive = collect_paths(fs.enumerate_files(&abs("/a"), "*.txt", true).unwrap());
        assert_eq!(recursive, vec![abs("/a/one.txt"), abs("/a/sub/three.txt")]);

        let dirs = collect_paths(fs.enumerate_dirs(&abs("/a"), "*", false).unwrap());
        assert_eq!(dirs, vec![abs("/a/sub")]);

        assert!(fs.enumerate_files(&abs("/missing"), "*", false).is_err());
    }

    #[test]
    fn delete_dir_semantics() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_text(&abs("/d/f"), "").unwrap();
        assert!(fs.delete_dir(&abs("/d"), false).is_err());
        fs.delete_dir(&abs("/d"), true).unwrap();
        assert!(!fs.dir_exists(&abs("/d")));
        assert!(!fs.file_exists(&abs("/d/f")));
    }

    #[test]
    fn move_file_semantics() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_text(&abs("/src"), "content").unwrap();
        fs.write_all_text(&abs("/dst"), "old").unwrap();
        assert!(matches!(
            fs.move_file(&abs("/src"), &abs("/dst"), false),
            Err(VfsError::FileAlreadyExists(_))
        ));
        fs.move_file(&abs("/src"), &abs("/dst"), true).unwrap();
        assert!(!fs.file_exists(&abs("/src")));
        assert_eq!(fs.read_all_text(&abs("/dst")).unwrap(), "content");
    }

    #[test]
    fn random_reads() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_bytes(&abs("/r"), b"0123456789").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read_bytes_random(&abs("/r"), &mut buf, 3).unwrap(), 4);
        assert_eq!(&buf, b"3456");
        assert_eq!(fs.read_bytes_random(&abs("/r"), &mut buf, 20).unwrap(), 0);
    }

    #[tokio::test]
    async fn random_reads_async() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_bytes(&abs("/r"), b"0123456789").unwrap();
        let token = tokio_util::sync::CancellationToken::new();
        let mut buf = [0u8; 4];
        let n = fs
            .read_bytes_random_async(&abs("/r"), &mut buf, 2, &token)
            .await
            .unwrap();
        assert_eq!((n, &buf), (4, b"2345"));
        token.cancel();
        assert!(matches!(
            fs.read_bytes_random_async(&abs("/r"), &mut buf, 0, &token).await,
            Err(VfsError::Cancelled)
        ));
    }

    #[test]
    fn memory_mapping_read_and_write_back() {
        let fs = InMemoryFileSystem::new();
        let path = abs("/m");
        fs.write_all_bytes(&path, b"abcdef").unwrap();

        let view = fs
            .create_memory_mapped_file(&path, OpenMode::Open, FileAccess::Read, 0)
            .unwrap();
        assert_eq!(view.as_slice(), b"abcdef");
        drop(view);

        let mut map = fs
            .create_memory_mapped_file(&path, OpenMode::Open, FileAccess::ReadWrite, 0)
            .unwrap();
        map.as_mut_slice().unwrap()[0] = b'X';
        drop(map);
        assert_eq!(fs.read_all_bytes(&path).unwrap(), b"Xbcdef");
    }

    #[test]
    fn mapping_with_explicit_size_extends() {
        let fs = InMemoryFileSystem::new();
        let path = abs("/sized");
        let mut map = fs
            .create_memory_mapped_file(&path, OpenMode::Create, FileAccess::ReadWrite, 8)
            .unwrap();
        assert_eq!(map.len(), 8);
        map.as_mut_slice().unwrap().copy_from_slice(b"12345678");
        drop(map);
        assert_eq!(fs.read_all_bytes(&path).unwrap(), b"12345678");
    }

    #[test]
    fn root_directories() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_text(&abs("C:/x"), "").unwrap();
        let roots = fs.enumerate_root_directories().unwrap();
        assert!(roots.contains(&abs("/")));
        assert!(roots.contains(&abs("C:/")));
    }

    #[test]
    fn path_mappings_rewrite_and_unmap() {
        let mut mappings = PathMappings::new();
        mappings.add_mapping(abs("/game"), abs("/backing/game"));
        let fs = InMemoryFileSystem::with_mappings(mappings);

        fs.write_all_text(&abs("/game/save.dat"), "state").unwrap();
        // Stored under the mapped location...
        assert!(fs.file_exists_impl(&abs("/backing/game/save.dat")));
        // ...but visible and enumerable through the caller's namespace.
        assert_eq!(fs.read_all_text(&abs("/game/save.dat")).unwrap(), "state");
        let files = collect_paths(fs.enumerate_files(&abs("/game"), "*", true).unwrap());
        assert_eq!(files, vec![abs("/game/save.dat")]);
    }

    #[test]
    fn dir_entry_lookup() {
        let fs = InMemoryFileSystem::new();
        fs.create_dir(&abs("/d/e")).unwrap();
        assert_eq!(fs.get_dir_entry(&abs("/d/e")).unwrap().path, abs("/d/e"));
        assert!(matches!(
            fs.get_dir_entry(&abs("/nope")),
            Err(VfsError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn write_all_lines_appends_newlines() {
        let fs = InMemoryFileSystem::new();
        fs.write_all_lines(&abs("/lines"), &["a", "b"]).unwrap();
        assert_eq!(fs.read_all_text(&abs("/lines")).unwrap(), "a\nb\n");
    }
}

//! Overlay behavior with a real on-disk upstream.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use strata_path::{AbsolutePath, RelativePath};
use strata_vfs::{
    FileAccess, FileShare, FileSystem, InMemorySource, NativeFileSystem, OpenMode,
    OverlayFileSystem, ReadOnlyFileSource, VfsError,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn rel(s: &str) -> RelativePath {
    RelativePath::parse(s).unwrap()
}

/// Overlay over a native upstream rooted in a scratch directory, with a
/// source mounted at `<scratch>/mods` containing `data/asset.bin`.
fn disk_overlay() -> (TempDir, AbsolutePath, OverlayFileSystem) {
    let scratch = TempDir::new().unwrap();
    let root = AbsolutePath::parse(&scratch.path().to_string_lossy()).unwrap();
    let mount = root.join(&rel("mods"));
    let source = InMemorySource::build(mount.clone())
        .with_file(rel("data/asset.bin"), &b"binary payload"[..])
        .finish();
    let overlay = OverlayFileSystem::new(
        Arc::new(NativeFileSystem::new()) as Arc<dyn FileSystem>,
        vec![source as Arc<dyn ReadOnlyFileSource>],
    );
    (scratch, mount, overlay)
}

#[test]
fn source_reads_without_touching_disk() {
    let (scratch, mount, fs) = disk_overlay();
    let path = mount.join(&rel("data/asset.bin"));
    assert_eq!(fs.read_all_bytes(&path).unwrap(), b"binary payload");
    // Nothing was materialized.
    assert!(!scratch.path().join("mods").exists());
}

#[test]
fn write_materializes_to_disk_then_applies() {
    let (scratch, mount, fs) = disk_overlay();
    let path = mount.join(&rel("data/asset.bin"));

    let mut file = fs
        .open_file(
            &path,
            OpenMode::Open,
            FileAccess::ReadWrite,
            FileShare::None,
        )
        .unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(b"edited").unwrap();
    drop(file);

    let on_disk = scratch.path().join("mods/data/asset.bin");
    assert!(on_disk.exists());
    let mut bytes = Vec::new();
    std::fs::File::open(&on_disk)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    assert_eq!(bytes, b"edited payload");
    // No staging leftovers.
    assert!(!scratch.path().join("mods/data/asset.bin.materializing").exists());

    assert_eq!(fs.read_all_bytes(&path).unwrap(), b"edited payload");
}

#[test]
fn delete_and_recreate_cycle_on_disk() {
    let (_scratch, mount, fs) = disk_overlay();
    let path = mount.join(&rel("data/asset.bin"));

    fs.delete_file(&path).unwrap();
    assert!(!fs.file_exists(&path));
    assert!(matches!(
        fs.read_all_bytes(&path),
        Err(VfsError::FileNotFound(_))
    ));

    fs.write_all_text(&path, "recreated").unwrap();
    assert_eq!(fs.read_all_text(&path).unwrap(), "recreated");
}

#[test]
fn union_enumeration_on_disk() {
    let (_scratch, mount, fs) = disk_overlay();
    fs.write_all_text(&mount.join(&rel("native/file.txt")), "upstream")
        .unwrap();

    let mut files: Vec<_> = fs
        .enumerate_files(&mount, "*", true)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    files.sort();
    assert_eq!(
        files,
        vec![
            mount.join(&rel("data/asset.bin")),
            mount.join(&rel("native/file.txt")),
        ]
    );
}

#[test]
fn mapped_view_of_source_backed_file() {
    let (scratch, mount, fs) = disk_overlay();
    let path = mount.join(&rel("data/asset.bin"));
    let view = fs
        .create_memory_mapped_file(&path, OpenMode::Open, FileAccess::Read, 0)
        .unwrap();
    assert_eq!(view.as_slice(), b"binary payload");
    assert!(!scratch.path().join("mods").exists());
}

#[tokio::test]
async fn async_reads_through_the_stack() {
    let (_scratch, mount, fs) = disk_overlay();
    let source_backed = mount.join(&rel("data/asset.bin"));
    let upstream_backed = mount.join(&rel("native.bin"));
    fs.write_all_bytes(&upstream_backed, b"on disk").unwrap();

    let token = CancellationToken::new();
    assert_eq!(
        fs.read_all_bytes_async(&source_backed, &token).await.unwrap(),
        b"binary payload"
    );
    assert_eq!(
        fs.read_all_bytes_async(&upstream_backed, &token).await.unwrap(),
        b"on disk"
    );

    token.cancel();
    assert!(matches!(
        fs.read_all_bytes_async(&source_backed, &token).await,
        Err(VfsError::Cancelled)
    ));
}

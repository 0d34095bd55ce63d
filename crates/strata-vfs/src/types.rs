use std::time::SystemTime;

use strata_path::AbsolutePath;

use crate::{VfsError, VfsResult};

/// How an existing or missing file is treated when opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing file; fail when missing.
    Open,
    /// Open an existing file or create an empty one.
    OpenOrCreate,
    /// Create, truncating any existing content.
    Create,
    /// Create; fail when the file already exists.
    CreateNew,
    /// Open an existing file and truncate it.
    Truncate,
}

impl OpenMode {
    /// Whether this mode may bring a missing file into existence.
    pub fn can_create(&self) -> bool {
        matches!(
            self,
            OpenMode::OpenOrCreate | OpenMode::Create | OpenMode::CreateNew
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    pub fn is_readable(&self) -> bool {
        matches!(self, FileAccess::Read | FileAccess::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, FileAccess::Write | FileAccess::ReadWrite)
    }
}

/// Sharing granted to other handles while a file is open. Enforced where the
/// OS enforces it (Windows); advisory elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileShare {
    None,
    Read,
    Write,
    #[default]
    ReadWrite,
}

/// Rejects mode/access combinations that cannot be honored, such as
/// truncating a file through a read-only handle.
pub fn validate_open(mode: OpenMode, access: FileAccess) -> VfsResult<()> {
    let needs_write = matches!(
        mode,
        OpenMode::Create | OpenMode::CreateNew | OpenMode::Truncate
    );
    if needs_write && !access.is_writable() {
        return Err(VfsError::InvalidModeAccess { mode, access });
    }
    Ok(())
}

/// Metadata for a single file.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: AbsolutePath,
    pub size: u64,
    pub modified: SystemTime,
    pub created: SystemTime,
    pub read_only: bool,
    /// File version metadata where the platform records it (Win32 version
    /// resources); `None` elsewhere.
    pub version: Option<String>,
}

/// Metadata for a directory.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: AbsolutePath,
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(OpenMode::Create, FileAccess::Read, false)]
    #[test_case(OpenMode::CreateNew, FileAccess::Read, false)]
    #[test_case(OpenMode::Truncate, FileAccess::Read, false)]
    #[test_case(OpenMode::Open, FileAccess::Read, true)]
    #[test_case(OpenMode::OpenOrCreate, FileAccess::Read, true)]
    #[test_case(OpenMode::Create, FileAccess::Write, true)]
    #[test_case(OpenMode::Truncate, FileAccess::ReadWrite, true)]
    fn open_validation(mode: OpenMode, access: FileAccess, ok: bool) {
        assert_eq!(validate_open(mode, access).is_ok(), ok);
    }
}

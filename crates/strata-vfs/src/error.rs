use strata_path::{AbsolutePath, PathError};
use thiserror::Error;

use crate::types::{FileAccess, OpenMode};

pub type VfsResult<T> = Result<T, VfsError>;

/// Errors surfaced by filesystem operations.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("file not found: {0}")]
    FileNotFound(AbsolutePath),
    #[error("directory not found: {0}")]
    DirectoryNotFound(AbsolutePath),
    #[error("file already exists: {0}")]
    FileAlreadyExists(AbsolutePath),
    /// The path is served by a read-only source and cannot be mutated there.
    #[error("path is read-only: {0}")]
    ReadOnly(AbsolutePath),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("open mode {mode:?} cannot be combined with {access:?} access")]
    InvalidModeAccess { mode: OpenMode, access: FileAccess },
    #[error("not supported on this platform: {0}")]
    PlatformNotSupported(&'static str),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VfsError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VfsError::FileNotFound(_) | VfsError::DirectoryNotFound(_)
        ) || matches!(self, VfsError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

//! Capability interface the decoder writes through.
//!
//! The codec never touches a real disk while unpacking. It replays the
//! archive against a [`VirtualFs`], which the host runtime implements over
//! its in-memory filesystem. Paths are absolute and `/`-separated.

use crate::VfsError;

/// Result of probing a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathInfo {
    /// Whether anything exists at the path.
    pub exists: bool,
    /// Whether the existing node is a directory.
    pub is_dir: bool,
}

impl PathInfo {
    /// Info for a path that does not exist.
    pub const fn missing() -> Self {
        Self {
            exists: false,
            is_dir: false,
        }
    }

    /// Info for an existing directory.
    pub const fn directory() -> Self {
        Self {
            exists: true,
            is_dir: true,
        }
    }

    /// Info for an existing regular file.
    pub const fn file() -> Self {
        Self {
            exists: true,
            is_dir: false,
        }
    }
}

/// Minimal filesystem surface needed to hydrate a file tree.
///
/// Methods take `&self`: implementations are shared between the decoder and
/// the guest runtime and provide their own interior mutability.
pub trait VirtualFs {
    /// Inspect a path.
    fn analyze_path(&self, path: &str) -> PathInfo;

    /// Create a single directory. Fails if the parent is missing.
    fn mkdir(&self, path: &str) -> Result<(), VfsError>;

    /// Create or overwrite a file. Fails if the parent is missing.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError>;

    /// Change permission bits. Best effort.
    fn chmod(&self, path: &str, mode: u32) -> Result<(), VfsError>;
}

impl<T: VirtualFs + ?Sized> VirtualFs for &T {
    fn analyze_path(&self, path: &str) -> PathInfo {
        (**self).analyze_path(path)
    }

    fn mkdir(&self, path: &str) -> Result<(), VfsError> {
        (**self).mkdir(path)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError> {
        (**self).write_file(path, data)
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), VfsError> {
        (**self).chmod(path, mode)
    }
}

impl<T: VirtualFs + ?Sized> VirtualFs for std::sync::Arc<T> {
    fn analyze_path(&self, path: &str) -> PathInfo {
        (**self).analyze_path(path)
    }

    fn mkdir(&self, path: &str) -> Result<(), VfsError> {
        (**self).mkdir(path)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError> {
        (**self).write_file(path, data)
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), VfsError> {
        (**self).chmod(path, mode)
    }
}

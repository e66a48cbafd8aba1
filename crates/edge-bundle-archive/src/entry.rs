//! Archive entries produced by the collector and consumed by the encoder.

use std::path::{Path, PathBuf};

/// What an [`ArchiveEntry`] holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory; carries no content.
    Directory,
    /// A regular file whose bytes live at `source` on the host.
    File {
        /// Size observed when the entry was collected.
        size_bytes: u64,
        /// Host path the encoder reads the content from.
        source: PathBuf,
    },
}

/// One filesystem object to archive.
///
/// `path` is relative and `/`-separated, with no leading slash. Symlinks
/// never appear here: the collector stores the logical path together with
/// the resolved source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Archive-relative path.
    pub path: String,
    /// Directory or file.
    pub kind: EntryKind,
}

impl ArchiveEntry {
    /// Create a directory entry.
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
        }
    }

    /// Create a file entry.
    pub fn file(path: impl Into<String>, source: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File {
                size_bytes,
                source: source.into(),
            },
        }
    }

    /// Returns `true` for directory entries.
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// Declared size in bytes (0 for directories).
    pub fn size_bytes(&self) -> u64 {
        match &self.kind {
            EntryKind::Directory => 0,
            EntryKind::File { size_bytes, .. } => *size_bytes,
        }
    }

    /// Host path of the content, if this is a file.
    pub fn source(&self) -> Option<&Path> {
        match &self.kind {
            EntryKind::Directory => None,
            EntryKind::File { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_entry() {
        let entry = ArchiveEntry::directory("app/Http");
        assert!(entry.is_directory());
        assert_eq!(entry.size_bytes(), 0);
        assert!(entry.source().is_none());
    }

    #[test]
    fn test_file_entry() {
        let entry = ArchiveEntry::file("app/index.php", "/srv/app/index.php", 12);
        assert!(!entry.is_directory());
        assert_eq!(entry.size_bytes(), 12);
        assert_eq!(entry.source(), Some(Path::new("/srv/app/index.php")));
    }
}

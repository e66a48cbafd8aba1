//! Error types for the bundle codec.
//!
//! - [`ArchiveError`]: Failures while collecting, encoding, or decoding a bundle
//! - [`VfsError`]: Failures reported by a [`crate::VirtualFs`] implementation

use std::io;

use thiserror::Error;

/// Errors raised by the archive codec and the file-tree collector.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// A source file could not be read while building the archive.
    ///
    /// The encode is aborted; no partial archive is valid.
    #[error("Failed to read source '{path}': {source}")]
    SourceRead {
        /// Host path of the unreadable source.
        path: String,
        #[source]
        source: io::Error,
    },

    /// A path cannot be represented in the ustar name/prefix fields.
    #[error("Path does not fit a ustar header: {path}")]
    PathTooLong {
        /// The offending archive path.
        path: String,
    },

    /// A file is larger than the 11-digit octal size field allows.
    #[error("Entry too large for ustar: {path} ({size} bytes)")]
    EntryTooLarge {
        /// The offending archive path.
        path: String,
        /// Size of the entry in bytes.
        size: u64,
    },

    /// A header declared more bytes than remain in the buffer.
    #[error(
        "Truncated archive at offset {offset}: entry declares {declared} bytes, {available} available"
    )]
    TruncatedArchive {
        /// Offset of the header block.
        offset: usize,
        /// Number of bytes the header declared.
        declared: u64,
        /// Number of bytes actually left in the buffer.
        available: usize,
    },

    /// A header block could not be parsed.
    #[error("Invalid header at offset {offset}: {reason}")]
    InvalidHeader {
        /// Offset of the header block.
        offset: usize,
        /// Description of the problem.
        reason: String,
    },

    /// An entry path is empty or escapes the destination root.
    #[error("Unsafe entry path: '{path}'")]
    UnsafePath {
        /// The offending path.
        path: String,
    },

    /// A symlink resolves to one of its own ancestors.
    #[error("Symlink loop detected at {path}")]
    SymlinkLoop {
        /// Host path of the looping link.
        path: String,
    },

    /// A host path is not valid UTF-8 and cannot be archived.
    #[error("Non UTF-8 path: {path}")]
    NonUtf8Path {
        /// Lossy rendering of the path.
        path: String,
    },

    /// The virtual filesystem rejected an operation during decode.
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] VfsError),

    /// Writing the encoded stream failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    /// Create a new `SourceRead` error.
    pub fn source_read(path: impl Into<String>, source: io::Error) -> Self {
        Self::SourceRead {
            path: path.into(),
            source,
        }
    }

    /// Create a new `InvalidHeader` error.
    pub fn invalid_header(offset: usize, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a new `UnsafePath` error.
    pub fn unsafe_path(path: impl Into<String>) -> Self {
        Self::UnsafePath { path: path.into() }
    }

    /// Returns `true` if the archive ended before a declared entry did.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::TruncatedArchive { .. })
    }
}

/// Errors reported by a virtual filesystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VfsError {
    /// The path (or its parent) does not exist.
    #[error("No such file or directory: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// The path already exists.
    #[error("Already exists: {path}")]
    AlreadyExists {
        /// The existing path.
        path: String,
    },

    /// A path component is a file where a directory was required.
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// The offending path.
        path: String,
    },

    /// A file operation targeted a directory.
    #[error("Is a directory: {path}")]
    IsADirectory {
        /// The offending path.
        path: String,
    },

    /// The path is not absolute or otherwise malformed.
    #[error("Invalid path: '{path}'")]
    InvalidPath {
        /// The malformed path.
        path: String,
    },
}

impl VfsError {
    /// Create a new `NotFound` error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Returns `true` if the error reports a missing path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

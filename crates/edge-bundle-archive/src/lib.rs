//! Bundle codec for edge-bundle.
//!
//! This crate turns an application tree into a single ustar archive and
//! replays that archive into a virtual filesystem:
//! - [`Collector`]: Walks include paths, applies excludes, resolves symlinks
//! - [`TarEncoder`] / [`encode`]: Writes 512-byte ustar headers and padded content
//! - [`decode`]: Replays an archive through a [`VirtualFs`] with `mkdir -p` semantics
//! - [`ArchiveInflater`]: Chunk-fed gzip decompression for `.tar.gz` bundles
//!
//! # Pipeline
//!
//! ```text
//! host tree ──Collector──▶ Vec<ArchiveEntry> ──encode──▶ tar ──gzip──▶ app.tar.gz
//!
//! app.tar.gz ──ArchiveInflater──▶ tar ──decode──▶ VirtualFs (rooted at /app)
//! ```

pub mod collector;
pub mod decoder;
pub mod encoder;
pub mod entry;
pub mod error;
pub mod gzip;
pub mod header;
pub mod vfs;

pub use collector::Collector;
pub use decoder::{DecodeReport, decode, ensure_directory_chain};
pub use encoder::{ByteSource, HostFs, TarEncoder, encode};
pub use entry::{ArchiveEntry, EntryKind};
pub use error::{ArchiveError, VfsError};
pub use gzip::{ArchiveInflater, gzip, is_gzip};
pub use vfs::{PathInfo, VirtualFs};

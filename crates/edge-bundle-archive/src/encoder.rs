//! ustar encoder.
//!
//! Entries are written in the order given: a header block, then for files
//! the content padded with zeros to the next 512-byte boundary. Modes are
//! fixed (`0777` directories, `0666` files), owner is root, and every header
//! carries the same mtime taken when the encoder is created. Content is
//! therefore stable across builds even though the archive bytes are not.

use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument};

use crate::header::{BLOCK_SIZE, EntryType, build_header, padded_len};
use crate::{ArchiveEntry, ArchiveError, EntryKind};

const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Resolves a file entry's source handle to its bytes.
pub trait ByteSource {
    /// Read the complete content behind `source`.
    fn read(&self, source: &Path) -> std::io::Result<Vec<u8>>;
}

/// Reads sources straight from the host filesystem.
///
/// Symlinks are followed, so a link to a file yields the target's content.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl ByteSource for HostFs {
    fn read(&self, source: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(source)
    }
}

/// Streaming ustar writer.
pub struct TarEncoder<W: Write> {
    writer: W,
    mtime: u64,
    entries: usize,
    bytes_written: u64,
}

impl<W: Write> TarEncoder<W> {
    /// Create an encoder stamping every header with the current time.
    pub fn new(writer: W) -> Self {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        Self {
            writer,
            mtime,
            entries: 0,
            bytes_written: 0,
        }
    }

    /// Override the mtime written into every header.
    #[must_use]
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Append a directory header. A trailing `/` is added if missing.
    pub fn append_directory(&mut self, path: &str) -> Result<(), ArchiveError> {
        let mut name = normalize(path)?;
        name.push('/');

        let header = build_header(&name, EntryType::Directory, 0, self.mtime)?;
        self.write(&header)?;
        self.entries += 1;

        debug!(path = %name, "Directory appended");
        Ok(())
    }

    /// Append a file header followed by its padded content.
    pub fn append_file(&mut self, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let name = normalize(path)?;
        let header = build_header(&name, EntryType::File, data.len() as u64, self.mtime)?;

        self.write(&header)?;
        self.write(data)?;

        let padding = padded_len(data.len()) - data.len();
        self.write(&ZERO_BLOCK[..padding])?;
        self.entries += 1;

        debug!(path = %name, size = data.len(), "File appended");
        Ok(())
    }

    /// Append a collected entry, reading file content through `source`.
    pub fn append_entry(
        &mut self,
        entry: &ArchiveEntry,
        source: &impl ByteSource,
    ) -> Result<(), ArchiveError> {
        match &entry.kind {
            EntryKind::Directory => self.append_directory(&entry.path),
            EntryKind::File {
                source: path,
                size_bytes,
            } => {
                let data = source
                    .read(path)
                    .map_err(|e| ArchiveError::source_read(path.display().to_string(), e))?;

                if data.len() as u64 != *size_bytes {
                    debug!(
                        path = %entry.path,
                        collected = size_bytes,
                        actual = data.len(),
                        "Source size changed since collection"
                    );
                }

                self.append_file(&entry.path, &data)
            }
        }
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Write the two zero end blocks and return the underlying writer.
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        self.write(&ZERO_BLOCK)?;
        self.write(&ZERO_BLOCK)?;
        self.writer.flush()?;

        debug!(
            entries = self.entries,
            bytes = self.bytes_written,
            "Archive finished"
        );
        Ok(self.writer)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), ArchiveError> {
        self.writer.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

/// Encode a list of entries into one contiguous buffer.
///
/// Any unreadable source aborts the whole encode.
#[instrument(skip(entries, source), fields(entries = entries.len()))]
pub fn encode(entries: &[ArchiveEntry], source: &impl ByteSource) -> Result<Vec<u8>, ArchiveError> {
    let mut encoder = TarEncoder::new(Vec::new());
    for entry in entries {
        encoder.append_entry(entry, source)?;
    }

    let count = encoder.entry_count();
    let bytes = encoder.finish()?;

    info!(entries = count, bytes = bytes.len(), "Archive encoded");
    Ok(bytes)
}

/// Strip leading `./` and `/` plus trailing `/`; reject empty paths.
fn normalize(path: &str) -> Result<String, ArchiveError> {
    let mut trimmed = path;
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    let trimmed = trimmed.trim_end_matches('/');

    if trimmed.is_empty() {
        return Err(ArchiveError::unsafe_path(path));
    }
    Ok(trimmed.to_string())
}

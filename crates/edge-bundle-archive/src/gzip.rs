//! Gzip wrapping for bundles.
//!
//! Bundles ship as `.tar.gz`. [`ArchiveInflater`] takes the compressed
//! payload chunk by chunk as it arrives and sniffs the gzip magic on the
//! first bytes: a payload that is already a plain tar (for example because
//! an intermediary removed the content encoding) passes through untouched.

use std::io::{self, Write};

use flate2::Compression;
use flate2::write::{GzDecoder, GzEncoder};

/// First two bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compress a buffer with default settings.
pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Returns `true` if `data` starts with the gzip magic.
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Incremental decompressor for a bundle payload.
pub struct ArchiveInflater {
    state: InflaterState,
    compressed_len: u64,
}

enum InflaterState {
    Sniffing(Vec<u8>),
    Gzip(GzDecoder<Vec<u8>>),
    Raw(Vec<u8>),
}

impl ArchiveInflater {
    /// Create an inflater waiting for its first bytes.
    pub fn new() -> Self {
        Self {
            state: InflaterState::Sniffing(Vec::new()),
            compressed_len: 0,
        }
    }

    /// Feed the next chunk of the payload.
    pub fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.compressed_len += chunk.len() as u64;

        match &mut self.state {
            InflaterState::Sniffing(buffer) => {
                buffer.extend_from_slice(chunk);
                if buffer.len() >= GZIP_MAGIC.len() {
                    let buffered = std::mem::take(buffer);
                    self.state = if is_gzip(&buffered) {
                        let mut decoder = GzDecoder::new(Vec::new());
                        decoder.write_all(&buffered)?;
                        InflaterState::Gzip(decoder)
                    } else {
                        InflaterState::Raw(buffered)
                    };
                }
                Ok(())
            }
            InflaterState::Gzip(decoder) => decoder.write_all(chunk),
            InflaterState::Raw(buffer) => {
                buffer.extend_from_slice(chunk);
                Ok(())
            }
        }
    }

    /// Number of payload bytes fed so far.
    pub fn compressed_len(&self) -> u64 {
        self.compressed_len
    }

    /// Returns `true` once the payload has been identified as gzip.
    pub fn is_compressed(&self) -> bool {
        matches!(self.state, InflaterState::Gzip(_))
    }

    /// Finish the stream and return the tar bytes.
    ///
    /// # Errors
    ///
    /// Fails if the gzip stream is corrupt or ends early.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        match self.state {
            InflaterState::Sniffing(buffer) | InflaterState::Raw(buffer) => Ok(buffer),
            InflaterState::Gzip(decoder) => decoder.finish(),
        }
    }
}

impl Default for ArchiveInflater {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ArchiveInflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveInflater")
            .field("compressed_len", &self.compressed_len)
            .field("is_compressed", &self.is_compressed())
            .finish_non_exhaustive()
    }
}

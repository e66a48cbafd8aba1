//! ustar decoder.
//!
//! Replays an archive against a [`VirtualFs`] in a single synchronous pass.
//! Every destination path is joined onto a caller-supplied root, and parent
//! directories are created on demand so archives that omit intermediate
//! directory entries still hydrate completely.

use tracing::{debug, instrument, warn};

use crate::header::{BLOCK_SIZE, EntryType, is_zero_block, padded_len, parse_header};
use crate::{ArchiveError, VfsError, VirtualFs};

/// Summary of a decode pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Directory entries applied.
    pub directories: usize,
    /// File entries written.
    pub files: usize,
    /// Entries with an unhandled typeflag.
    pub skipped: usize,
    /// Total file content bytes written.
    pub bytes_written: u64,
}

/// Decode `archive` into `fs`, placing every entry under `root`.
///
/// A `root` of `""` or `"/"` maps entries directly below `/`.
///
/// # Errors
///
/// Returns [`ArchiveError::TruncatedArchive`] when a header declares more
/// content than the buffer holds. Entries applied before the failure stay in
/// place.
#[instrument(skip(archive, fs), fields(archive_len = archive.len()))]
pub fn decode<F: VirtualFs + ?Sized>(
    archive: &[u8],
    fs: &F,
    root: &str,
) -> Result<DecodeReport, ArchiveError> {
    let mut report = DecodeReport::default();
    let mut offset = 0usize;

    while offset < archive.len() {
        let Some(block) = archive.get(offset..offset + BLOCK_SIZE) else {
            return Err(ArchiveError::TruncatedArchive {
                offset,
                declared: BLOCK_SIZE as u64,
                available: archive.len() - offset,
            });
        };

        if is_zero_block(block) {
            break;
        }

        let header = parse_header(block, offset)?;
        let data_start = offset + BLOCK_SIZE;
        let available = archive.len() - data_start;

        let size = usize::try_from(header.size)
            .ok()
            .filter(|&size| size <= available)
            .ok_or(ArchiveError::TruncatedArchive {
                offset,
                declared: header.size,
                available,
            })?;

        match header.entry_type {
            EntryType::Directory => {
                let dest = destination(root, &header.path)?;
                ensure_directory_chain(fs, &dest)?;
                report.directories += 1;
            }
            EntryType::File => {
                let dest = destination(root, &header.path)?;
                ensure_directory_chain(fs, parent(&dest))?;
                fs.write_file(&dest, &archive[data_start..data_start + size])?;
                report.files += 1;
                report.bytes_written += header.size;
            }
            EntryType::Other(flag) => {
                warn!(
                    path = %header.path,
                    typeflag = %char::from(flag),
                    "Skipping unsupported entry type"
                );
                report.skipped += 1;
            }
        }

        offset = data_start + padded_len(size);
    }

    debug!(
        directories = report.directories,
        files = report.files,
        skipped = report.skipped,
        bytes = report.bytes_written,
        "Archive decoded"
    );

    Ok(report)
}

/// Create `path` and every missing ancestor, root to leaf (`mkdir -p`).
///
/// Returns the number of directories created. Existing directories are
/// left alone; an existing file anywhere on the chain is an error.
pub fn ensure_directory_chain<F: VirtualFs + ?Sized>(
    fs: &F,
    path: &str,
) -> Result<usize, VfsError> {
    if !path.starts_with('/') {
        return Err(VfsError::InvalidPath {
            path: path.to_string(),
        });
    }

    let mut created = 0;
    let mut current = String::with_capacity(path.len());

    for component in path.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);

        let info = fs.analyze_path(&current);
        if !info.exists {
            fs.mkdir(&current)?;
            created += 1;
        } else if !info.is_dir {
            return Err(VfsError::NotADirectory { path: current });
        }
    }

    Ok(created)
}

/// Join an archive path onto `root`, rejecting anything that could escape it.
fn destination(root: &str, archive_path: &str) -> Result<String, ArchiveError> {
    let mut dest = String::from(root.trim_end_matches('/'));
    let mut components = 0;

    for component in archive_path.split('/') {
        match component {
            "" | "." => {}
            ".." => return Err(ArchiveError::unsafe_path(archive_path)),
            name => {
                dest.push('/');
                dest.push_str(name);
                components += 1;
            }
        }
    }

    if components == 0 {
        return Err(ArchiveError::unsafe_path(archive_path));
    }
    if !dest.starts_with('/') {
        dest.insert(0, '/');
    }

    Ok(dest)
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

//! ustar header layout.
//!
//! Only the fields the bundle needs are populated: name, mode, uid, gid,
//! size, mtime, checksum, typeflag, magic, version and prefix. Everything
//! else stays zeroed.

use crate::ArchiveError;

/// Size of every header and data block.
pub const BLOCK_SIZE: usize = 512;

/// Capacity of the `name` field.
pub const NAME_LEN: usize = 100;

/// Capacity of the `prefix` field.
pub const PREFIX_LEN: usize = 155;

/// Permission bits written for directories.
pub const DIR_MODE: u32 = 0o777;

/// Permission bits written for regular files.
pub const FILE_MODE: u32 = 0o666;

/// Largest value an 11-digit octal field can hold.
pub const MAX_OCTAL_11: u64 = 0o777_7777_7777;

const NAME: (usize, usize) = (0, 100);
const MODE: (usize, usize) = (100, 8);
const UID: (usize, usize) = (108, 8);
const GID: (usize, usize) = (116, 8);
const SIZE: (usize, usize) = (124, 12);
const MTIME: (usize, usize) = (136, 12);
const CHECKSUM: (usize, usize) = (148, 8);
const TYPEFLAG: usize = 156;
const MAGIC: (usize, usize) = (257, 6);
const VERSION: (usize, usize) = (263, 2);
const PREFIX: (usize, usize) = (345, 155);

/// A raw 512-byte header block.
pub type HeaderBlock = [u8; BLOCK_SIZE];

/// Kind of entry a header describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file (`'0'` or NUL).
    File,
    /// Directory (`'5'`).
    Directory,
    /// Anything else; skipped by the decoder.
    Other(u8),
}

impl EntryType {
    /// Interpret a typeflag byte.
    pub fn from_flag(flag: u8) -> Self {
        match flag {
            b'0' | 0 => Self::File,
            b'5' => Self::Directory,
            other => Self::Other(other),
        }
    }

    /// The typeflag byte written for this entry type.
    pub fn flag(self) -> u8 {
        match self {
            Self::File => b'0',
            Self::Directory => b'5',
            Self::Other(flag) => flag,
        }
    }
}

/// The fields the decoder reads back from a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    /// Full entry path (`prefix/name` when a prefix is present).
    pub path: String,
    /// Declared content size in bytes.
    pub size: u64,
    /// Entry type from the typeflag.
    pub entry_type: EntryType,
}

/// Split a path into `(prefix, name)` ustar fields.
///
/// Paths up to 100 bytes go entirely into `name`. Longer paths split at the
/// last `/` at or before byte 155; the remainder must then fit in 100 bytes.
/// A directory's trailing `/` never counts as a split point and stays in
/// `name`.
pub fn split_path(path: &str) -> Result<(&str, &str), ArchiveError> {
    if path.len() <= NAME_LEN {
        return Ok(("", path));
    }

    let too_long = || ArchiveError::PathTooLong {
        path: path.to_string(),
    };

    let body = path.strip_suffix('/').unwrap_or(path);
    let search_end = body.len().min(PREFIX_LEN + 1);
    let split = body.as_bytes()[..search_end]
        .iter()
        .rposition(|&b| b == b'/')
        .ok_or_else(too_long)?;

    let (prefix, name) = (&path[..split], &path[split + 1..]);
    if name.is_empty() || name == "/" || name.len() > NAME_LEN {
        return Err(too_long());
    }

    Ok((prefix, name))
}

/// Build a complete header block with a valid checksum.
pub fn build_header(
    path: &str,
    entry_type: EntryType,
    size: u64,
    mtime: u64,
) -> Result<HeaderBlock, ArchiveError> {
    if size > MAX_OCTAL_11 {
        return Err(ArchiveError::EntryTooLarge {
            path: path.to_string(),
            size,
        });
    }

    let (prefix, name) = split_path(path)?;
    let mode = match entry_type {
        EntryType::Directory => DIR_MODE,
        _ => FILE_MODE,
    };

    let mut block = [0u8; BLOCK_SIZE];
    put_bytes(&mut block, NAME, name.as_bytes());
    put_bytes(&mut block, MODE, format!("{mode:07o}\0").as_bytes());
    put_bytes(&mut block, UID, b"0000000\0");
    put_bytes(&mut block, GID, b"0000000\0");
    put_bytes(&mut block, SIZE, format!("{size:011o}\0").as_bytes());
    put_bytes(
        &mut block,
        MTIME,
        format!("{:011o}\0", mtime.min(MAX_OCTAL_11)).as_bytes(),
    );
    block[TYPEFLAG] = entry_type.flag();
    put_bytes(&mut block, MAGIC, b"ustar\0");
    put_bytes(&mut block, VERSION, b"00");
    put_bytes(&mut block, PREFIX, prefix.as_bytes());

    let sum = checksum(&block);
    put_bytes(&mut block, CHECKSUM, format!("{sum:06o}\0 ").as_bytes());

    Ok(block)
}

/// Compute the ustar checksum, counting the checksum field as spaces.
pub fn checksum(block: &HeaderBlock) -> u32 {
    let (start, len) = CHECKSUM;
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (start..start + len).contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(b)
            }
        })
        .sum()
}

/// Check that the stored checksum matches the block contents.
pub fn verify_checksum(block: &HeaderBlock) -> bool {
    let (start, len) = CHECKSUM;
    parse_octal(&block[start..start + len])
        .is_some_and(|stored| stored == u64::from(checksum(block)))
}

/// Parse the fields the decoder needs from a header block.
pub fn parse_header(block: &[u8], offset: usize) -> Result<ParsedHeader, ArchiveError> {
    if block.len() < BLOCK_SIZE {
        return Err(ArchiveError::invalid_header(offset, "short header block"));
    }

    let name = c_string(field(block, NAME), offset)?;
    let prefix = c_string(field(block, PREFIX), offset)?;
    let size = parse_octal(field(block, SIZE))
        .ok_or_else(|| ArchiveError::invalid_header(offset, "size field is not octal"))?;

    let path = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    };

    Ok(ParsedHeader {
        path,
        size,
        entry_type: EntryType::from_flag(block[TYPEFLAG]),
    })
}

/// Returns `true` if every byte of the block is zero.
pub fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Round a content length up to the next block boundary.
pub fn padded_len(size: usize) -> usize {
    size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Parse a NUL- or space-terminated octal field. Leading spaces are allowed.
pub fn parse_octal(field: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    let digits = field.iter().skip_while(|&&b| b == b' ');

    for &b in digits {
        match b {
            b'0'..=b'7' => {
                value = value.checked_mul(8)?.checked_add(u64::from(b - b'0'))?;
            }
            0 | b' ' => break,
            _ => return None,
        }
    }

    Some(value)
}

fn field(block: &[u8], (start, len): (usize, usize)) -> &[u8] {
    &block[start..start + len]
}

fn put_bytes(block: &mut HeaderBlock, (start, len): (usize, usize), bytes: &[u8]) {
    let n = bytes.len().min(len);
    block[start..start + n].copy_from_slice(&bytes[..n]);
}

fn c_string(bytes: &[u8], offset: usize) -> Result<&str, ArchiveError> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map_err(|_| ArchiveError::invalid_header(offset, "path is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_path_not_split() {
        assert_eq!(split_path("a/b.txt").unwrap(), ("", "a/b.txt"));

        let exact = "x".repeat(100);
        assert_eq!(split_path(&exact).unwrap(), ("", exact.as_str()));
    }

    #[test]
    fn test_long_path_split_at_last_slash() {
        let dir = "d".repeat(90);
        let path = format!("{dir}/{dir}/file.php");
        let (prefix, name) = split_path(&path).unwrap();

        // Only the first slash sits at or before byte 155.
        assert_eq!(prefix, dir);
        assert_eq!(name, format!("{dir}/file.php"));
    }

    #[test]
    fn test_long_path_without_usable_slash() {
        let path = "n".repeat(120);
        assert!(matches!(
            split_path(&path),
            Err(ArchiveError::PathTooLong { .. })
        ));

        // Remainder after the split still exceeds the name field.
        let path = format!("vendor/{}", "n".repeat(101));
        assert!(matches!(
            split_path(&path),
            Err(ArchiveError::PathTooLong { .. })
        ));
    }

    #[test]
    fn test_header_layout() {
        let block = build_header("a/b.txt", EntryType::File, 5, 0o1234).unwrap();

        assert_eq!(&block[0..7], b"a/b.txt");
        assert_eq!(&block[100..108], b"0000666\0");
        assert_eq!(&block[108..116], b"0000000\0");
        assert_eq!(&block[116..124], b"0000000\0");
        assert_eq!(&block[124..136], b"00000000005\0");
        assert_eq!(&block[136..148], b"00000001234\0");
        assert_eq!(block[156], b'0');
        assert_eq!(&block[257..263], b"ustar\0");
        assert_eq!(&block[263..265], b"00");
        assert_eq!(block[154], 0);
        assert_eq!(block[155], b' ');
    }

    #[test]
    fn test_directory_mode() {
        let block = build_header("a/", EntryType::Directory, 0, 0).unwrap();
        assert_eq!(&block[100..108], b"0000777\0");
        assert_eq!(block[156], b'5');
    }

    #[test]
    fn test_checksum_roundtrip() {
        let block = build_header("app/index.php", EntryType::File, 42, 1_700_000_000).unwrap();
        assert!(verify_checksum(&block));

        let mut tampered = block;
        tampered[0] = b'b';
        assert!(!verify_checksum(&tampered));
    }

    #[test]
    fn test_parse_header_with_prefix() {
        let dir = "p".repeat(120);
        let path = format!("{dir}/name.txt");
        let block = build_header(&path, EntryType::File, 7, 0).unwrap();

        let parsed = parse_header(&block, 0).unwrap();
        assert_eq!(parsed.path, path);
        assert_eq!(parsed.size, 7);
        assert_eq!(parsed.entry_type, EntryType::File);
    }

    #[test]
    fn test_split_long_directory_keeps_trailing_slash() {
        let parent = format!("vendor/{}", "a".repeat(60));
        let path = format!("{parent}/{}/", "b".repeat(60));
        let (prefix, name) = split_path(&path).unwrap();
        assert_eq!(prefix, parent);
        assert_eq!(name, format!("{}/", "b".repeat(60)));

        let block = build_header(&path, EntryType::Directory, 0, 0).unwrap();
        let parsed = parse_header(&block, 0).unwrap();
        assert_eq!(parsed.path, path);
        assert_eq!(parsed.entry_type, EntryType::Directory);

        let oversized = format!("vendor/{}/", "d".repeat(NAME_LEN));
        assert!(matches!(
            split_path(&oversized),
            Err(ArchiveError::PathTooLong { .. })
        ));
    }

    #[test]
    fn test_parse_octal() {
        assert_eq!(parse_octal(b"00000000005\0"), Some(5));
        assert_eq!(parse_octal(b"     17 \0"), Some(15));
        assert_eq!(parse_octal(b"\0\0\0"), Some(0));
        assert_eq!(parse_octal(b"0009\0"), None);
    }

    #[test]
    fn test_entry_type_flags() {
        assert_eq!(EntryType::from_flag(b'0'), EntryType::File);
        assert_eq!(EntryType::from_flag(0), EntryType::File);
        assert_eq!(EntryType::from_flag(b'5'), EntryType::Directory);
        assert_eq!(EntryType::from_flag(b'2'), EntryType::Other(b'2'));
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 512);
        assert_eq!(padded_len(512), 512);
        assert_eq!(padded_len(513), 1024);
    }

    #[test]
    fn test_entry_too_large() {
        let result = build_header("big.bin", EntryType::File, MAX_OCTAL_11 + 1, 0);
        assert!(matches!(result, Err(ArchiveError::EntryTooLarge { .. })));
    }
}

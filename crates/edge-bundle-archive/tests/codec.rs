//! End-to-end tests for the bundle codec.
//!
//! These exercise collect → encode → decode against an in-memory
//! filesystem and check the wire layout byte for byte.

use std::cell::RefCell;
use std::collections::BTreeMap;

use edge_bundle_archive::header::{BLOCK_SIZE, EntryType, build_header, verify_checksum};
use edge_bundle_archive::{
    ArchiveEntry, ArchiveError, ArchiveInflater, ByteSource, Collector, HostFs, PathInfo,
    TarEncoder, VfsError, VirtualFs, decode, encode, ensure_directory_chain, gzip,
};

// ============================================================================
// Test filesystem
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir(u32),
    File(Vec<u8>),
}

struct TestFs {
    nodes: RefCell<BTreeMap<String, Node>>,
}

impl TestFs {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir(0o755));
        Self {
            nodes: RefCell::new(nodes),
        }
    }

    fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.borrow().get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.borrow().get(path), Some(Node::Dir(_)))
    }

    fn mode(&self, path: &str) -> Option<u32> {
        match self.nodes.borrow().get(path) {
            Some(Node::Dir(mode)) => Some(*mode),
            _ => None,
        }
    }

    fn paths(&self) -> Vec<String> {
        self.nodes.borrow().keys().cloned().collect()
    }

    fn parent_is_dir(&self, path: &str) -> bool {
        let parent = match path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &path[..idx],
        };
        self.is_dir(parent)
    }
}

impl VirtualFs for TestFs {
    fn analyze_path(&self, path: &str) -> PathInfo {
        match self.nodes.borrow().get(path) {
            Some(Node::Dir(_)) => PathInfo::directory(),
            Some(Node::File(_)) => PathInfo::file(),
            None => PathInfo::missing(),
        }
    }

    fn mkdir(&self, path: &str) -> Result<(), VfsError> {
        if !self.parent_is_dir(path) {
            return Err(VfsError::not_found(path));
        }
        let mut nodes = self.nodes.borrow_mut();
        if nodes.contains_key(path) {
            return Err(VfsError::AlreadyExists {
                path: path.to_string(),
            });
        }
        nodes.insert(path.to_string(), Node::Dir(0o755));
        Ok(())
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError> {
        if !self.parent_is_dir(path) {
            return Err(VfsError::not_found(path));
        }
        self.nodes
            .borrow_mut()
            .insert(path.to_string(), Node::File(data.to_vec()));
        Ok(())
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), VfsError> {
        match self.nodes.borrow_mut().get_mut(path) {
            Some(Node::Dir(current)) => {
                *current = mode;
                Ok(())
            }
            Some(Node::File(_)) => Ok(()),
            None => Err(VfsError::not_found(path)),
        }
    }
}

/// Serves file content from a fixed table instead of the host disk.
struct TableSource(BTreeMap<&'static str, &'static [u8]>);

impl ByteSource for TableSource {
    fn read(&self, source: &std::path::Path) -> std::io::Result<Vec<u8>> {
        source
            .to_str()
            .and_then(|key| self.0.get(key))
            .map(|data| data.to_vec())
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
    }
}

fn sample_entries() -> (Vec<ArchiveEntry>, TableSource) {
    let entries = vec![
        ArchiveEntry::directory("a"),
        ArchiveEntry::file("a/b.txt", "b.txt", 5),
        ArchiveEntry::directory("a/c"),
    ];
    let source = TableSource(BTreeMap::from([("b.txt", b"hello".as_slice())]));
    (entries, source)
}

// ============================================================================
// Layout
// ============================================================================

#[test]
fn test_sample_tree_is_exactly_3072_bytes() {
    let (entries, source) = sample_entries();
    let archive = encode(&entries, &source).unwrap();

    // 3 headers + 1 data block + 2 end blocks
    assert_eq!(archive.len(), 3072);
    assert_eq!(&archive[0..2], b"a/");
    assert_eq!(&archive[512..519], b"a/b.txt");
    assert_eq!(&archive[1024..1029], b"hello");
    assert_eq!(&archive[1536..1540], b"a/c/");
    assert!(archive[2048..].iter().all(|&b| b == 0));
}

#[test]
fn test_sample_tree_decodes_under_mount_root() {
    let (entries, source) = sample_entries();
    let archive = encode(&entries, &source).unwrap();

    let fs = TestFs::new();
    let report = decode(&archive, &fs, "/app").unwrap();

    assert_eq!(report.directories, 2);
    assert_eq!(report.files, 1);
    assert_eq!(report.bytes_written, 5);
    assert!(fs.is_dir("/app"));
    assert!(fs.is_dir("/app/a"));
    assert!(fs.is_dir("/app/a/c"));
    assert_eq!(fs.file("/app/a/b.txt").unwrap(), b"hello");
    assert_eq!(
        fs.paths(),
        vec!["/", "/app", "/app/a", "/app/a/b.txt", "/app/a/c"]
    );
}

#[test]
fn test_every_header_checksum_is_valid() {
    let (entries, source) = sample_entries();
    let archive = encode(&entries, &source).unwrap();

    for offset in [0, 512, 1536] {
        let block: [u8; BLOCK_SIZE] = archive[offset..offset + BLOCK_SIZE].try_into().unwrap();
        assert!(verify_checksum(&block), "bad checksum at {offset}");
        assert_eq!(&block[154..156], b"\0 ");
    }
}

#[test]
fn test_alignment_and_end_blocks() {
    let sizes = [0usize, 1, 511, 512, 513, 2000];
    let mut encoder = TarEncoder::new(Vec::new()).with_mtime(0);
    for (i, size) in sizes.iter().enumerate() {
        encoder
            .append_file(&format!("f{i}.bin"), &vec![0xAB; *size])
            .unwrap();
    }
    let archive = encoder.finish().unwrap();

    assert_eq!(archive.len() % BLOCK_SIZE, 0);
    let tail = &archive[archive.len() - 2 * BLOCK_SIZE..];
    assert!(tail.iter().all(|&b| b == 0));

    let fs = TestFs::new();
    let report = decode(&archive, &fs, "/").unwrap();
    assert_eq!(report.files, sizes.len());
    for (i, size) in sizes.iter().enumerate() {
        assert_eq!(fs.file(&format!("/f{i}.bin")).unwrap().len(), *size);
    }
}

// ============================================================================
// Long paths
// ============================================================================

#[test]
fn test_long_path_reconstructed() {
    let path = format!("vendor/{}/{}/Provider.php", "p".repeat(80), "q".repeat(60));
    assert!(path.len() > 100);

    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append_file(&path, b"<?php").unwrap();
    let archive = encoder.finish().unwrap();

    // The name field alone cannot hold the path.
    assert_ne!(archive[345], 0);

    let fs = TestFs::new();
    decode(&archive, &fs, "/app").unwrap();
    assert_eq!(fs.file(&format!("/app/{path}")).unwrap(), b"<?php");
}

#[test]
fn test_long_directory_path_roundtrip() {
    let dir = format!("vendor/{}/{}", "p".repeat(60), "q".repeat(60));
    assert!(dir.len() + 1 > 100);

    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append_directory(&dir).unwrap();
    encoder
        .append_file(&format!("{dir}/a.php"), b"<?php")
        .unwrap();
    let archive = encoder.finish().unwrap();

    let fs = TestFs::new();
    let report = decode(&archive, &fs, "/app").unwrap();
    assert_eq!(report.directories, 1);
    assert!(fs.is_dir(&format!("/app/{dir}")));
    assert_eq!(fs.file(&format!("/app/{dir}/a.php")).unwrap(), b"<?php");
}

#[test]
fn test_unsplittable_path_is_rejected() {
    let path = format!("vendor/{}", "n".repeat(140));
    let mut encoder = TarEncoder::new(Vec::new());

    let err = encoder.append_file(&path, b"x").unwrap_err();
    assert!(matches!(err, ArchiveError::PathTooLong { .. }));
}

// ============================================================================
// Decoder behaviour
// ============================================================================

#[test]
fn test_missing_parents_are_created() {
    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append_file("x/y/z.txt", b"deep").unwrap();
    let archive = encoder.finish().unwrap();

    let fs = TestFs::new();
    let report = decode(&archive, &fs, "/app").unwrap();

    assert_eq!(report.directories, 0);
    assert!(fs.is_dir("/app/x"));
    assert!(fs.is_dir("/app/x/y"));
    assert_eq!(fs.file("/app/x/y/z.txt").unwrap(), b"deep");
}

#[test]
fn test_truncated_archive_detected() {
    let header = build_header("big.bin", EntryType::File, 1_000_000, 0).unwrap();
    let mut archive = header.to_vec();
    archive.extend_from_slice(&[1u8; 10]);

    let fs = TestFs::new();
    let err = decode(&archive, &fs, "/app").unwrap_err();

    assert!(err.is_truncated());
    assert!(matches!(
        err,
        ArchiveError::TruncatedArchive {
            offset: 0,
            declared: 1_000_000,
            available: 10,
        }
    ));
    assert!(fs.file("/app/big.bin").is_none());
}

#[test]
fn test_truncation_keeps_earlier_entries() {
    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append_file("first.txt", b"kept").unwrap();
    let mut archive = encoder.finish().unwrap();
    archive.truncate(1024);
    archive.extend_from_slice(&build_header("second.txt", EntryType::File, 4096, 0).unwrap());

    let fs = TestFs::new();
    assert!(decode(&archive, &fs, "/").unwrap_err().is_truncated());
    assert_eq!(fs.file("/first.txt").unwrap(), b"kept");
}

#[test]
fn test_unknown_typeflag_is_skipped() {
    let mut archive = build_header("link", EntryType::Other(b'2'), 0, 0)
        .unwrap()
        .to_vec();
    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append_file("after.txt", b"ok").unwrap();
    archive.extend(encoder.finish().unwrap());

    let fs = TestFs::new();
    let report = decode(&archive, &fs, "/app").unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.files, 1);
    assert_eq!(fs.analyze_path("/app/link"), PathInfo::missing());
    assert_eq!(fs.file("/app/after.txt").unwrap(), b"ok");
}

#[test]
fn test_file_overwritten_by_later_entry() {
    let mut encoder = TarEncoder::new(Vec::new());
    encoder.append_file("config.php", b"old").unwrap();
    encoder.append_file("config.php", b"new").unwrap();
    let archive = encoder.finish().unwrap();

    let fs = TestFs::new();
    decode(&archive, &fs, "/app").unwrap();
    assert_eq!(fs.file("/app/config.php").unwrap(), b"new");
}

#[test]
fn test_escaping_path_rejected() {
    let header = build_header("../etc/passwd", EntryType::File, 0, 0).unwrap();
    let mut archive = header.to_vec();
    archive.extend_from_slice(&[0u8; 1024]);

    let fs = TestFs::new();
    let err = decode(&archive, &fs, "/app").unwrap_err();
    assert!(matches!(err, ArchiveError::UnsafePath { .. }));
}

#[test]
fn test_ensure_directory_chain() {
    let fs = TestFs::new();

    assert_eq!(ensure_directory_chain(&fs, "/app/storage/logs").unwrap(), 3);
    assert_eq!(ensure_directory_chain(&fs, "/app/storage/logs").unwrap(), 0);
    assert_eq!(ensure_directory_chain(&fs, "/app/storage/cache").unwrap(), 1);

    fs.write_file("/app/file", b"x").unwrap();
    assert!(matches!(
        ensure_directory_chain(&fs, "/app/file/sub"),
        Err(VfsError::NotADirectory { .. })
    ));
    assert!(matches!(
        ensure_directory_chain(&fs, "relative"),
        Err(VfsError::InvalidPath { .. })
    ));

    fs.chmod("/app/storage/logs", 0o777).unwrap();
    assert_eq!(fs.mode("/app/storage/logs"), Some(0o777));
}

#[test]
fn test_gzipped_archive_decodes() {
    let (entries, source) = sample_entries();
    let archive = encode(&entries, &source).unwrap();
    let compressed = gzip(&archive).unwrap();

    let mut inflater = ArchiveInflater::new();
    for chunk in compressed.chunks(64) {
        inflater.push(chunk).unwrap();
    }
    let inflated = inflater.finish().unwrap();
    assert_eq!(inflated, archive);

    let fs = TestFs::new();
    decode(&inflated, &fs, "/app").unwrap();
    assert_eq!(fs.file("/app/a/b.txt").unwrap(), b"hello");
}

// ============================================================================
// Host tree round trip
// ============================================================================

#[cfg(unix)]
#[test]
fn test_roundtrip_with_symlinks() {
    use std::os::unix::fs::symlink;

    let dir = tempfile::tempdir().unwrap();
    let app = dir.path().join("app");
    std::fs::create_dir_all(app.join("sub")).unwrap();
    std::fs::write(app.join("real.txt"), b"real content").unwrap();
    std::fs::write(app.join("sub/inner.txt"), b"inner").unwrap();
    std::fs::write(app.join("README.md"), b"docs").unwrap();
    symlink("real.txt", app.join("link.txt")).unwrap();
    symlink("sub", app.join("dirlink")).unwrap();

    let entries = Collector::new(dir.path())
        .include("app")
        .exclude("*.md")
        .collect()
        .unwrap();

    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "app",
            "app/dirlink",
            "app/dirlink/inner.txt",
            "app/link.txt",
            "app/real.txt",
            "app/sub",
            "app/sub/inner.txt",
        ]
    );

    let archive = encode(&entries, &HostFs).unwrap();
    let fs = TestFs::new();
    decode(&archive, &fs, "/srv").unwrap();

    assert_eq!(fs.file("/srv/app/link.txt").unwrap(), b"real content");
    assert_eq!(fs.file("/srv/app/real.txt").unwrap(), b"real content");
    assert!(fs.is_dir("/srv/app/dirlink"));
    assert_eq!(fs.file("/srv/app/dirlink/inner.txt").unwrap(), b"inner");
    assert!(fs.file("/srv/app/README.md").is_none());
}

#[cfg(unix)]
#[test]
fn test_symlink_loop_rejected() {
    use std::os::unix::fs::symlink;

    let dir = tempfile::tempdir().unwrap();
    let app = dir.path().join("app");
    std::fs::create_dir_all(app.join("nested")).unwrap();
    symlink("..", app.join("nested/up")).unwrap();

    let err = Collector::new(dir.path()).include("app").collect().unwrap_err();
    assert!(matches!(err, ArchiveError::SymlinkLoop { .. }));
}

#[test]
fn test_single_file_include() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("artisan"), b"#!/usr/bin/env php").unwrap();

    let entries = Collector::new(dir.path()).include("artisan").collect().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "artisan");
    assert_eq!(entries[0].size_bytes(), 18);
}

#[test]
fn test_whole_root_include_skips_root_and_output() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("public/css")).unwrap();
    std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
    std::fs::write(dir.path().join("index.php"), b"<?php").unwrap();
    std::fs::write(dir.path().join("public/css/app.css"), b"body{}").unwrap();
    std::fs::write(dir.path().join("node_modules/pkg/index.js"), b"x").unwrap();
    std::fs::write(dir.path().join("app.tar.gz"), b"stale").unwrap();

    for whole in [".", "./", ""] {
        let entries = Collector::new(dir.path())
            .include(whole)
            .exclude("node_modules")
            .exclude_path("app.tar.gz")
            .collect()
            .unwrap();

        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["index.php", "public", "public/css", "public/css/app.css"],
            "include {whole:?}"
        );
    }
}

#[test]
fn test_missing_include_is_source_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Collector::new(dir.path()).include("nope").collect().unwrap_err();
    assert!(matches!(err, ArchiveError::SourceRead { .. }));
}

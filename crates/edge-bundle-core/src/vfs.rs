//! In-memory filesystem backing the guest.
//!
//! [`MemFs`] is the single, process-lifetime file tree the bundle is
//! hydrated into. It implements [`VirtualFs`] for the archive decoder and
//! offers read access for the host functions the guest calls. Nothing is
//! ever persisted.
//!
//! Paths are absolute and `/`-separated. `.` components are dropped, `..`
//! pops a component, and repeated slashes collapse.

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use edge_bundle_archive::{PathInfo, VfsError, VirtualFs};

const DEFAULT_DIR_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// A node in the tree.
#[derive(Debug, Clone)]
enum Node {
    Directory { mode: u32 },
    File { data: Bytes, mode: u32 },
}

/// Metadata about a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMeta {
    /// Whether the node is a directory.
    pub is_dir: bool,
    /// File size in bytes (0 for directories).
    pub len: u64,
    /// Permission bits.
    pub mode: u32,
}

/// Aggregate counts over the whole tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemFsStats {
    /// Number of directories, including `/`.
    pub directories: usize,
    /// Number of regular files.
    pub files: usize,
    /// Sum of all file sizes.
    pub bytes: u64,
}

/// Concurrent in-memory file tree.
pub struct MemFs {
    nodes: DashMap<String, Node>,
}

impl MemFs {
    /// Create a filesystem containing only `/`.
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Directory {
                mode: DEFAULT_DIR_MODE,
            },
        );
        Self { nodes }
    }

    /// Read a whole file.
    pub fn read_file(&self, path: &str) -> Option<Bytes> {
        let path = normalize(path).ok()?;
        match self.nodes.get(&path)?.value() {
            Node::File { data, .. } => Some(data.clone()),
            Node::Directory { .. } => None,
        }
    }

    /// Stat a path.
    pub fn metadata(&self, path: &str) -> Option<NodeMeta> {
        let path = normalize(path).ok()?;
        let node = self.nodes.get(&path)?;
        Some(match node.value() {
            Node::Directory { mode } => NodeMeta {
                is_dir: true,
                len: 0,
                mode: *mode,
            },
            Node::File { data, mode } => NodeMeta {
                is_dir: false,
                len: data.len() as u64,
                mode: *mode,
            },
        })
    }

    /// Names of the direct children of a directory, sorted.
    pub fn list_dir(&self, path: &str) -> Option<Vec<String>> {
        let path = normalize(path).ok()?;
        if !self.is_dir(&path) {
            return None;
        }

        let prefix = if path == "/" {
            path.clone()
        } else {
            format!("{path}/")
        };

        let mut names: Vec<String> = self
            .nodes
            .iter()
            .filter_map(|entry| {
                let rest = entry.key().strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        names.sort();
        Some(names)
    }

    /// Count directories, files and bytes.
    pub fn stats(&self) -> MemFsStats {
        let mut stats = MemFsStats::default();
        for entry in &self.nodes {
            match entry.value() {
                Node::Directory { .. } => stats.directories += 1,
                Node::File { data, .. } => {
                    stats.files += 1;
                    stats.bytes += data.len() as u64;
                }
            }
        }
        stats
    }

    fn is_dir(&self, normalized: &str) -> bool {
        self.nodes
            .get(normalized)
            .is_some_and(|node| matches!(node.value(), Node::Directory { .. }))
    }

    fn check_parent(&self, normalized: &str) -> Result<(), VfsError> {
        let parent = parent_of(normalized);
        match self.nodes.get(parent).map(|node| matches!(node.value(), Node::Directory { .. })) {
            Some(true) => Ok(()),
            Some(false) => Err(VfsError::NotADirectory {
                path: parent.to_string(),
            }),
            None => Err(VfsError::not_found(parent)),
        }
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFs for MemFs {
    fn analyze_path(&self, path: &str) -> PathInfo {
        let Ok(path) = normalize(path) else {
            return PathInfo::missing();
        };
        match self.nodes.get(&path).as_deref() {
            Some(Node::Directory { .. }) => PathInfo::directory(),
            Some(Node::File { .. }) => PathInfo::file(),
            None => PathInfo::missing(),
        }
    }

    fn mkdir(&self, path: &str) -> Result<(), VfsError> {
        let path = normalize(path)?;
        self.check_parent(&path)?;

        match self.nodes.entry(path) {
            Entry::Occupied(entry) => Err(VfsError::AlreadyExists {
                path: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(Node::Directory {
                    mode: DEFAULT_DIR_MODE,
                });
                Ok(())
            }
        }
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError> {
        let path = normalize(path)?;
        self.check_parent(&path)?;

        match self.nodes.entry(path) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Node::Directory { .. } => Err(VfsError::IsADirectory {
                    path: entry.key().clone(),
                }),
                Node::File { data: existing, .. } => {
                    *existing = Bytes::copy_from_slice(data);
                    Ok(())
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(Node::File {
                    data: Bytes::copy_from_slice(data),
                    mode: DEFAULT_FILE_MODE,
                });
                Ok(())
            }
        }
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<(), VfsError> {
        let path = normalize(path)?;
        let mut node = self
            .nodes
            .get_mut(&path)
            .ok_or_else(|| VfsError::not_found(path.as_str()))?;

        match node.value_mut() {
            Node::Directory { mode: current } | Node::File { mode: current, .. } => {
                *current = mode & 0o7777;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFs")
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

/// Canonical form of an absolute path.
fn normalize(path: &str) -> Result<String, VfsError> {
    if !path.starts_with('/') {
        return Err(VfsError::InvalidPath {
            path: path.to_string(),
        });
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    Ok(format!("/{}", parts.join("/")))
}

fn parent_of(normalized: &str) -> &str {
    match normalized.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &normalized[..idx],
    }
}

//! File-tree collector.
//!
//! Walks a set of include paths below a root directory and produces the
//! ordered entry list the encoder consumes. The walk is pre-order and sorted
//! by file name, so the same tree always yields the same entry order.
//!
//! Symlinks are resolved here: a link to a directory is walked through its
//! real target but reported under the link's logical path, and a link to a
//! file records the link path as the archive path with the target supplying
//! the bytes. The archive never contains link entries. A link back to one of
//! its own ancestors is a [`ArchiveError::SymlinkLoop`].

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::{ArchiveEntry, ArchiveError};

/// Collects archive entries from the host filesystem.
#[derive(Debug, Clone)]
pub struct Collector {
    root: PathBuf,
    includes: Vec<String>,
    excludes: Vec<ExcludePattern>,
    skipped: Vec<String>,
}

impl Collector {
    /// Create a collector rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            includes: Vec::new(),
            excludes: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Include a directory (recursively) or a single file, relative to the root.
    ///
    /// `.`, `./` and the empty string all include the whole root; the root
    /// itself is not emitted as an entry.
    #[must_use]
    pub fn include(mut self, path: impl AsRef<str>) -> Self {
        self.includes.push(clean_relative(path.as_ref()));
        self
    }

    /// Exclude paths matching `pattern`.
    ///
    /// `*` matches any run of characters within one segment and `?` a single
    /// character. A pattern without `/` is tested against every path segment
    /// (`node_modules`, `*.md`); a pattern with `/` is tested against the
    /// whole relative path (`storage/logs/*`).
    #[must_use]
    pub fn exclude(mut self, pattern: impl AsRef<str>) -> Self {
        self.excludes.push(ExcludePattern::new(pattern.as_ref()));
        self
    }

    /// Exclude exactly one relative path, with no wildcard expansion.
    #[must_use]
    pub fn exclude_path(mut self, relative: impl AsRef<str>) -> Self {
        let relative = clean_relative(relative.as_ref());
        if !relative.is_empty() {
            self.skipped.push(relative);
        }
        self
    }

    /// Returns `true` if the relative path is excluded.
    pub fn is_excluded(&self, relative: &str) -> bool {
        self.skipped.iter().any(|s| s == relative)
            || self.excludes.iter().any(|p| p.matches(relative))
    }

    /// Walk every include and return the entries in emission order.
    #[instrument(skip(self), fields(root = %self.root.display(), includes = self.includes.len()))]
    pub fn collect(&self) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let mut entries = Vec::new();

        for include in &self.includes {
            if !include.is_empty() && self.is_excluded(include) {
                debug!(path = %include, "Include excluded by pattern");
                continue;
            }

            let base = if include.is_empty() {
                self.root.clone()
            } else {
                self.root.join(include)
            };

            let walker = WalkDir::new(&base)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| self.keep(include, &base, entry));

            for entry in walker {
                let entry = entry.map_err(walk_err)?;
                if include.is_empty() && entry.depth() == 0 {
                    continue;
                }

                let relative = logical_path(include, &base, entry.path())?;
                let file_type = entry.file_type();

                if file_type.is_dir() {
                    entries.push(ArchiveEntry::directory(relative));
                } else if file_type.is_file() {
                    let len = entry.metadata().map_err(walk_err)?.len();
                    entries.push(ArchiveEntry::file(relative, entry.into_path(), len));
                } else {
                    debug!(path = %relative, "Skipping special file");
                }
            }
        }

        info!(entries = entries.len(), "File tree collected");
        Ok(entries)
    }

    /// Walk filter: prunes excluded entries, and whole subtrees under
    /// excluded directories. Unnamed paths are kept so the walk reports them.
    fn keep(&self, include: &str, base: &Path, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        match logical_path(include, base, entry.path()) {
            Ok(relative) => !self.is_excluded(&relative),
            Err(_) => true,
        }
    }
}

/// Archive path of `path`: the include followed by the components below
/// `base`, joined with `/`.
fn logical_path(include: &str, base: &Path, path: &Path) -> Result<String, ArchiveError> {
    let below = path.strip_prefix(base).unwrap_or(path);
    let mut relative = include.to_string();

    for component in below.components() {
        let Some(name) = component.as_os_str().to_str() else {
            return Err(ArchiveError::NonUtf8Path {
                path: path.to_string_lossy().into_owned(),
            });
        };
        if !relative.is_empty() {
            relative.push('/');
        }
        relative.push_str(name);
    }

    Ok(relative)
}

fn walk_err(err: walkdir::Error) -> ArchiveError {
    let path = err
        .path()
        .map_or_else(String::new, |p| p.display().to_string());

    if err.loop_ancestor().is_some() {
        return ArchiveError::SymlinkLoop { path };
    }
    ArchiveError::source_read(path, io::Error::from(err))
}

/// A compiled exclude rule.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExcludePattern {
    pattern: String,
    anchored: bool,
}

impl ExcludePattern {
    fn new(raw: &str) -> Self {
        let pattern = clean_relative(raw);
        let anchored = pattern.contains('/');
        Self { pattern, anchored }
    }

    fn matches(&self, relative: &str) -> bool {
        if self.anchored {
            glob_match(&self.pattern, relative)
        } else {
            relative.split('/').any(|segment| glob_match(&self.pattern, segment))
        }
    }
}

/// Wildcard match where `*` never crosses a `/`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && ((p[pi] == b'?' && t[ti] != b'/') || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if let Some((star, matched)) = backtrack.filter(|&(_, m)| t[m] != b'/') {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&b| b == b'*')
}

fn clean_relative(path: &str) -> String {
    let mut trimmed = path.trim();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    match trimmed.trim_matches('/') {
        "." => String::new(),
        cleaned => cleaned.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.md", "README.md"));
        assert!(!glob_match("*.md", "README.mdx"));
        assert!(glob_match("node_modules", "node_modules"));
        assert!(glob_match("te?t", "test"));
        assert!(glob_match("storage/logs/*", "storage/logs/laravel.log"));
        assert!(!glob_match("storage/*", "storage/logs/laravel.log"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*b*c", "axxbyyc"));
    }

    #[test]
    fn test_segment_pattern_matches_any_depth() {
        let pattern = ExcludePattern::new("tests");
        assert!(pattern.matches("vendor/pkg/tests"));
        assert!(pattern.matches("tests/Unit/ExampleTest.php"));
        assert!(!pattern.matches("vendor/pkg/testsuite"));
    }

    #[test]
    fn test_anchored_pattern() {
        let pattern = ExcludePattern::new("./storage/logs/*");
        assert!(pattern.anchored);
        assert!(pattern.matches("storage/logs/a.log"));
        assert!(!pattern.matches("app/storage/logs/a.log"));
    }

    #[test]
    fn test_clean_relative() {
        assert_eq!(clean_relative("./app/"), "app");
        assert_eq!(clean_relative("/vendor"), "vendor");
        assert_eq!(clean_relative("./"), "");
        assert_eq!(clean_relative("."), "");
        assert_eq!(clean_relative(""), "");
    }

    #[test]
    fn test_dot_forms_include_whole_root() {
        let collector = Collector::new("/tmp").include(".").include("./").include("");
        assert_eq!(collector.includes, vec!["", "", ""]);
    }

    #[test]
    fn test_exclude_path_is_exact() {
        let collector = Collector::new("/tmp")
            .exclude_path("./dist/app.tar.gz")
            .exclude_path(".");
        assert_eq!(collector.skipped, vec!["dist/app.tar.gz"]);
        assert!(collector.is_excluded("dist/app.tar.gz"));
        assert!(!collector.is_excluded("app.tar.gz"));
        assert!(!collector.is_excluded("dist/app.tar.gz.bak"));
    }

    #[test]
    fn test_logical_path() {
        let base = Path::new("/srv/site/app");
        assert_eq!(
            logical_path("app", base, Path::new("/srv/site/app/Http/Kernel.php")).unwrap(),
            "app/Http/Kernel.php"
        );
        assert_eq!(logical_path("app", base, base).unwrap(), "app");
        assert_eq!(
            logical_path("", Path::new("/srv/site"), Path::new("/srv/site/index.php")).unwrap(),
            "index.php"
        );
    }
}

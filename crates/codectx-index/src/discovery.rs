//! Workspace walking with gitignore-style rules.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::{IndexError, Result};
use crate::languages::is_indexable;

/// Project-specific ignore file, read alongside `.gitignore` and `.ignore`.
pub const IGNORE_FILE: &str = ".codectxignore";

pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Extra gitignore-syntax patterns that take precedence over the workspace's
/// own ignore files. Later patterns win and `!pattern` re-includes.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<String>,
}

impl IgnoreRules {
    #[must_use]
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// A file that was found but will not be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Ignore files read in every directory, lowest precedence first.
const IGNORE_FILES: [&str; 3] = [".gitignore", ".ignore", IGNORE_FILE];

/// The ignore files found in one directory.
#[derive(Debug, Default)]
struct DirRules {
    files: Vec<Gitignore>,
}

impl DirRules {
    fn load(dir: &Path) -> Self {
        let mut files = Vec::new();
        for name in IGNORE_FILES {
            let file = dir.join(name);
            if !file.is_file() {
                continue;
            }
            let (matcher, err) = Gitignore::new(&file);
            if let Some(e) = err {
                tracing::warn!(file = %file.display(), "invalid ignore file entries: {e}");
            }
            if !matcher.is_empty() {
                files.push(matcher);
            }
        }
        Self { files }
    }

    /// `Some(true)` ignored, `Some(false)` re-included, `None` no opinion.
    fn decide(&self, path: &Path, is_dir: bool) -> Option<bool> {
        self.files.iter().rev().find_map(|m| match m.matched(path, is_dir) {
            Match::None => None,
            m => Some(m.is_ignore()),
        })
    }
}

type DirCache = HashMap<PathBuf, DirRules>;

/// Ignore rules for one workspace. Both the walk and single-path checks go
/// through [`IgnoreStack::excludes`], so they always agree.
///
/// Precedence: hidden entries are always excluded, then configured patterns,
/// then the ignore files of the nearest directory that has an opinion.
#[derive(Debug)]
struct IgnoreStack {
    root: PathBuf,
    config: Gitignore,
}

impl IgnoreStack {
    /// Whether `path` itself is excluded; its parent directories are not checked.
    fn excludes(&self, cache: &mut DirCache, path: &Path, is_dir: bool) -> bool {
        if !path.starts_with(&self.root) {
            return true;
        }
        if path == self.root {
            return false;
        }
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'))
        {
            return true;
        }
        match self.config.matched(path, is_dir) {
            Match::None => {}
            m => return m.is_ignore(),
        }
        for dir in path.ancestors().skip(1) {
            let decision = cache
                .entry(dir.to_path_buf())
                .or_insert_with(|| DirRules::load(dir))
                .decide(path, is_dir);
            if let Some(ignored) = decision {
                return ignored;
            }
            if dir == self.root {
                break;
            }
        }
        false
    }

    /// [`Self::excludes`] for `path` and each directory between it and the
    /// root, matching a walk that prunes excluded directories.
    fn excludes_with_parents(&self, cache: &mut DirCache, path: &Path, is_dir: bool) -> bool {
        if !path.starts_with(&self.root) {
            return true;
        }
        path.ancestors()
            .skip(1)
            .take_while(|dir| *dir != self.root)
            .any(|dir| self.excludes(cache, dir, true))
            || self.excludes(cache, path, is_dir)
    }
}

#[derive(Debug, Clone)]
pub struct FileDiscovery {
    root: PathBuf,
    rules: Arc<IgnoreStack>,
    max_file_bytes: u64,
}

impl FileDiscovery {
    /// # Errors
    ///
    /// Returns [`IndexError::Discovery`] if `root` is missing or unreadable, or
    /// [`IndexError::Other`] if an ignore pattern is invalid.
    pub fn new(root: &Path, rules: &IgnoreRules, max_file_bytes: u64) -> Result<Self> {
        let discovery_err = |source| IndexError::Discovery {
            root: root.to_path_buf(),
            source,
        };
        let root = root.canonicalize().map_err(discovery_err)?;
        std::fs::read_dir(&root).map_err(discovery_err)?;

        let mut builder = GitignoreBuilder::new(&root);
        for pattern in rules.patterns() {
            builder
                .add_line(None, pattern)
                .map_err(|e| IndexError::Other(format!("invalid ignore pattern {pattern:?}: {e}")))?;
        }
        let config = builder
            .build()
            .map_err(|e| IndexError::Other(format!("ignore rules: {e}")))?;

        Ok(Self {
            rules: Arc::new(IgnoreStack {
                root: root.clone(),
                config,
            }),
            root,
            max_file_bytes,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the root with `/` separators; the key stored in the index.
    #[must_use]
    pub fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Whether a single path would be yielded by [`Self::walk`], ignoring size.
    ///
    /// Ignore files are re-read on every call so edits to them take effect.
    #[must_use]
    pub fn is_candidate(&self, path: &Path) -> bool {
        path != self.root
            && is_indexable(path)
            && !self
                .rules
                .excludes_with_parents(&mut DirCache::new(), path, false)
    }

    /// Lazily walk the workspace. Each call starts a fresh walk.
    ///
    /// Yields `Ok(path)` for indexable files and `Err(SkippedFile)` for files
    /// that cannot be read or exceed the size limit. Files in unsupported
    /// languages are passed over silently.
    pub fn walk(&self) -> impl Iterator<Item = std::result::Result<PathBuf, SkippedFile>> + use<> {
        let rules = Arc::clone(&self.rules);
        let cache = Mutex::new(DirCache::new());
        let root = self.root.clone();
        let max_file_bytes = self.max_file_bytes;

        ignore::WalkBuilder::new(&self.root)
            .standard_filters(false)
            .sort_by_file_path(Path::cmp)
            .filter_entry(move |e| {
                let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
                e.depth() == 0
                    || !rules.excludes(
                        &mut cache,
                        e.path(),
                        e.file_type().is_some_and(|t| t.is_dir()),
                    )
            })
            .build()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        return Some(Err(SkippedFile {
                            path: error_path(&e).unwrap_or_else(|| root.clone()),
                            reason: e.to_string(),
                        }));
                    }
                };
                if !entry.file_type().is_some_and(|t| t.is_file()) || !is_indexable(entry.path()) {
                    return None;
                }
                let path = entry.into_path();
                match std::fs::metadata(&path) {
                    Ok(meta) if meta.len() > max_file_bytes => Some(Err(SkippedFile {
                        reason: format!("{} bytes exceeds limit of {max_file_bytes}", meta.len()),
                        path,
                    })),
                    Ok(_) => Some(Ok(path)),
                    Err(e) => Some(Err(SkippedFile {
                        path,
                        reason: e.to_string(),
                    })),
                }
            })
    }
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    fn walked(d: &FileDiscovery) -> Vec<String> {
        d.walk()
            .filter_map(std::result::Result::ok)
            .map(|p| d.relative_path(&p))
            .collect()
    }

    #[test]
    fn missing_root_is_discovery_error() {
        let err = FileDiscovery::new(
            Path::new("/nonexistent/codectx/root"),
            &IgnoreRules::default(),
            DEFAULT_MAX_FILE_BYTES,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Discovery { .. }));
    }

    #[cfg(all(feature = "lang-rust", feature = "lang-python"))]
    #[test]
    fn walk_filters_by_extension_and_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/lib.rs", "fn a() {}");
        touch(dir.path(), "tools/gen.py", "def f(): pass");
        touch(dir.path(), "README.md", "# hi");
        touch(dir.path(), "target/debug/build.rs", "fn b() {}");
        touch(dir.path(), ".hidden/x.rs", "fn c() {}");
        touch(dir.path(), ".gitignore", "target/\n");

        let d = FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
            .unwrap();
        assert_eq!(walked(&d), vec!["src/lib.rs", "tools/gen.py"]);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn extra_rules_last_match_wins_with_negation() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "gen/a.rs", "fn a() {}");
        touch(dir.path(), "gen/keep.rs", "fn k() {}");
        touch(dir.path(), "src/main.rs", "fn main() {}");

        let rules = IgnoreRules::new(vec!["gen/*.rs".into(), "!gen/keep.rs".into()]);
        let d = FileDiscovery::new(dir.path(), &rules, DEFAULT_MAX_FILE_BYTES).unwrap();
        assert_eq!(walked(&d), vec!["gen/keep.rs", "src/main.rs"]);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn codectxignore_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "vendor/dep.rs", "fn d() {}");
        touch(dir.path(), "src/main.rs", "fn main() {}");
        touch(dir.path(), IGNORE_FILE, "vendor/\n");

        let d = FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
            .unwrap();
        assert_eq!(walked(&d), vec!["src/main.rs"]);
        assert!(!d.is_candidate(&d.root().join("vendor/dep.rs")));
        assert!(d.is_candidate(&d.root().join("src/main.rs")));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn nested_gitignore_applies_to_walk_and_candidates() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "sub/.gitignore", "build/\n");
        touch(dir.path(), "sub/build/gen.rs", "fn g() {}");
        touch(dir.path(), "sub/lib.rs", "fn l() {}");
        touch(dir.path(), "build/top.rs", "fn t() {}");

        let d = FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
            .unwrap();
        assert_eq!(walked(&d), vec!["build/top.rs", "sub/lib.rs"]);
        assert!(!d.is_candidate(&d.root().join("sub/build/gen.rs")));
        assert!(d.is_candidate(&d.root().join("sub/lib.rs")));
        assert!(d.is_candidate(&d.root().join("build/top.rs")));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn deeper_ignore_file_overrides_parent() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".gitignore", "*.gen.rs\n");
        touch(dir.path(), "a/.ignore", "!keep.gen.rs\n");
        touch(dir.path(), "a/keep.gen.rs", "fn k() {}");
        touch(dir.path(), "a/drop.gen.rs", "fn d() {}");

        let d = FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
            .unwrap();
        assert_eq!(walked(&d), vec!["a/keep.gen.rs"]);
        assert!(d.is_candidate(&d.root().join("a/keep.gen.rs")));
        assert!(!d.is_candidate(&d.root().join("a/drop.gen.rs")));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn configured_negation_overrides_ignore_files_in_both_paths() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".gitignore", "generated.rs\n");
        touch(dir.path(), "generated.rs", "fn g() {}");
        touch(dir.path(), "other.rs", "fn o() {}");

        let rules = IgnoreRules::new(vec!["!generated.rs".into(), "other.rs".into()]);
        let d = FileDiscovery::new(dir.path(), &rules, DEFAULT_MAX_FILE_BYTES).unwrap();
        assert_eq!(walked(&d), vec!["generated.rs"]);
        assert!(d.is_candidate(&d.root().join("generated.rs")));
        assert!(!d.is_candidate(&d.root().join("other.rs")));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn walk_and_candidates_agree() {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            "src/main.rs",
            "src/gen/out.rs",
            "src/gen/keep.rs",
            "docs/x/y.rs",
            ".cache/c.rs",
            "vendor/v.rs",
        ];
        for f in files {
            touch(dir.path(), f, "fn f() {}");
        }
        touch(dir.path(), "src/.gitignore", "gen/*\n!gen/keep.rs\n");
        touch(dir.path(), "docs/.codectxignore", "x/\n");
        touch(dir.path(), ".ignore", "vendor\n");

        let d = FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
            .unwrap();
        let walked = walked(&d);
        for f in files {
            assert_eq!(
                walked.iter().any(|w| w == f),
                d.is_candidate(&d.root().join(f)),
                "walk and is_candidate disagree on {f}"
            );
        }
        assert_eq!(walked, vec!["src/gen/keep.rs", "src/main.rs"]);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn oversized_files_are_reported_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "big.rs", &"// pad\n".repeat(100));
        touch(dir.path(), "small.rs", "fn s() {}");

        let d = FileDiscovery::new(dir.path(), &IgnoreRules::default(), 64).unwrap();
        let results: Vec<_> = d.walk().collect();
        assert_eq!(results.len(), 2);
        let skipped: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].path.ends_with("big.rs"));
        assert!(skipped[0].reason.contains("exceeds"));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn walk_is_restartable() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.rs", "fn a() {}");
        let d = FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
            .unwrap();
        let mut first = d.walk();
        assert!(first.next().is_some());
        assert_eq!(walked(&d), vec!["a.rs"]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rules = IgnoreRules::new(vec!["a[".into()]);
        assert!(FileDiscovery::new(dir.path(), &rules, DEFAULT_MAX_FILE_BYTES).is_err());
    }

    #[test]
    fn paths_outside_root_are_not_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let d = FileDiscovery::new(dir.path(), &IgnoreRules::default(), DEFAULT_MAX_FILE_BYTES)
            .unwrap();
        assert!(!d.is_candidate(Path::new("/somewhere/else/main.rs")));
    }
}

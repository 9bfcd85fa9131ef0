//! Ignore rules deciding which paths participate in the index.

use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::storage::normalize_path;
use crate::{Error, Result};

/// Directory names excluded wherever they appear as a path segment.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    "dist",
    "build",
    ".cache",
    ".local",
    "node_modules",
    ".pnpm-store",
    ".yarn",
    ".parcel-cache",
    "venv",
    ".venv",
    "env",
    "site-packages",
];

/// File name suffixes that are never indexed.
pub const DEFAULT_IGNORED_SUFFIXES: &[&str] = &[
    ".pyc",
    ".pyo",
    ".pyd",
    ".so",
    ".dll",
    ".tmp",
    ".temp",
    ".swp",
    ".swx",
    ".log",
    ".crdownload",
    ".part",
    ".download",
];

/// Exact file names (lowercase) that are never indexed.
pub const DEFAULT_IGNORED_NAMES: &[&str] = &["desktop.ini", "thumbs.db", ".ds_store"];

/// Sidecar suffixes `SQLite` writes next to the database file.
const STORE_SIDECARS: &[&str] = &["", "-wal", "-shm", "-journal"];

/// Decides whether a path is excluded from the index.
///
/// A path is excluded when it is one of the store's own files, carries a
/// default-ignored name or suffix, sits under a default-ignored directory,
/// or matches a pattern from the ignore file. A matching `!` negation
/// overrides every exclusion except the store files.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    store_files: Vec<String>,
    patterns: Option<GlobSet>,
    negations: Option<GlobSet>,
}

impl IgnoreRules {
    /// Rules with the built-in defaults only.
    #[must_use]
    pub fn new(root: impl AsRef<Path>, db_path: Option<&Path>) -> Self {
        Self {
            root: normalize_path(root.as_ref()),
            store_files: store_files(db_path),
            patterns: None,
            negations: None,
        }
    }

    /// Rules with the defaults plus `ignore_file_name` read from the root,
    /// if present. Invalid pattern lines are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the ignore file exists but cannot be read.
    pub fn load(root: impl AsRef<Path>, ignore_file_name: &str, db_path: Option<&Path>) -> Result<Self> {
        let mut rules = Self::new(root, db_path);
        let ignore_path = rules.root.join(ignore_file_name);

        let content = match std::fs::read_to_string(&ignore_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(rules),
            Err(e) => return Err(e.into()),
        };

        let (patterns, negations) = parse_lines(&content);
        rules.patterns = build_set(&patterns, false)?;
        rules.negations = build_set(&negations, false)?;

        tracing::debug!(
            file = %ignore_path.display(),
            patterns = patterns.len(),
            negations = negations.len(),
            "Loaded ignore file"
        );
        Ok(rules)
    }

    /// Rules with the defaults plus the given ignore-file lines.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern is not a valid glob.
    pub fn from_patterns(
        root: impl AsRef<Path>,
        lines: &[&str],
        db_path: Option<&Path>,
    ) -> Result<Self> {
        let mut rules = Self::new(root, db_path);
        let (patterns, negations) = parse_lines(&lines.join("\n"));
        rules.patterns = build_set(&patterns, true)?;
        rules.negations = build_set(&negations, true)?;
        Ok(rules)
    }

    /// The watch root these rules are relative to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is excluded from the index.
    #[must_use]
    pub fn is_ignored(&self, path: &Path) -> bool {
        let abs = normalize_path(path);
        let abs_form = posix_lower(&abs);

        if self.store_files.contains(&abs_form) {
            return true;
        }

        let relative = abs.strip_prefix(&self.root).ok();
        let rel_form = relative.map(posix_lower);

        let excluded = is_default_ignored(&abs, relative)
            || self
                .patterns
                .as_ref()
                .is_some_and(|set| matches_either(set, rel_form.as_deref(), &abs_form));

        excluded
            && !self
                .negations
                .as_ref()
                .is_some_and(|set| matches_either(set, rel_form.as_deref(), &abs_form))
    }
}

fn matches_either(set: &GlobSet, rel: Option<&str>, abs: &str) -> bool {
    rel.is_some_and(|r| !r.is_empty() && set.is_match(r)) || set.is_match(abs)
}

/// Default name, suffix and directory-segment exclusions.
///
/// Segments are taken relative to the root when the path is under it, so a
/// root that itself lives under e.g. `build/` is still indexed.
fn is_default_ignored(abs: &Path, relative: Option<&Path>) -> bool {
    if let Some(name) = abs.file_name() {
        let name = name.to_string_lossy().to_lowercase();
        if DEFAULT_IGNORED_NAMES.contains(&name.as_str())
            || DEFAULT_IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s))
        {
            return true;
        }
    }

    relative.unwrap_or(abs).components().any(|c| match c {
        Component::Normal(seg) => {
            DEFAULT_IGNORED_DIRS.contains(&seg.to_string_lossy().to_lowercase().as_str())
        }
        _ => false,
    })
}

fn posix_lower(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn store_files(db_path: Option<&Path>) -> Vec<String> {
    let Some(db_path) = db_path else {
        return Vec::new();
    };
    let base = posix_lower(&normalize_path(db_path));
    STORE_SIDECARS
        .iter()
        .map(|suffix| format!("{base}{suffix}"))
        .collect()
}

/// Split ignore-file text into `(patterns, negations)`.
fn parse_lines(content: &str) -> (Vec<String>, Vec<String>) {
    let mut patterns = Vec::new();
    let mut negations = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(negated) = line.strip_prefix('!') {
            let negated = negated.trim();
            if !negated.is_empty() {
                negations.push(negated.to_string());
            }
        } else {
            patterns.push(line.to_string());
        }
    }

    (patterns, negations)
}

fn build_set(patterns: &[String], strict: bool) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // `*` crosses separators, like fnmatch
        let glob = GlobBuilder::new(pattern.trim_end_matches('/'))
            .case_insensitive(true)
            .literal_separator(false)
            .build();
        match glob {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) if strict => {
                return Err(Error::config(format!("invalid ignore pattern '{pattern}': {e}")));
            }
            Err(e) => {
                tracing::warn!(component = "ignore_rules", pattern = %pattern, error = %e, "Skipping invalid ignore pattern");
            }
        }
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| Error::config(format!("failed to build ignore patterns: {e}")))
}

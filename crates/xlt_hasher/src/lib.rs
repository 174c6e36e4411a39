//! Deterministic content digest over a declared file set (`spec.md` §4.2).
//!
//! Used to derive the local codebase version identity checked against a
//! worker's advertised version, and to hash the contents of an update
//! package before signing it. Grounded on
//! `casparian_security::signing::{sha256, compute_artifact_hash}`,
//! generalized from a fixed 4-part artifact hash to an arbitrary,
//! declared file set.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

pub type Result<T> = std::result::Result<T, HasherError>;

#[derive(Debug, Error)]
pub enum HasherError {
    #[error("io error reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("path {0} is not relative to the declared base directory")]
    NotRelative(PathBuf),
}

/// Separator written between each file's framed content. Fixed and
/// content-independent so the digest is stable across machines.
const FILE_SEPARATOR: &[u8] = &[0x1f, 0x1f];

const EXCLUDED_DIR_NAMES: &[&str] = &[
    ".git", ".svn", ".hg", "target", "node_modules", "dist", "build", ".idea", ".vscode",
];

const EXCLUDED_FILE_SUFFIXES: &[&str] = &[".log", ".DS_Store", ".pyc", ".swp"];

struct DirSpec {
    /// Relative to `base_dir`.
    relative_path: PathBuf,
    /// Empty means "all extensions".
    extensions: HashSet<String>,
}

/// Computes a deterministic SHA-256 digest over a declared set of
/// directories (filtered by extension) plus an explicit list of produced
/// binaries, all expressed relative to one base directory so the digest
/// never encodes an absolute, machine-specific path.
pub struct CodebaseHasher {
    base_dir: PathBuf,
    dirs: Vec<DirSpec>,
    binaries: Vec<PathBuf>,
}

impl CodebaseHasher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), dirs: Vec::new(), binaries: Vec::new() }
    }

    /// Declare a directory (relative to the base dir) to include, optionally
    /// restricted to a set of extensions (without the leading dot). An empty
    /// extension set means every non-excluded file is included.
    pub fn with_dir(mut self, relative_path: impl Into<PathBuf>, extensions: &[&str]) -> Self {
        self.dirs.push(DirSpec {
            relative_path: relative_path.into(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Declare an additional explicit file (relative to the base dir) to
    /// include verbatim, regardless of extension filters — used for produced
    /// binaries.
    pub fn with_binary(mut self, relative_path: impl Into<PathBuf>) -> Self {
        self.binaries.push(relative_path.into());
        self
    }

    /// Compute the digest. Files are visited in lexicographic order of their
    /// relative path so the result is stable regardless of filesystem
    /// iteration order; only file contents and sizes are hashed, never
    /// timestamps.
    pub fn hash(&self) -> Result<String> {
        let mut entries = self.collect_entries()?;
        entries.sort();
        entries.dedup();

        let mut hasher = Sha256::new();
        for relative in &entries {
            let absolute = self.base_dir.join(relative);
            let bytes = std::fs::read(&absolute)
                .map_err(|source| HasherError::Io { path: absolute.clone(), source })?;
            hasher.update(format!("file:{}\n", relative.to_string_lossy().replace('\\', "/")));
            hasher.update(format!("size:{}\n", bytes.len()));
            hasher.update(&bytes);
            hasher.update(FILE_SEPARATOR);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    fn collect_entries(&self) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();

        for dir in &self.dirs {
            let absolute_dir = self.base_dir.join(&dir.relative_path);
            if !absolute_dir.exists() {
                continue;
            }
            for entry in WalkDir::new(&absolute_dir)
                .into_iter()
                .filter_entry(|e| !is_excluded_dir(e.path()))
            {
                let entry = entry.map_err(|err| HasherError::Io {
                    path: absolute_dir.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, err),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if is_excluded_file(entry.path()) {
                    continue;
                }
                if !dir.extensions.is_empty() && !matches_extension(entry.path(), &dir.extensions) {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&self.base_dir)
                    .map_err(|_| HasherError::NotRelative(entry.path().to_path_buf()))?;
                entries.push(relative.to_path_buf());
            }
        }

        for binary in &self.binaries {
            entries.push(binary.clone());
        }

        Ok(entries)
    }
}

fn is_excluded_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| EXCLUDED_DIR_NAMES.contains(&name))
        .unwrap_or(false)
}

fn is_excluded_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    EXCLUDED_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn matches_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension().and_then(|e| e.to_str()).map(|ext| extensions.contains(ext)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_fixture(dir: &Path) {
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("a.rs"), "x").unwrap();
        fs::write(dir.join("sub/b.rs"), "y").unwrap();
    }

    #[test]
    fn hash_is_deterministic_for_identical_trees() {
        let dir1 = tempdir().unwrap();
        let dir2 = tempdir().unwrap();
        write_fixture(dir1.path());
        write_fixture(dir2.path());

        let hasher1 = CodebaseHasher::new(dir1.path()).with_dir(".", &["rs"]);
        let hasher2 = CodebaseHasher::new(dir2.path()).with_dir(".", &["rs"]);

        assert_eq!(hasher1.hash().unwrap(), hasher2.hash().unwrap());
    }

    #[test]
    fn hash_is_invariant_to_mtime_only_changes() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path());
        let hasher = CodebaseHasher::new(dir.path()).with_dir(".", &["rs"]);
        let before = hasher.hash().unwrap();

        // Touch mtimes without changing content.
        let now = std::time::SystemTime::now();
        filetime_touch(&dir.path().join("a.rs"), now);

        let after = hasher.hash().unwrap();
        assert_eq!(before, after);
    }

    fn filetime_touch(path: &Path, time: std::time::SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn hash_changes_on_single_byte_edit() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path());
        let hasher = CodebaseHasher::new(dir.path()).with_dir(".", &["rs"]);
        let before = hasher.hash().unwrap();

        fs::write(dir.path().join("a.rs"), "x ").unwrap();
        let after = hasher.hash().unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn excluded_directories_are_ignored() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path());
        let hasher = CodebaseHasher::new(dir.path()).with_dir(".", &["rs"]);
        let before = hasher.hash().unwrap();

        fs::create_dir_all(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/junk.rs"), "noise").unwrap();
        let after = hasher.hash().unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn binaries_are_included_explicitly() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("tool"), "binary-content").unwrap();
        let hasher = CodebaseHasher::new(dir.path()).with_binary("tool");
        let with_binary = hasher.hash().unwrap();

        let empty_hasher = CodebaseHasher::new(dir.path());
        let without_binary = empty_hasher.hash().unwrap();

        assert_ne!(with_binary, without_binary);
    }
}

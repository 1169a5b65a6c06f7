//! On-disk layout for cached model artifacts.
//!
//! All paths are derived from a single configured base directory:
//!
//! ```text
//! <base>/models/<user>/<repo>/<quant>.gguf
//! <base>/models/<user>/<repo>/<quant>/<prefix>-NNNNN-of-MMMMM.gguf
//! <base>/models/<user>/<repo>/<quant>-mmproj.gguf
//! <base>/models/<user>/<repo>/<quant>-manifest.json
//! <base>/models/<user>/<repo>/metadata.yaml
//! <base>/cache/peer_file_index.yaml
//! <base>/cache/peers.yaml
//! ```
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Layout {
    base_dir: PathBuf,
}

impl Layout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn models_dir(&self) -> PathBuf {
        self.base_dir.join("models")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    pub fn repo_dir(&self, user: &str, repo: &str) -> PathBuf {
        self.models_dir().join(user).join(repo)
    }

    pub fn single_file_path(&self, user: &str, repo: &str, quant: &str) -> PathBuf {
        self.repo_dir(user, repo).join(format!("{quant}.gguf"))
    }

    pub fn split_dir(&self, user: &str, repo: &str, quant: &str) -> PathBuf {
        self.repo_dir(user, repo).join(quant)
    }

    pub fn mmproj_path(&self, user: &str, repo: &str, quant: &str) -> PathBuf {
        self.repo_dir(user, repo)
            .join(format!("{quant}-mmproj.gguf"))
    }

    pub fn manifest_path(&self, user: &str, repo: &str, quant: &str) -> PathBuf {
        self.repo_dir(user, repo)
            .join(format!("{quant}-manifest.json"))
    }

    pub fn metadata_path(&self, user: &str, repo: &str) -> PathBuf {
        self.repo_dir(user, repo).join("metadata.yaml")
    }

    pub fn peer_index_path(&self) -> PathBuf {
        self.cache_dir().join("peer_file_index.yaml")
    }

    pub fn peer_cache_path(&self) -> PathBuf {
        self.cache_dir().join("peers.yaml")
    }

    /// Returns the path to the locally cached GGUF entry point for a quant, if present:
    /// the single file, or part 1 inside the split directory. Empty if neither exists.
    pub fn find_model_file(&self, user: &str, repo: &str, quant: &str) -> Option<PathBuf> {
        let single = self.single_file_path(user, repo, quant);
        if single.is_file() {
            return Some(single);
        }
        let split = self.split_dir(user, repo, quant);
        if split.is_dir() {
            if let Ok(entries) = std::fs::read_dir(&split) {
                let mut parts: Vec<PathBuf> = entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        p.extension().and_then(|e| e.to_str()) == Some("gguf")
                    })
                    .collect();
                parts.sort();
                if let Some(first) = parts.into_iter().find(|p| {
                    crate::split::parse_split_filename(
                        p.file_name().and_then(|f| f.to_str()).unwrap_or(""),
                    )
                    .map(|s| s.split_no == 0)
                    .unwrap_or(false)
                }) {
                    return Some(first);
                }
            }
        }
        None
    }
}

/// Write `contents` to `path` via a temporary sibling file, then atomically rename it
/// into place. Any failure leaves `path` untouched.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(tmp_extension(path));
    let write_result = std::fs::write(&tmp, contents);
    match write_result {
        Ok(()) => {
            std::fs::rename(&tmp, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e.into())
        }
    }
}

fn tmp_extension(path: &Path) -> std::ffi::OsString {
    let mut ext = path
        .extension()
        .map(|e| e.to_os_string())
        .unwrap_or_default();
    if !ext.is_empty() {
        ext.push(".");
    }
    ext.push("tmp");
    ext
}

/// Removes any `.partial` shadow files left under `dir` by an interrupted download.
pub fn sweep_partials(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    if !dir.is_dir() {
        return Ok(0);
    }
    for entry in walk(dir)? {
        if entry.extension().and_then(|e| e.to_str()) == Some("partial") {
            std::fs::remove_file(&entry)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn walk(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk(&path)?);
        } else {
            out.push(path);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_match_spec() {
        let l = Layout::new("/base");
        assert_eq!(
            l.single_file_path("u", "r", "Q4_K_M"),
            PathBuf::from("/base/models/u/r/Q4_K_M.gguf")
        );
        assert_eq!(
            l.manifest_path("u", "r", "Q4_K_M"),
            PathBuf::from("/base/models/u/r/Q4_K_M-manifest.json")
        );
        assert_eq!(
            l.peer_index_path(),
            PathBuf::from("/base/cache/peer_file_index.yaml")
        );
    }

    #[test]
    fn atomic_write_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn sweep_partials_removes_only_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.gguf"), b"x").unwrap();
        std::fs::write(dir.path().join("a.gguf.partial"), b"x").unwrap();
        let removed = sweep_partials(dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("a.gguf").exists());
        assert!(!dir.path().join("a.gguf.partial").exists());
    }
}

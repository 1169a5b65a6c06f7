//! The peer hash index: `sha256 -> absolute path`, rebuilt by scanning every
//! `<quant>-manifest.json` under the models directory.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hub_core::{Layout, Manifest};

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct PeerHashIndex {
    map: HashMap<String, PathBuf>,
}

impl PeerHashIndex {
    pub fn lookup(&self, sha256: &str) -> Option<&Path> {
        self.map.get(&sha256.to_ascii_lowercase()).map(|p| p.as_path())
    }

    /// Builds an index directly from a map, bypassing a filesystem rebuild.
    /// Used by the peer server's tests to exercise path-containment checks
    /// without constructing real on-disk manifests for every case.
    #[cfg(any(test, feature = "test-util"))]
    pub fn from_map(map: HashMap<String, PathBuf>) -> Self {
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serializable: HashMap<&String, &PathBuf> = self.map.iter().collect();
        let yaml = serde_yaml::to_string(&serializable)?;
        hub_core::atomic_write(path, yaml.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let map: HashMap<String, PathBuf> = serde_yaml::from_str(&contents)?;
        Ok(Self { map })
    }
}

/// Holds the published index behind a swappable `Arc` so in-flight server
/// requests keep reading the snapshot that was current when they started.
#[derive(Clone, Default)]
pub struct SharedIndex {
    inner: Arc<std::sync::RwLock<Arc<PeerHashIndex>>>,
}

impl SharedIndex {
    pub fn new(index: PeerHashIndex) -> Self {
        Self { inner: Arc::new(std::sync::RwLock::new(Arc::new(index))) }
    }

    pub fn snapshot(&self) -> Arc<PeerHashIndex> {
        self.inner.read().unwrap().clone()
    }

    pub fn publish(&self, index: PeerHashIndex) {
        *self.inner.write().unwrap() = Arc::new(index);
    }
}

/// Walks `layout`'s models directory and rebuilds the index from every
/// `<quant>-manifest.json` file found. Entries are inserted only if the
/// referenced file currently exists on disk.
pub fn rebuild(layout: &Layout) -> Result<PeerHashIndex> {
    let mut map = HashMap::new();
    let models_dir = layout.models_dir();
    if !models_dir.is_dir() {
        return Ok(PeerHashIndex { map });
    }
    tracing::debug!(dir = %models_dir.display(), "rebuilding peer hash index");

    for user_entry in std::fs::read_dir(&models_dir)? {
        let user_entry = user_entry?;
        if !user_entry.path().is_dir() {
            continue;
        }
        let user = user_entry.file_name().to_string_lossy().into_owned();

        for repo_entry in std::fs::read_dir(user_entry.path())? {
            let repo_entry = repo_entry?;
            if !repo_entry.path().is_dir() {
                continue;
            }
            let repo = repo_entry.file_name().to_string_lossy().into_owned();

            for file_entry in std::fs::read_dir(repo_entry.path())? {
                let file_entry = file_entry?;
                let path = file_entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
                let Some(quant) = name.strip_suffix("-manifest.json") else { continue };

                let Ok(bytes) = std::fs::read(&path) else { continue };
                let Ok(manifest): std::result::Result<Manifest, _> = serde_json::from_slice(&bytes) else {
                    continue;
                };

                insert_if_exists(&mut map, &manifest.gguf_file, || {
                    layout.find_model_file(&user, &repo, quant)
                });
                for part in &manifest.split_files {
                    let part_name = part.rfilename.rsplit('/').next().unwrap_or(&part.rfilename);
                    let part_path = layout.split_dir(&user, &repo, quant).join(part_name);
                    if let Some(lfs) = &part.lfs {
                        if part_path.is_file() {
                            map.insert(lfs.sha256.to_ascii_lowercase(), part_path);
                        }
                    }
                }
                insert_if_exists(&mut map, &manifest.mmproj_file, || {
                    let p = layout.mmproj_path(&user, &repo, quant);
                    p.is_file().then_some(p)
                });
            }
        }
    }

    tracing::info!(entries = map.len(), "peer hash index rebuilt");
    Ok(PeerHashIndex { map })
}

fn insert_if_exists(
    map: &mut HashMap<String, PathBuf>,
    file: &Option<hub_core::ManifestFile>,
    resolve: impl FnOnce() -> Option<PathBuf>,
) {
    let Some(file) = file else { return };
    let Some(lfs) = &file.lfs else { return };
    if let Some(path) = resolve() {
        map.insert(lfs.sha256.to_ascii_lowercase(), path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{ManifestFile, ManifestLfs};

    fn write_manifest(layout: &Layout, user: &str, repo: &str, quant: &str, sha: &str, bytes: &[u8]) {
        let model_path = layout.single_file_path(user, repo, quant);
        std::fs::create_dir_all(model_path.parent().unwrap()).unwrap();
        std::fs::write(&model_path, bytes).unwrap();

        let manifest = Manifest {
            gguf_file: Some(ManifestFile {
                rfilename: format!("{quant}.gguf"),
                size: bytes.len() as u64,
                lfs: Some(ManifestLfs { sha256: sha.to_string(), size: bytes.len() as u64 }),
            }),
            mmproj_file: None,
            split_files: vec![],
        };
        let manifest_path = layout.manifest_path(user, repo, quant);
        std::fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();
    }

    #[test]
    fn rebuild_indexes_existing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        write_manifest(&layout, "alice", "modelrepo", "Q4_K_M", &"a".repeat(64), b"hello");

        let index = rebuild(&layout).unwrap();
        assert_eq!(index.len(), 1);
        let path = index.lookup(&"a".repeat(64)).unwrap();
        assert!(path.ends_with("Q4_K_M.gguf"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        write_manifest(&layout, "alice", "modelrepo", "Q4_K_M", &"AB".repeat(32), b"hi");
        let index = rebuild(&layout).unwrap();
        assert!(index.lookup(&"ab".repeat(32)).is_some());
    }

    #[test]
    fn index_round_trips_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        write_manifest(&layout, "alice", "modelrepo", "Q4_K_M", &"c".repeat(64), b"data");
        let index = rebuild(&layout).unwrap();
        let path = layout.peer_index_path();
        index.save(&path).unwrap();
        let loaded = PeerHashIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), index.len());
    }
}

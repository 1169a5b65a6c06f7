//! Drives artifact resolution, split expansion, download, verification, and
//! persistence for a single `(user, repo, quant)` pull.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::download::{download_resumable, HttpByteSource, ProgressCallback};
use crate::error::{HubError, Result};
use crate::hub_client::HubClient;
use crate::layout::{atomic_write, Layout};
use crate::manifest::{Manifest, ManifestFile, ManifestLfs};
use crate::progress::{Phase, PhaseAccumulator, PullProgressCallback};
use crate::split;

/// A capability to fetch a file's bytes from the local LAN swarm before
/// falling back to the hub. Peer-side failures are never surfaced as errors:
/// `try_download` returns `false` and the caller falls back silently.
#[async_trait::async_trait]
pub trait PeerDownloader: Send + Sync {
    async fn try_download(
        &self,
        sha256: &str,
        dest: &Path,
        expected_size: u64,
        progress: Option<ProgressCallback>,
    ) -> bool;
}

#[derive(Default)]
pub struct PullOptions {
    /// Pre-fetched manifest, skipping the `get_manifest` round-trip. When
    /// supplied without `manifest_raw`, the saved manifest is always
    /// re-marshaled rather than persisted byte-for-byte.
    pub manifest: Option<Manifest>,
    /// The exact bytes the hub returned for `manifest`, if known. Persisted
    /// byte-for-byte when the pull has no split parts to augment (§4.7 step 8).
    pub manifest_raw: Option<Vec<u8>>,
    pub branch: String,
    pub peer_downloader: Option<Arc<dyn PeerDownloader>>,
    /// Cooperative cancellation, checked between files in the download and
    /// verify phases. The `.partial` shadow of any in-flight file is left
    /// intact so a subsequent pull can resume it (§5 "Suspension points").
    pub cancel: Option<tokio_util::sync::CancellationToken>,
}

impl PullOptions {
    pub fn new() -> Self {
        Self { branch: "main".to_string(), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    pub model_path: PathBuf,
    pub mmproj_path: Option<PathBuf>,
    pub is_vision: bool,
    pub gguf_size: u64,
    pub mmproj_size: u64,
    pub total_size: u64,
}

struct PlannedFile {
    dest: PathBuf,
    rfilename: String,
    size: u64,
    sha256: Option<String>,
    from_peer: bool,
}

pub async fn pull(
    client: &HubClient,
    layout: &Layout,
    user: &str,
    repo: &str,
    quant: &str,
    tag: &str,
    options: PullOptions,
    progress: Option<PullProgressCallback>,
) -> Result<PullResult> {
    let branch = if options.branch.is_empty() { "main".to_string() } else { options.branch.clone() };
    tracing::info!(user, repo, quant, tag, "starting pull");

    let (manifest, manifest_raw) = match options.manifest {
        Some(m) => (m, options.manifest_raw.clone()),
        None => {
            let (m, raw) = client.get_manifest_cancellable(user, repo, tag, options.cancel.as_ref()).await?;
            (m, Some(raw))
        }
    };
    let gguf_file = manifest
        .gguf_file
        .clone()
        .ok_or_else(|| HubError::Manifest("manifest has no ggufFile".to_string()))?;

    let basename = gguf_file.rfilename.rsplit('/').next().unwrap_or(&gguf_file.rfilename);
    let split_info = split::parse_split_filename(basename);
    if let Some(info) = &split_info {
        if info.split_no != 0 {
            return Err(HubError::Split(format!(
                "manifest points at split part {} (0-based), expected part 0",
                info.split_no
            )));
        }
    }

    let mut manifest = manifest;
    if let Some(info) = &split_info {
        let subdir = gguf_file.rfilename.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let tree = client
            .list_files_in_path_cancellable(user, repo, &branch, subdir, options.cancel.as_ref())
            .await?;
        let mut by_name = std::collections::HashMap::new();
        for entry in &tree {
            by_name.insert(entry.basename().to_string(), entry);
        }
        let mut split_files = Vec::new();
        for part in 1..info.split_count {
            let name = split::split_filename(&info.prefix, part, info.split_count);
            let entry = by_name.get(name.as_str()).ok_or_else(|| {
                HubError::Manifest(format!("missing expected split part {name}"))
            })?;
            split_files.push(ManifestFile {
                rfilename: if subdir.is_empty() { name.clone() } else { format!("{subdir}/{name}") },
                size: entry.size,
                lfs: entry.lfs.as_ref().map(|l| ManifestLfs { sha256: l.oid.clone(), size: l.size }),
            });
        }
        tracing::debug!(user, repo, quant, parts = split_files.len() + 1, "expanded split manifest");
        manifest.split_files = split_files;
    }

    // Lay out targets.
    let is_split = split_info.is_some();
    let mut planned = Vec::new();
    if is_split {
        let split_dir = layout.split_dir(user, repo, quant);
        planned.push(PlannedFile {
            dest: split_dir.join(basename),
            rfilename: gguf_file.rfilename.clone(),
            size: gguf_file.size,
            sha256: gguf_file.lfs.as_ref().map(|l| l.sha256.clone()),
            from_peer: false,
        });
        for part in &manifest.split_files {
            let part_name = part.rfilename.rsplit('/').next().unwrap_or(&part.rfilename);
            planned.push(PlannedFile {
                dest: split_dir.join(part_name),
                rfilename: part.rfilename.clone(),
                size: part.size,
                sha256: part.lfs.as_ref().map(|l| l.sha256.clone()),
                from_peer: false,
            });
        }
    } else {
        planned.push(PlannedFile {
            dest: layout.single_file_path(user, repo, quant),
            rfilename: gguf_file.rfilename.clone(),
            size: gguf_file.size,
            sha256: gguf_file.lfs.as_ref().map(|l| l.sha256.clone()),
            from_peer: false,
        });
    }
    if let Some(mmproj) = &manifest.mmproj_file {
        planned.push(PlannedFile {
            dest: layout.mmproj_path(user, repo, quant),
            rfilename: mmproj.rfilename.clone(),
            size: mmproj.size,
            sha256: mmproj.lfs.as_ref().map(|l| l.sha256.clone()),
            from_peer: false,
        });
    }

    let all_targets: Vec<PathBuf> = planned.iter().map(|p| p.dest.clone()).collect();
    let cleanup = |targets: &[PathBuf], split_dir: Option<&Path>| {
        for t in targets {
            let _ = std::fs::remove_file(t);
        }
        if let Some(dir) = split_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    };
    let split_dir_for_cleanup = if is_split { Some(layout.split_dir(user, repo, quant)) } else { None };

    // Download phase.
    let file_sizes: Vec<u64> = planned.iter().map(|p| p.size).collect();
    let acc = Arc::new(Mutex::new(PhaseAccumulator::new(Phase::Download, file_sizes, progress.clone())));
    for file in &mut planned {
        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            tracing::info!(user, repo, quant, "pull cancelled during download phase");
            return Err(HubError::Cancelled);
        }
        let result = download_one_file(client, user, repo, &branch, file, &acc, &options).await;
        if let Err(e) = result {
            tracing::warn!(user, repo, quant, file = %file.rfilename, error = %e, "download failed, cleaning up pull");
            cleanup(&all_targets, split_dir_for_cleanup.as_deref());
            return Err(e);
        }
        tracing::debug!(user, repo, quant, file = %file.rfilename, from_peer = file.from_peer, "file downloaded");
        acc.lock().unwrap().advance();
    }

    // Verify phase.
    let verify_sizes: Vec<u64> = planned.iter().map(|p| p.size).collect();
    let vacc = Arc::new(Mutex::new(PhaseAccumulator::new(Phase::Verify, verify_sizes, progress.clone())));
    for file in &mut planned {
        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            tracing::info!(user, repo, quant, "pull cancelled during verify phase");
            return Err(HubError::Cancelled);
        }
        let ok = verify_one_file(client, user, repo, &branch, file, &vacc).await;
        match ok {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                tracing::warn!(user, repo, quant, file = %file.rfilename, "hash verification failed, cleaning up pull");
                cleanup(&all_targets, split_dir_for_cleanup.as_deref());
                return Err(HubError::HashMismatch {
                    path: file.dest.display().to_string(),
                    expected: file.sha256.clone().unwrap_or_default(),
                    actual: "mismatch after retry".to_string(),
                });
            }
        }
        vacc.lock().unwrap().advance();
    }

    // Persist manifest. Split pulls augment the manifest with locally
    // computed `splitFiles`, so the raw hub response no longer reflects it
    // and the augmented value must be re-marshaled; otherwise the hub's
    // byte-exact response is kept as-is (§4.7 step 8).
    let manifest_path = layout.manifest_path(user, repo, quant);
    let manifest_bytes = if manifest.split_files.is_empty() {
        match &manifest_raw {
            Some(raw) => raw.clone(),
            None => serde_json::to_vec_pretty(&manifest)?,
        }
    } else {
        serde_json::to_vec_pretty(&manifest)?
    };
    atomic_write(&manifest_path, &manifest_bytes)?;

    // Record the download in the repo's usage metadata (§3 "Lifecycle:
    // written on successful pull"); `lastUsed` updates are the serving
    // layer's responsibility from here on.
    let metadata_path = layout.metadata_path(user, repo);
    let mut repo_metadata = crate::repo_metadata::RepoMetadata::load(&metadata_path)?;
    repo_metadata.record_download(quant, chrono::Utc::now());
    repo_metadata.save(&metadata_path)?;

    tracing::info!(user, repo, quant, total_size = manifest.total_size(), "pull complete");

    let model_path = planned[0].dest.clone();
    let mmproj_path = manifest.mmproj_file.as_ref().map(|_| layout.mmproj_path(user, repo, quant));
    let gguf_size = manifest.gguf_file.as_ref().map(|f| f.size).unwrap_or(0)
        + manifest.split_files.iter().map(|f| f.size).sum::<u64>();
    let mmproj_size = manifest.mmproj_file.as_ref().map(|f| f.size).unwrap_or(0);

    Ok(PullResult {
        model_path,
        mmproj_path,
        is_vision: manifest.is_vision(),
        gguf_size,
        mmproj_size,
        total_size: manifest.total_size(),
    })
}

async fn download_one_file(
    client: &HubClient,
    user: &str,
    repo: &str,
    branch: &str,
    file: &mut PlannedFile,
    acc: &Arc<Mutex<PhaseAccumulator>>,
    options: &PullOptions,
) -> Result<()> {
    let cb: ProgressCallback = {
        let acc = acc.clone();
        Arc::new(move |done, _total| {
            if let Ok(guard) = acc.lock() {
                guard.report(done);
            }
        })
    };

    if let (Some(peer), Some(hash)) = (&options.peer_downloader, &file.sha256) {
        if peer
            .try_download(hash, &file.dest, file.size, Some(cb.clone()))
            .await
        {
            file.from_peer = true;
            return Ok(());
        }
    }

    let token = client.config_token();
    let url = client.resolve_url(user, repo, branch, &file.rfilename);
    let source = HttpByteSource { client: client.download_client(), url, bearer: token };
    download_resumable(&source, &file.dest, Some(cb)).await?;
    Ok(())
}

async fn verify_one_file(
    client: &HubClient,
    user: &str,
    repo: &str,
    branch: &str,
    file: &mut PlannedFile,
    acc: &Arc<Mutex<PhaseAccumulator>>,
) -> Result<bool> {
    let expected = match &file.sha256 {
        None => {
            acc.lock().unwrap().report(file.size);
            return Ok(true);
        }
        Some(h) => h.clone(),
    };

    let cb: crate::verify::VerifyProgressCallback = {
        let acc = acc.clone();
        Arc::new(move |done, _total| {
            if let Ok(guard) = acc.lock() {
                guard.report(done);
            }
        })
    };
    let actual = crate::verify::sha256_file(&file.dest, Some(cb)).await?;
    if crate::verify::hashes_match(&expected, &actual) {
        return Ok(true);
    }

    if !file.from_peer {
        return Ok(false);
    }

    // One automatic hub retry for a peer-sourced file.
    tracing::warn!(file = %file.rfilename, "peer-sourced file failed verification, retrying from hub");
    let _ = tokio::fs::remove_file(&file.dest).await;
    let token = client.config_token();
    let url = client.resolve_url(user, repo, branch, &file.rfilename);
    let source = HttpByteSource { client: client.download_client(), url, bearer: token };
    download_resumable(&source, &file.dest, None).await?;
    file.from_peer = false;

    let actual_retry = crate::verify::sha256_file(&file.dest, None).await?;
    Ok(crate::verify::hashes_match(&expected, &actual_retry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub_client::HubClientConfig;
    use axum::{
        extract::{Path as AxumPath, State},
        routing::get,
        Json, Router,
    };
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    #[test]
    fn planned_file_carries_expected_fields() {
        let f = PlannedFile {
            dest: PathBuf::from("/x"),
            rfilename: "a".into(),
            size: 1,
            sha256: None,
            from_peer: false,
        };
        assert_eq!(f.size, 1);
    }

    fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[derive(Clone)]
    struct MockHub {
        manifest: Manifest,
        tree: Vec<crate::filetree::TreeEntry>,
        files: Arc<HashMap<String, Vec<u8>>>,
    }

    /// Serves the three hub endpoints `pull` depends on: the manifest, the
    /// tree listing (for split expansion), and byte-range resolve, against a
    /// fixed `(user=a, repo=b, branch=main, tag=latest)`.
    async fn spawn_mock_hub(manifest: Manifest, tree: Vec<crate::filetree::TreeEntry>, files: HashMap<String, Vec<u8>>) -> SocketAddr {
        let state = MockHub { manifest, tree, files: Arc::new(files) };

        async fn serve_manifest(State(state): State<MockHub>) -> Json<Manifest> {
            Json(state.manifest.clone())
        }
        async fn serve_tree(State(state): State<MockHub>) -> Json<Vec<crate::filetree::TreeEntry>> {
            Json(state.tree.clone())
        }
        async fn serve_file(
            AxumPath(path): AxumPath<String>,
            headers: axum::http::HeaderMap,
            State(state): State<MockHub>,
        ) -> axum::response::Response {
            use axum::response::IntoResponse;
            let Some(body) = state.files.get(&path) else {
                return axum::http::StatusCode::NOT_FOUND.into_response();
            };
            if let Some(range) = headers.get(axum::http::header::RANGE) {
                let from: usize = range
                    .to_str()
                    .unwrap()
                    .trim_start_matches("bytes=")
                    .trim_end_matches('-')
                    .parse()
                    .unwrap();
                let slice = &body[from..];
                return (
                    axum::http::StatusCode::PARTIAL_CONTENT,
                    [(axum::http::header::CONTENT_LENGTH, slice.len().to_string())],
                    slice.to_vec(),
                )
                    .into_response();
            }
            (
                axum::http::StatusCode::OK,
                [(axum::http::header::CONTENT_LENGTH, body.len().to_string())],
                body.clone(),
            )
                .into_response()
        }

        let app = Router::new()
            .route("/v2/a/b/manifests/latest", get(serve_manifest))
            .route("/api/models/a/b/tree/main", get(serve_tree))
            .route("/api/models/a/b/tree/main/{*subdir}", get(serve_tree))
            .route("/a/b/resolve/main/{*path}", get(serve_file))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn client_for(addr: SocketAddr) -> HubClient {
        HubClient::new(HubClientConfig {
            base_url: format!("http://{addr}"),
            ..HubClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn single_file_pull_hub_only() {
        let body = vec![7u8; 100 * 1024];
        let hash = sha256_hex(&body);
        let manifest = Manifest {
            gguf_file: Some(ManifestFile {
                rfilename: "model-Q4_K_M.gguf".into(),
                size: body.len() as u64,
                lfs: Some(ManifestLfs { sha256: hash, size: body.len() as u64 }),
            }),
            mmproj_file: None,
            split_files: vec![],
        };
        let mut files = HashMap::new();
        files.insert("model-Q4_K_M.gguf".to_string(), body);
        let addr = spawn_mock_hub(manifest, vec![], files).await;
        let client = client_for(addr);

        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let result = pull(&client, &layout, "a", "b", "Q4_K_M", "latest", PullOptions::new(), None)
            .await
            .unwrap();

        assert_eq!(result.model_path, layout.single_file_path("a", "b", "Q4_K_M"));
        assert_eq!(result.total_size, 102400);
        assert!(!result.is_vision);
        assert!(layout.manifest_path("a", "b", "Q4_K_M").is_file());
        assert!(!crate::download::partial_path(&result.model_path).exists());
    }

    #[tokio::test]
    async fn split_pull_downloads_all_parts() {
        let part_size = 20 * 1024;
        let part1 = vec![1u8; part_size];
        let part2 = vec![2u8; part_size];
        let part3 = vec![3u8; part_size];
        let hash1 = sha256_hex(&part1);
        let hash2 = sha256_hex(&part2);
        let hash3 = sha256_hex(&part3);

        let manifest = Manifest {
            gguf_file: Some(ManifestFile {
                rfilename: "Q4_K_M/model-00001-of-00003.gguf".into(),
                size: part_size as u64,
                lfs: Some(ManifestLfs { sha256: hash1.clone(), size: part_size as u64 }),
            }),
            mmproj_file: None,
            split_files: vec![],
        };
        let tree = vec![
            crate::filetree::TreeEntry {
                path: "Q4_K_M/model-00001-of-00003.gguf".into(),
                entry_type: crate::filetree::EntryType::File,
                size: part_size as u64,
                lfs: Some(crate::filetree::Lfs { oid: hash1.clone(), size: part_size as u64 }),
            },
            crate::filetree::TreeEntry {
                path: "Q4_K_M/model-00002-of-00003.gguf".into(),
                entry_type: crate::filetree::EntryType::File,
                size: part_size as u64,
                lfs: Some(crate::filetree::Lfs { oid: hash2, size: part_size as u64 }),
            },
            crate::filetree::TreeEntry {
                path: "Q4_K_M/model-00003-of-00003.gguf".into(),
                entry_type: crate::filetree::EntryType::File,
                size: part_size as u64,
                lfs: Some(crate::filetree::Lfs { oid: hash3, size: part_size as u64 }),
            },
        ];
        let mut files = HashMap::new();
        files.insert("Q4_K_M/model-00001-of-00003.gguf".to_string(), part1);
        files.insert("Q4_K_M/model-00002-of-00003.gguf".to_string(), part2);
        files.insert("Q4_K_M/model-00003-of-00003.gguf".to_string(), part3);
        let addr = spawn_mock_hub(manifest, tree, files).await;
        let client = client_for(addr);

        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let result = pull(&client, &layout, "a", "b", "Q4_K_M", "latest", PullOptions::new(), None)
            .await
            .unwrap();

        let split_dir = layout.split_dir("a", "b", "Q4_K_M");
        assert_eq!(result.model_path, split_dir.join("model-00001-of-00003.gguf"));
        assert!(split_dir.join("model-00002-of-00003.gguf").is_file());
        assert!(split_dir.join("model-00003-of-00003.gguf").is_file());
        assert_eq!(result.total_size, (part_size * 3) as u64);
        let saved: Manifest = serde_json::from_slice(
            &std::fs::read(layout.manifest_path("a", "b", "Q4_K_M")).unwrap(),
        )
        .unwrap();
        assert_eq!(saved.split_files.len(), 2);
    }

    struct CorruptThenCleanPeer;

    #[async_trait::async_trait]
    impl PeerDownloader for CorruptThenCleanPeer {
        async fn try_download(
            &self,
            _sha256: &str,
            dest: &Path,
            expected_size: u64,
            _progress: Option<ProgressCallback>,
        ) -> bool {
            // Simulates a peer whose cached copy is bit-rotted: it answers
            // with the right size but wrong bytes.
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(dest, vec![0xAAu8; expected_size as usize]).unwrap();
            true
        }
    }

    #[tokio::test]
    async fn corrupt_peer_copy_falls_back_to_clean_hub_retry() {
        let body = vec![9u8; 50 * 1024];
        let hash = sha256_hex(&body);
        let manifest = Manifest {
            gguf_file: Some(ManifestFile {
                rfilename: "model-Q4_K_M.gguf".into(),
                size: body.len() as u64,
                lfs: Some(ManifestLfs { sha256: hash, size: body.len() as u64 }),
            }),
            mmproj_file: None,
            split_files: vec![],
        };
        let mut files = HashMap::new();
        files.insert("model-Q4_K_M.gguf".to_string(), body);
        let addr = spawn_mock_hub(manifest, vec![], files).await;
        let client = client_for(addr);

        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let mut options = PullOptions::new();
        options.peer_downloader = Some(Arc::new(CorruptThenCleanPeer));
        let result = pull(&client, &layout, "a", "b", "Q4_K_M", "latest", options, None)
            .await
            .unwrap();

        assert_eq!(result.total_size, 50 * 1024);
        let on_disk = std::fs::read(&result.model_path).unwrap();
        assert_eq!(sha256_hex(&on_disk), sha256_hex(&vec![9u8; 50 * 1024]));
    }
}

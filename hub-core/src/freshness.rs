//! Comparing a locally saved manifest against the remote to answer
//! "is the cached artifact up to date?" without re-downloading anything.
use crate::hub_client::HubClient;
use crate::layout::Layout;
use crate::manifest::{Manifest, ManifestFile};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    UpToDate,
    /// Up to date, but no saved manifest existed yet (legacy adoption) —
    /// the caller should persist `manifest` now.
    UpToDateAdopt { manifest: Manifest },
    Stale,
}

/// Compares two manifest-file records for equality: hashes when both sides
/// have one, otherwise sizes. Absent on both sides compares equal.
fn files_match(remote: &ManifestFile, saved: &ManifestFile) -> bool {
    match (&remote.lfs, &saved.lfs) {
        (Some(r), Some(s)) => r.sha256.eq_ignore_ascii_case(&s.sha256),
        (None, None) => remote.size == saved.size,
        _ => false,
    }
}

pub async fn check_for_updates(
    client: &HubClient,
    layout: &Layout,
    user: &str,
    repo: &str,
    quant: &str,
    tag: &str,
) -> Result<Freshness> {
    check_for_updates_cancellable(client, layout, user, repo, quant, tag, None).await
}

/// Same as [`check_for_updates`], but aborts with [`crate::error::HubError::Cancelled`]
/// if `cancel` fires while the manifest fetch is retrying.
pub async fn check_for_updates_cancellable(
    client: &HubClient,
    layout: &Layout,
    user: &str,
    repo: &str,
    quant: &str,
    tag: &str,
    cancel: Option<&tokio_util::sync::CancellationToken>,
) -> Result<Freshness> {
    let (remote, _raw) = client.get_manifest_cancellable(user, repo, tag, cancel).await?;
    let manifest_path = layout.manifest_path(user, repo, quant);

    if !manifest_path.is_file() {
        let model_path = layout.single_file_path(user, repo, quant);
        let remote_size = remote.gguf_file.as_ref().map(|f| f.size).unwrap_or(0);
        let size_matches = model_path
            .metadata()
            .map(|m| m.len() == remote_size)
            .unwrap_or(false);
        let mmproj_ok = match &remote.mmproj_file {
            None => true,
            Some(f) => layout
                .mmproj_path(user, repo, quant)
                .metadata()
                .map(|m| m.len() == f.size)
                .unwrap_or(false),
        };
        return Ok(if size_matches && mmproj_ok {
            Freshness::UpToDateAdopt { manifest: remote }
        } else {
            Freshness::Stale
        });
    }

    let saved_bytes = std::fs::read(&manifest_path)?;
    let saved: Manifest = serde_json::from_slice(&saved_bytes)
        .map_err(|e| crate::error::HubError::Manifest(format!("corrupt saved manifest: {e}")))?;

    let gguf_ok = match (&remote.gguf_file, &saved.gguf_file) {
        (Some(r), Some(s)) => files_match(r, s),
        _ => false,
    };
    let mmproj_ok = match (&remote.mmproj_file, &saved.mmproj_file) {
        (Some(r), Some(s)) => files_match(r, s),
        (None, None) => true,
        _ => false,
    };

    let model_exists = layout.find_model_file(user, repo, quant).is_some();
    let mmproj_exists = remote.mmproj_file.is_none()
        || layout.mmproj_path(user, repo, quant).is_file();

    Ok(if gguf_ok && mmproj_ok && model_exists && mmproj_exists {
        Freshness::UpToDate
    } else {
        Freshness::Stale
    })
}

//! The hub-side integration point: a `PeerDownloader` that probes the known
//! peers in parallel and downloads from whichever responds first, falling
//! back silently (never surfacing an error) on any failure.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hub_core::download::{download_resumable, HttpByteSource, ProgressCallback};
use hub_core::pull::PeerDownloader;

use crate::cache::Peer;

const PROBE_DEADLINE: Duration = Duration::from_secs(5);

pub struct LanPeerDownloader {
    client: reqwest::Client,
    peers: tokio::sync::Mutex<Option<Vec<Peer>>>,
    discover: Box<dyn Fn() -> futures::future::BoxFuture<'static, Vec<Peer>> + Send + Sync>,
}

impl LanPeerDownloader {
    pub fn new(
        discover: impl Fn() -> futures::future::BoxFuture<'static, Vec<Peer>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            peers: tokio::sync::Mutex::new(None),
            discover: Box::new(discover),
        }
    }

    async fn peers(&self) -> Vec<Peer> {
        let mut guard = self.peers.lock().await;
        if guard.is_none() {
            *guard = Some((self.discover)().await);
        }
        guard.clone().unwrap_or_default()
    }

    fn peer_url(peer: &Peer, sha256: &str) -> String {
        format!("http://{}:{}/api/peer/sha256/{}", peer.host, peer.port, sha256)
    }

    async fn probe(&self, peer: &Peer, sha256: &str) -> Option<u64> {
        let url = Self::peer_url(peer, sha256);
        let resp = tokio::time::timeout(PROBE_DEADLINE, self.client.head(&url).send())
            .await
            .ok()?
            .ok()?;
        if resp.status().as_u16() != 200 {
            return None;
        }
        resp.content_length()
    }
}

#[async_trait::async_trait]
impl PeerDownloader for LanPeerDownloader {
    async fn try_download(
        &self,
        sha256: &str,
        dest: &Path,
        expected_size: u64,
        progress: Option<ProgressCallback>,
    ) -> bool {
        let peers = self.peers().await;
        if peers.is_empty() {
            return false;
        }

        let probes = peers.iter().map(|p| {
            let sha256 = sha256.to_string();
            async move { (p.clone(), self.probe(p, &sha256).await) }
        });
        let results = futures::future::join_all(probes).await;
        let chosen = results.into_iter().find_map(|(peer, size)| size.map(|s| (peer, s)));

        let Some((peer, size)) = chosen else {
            tracing::debug!(sha256, "no peer responded, falling back to hub");
            return false;
        };
        if expected_size != 0 && size != expected_size {
            tracing::debug!(sha256, peer = %peer.name, size, expected_size, "peer size mismatch, falling back to hub");
            return false;
        }

        let url = Self::peer_url(&peer, sha256);
        let source = HttpByteSource { client: self.client.clone(), url, bearer: None };
        match download_resumable(&source, dest, progress).await {
            Ok(_) => {
                tracing::debug!(sha256, peer = %peer.name, "downloaded from peer");
                true
            }
            Err(e) => {
                tracing::debug!(sha256, peer = %peer.name, error = %e, "peer download failed, falling back to hub");
                let _ = std::fs::remove_file(dest);
                let _ = std::fs::remove_file(hub_core::download::partial_path(dest));
                false
            }
        }
    }
}

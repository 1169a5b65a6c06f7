//! Resumable, progress-reporting file download.
//!
//! A download writes through a `<dest>.partial` shadow file. If that shadow
//! already has bytes when a download starts, a `Range` request picks up
//! where the previous attempt left off; a server that ignores the range and
//! answers `200 OK` causes a restart from byte zero.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::{HubError, Result};

/// `(processed_bytes, total_bytes)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

const CHUNK_TARGET: usize = 32 * 1024;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// A source of downloadable bytes — implemented by the hub client's
/// `resolve_file` and by the peer downloader, so the resumption protocol in
/// this module is shared by both origins.
#[async_trait::async_trait]
pub trait ByteSource: Send + Sync {
    async fn fetch(&self, range_from: Option<u64>) -> Result<ResponseStream>;
}

pub struct ResponseStream {
    pub status: u16,
    pub content_length: Option<u64>,
    pub stream: std::pin::Pin<Box<dyn futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
}

/// Downloads into `dest` via a `.partial` shadow file, resuming from any
/// existing partial content. Returns the final file size.
pub async fn download_resumable(
    source: &dyn ByteSource,
    dest: &Path,
    progress: Option<ProgressCallback>,
) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(dest);

    let existing = tokio::fs::metadata(&partial).await.map(|m| m.len()).unwrap_or(0);
    let range_from = if existing > 0 { Some(existing) } else { None };
    if existing > 0 {
        tracing::debug!(dest = %dest.display(), existing, "resuming download from partial file");
    }

    let resp = source.fetch(range_from).await?;

    let (mut file, mut written) = match resp.status {
        206 => {
            let f = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&partial)
                .await?;
            (f, existing)
        }
        200 => {
            if existing > 0 {
                tracing::debug!(dest = %dest.display(), "server ignored range, restarting from byte zero");
            }
            let f = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&partial)
                .await?;
            (f, 0)
        }
        status => {
            return Err(HubError::HubStatus {
                status,
                url: dest.display().to_string(),
                body: "unexpected status for resumable download".to_string(),
            })
        }
    };
    file.seek(std::io::SeekFrom::End(0)).await?;

    let total = written + resp.content_length.unwrap_or(0);
    let mut stream = resp.stream;
    let mut last_report = Instant::now();
    let mut buf = Vec::with_capacity(CHUNK_TARGET);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(&chunk);
        written += chunk.len() as u64;
        if buf.len() >= CHUNK_TARGET {
            file.write_all(&buf).await?;
            buf.clear();
        }
        if let Some(cb) = &progress {
            if last_report.elapsed() >= PROGRESS_INTERVAL || written == total {
                cb(written, total);
                last_report = Instant::now();
            }
        }
    }
    if !buf.is_empty() {
        file.write_all(&buf).await?;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, dest).await?;
    Ok(written)
}

pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

/// A `ByteSource` backed directly by `reqwest`, used for hub and bare-peer
/// downloads alike (peer downloads simply omit the bearer header upstream).
pub struct HttpByteSource {
    pub client: reqwest::Client,
    pub url: String,
    pub bearer: Option<String>,
}

#[async_trait::async_trait]
impl ByteSource for HttpByteSource {
    async fn fetch(&self, range_from: Option<u64>) -> Result<ResponseStream> {
        let mut builder = self.client.get(&self.url);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(from) = range_from {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={from}-"));
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        if status != 200 && status != 206 {
            return Err(HubError::HubStatus {
                status,
                url: self.url.clone(),
                body: "download request failed".to_string(),
            });
        }
        let content_length = resp.content_length();
        Ok(ResponseStream {
            status,
            content_length,
            stream: Box::pin(resp.bytes_stream()),
        })
    }
}

//! HTTP client for the hub's manifest, tree, resolve, and search endpoints.
//!
//! Two transports are kept deliberately separate: `control` for JSON APIs
//! with a short timeout and automatic retry, and `download` whose only
//! timeout bounds the arrival of response headers, leaving body streaming
//! unbounded for multi-gigabyte transfers.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};
use crate::filetree::TreeEntry;
use crate::manifest::Manifest;

const LLAMA_CPP_UA_MARKER: &str = "llama-cpp";
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct HubClientConfig {
    pub base_url: String,
    pub app_name: String,
    pub app_version: String,
    pub token: Option<String>,
}

impl Default for HubClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://huggingface.co".to_string(),
            app_name: "lleme".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            token: None,
        }
    }
}

impl HubClientConfig {
    /// Resolves a bearer token in the order the source gives priority to:
    /// `HF_TOKEN`, then the HF cache's token file, then the configured
    /// value. Trailing whitespace is trimmed.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var("HF_TOKEN")
            .ok()
            .or_else(|| {
                let home = dirs::home_dir()?;
                std::fs::read_to_string(home.join(".cache/huggingface/token")).ok()
            })
            .or_else(|| self.token.clone())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Clone)]
pub struct HubClient {
    config: HubClientConfig,
    control: reqwest::Client,
    download: reqwest::Client,
}

impl HubClient {
    pub fn new(config: HubClientConfig) -> Result<Self> {
        let control = reqwest::Client::builder()
            .user_agent(format!(
                "{}/{} ({LLAMA_CPP_UA_MARKER} compatible)",
                config.app_name, config.app_version
            ))
            .timeout(Duration::from_secs(15))
            .build()?;
        let download = reqwest::Client::builder()
            .user_agent(format!("{}/{}", config.app_name, config.app_version))
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { config, control, download })
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.resolve_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// The resolved bearer token, for callers (the pull orchestrator) that
    /// build their own requests against the download transport.
    pub fn config_token(&self) -> Option<String> {
        self.config.resolve_token()
    }

    /// A cheap clone of the download transport, for callers that stream a
    /// response themselves instead of going through `resolve_file`.
    pub fn download_client(&self) -> reqwest::Client {
        self.download.clone()
    }

    /// Builds the `resolve` URL for a file without issuing a request.
    pub fn resolve_url(&self, user: &str, repo: &str, branch: &str, path: &str) -> String {
        format!("{}/{user}/{repo}/resolve/{branch}/{path}", self.config.base_url)
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        self.get_with_retry_cancellable(url, None).await
    }

    /// Same retry policy as [`Self::get_with_retry`], but races each backoff
    /// sleep against `cancel` so a caller-supplied cancellation token can
    /// abort a stuck control call between attempts (§5 "Suspension points").
    async fn get_with_retry_cancellable(
        &self,
        url: &str,
        cancel: Option<&tokio_util::sync::CancellationToken>,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(HubError::Cancelled);
            }
            attempt += 1;
            let resp = self.auth(self.control.get(url)).send().await;
            let backoff = match &resp {
                Ok(r) if r.status().as_u16() == 429 && attempt < MAX_RETRIES => {
                    tracing::debug!(url, attempt, "hub returned 429, backing off");
                    true
                }
                Ok(_) => false,
                Err(e) if attempt < MAX_RETRIES && (e.is_timeout() || e.is_connect()) => {
                    tracing::debug!(url, attempt, error = %e, "transient transport error, retrying");
                    true
                }
                Err(_) => false,
            };
            if !backoff {
                return resp.map_err(Into::into);
            }
            let sleep = tokio::time::sleep(Duration::from_millis(300 * attempt as u64));
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = sleep => {}
                        _ = token.cancelled() => return Err(HubError::Cancelled),
                    }
                }
                None => sleep.await,
            }
        }
    }

    async fn ok_or_status(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let preview = body.chars().take(256).collect();
        Err(HubError::HubStatus { status, url: url.to_string(), body: preview })
    }

    /// Fetches the OCI-style manifest for `(user, repo, tag)`. Returns the
    /// parsed manifest alongside the exact response bytes, so the pull
    /// orchestrator can persist byte-identical output when no local
    /// augmentation (split expansion) is needed.
    pub async fn get_manifest(&self, user: &str, repo: &str, tag: &str) -> Result<(Manifest, Vec<u8>)> {
        self.get_manifest_cancellable(user, repo, tag, None).await
    }

    /// Same as [`Self::get_manifest`], but aborts with [`HubError::Cancelled`]
    /// if `cancel` fires while the request is retrying.
    pub async fn get_manifest_cancellable(
        &self,
        user: &str,
        repo: &str,
        tag: &str,
        cancel: Option<&tokio_util::sync::CancellationToken>,
    ) -> Result<(Manifest, Vec<u8>)> {
        let url = format!("{}/v2/{user}/{repo}/manifests/{tag}", self.config.base_url);
        tracing::debug!(user, repo, tag, "fetching manifest");
        let resp = self.get_with_retry_cancellable(&url, cancel).await?;
        let resp = Self::ok_or_status(resp, &url).await?;
        let bytes = resp.bytes().await?.to_vec();
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| HubError::Manifest(format!("invalid manifest json: {e}")))?;
        if manifest.gguf_file.is_none() {
            return Err(HubError::Manifest("manifest has no ggufFile".to_string()));
        }
        Ok((manifest, bytes))
    }

    /// Lists tree entries under `subdir` (empty for the repo root) on `branch`.
    pub async fn list_files_in_path(
        &self,
        user: &str,
        repo: &str,
        branch: &str,
        subdir: &str,
    ) -> Result<Vec<TreeEntry>> {
        self.list_files_in_path_cancellable(user, repo, branch, subdir, None).await
    }

    /// Same as [`Self::list_files_in_path`], but aborts with
    /// [`HubError::Cancelled`] if `cancel` fires while the request is retrying.
    pub async fn list_files_in_path_cancellable(
        &self,
        user: &str,
        repo: &str,
        branch: &str,
        subdir: &str,
        cancel: Option<&tokio_util::sync::CancellationToken>,
    ) -> Result<Vec<TreeEntry>> {
        let mut url = format!(
            "{}/api/models/{user}/{repo}/tree/{branch}",
            self.config.base_url
        );
        if !subdir.is_empty() {
            url.push_str(&format!("/{subdir}"));
        }
        let resp = self.get_with_retry_cancellable(&url, cancel).await?;
        let resp = Self::ok_or_status(resp, &url).await?;
        let entries: Vec<TreeEntry> = resp.json().await?;
        Ok(entries)
    }

    /// Issues a GET (optionally byte-range-limited) against the resolve
    /// endpoint for `path`, returning the raw response for the downloader to
    /// stream. Does not raise on non-2xx status; the caller inspects it.
    pub async fn resolve_file(
        &self,
        user: &str,
        repo: &str,
        branch: &str,
        path: &str,
        range_from: Option<u64>,
    ) -> Result<reqwest::Response> {
        let url = format!(
            "{}/{user}/{repo}/resolve/{branch}/{path}",
            self.config.base_url
        );
        let mut builder = self.auth(self.download.get(&url));
        if let Some(from) = range_from {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={from}-"));
        }
        Ok(builder.send().await?)
    }

    /// Repo-level metadata search, used by the external CLI.
    pub async fn search_models(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>> {
        let url = format!(
            "{}/models-json?apps=llama.cpp&sort=trending&search={}&limit={limit}",
            self.config.base_url,
            urlencoding_minimal(query)
        );
        let resp = self.get_with_retry(&url).await?;
        let resp = Self::ok_or_status(resp, &url).await?;
        let results: Vec<SearchResult> = resp.json().await?;
        Ok(results)
    }
}

fn urlencoding_minimal(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            c if c.is_ascii_alphanumeric() || "-_.~".contains(c) => c.to_string(),
            c => format!("%{:02X}", c as u32),
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default, deserialize_with = "deserialize_gated")]
    pub gated: bool,
}

fn deserialize_gated<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Gated {
        Bool(bool),
        Str(String),
    }
    Ok(match Gated::deserialize(deserializer)? {
        Gated::Bool(b) => b,
        Gated::Str(s) => !s.is_empty(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_resolution_falls_back_to_configured_value() {
        // HF_TOKEN and the home-cache token file both win over this, but in
        // the test environment neither is expected to be set, so the
        // configured value is what resolves.
        let config = HubClientConfig {
            token: Some("  configured-token  ".to_string()),
            ..HubClientConfig::default()
        };
        if std::env::var("HF_TOKEN").is_err() {
            assert_eq!(config.resolve_token().as_deref(), Some("configured-token"));
        }
    }

    #[test]
    fn gated_field_accepts_bool_or_string() {
        let from_bool: SearchResult = serde_json::from_str(
            r#"{"id":"a","gated":true}"#,
        ).unwrap();
        assert!(from_bool.gated);

        let from_string: SearchResult = serde_json::from_str(
            r#"{"id":"a","gated":"manual"}"#,
        ).unwrap();
        assert!(from_string.gated);

        let ungated: SearchResult = serde_json::from_str(r#"{"id":"a"}"#).unwrap();
        assert!(!ungated.gated);
    }
}

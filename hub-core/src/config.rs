//! The configuration object the out-of-scope CLI is contractually required
//! to hand the core: host directories, app identity, and an optional bearer
//! token. A plain `Default`-able struct, not a singleton — the hub client
//! and layout are constructed from it once per process and passed around
//! explicitly.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hub_client::HubClientConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub base_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hf_token: Option<String>,
    pub user_agent_app: String,
    pub user_agent_version: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            hf_token: None,
            user_agent_app: "lleme".to_string(),
            user_agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl HubConfig {
    /// Loads a config from a JSON file, falling back to `Default` if the
    /// file doesn't exist yet.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        crate::layout::atomic_write(path.as_ref(), content.as_bytes())
    }

    pub fn layout(&self) -> crate::layout::Layout {
        crate::layout::Layout::new(&self.base_dir)
    }

    pub fn hub_client_config(&self) -> HubClientConfig {
        HubClientConfig {
            base_url: "https://huggingface.co".to_string(),
            app_name: self.user_agent_app.clone(),
            app_version: self.user_agent_version.clone(),
            token: self.hf_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_current_dir() {
        let config = HubConfig::default();
        assert_eq!(config.base_dir, PathBuf::from("."));
        assert!(config.hf_token.is_none());
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.json");
        let mut config = HubConfig::default();
        config.hf_token = Some("secret".to_string());
        config.to_file(&path).unwrap();

        let loaded = HubConfig::from_file(&path).unwrap();
        assert_eq!(loaded.hf_token.as_deref(), Some("secret"));
    }

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::from_file(dir.path().join("nope.json")).unwrap();
        assert_eq!(config.user_agent_app, "lleme");
    }
}

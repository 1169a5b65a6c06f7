//! The peer-sharing half of the configuration object the out-of-scope CLI
//! hands in: whether sharing/advertisement is on, the port to serve on, and
//! any statically configured peers to probe alongside mDNS discovery.
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub enabled: bool,
    pub port: u16,
    pub advertise: bool,
    #[serde(default)]
    pub static_peers: Vec<SocketAddr>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8091,
            advertise: true,
            static_peers: Vec::new(),
        }
    }
}

impl PeerConfig {
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
        hub_core::atomic_write(path.as_ref(), content.as_bytes())?;
        Ok(())
    }
}

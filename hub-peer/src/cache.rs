//! Persisted peer directory: `"host:port" -> Peer`, with a 15-minute
//! freshness TTL.
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const FRESHNESS_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub version: String,
    pub last_seen: DateTime<Utc>,
}

impl Peer {
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.last_seen <= Duration::minutes(FRESHNESS_TTL_MINUTES)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerCache {
    peers: HashMap<String, Peer>,
}

impl PeerCache {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        hub_core::atomic_write(path, yaml.as_bytes())?;
        Ok(())
    }

    /// Merges freshly discovered peers into the cache: fresh entries win on
    /// key collision, and stale cache entries beyond the TTL are dropped.
    pub fn merge_fresh(&mut self, discovered: Vec<Peer>, now: DateTime<Utc>) {
        self.peers.retain(|_, p| p.is_fresh(now));
        for peer in discovered {
            self.peers.insert(peer.key(), peer);
        }
    }

    pub fn get_fresh(&self, now: DateTime<Utc>) -> Vec<Peer> {
        self.peers.values().filter(|p| p.is_fresh(now)).cloned().collect()
    }

    pub fn all(&self) -> Vec<Peer> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

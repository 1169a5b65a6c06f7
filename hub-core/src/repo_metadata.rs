//! Per-repo metadata: when each locally cached quant was downloaded and last used.
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layout::atomic_write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantUsage {
    pub downloaded_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    #[serde(default)]
    pub quants: HashMap<String, QuantUsage>,
}

impl RepoMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        atomic_write(path, yaml.as_bytes())
    }

    pub fn record_download(&mut self, quant: &str, at: DateTime<Utc>) {
        self.quants.insert(
            quant.to_string(),
            QuantUsage { downloaded_at: at, last_used: at },
        );
    }

    pub fn touch_used(&mut self, quant: &str, at: DateTime<Utc>) {
        if let Some(usage) = self.quants.get_mut(quant) {
            usage.last_used = at;
        }
    }
}

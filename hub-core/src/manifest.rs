//! The hub's manifest response for a `(repo, tag)`, and the saved-manifest
//! form persisted alongside a pulled artifact.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLfs {
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub rfilename: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lfs: Option<ManifestLfs>,
}

impl ManifestFile {
    /// Invariant (§3): when `lfs` is present, `lfs.size == size`.
    pub fn is_well_formed(&self) -> bool {
        match &self.lfs {
            Some(lfs) => lfs.size == self.size,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "ggufFile")]
    pub gguf_file: Option<ManifestFile>,
    #[serde(rename = "mmprojFile", default, skip_serializing_if = "Option::is_none")]
    pub mmproj_file: Option<ManifestFile>,
    #[serde(rename = "splitFiles", default, skip_serializing_if = "Vec::is_empty")]
    pub split_files: Vec<ManifestFile>,
}

impl Manifest {
    pub fn is_vision(&self) -> bool {
        self.mmproj_file.is_some()
    }

    pub fn is_split(&self) -> bool {
        !self.split_files.is_empty()
    }

    /// Total byte size across the gguf file, any split parts, and mmproj.
    pub fn total_size(&self) -> u64 {
        let gguf = self.gguf_file.as_ref().map(|f| f.size).unwrap_or(0);
        let splits: u64 = self.split_files.iter().map(|f| f.size).sum();
        let mmproj = self.mmproj_file.as_ref().map(|f| f.size).unwrap_or(0);
        gguf + splits + mmproj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips_through_json() {
        let m = Manifest {
            gguf_file: Some(ManifestFile {
                rfilename: "model-Q4_K_M.gguf".into(),
                size: 100,
                lfs: Some(ManifestLfs { sha256: "a".repeat(64), size: 100 }),
            }),
            mmproj_file: None,
            split_files: vec![],
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn well_formed_requires_matching_lfs_size() {
        let f = ManifestFile {
            rfilename: "x.gguf".into(),
            size: 10,
            lfs: Some(ManifestLfs { sha256: "a".repeat(64), size: 11 }),
        };
        assert!(!f.is_well_formed());
    }

    #[test]
    fn total_size_sums_all_parts() {
        let m = Manifest {
            gguf_file: Some(ManifestFile { rfilename: "a".into(), size: 10, lfs: None }),
            mmproj_file: Some(ManifestFile { rfilename: "b".into(), size: 5, lfs: None }),
            split_files: vec![ManifestFile { rfilename: "c".into(), size: 7, lfs: None }],
        };
        assert_eq!(m.total_size(), 22);
    }
}

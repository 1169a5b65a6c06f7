pub mod config;
pub mod download;
pub mod error;
pub mod filetree;
pub mod freshness;
pub mod gguf;
pub mod hub_client;
pub mod layout;
pub mod manifest;
pub mod progress;
pub mod pull;
pub mod quant;
pub mod repo_metadata;
pub mod split;
pub mod verify;

pub use config::HubConfig;
pub use error::{HubError, Result};
pub use filetree::{EntryType, Lfs, TreeEntry};
pub use freshness::{check_for_updates, check_for_updates_cancellable, Freshness};
pub use gguf::{read_header, GgufHeader};
pub use hub_client::{HubClient, HubClientConfig, SearchResult};
pub use layout::{atomic_write, sweep_partials, Layout};
pub use manifest::{Manifest, ManifestFile, ManifestLfs};
pub use progress::{PhaseAccumulator, Phase, ProgressEvent, PullProgressCallback};
pub use pull::{pull, PeerDownloader, PullOptions, PullResult};
pub use quant::{best_quantization, detect_quantizations, find_quantization, sort_quantizations, Quantization};
pub use repo_metadata::{QuantUsage, RepoMetadata};
pub use split::{parse_split_filename, split_filename, SplitInfo};
pub use verify::{hashes_match, sha256_file, verify_and_cleanup_on_mismatch};

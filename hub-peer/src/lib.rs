pub mod cache;
pub mod config;
pub mod discovery;
pub mod downloader;
pub mod error;
pub mod index;
pub mod server;

pub use cache::{Peer, PeerCache, FRESHNESS_TTL_MINUTES};
pub use config::PeerConfig;
pub use discovery::{
    advertise, discover_once, discover_peers_retrying, probe_static_peer, probe_static_peers,
    run_discovery_loop, SERVICE_TYPE,
};
pub use downloader::LanPeerDownloader;
pub use error::{PeerError, Result};
pub use index::{rebuild, PeerHashIndex, SharedIndex};
pub use server::{router, ServerState};

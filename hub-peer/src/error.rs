use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Hub(#[from] hub_core::HubError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    #[error("invalid sha256 in request: {0}")]
    InvalidHash(String),

    #[error("path escapes models directory: {0}")]
    PathEscape(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;

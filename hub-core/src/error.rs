use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("hub returned {status} for {url}: {body}")]
    HubStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("gguf parse error: {0}")]
    Gguf(String),

    #[error("invalid split filename: {0}")]
    Split(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, HubError>;

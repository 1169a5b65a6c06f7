//! The peer HTTP server: a single endpoint serving cached artifacts by
//! SHA-256 to other instances on the LAN.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::io::ReaderStream;

use hub_core::Layout;

use crate::error::PeerError;
use crate::index::SharedIndex;

#[derive(Clone)]
pub struct ServerState {
    pub index: SharedIndex,
    pub layout: Arc<Layout>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/api/peer/sha256/{hash}", get(serve_by_hash).head(serve_by_hash))
        .with_state(state)
}

fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// Resolves `..`/`.` components against the current directory without
/// touching the file system, so containment can be checked even for a file
/// that no longer exists (stale index entry, §7 "File missing at serve time"
/// must still fall through to a 404, not a 400 from a failed canonicalize).
fn normalize_lexically(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };
    let mut stack: Vec<std::path::Component> = Vec::new();
    for component in absolute.components() {
        match component {
            std::path::Component::ParentDir => {
                if matches!(stack.last(), Some(std::path::Component::Normal(_))) {
                    stack.pop();
                }
            }
            std::path::Component::CurDir => {}
            other => stack.push(other),
        }
    }
    stack.into_iter().collect()
}

/// Defense against a poisoned index: the resolved path must live strictly
/// under the models directory. Checked lexically, not via `canonicalize`,
/// so a since-deleted file is rejected here only if it was never under the
/// models directory in the first place — otherwise it falls through to the
/// metadata lookup below and reports 404.
fn path_is_contained(path: &Path, models_dir: &Path) -> bool {
    let path = normalize_lexically(path);
    let base = normalize_lexically(models_dir);
    path.starts_with(&base) && path != base
}

async fn serve_by_hash(
    method: Method,
    AxumPath(hash): AxumPath<String>,
    State(state): State<ServerState>,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let hash = hash.to_ascii_lowercase();
    if !is_valid_hash(&hash) {
        let err = PeerError::InvalidHash(hash);
        tracing::debug!(error = %err, "rejecting malformed sha256 in peer request");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let snapshot = state.index.snapshot();
    let Some(path) = snapshot.lookup(&hash).map(|p| p.to_path_buf()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if !path_is_contained(&path, &state.layout.models_dir()) {
        let err = PeerError::PathEscape(path.display().to_string());
        tracing::warn!(hash, error = %err, "rejecting peer index entry");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let Ok(metadata) = tokio::fs::metadata(&path).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, metadata.len().to_string().parse().unwrap());
    headers.insert(header::CONTENT_TYPE, "application/octet-stream".parse().unwrap());
    headers.insert(
        header::HeaderName::from_static("x-model-sha256"),
        hash.parse().unwrap(),
    );

    if method == Method::HEAD {
        return (StatusCode::OK, headers).into_response();
    }

    match tokio::fs::File::open(&path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PeerHashIndex;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state_with(dir: &Path, hash: &str, path: std::path::PathBuf) -> ServerState {
        let layout = Arc::new(Layout::new(dir));
        let mut map = std::collections::HashMap::new();
        if !hash.is_empty() {
            map.insert(hash.to_string(), path);
        }
        let index = PeerHashIndex::from_map(map);
        ServerState { index: SharedIndex::new(index), layout }
    }

    #[test]
    fn valid_hash_accepts_64_hex_chars() {
        assert!(is_valid_hash(&"a".repeat(64)));
        assert!(!is_valid_hash(&"a".repeat(63)));
        assert!(!is_valid_hash(&"z".repeat(64)));
    }

    #[tokio::test]
    async fn unknown_hash_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(dir.path(), "", std::path::PathBuf::new());
        let app = router(state);
        let req = Request::builder()
            .uri(format!("/api/peer/sha256/{}", "a".repeat(64)))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_hash_returns_400() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(dir.path(), "", std::path::PathBuf::new());
        let app = router(state);
        let req = Request::builder()
            .uri("/api/peer/sha256/not-a-hash")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn poisoned_index_entry_outside_models_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        let hash = "b".repeat(64);
        let state = state_with(dir.path(), &hash, std::path::PathBuf::from("/etc/passwd"));
        let app = router(state);
        let req = Request::builder()
            .uri(format!("/api/peer/sha256/{hash}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stale_index_entry_under_models_dir_returns_404_not_400() {
        // The entry is legitimately under models/ but the file was deleted
        // since the last rebuild; canonicalize-based containment would fail
        // to resolve it and wrongly return 400 instead of 404.
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        let hash = "d".repeat(64);
        let state = state_with(dir.path(), &hash, models.join("deleted.gguf"));
        let app = router(state);
        let req = Request::builder()
            .uri(format!("/api/peer/sha256/{hash}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn head_request_for_known_file_returns_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        let file_path = models.join("model.gguf");
        std::fs::write(&file_path, b"0123456789").unwrap();
        let hash = "c".repeat(64);
        let state = state_with(dir.path(), &hash, file_path);
        let app = router(state);
        let req = Request::builder()
            .method(Method::HEAD)
            .uri(format!("/api/peer/sha256/{hash}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_LENGTH).unwrap(),
            "10"
        );
    }
}

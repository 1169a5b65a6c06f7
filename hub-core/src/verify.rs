//! Streaming SHA-256 verification.
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// `(processed_bytes, total_bytes)`.
pub type VerifyProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

const CHUNK: usize = 32 * 1024;

/// Computes the lowercase hex SHA-256 of `path`, invoking `progress` as bytes
/// are consumed.
pub async fn sha256_file(path: &Path, progress: Option<VerifyProgressCallback>) -> Result<String> {
    let total = tokio::fs::metadata(path).await?.len();
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    let mut processed = 0u64;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        processed += n as u64;
        if let Some(cb) = &progress {
            cb(processed, total);
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Case-insensitive comparison; an empty `expected` short-circuits true (no
/// hash was available to check against).
pub fn hashes_match(expected: &str, actual: &str) -> bool {
    if expected.is_empty() {
        return true;
    }
    expected.eq_ignore_ascii_case(actual)
}

/// Verifies `path` against `expected_sha256`; deletes the file on mismatch.
pub async fn verify_and_cleanup_on_mismatch(path: &Path, expected_sha256: &str) -> Result<bool> {
    let actual = sha256_file(path, None).await?;
    let ok = hashes_match(expected_sha256, &actual);
    if !ok {
        let _ = tokio::fs::remove_file(path).await;
    }
    Ok(ok)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let bytes = bytes.as_ref();
        let mut s = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn computes_known_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        tokio::fs::write(&path, b"hello world").await.unwrap();
        let hash = sha256_file(&path, None).await.unwrap();
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn hash_compare_is_case_insensitive() {
        assert!(hashes_match("ABCDEF", "abcdef"));
        assert!(hashes_match("", "anything"));
        assert!(!hashes_match("abc", "def"));
    }

    #[tokio::test]
    async fn mismatch_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        tokio::fs::write(&path, b"data").await.unwrap();
        let ok = verify_and_cleanup_on_mismatch(&path, &"0".repeat(64)).await.unwrap();
        assert!(!ok);
        assert!(!path.exists());
    }
}

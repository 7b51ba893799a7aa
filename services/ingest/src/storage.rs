//! Write-once blob storage for uploaded spreadsheets on the local filesystem.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// `sha256:<hex>` digest of the uploaded bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct BlobStorage {
    dir: PathBuf,
}

impl BlobStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stores `bytes` as `<dir>/<file id><extension>` and returns the path.
    pub async fn save(&self, file_id: Uuid, extension: &str, bytes: &[u8]) -> std::io::Result<String> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(format!("{}{}", file_id, extension));
        fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "stored upload");

        Ok(path.to_string_lossy().to_string())
    }

    pub async fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        fs::read(path).await
    }

    /// Removes a stored blob. A missing file is not an error.
    pub async fn remove(&self, path: &str) {
        match fs::remove_file(path).await {
            Ok(()) => debug!(path, "removed stored upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path, error = %e, "could not remove stored upload"),
        }
    }
}

//! Storage backend existence checks.
//!
//! The control plane never moves bytes; it only asks whether the backing
//! file for a storage id is present. Clients transfer the bytes directly
//! using signed URLs.

use crate::{
    errors::{ServiceError, ServiceResult},
    services::{bounded, storage_id::storage_path},
};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::fs;

/// A byte store addressed by sharded path.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> ServiceResult<bool>;

    /// Short label for logs and readiness output.
    fn describe(&self) -> String;
}

/// Backing files on a local (or mounted) filesystem.
///
/// Layout:
/// ```text
/// {base_path}/
///   {id[0..2]}/
///     {id[2..4]}/
///       {id}
/// ```
pub struct LocalBackend {
    base_path: PathBuf,
}

impl LocalBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, path: &str) -> ServiceResult<PathBuf> {
        if path.is_empty() || path.starts_with('/') || path.contains("..") {
            return Err(ServiceError::Backend(format!("refusing path `{}`", path)));
        }
        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn exists(&self, path: &str) -> ServiceResult<bool> {
        let full = self.full_path(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ServiceError::Io(err)),
        }
    }

    fn describe(&self) -> String {
        format!("local:{}", self.base_path.display())
    }
}

/// Backing files behind the storage gateway, probed with `HEAD`.
///
/// The gateway must accept HEAD on `{base_url}/{path}` from the control
/// plane without a token.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ServiceError::Backend(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StorageBackend for HttpBackend {
    async fn exists(&self, path: &str) -> ServiceResult<bool> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.client.head(&url).send().await.map_err(|err| {
            if err.is_timeout() {
                ServiceError::Timeout("storage backend probe")
            } else {
                ServiceError::Backend(err.to_string())
            }
        })?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ServiceError::Backend(format!(
                "HEAD {} returned {}",
                url, status
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("http:{}", self.base_url)
    }
}

/// Existence checks keyed by storage id, with the call deadline applied.
#[derive(Clone)]
pub struct BackingFiles {
    backend: Arc<dyn StorageBackend>,
    timeout: Duration,
}

impl BackingFiles {
    pub fn new(backend: Arc<dyn StorageBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Whether the bytes for `storage_id` are present in the backend.
    pub async fn exists(&self, storage_id: &str) -> ServiceResult<bool> {
        let path = storage_path(storage_id);
        let present = bounded("storage backend probe", self.timeout, self.backend.exists(&path)).await?;
        tracing::debug!("backing file {} present: {}", path, present);
        Ok(present)
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_backend_reports_sharded_files() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path());
        let files = BackingFiles::new(Arc::new(LocalBackend::new(temp_dir.path())), Duration::from_secs(1));

        assert!(!files.exists("abcdef").await.unwrap());

        let shard = temp_dir.path().join("ab").join("cd");
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(shard.join("abcdef"), b"bytes").unwrap();

        assert!(files.exists("abcdef").await.unwrap());
        assert!(backend.exists("ab/cd/abcdef").await.unwrap());
        // directories are not backing files
        assert!(!backend.exists("ab/cd").await.unwrap());
    }

    #[tokio::test]
    async fn local_backend_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp_dir.path());
        assert!(matches!(
            backend.exists("../etc/passwd").await,
            Err(ServiceError::Backend(_))
        ));
        assert!(backend.exists("/etc/passwd").await.is_err());
    }
}

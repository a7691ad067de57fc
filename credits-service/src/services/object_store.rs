//! Object store contract and a filesystem implementation with signed URLs.

use crate::services::CreditError;
use async_trait::async_trait;
use chrono::Utc;
use service_core::utils::{sign_object_path, verify_object_path};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), CreditError>;

    async fn delete_object(&self, path: &str) -> Result<(), CreditError>;

    /// URL granting read access to `path` for `ttl_seconds`.
    async fn signed_url(&self, path: &str, ttl_seconds: u64) -> Result<String, CreditError>;
}

/// Objects under a local directory, served back through `GET /objects/*path`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
    signing_secret: String,
}

impl LocalObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
        }
    }

    /// Resolve an object path under the root, refusing traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf, CreditError> {
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !clean {
            return Err(CreditError::InvalidInput(format!(
                "Invalid object path '{}'",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Check a signed link at the current time.
    pub fn verify(&self, path: &str, expires_at: i64, signature: &str) -> bool {
        verify_object_path(
            &self.signing_secret,
            path,
            expires_at,
            Utc::now().timestamp(),
            signature,
        )
        .unwrap_or(false)
    }

    /// Read an object. `Ok(None)` if it does not exist.
    #[instrument(skip(self))]
    pub async fn read_object(&self, path: &str) -> Result<Option<Vec<u8>>, CreditError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CreditError::storage("Failed to read object", e)),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn put_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), CreditError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CreditError::storage("Failed to create object directory", e))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| CreditError::storage("Failed to write object", e))?;
        debug!(content_type = content_type, "Object stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, path: &str) -> Result<(), CreditError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            // Already gone is the desired end state.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CreditError::storage("Failed to delete object", e)),
        }
    }

    #[instrument(skip(self))]
    async fn signed_url(&self, path: &str, ttl_seconds: u64) -> Result<String, CreditError> {
        self.resolve(path)?;
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl);
        let signature = sign_object_path(&self.signing_secret, path, expires_at)
            .map_err(|e| CreditError::storage("Failed to sign object URL", e))?;
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.public_base_url, path, expires_at, signature
        ))
    }
}

/// Content type for a stored object, from its extension.
pub fn content_type_for_path(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("webm") => "audio/webm",
        Some("flac") => "audio/flac",
        Some("aac") => "audio/aac",
        _ => "application/octet-stream",
    }
}

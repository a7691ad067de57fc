//! Audio upload/delete with storage-quota bookkeeping.

use crate::models::Tenant;
use crate::services::{CreditError, CreditStore, ObjectStore, StorageQuotaGuard};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const BYTES_PER_MB: i64 = 1_048_576;

/// Size in MB, rounded to 6 decimals.
pub fn bytes_to_mb(len: usize) -> Decimal {
    (Decimal::from(len as u64) / Decimal::from(BYTES_PER_MB))
        .round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero)
}

fn extension_for(file_name: Option<&str>, content_type: &str) -> String {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());
    if let Some(ext) = from_name {
        return ext;
    }

    let subtype = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches("audio/");
    match subtype {
        "mpeg" | "mp3" => "mp3",
        "wav" | "x-wav" | "wave" => "wav",
        "mp4" | "x-m4a" | "m4a" => "m4a",
        "ogg" => "ogg",
        "webm" => "webm",
        "flac" => "flac",
        "aac" => "aac",
        _ => "audio",
    }
    .to_string()
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedAudio {
    pub url: String,
    pub storage_path: String,
    pub file_size_mb: Decimal,
}

#[derive(Clone)]
pub struct AudioService {
    store: Arc<dyn CreditStore>,
    objects: Arc<dyn ObjectStore>,
    quota: StorageQuotaGuard,
    signed_url_ttl_seconds: u64,
}

impl AudioService {
    pub fn new(
        store: Arc<dyn CreditStore>,
        objects: Arc<dyn ObjectStore>,
        signed_url_ttl_seconds: u64,
    ) -> Self {
        Self {
            quota: StorageQuotaGuard::new(store.clone()),
            store,
            objects,
            signed_url_ttl_seconds,
        }
    }

    /// Reserve quota, store the object, then record it on the session.
    ///
    /// A failed object write releases the reservation. Losing the session to a
    /// concurrent upload removes the object, releases the reservation and
    /// returns `AudioAlreadyAttached`. Any other failed session update after
    /// the write is logged and does not fail the upload.
    #[instrument(
        skip(self, tenant, bytes),
        fields(tenant_id = %tenant.tenant_id, session_id = %session_id, size_bytes = bytes.len())
    )]
    pub async fn upload_audio(
        &self,
        tenant: &Tenant,
        session_id: Uuid,
        file_name: Option<&str>,
        content_type: &str,
        bytes: Vec<u8>,
        duration_seconds: Option<i32>,
    ) -> Result<UploadedAudio, CreditError> {
        if !content_type.trim().starts_with("audio/") {
            return Err(CreditError::InvalidInput(format!(
                "Only audio files can be uploaded, got content type '{}'",
                content_type
            )));
        }
        if bytes.is_empty() {
            return Err(CreditError::InvalidInput("Audio file is empty".to_string()));
        }
        if duration_seconds.is_some_and(|s| s <= 0) {
            return Err(CreditError::InvalidInput(
                "Audio duration must be positive".to_string(),
            ));
        }

        let session = self
            .store
            .get_session(tenant.tenant_id, session_id)
            .await?
            .ok_or(CreditError::SessionNotFound)?;
        if session.audio_storage_path.is_some() {
            return Err(CreditError::AudioAlreadyAttached);
        }

        let file_size_mb = bytes_to_mb(bytes.len());
        let storage_path = format!(
            "{}/{}/{}.{}",
            tenant.external_user_id,
            session_id,
            Utc::now().timestamp_millis(),
            extension_for(file_name, content_type)
        );

        self.quota
            .reserve_on_upload(tenant.tenant_id, file_size_mb)
            .await?;

        if let Err(e) = self
            .objects
            .put_object(&storage_path, bytes, content_type)
            .await
        {
            if let Err(release_err) = self
                .quota
                .release_on_delete(tenant.tenant_id, file_size_mb)
                .await
            {
                error!(
                    error = %release_err,
                    file_size_mb = %file_size_mb,
                    "Failed to release storage after failed upload"
                );
            }
            return Err(e);
        }

        match self
            .store
            .attach_audio(
                tenant.tenant_id,
                session_id,
                &storage_path,
                file_size_mb,
                duration_seconds,
            )
            .await
        {
            Ok(()) => {}
            Err(CreditError::AudioAlreadyAttached) => {
                warn!(storage_path = %storage_path, "Concurrent upload won the session; rolling back");
                self.discard_upload(tenant, &storage_path, file_size_mb).await;
                return Err(CreditError::AudioAlreadyAttached);
            }
            Err(e) => {
                warn!(error = %e, storage_path = %storage_path, "Failed to record audio on session");
            }
        }

        let url = self
            .objects
            .signed_url(&storage_path, self.signed_url_ttl_seconds)
            .await?;

        info!(storage_path = %storage_path, file_size_mb = %file_size_mb, "Audio uploaded");

        Ok(UploadedAudio {
            url,
            storage_path,
            file_size_mb,
        })
    }

    async fn discard_upload(&self, tenant: &Tenant, storage_path: &str, file_size_mb: Decimal) {
        if let Err(e) = self.objects.delete_object(storage_path).await {
            error!(error = %e, storage_path = %storage_path, "Failed to remove discarded upload");
        }
        if let Err(e) = self
            .quota
            .release_on_delete(tenant.tenant_id, file_size_mb)
            .await
        {
            error!(
                error = %e,
                file_size_mb = %file_size_mb,
                "Failed to release storage for discarded upload"
            );
        }
    }

    /// Delete the object, then release quota and clear the session fields.
    ///
    /// Returns the MB released. Only the object delete is fatal.
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.tenant_id, session_id = %session_id))]
    pub async fn delete_audio(&self, tenant: &Tenant, session_id: Uuid) -> Result<Decimal, CreditError> {
        let session = self
            .store
            .get_session(tenant.tenant_id, session_id)
            .await?
            .ok_or(CreditError::SessionNotFound)?;
        let storage_path = session
            .audio_storage_path
            .ok_or_else(|| CreditError::InvalidInput("Session has no audio".to_string()))?;
        let file_size_mb = session.audio_size_mb.unwrap_or_default();

        self.objects.delete_object(&storage_path).await?;

        if let Err(e) = self
            .quota
            .release_on_delete(tenant.tenant_id, file_size_mb)
            .await
        {
            warn!(error = %e, file_size_mb = %file_size_mb, "Failed to release storage after delete");
        }

        if let Err(e) = self.store.detach_audio(tenant.tenant_id, session_id).await {
            warn!(error = %e, "Failed to clear audio from session");
        }

        info!(storage_path = %storage_path, file_size_mb = %file_size_mb, "Audio deleted");
        Ok(file_size_mb)
    }

    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.tenant_id, session_id = %session_id))]
    pub async fn signed_audio_url(&self, tenant: &Tenant, session_id: Uuid) -> Result<String, CreditError> {
        let session = self
            .store
            .get_session(tenant.tenant_id, session_id)
            .await?
            .ok_or(CreditError::SessionNotFound)?;
        let storage_path = session
            .audio_storage_path
            .ok_or_else(|| CreditError::InvalidInput("Session has no audio".to_string()))?;

        self.objects
            .signed_url(&storage_path, self.signed_url_ttl_seconds)
            .await
    }
}

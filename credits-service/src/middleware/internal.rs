use crate::config::InternalCallerConfig;
use axum::async_trait;
use service_core::error::AppError;
use service_core::middleware::signature::{SignatureStore, SIGNATURE_WINDOW_SECONDS};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Known service callers and the nonces they have spent.
///
/// Nonces are kept for twice the signature window. Anything older would be
/// rejected on its timestamp before the nonce is consulted.
#[derive(Clone)]
pub struct InternalCallers {
    secrets: Arc<HashMap<String, String>>,
    seen_nonces: Arc<Mutex<HashMap<String, i64>>>,
}

impl InternalCallers {
    pub fn new(callers: impl IntoIterator<Item = InternalCallerConfig>) -> Self {
        let secrets = callers
            .into_iter()
            .map(|c| (c.client_id, c.signing_secret))
            .collect();

        Self {
            secrets: Arc::new(secrets),
            seen_nonces: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl SignatureStore for InternalCallers {
    async fn validate_nonce(&self, nonce: &str, timestamp: i64) -> Result<bool, AppError> {
        let now = chrono::Utc::now().timestamp();
        let mut seen = self.seen_nonces.lock().await;

        seen.retain(|_, ts| now - *ts <= 2 * SIGNATURE_WINDOW_SECONDS);

        if seen.contains_key(nonce) {
            tracing::warn!(nonce = %nonce, "Replayed internal request nonce");
            return Ok(false);
        }

        seen.insert(nonce.to_string(), timestamp);
        Ok(true)
    }

    async fn get_signing_secret(&self, client_id: &str) -> Result<Option<String>, AppError> {
        Ok(self.secrets.get(client_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callers() -> InternalCallers {
        InternalCallers::new([InternalCallerConfig {
            client_id: "billing".to_string(),
            signing_secret: "billing-secret".to_string(),
        }])
    }

    #[tokio::test]
    async fn nonce_is_single_use() {
        let callers = callers();
        let now = chrono::Utc::now().timestamp();

        assert!(callers.validate_nonce("n-1", now).await.unwrap());
        assert!(!callers.validate_nonce("n-1", now).await.unwrap());
        assert!(callers.validate_nonce("n-2", now).await.unwrap());
    }

    #[tokio::test]
    async fn expired_nonces_are_pruned() {
        let callers = callers();
        let old = chrono::Utc::now().timestamp() - 3 * SIGNATURE_WINDOW_SECONDS;

        assert!(callers.validate_nonce("n-1", old).await.unwrap());
        assert!(callers.seen_nonces.lock().await.contains_key("n-1"));

        let now = chrono::Utc::now().timestamp();
        assert!(callers.validate_nonce("n-2", now).await.unwrap());
        assert!(!callers.seen_nonces.lock().await.contains_key("n-1"));
    }

    #[tokio::test]
    async fn only_configured_clients_have_secrets() {
        let callers = callers();

        assert_eq!(
            callers.get_signing_secret("billing").await.unwrap().as_deref(),
            Some("billing-secret")
        );
        assert_eq!(callers.get_signing_secret("stranger").await.unwrap(), None);
    }
}

//! JSON-over-HTTP provider.

use super::{ProviderError, TranscriptionProvider};
use crate::models::{ConversationMetrics, SessionInsights};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::time::Duration;

/// HTTP provider configuration.
#[derive(Debug, Clone)]
pub struct HttpTranscriptionProviderConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

/// Talks to a worker exposing `/transcribe`, `/analyze`, `/metrics` and `/health`.
pub struct HttpTranscriptionProvider {
    config: HttpTranscriptionProviderConfig,
    client: Client,
}

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    audio_url: &'a str,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    transcription: String,
}

#[derive(Serialize)]
struct TranscriptRequest<'a> {
    transcript: &'a str,
}

impl HttpTranscriptionProvider {
    pub fn new(config: HttpTranscriptionProviderConfig) -> Result<Self, ProviderError> {
        if config.endpoint.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Transcription endpoint not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), method)
    }

    async fn post<B, R>(&self, method: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.url(method);

        tracing::debug!(url = %url, "Sending request to transcription provider");

        let response = self
            .client
            .traced_post(&url)
            .json(body)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "Provider error {} on {}: {}",
                status, method, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl TranscriptionProvider for HttpTranscriptionProvider {
    async fn transcribe(&self, audio_url: &str) -> Result<String, ProviderError> {
        let response: TranscribeResponse = self
            .post("transcribe", &TranscribeRequest { audio_url })
            .await?;
        Ok(response.transcription)
    }

    async fn analyze(&self, transcript: &str) -> Result<SessionInsights, ProviderError> {
        self.post("analyze", &TranscriptRequest { transcript }).await
    }

    async fn conversation_metrics(
        &self,
        transcript: &str,
    ) -> Result<ConversationMetrics, ProviderError> {
        self.post("metrics", &TranscriptRequest { transcript }).await
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .traced_get(&self.url("health"))
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::ApiError(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_endpoint_is_not_configured() {
        let result = HttpTranscriptionProvider::new(HttpTranscriptionProviderConfig {
            endpoint: String::new(),
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn urls_join_without_double_slash() {
        let provider = HttpTranscriptionProvider::new(HttpTranscriptionProviderConfig {
            endpoint: "http://worker:9000/".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(provider.url("transcribe"), "http://worker:9000/transcribe");
    }
}

//! Transcription and analysis providers.
//!
//! The workflow only needs three request/response calls, so any backend
//! (hosted model, local worker, mock) fits behind the same trait.

pub mod http;
pub mod mock;

pub use http::{HttpTranscriptionProvider, HttpTranscriptionProviderConfig};
pub use mock::MockTranscriptionProvider;

use crate::models::{ConversationMetrics, SessionInsights};
use async_trait::async_trait;
use thiserror::Error;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),
}

#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Convert the audio behind `audio_url` to text.
    async fn transcribe(&self, audio_url: &str) -> Result<String, ProviderError>;

    /// Structured insights from a transcript.
    async fn analyze(&self, transcript: &str) -> Result<SessionInsights, ProviderError>;

    /// Per-speaker time and response intensity.
    async fn conversation_metrics(
        &self,
        transcript: &str,
    ) -> Result<ConversationMetrics, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;
}

//! Mock provider for testing and local runs.

use super::{ProviderError, TranscriptionProvider};
use crate::models::{ConversationMetrics, SessionInsights, SpeakerIntensity, SpeakerTime};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Deterministic provider. Can be switched to fail every call.
#[derive(Default)]
pub struct MockTranscriptionProvider {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockTranscriptionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let provider = Self::default();
        provider.set_failing(true);
        provider
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::ApiError(
                "Mock provider configured to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TranscriptionProvider for MockTranscriptionProvider {
    async fn transcribe(&self, audio_url: &str) -> Result<String, ProviderError> {
        self.enter()?;
        let name = audio_url
            .split('?')
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or("audio");
        Ok(format!(
            "Therapist: How have you been since our last session?\n\
             Client: Better, mostly. ({})",
            name
        ))
    }

    async fn analyze(&self, transcript: &str) -> Result<SessionInsights, ProviderError> {
        self.enter()?;
        Ok(SessionInsights {
            summary: format!("Mock summary of {} characters", transcript.len()),
            key_discussion_points: "Progress since last session".to_string(),
            emotional_cues: "Calm".to_string(),
            potential_key_metrics: "Self-reported improvement".to_string(),
        })
    }

    async fn conversation_metrics(
        &self,
        _transcript: &str,
    ) -> Result<ConversationMetrics, ProviderError> {
        self.enter()?;
        Ok(ConversationMetrics {
            speaker_time: vec![
                SpeakerTime {
                    speaker: "Therapist".to_string(),
                    time: 240.0,
                },
                SpeakerTime {
                    speaker: "Client".to_string(),
                    time: 360.0,
                },
            ],
            response_intensity: vec![
                SpeakerIntensity {
                    speaker: "Therapist".to_string(),
                    intensity: 4.0,
                },
                SpeakerIntensity {
                    speaker: "Client".to_string(),
                    intensity: 6.0,
                },
            ],
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ProviderError::NotConfigured(
                "Mock provider configured to fail".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

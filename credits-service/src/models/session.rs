//! Patient and session records, reduced to the fields the quota guards and
//! the transcription workflow touch.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// A patient. Inactive patients do not count against the plan ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// AI processing state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown processing status: {}", other)),
        }
    }
}

/// A therapy session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub session_date: NaiveDate,
    pub duration_minutes: i32,
    pub audio_storage_path: Option<String>,
    pub audio_size_mb: Option<Decimal>,
    pub audio_duration_seconds: Option<i32>,
    pub credits_consumed: i64,
    pub ai_processing_status: ProcessingStatus,
    pub ai_processed_utc: Option<DateTime<Utc>>,
    pub ai_error: Option<String>,
    pub transcription: Option<String>,
    pub analysis: Option<SessionInsights>,
    pub metrics: Option<ConversationMetrics>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Session {
    /// Minutes used to price AI processing: the recorded audio length when
    /// known, otherwise the scheduled session length.
    pub fn billable_minutes(&self) -> f64 {
        match self.audio_duration_seconds {
            Some(seconds) if seconds > 0 => f64::from(seconds) / 60.0,
            _ => f64::from(self.duration_minutes),
        }
    }
}

/// Input for creating a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub session_date: NaiveDate,
    pub duration_minutes: i32,
}

impl NewSession {
    pub fn into_session(self, now: DateTime<Utc>) -> Session {
        Session {
            session_id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            patient_id: self.patient_id,
            session_date: self.session_date,
            duration_minutes: self.duration_minutes,
            audio_storage_path: None,
            audio_size_mb: None,
            audio_duration_seconds: None,
            credits_consumed: 0,
            ai_processing_status: ProcessingStatus::Pending,
            ai_processed_utc: None,
            ai_error: None,
            transcription: None,
            analysis: None,
            metrics: None,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Structured insights produced from a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInsights {
    pub summary: String,
    pub key_discussion_points: String,
    pub emotional_cues: String,
    pub potential_key_metrics: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTime {
    pub speaker: String,
    /// Seconds.
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerIntensity {
    pub speaker: String,
    pub intensity: f64,
}

/// Per-speaker conversation statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetrics {
    pub speaker_time: Vec<SpeakerTime>,
    pub response_intensity: Vec<SpeakerIntensity>,
}

/// Everything persisted after a successful processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub transcription: String,
    pub analysis: SessionInsights,
    pub metrics: ConversationMetrics,
}

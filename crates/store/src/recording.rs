//! Recording metadata and the loaded-recording shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orchid_domain::Signal;

/// Lifecycle of a recording. Finalization is terminal — once
/// finalized, contents are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Open,
    Finalized,
}

/// Metadata for one persisted recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMeta {
    pub recording_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,
    pub status: RecordingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl RecordingMeta {
    pub fn is_open(&self) -> bool {
        self.status == RecordingStatus::Open
    }
}

/// A fully loaded recording: metadata plus the ordered signal log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub meta: RecordingMeta,
    pub signals: Vec<Signal>,
}

/// Parameters for opening a new recording.
#[derive(Debug, Clone, Default)]
pub struct NewRecording {
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub provider_type: Option<String>,
}

impl NewRecording {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_provider_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = Some(provider_type.into());
        self
    }
}

/// Listing filter: any set field must match.
#[derive(Debug, Clone, Default)]
pub struct RecordingFilter {
    /// Exact name match.
    pub name: Option<String>,
    /// Recording must carry this tag.
    pub tag: Option<String>,
    /// Exact provider-type match.
    pub provider_type: Option<String>,
}

impl RecordingFilter {
    pub fn matches(&self, meta: &RecordingMeta) -> bool {
        if let Some(name) = &self.name {
            if meta.name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !meta.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(pt) = &self.provider_type {
            if meta.provider_type.as_deref() != Some(pt.as_str()) {
                return false;
            }
        }
        true
    }
}

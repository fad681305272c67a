//! Structured trace events emitted across all Orchid crates.

use serde::Serialize;

/// Kernel-internal observability events. These ride on `tracing`, not
/// the hub — they describe the kernel itself, not workflow progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RecordingCreated {
        recording_id: String,
        name: Option<String>,
    },
    RecordingFinalized {
        recording_id: String,
        signals: usize,
        duration_ms: Option<u64>,
    },
    RecordingForked {
        source_id: String,
        new_id: String,
        copied: usize,
    },
    RecordingAppendFailed {
        recording_id: String,
        error: String,
    },
    ReplayLookup {
        hash: String,
        exact: bool,
        found: bool,
    },
    SessionCreated {
        session_id: String,
        interactive: bool,
    },
    SessionStatus {
        session_id: String,
        status: String,
    },
    ListenerPanicked {
        subscription: u64,
        signal: String,
    },
    PromptOpened {
        session_id: String,
        prompt_id: String,
    },
    PromptResolved {
        prompt_id: String,
        outcome: String,
    },
    AttachmentCleanup {
        session_id: String,
        cleanups: usize,
    },
    RenderSkipped {
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "orchid_event");
    }
}

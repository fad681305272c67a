//! The signal envelope — the unit of observation.
//!
//! Emitters hand the hub an [`Event`] (name + payload + optional
//! attribution). The hub enriches it into a [`Signal`] by assigning the
//! session-monotonic id, the timestamp, and the propagated
//! [`EventContext`]. Observers, the store, and the wire all see `Signal`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::EventContext;

/// Opaque signal identifier, monotonically assigned within a session.
pub type SignalId = u64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Source attribution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Optional attribution of where a signal originated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reducer: Option<String>,
    /// Id of a parent signal when this one was produced on its behalf.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<SignalId>,
}

impl Source {
    /// Attribution for a provider run.
    pub fn provider(name: impl Into<String>) -> Self {
        Self {
            provider: Some(name.into()),
            ..Self::default()
        }
    }

    /// Attribution for an agent.
    pub fn agent(name: impl Into<String>) -> Self {
        Self {
            agent: Some(name.into()),
            ..Self::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Display hints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a renderer should treat a signal. Hints are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayKind {
    Status,
    Progress,
    Notification,
    Stream,
    Log,
}

/// Renderer status accompanying [`DisplayKind::Status`] and
/// [`DisplayKind::Notification`] hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    Active,
    Success,
    Error,
}

/// Advisory render hints carried on a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayHint {
    #[serde(rename = "type")]
    pub kind: DisplayKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DisplayStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Progress in `[0, 1]` for [`DisplayKind::Progress`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// When `true`, renderers append rather than replace.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub append: bool,
}

impl DisplayHint {
    pub fn new(kind: DisplayKind) -> Self {
        Self {
            kind,
            status: None,
            title: None,
            subtitle: None,
            icon: None,
            progress: None,
            append: false,
        }
    }

    /// Infer a hint from the last name segment when none was attached.
    ///
    /// `:start` → status/active, `:complete` → notification/success,
    /// `:error` → notification/error, `:delta` → stream/append,
    /// `:progress` → progress, anything else → log.
    pub fn infer(name: &str) -> Self {
        let last = name.rsplit(':').next().unwrap_or(name);
        match last {
            "start" => Self {
                status: Some(DisplayStatus::Active),
                ..Self::new(DisplayKind::Status)
            },
            "complete" => Self {
                status: Some(DisplayStatus::Success),
                ..Self::new(DisplayKind::Notification)
            },
            "error" => Self {
                status: Some(DisplayStatus::Error),
                ..Self::new(DisplayKind::Notification)
            },
            "delta" => Self {
                append: true,
                ..Self::new(DisplayKind::Stream)
            },
            "progress" => Self::new(DisplayKind::Progress),
            _ => Self::new(DisplayKind::Log),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event — the emitter side
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What an emitter hands to the hub: name + payload + optional
/// attribution. Enrichment (id, timestamp, context) happens on emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Dotted/colon-separated name, e.g. `task:complete`.
    pub name: String,
    /// Arbitrary structured payload.
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<SignalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayHint>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            source: None,
            caused_by: None,
            display: None,
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn caused_by(mut self, id: SignalId) -> Self {
        self.caused_by = Some(id);
        self
    }

    pub fn with_display(mut self, display: DisplayHint) -> Self {
        self.display = Some(display);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signal — the enriched envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An enriched event: what subscribers, the store, and the wire see.
///
/// Invariants: `id` is unique within a recording; `timestamp` is
/// monotonically non-decreasing within one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: SignalId,
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: EventContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<SignalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayHint>,
}

impl Signal {
    /// The attached display hint, or one inferred from the name.
    pub fn display_hint(&self) -> DisplayHint {
        self.display
            .clone()
            .unwrap_or_else(|| DisplayHint::infer(&self.name))
    }

    /// Strip enrichment back to the emitter-side event. Used by replay,
    /// which re-emits recorded payloads through a live hub.
    pub fn to_event(&self) -> Event {
        Event {
            name: self.name.clone(),
            payload: self.payload.clone(),
            source: self.source.clone(),
            caused_by: self.caused_by,
            display: self.display.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

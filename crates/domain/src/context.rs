//! Event context — the scoping frame propagated across async boundaries.
//!
//! A context is pushed by `Hub::scoped` and inherited by every emission
//! inside the scope unless overridden per-emit. Merging is shallow:
//! fields present in the overlay win, everything else is inherited.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Phase reference carried in context while a `phase(...)` block runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRef {
    pub name: String,
    pub number: u32,
}

/// Task reference carried in context while a `task(...)` block runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub id: String,
}

/// Agent reference carried in context while an agent executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    pub name: String,
}

/// Scoping frame attached to every enriched signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentRef>,
    /// Free-form extension keys.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl EventContext {
    /// Minimal context: just the session id.
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_phase(mut self, name: impl Into<String>, number: u32) -> Self {
        self.phase = Some(PhaseRef {
            name: name.into(),
            number,
        });
        self
    }

    pub fn with_task(mut self, id: impl Into<String>) -> Self {
        self.task = Some(TaskRef { id: id.into() });
        self
    }

    pub fn with_agent(mut self, name: impl Into<String>) -> Self {
        self.agent = Some(AgentRef { name: name.into() });
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Shallow merge: overlay fields win, absent fields inherit.
    /// Extension keys are unioned with the overlay taking precedence.
    pub fn merge(&self, overlay: &EventContext) -> EventContext {
        let mut extensions = self.extensions.clone();
        for (k, v) in &overlay.extensions {
            extensions.insert(k.clone(), v.clone());
        }
        EventContext {
            session_id: overlay.session_id.clone().or_else(|| self.session_id.clone()),
            phase: overlay.phase.clone().or_else(|| self.phase.clone()),
            task: overlay.task.clone().or_else(|| self.task.clone()),
            agent: overlay.agent.clone().or_else(|| self.agent.clone()),
            extensions,
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none()
            && self.phase.is_none()
            && self.task.is_none()
            && self.agent.is_none()
            && self.extensions.is_empty()
    }
}

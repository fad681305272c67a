//! Well-known signal payloads.
//!
//! Payloads are free-form on the envelope; this module gives the
//! kernel's own signal vocabulary typed shapes plus a catch-all
//! extension variant. Dispatch boundaries use [`KnownPayload::parse`]
//! to validate well-known names — an unknown name is fine (extension),
//! a known name with a malformed payload is not.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ProviderResult;
use crate::signal::SignalId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStart {
    pub name: String,
    pub phase_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseComplete {
    pub name: String,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseFailed {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStart {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskComplete {
    pub id: String,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailed {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDelta {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextComplete {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_use_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_use_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProgress {
    pub tool_use_id: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStart {
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPrompt {
    pub prompt_id: String,
    pub prompt: String,
    #[serde(default)]
    pub choices: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReply {
    pub prompt_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub content: String,
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryBackoff {
    pub name: String,
    pub attempt: u32,
    /// Milliseconds.
    pub delay: u64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelItemComplete {
    pub name: String,
    pub index: usize,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessComplete {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// A parsed well-known payload, or the extension catch-all.
#[derive(Debug, Clone, PartialEq)]
pub enum KnownPayload {
    PhaseStart(PhaseStart),
    PhaseComplete(PhaseComplete),
    PhaseFailed(PhaseFailed),
    TaskStart(TaskStart),
    TaskComplete(TaskComplete),
    TaskFailed(TaskFailed),
    TextDelta(TextDelta),
    TextComplete(TextComplete),
    ThinkingDelta(TextDelta),
    ThinkingComplete(TextComplete),
    ToolCall(ToolCall),
    ToolProgress(ToolProgress),
    ToolResult(ToolResult),
    ProviderStart(ProviderStart),
    ProviderEnd(ProviderResult),
    SessionPrompt(SessionPrompt),
    SessionReply(SessionReply),
    SessionMessage(SessionMessage),
    RetryBackoff(RetryBackoff),
    ParallelItemComplete(ParallelItemComplete),
    HarnessComplete(HarnessComplete),
    /// Any signal outside the kernel vocabulary.
    Extension(Value),
}

/// A known signal name carrying a payload that does not parse.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedPayload {
    pub name: String,
    pub error: String,
}

impl KnownPayload {
    /// Parse a payload by signal name. Unknown names come back as
    /// `Extension`; known names with malformed payloads are errors.
    pub fn parse(name: &str, payload: &Value) -> std::result::Result<Self, MalformedPayload> {
        fn typed<T, F>(
            name: &str,
            payload: &Value,
            wrap: F,
        ) -> std::result::Result<KnownPayload, MalformedPayload>
        where
            T: for<'de> Deserialize<'de>,
            F: FnOnce(T) -> KnownPayload,
        {
            serde_json::from_value::<T>(payload.clone())
                .map(wrap)
                .map_err(|e| MalformedPayload {
                    name: name.to_owned(),
                    error: e.to_string(),
                })
        }

        match name {
            "phase:start" => typed(name, payload, KnownPayload::PhaseStart),
            "phase:complete" => typed(name, payload, KnownPayload::PhaseComplete),
            "phase:failed" => typed(name, payload, KnownPayload::PhaseFailed),
            "task:start" => typed(name, payload, KnownPayload::TaskStart),
            "task:complete" => typed(name, payload, KnownPayload::TaskComplete),
            "task:failed" => typed(name, payload, KnownPayload::TaskFailed),
            "text:delta" => typed(name, payload, KnownPayload::TextDelta),
            "text:complete" => typed(name, payload, KnownPayload::TextComplete),
            "thinking:delta" => typed(name, payload, KnownPayload::ThinkingDelta),
            "thinking:complete" => typed(name, payload, KnownPayload::ThinkingComplete),
            "tool:call" => typed(name, payload, KnownPayload::ToolCall),
            "tool:progress" => typed(name, payload, KnownPayload::ToolProgress),
            "tool:result" => typed(name, payload, KnownPayload::ToolResult),
            "provider:start" => typed(name, payload, KnownPayload::ProviderStart),
            "provider:end" => typed(name, payload, KnownPayload::ProviderEnd),
            "session:prompt" => typed(name, payload, KnownPayload::SessionPrompt),
            "session:reply" => typed(name, payload, KnownPayload::SessionReply),
            "session:message" => typed(name, payload, KnownPayload::SessionMessage),
            "retry:backoff" => typed(name, payload, KnownPayload::RetryBackoff),
            "parallel:item:complete" => {
                typed(name, payload, KnownPayload::ParallelItemComplete)
            }
            "harness:complete" => typed(name, payload, KnownPayload::HarnessComplete),
            _ => Ok(KnownPayload::Extension(payload.clone())),
        }
    }
}

/// Correlation helper: the reply's `caused_by` must reference an
/// earlier signal id.
pub fn causality_holds(caused_by: Option<SignalId>, own_id: SignalId) -> bool {
    caused_by.map_or(true, |cause| cause < own_id)
}

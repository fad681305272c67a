//! Provider-agnostic request/result shapes.
//!
//! These are data-model types (the recorder fingerprints requests and
//! persists results); the streaming machinery itself lives in
//! `orchid-providers`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::TokenUsage;

/// A provider-agnostic run request. The fingerprint is computed over
/// `(prompt, options, output_schema, tools)` — the `provider` name is
/// attribution, not identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    /// Provider name, e.g. `"anthropic"` or `"scripted"`.
    pub provider: String,
    /// The prompt: a plain string or a structured message list.
    pub prompt: Value,
    /// Provider options (model, temperature, ...). Volatile keys are
    /// excluded from the fingerprint.
    #[serde(default)]
    pub options: Value,
    /// Optional output schema the caller expects the run to satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Optional tool definitions available to the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
}

impl ProviderRequest {
    pub fn new(provider: impl Into<String>, prompt: impl Into<Value>) -> Self {
        Self {
            provider: provider.into(),
            prompt: prompt.into(),
            options: Value::Null,
            output_schema: None,
            tools: None,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: Value) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Aggregate result of a provider run; also the `provider:end` payload
/// (`{ durationMs, output, usage?, costUsd?, aborted? }` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub duration_ms: u64,
    /// The final aggregate output (full text, structured object, ...).
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Set when the run ended via cooperative cancellation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub aborted: bool,
}

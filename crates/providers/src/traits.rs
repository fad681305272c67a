//! The provider contract.
//!
//! A provider turns a [`ProviderRequest`] into a heterogeneous message
//! stream. The adapter (see [`crate::adapter`]) is what normalizes that
//! stream into the kernel's framed signal sequence — provider
//! implementations never talk to the hub directly.

use std::pin::Pin;

use serde_json::Value;

use orchid_domain::{ProviderRequest, Result, TokenUsage};

/// A boxed async stream of provider messages.
pub type MessageStream = Pin<Box<dyn futures_core::Stream<Item = Result<ProviderMessage>> + Send>>;

/// One item of a provider's upstream message sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderMessage {
    /// Incremental response text.
    TextDelta { text: String },
    /// The full response text. `None` means "whatever the deltas
    /// accumulated to".
    TextComplete { content: Option<String> },
    /// Incremental reasoning text.
    ThinkingDelta { text: String },
    ThinkingComplete { content: Option<String> },
    /// The model invokes a tool.
    ToolCall {
        tool_use_id: String,
        name: String,
        arguments: Value,
    },
    /// Progress on an in-flight tool invocation.
    ToolProgress {
        tool_use_id: String,
        progress: f64,
        message: Option<String>,
    },
    /// A tool invocation finished.
    ToolResult {
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
    /// Incremental usage report.
    Usage(TokenUsage),
    /// End of the run with the aggregate output.
    Done {
        output: Option<Value>,
        usage: Option<TokenUsage>,
        cost_usd: Option<f64>,
    },
}

/// Trait every provider adapter implements.
///
/// Implementations are expected to stop yielding promptly when the
/// caller drops the stream; cooperative cancellation between messages
/// is handled by the adapter, not here.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// A short name used for attribution and error messages.
    fn name(&self) -> &str;

    /// Start a run and return its message stream.
    async fn stream(&self, request: &ProviderRequest) -> Result<MessageStream>;
}

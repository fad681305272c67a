//! A deterministic scripted provider.
//!
//! Yields a fixed message sequence, optionally with a per-message
//! delay. Used by tests, the demo workflow, and offline runs — the
//! kernel's contract to real SDK adapters is exercised without one.

use std::time::Duration;

use serde_json::json;

use orchid_domain::{ProviderRequest, Result, TokenUsage};

use crate::traits::{MessageStream, Provider, ProviderMessage};

#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    name: String,
    script: Vec<ProviderMessage>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Vec::new(),
            delay: None,
        }
    }

    /// A provider that streams `text` word by word, completes, and
    /// reports word-count usage.
    pub fn say(name: impl Into<String>, text: &str) -> Self {
        let words: Vec<&str> = text.split(' ').collect();
        let mut script = Vec::with_capacity(words.len() + 2);
        for (i, word) in words.iter().enumerate() {
            let chunk = if i == 0 {
                (*word).to_owned()
            } else {
                format!(" {word}")
            };
            script.push(ProviderMessage::TextDelta { text: chunk });
        }
        script.push(ProviderMessage::TextComplete {
            content: Some(text.to_owned()),
        });
        script.push(ProviderMessage::Done {
            output: Some(json!(text)),
            usage: Some(TokenUsage {
                input_tokens: words.len() as u64,
                output_tokens: words.len() as u64,
                ..TokenUsage::default()
            }),
            cost_usd: None,
        });
        Self {
            name: name.into(),
            script,
            delay: None,
        }
    }

    pub fn with_messages(mut self, messages: Vec<ProviderMessage>) -> Self {
        self.script = messages;
        self
    }

    /// Sleep between messages — makes cancellation windows observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, _request: &ProviderRequest) -> Result<MessageStream> {
        let script = self.script.clone();
        let delay = self.delay;
        Ok(Box::pin(async_stream::stream! {
            for message in script {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(message);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn say_builds_a_well_formed_script() {
        let provider = ScriptedProvider::say("mock", "one two");
        let request = ProviderRequest::new("mock", "irrelevant");
        let mut stream = provider.stream(&request).await.unwrap();

        let mut messages = Vec::new();
        while let Some(item) = stream.next().await {
            messages.push(item.unwrap());
        }

        assert_eq!(messages.len(), 4);
        assert_eq!(
            messages[0],
            ProviderMessage::TextDelta { text: "one".into() }
        );
        assert_eq!(
            messages[1],
            ProviderMessage::TextDelta { text: " two".into() }
        );
        assert!(matches!(
            &messages[2],
            ProviderMessage::TextComplete { content: Some(c) } if c == "one two"
        ));
        assert!(matches!(
            &messages[3],
            ProviderMessage::Done { usage: Some(u), .. } if u.input_tokens == 2
        ));
    }

    #[tokio::test]
    async fn script_is_repeatable() {
        let provider = ScriptedProvider::say("mock", "hi");
        let request = ProviderRequest::new("mock", "x");
        for _ in 0..2 {
            let mut stream = provider.stream(&request).await.unwrap();
            let mut count = 0;
            while stream.next().await.is_some() {
                count += 1;
            }
            assert_eq!(count, 3);
        }
    }
}

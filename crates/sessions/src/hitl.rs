//! Human-in-the-loop prompts.
//!
//! A pending prompt is keyed by a `prompt_id` distinct from any signal
//! id. The carrier signal (`session:prompt`) is recorded; the reply
//! (`session:reply`) is recorded with `caused_by` pointing back at the
//! carrier. A validator that returns an error string keeps the prompt
//! pending and surfaces the error to the replying client — the waiting
//! workflow never sees the invalid response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;

use orchid_domain::{Error, Event, Result, SignalId, TraceEvent};
use orchid_hub::Hub;

/// Returns `None` when the response is acceptable, or an error string
/// to surface to the client (the prompt stays open).
pub type Validator = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct PromptOptions {
    pub choices: Option<Vec<String>>,
    pub validator: Option<Validator>,
    pub timeout: Option<Duration>,
}

impl PromptOptions {
    pub fn with_choices<I, T>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct PendingPrompt {
    validator: Option<Validator>,
    carrier_id: SignalId,
    tx: oneshot::Sender<String>,
}

/// The session's pending-prompt table.
#[derive(Default)]
pub struct PromptMap {
    inner: Mutex<HashMap<String, PendingPrompt>>,
}

impl PromptMap {
    /// Register a pending prompt and emit its carrier signal. Returns
    /// the prompt id and the resolver the workflow awaits.
    pub fn open(
        &self,
        hub: &Hub,
        prompt: &str,
        options: &PromptOptions,
    ) -> (String, oneshot::Receiver<String>) {
        let prompt_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.inner.lock().insert(
            prompt_id.clone(),
            PendingPrompt {
                validator: options.validator.clone(),
                carrier_id: 0,
                tx,
            },
        );

        let carrier = hub.emit(Event::new(
            "session:prompt",
            json!({
                "promptId": prompt_id,
                "prompt": prompt,
                "choices": options.choices,
            }),
        ));
        if let Some(entry) = self.inner.lock().get_mut(&prompt_id) {
            entry.carrier_id = carrier.id;
        }

        (prompt_id, rx)
    }

    /// Resolve a pending prompt with a client response.
    ///
    /// Unknown ids are `NotFound`; a failing validator returns
    /// `Validation` and leaves the prompt open.
    pub fn resolve(&self, hub: &Hub, prompt_id: &str, response: &str) -> Result<()> {
        let entry = {
            let mut inner = self.inner.lock();
            let entry = inner
                .get(prompt_id)
                .ok_or_else(|| Error::NotFound(format!("prompt {prompt_id}")))?;

            if let Some(validator) = &entry.validator {
                if let Some(message) = validator(response) {
                    TraceEvent::PromptResolved {
                        prompt_id: prompt_id.to_owned(),
                        outcome: "invalid".into(),
                    }
                    .emit();
                    return Err(Error::Validation(message));
                }
            }
            inner.remove(prompt_id).ok_or_else(|| {
                Error::NotFound(format!("prompt {prompt_id}"))
            })?
        };

        hub.emit(
            Event::new(
                "session:reply",
                json!({ "promptId": prompt_id, "content": response }),
            )
            .caused_by(entry.carrier_id),
        );
        let _ = entry.tx.send(response.to_owned());

        TraceEvent::PromptResolved {
            prompt_id: prompt_id.to_owned(),
            outcome: "replied".into(),
        }
        .emit();
        Ok(())
    }

    /// Drop one pending prompt (timeout path). The waiting workflow
    /// sees a closed resolver.
    pub fn cancel(&self, prompt_id: &str) {
        if self.inner.lock().remove(prompt_id).is_some() {
            TraceEvent::PromptResolved {
                prompt_id: prompt_id.to_owned(),
                outcome: "cancelled".into(),
            }
            .emit();
        }
    }

    /// Reject everything (abort path). Dropping the senders rejects
    /// every waiting workflow with a distinguishable closed-channel
    /// error, mapped to `Aborted` by the caller.
    pub fn reject_all(&self) {
        let drained: Vec<String> = {
            let mut inner = self.inner.lock();
            let keys = inner.keys().cloned().collect();
            inner.clear();
            keys
        };
        for prompt_id in drained {
            TraceEvent::PromptResolved {
                prompt_id,
                outcome: "aborted".into(),
            }
            .emit();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }
}

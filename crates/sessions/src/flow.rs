//! The workflow context — what a run-form body receives.
//!
//! `phase` and `task` bracket work with start/complete signals and
//! scoped context; `retry` applies exponential-with-jitter backoff;
//! `parallel` caps concurrency and cancels on first failure; `agent`
//! invokes a registered agent with attribution.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

use orchid_domain::{
    Error, Event, EventContext, ProviderRequest, ProviderResult, Result, Signal,
};
use orchid_hub::{scoped, Hub};
use orchid_providers::{run_provider, Provider};

use crate::agents::AgentRegistry;
use crate::hitl::PromptOptions;
use crate::runtime::{InjectedMessage, Session, State};

/// A boxed unit of parallel work.
pub type WorkItem<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// Maximum attempts.
    pub retries: u32,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            min_timeout: Duration::from_millis(1000),
            max_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParallelOptions {
    pub concurrency: usize,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ctx
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle a workflow body uses to emit, structure, and steer its run.
pub struct Ctx<S: State> {
    session: Arc<Session<S>>,
}

impl<S: State> Clone for Ctx<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<S: State> Ctx<S> {
    pub(crate) fn new(session: Arc<Session<S>>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session<S>> {
        &self.session
    }

    pub fn hub(&self) -> &Hub {
        self.session.hub()
    }

    pub fn input(&self) -> &Value {
        self.session.input()
    }

    pub fn agents(&self) -> Arc<AgentRegistry> {
        self.session.agents()
    }

    pub fn emit(&self, name: &str, payload: Value) -> Signal {
        self.hub().emit(Event::new(name, payload))
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        self.session.with_state(f)
    }

    pub fn state(&self) -> S {
        self.session.state_snapshot()
    }

    // ── Cancellation ─────────────────────────────────────────────────

    pub fn is_aborted(&self) -> bool {
        self.session.is_aborted()
    }

    /// Cooperative point for long workflow code: waits out a pause,
    /// fails on abort.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.session.interrupt().is_paused() {
            self.session.interrupt().resumed().await;
        }
        if self.is_aborted() {
            return Err(Error::Aborted("session aborted".into()));
        }
        Ok(())
    }

    // ── Messages & HITL ──────────────────────────────────────────────

    pub fn has_messages(&self) -> bool {
        self.session.has_messages()
    }

    pub fn read_messages(&self) -> Vec<InjectedMessage> {
        self.session.read_messages()
    }

    /// Suspend for a correlated human reply. Interactive sessions only.
    pub async fn wait_for_user(&self, prompt: &str, options: PromptOptions) -> Result<String> {
        self.session.wait_for_user(prompt, options).await
    }

    /// Resolve when the dispatcher's `end_when` predicate fires.
    pub async fn until_end(&self) {
        self.session.until_end().await
    }

    // ── Providers ────────────────────────────────────────────────────

    /// Run a provider through the session's recorder (when one is set)
    /// and this session's interrupt.
    pub async fn run_provider(
        &self,
        provider: &dyn Provider,
        request: &ProviderRequest,
    ) -> Result<ProviderResult> {
        let recorder = self.session.recorder();
        run_provider(
            self.hub(),
            recorder.as_deref(),
            provider,
            request,
            self.session.interrupt(),
        )
        .await
    }

    // ── Agents ───────────────────────────────────────────────────────

    /// Invoke a registered agent with start/complete signals and agent
    /// context scoping.
    pub async fn agent(&self, name: &str, input: Value) -> Result<Value> {
        let agent = self
            .agents()
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("agent {name}")))?;
        self.emit("agent:start", json!({ "name": name }));
        let scope = EventContext::default().with_agent(name);
        let result = scoped(scope, agent.execute(input)).await;
        match &result {
            Ok(_) => {
                self.emit("agent:complete", json!({ "name": name }));
            }
            Err(e) => {
                self.emit("agent:error", json!({ "name": name, "error": e.to_string() }));
            }
        }
        result
    }

    // ── Structure ────────────────────────────────────────────────────

    /// Bracket a phase: `phase:start`/`phase:complete` (or
    /// `phase:failed`), with `{ phase: { name, number } }` scoped over
    /// everything emitted inside.
    pub async fn phase<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let number = self.session.next_phase_number();
        self.emit(
            "phase:start",
            json!({ "name": name, "phaseNumber": number }),
        );
        let scope = EventContext::default().with_phase(name, number);
        match scoped(scope, f()).await {
            Ok(value) => {
                let result = serde_json::to_value(&value).unwrap_or(Value::Null);
                self.emit("phase:complete", json!({ "name": name, "result": result }));
                Ok(value)
            }
            Err(error) => {
                self.emit(
                    "phase:failed",
                    json!({ "name": name, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    /// Bracket a task: `task:start`/`task:complete`/`task:failed` with
    /// `{ task: { id } }` scoped context.
    pub async fn task<T, F, Fut>(&self, id: &str, f: F) -> Result<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.emit("task:start", json!({ "id": id }));
        let scope = EventContext::default().with_task(id);
        match scoped(scope, f()).await {
            Ok(value) => {
                let result = serde_json::to_value(&value).unwrap_or(Value::Null);
                self.emit("task:complete", json!({ "id": id, "result": result }));
                Ok(value)
            }
            Err(error) => {
                self.emit("task:failed", json!({ "id": id, "error": error.to_string() }));
                Err(error)
            }
        }
    }

    /// Retry with exponential backoff and full jitter, clamped to
    /// `[min_timeout, max_timeout]`. Aborts are never retried.
    pub async fn retry<T, F, Fut>(&self, name: &str, options: RetryOptions, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = options.retries.max(1);
        self.emit(
            "retry:start",
            json!({ "name": name, "maxAttempts": attempts }),
        );
        let mut last_error = None;
        for attempt in 1..=attempts {
            self.emit("retry:attempt", json!({ "name": name, "attempt": attempt }));
            match f().await {
                Ok(value) => {
                    self.emit(
                        "retry:success",
                        json!({ "name": name, "attempt": attempt }),
                    );
                    return Ok(value);
                }
                Err(error) => {
                    if error.is_aborted() {
                        self.emit(
                            "retry:failure",
                            json!({ "name": name, "attempts": attempt }),
                        );
                        return Err(error);
                    }
                    if attempt < attempts {
                        let delay =
                            backoff_delay(attempt, options.min_timeout, options.max_timeout);
                        self.emit(
                            "retry:backoff",
                            json!({
                                "name": name,
                                "attempt": attempt,
                                "delay": delay.as_millis() as u64,
                                "error": error.to_string(),
                            }),
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(error);
                }
            }
        }
        self.emit(
            "retry:failure",
            json!({ "name": name, "attempts": attempts }),
        );
        Err(last_error.unwrap_or_else(|| Error::Internal("retry exhausted".into())))
    }

    /// Run work items with a concurrency cap. Completion order drives
    /// `parallel:item:complete`; results come back in submission order.
    /// The first failure cancels everything in flight (and unstarted
    /// items never start), then re-throws after `parallel:complete`
    /// with `failed: true`.
    pub async fn parallel<T: Send + 'static>(
        &self,
        name: &str,
        items: Vec<WorkItem<T>>,
        options: ParallelOptions,
    ) -> Result<Vec<T>> {
        let total = items.len();
        let concurrency = options.concurrency.max(1);
        self.emit(
            "parallel:start",
            json!({ "name": name, "total": total, "concurrency": concurrency }),
        );

        let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
        let mut completed = 0usize;
        let mut in_flight = futures_util::stream::iter(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| async move { (index, item.await) }),
        )
        .buffer_unordered(concurrency);

        while let Some((index, outcome)) = in_flight.next().await {
            match outcome {
                Ok(value) => {
                    completed += 1;
                    self.emit(
                        "parallel:item:complete",
                        json!({
                            "name": name,
                            "index": index,
                            "completed": completed,
                            "total": total,
                        }),
                    );
                    results[index] = Some(value);
                }
                Err(error) => {
                    drop(in_flight);
                    self.emit(
                        "parallel:complete",
                        json!({ "name": name, "total": total, "failed": true }),
                    );
                    return Err(error);
                }
            }
        }

        self.emit("parallel:complete", json!({ "name": name, "total": total }));
        Ok(results.into_iter().flatten().collect())
    }
}

/// Exponential backoff with full jitter: pick uniformly from
/// `[min, min(min * 2^(attempt-1), max)]`.
fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let exp_ms = min_ms.saturating_mul(1u64 << (attempt - 1).min(20));
    let cap = exp_ms.clamp(min_ms, max_ms.max(min_ms));
    let jittered = if cap > min_ms {
        rand::thread_rng().gen_range(min_ms..=cap)
    } else {
        min_ms
    };
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_bounds() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        for attempt in 1..=6 {
            for _ in 0..20 {
                let delay = backoff_delay(attempt, min, max);
                assert!(delay >= min, "attempt {attempt}: {delay:?} below min");
                assert!(delay <= max, "attempt {attempt}: {delay:?} above max");
            }
        }
    }

    #[test]
    fn backoff_first_attempt_is_min() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        assert_eq!(backoff_delay(1, min, max), min);
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let delay = backoff_delay(64, Duration::from_millis(1000), Duration::from_millis(5000));
        assert!(delay <= Duration::from_millis(5000));
    }
}

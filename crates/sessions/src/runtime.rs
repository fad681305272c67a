//! The session runtime — the state machine driving one workflow.
//!
//! States: `idle → running → (paused ⇄ running) → { complete, aborted }`.
//! The workflow body runs as a cooperative task; its error is caught
//! once at the session boundary, recorded as
//! `harness:complete { success: false }`, and re-raised to the caller.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Notify;

use orchid_domain::{Error, Event, EventContext, Result, TraceEvent};
use orchid_hub::{scoped, Hub, Subscription};
use orchid_providers::Interrupt;
use orchid_store::{NewRecording, Recorder, RecordingSink, SignalStore};

use crate::agents::AgentRegistry;
use crate::attach::Cleanup;
use crate::dispatch::Dispatcher;
use crate::flow::Ctx;
use crate::hitl::{PromptMap, PromptOptions};
use crate::steps::StepYield;

/// Bound for session state: cloned for snapshots and drafts, compared
/// for the debug-build process-manager check.
pub trait State: Clone + PartialEq + Send + Sync + 'static {}
impl<T: Clone + PartialEq + Send + Sync + 'static> State for T {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status & config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Complete,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone)]
pub struct SessionConfig {
    /// Whether `wait_for_user` is available.
    pub interactive: bool,
    /// Applied when a prompt carries no timeout of its own.
    pub default_prompt_timeout: Option<Duration>,
    /// Budget for the whole workflow body.
    pub run_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interactive: false,
            default_prompt_timeout: None,
            run_timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn interactive() -> Self {
        Self {
            interactive: true,
            ..Self::default()
        }
    }
}

/// An out-of-band message pushed into the session queue. Not a prompt
/// response — a nudge workflows poll for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub received_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Session<S: State> {
    /// Back-reference to the owning `Arc`, set at construction.
    weak: Weak<Session<S>>,
    id: String,
    input: Value,
    config: SessionConfig,
    hub: Hub,
    status: RwLock<SessionStatus>,
    /// Committed state. Mutated during dispatch (and by run-form
    /// workflows through `with_state`), never from listener callbacks.
    state: Mutex<S>,
    /// Post-dispatch snapshot for external readers.
    snapshot: RwLock<S>,
    interrupt: Interrupt,
    prompts: PromptMap,
    messages: Mutex<VecDeque<InjectedMessage>>,
    messages_closed: AtomicBool,
    cleanups: Mutex<Vec<Cleanup>>,
    subscriptions: Mutex<Vec<Subscription>>,
    agents: RwLock<Arc<AgentRegistry>>,
    recorder: RwLock<Option<Arc<Recorder>>>,
    recording: RwLock<Option<(Arc<SignalStore>, String)>>,
    phase_counter: AtomicU32,
    ended: AtomicBool,
    end_notify: Notify,
}

impl<S: State> Session<S> {
    /// Create an idle session. The state factory is synchronous.
    pub fn create<F>(
        id: impl Into<String>,
        input: Value,
        state_factory: F,
        config: SessionConfig,
    ) -> Arc<Self>
    where
        F: FnOnce(&Value) -> S,
    {
        let id = id.into();
        let state = state_factory(&input);
        TraceEvent::SessionCreated {
            session_id: id.clone(),
            interactive: config.interactive,
        }
        .emit();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            hub: Hub::new(id.clone()),
            id,
            input,
            config,
            status: RwLock::new(SessionStatus::Idle),
            snapshot: RwLock::new(state.clone()),
            state: Mutex::new(state),
            interrupt: Interrupt::new(),
            prompts: PromptMap::default(),
            messages: Mutex::new(VecDeque::new()),
            messages_closed: AtomicBool::new(false),
            cleanups: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            agents: RwLock::new(Arc::new(AgentRegistry::new())),
            recorder: RwLock::new(None),
            recording: RwLock::new(None),
            phase_counter: AtomicU32::new(0),
            ended: AtomicBool::new(false),
            end_notify: Notify::new(),
        })
    }

    /// The owning `Arc`. Sessions are only ever constructed through
    /// `create`, so the upgrade cannot fail while `&self` is alive.
    pub(crate) fn arc(&self) -> Arc<Self> {
        self.weak
            .upgrade()
            .expect("session outlived its owning Arc")
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn is_aborted(&self) -> bool {
        self.interrupt.is_aborted()
    }

    pub fn agents(&self) -> Arc<AgentRegistry> {
        self.agents.read().clone()
    }

    pub fn set_agents(&self, registry: AgentRegistry) {
        *self.agents.write() = Arc::new(registry);
    }

    pub fn recorder(&self) -> Option<Arc<Recorder>> {
        self.recorder.read().clone()
    }

    pub fn set_recorder(&self, recorder: Arc<Recorder>) {
        *self.recorder.write() = Some(recorder);
    }

    pub(crate) fn next_phase_number(&self) -> u32 {
        self.phase_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ── State access ─────────────────────────────────────────────────

    /// Mutate the committed state (run-form workflows only) and refresh
    /// the external snapshot.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        *self.snapshot.write() = state.clone();
        result
    }

    /// The post-dispatch snapshot external readers see.
    pub fn state_snapshot(&self) -> S {
        self.snapshot.read().clone()
    }

    // ── Recording ────────────────────────────────────────────────────

    /// Open a recording for this session in `store` and attach it as
    /// the hub sink. Every signal from here on is appended durably.
    pub fn record_to(&self, store: &Arc<SignalStore>) -> Result<String> {
        let recording_id = store.create(
            NewRecording::named(self.id.clone()).with_tag("session"),
        )?;
        self.hub.set_sink(Arc::new(RecordingSink::new(
            Arc::clone(store),
            recording_id.clone(),
        )));
        *self.recording.write() = Some((Arc::clone(store), recording_id.clone()));
        Ok(recording_id)
    }

    /// Bind to an existing open recording (fork path). Live emissions
    /// continue on it with ids above `next_signal_id`.
    pub fn continue_recording(
        &self,
        store: &Arc<SignalStore>,
        recording_id: impl Into<String>,
        next_signal_id: u64,
    ) {
        let recording_id = recording_id.into();
        self.hub.advance_signal_id(next_signal_id);
        self.hub.set_sink(Arc::new(RecordingSink::new(
            Arc::clone(store),
            recording_id.clone(),
        )));
        *self.recording.write() = Some((Arc::clone(store), recording_id));
    }

    pub fn recording_id(&self) -> Option<String> {
        self.recording.read().as_ref().map(|(_, id)| id.clone())
    }

    fn finalize_recording(&self) {
        let Some((store, recording_id)) = self.recording.write().take() else {
            return;
        };
        if let Err(e) = store.finalize(&recording_id, None) {
            tracing::warn!(
                recording_id = %recording_id,
                error = %e,
                "failed to finalize session recording"
            );
        }
    }

    // ── Dispatch integration ─────────────────────────────────────────

    /// Install the reducer/handler/process-manager dispatcher. Every
    /// signal on the hub runs the tiers against this session's state,
    /// serialized by the state lock; follow-ups re-enter the hub FIFO.
    pub fn install_dispatcher(&self, dispatcher: Dispatcher<S>) {
        let dispatcher = Arc::new(dispatcher);
        let weak = self.weak.clone();
        let subscription = self.hub.subscribe_all(move |signal| {
            let Some(session) = weak.upgrade() else { return };
            let outcome = {
                let mut state = session.state.lock();
                let outcome = dispatcher.dispatch(&mut state, signal);
                *session.snapshot.write() = state.clone();
                outcome
            };
            for event in outcome.followups {
                session.hub.emit(event);
            }
            if outcome.ended {
                session.ended.store(true, Ordering::Release);
                session.end_notify.notify_waiters();
            }
        });
        self.subscriptions.lock().push(subscription);
    }

    /// Resolve when the dispatcher's `end_when` predicate has fired.
    pub async fn until_end(&self) {
        loop {
            let notified = self.end_notify.notified();
            if self.ended.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    // ── Run ──────────────────────────────────────────────────────────

    /// Drive a run-form workflow to completion.
    pub async fn run<F, Fut>(&self, workflow: F) -> Result<Value>
    where
        F: FnOnce(Ctx<S>) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        self.begin_run()?;
        let ctx = Ctx::new(self.arc());
        let body = scoped(EventContext::for_session(self.id.clone()), workflow(ctx));
        let outcome = match self.config.run_timeout {
            Some(budget) => match tokio::time::timeout(budget, body).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout(format!(
                    "workflow exceeded {}ms",
                    budget.as_millis()
                ))),
            },
            None => body.await,
        };
        self.finish_run(outcome)
    }

    /// Drive an execute-form workflow: a stream of step yields, each
    /// recorded and — when a replay log is provided — matched
    /// positionally for deterministic re-execution.
    pub async fn run_steps<St>(
        &self,
        steps: St,
        replay: Option<Vec<StepYield>>,
    ) -> Result<Value>
    where
        St: futures_core::Stream<Item = StepYield> + Send,
    {
        self.begin_run()?;
        let session = self.arc();
        let body = scoped(EventContext::for_session(self.id.clone()), async move {
            futures_util::pin_mut!(steps);
            let mut index: usize = 0;
            let mut last_output = Value::Null;
            while let Some(step) = steps.next().await {
                if session.is_aborted() {
                    return Err(Error::Aborted("session aborted".into()));
                }
                if let Some(expected) = replay.as_ref().and_then(|r| r.get(index)) {
                    if expected.step != step.step {
                        return Err(Error::Validation(format!(
                            "replay mismatch at step {index}: expected `{}`, got `{}`",
                            expected.step, step.step
                        )));
                    }
                }
                let mut payload = serde_json::to_value(&step)?;
                payload["index"] = json!(index);
                session.hub.emit(Event::new("step:yield", payload));
                if let Some(output) = &step.output {
                    last_output = output.clone();
                }
                index += 1;
            }
            Ok(last_output)
        });
        let outcome = match self.config.run_timeout {
            Some(budget) => match tokio::time::timeout(budget, body).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout(format!(
                    "workflow exceeded {}ms",
                    budget.as_millis()
                ))),
            },
            None => body.await,
        };
        self.finish_run(outcome)
    }

    fn begin_run(&self) -> Result<()> {
        {
            let mut status = self.status.write();
            if *status != SessionStatus::Idle {
                return Err(Error::Conflict(format!(
                    "cannot run a session in state {status}"
                )));
            }
            *status = SessionStatus::Running;
        }
        self.trace_status();
        self.hub
            .emit(Event::new("harness:start", json!({ "input": self.input })));
        Ok(())
    }

    fn finish_run(&self, outcome: Result<Value>) -> Result<Value> {
        match outcome {
            Ok(value) => {
                self.hub.emit(Event::new(
                    "harness:complete",
                    json!({ "success": true, "result": value }),
                ));
                self.terminate(SessionStatus::Complete);
                Ok(value)
            }
            Err(error) => {
                if self.status() == SessionStatus::Aborted {
                    // abort() already recorded session:abort and closed
                    // the hub; just re-raise.
                    return Err(error);
                }
                self.hub.emit(Event::new(
                    "harness:complete",
                    json!({ "success": false, "error": error.to_string() }),
                ));
                self.terminate(SessionStatus::Complete);
                Err(error)
            }
        }
    }

    // ── Pause / resume / abort ───────────────────────────────────────

    /// Pause a running session. Idempotent: returns false when not
    /// running.
    pub fn pause(&self) -> bool {
        {
            let mut status = self.status.write();
            if *status != SessionStatus::Running {
                return false;
            }
            *status = SessionStatus::Paused;
        }
        self.interrupt.pause();
        self.hub.emit(Event::new("flow:paused", json!({})));
        self.trace_status();
        true
    }

    /// Resume a paused session, optionally injecting a user message
    /// first. Idempotent: returns false when not paused.
    pub fn resume(&self, message: Option<String>) -> bool {
        {
            let mut status = self.status.write();
            if *status != SessionStatus::Paused {
                return false;
            }
            *status = SessionStatus::Running;
        }
        if let Some(content) = message {
            self.push_message(content, None);
        }
        self.interrupt.resume();
        self.hub.emit(Event::new("flow:resumed", json!({})));
        self.trace_status();
        true
    }

    /// Abort: terminal. Records `session:abort`, rejects outstanding
    /// prompts, drains and closes the message queue, and closes the
    /// hub — nothing is emitted afterwards.
    pub fn abort(&self, reason: Option<&str>) -> bool {
        {
            let mut status = self.status.write();
            if status.is_terminal() {
                return false;
            }
            *status = SessionStatus::Aborted;
        }
        self.hub
            .emit(Event::new("session:abort", json!({ "reason": reason })));
        self.hub.close();
        self.prompts.reject_all();
        self.close_messages();
        self.interrupt.abort();
        self.run_cleanups();
        self.finalize_recording();
        self.trace_status();
        true
    }

    fn terminate(&self, terminal: SessionStatus) {
        {
            let mut status = self.status.write();
            if !status.is_terminal() {
                *status = terminal;
            }
        }
        self.prompts.reject_all();
        self.close_messages();
        self.run_cleanups();
        self.finalize_recording();
        self.hub.close();
        self.trace_status();
    }

    fn trace_status(&self) {
        TraceEvent::SessionStatus {
            session_id: self.id.clone(),
            status: self.status().to_string(),
        }
        .emit();
    }

    // ── Message injection ────────────────────────────────────────────

    /// Push an out-of-band message. Recorded as `session:message`.
    pub fn send_message(
        &self,
        content: impl Into<String>,
        agent: Option<String>,
    ) -> Result<()> {
        if self.messages_closed.load(Ordering::Acquire) || self.status().is_terminal() {
            return Err(Error::Conflict("session message queue is closed".into()));
        }
        self.push_message(content.into(), agent);
        Ok(())
    }

    fn push_message(&self, content: String, agent: Option<String>) {
        let message = InjectedMessage {
            content: content.clone(),
            agent: agent.clone(),
            received_at: Utc::now(),
        };
        self.messages.lock().push_back(message);
        self.hub.emit(Event::new(
            "session:message",
            json!({ "content": content, "agent": agent }),
        ));
    }

    pub fn has_messages(&self) -> bool {
        !self.messages.lock().is_empty()
    }

    /// Drain the queue.
    pub fn read_messages(&self) -> Vec<InjectedMessage> {
        self.messages.lock().drain(..).collect()
    }

    fn close_messages(&self) {
        self.messages_closed.store(true, Ordering::Release);
        self.messages.lock().clear();
    }

    // ── HITL ─────────────────────────────────────────────────────────

    /// Suspend until a correlated client reply, a timeout, or abort.
    pub async fn wait_for_user(&self, prompt: &str, options: PromptOptions) -> Result<String> {
        if !self.config.interactive {
            return Err(Error::Usage(
                "wait_for_user requires an interactive session".into(),
            ));
        }
        if self.status().is_terminal() {
            return Err(Error::Conflict("session is terminal".into()));
        }

        let timeout = options.timeout.or(self.config.default_prompt_timeout);
        let (prompt_id, rx) = self.prompts.open(&self.hub, prompt, &options);
        TraceEvent::PromptOpened {
            session_id: self.id.clone(),
            prompt_id: prompt_id.clone(),
        }
        .emit();

        let interrupt = self.interrupt.clone();
        let response = async {
            match rx.await {
                Ok(response) => Ok(response),
                Err(_) => Err(Error::Aborted("prompt rejected".into())),
            }
        };

        match timeout {
            Some(budget) => {
                tokio::select! {
                    outcome = response => outcome,
                    _ = interrupt.aborted() => {
                        self.prompts.cancel(&prompt_id);
                        Err(Error::Aborted("session aborted while waiting".into()))
                    }
                    _ = tokio::time::sleep(budget) => {
                        self.prompts.cancel(&prompt_id);
                        Err(Error::Timeout(format!(
                            "no reply within {}ms",
                            budget.as_millis()
                        )))
                    }
                }
            }
            None => {
                tokio::select! {
                    outcome = response => outcome,
                    _ = interrupt.aborted() => {
                        self.prompts.cancel(&prompt_id);
                        Err(Error::Aborted("session aborted while waiting".into()))
                    }
                }
            }
        }
    }

    /// Resolve a pending prompt (transport side).
    pub fn reply(&self, prompt_id: &str, response: &str) -> Result<()> {
        self.prompts.resolve(&self.hub, prompt_id, response)
    }

    pub fn pending_prompts(&self) -> usize {
        self.prompts.pending_count()
    }

    // ── Attachments ──────────────────────────────────────────────────

    pub(crate) fn push_cleanup(&self, cleanup: Cleanup) {
        self.cleanups.lock().push(cleanup);
    }

    fn run_cleanups(&self) {
        let cleanups: Vec<Cleanup> = {
            let mut guard = self.cleanups.lock();
            guard.drain(..).collect()
        };
        let count = cleanups.len();
        // Reverse attach order; individual failures are ignored.
        for cleanup in cleanups.into_iter().rev() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(cleanup));
        }
        if count > 0 {
            TraceEvent::AttachmentCleanup {
                session_id: self.id.clone(),
                cleanups: count,
            }
            .emit();
        }
    }
}

//! Normalizes a provider's message stream into the kernel's framed
//! signal sequence.
//!
//! Every run produces exactly one `provider:start` first and exactly
//! one `provider:end` last. Between them: `text:delta*` then at most
//! one `text:complete`, `thinking:*` with the same discipline, and
//! `tool:call`/`tool:result` pairs matched by tool-use id (with
//! optional `tool:progress` referencing an in-flight id). The session
//! interrupt is observed between messages; on pause or abort the
//! adapter emits a synthetic end with `aborted: true` and stops
//! pulling upstream.

use std::collections::HashMap;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::{json, Value};

use orchid_domain::{
    Error, Event, ProviderRequest, ProviderResult, Result, Signal, Source, TokenUsage,
};
use orchid_hub::Hub;
use orchid_store::{LiveRecording, Recorder, RunHandle};

use crate::control::Interrupt;
use crate::traits::{Provider, ProviderMessage};

/// Drive one provider run through the recorder and onto the hub.
///
/// In replay mode the recorded signals are re-emitted (names and
/// payloads preserved; the hub re-assigns ids and timestamps) and the
/// stored aggregate result is returned without touching the provider.
pub async fn run_provider(
    hub: &Hub,
    recorder: Option<&Recorder>,
    provider: &dyn Provider,
    request: &ProviderRequest,
    interrupt: &Interrupt,
) -> Result<ProviderResult> {
    let handle = match recorder {
        Some(recorder) => recorder.begin(request)?,
        None => RunHandle::Live(LiveRecording::disabled()),
    };
    match handle {
        RunHandle::Replay(replay) => {
            for signal in &replay.signals {
                hub.emit(signal.to_event());
            }
            Ok(replay.result)
        }
        RunHandle::Live(live) => {
            stream_live(hub, live, provider, request, interrupt).await
        }
    }
}

struct RunState {
    text: String,
    text_completed: bool,
    thinking: String,
    /// tool_use_id → tool name, for in-flight invocations.
    open_tools: HashMap<String, String>,
    usage: TokenUsage,
    usage_seen: bool,
    cost_usd: Option<f64>,
    output: Option<Value>,
}

enum RunOutcome {
    Success(ProviderResult),
    Interrupted(ProviderResult),
    Failed(Error),
}

async fn stream_live(
    hub: &Hub,
    live: LiveRecording,
    provider: &dyn Provider,
    request: &ProviderRequest,
    interrupt: &Interrupt,
) -> Result<ProviderResult> {
    let name = provider.name().to_owned();
    let outcome = drive_stream(hub, &live, provider, request, interrupt).await;
    match outcome {
        RunOutcome::Success(result) => {
            if let Err(e) = live.finish(&result) {
                tracing::warn!(provider = %name, error = %e, "provider run recording failed");
            }
            Ok(result)
        }
        RunOutcome::Interrupted(result) => {
            // Not a valid replay fixture; leave the stream log open.
            live.abandon();
            Ok(result)
        }
        RunOutcome::Failed(error) => {
            live.abandon();
            Err(error)
        }
    }
}

async fn drive_stream(
    hub: &Hub,
    live: &LiveRecording,
    provider: &dyn Provider,
    request: &ProviderRequest,
    interrupt: &Interrupt,
) -> RunOutcome {
    let name = provider.name().to_owned();
    let source = Source::provider(&name);
    let started = Instant::now();

    let emit = |event_name: &str, payload: Value| -> Signal {
        let signal = hub.emit(
            Event::new(event_name, payload).with_source(source.clone()),
        );
        if let Err(e) = live.append(&signal) {
            tracing::warn!(name = %signal.name, error = %e, "provider run append failed");
        }
        signal
    };

    emit("provider:start", json!({ "provider": name }));

    let mut state = RunState {
        text: String::new(),
        text_completed: false,
        thinking: String::new(),
        open_tools: HashMap::new(),
        usage: TokenUsage::default(),
        usage_seen: false,
        cost_usd: None,
        output: None,
    };

    let mut upstream = match provider.stream(request).await {
        Ok(stream) => stream,
        Err(e) => {
            emit("provider:error", json!({ "message": e.to_string() }));
            finish_aborted(&emit, &state, started, false);
            return RunOutcome::Failed(e);
        }
    };

    let mut done = false;
    while !done {
        // Cooperative cancellation point: between messages.
        if interrupt.check().is_some() {
            finish_aborted(&emit, &state, started, true);
            return RunOutcome::Interrupted(aborted_result(&state, started));
        }

        let Some(item) = upstream.next().await else {
            break;
        };

        let message = match item {
            Ok(message) => message,
            Err(e) => {
                emit("provider:error", json!({ "message": e.to_string() }));
                finish_aborted(&emit, &state, started, false);
                return RunOutcome::Failed(e);
            }
        };

        if let Err(violation) = apply(&emit, &mut state, message, &mut done) {
            emit("provider:error", json!({ "message": violation.to_string() }));
            finish_aborted(&emit, &state, started, false);
            return RunOutcome::Failed(violation);
        }
    }

    // A provider that streamed deltas but never completed gets a
    // synthesized completion so the bracket stays well-formed.
    if !state.text.is_empty() && !state.text_completed {
        emit("text:complete", json!({ "content": state.text }));
        state.text_completed = true;
    }
    if !state.open_tools.is_empty() {
        tracing::warn!(
            provider = %name,
            open = state.open_tools.len(),
            "provider run ended with unanswered tool calls"
        );
    }

    let result = ProviderResult {
        duration_ms: started.elapsed().as_millis() as u64,
        output: state
            .output
            .clone()
            .unwrap_or_else(|| Value::String(state.text.clone())),
        usage: state.usage_seen.then_some(state.usage),
        cost_usd: state.cost_usd,
        aborted: false,
    };
    let payload = serde_json::to_value(&result).unwrap_or_else(|_| json!({}));
    emit("provider:end", payload);

    RunOutcome::Success(result)
}

/// Map one upstream message onto signals, enforcing stream discipline.
fn apply(
    emit: &dyn Fn(&str, Value) -> Signal,
    state: &mut RunState,
    message: ProviderMessage,
    done: &mut bool,
) -> Result<()> {
    match message {
        ProviderMessage::TextDelta { text } => {
            if state.text_completed {
                return Err(Error::Internal("text:delta after text:complete".into()));
            }
            state.text.push_str(&text);
            emit("text:delta", json!({ "text": text }));
        }
        ProviderMessage::TextComplete { content } => {
            if state.text_completed {
                return Err(Error::Internal("duplicate text:complete".into()));
            }
            let content = content.unwrap_or_else(|| state.text.clone());
            state.text = content.clone();
            state.text_completed = true;
            emit("text:complete", json!({ "content": content }));
        }
        ProviderMessage::ThinkingDelta { text } => {
            state.thinking.push_str(&text);
            emit("thinking:delta", json!({ "text": text }));
        }
        ProviderMessage::ThinkingComplete { content } => {
            let content = content.unwrap_or_else(|| state.thinking.clone());
            state.thinking.clear();
            emit("thinking:complete", json!({ "content": content }));
        }
        ProviderMessage::ToolCall {
            tool_use_id,
            name,
            arguments,
        } => {
            state.open_tools.insert(tool_use_id.clone(), name.clone());
            emit(
                "tool:call",
                json!({ "toolUseId": tool_use_id, "name": name, "arguments": arguments }),
            );
        }
        ProviderMessage::ToolProgress {
            tool_use_id,
            progress,
            message,
        } => {
            if !state.open_tools.contains_key(&tool_use_id) {
                return Err(Error::Internal(format!(
                    "tool:progress for unknown tool use {tool_use_id}"
                )));
            }
            emit(
                "tool:progress",
                json!({ "toolUseId": tool_use_id, "progress": progress, "message": message }),
            );
        }
        ProviderMessage::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let Some(name) = state.open_tools.remove(&tool_use_id) else {
                return Err(Error::Internal(format!(
                    "tool:result without prior tool:call ({tool_use_id})"
                )));
            };
            emit(
                "tool:result",
                json!({
                    "toolUseId": tool_use_id,
                    "name": name,
                    "content": content,
                    "isError": is_error,
                }),
            );
        }
        ProviderMessage::Usage(usage) => {
            state.usage.merge(&usage);
            state.usage_seen = true;
        }
        ProviderMessage::Done {
            output,
            usage,
            cost_usd,
        } => {
            if let Some(usage) = usage {
                state.usage.merge(&usage);
                state.usage_seen = true;
            }
            if cost_usd.is_some() {
                state.cost_usd = cost_usd;
            }
            state.output = output;
            *done = true;
        }
    }
    Ok(())
}

fn aborted_result(state: &RunState, started: Instant) -> ProviderResult {
    ProviderResult {
        duration_ms: started.elapsed().as_millis() as u64,
        output: Value::String(state.text.clone()),
        usage: state.usage_seen.then_some(state.usage),
        cost_usd: state.cost_usd,
        aborted: true,
    }
}

/// Emit the closing bracket for an interrupted or failed run.
fn finish_aborted(
    emit: &dyn Fn(&str, Value) -> Signal,
    state: &RunState,
    started: Instant,
    aborted: bool,
) {
    let mut payload = serde_json::to_value(ProviderResult {
        duration_ms: started.elapsed().as_millis() as u64,
        output: Value::String(state.text.clone()),
        usage: state.usage_seen.then_some(state.usage),
        cost_usd: state.cost_usd,
        aborted,
    })
    .unwrap_or_else(|_| json!({}));
    if !aborted {
        // A failed (not cancelled) run closes its bracket too, marked
        // distinctly for observers.
        payload["failed"] = json!(true);
    }
    emit("provider:end", payload);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptedProvider;
    use orchid_store::RecorderMode;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn recording_hub() -> (Hub, Arc<Mutex<Vec<Signal>>>) {
        let hub = Hub::new("s");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let sub = hub.subscribe_all(move |signal: &Signal| {
            seen2.lock().push(signal.clone());
        });
        std::mem::forget(sub);
        (hub, seen)
    }

    fn recorder(dir: &std::path::Path, mode: RecorderMode) -> Recorder {
        Recorder::open(dir, mode).unwrap()
    }

    fn names(seen: &Arc<Mutex<Vec<Signal>>>) -> Vec<String> {
        seen.lock().iter().map(|s| s.name.clone()).collect()
    }

    #[tokio::test]
    async fn well_formed_text_run() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, seen) = recording_hub();
        let provider = ScriptedProvider::say("hello", "Hel lo");
        let request = ProviderRequest::new("scripted", "say hello");

        let result = run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Disabled)),
            &provider,
            &request,
            &Interrupt::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            names(&seen),
            vec![
                "provider:start",
                "text:delta",
                "text:delta",
                "text:complete",
                "provider:end"
            ]
        );
        assert_eq!(result.output, json!("Hel lo"));
        assert!(!result.aborted);

        let signals = seen.lock();
        // Framing: start first, end last, and the end carries the result.
        assert_eq!(signals.first().unwrap().name, "provider:start");
        let end = signals.last().unwrap();
        assert_eq!(end.name, "provider:end");
        assert_eq!(end.payload["output"], json!("Hel lo"));
        assert_eq!(end.payload["usage"]["inputTokens"], json!(2));
    }

    #[tokio::test]
    async fn tool_calls_pair_with_results() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, seen) = recording_hub();
        let provider = ScriptedProvider::new("scripted").with_messages(vec![
            ProviderMessage::ToolCall {
                tool_use_id: "tu-1".into(),
                name: "search".into(),
                arguments: json!({ "q": "rust" }),
            },
            ProviderMessage::ToolProgress {
                tool_use_id: "tu-1".into(),
                progress: 0.5,
                message: None,
            },
            ProviderMessage::ToolResult {
                tool_use_id: "tu-1".into(),
                content: json!("3 hits"),
                is_error: false,
            },
            ProviderMessage::TextDelta { text: "done".into() },
            ProviderMessage::Done {
                output: None,
                usage: None,
                cost_usd: None,
            },
        ]);

        run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Disabled)),
            &provider,
            &ProviderRequest::new("scripted", "go"),
            &Interrupt::new(),
        )
        .await
        .unwrap();

        let signals = seen.lock();
        let call = signals.iter().position(|s| s.name == "tool:call").unwrap();
        let result = signals.iter().position(|s| s.name == "tool:result").unwrap();
        assert!(call < result);
        assert_eq!(signals[result].payload["toolUseId"], json!("tu-1"));
        assert_eq!(signals[result].payload["name"], json!("search"));
        // Deltas without a TextComplete get a synthesized completion
        // before the end.
        let complete = signals
            .iter()
            .position(|s| s.name == "text:complete")
            .unwrap();
        assert_eq!(signals[complete].payload["content"], json!("done"));
        assert_eq!(signals.last().unwrap().name, "provider:end");
    }

    #[tokio::test]
    async fn orphan_tool_result_is_a_violation() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, seen) = recording_hub();
        let provider = ScriptedProvider::new("scripted").with_messages(vec![
            ProviderMessage::ToolResult {
                tool_use_id: "ghost".into(),
                content: json!(null),
                is_error: false,
            },
        ]);

        let err = run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Disabled)),
            &provider,
            &ProviderRequest::new("scripted", "go"),
            &Interrupt::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Internal(_)));
        // The bracket still closes.
        let observed = names(&seen);
        assert!(observed.contains(&"provider:error".to_owned()));
        assert_eq!(observed.last().unwrap(), "provider:end");
    }

    #[tokio::test]
    async fn duplicate_text_complete_is_a_violation() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _seen) = recording_hub();
        let provider = ScriptedProvider::new("scripted").with_messages(vec![
            ProviderMessage::TextComplete { content: Some("a".into()) },
            ProviderMessage::TextComplete { content: Some("b".into()) },
        ]);

        let err = run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Disabled)),
            &provider,
            &ProviderRequest::new("scripted", "go"),
            &Interrupt::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn abort_between_messages_emits_synthetic_end() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, seen) = recording_hub();
        let provider = ScriptedProvider::say("slow", "a b c d e f")
            .with_delay(Duration::from_millis(20));
        let interrupt = Interrupt::new();

        let stopper = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.abort();
        });

        let result = run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Disabled)),
            &provider,
            &ProviderRequest::new("scripted", "slow"),
            &interrupt,
        )
        .await
        .unwrap();

        assert!(result.aborted);
        let signals = seen.lock();
        let end = signals.last().unwrap();
        assert_eq!(end.name, "provider:end");
        assert_eq!(end.payload["aborted"], json!(true));
        // Not all six deltas made it out.
        let deltas = signals.iter().filter(|s| s.name == "text:delta").count();
        assert!(deltas < 6);
    }

    #[tokio::test]
    async fn pause_interrupts_like_abort() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _seen) = recording_hub();
        let provider = ScriptedProvider::say("x", "a b");
        let interrupt = Interrupt::new();
        interrupt.pause();

        let result = run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Disabled)),
            &provider,
            &ProviderRequest::new("scripted", "x"),
            &interrupt,
        )
        .await
        .unwrap();
        assert!(result.aborted);
    }

    #[tokio::test]
    async fn record_then_replay_same_names_and_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let request = ProviderRequest::new("scripted", "say hello");
        let provider = ScriptedProvider::say("hello", "He llo wo rld !");

        let (hub, live_seen) = recording_hub();
        let live_result = run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Record)),
            &provider,
            &request,
            &Interrupt::new(),
        )
        .await
        .unwrap();

        let (hub2, replay_seen) = recording_hub();
        let replay_result = run_provider(
            &hub2,
            Some(&recorder(dir.path(), RecorderMode::Replay)),
            &provider,
            &request,
            &Interrupt::new(),
        )
        .await
        .unwrap();

        let live: Vec<(String, Value)> = live_seen
            .lock()
            .iter()
            .map(|s| (s.name.clone(), s.payload.clone()))
            .collect();
        let replayed: Vec<(String, Value)> = replay_seen
            .lock()
            .iter()
            .map(|s| (s.name.clone(), s.payload.clone()))
            .collect();
        assert_eq!(live, replayed);
        assert_eq!(live_result.output, replay_result.output);
        assert_eq!(live_result.usage, replay_result.usage);
    }

    #[tokio::test]
    async fn replay_missing_recording_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _seen) = recording_hub();
        let err = run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Replay)),
            &ScriptedProvider::say("x", "a"),
            &ProviderRequest::new("scripted", "never recorded"),
            &Interrupt::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn thinking_stream_discipline() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, seen) = recording_hub();
        let provider = ScriptedProvider::new("scripted").with_messages(vec![
            ProviderMessage::ThinkingDelta { text: "hm".into() },
            ProviderMessage::ThinkingDelta { text: "m".into() },
            ProviderMessage::ThinkingComplete { content: None },
            ProviderMessage::TextComplete { content: Some("answer".into()) },
            ProviderMessage::Done {
                output: None,
                usage: None,
                cost_usd: None,
            },
        ]);

        run_provider(
            &hub,
            Some(&recorder(dir.path(), RecorderMode::Disabled)),
            &provider,
            &ProviderRequest::new("scripted", "think"),
            &Interrupt::new(),
        )
        .await
        .unwrap();

        let signals = seen.lock();
        let complete = signals
            .iter()
            .find(|s| s.name == "thinking:complete")
            .unwrap();
        assert_eq!(complete.payload["content"], json!("hmm"));
    }
}

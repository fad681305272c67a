//! End-to-end scenarios for the session runtime: ordering, scoped
//! context, pause/resume, HITL correlation, replay equivalence, and
//! bounded parallelism.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use orchid_domain::{Event, Signal};
use orchid_hub::Hub;
use orchid_providers::ScriptedProvider;
use orchid_sessions::{
    Ctx, Dispatcher, ParallelOptions, PromptOptions, Session, SessionConfig, SessionStatus,
};
use orchid_store::{Recorder, RecorderMode, SignalStore};

fn collect_all(hub: &Hub) -> Arc<Mutex<Vec<Signal>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let sub = hub.subscribe_all(move |signal: &Signal| {
        seen2.lock().push(signal.clone());
    });
    std::mem::forget(sub);
    seen
}

fn names(seen: &Arc<Mutex<Vec<Signal>>>) -> Vec<String> {
    seen.lock().iter().map(|s| s.name.clone()).collect()
}

fn value_session(id: &str, config: SessionConfig) -> Arc<Session<Value>> {
    Session::create(id, json!({}), |_| Value::Null, config)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — emit + subscribe ordering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn s1_filtered_subscriber_sees_only_matching() {
    let hub = Hub::new("s");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let _sub = hub.subscribe("agent:*", move |signal: &Signal| {
        seen2.lock().push(signal.name.clone());
    });

    hub.emit(Event::new("agent:start", json!({ "name": "p" })));
    hub.emit(Event::new("harness:start", json!({})));

    assert_eq!(*seen.lock(), vec!["agent:start".to_owned()]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — scoped context on emissions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_phase_and_task_scope_emissions() {
    let session = value_session("s-scope", SessionConfig::default());
    let seen = collect_all(session.hub());

    session
        .run(|ctx: Ctx<Value>| async move {
            ctx.phase("plan", || async {
                ctx.task("T-1", || async {
                    ctx.emit("narrative", json!({ "text": "x" }));
                    Ok(json!(null))
                })
                .await
            })
            .await?;
            Ok(Value::Null)
        })
        .await
        .unwrap();

    let signals = seen.lock();
    let narrative = signals.iter().find(|s| s.name == "narrative").unwrap();
    assert_eq!(narrative.context.session_id.as_deref(), Some("s-scope"));
    assert_eq!(narrative.context.phase.as_ref().unwrap().name, "plan");
    assert_eq!(narrative.context.phase.as_ref().unwrap().number, 1);
    assert_eq!(narrative.context.task.as_ref().unwrap().id, "T-1");

    // The phase bracket itself is not task-scoped.
    let phase_start = signals.iter().find(|s| s.name == "phase:start").unwrap();
    assert!(phase_start.context.task.is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — pause / resume cycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_pause_resume_with_injected_message() {
    let session = value_session("s-pause", SessionConfig::default());
    let seen = collect_all(session.hub());

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .run(|ctx: Ctx<Value>| async move {
                    loop {
                        ctx.checkpoint().await?;
                        if ctx.has_messages() {
                            let messages = ctx.read_messages();
                            return Ok(json!(messages[0].content));
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(session.pause());
    assert_eq!(session.status(), SessionStatus::Paused);
    // Idempotency: a second pause is a no-op.
    assert!(!session.pause());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.resume(Some("continue".into())));
    assert!(!session.resume(None));

    let result = runner.await.unwrap().unwrap();
    assert_eq!(result, json!("continue"));
    assert_eq!(session.status(), SessionStatus::Complete);

    let observed = names(&seen);
    let paused = observed.iter().position(|n| n == "flow:paused").unwrap();
    let message = observed.iter().position(|n| n == "session:message").unwrap();
    let resumed = observed.iter().position(|n| n == "flow:resumed").unwrap();
    let complete = observed
        .iter()
        .position(|n| n == "harness:complete")
        .unwrap();
    assert!(paused < message && message < resumed && resumed < complete);

    let signals = seen.lock();
    let message_signal = &signals[message];
    assert_eq!(message_signal.payload["content"], json!("continue"));
    let complete_signal = &signals[complete];
    assert_eq!(complete_signal.payload["success"], json!(true));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — HITL correlation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s4_prompt_reply_correlation() {
    let session = value_session("s-hitl", SessionConfig::interactive());
    let seen = collect_all(session.hub());

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .run(|ctx: Ctx<Value>| async move {
                    let answer = ctx
                        .wait_for_user(
                            "approve?",
                            PromptOptions::default().with_choices(["yes", "no"]),
                        )
                        .await?;
                    Ok(json!(answer))
                })
                .await
        })
    };

    // Wait for the carrier signal, then reply out-of-band.
    let prompt_id = loop {
        if let Some(prompt) = seen
            .lock()
            .iter()
            .find(|s| s.name == "session:prompt")
            .cloned()
        {
            break prompt.payload["promptId"].as_str().unwrap().to_owned();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    session.reply(&prompt_id, "yes").unwrap();
    let result = runner.await.unwrap().unwrap();
    assert_eq!(result, json!("yes"));

    let signals = seen.lock();
    let carrier = signals.iter().find(|s| s.name == "session:prompt").unwrap();
    assert_eq!(carrier.payload["prompt"], json!("approve?"));
    assert_eq!(carrier.payload["choices"], json!(["yes", "no"]));

    let replies: Vec<&Signal> = signals.iter().filter(|s| s.name == "session:reply").collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].payload["content"], json!("yes"));
    assert_eq!(replies[0].caused_by, Some(carrier.id));
}

#[tokio::test]
async fn hitl_validator_reasks_until_valid() {
    let session = value_session("s-validate", SessionConfig::interactive());
    let seen = collect_all(session.hub());

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .run(|ctx: Ctx<Value>| async move {
                    let answer = ctx
                        .wait_for_user(
                            "pick a number",
                            PromptOptions::default().with_validator(|r| {
                                r.parse::<u32>()
                                    .is_err()
                                    .then(|| "not a number".to_owned())
                            }),
                        )
                        .await?;
                    Ok(json!(answer))
                })
                .await
        })
    };

    let prompt_id = loop {
        if let Some(prompt) = seen
            .lock()
            .iter()
            .find(|s| s.name == "session:prompt")
            .cloned()
        {
            break prompt.payload["promptId"].as_str().unwrap().to_owned();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    // Invalid reply surfaces a validation error and keeps the prompt.
    let err = session.reply(&prompt_id, "banana").unwrap_err();
    assert!(matches!(err, orchid_domain::Error::Validation(_)));

    session.reply(&prompt_id, "17").unwrap();
    assert_eq!(runner.await.unwrap().unwrap(), json!("17"));
}

#[tokio::test]
async fn hitl_timeout_rejects_without_killing_session() {
    let session = value_session("s-timeout", SessionConfig::interactive());

    let result = session
        .run(|ctx: Ctx<Value>| async move {
            let outcome = ctx
                .wait_for_user(
                    "anyone there?",
                    PromptOptions::default().with_timeout(Duration::from_millis(30)),
                )
                .await;
            match outcome {
                Err(e) if e.is_timeout() => Ok(json!("timed out, moving on")),
                other => other.map(Value::from),
            }
        })
        .await
        .unwrap();

    assert_eq!(result, json!("timed out, moving on"));
    assert_eq!(session.status(), SessionStatus::Complete);
    assert_eq!(session.pending_prompts(), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Abort semantics (invariant 7)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn abort_rejects_prompts_and_silences_the_hub() {
    let session = value_session("s-abort", SessionConfig::interactive());
    let seen = collect_all(session.hub());

    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .run(|ctx: Ctx<Value>| async move {
                    let answer = ctx
                        .wait_for_user("approve?", PromptOptions::default())
                        .await?;
                    Ok(json!(answer))
                })
                .await
        })
    };

    // Let the workflow reach the prompt.
    while session.pending_prompts() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(session.abort(Some("operator stop")));
    let err = runner.await.unwrap().unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(session.status(), SessionStatus::Aborted);

    // session:abort is the final signal — nothing after it.
    let observed = names(&seen);
    assert_eq!(observed.last().unwrap(), "session:abort");
    assert!(!observed.contains(&"harness:complete".to_owned()));

    // Message queue is drained and closed.
    assert!(session.send_message("late", None).is_err());
    // Abort is idempotent.
    assert!(!session.abort(None));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — replay equivalence through the session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_session_replay_matches_live_run() {
    let dir = tempfile::tempdir().unwrap();
    let request = orchid_domain::ProviderRequest::new("scripted", "greet");
    let provider = ScriptedProvider::say("scripted", "H e l l o");

    let run_once = |mode: RecorderMode, id: &'static str| {
        let dir = dir.path().to_owned();
        let request = request.clone();
        let provider = provider.clone();
        async move {
            let session = value_session(id, SessionConfig::default());
            session.set_recorder(Arc::new(Recorder::open(dir, mode).unwrap()));
            let seen = collect_all(session.hub());
            let provider = provider.clone();
            let request = request.clone();
            session
                .run(move |ctx: Ctx<Value>| async move {
                    let result = ctx.run_provider(&provider, &request).await?;
                    Ok(result.output)
                })
                .await
                .unwrap();
            let result = seen
                .lock()
                .iter()
                .filter(|s| {
                    s.name.starts_with("provider:") || s.name.starts_with("text:")
                })
                .map(|s| (s.name.clone(), s.payload.clone()))
                .collect::<Vec<_>>();
            result
        }
    };

    let live = run_once(RecorderMode::Record, "s-live").await;
    let replayed = run_once(RecorderMode::Replay, "s-replay").await;

    assert_eq!(live, replayed);
    let deltas = live.iter().filter(|(n, _)| n == "text:delta").count();
    assert_eq!(deltas, 5);
    let (_, complete) = live.iter().find(|(n, _)| n == "text:complete").unwrap();
    assert_eq!(complete["content"], json!("H e l l o"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — parallel with bounded concurrency
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s6_parallel_caps_in_flight_at_two() {
    let session = value_session("s-par", SessionConfig::default());
    let seen = collect_all(session.hub());

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let items: Vec<orchid_sessions::WorkItem<u32>> = (0..4u32)
        .map(|i| {
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(25)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(i * 10)
            }) as orchid_sessions::WorkItem<u32>
        })
        .collect();

    let results = session
        .run(move |ctx: Ctx<Value>| async move {
            let values = ctx
                .parallel("p", items, ParallelOptions { concurrency: 2 })
                .await?;
            Ok(json!(values))
        })
        .await
        .unwrap();

    assert_eq!(results, json!([0, 10, 20, 30]));
    assert!(max_in_flight.load(Ordering::SeqCst) <= 2);

    let signals = seen.lock();
    let completions: Vec<&Signal> = signals
        .iter()
        .filter(|s| s.name == "parallel:item:complete")
        .collect();
    assert_eq!(completions.len(), 4);
    for (i, signal) in completions.iter().enumerate() {
        assert_eq!(signal.payload["completed"], json!(i + 1));
        assert_eq!(signal.payload["total"], json!(4));
    }
    let done = signals
        .iter()
        .find(|s| s.name == "parallel:complete")
        .unwrap();
    assert_eq!(done.payload["total"], json!(4));
    assert!(done.payload.get("failed").is_none());
}

#[tokio::test]
async fn parallel_failure_cancels_and_rethrows() {
    let session = value_session("s-par-fail", SessionConfig::default());
    let seen = collect_all(session.hub());
    let survivors = Arc::new(AtomicUsize::new(0));

    let mut items: Vec<orchid_sessions::WorkItem<u32>> = Vec::new();
    items.push(Box::pin(async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Err(orchid_domain::Error::Validation("bad item".into()))
    }));
    for _ in 0..3 {
        let survivors = Arc::clone(&survivors);
        items.push(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            survivors.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }));
    }

    let err = session
        .run(move |ctx: Ctx<Value>| async move {
            ctx.parallel("p", items, ParallelOptions { concurrency: 2 })
                .await?;
            Ok(Value::Null)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, orchid_domain::Error::Validation(_)));

    // In-flight and unstarted items were cancelled.
    assert_eq!(survivors.load(Ordering::SeqCst), 0);
    let observed = names(&seen);
    let complete = observed
        .iter()
        .position(|n| n == "parallel:complete")
        .unwrap();
    let signals = seen.lock();
    assert_eq!(signals[complete].payload["failed"], json!(true));
    // The failure is recorded as a failed harness completion.
    let harness = signals
        .iter()
        .find(|s| s.name == "harness:complete")
        .unwrap();
    assert_eq!(harness.payload["success"], json!(false));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry signals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn retry_emits_backoff_then_success() {
    let session = value_session("s-retry", SessionConfig::default());
    let seen = collect_all(session.hub());
    let attempts = Arc::new(AtomicUsize::new(0));

    let attempts2 = Arc::clone(&attempts);
    session
        .run(move |ctx: Ctx<Value>| async move {
            let attempts = attempts2;
            let value = ctx
                .retry(
                    "flaky",
                    orchid_sessions::RetryOptions {
                        retries: 3,
                        min_timeout: Duration::from_millis(1),
                        max_timeout: Duration::from_millis(5),
                    },
                    move || {
                        let attempts = Arc::clone(&attempts);
                        async move {
                            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                                Err(orchid_domain::Error::provider("mock", "flaky"))
                            } else {
                                Ok(json!("third time lucky"))
                            }
                        }
                    },
                )
                .await?;
            Ok(value)
        })
        .await
        .unwrap();

    let observed = names(&seen);
    let backoffs = observed.iter().filter(|n| *n == "retry:backoff").count();
    assert_eq!(backoffs, 2);
    assert!(observed.contains(&"retry:success".to_owned()));
    assert!(!observed.contains(&"retry:failure".to_owned()));

    let signals = seen.lock();
    let start = signals.iter().find(|s| s.name == "retry:start").unwrap();
    assert_eq!(start.payload["maxAttempts"], json!(3));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable recording + dispatch snapshots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Default)]
struct Tally {
    ticks: u32,
    notes: Vec<String>,
}

#[tokio::test]
async fn recorded_session_supports_at_position_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SignalStore::open(dir.path()).unwrap());

    let dispatcher = || {
        Dispatcher::<Tally>::new()
            .reducer("tick", |state, _| state.ticks += 1)
            .reducer("note", |state, signal| {
                let text = signal.payload["text"].as_str().unwrap_or_default();
                state.notes.push(text.to_owned());
            })
    };

    let session = Session::create(
        "s-durable",
        json!({}),
        |_| Tally::default(),
        SessionConfig::default(),
    );
    session.install_dispatcher(dispatcher());
    let recording_id = session.record_to(&store).unwrap();

    session
        .run(|ctx: Ctx<Tally>| async move {
            ctx.emit("tick", json!({}));
            ctx.emit("note", json!({ "text": "first" }));
            ctx.emit("tick", json!({}));
            Ok(Value::Null)
        })
        .await
        .unwrap();

    assert_eq!(session.state_snapshot().ticks, 2);

    // The log is finalized and ordered; ids are strictly increasing.
    let recording = store.load(&recording_id).unwrap();
    assert_eq!(
        recording.meta.status,
        orchid_store::RecordingStatus::Finalized
    );
    for pair in recording.signals.windows(2) {
        assert!(pair[0].id < pair[1].id);
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }

    // At-position snapshots fold the log through the same reducers.
    let upto = recording
        .signals
        .iter()
        .position(|s| s.name == "note")
        .unwrap()
        + 1;
    let partial = dispatcher().replay_state(Tally::default(), &recording.signals, Some(upto));
    assert_eq!(partial.ticks, 1);
    assert_eq!(partial.notes, vec!["first".to_owned()]);

    let full = dispatcher().replay_state(Tally::default(), &recording.signals, None);
    assert_eq!(full.ticks, 2);
}

#[tokio::test]
async fn handler_followups_dispatch_in_fifo_order() {
    let session = Session::create(
        "s-followup",
        json!({}),
        |_| Tally::default(),
        SessionConfig::default(),
    );
    let seen = collect_all(session.hub());

    session.install_dispatcher(
        Dispatcher::<Tally>::new()
            .reducer("tick", |state, _| state.ticks += 1)
            .handler("tick", |state, _| {
                if state.ticks == 1 {
                    vec![
                        Event::new("audit:one", json!({})),
                        Event::new("audit:two", json!({})),
                    ]
                } else {
                    vec![]
                }
            }),
    );

    session
        .run(|ctx: Ctx<Tally>| async move {
            ctx.emit("tick", json!({}));
            Ok(Value::Null)
        })
        .await
        .unwrap();

    let observed = names(&seen);
    let tick = observed.iter().position(|n| n == "tick").unwrap();
    let one = observed.iter().position(|n| n == "audit:one").unwrap();
    let two = observed.iter().position(|n| n == "audit:two").unwrap();
    assert!(tick < one && one < two);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execute-form workflows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn step_stream(
    steps: Vec<orchid_sessions::StepYield>,
) -> impl futures_util::Stream<Item = orchid_sessions::StepYield> + Send {
    futures_util::stream::iter(steps)
}

#[tokio::test]
async fn execute_form_records_step_yields() {
    use orchid_sessions::StepYield;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SignalStore::open(dir.path()).unwrap());
    let session = value_session("s-steps", SessionConfig::default());
    let recording_id = session.record_to(&store).unwrap();

    let steps = vec![
        StepYield::new("plan").with_input(json!({ "goal": "ship" })),
        StepYield::new("build").with_output(json!({ "artifact": "a.tar" })),
    ];
    let result = session.run_steps(step_stream(steps), None).await.unwrap();
    assert_eq!(result, json!({ "artifact": "a.tar" }));

    let recording = store.load(&recording_id).unwrap();
    let yields = StepYield::from_signals(&recording.signals);
    assert_eq!(yields.len(), 2);
    assert_eq!(yields[0].step, "plan");
    assert_eq!(yields[1].step, "build");
}

#[tokio::test]
async fn execute_form_replay_matches_positionally() {
    use orchid_sessions::StepYield;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SignalStore::open(dir.path()).unwrap());

    let steps = || {
        vec![
            StepYield::new("plan"),
            StepYield::new("build").with_output(json!(1)),
        ]
    };

    // First run records the step log.
    let first = value_session("s-steps-1", SessionConfig::default());
    let recording_id = first.record_to(&store).unwrap();
    first.run_steps(step_stream(steps()), None).await.unwrap();
    let log = StepYield::from_signals(&store.load(&recording_id).unwrap().signals);

    // A matching re-execution succeeds deterministically.
    let second = value_session("s-steps-2", SessionConfig::default());
    second
        .run_steps(step_stream(steps()), Some(log.clone()))
        .await
        .unwrap();

    // A diverging step sequence fails validation at its position.
    let third = value_session("s-steps-3", SessionConfig::default());
    let err = third
        .run_steps(
            step_stream(vec![StepYield::new("plan"), StepYield::new("deploy")]),
            Some(log),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, orchid_domain::Error::Validation(_)));
}

#[tokio::test]
async fn end_when_terminates_signal_driven_workflow() {
    let session = Session::create(
        "s-endwhen",
        json!({}),
        |_| Tally::default(),
        SessionConfig::default(),
    );
    session.install_dispatcher(
        Dispatcher::<Tally>::new()
            .reducer("tick", |state, _| state.ticks += 1)
            .end_when(|state| state.ticks >= 3),
    );

    let result = session
        .run(|ctx: Ctx<Tally>| async move {
            let emitter = ctx.clone();
            tokio::spawn(async move {
                for _ in 0..3 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    emitter.emit("tick", json!({}));
                }
            });
            ctx.until_end().await;
            Ok(json!(ctx.state().ticks))
        })
        .await
        .unwrap();

    assert_eq!(result, json!(3));
}

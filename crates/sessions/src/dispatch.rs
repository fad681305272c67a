//! Reducer / handler / process-manager dispatch.
//!
//! Registration maps a pattern to an ordered function list per tier.
//! For each signal, in emission order: reducers mutate a draft copy of
//! the state (committed after the tier, so every reducer of one signal
//! sees the pre-signal state); handlers mutate the committed state and
//! may return follow-up events; process managers are read-only and may
//! return follow-up events. Follow-ups enqueue FIFO through the hub's
//! micro-queue and repeat the loop. This is the only place session
//! state changes.

use orchid_domain::{Event, Filter, KnownPayload, Signal};

pub type Reducer<S> = Box<dyn Fn(&mut S, &Signal) + Send + Sync>;
pub type Handler<S> = Box<dyn Fn(&mut S, &Signal) -> Vec<Event> + Send + Sync>;
pub type ProcessManager<S> = Box<dyn Fn(&S, &Signal) -> Vec<Event> + Send + Sync>;
pub type EndWhen<S> = Box<dyn Fn(&S) -> bool + Send + Sync>;

/// What one dispatch produced.
pub struct DispatchOutcome {
    /// Follow-up events to emit, in order.
    pub followups: Vec<Event>,
    /// Whether the `end_when` predicate fired on the post-dispatch
    /// state.
    pub ended: bool,
}

/// Per-signal dispatch over a session's state.
pub struct Dispatcher<S> {
    reducers: Vec<(Filter, Reducer<S>)>,
    handlers: Vec<(Filter, Handler<S>)>,
    processes: Vec<(Filter, ProcessManager<S>)>,
    end_when: Option<EndWhen<S>>,
}

impl<S: Clone + PartialEq> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone + PartialEq> Dispatcher<S> {
    pub fn new() -> Self {
        Self {
            reducers: Vec::new(),
            handlers: Vec::new(),
            processes: Vec::new(),
            end_when: None,
        }
    }

    /// Register a reducer: state mutation only, no emissions.
    pub fn reducer<F>(mut self, filter: impl Into<Filter>, f: F) -> Self
    where
        F: Fn(&mut S, &Signal) + Send + Sync + 'static,
    {
        self.reducers.push((filter.into(), Box::new(f)));
        self
    }

    /// Register a handler: may mutate state and return follow-ups.
    pub fn handler<F>(mut self, filter: impl Into<Filter>, f: F) -> Self
    where
        F: Fn(&mut S, &Signal) -> Vec<Event> + Send + Sync + 'static,
    {
        self.handlers.push((filter.into(), Box::new(f)));
        self
    }

    /// Register a process manager: read-only on state, returns
    /// follow-ups. Read-only is a contract — debug builds verify it.
    pub fn process<F>(mut self, filter: impl Into<Filter>, f: F) -> Self
    where
        F: Fn(&S, &Signal) -> Vec<Event> + Send + Sync + 'static,
    {
        self.processes.push((filter.into(), Box::new(f)));
        self
    }

    /// Declare workflow completion as a predicate over state.
    pub fn end_when<F>(mut self, f: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.end_when = Some(Box::new(f));
        self
    }

    /// Run all three tiers for one signal.
    pub fn dispatch(&self, state: &mut S, signal: &Signal) -> DispatchOutcome {
        // Well-known payloads are validated at this boundary; a known
        // name with a malformed payload still dispatches, but loudly.
        if let Err(malformed) = KnownPayload::parse(&signal.name, &signal.payload) {
            tracing::warn!(
                name = %malformed.name,
                error = %malformed.error,
                "malformed well-known payload"
            );
        }

        // Reducers work on a draft; commit after the tier so each
        // reducer of this signal observes the pre-signal state only
        // through its own mutations.
        if !self.reducers.is_empty() {
            let mut draft = state.clone();
            for (filter, reducer) in &self.reducers {
                if filter.matches(&signal.name) {
                    reducer(&mut draft, signal);
                }
            }
            *state = draft;
        }

        let mut followups = Vec::new();
        for (filter, handler) in &self.handlers {
            if filter.matches(&signal.name) {
                followups.extend(handler(state, signal));
            }
        }

        #[cfg(debug_assertions)]
        let before_processes = state.clone();
        for (filter, process) in &self.processes {
            if filter.matches(&signal.name) {
                followups.extend(process(state, signal));
            }
        }
        #[cfg(debug_assertions)]
        debug_assert!(
            *state == before_processes,
            "process manager mutated session state"
        );

        let ended = self.end_when.as_ref().is_some_and(|f| f(state));
        DispatchOutcome { followups, ended }
    }

    /// Fold a recorded signal log into a state snapshot, stopping after
    /// `up_to` signals when given. Follow-ups are not re-emitted — a
    /// recorded log already contains them.
    pub fn replay_state(&self, initial: S, signals: &[Signal], up_to: Option<usize>) -> S {
        let take = up_to.unwrap_or(signals.len()).min(signals.len());
        let mut state = initial;
        for signal in &signals[..take] {
            let _ = self.dispatch(&mut state, signal);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orchid_domain::EventContext;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct CounterState {
        ticks: u32,
        completions: u32,
        log: Vec<String>,
    }

    fn signal(id: u64, name: &str) -> Signal {
        Signal {
            id,
            name: name.into(),
            payload: json!({}),
            timestamp: Utc::now(),
            context: EventContext::for_session("s"),
            source: None,
            caused_by: None,
            display: None,
        }
    }

    #[test]
    fn reducers_run_in_registration_order_on_a_draft() {
        let dispatcher: Dispatcher<CounterState> = Dispatcher::new()
            .reducer("tick", |state: &mut CounterState, _| {
                state.ticks += 1;
                state.log.push("first".into());
            })
            .reducer("tick", |state: &mut CounterState, _| {
                state.log.push(format!("second saw {}", state.ticks));
            });

        let mut state = CounterState::default();
        dispatcher.dispatch(&mut state, &signal(1, "tick"));
        assert_eq!(state.ticks, 1);
        // Second reducer runs on the same draft, after the first.
        assert_eq!(state.log, vec!["first", "second saw 1"]);
    }

    #[test]
    fn handlers_emit_followups() {
        let dispatcher: Dispatcher<CounterState> = Dispatcher::new()
            .handler("task:complete", |state: &mut CounterState, _| {
                state.completions += 1;
                vec![Event::new("milestone:check", json!({}))]
            });

        let mut state = CounterState::default();
        let outcome = dispatcher.dispatch(&mut state, &signal(1, "task:complete"));
        assert_eq!(state.completions, 1);
        assert_eq!(outcome.followups.len(), 1);
        assert_eq!(outcome.followups[0].name, "milestone:check");
    }

    #[test]
    fn process_managers_are_read_only_and_emit() {
        let dispatcher: Dispatcher<CounterState> = Dispatcher::new()
            .process("tick", |state: &CounterState, _| {
                if state.ticks == 0 {
                    vec![Event::new("tick:first", json!({}))]
                } else {
                    vec![]
                }
            });

        let mut state = CounterState::default();
        let outcome = dispatcher.dispatch(&mut state, &signal(1, "tick"));
        assert_eq!(outcome.followups.len(), 1);
        assert_eq!(state, CounterState::default());
    }

    #[test]
    fn non_matching_signals_touch_nothing() {
        let dispatcher: Dispatcher<CounterState> =
            Dispatcher::new().reducer("tick", |state: &mut CounterState, _| state.ticks += 1);
        let mut state = CounterState::default();
        dispatcher.dispatch(&mut state, &signal(1, "other"));
        assert_eq!(state.ticks, 0);
    }

    #[test]
    fn end_when_fires_on_post_dispatch_state() {
        let dispatcher: Dispatcher<CounterState> = Dispatcher::new()
            .reducer("tick", |state: &mut CounterState, _| state.ticks += 1)
            .end_when(|state| state.ticks >= 2);

        let mut state = CounterState::default();
        assert!(!dispatcher.dispatch(&mut state, &signal(1, "tick")).ended);
        assert!(dispatcher.dispatch(&mut state, &signal(2, "tick")).ended);
    }

    #[test]
    fn replay_state_folds_up_to_position() {
        let dispatcher: Dispatcher<CounterState> =
            Dispatcher::new().reducer("tick", |state: &mut CounterState, _| state.ticks += 1);
        let signals: Vec<Signal> = (1..=5).map(|i| signal(i, "tick")).collect();

        let full = dispatcher.replay_state(CounterState::default(), &signals, None);
        assert_eq!(full.ticks, 5);

        let partial = dispatcher.replay_state(CounterState::default(), &signals, Some(2));
        assert_eq!(partial.ticks, 2);

        let clamped = dispatcher.replay_state(CounterState::default(), &signals, Some(99));
        assert_eq!(clamped.ticks, 5);
    }

    #[test]
    fn glob_filters_apply_per_tier() {
        let dispatcher: Dispatcher<CounterState> = Dispatcher::new()
            .reducer("task:*", |state: &mut CounterState, _| state.ticks += 1)
            .handler("task:**", |_, signal| {
                vec![Event::new("audit", json!({ "of": signal.name }))]
            });

        let mut state = CounterState::default();
        let outcome = dispatcher.dispatch(&mut state, &signal(1, "task:retry:start"));
        // `task:*` stays within one segment, `task:**` crosses.
        assert_eq!(state.ticks, 0);
        assert_eq!(outcome.followups.len(), 1);
    }
}

//! Shared application state passed to all API handlers.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use orchid_domain::Result;
use orchid_sessions::{Session, SessionConfig};
use orchid_store::{Recorder, SignalStore};

use crate::config::Config;
use crate::demo;
use crate::registry::{SessionHandle, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Durable session recordings.
    pub store: Arc<SignalStore>,
    /// Fingerprint-keyed provider run recordings.
    pub recorder: Arc<Recorder>,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let store = Arc::new(SignalStore::open(
            config.storage.data_dir.join("recordings"),
        )?);
        let recorder = Arc::new(Recorder::open(
            config.storage.data_dir.join("replays"),
            config.recording.mode,
        )?);
        Ok(Self {
            config,
            store,
            recorder,
            registry: Arc::new(SessionRegistry::new()),
        })
    }

    /// Create a recorded session, spawn the workflow, and register the
    /// handle. Returns the session id.
    pub fn start_session(&self, input: Value) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let session = Session::create(
            session_id.clone(),
            input,
            |_| Value::Null,
            SessionConfig {
                interactive: self.config.session.interactive,
                default_prompt_timeout: self.config.prompt_timeout(),
                run_timeout: self.config.run_timeout(),
            },
        );
        session.set_recorder(Arc::clone(&self.recorder));

        let dispatcher = Arc::new(demo::dispatcher());
        session.install_dispatcher(demo::dispatcher());
        let recording_id = session.record_to(&self.store)?;

        let handle = SessionHandle::new(
            Arc::clone(&session),
            Arc::clone(&self.store),
            recording_id,
            dispatcher,
        );
        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                if let Err(e) = session.run(demo::workflow).await {
                    tracing::warn!(session_id = %session.id(), error = %e, "workflow failed");
                }
            })
        };
        handle.set_task(task);
        self.registry.insert(handle);
        Ok(session_id)
    }

    /// Fork a session's recording into a fresh session. A log
    /// operation — nothing re-executes; the fork continues live on the
    /// copied log.
    pub fn fork_session(
        &self,
        session_id: &str,
        position: Option<usize>,
    ) -> Result<(String, usize)> {
        let source = self
            .registry
            .get(session_id)
            .ok_or_else(|| orchid_domain::Error::NotFound(format!("session {session_id}")))?;

        let new_session_id = Uuid::new_v4().to_string();
        let (fork_recording_id, copied) = self.store.fork(
            &source.recording_id,
            position,
            orchid_store::NewRecording::named(new_session_id.clone()).with_tag("fork"),
        )?;

        let forked = self.store.load(&fork_recording_id)?;
        let next_signal_id = forked.signals.last().map(|s| s.id + 1).unwrap_or(1);

        let session = Session::create(
            new_session_id.clone(),
            source.session.input().clone(),
            |_| Value::Null,
            SessionConfig {
                interactive: self.config.session.interactive,
                default_prompt_timeout: self.config.prompt_timeout(),
                run_timeout: self.config.run_timeout(),
            },
        );
        session.set_recorder(Arc::clone(&self.recorder));
        session.install_dispatcher(demo::dispatcher());
        session.continue_recording(&self.store, fork_recording_id.clone(), next_signal_id);

        let handle = SessionHandle::new(
            session,
            Arc::clone(&self.store),
            fork_recording_id,
            Arc::clone(&source.dispatcher),
        );
        self.registry.insert(handle);
        Ok((new_session_id, copied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app_state(dir: &std::path::Path) -> AppState {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_path_buf();
        config.session.interactive = false;
        AppState::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn start_session_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path());

        let session_id = state
            .start_session(json!({ "message": "hello world" }))
            .unwrap();
        let handle = state.registry.get(&session_id).unwrap();

        while handle.session.status() != orchid_sessions::SessionStatus::Complete {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // The recording is finalized and contains the provider bracket.
        let recording = state.store.load(&handle.recording_id).unwrap();
        assert_eq!(
            recording.meta.status,
            orchid_store::RecordingStatus::Finalized
        );
        let names: Vec<&str> = recording.signals.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"provider:start"));
        assert!(names.contains(&"provider:end"));
        assert_eq!(names.last().unwrap(), &"harness:complete");
        // The durable log satisfies the stream contract end to end.
        assert!(orchid_store::check(&recording.signals).is_empty());

        // Current state reflects the reducers.
        let snapshot = handle.state_at(None);
        assert_eq!(snapshot["text"], json!("hello world"));

        // At-position state folds a prefix of the log.
        let early = handle.state_at(Some(1));
        assert_eq!(early["signals"], json!(1));
    }

    #[tokio::test]
    async fn fork_copies_prefix_and_stays_live() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path());

        let session_id = state.start_session(json!({ "message": "hi" })).unwrap();
        let handle = state.registry.get(&session_id).unwrap();
        while handle.session.status() != orchid_sessions::SessionStatus::Complete {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let (fork_id, copied) = state.fork_session(&session_id, Some(3)).unwrap();
        assert_eq!(copied, 3);
        let fork = state.registry.get(&fork_id).unwrap();
        assert!(!fork.running());

        // Live emissions continue on the forked log with fresh ids.
        let signal = fork
            .session
            .hub()
            .emit(orchid_domain::Event::new("narrative", json!({ "text": "forked" })));
        assert!(signal.id > 3);

        let forked_log = state.store.load(&fork.recording_id).unwrap();
        assert_eq!(forked_log.signals.len(), 4);
    }

    #[tokio::test]
    async fn fork_unknown_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path());
        assert!(matches!(
            state.fork_session("ghost", None).unwrap_err(),
            orchid_domain::Error::NotFound(_)
        ));
    }
}

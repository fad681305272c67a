//! The gateway's session registry.
//!
//! Maps session ids to handles carrying the session, its durable
//! recording, and the dispatcher used for at-position state snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;

use orchid_sessions::{Dispatcher, Session, SessionStatus};
use orchid_store::SignalStore;

/// One gateway-hosted session.
pub struct SessionHandle {
    pub session: Arc<Session<Value>>,
    pub store: Arc<SignalStore>,
    pub recording_id: String,
    /// Folds recorded signals into at-position state snapshots.
    pub dispatcher: Arc<Dispatcher<Value>>,
    /// The spawned workflow task, if one is running.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn new(
        session: Arc<Session<Value>>,
        store: Arc<SignalStore>,
        recording_id: String,
        dispatcher: Arc<Dispatcher<Value>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            store,
            recording_id,
            dispatcher,
            task: Mutex::new(None),
        })
    }

    pub fn set_task(&self, task: JoinHandle<()>) {
        *self.task.lock() = Some(task);
    }

    pub fn running(&self) -> bool {
        matches!(
            self.session.status(),
            SessionStatus::Running | SessionStatus::Paused
        )
    }

    /// Current state, or the state after the first `position` signals
    /// of the recording.
    pub fn state_at(&self, position: Option<usize>) -> Value {
        match position {
            None => self.session.state_snapshot(),
            Some(position) => {
                let signals = self
                    .store
                    .load(&self.recording_id)
                    .map(|r| r.signals)
                    .unwrap_or_default();
                self.dispatcher
                    .replay_state(Value::Null, &signals, Some(position))
            }
        }
    }
}

/// Process-wide session table.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions
            .write()
            .insert(handle.session.id().to_owned(), handle);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchid_sessions::SessionConfig;
    use serde_json::json;

    #[tokio::test]
    async fn insert_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SignalStore::open(dir.path()).unwrap());
        let registry = SessionRegistry::new();

        let session = Session::create(
            "s-1",
            json!({}),
            |_| Value::Null,
            SessionConfig::default(),
        );
        let recording_id = session.record_to(&store).unwrap();
        let handle = SessionHandle::new(
            session,
            Arc::clone(&store),
            recording_id,
            Arc::new(Dispatcher::new()),
        );
        registry.insert(handle);

        assert_eq!(registry.len(), 1);
        let found = registry.get("s-1").unwrap();
        assert!(!found.running());
        assert!(registry.get("s-2").is_none());
        assert_eq!(registry.ids(), vec!["s-1".to_owned()]);
    }
}

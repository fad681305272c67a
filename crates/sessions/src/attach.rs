//! The attachment framework.
//!
//! An attachment is a function `(transport) → cleanup`. The transport
//! is the full observer/steerer surface: pattern subscription, async
//! iteration, message injection, prompt replies, pause/resume/abort,
//! and status. Cleanups run in reverse attach order when the session
//! reaches a terminal state; individual failures are ignored.

use std::sync::Arc;

use orchid_domain::{Filter, Result, Signal};
use orchid_hub::{SignalStream, Subscription};

use crate::runtime::{InjectedMessage, Session, SessionStatus, State};

/// Teardown returned by an attachment factory.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Observer/steerer surface bound to one session.
pub struct Transport<S: State> {
    session: Arc<Session<S>>,
}

impl<S: State> Clone for Transport<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<S: State> Transport<S> {
    pub fn session_id(&self) -> String {
        self.session.id().to_owned()
    }

    /// Subscribe a listener. Signals emitted after this call are never
    /// missed.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, filter: impl Into<Filter>, listener: F) -> Subscription
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.session.hub().subscribe(filter, listener)
    }

    /// Async iteration over matching enriched signals.
    pub fn stream(&self, filter: impl Into<Filter>) -> SignalStream {
        self.session.hub().stream(filter)
    }

    /// Inject an out-of-band message.
    pub fn send(&self, content: impl Into<String>) -> Result<()> {
        self.session.send_message(content, None)
    }

    /// Inject an out-of-band message addressed to an agent.
    pub fn send_to(&self, content: impl Into<String>, agent: impl Into<String>) -> Result<()> {
        self.session.send_message(content, Some(agent.into()))
    }

    /// Resolve a pending HITL prompt.
    pub fn reply(&self, prompt_id: &str, response: &str) -> Result<()> {
        self.session.reply(prompt_id, response)
    }

    pub fn pause(&self) -> bool {
        self.session.pause()
    }

    pub fn resume(&self, message: Option<String>) -> bool {
        self.session.resume(message)
    }

    pub fn abort(&self, reason: Option<&str>) -> bool {
        self.session.abort(reason)
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn session_active(&self) -> bool {
        !self.session.status().is_terminal()
    }

    /// The post-dispatch state snapshot.
    pub fn state(&self) -> S {
        self.session.state_snapshot()
    }

    pub fn read_messages(&self) -> Vec<InjectedMessage> {
        self.session.read_messages()
    }
}

impl<S: State> Session<S> {
    /// Bind an attachment: call the factory with a transport, keep its
    /// cleanup for terminal teardown. Attaching to an already-terminal
    /// session runs the cleanup immediately.
    pub fn attach<F>(&self, attachment: F)
    where
        F: FnOnce(Transport<S>) -> Cleanup,
    {
        let transport = Transport {
            session: self.arc(),
        };
        let cleanup = attachment(transport);
        if self.status().is_terminal() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(cleanup));
        } else {
            self.push_cleanup(cleanup);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SessionConfig;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    fn session() -> Arc<Session<Value>> {
        Session::create(
            "s-attach",
            json!({}),
            |_| Value::Null,
            SessionConfig::default(),
        )
    }

    #[tokio::test]
    async fn attachment_sees_signals_and_cleans_up_in_reverse() {
        let session = session();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let order = Arc::clone(&order);
            session.attach(move |transport: Transport<Value>| {
                let seen = Arc::new(Mutex::new(0u32));
                let seen2 = Arc::clone(&seen);
                let sub = transport.subscribe("**", move |_signal| {
                    *seen2.lock() += 1;
                });
                Box::new(move || {
                    drop(sub);
                    order.lock().push(label);
                })
            });
        }

        let result = session.run(|ctx| async move {
            ctx.emit("narrative", json!({ "text": "hello" }));
            Ok(json!("done"))
        });
        result.await.unwrap();

        // Reverse attach order.
        assert_eq!(*order.lock(), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn panicking_cleanup_is_ignored() {
        let session = session();
        let ran = Arc::new(Mutex::new(false));

        let ran2 = Arc::clone(&ran);
        session.attach(move |_transport: Transport<Value>| {
            Box::new(move || {
                *ran2.lock() = true;
            })
        });
        session.attach(|_transport: Transport<Value>| {
            Box::new(|| panic!("cleanup bug"))
        });

        session.run(|_ctx| async move { Ok(Value::Null) }).await.unwrap();
        assert!(*ran.lock());
    }

    #[tokio::test]
    async fn attach_to_terminal_session_cleans_up_immediately() {
        let session = session();
        session.abort(Some("done"));

        let ran = Arc::new(Mutex::new(false));
        let ran2 = Arc::clone(&ran);
        session.attach(move |_transport: Transport<Value>| {
            Box::new(move || {
                *ran2.lock() = true;
            })
        });
        assert!(*ran.lock());
    }

    #[tokio::test]
    async fn transport_steers_the_session() {
        let session = session();
        let transport = {
            let captured: Arc<Mutex<Option<Transport<Value>>>> = Arc::new(Mutex::new(None));
            let captured2 = Arc::clone(&captured);
            session.attach(move |transport: Transport<Value>| {
                *captured2.lock() = Some(transport);
                Box::new(|| {})
            });
            let t = captured.lock().take().unwrap();
            t
        };

        assert_eq!(transport.status(), SessionStatus::Idle);
        assert!(transport.session_active());

        transport.send("hello").unwrap();
        let messages = transport.read_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");

        assert!(transport.abort(Some("test over")));
        assert!(!transport.session_active());
        // Terminal queue rejects further sends.
        assert!(transport.send("late").is_err());
    }
}

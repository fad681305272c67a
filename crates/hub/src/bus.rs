//! The Hub — in-process pub/sub with pattern filtering, context
//! propagation, and ordered synchronous delivery.
//!
//! Delivery semantics:
//! - at-most-once per subscriber per emit, in subscription order
//! - a panicking listener is isolated and logged, siblings still run
//! - re-entrant emits (a listener emitting from its callback) queue
//!   FIFO and deliver after the triggering signal's listeners finish
//! - after delivery the signal is appended to the active recording
//!   sink, if one is attached

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;

use orchid_domain::{Event, EventContext, Filter, Signal, TraceEvent};

use crate::scope;
use crate::sink::SignalSink;

/// A subscriber callback. Must be non-blocking; long work belongs on a
/// task the listener spawns itself.
pub type Listener = Arc<dyn Fn(&Signal) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: Filter,
    listener: Listener,
}

struct HubInner {
    session_id: String,
    subscribers: RwLock<Vec<Subscriber>>,
    next_signal_id: AtomicU64,
    next_subscription_id: AtomicU64,
    /// FIFO micro-queue for re-entrant emits.
    queue: Mutex<VecDeque<Signal>>,
    draining: AtomicBool,
    /// Timestamps are clamped monotonically non-decreasing per session.
    last_timestamp: Mutex<DateTime<Utc>>,
    sink: RwLock<Option<Arc<dyn SignalSink>>>,
    sink_failing: AtomicBool,
    closed: AtomicBool,
}

/// The event bus for one session.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                session_id: session_id.into(),
                subscribers: RwLock::new(Vec::new()),
                next_signal_id: AtomicU64::new(1),
                next_subscription_id: AtomicU64::new(1),
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                last_timestamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
                sink: RwLock::new(None),
                sink_failing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe with a pattern filter. Dropping (or `unsubscribe`-ing)
    /// the returned handle removes the listener.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, filter: impl Into<Filter>, listener: F) -> Subscription
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push(Subscriber {
            id,
            filter: filter.into(),
            listener: Arc::new(listener),
        });
        Subscription {
            hub: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Subscribe to everything (`**`).
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.subscribe(Filter::all(), listener)
    }

    /// An async iterator over matching signals. The subscription lives
    /// as long as the stream; signals emitted after this call are never
    /// missed.
    pub fn stream(&self, filter: impl Into<Filter>) -> SignalStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let subscription = self.subscribe(filter, move |signal: &Signal| {
            let _ = tx.send(signal.clone());
        });
        SignalStream {
            _subscription: subscription,
            rx,
        }
    }

    /// Remove every subscriber. For tests and teardown.
    pub fn clear(&self) {
        self.inner.subscribers.write().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    // ── Emission ─────────────────────────────────────────────────────

    /// Enrich and deliver an event under the inherited context.
    pub fn emit(&self, event: Event) -> Signal {
        self.emit_with(event, EventContext::default())
    }

    /// Enrich and deliver with a per-emit context override merged over
    /// the inherited scope.
    pub fn emit_with(&self, event: Event, context_override: EventContext) -> Signal {
        let signal = self.enrich(event, context_override);
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::debug!(name = %signal.name, "emit after close dropped");
            return signal;
        }
        self.inner.queue.lock().push_back(signal.clone());
        self.drain();
        signal
    }

    /// Move the id counter forward so the next signal id is at least
    /// `next`. Forked sessions use this so live emissions never collide
    /// with copied log ids. Never moves backwards.
    pub fn advance_signal_id(&self, next: u64) {
        self.inner.next_signal_id.fetch_max(next, Ordering::Relaxed);
    }

    /// The context the next emission would observe.
    pub fn current(&self) -> EventContext {
        let mut ctx = scope::current();
        if ctx.session_id.is_none() {
            ctx.session_id = Some(self.inner.session_id.clone());
        }
        ctx
    }

    /// Run a future with `partial` merged onto the inherited context;
    /// every emission inside (including awaited sub-calls) observes the
    /// merged frame. Restored on exit on all paths.
    pub async fn scoped<F>(&self, partial: EventContext, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        scope::scoped(partial, future).await
    }

    // ── Recording sink ───────────────────────────────────────────────

    /// Attach the active recording. Every delivered signal is appended
    /// after its listeners have run.
    pub fn set_sink(&self, sink: Arc<dyn SignalSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.inner.sink.write() = None;
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Terminal gate: emissions after close are dropped. Used by the
    /// session so nothing follows `session:abort`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn enrich(&self, event: Event, context_override: EventContext) -> Signal {
        let id = self.inner.next_signal_id.fetch_add(1, Ordering::Relaxed);
        let context = self.current().merge(&context_override);

        let timestamp = {
            let mut last = self.inner.last_timestamp.lock();
            let now = Utc::now();
            let ts = if now < *last { *last } else { now };
            *last = ts;
            ts
        };

        Signal {
            id,
            name: event.name,
            payload: event.payload,
            timestamp,
            context,
            source: event.source,
            caused_by: event.caused_by,
            display: event.display,
        }
    }

    fn drain(&self) {
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            // An outer frame (possibly this thread, re-entrantly) is
            // already draining; it will pick up what we queued.
            return;
        }
        loop {
            let next = self.inner.queue.lock().pop_front();
            match next {
                Some(signal) => {
                    self.deliver(&signal);
                    self.record(&signal);
                }
                None => {
                    self.inner.draining.store(false, Ordering::Release);
                    // Re-check: another thread may have enqueued between
                    // the pop and the flag store.
                    if self.inner.queue.lock().is_empty()
                        || self.inner.draining.swap(true, Ordering::AcqRel)
                    {
                        break;
                    }
                }
            }
        }
    }

    fn deliver(&self, signal: &Signal) {
        let matching: Vec<(u64, Listener)> = {
            let subscribers = self.inner.subscribers.read();
            subscribers
                .iter()
                .filter(|s| s.filter.matches(&signal.name))
                .map(|s| (s.id, Arc::clone(&s.listener)))
                .collect()
        };
        for (id, listener) in matching {
            if catch_unwind(AssertUnwindSafe(|| listener(signal))).is_err() {
                TraceEvent::ListenerPanicked {
                    subscription: id,
                    signal: signal.name.clone(),
                }
                .emit();
            }
        }
    }

    fn record(&self, signal: &Signal) {
        let sink = self.inner.sink.read().clone();
        let Some(sink) = sink else { return };
        match sink.append(signal) {
            Ok(()) => {
                self.inner.sink_failing.store(false, Ordering::Release);
            }
            Err(err) => {
                tracing::warn!(name = %signal.name, error = %err, "recording append failed");
                // Surface once per failure streak; the error signal
                // itself would fail the sink again.
                if signal.name != "channel:error"
                    && !self.inner.sink_failing.swap(true, Ordering::AcqRel)
                {
                    self.emit(Event::new(
                        "channel:error",
                        json!({ "channel": "recording", "error": err.to_string() }),
                    ));
                }
            }
        }
    }
}

fn unsubscribe(inner: &HubInner, id: u64) {
    inner.subscribers.write().retain(|s| s.id != id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to a registered listener. Unsubscribes on drop.
pub struct Subscription {
    hub: std::sync::Weak<HubInner>,
    id: u64,
}

impl Subscription {
    /// Explicitly remove the listener.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            unsubscribe(&inner, self.id);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signal stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Async iteration over matching signals; holds its subscription.
pub struct SignalStream {
    _subscription: Subscription,
    rx: tokio::sync::mpsc::UnboundedReceiver<Signal>,
}

impl SignalStream {
    pub async fn next(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

impl futures_core::Stream for SignalStream {
    type Item = Signal;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Signal>> {
        self.rx.poll_recv(cx)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

//! Cooperative interruption of provider runs and workflow code.
//!
//! Each session owns one [`Interrupt`]. `pause` sets a *resumable*
//! flag; `abort` sets a *terminal* flag. The provider adapter checks
//! between messages; long workflow code checks at its own cooperative
//! points. Clones share state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// What an interrupt check observed. Abort wins over pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// Resumable — the session may continue after `resume`.
    Paused,
    /// Terminal — the session is going away.
    Aborted,
}

#[derive(Default)]
struct InterruptInner {
    paused: AtomicBool,
    aborted: AtomicBool,
    resumed: Notify,
    abort: Notify,
}

/// Shared pause/abort flags for one session.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resumable flag. Returns false when already paused or
    /// terminally aborted.
    pub fn pause(&self) -> bool {
        if self.is_aborted() {
            return false;
        }
        !self.inner.paused.swap(true, Ordering::AcqRel)
    }

    /// Clear the resumable flag. Returns false when not paused.
    pub fn resume(&self) -> bool {
        let was_paused = self.inner.paused.swap(false, Ordering::AcqRel);
        if was_paused {
            self.inner.resumed.notify_waiters();
        }
        was_paused
    }

    /// Set the terminal flag and wake every waiter.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.abort.notify_waiters();
        self.inner.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }

    /// The current interruption, if any. Abort takes precedence.
    pub fn check(&self) -> Option<InterruptKind> {
        if self.is_aborted() {
            Some(InterruptKind::Aborted)
        } else if self.is_paused() {
            Some(InterruptKind::Paused)
        } else {
            None
        }
    }

    /// Resolve when the terminal flag is set.
    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.abort.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    /// Resolve when no longer paused (resume or abort).
    pub async fn resumed(&self) {
        loop {
            let notified = self.inner.resumed.notified();
            if !self.is_paused() || self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

//! The recording sink contract.
//!
//! The hub appends every delivered signal to the active sink; the
//! signal store implements this for open recordings. Failures surface
//! to the hub, which logs and emits a single `channel:error` — the
//! session continues.

use orchid_domain::{Result, Signal};

/// Destination for delivered signals.
pub trait SignalSink: Send + Sync {
    fn append(&self, signal: &Signal) -> Result<()>;
}

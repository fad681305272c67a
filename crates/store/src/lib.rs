//! Durable signal storage and deterministic replay for Orchid.
//!
//! - [`SignalStore`] — append-only per-recording JSONL logs with an
//!   `open → finalized` lifecycle.
//! - [`Recorder`] — fingerprint-keyed recording and replay of provider
//!   runs, used to replace live LLM calls in deterministic tests.

pub mod conformance;
pub mod fingerprint;
pub mod recorder;
pub mod recording;
pub mod store;

pub use conformance::{check, Violation};
pub use fingerprint::fingerprint;
pub use recorder::{LiveRecording, Recorder, RecorderMode, Replay, ReplayEntry, RunHandle};
pub use recording::{NewRecording, Recording, RecordingFilter, RecordingMeta, RecordingStatus};
pub use store::{RecordingSink, SignalStore};

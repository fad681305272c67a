//! Core data model for the Orchid agent-orchestration kernel.
//!
//! The signal envelope, the subscription pattern matcher, the context
//! scoping frame, the shared error taxonomy, provider request/result
//! shapes, token accounting, and the workflow-layer task vocabulary.
//! Everything here is plain data — behavior lives in the hub, store,
//! provider, and session crates.

pub mod context;
pub mod error;
pub mod pattern;
pub mod payload;
pub mod provider;
pub mod signal;
pub mod trace;
pub mod usage;
pub mod workflow;

pub use context::{AgentRef, EventContext, PhaseRef, TaskRef};
pub use error::{Error, Result};
pub use pattern::Filter;
pub use payload::{KnownPayload, MalformedPayload};
pub use provider::{ProviderRequest, ProviderResult};
pub use signal::{DisplayHint, DisplayKind, DisplayStatus, Event, Signal, SignalId, Source};
pub use trace::TraceEvent;
pub use usage::TokenUsage;
pub use workflow::{AttemptOutcome, AttemptRecord, Milestone, Task, TaskStatus};

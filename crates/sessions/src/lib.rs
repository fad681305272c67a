//! Session runtime for Orchid.
//!
//! Drives a workflow (run-form async function or execute-form step
//! stream) with pause/resume/abort, human-in-the-loop prompts, message
//! injection, reducer/handler/process-manager dispatch over session
//! state, and an attachment framework for observers and steerers.

pub mod agents;
pub mod attach;
pub mod dispatch;
pub mod flow;
pub mod hitl;
pub mod render;
pub mod runtime;
pub mod steps;
pub mod tasks;

pub use agents::{Agent, AgentRegistry};
pub use attach::{Cleanup, Transport};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use flow::{Ctx, ParallelOptions, RetryOptions, WorkItem};
pub use hitl::{PromptOptions, Validator};
pub use render::{renderer, FileTarget, RenderOptions, RenderTarget, DEFAULT_RENDER_IDLE};
pub use runtime::{InjectedMessage, Session, SessionConfig, SessionStatus, State};
pub use steps::StepYield;
pub use tasks::{task_board_dispatcher, TaskBoard};

//! Provider streaming for Orchid: the provider contract, the stream
//! adapter that normalizes heterogeneous message streams into framed
//! signal sequences, and the cooperative interrupt the adapter watches
//! between messages.

pub mod adapter;
pub mod control;
pub mod script;
pub mod traits;

pub use adapter::run_provider;
pub use control::{Interrupt, InterruptKind};
pub use script::ScriptedProvider;
pub use traits::{MessageStream, Provider, ProviderMessage};

//! The Orchid hub — in-process pub/sub with pattern subscription,
//! context propagation across async work, and scoped emission.

pub mod bus;
pub mod scope;
pub mod sink;

pub use bus::{Hub, Listener, SignalStream, Subscription};
pub use scope::{current, scoped};
pub use sink::SignalSink;

//! Task-local context propagation.
//!
//! `scoped(partial, future)` merges `partial` onto the current frame and
//! runs the future with the merged context visible to every emission
//! inside it, including awaited sub-calls. The frame is restored on exit
//! on all paths — the scope *is* the future wrapper, so there is nothing
//! to unwind by hand. Concurrent tasks each carry their own frame;
//! scopes never bleed across tasks.

use std::future::Future;

use orchid_domain::EventContext;

tokio::task_local! {
    static CONTEXT: EventContext;
}

/// Run `future` with `partial` merged onto the current context frame.
pub async fn scoped<F>(partial: EventContext, future: F) -> F::Output
where
    F: Future,
{
    let merged = current().merge(&partial);
    CONTEXT.scope(merged, future).await
}

/// The current merged context, or an empty frame outside any scope.
pub fn current() -> EventContext {
    CONTEXT
        .try_with(|ctx| ctx.clone())
        .unwrap_or_default()
}

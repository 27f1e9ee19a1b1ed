//! Completion listeners: the pending-side registry and the adapters that turn
//! visitors, consumers and plain runnables into listeners.

use std::panic::{self, AssertUnwindSafe};

use smallvec::SmallVec;

use crate::error::{cancellation_cause, Cause, FutureError};
use crate::executor::{ExecutorRef, Task};
use crate::future::{ObservableFuture, DEFAULT_INLINE_LISTENERS};

pub(crate) type ListenerFn<V> = Box<dyn FnOnce(ObservableFuture<V>) + Send>;

/// The `(callback, executor)` pairs registered while a future is pending.
///
/// Held inside the future's pending state and drained exactly once by the
/// thread that wins the terminal transition; registrations after that point
/// bypass the registry and go straight through [`dispatch`].
pub(crate) struct ListenerRegistry<V> {
    entries: SmallVec<[(ListenerFn<V>, ExecutorRef); DEFAULT_INLINE_LISTENERS]>,
}

impl<V: Send + Sync + 'static> ListenerRegistry<V> {
    pub(crate) fn new() -> ListenerRegistry<V> {
        ListenerRegistry {
            entries: SmallVec::new(),
        }
    }

    pub(crate) fn add(&mut self, listener: ListenerFn<V>, ctx: ExecutorRef) {
        self.entries.push((listener, ctx));
    }

    /// Dispatch every captured entry. Consumes the registry; by the time this
    /// runs the owner has already detached it, so no further entries can
    /// appear.
    pub(crate) fn dispatch_all(self, owner: &ObservableFuture<V>) {
        for (listener, ctx) in self.entries {
            dispatch(owner, listener, &ctx);
        }
    }
}

/// Submit one listener to its executor. The callback is fenced with
/// `catch_unwind` so a panicking listener can neither poison its executor's
/// worker nor propagate into the completing thread.
pub(crate) fn dispatch<V: Send + Sync + 'static>(
    owner: &ObservableFuture<V>,
    listener: ListenerFn<V>,
    ctx: &ExecutorRef,
) {
    let subject = owner.clone();
    let task: Task = Box::new(move || {
        if panic::catch_unwind(AssertUnwindSafe(|| listener(subject))).is_err() {
            log::warn!("future listener panicked; ignoring");
        }
    });
    if let Err(rejected) = ctx.execute(task) {
        log::warn!("listener executor rejected completion callback: {rejected}");
    }
}

/// Visitor over the three terminal dispositions.
pub trait FutureVisitor<V> {
    fn successful(&mut self, value: &V);

    fn failed(&mut self, cause: &Cause);

    /// Defaults to reporting the cancellation through [`failed`](Self::failed)
    /// with the process-wide cancellation cause.
    fn cancelled(&mut self) {
        self.failed(&cancellation_cause());
    }
}

/// Adapt a [`FutureVisitor`] into a completion listener.
pub fn from_visitor<V, T>(mut visitor: T) -> impl FnOnce(ObservableFuture<V>) + Send
where
    V: Send + Sync + 'static,
    T: FutureVisitor<V> + Send + 'static,
{
    move |future| {
        // the listener contract guarantees a terminal future
        let _ = future.visit(&mut visitor);
    }
}

/// Adapt a consumer of the settled outcome into a completion listener.
pub fn from_fn<V, F>(consumer: F) -> impl FnOnce(ObservableFuture<V>) + Send
where
    V: Clone + Send + Sync + 'static,
    F: FnOnce(Result<V, FutureError>) + Send + 'static,
{
    move |future| consumer(future.get())
}

/// Adapt a runnable that only cares that the future settled.
pub fn from_runnable<V, F>(runnable: F) -> impl FnOnce(ObservableFuture<V>) + Send
where
    V: Send + Sync + 'static,
    F: FnOnce() + Send + 'static,
{
    move |_| runnable()
}

//! Cooperative thread interruption.
//!
//! Rust threads cannot be interrupted from the outside, so cancellation with
//! interrupt is cooperative: every thread lazily owns an [`InterruptHandle`],
//! and `interrupt()` raises a flag and unparks the thread. The park-based
//! waits in this crate re-check the flag when woken, and long-running
//! producers are expected to poll [`requested`] between steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

/// Interrupt state for one thread.
///
/// Cloning shares the state; the handle stays valid after the owning thread
/// exits (interrupting a finished thread is a no-op).
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    requested: AtomicBool,
    thread: Thread,
}

impl InterruptHandle {
    fn for_current_thread() -> InterruptHandle {
        InterruptHandle {
            inner: Arc::new(Inner {
                requested: AtomicBool::new(false),
                thread: thread::current(),
            }),
        }
    }

    /// Request an interrupt: raise the flag and unpark the owning thread so
    /// any park-based wait re-checks it.
    pub fn interrupt(&self) {
        self.inner.requested.store(true, Ordering::Release);
        self.inner.thread.unpark();
    }

    /// Whether an interrupt has been requested and not yet consumed.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Consume a pending request, if any. Returns whether one was pending.
    pub fn take_requested(&self) -> bool {
        self.inner.requested.swap(false, Ordering::AcqRel)
    }

    /// Drop any pending request. Run loops call this between tasks so a stale
    /// request never leaks into unrelated work on the same thread.
    pub fn clear(&self) {
        self.inner.requested.store(false, Ordering::Release);
    }
}

thread_local! {
    static CURRENT: InterruptHandle = InterruptHandle::for_current_thread();
}

/// The calling thread's interrupt handle, registered lazily.
pub fn current() -> InterruptHandle {
    CURRENT.with(InterruptHandle::clone)
}

/// Whether an interrupt has been requested for the calling thread.
///
/// Producers running under a `RunnableFuture` poll this between steps to
/// honour `cancel(true)`.
pub fn requested() -> bool {
    CURRENT.with(InterruptHandle::is_requested)
}

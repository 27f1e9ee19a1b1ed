use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::awaitable::Awaitable;
use crate::cancel::Cancellable;
use crate::error::{Cause, FutureError, PanicCause};
use crate::future::ObservableFuture;
use crate::interrupt;

pub(crate) type Producer<V> = Box<dyn FnOnce() -> Result<V, Cause> + Send>;

/// Binds a producer to an [`ObservableFuture`]: at-most-once execution with
/// interrupt routing.
///
/// `cancel(true)` while the producer runs raises the runner thread's
/// cooperative interrupt flag and unparks it; cancellation is advisory for
/// in-flight code, so a cancelled future may briefly coexist with a still
/// running producer whose eventual return is discarded.
pub struct RunnableFuture<V> {
    future: ObservableFuture<V>,
    claimed: AtomicBool,
    producer: Mutex<Option<Producer<V>>>,
}

impl<V: Send + Sync + 'static> RunnableFuture<V> {
    pub fn new<F, E>(producer: F) -> RunnableFuture<V>
    where
        F: FnOnce() -> Result<V, E> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        RunnableFuture {
            future: ObservableFuture::pending(),
            claimed: AtomicBool::new(false),
            producer: Mutex::new(Some(Box::new(move || {
                producer().map_err(crate::error::cause)
            }))),
        }
    }

    /// A runnable future whose producer cannot fail (other than by panicking).
    pub fn from_supplier<F>(supplier: F) -> RunnableFuture<V>
    where
        F: FnOnce() -> V + Send + 'static,
    {
        Self::new(move || Ok::<V, std::convert::Infallible>(supplier()))
    }

    pub(crate) fn with_cause_producer(producer: Producer<V>) -> RunnableFuture<V> {
        RunnableFuture {
            future: ObservableFuture::pending(),
            claimed: AtomicBool::new(false),
            producer: Mutex::new(Some(producer)),
        }
    }

    /// The observable side of this task. All clones observe the same cell.
    pub fn future(&self) -> ObservableFuture<V> {
        self.future.clone()
    }

    /// Run the producer at most once.
    ///
    /// Returns without effect when the future is already terminal or another
    /// thread has claimed the run. Producer panics become failures carrying a
    /// [`PanicCause`].
    pub fn run(&self) {
        if self.future.is_done() {
            return;
        }
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(producer) = self.producer.lock().unwrap().take() else {
            return;
        };
        let handle = interrupt::current();
        if !self.future.register_runner(handle.clone()) {
            // cancelled between the claim and here; the producer never runs
            return;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(producer));
        self.future.clear_runner();
        match outcome {
            Ok(Ok(value)) => {
                self.future.complete(value);
            }
            Ok(Err(cause)) => {
                self.future.fail_with_cause(cause);
            }
            Err(payload) => {
                self.future.fail_with_cause(PanicCause::from_payload(payload));
            }
        }
        // a cancel(true) that lost or won the race may have left our flag
        // raised; it must not leak into the thread's next task
        handle.clear();
    }
}

impl<V: Send + Sync + 'static> Awaitable for RunnableFuture<V> {
    fn await_completion(&self) -> Result<(), FutureError> {
        self.future.await_completion()
    }

    fn await_completion_for(&self, limit: Duration) -> Result<bool, FutureError> {
        self.future.await_completion_for(limit)
    }

    fn await_uninterruptibly(&self) {
        self.future.await_uninterruptibly()
    }

    fn await_uninterruptibly_for(&self, limit: Duration) -> bool {
        self.future.await_uninterruptibly_for(limit)
    }

    fn is_done(&self) -> bool {
        self.future.is_done()
    }
}

impl<V: Send + Sync + 'static> Cancellable for RunnableFuture<V> {
    fn cancel(&self, may_interrupt: bool) -> bool {
        self.future.cancel(may_interrupt)
    }
}

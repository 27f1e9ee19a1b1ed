//! The observable future: a single-assignment result cell with three terminal
//! dispositions, registerable completion listeners, and blocking inspection.

mod listeners;
mod runnable;

pub use listeners::{from_fn, from_runnable, from_visitor, FutureVisitor};
pub use runnable::RunnableFuture;

use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::awaitable::Awaitable;
use crate::cancel::Cancellable;
use crate::error::{Cause, FutureError};
use crate::executor::ExecutorRef;
use crate::interrupt::{self, InterruptHandle};
use listeners::ListenerRegistry;

pub(crate) const DEFAULT_INLINE_WAITERS: usize = 4;
pub(crate) const DEFAULT_INLINE_LISTENERS: usize = 4;

const PENDING: u8 = 0;
const SUCCESS: u8 = 1;
const FAILURE: u8 = 2;
const CANCELLED: u8 = 3;

/// The terminal disposition of a future.
pub(crate) enum Outcome<V> {
    Success(V),
    Failure(Cause),
    Cancelled,
}

impl<V> Outcome<V> {
    fn disposition(&self) -> u8 {
        match self {
            Outcome::Success(_) => SUCCESS,
            Outcome::Failure(_) => FAILURE,
            Outcome::Cancelled => CANCELLED,
        }
    }
}

/// Everything a future tracks while still pending. Taken (and replaced with
/// `None`) by the thread that wins the terminal transition.
struct Pending<V> {
    waiters: SmallVec<[Thread; DEFAULT_INLINE_WAITERS]>,
    wakers: SmallVec<[Waker; 2]>,
    listeners: ListenerRegistry<V>,
    runner: Option<InterruptHandle>,
}

impl<V: Send + Sync + 'static> Pending<V> {
    fn new() -> Pending<V> {
        Pending {
            waiters: SmallVec::new(),
            wakers: SmallVec::new(),
            listeners: ListenerRegistry::new(),
            runner: None,
        }
    }
}

struct FutureState<V> {
    // invariant: once this leaves PENDING it never changes again, and
    // `outcome` is set before the new disposition is published
    disposition: AtomicU8,
    outcome: OnceLock<Outcome<V>>,
    pending: Mutex<Option<Pending<V>>>,
}

/// A handle to a value that becomes available at most once.
///
/// The handle is cheap to clone; all clones observe (and may complete) the
/// same underlying cell. Exactly one of [`complete`](Self::complete),
/// [`fail`](Self::fail) or [`Cancellable::cancel`] wins; the rest return
/// `false` and change nothing.
pub struct ObservableFuture<V> {
    state: Arc<FutureState<V>>,
}

impl<V> Clone for ObservableFuture<V> {
    fn clone(&self) -> Self {
        ObservableFuture {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V: Send + Sync + 'static> Default for ObservableFuture<V> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<V: Send + Sync + 'static> ObservableFuture<V> {
    /// A future nobody has completed yet.
    pub fn pending() -> ObservableFuture<V> {
        ObservableFuture {
            state: Arc::new(FutureState {
                disposition: AtomicU8::new(PENDING),
                outcome: OnceLock::new(),
                pending: Mutex::new(Some(Pending::new())),
            }),
        }
    }

    /// A future that is already successful.
    pub fn successful(value: V) -> ObservableFuture<V> {
        Self::already(Outcome::Success(value))
    }

    /// A future that has already failed with `cause`.
    pub fn failed<E>(cause: E) -> ObservableFuture<V>
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::already(Outcome::Failure(crate::error::cause(cause)))
    }

    /// A future that is already cancelled.
    pub fn cancelled() -> ObservableFuture<V> {
        Self::already(Outcome::Cancelled)
    }

    fn already(outcome: Outcome<V>) -> ObservableFuture<V> {
        let state = FutureState {
            disposition: AtomicU8::new(outcome.disposition()),
            outcome: OnceLock::new(),
            pending: Mutex::new(None),
        };
        let _ = state.outcome.set(outcome);
        ObservableFuture {
            state: Arc::new(state),
        }
    }

    /// Complete with `value`. Returns whether this call won the transition.
    pub fn complete(&self, value: V) -> bool {
        self.transition(Outcome::Success(value), false)
    }

    /// Complete with a failure. Returns whether this call won the transition.
    pub fn fail<E>(&self, cause: E) -> bool
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.fail_with_cause(crate::error::cause(cause))
    }

    pub(crate) fn fail_with_cause(&self, cause: Cause) -> bool {
        self.transition(Outcome::Failure(cause), false)
    }

    /// The at-most-once terminal transition. The winner captures the pending
    /// bookkeeping under the lock, publishes the outcome, and only then (with
    /// the lock released) wakes waiters and dispatches listeners, so user
    /// callbacks never run under internal locks.
    fn transition(&self, outcome: Outcome<V>, may_interrupt: bool) -> bool {
        let taken = {
            let mut pending = self.state.pending.lock().unwrap();
            let Some(taken) = pending.take() else {
                return false;
            };
            let disposition = outcome.disposition();
            let _ = self.state.outcome.set(outcome);
            self.state.disposition.store(disposition, Ordering::Release);
            taken
        };
        if may_interrupt {
            if let Some(runner) = &taken.runner {
                runner.interrupt();
            }
        }
        for waiter in taken.waiters {
            waiter.unpark();
        }
        for waker in taken.wakers {
            waker.wake();
        }
        taken.listeners.dispatch_all(self);
        true
    }

    /// Register `listener` to run on `ctx` once the future completes. If it
    /// is already complete, the listener is dispatched immediately.
    ///
    /// The listener receives a clone of this handle, guaranteed to be in a
    /// terminal state. Panics escaping the listener and rejections from its
    /// executor are logged and swallowed.
    pub fn add_listener<F>(&self, listener: F, ctx: ExecutorRef)
    where
        F: FnOnce(ObservableFuture<V>) + Send + 'static,
    {
        let immediate = {
            let mut pending = self.state.pending.lock().unwrap();
            match &mut *pending {
                Some(p) => {
                    p.listeners.add(Box::new(listener), ctx.clone());
                    None
                }
                None => Some(Box::new(listener)),
            }
        };
        if let Some(listener) = immediate {
            listeners::dispatch(self, listener, &ctx);
        }
    }

    fn disposition(&self) -> u8 {
        self.state.disposition.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.disposition() != PENDING
    }

    pub fn is_successful(&self) -> bool {
        self.disposition() == SUCCESS
    }

    pub fn is_failed(&self) -> bool {
        self.disposition() == FAILURE
    }

    /// True only after the cancellation transition is fully visible, so
    /// `is_cancelled()` implies `is_done()`.
    pub fn is_cancelled(&self) -> bool {
        self.disposition() == CANCELLED
    }

    fn outcome(&self) -> Option<&Outcome<V>> {
        if self.disposition() == PENDING {
            return None;
        }
        self.state.outcome.get()
    }

    /// The successful value. Fails with `IllegalState` unless
    /// [`is_successful`](Self::is_successful) holds.
    pub fn result(&self) -> Result<V, FutureError>
    where
        V: Clone,
    {
        match self.outcome() {
            Some(Outcome::Success(value)) => Ok(value.clone()),
            _ => Err(FutureError::IllegalState(
                "result() requires a successful future",
            )),
        }
    }

    /// The failure cause. Fails with `IllegalState` unless
    /// [`is_failed`](Self::is_failed) holds.
    pub fn failure(&self) -> Result<Cause, FutureError> {
        match self.outcome() {
            Some(Outcome::Failure(cause)) => Ok(cause.clone()),
            _ => Err(FutureError::IllegalState(
                "failure() requires a failed future",
            )),
        }
    }

    /// Borrowed access to the successful value, without requiring `Clone`.
    /// The closure sees `None` when the future is pending or did not succeed.
    pub fn with_result<R>(&self, f: impl FnOnce(Option<&V>) -> R) -> R {
        match self.outcome() {
            Some(Outcome::Success(value)) => f(Some(value)),
            _ => f(None),
        }
    }

    /// Visit the terminal disposition: exactly one of the visitor's methods
    /// is called. Fails with `IllegalState` while the future is pending.
    pub fn visit<T>(&self, visitor: &mut T) -> Result<(), FutureError>
    where
        T: FutureVisitor<V> + ?Sized,
    {
        match self.outcome() {
            Some(Outcome::Success(value)) => visitor.successful(value),
            Some(Outcome::Failure(cause)) => visitor.failed(cause),
            Some(Outcome::Cancelled) => visitor.cancelled(),
            None => {
                return Err(FutureError::IllegalState(
                    "visit() requires a completed future",
                ))
            }
        }
        Ok(())
    }

    fn settled(&self) -> Result<V, FutureError>
    where
        V: Clone,
    {
        match self.outcome() {
            Some(Outcome::Success(value)) => Ok(value.clone()),
            Some(Outcome::Failure(cause)) => Err(FutureError::Failed(cause.clone())),
            Some(Outcome::Cancelled) => Err(FutureError::Cancelled),
            None => Err(FutureError::IllegalState("future is still pending")),
        }
    }

    /// Await completion, then surface the outcome: the value, the wrapped
    /// failure cause, or `Cancelled`.
    pub fn get(&self) -> Result<V, FutureError>
    where
        V: Clone,
    {
        self.block_until_done(None, true)?;
        self.settled()
    }

    /// Like [`get`](Self::get), but gives up with `Timeout` after `limit`
    /// without touching the future.
    pub fn get_within(&self, limit: Duration) -> Result<V, FutureError>
    where
        V: Clone,
    {
        if !self.block_until_done(Some(limit), true)? {
            return Err(FutureError::Timeout(limit));
        }
        self.settled()
    }

    /// Register the caller as a waiter and park until the future completes,
    /// the limit elapses (`Ok(false)`), or (in the interruptible form) when the
    /// calling thread's interrupt flag is raised.
    fn block_until_done(
        &self,
        limit: Option<Duration>,
        interruptible: bool,
    ) -> Result<bool, FutureError> {
        if self.is_done() {
            return Ok(true);
        }
        let deadline = limit.map(|limit| Instant::now() + limit);
        let handle = interruptible.then(interrupt::current);
        let me = thread::current();
        let mut registered = false;
        loop {
            {
                let mut pending = self.state.pending.lock().unwrap();
                match &mut *pending {
                    None => return Ok(true),
                    Some(p) => {
                        if !registered {
                            // registering before parking closes the window
                            // between the done-check and the park: a completer
                            // that takes the list after this point unparks us
                            p.waiters.push(me.clone());
                            registered = true;
                        }
                    }
                }
            }
            if let Some(handle) = &handle {
                if handle.take_requested() {
                    return Err(FutureError::Interrupted);
                }
            }
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        }
    }

    pub(crate) fn register_runner(&self, handle: InterruptHandle) -> bool {
        let mut pending = self.state.pending.lock().unwrap();
        match &mut *pending {
            Some(p) => {
                p.runner = Some(handle);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_runner(&self) {
        let mut pending = self.state.pending.lock().unwrap();
        if let Some(p) = &mut *pending {
            p.runner = None;
        }
    }
}

impl<V: Send + Sync + 'static> Awaitable for ObservableFuture<V> {
    fn await_completion(&self) -> Result<(), FutureError> {
        self.block_until_done(None, true).map(|_| ())
    }

    fn await_completion_for(&self, limit: Duration) -> Result<bool, FutureError> {
        self.block_until_done(Some(limit), true)
    }

    fn await_uninterruptibly(&self) {
        // cannot fail: the uninterruptible unbounded wait only returns done
        let _ = self.block_until_done(None, false);
    }

    fn await_uninterruptibly_for(&self, limit: Duration) -> bool {
        self.block_until_done(Some(limit), false).unwrap_or(false)
    }

    fn is_done(&self) -> bool {
        ObservableFuture::is_done(self)
    }
}

impl<V: Send + Sync + 'static> Cancellable for ObservableFuture<V> {
    fn cancel(&self, may_interrupt: bool) -> bool {
        self.transition(Outcome::Cancelled, may_interrupt)
    }
}

/// Async interop: an `ObservableFuture` can be awaited from async code. The
/// output mirrors [`ObservableFuture::get`].
impl<V: Clone + Send + Sync + 'static> Future for ObservableFuture<V> {
    type Output = Result<V, FutureError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        {
            let mut pending = this.state.pending.lock().unwrap();
            if let Some(p) = &mut *pending {
                if !p.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    p.wakers.push(cx.waker().clone());
                }
                return Poll::Pending;
            }
        }
        Poll::Ready(this.settled())
    }
}

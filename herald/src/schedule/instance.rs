use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::awaitable::Awaitable;
use crate::cancel::Cancellable;
use crate::error::{Cause, FutureError};
use crate::executor::ExecutorRef;
use crate::future::{ObservableFuture, RunnableFuture};

const UNSET: u64 = u64::MAX;

/// One execution of a scheduled task: a [`RunnableFuture`] plus its timing
/// record.
///
/// After completion an instance migrates from the definition's `current` slot
/// to the head of its bounded history, so it stays inspectable until evicted.
pub struct TaskInstance<V> {
    definition_ordinal: u64,
    index: u64,
    scheduled_start: AtomicU64,
    actual_start: AtomicU64,
    end: AtomicU64,
    runnable: RunnableFuture<V>,
}

impl<V: Send + Sync + 'static> TaskInstance<V> {
    pub(crate) fn new(
        definition_ordinal: u64,
        index: u64,
        scheduled_start_nanos: u64,
        runnable: RunnableFuture<V>,
    ) -> TaskInstance<V> {
        TaskInstance {
            definition_ordinal,
            index,
            scheduled_start: AtomicU64::new(scheduled_start_nanos),
            actual_start: AtomicU64::new(UNSET),
            end: AtomicU64::new(UNSET),
            runnable,
        }
    }

    /// Ordinal of the owning definition within its engine.
    pub fn definition_ordinal(&self) -> u64 {
        self.definition_ordinal
    }

    /// Creation order of this instance within its definition, starting at 0.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// When this instance is (or was) due, in monotonic nanoseconds.
    pub fn scheduled_start_nanos(&self) -> u64 {
        self.scheduled_start.load(Ordering::Acquire)
    }

    /// When the producer actually started, or `None` if it never ran.
    pub fn actual_start_nanos(&self) -> Option<u64> {
        match self.actual_start.load(Ordering::Acquire) {
            UNSET => None,
            nanos => Some(nanos),
        }
    }

    /// When the instance completed, or `None` while pending or running.
    pub fn end_nanos(&self) -> Option<u64> {
        match self.end.load(Ordering::Acquire) {
            UNSET => None,
            nanos => Some(nanos),
        }
    }

    /// The observable side of this execution.
    pub fn future(&self) -> ObservableFuture<V> {
        self.runnable.future()
    }

    pub fn is_successful(&self) -> bool {
        self.future().is_successful()
    }

    pub fn is_failed(&self) -> bool {
        self.future().is_failed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.future().is_cancelled()
    }

    /// The successful value, once there is one.
    pub fn result(&self) -> Result<V, FutureError>
    where
        V: Clone,
    {
        self.future().result()
    }

    /// The failure cause, once there is one.
    pub fn failure(&self) -> Result<Cause, FutureError> {
        self.future().failure()
    }

    /// Await this instance and surface its outcome.
    pub fn get(&self) -> Result<V, FutureError>
    where
        V: Clone,
    {
        self.future().get()
    }

    /// Register a completion listener on this instance's future.
    pub fn add_listener<F>(&self, listener: F, ctx: ExecutorRef)
    where
        F: FnOnce(ObservableFuture<V>) + Send + 'static,
    {
        self.future().add_listener(listener, ctx)
    }

    pub(crate) fn set_scheduled_start(&self, nanos: u64) {
        self.scheduled_start.store(nanos, Ordering::Release);
    }

    pub(crate) fn mark_started(&self, nanos: u64) {
        self.actual_start.store(nanos, Ordering::Release);
    }

    pub(crate) fn mark_ended(&self, nanos: u64) {
        self.end.store(nanos, Ordering::Release);
    }

    pub(crate) fn started(&self) -> bool {
        self.actual_start.load(Ordering::Acquire) != UNSET
    }

    pub(crate) fn run(&self) {
        self.runnable.run()
    }
}

impl<V: Send + Sync + 'static> Awaitable for TaskInstance<V> {
    fn await_completion(&self) -> Result<(), FutureError> {
        self.runnable.await_completion()
    }

    fn await_completion_for(&self, limit: Duration) -> Result<bool, FutureError> {
        self.runnable.await_completion_for(limit)
    }

    fn await_uninterruptibly(&self) {
        self.runnable.await_uninterruptibly()
    }

    fn await_uninterruptibly_for(&self, limit: Duration) -> bool {
        self.runnable.await_uninterruptibly_for(limit)
    }

    fn is_done(&self) -> bool {
        self.runnable.is_done()
    }
}

impl<V: Send + Sync + 'static> Cancellable for TaskInstance<V> {
    fn cancel(&self, may_interrupt: bool) -> bool {
        self.runnable.cancel(may_interrupt)
    }
}

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cancel::{cancel_all, Cancellable};
use crate::error::FutureError;
use crate::executor::{same_thread, ExecutorRef, Task};
use crate::future::{ObservableFuture, RunnableFuture};

/// Wraps a plain host executor so submissions produce observable futures.
pub struct ObservableExecutor {
    delegate: ExecutorRef,
}

impl ObservableExecutor {
    pub fn new(delegate: ExecutorRef) -> ObservableExecutor {
        ObservableExecutor { delegate }
    }

    pub fn delegate(&self) -> &ExecutorRef {
        &self.delegate
    }

    /// Submit a fallible producer and observe it through the returned future.
    ///
    /// If the delegate refuses the submission, the producer never runs and the
    /// future fails with the rejection as its cause.
    pub fn submit<V, F, E>(&self, producer: F) -> ObservableFuture<V>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> Result<V, E> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let runnable = Arc::new(RunnableFuture::new(producer));
        let future = runnable.future();
        let task: Task = Box::new(move || runnable.run());
        if let Err(rejected) = self.delegate.execute(task) {
            future.fail(rejected);
        }
        future
    }

    /// Submit every producer; one future per producer, in order.
    pub fn invoke_all<V, F, E>(&self, producers: Vec<F>) -> Vec<ObservableFuture<V>>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> Result<V, E> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        producers.into_iter().map(|p| self.submit(p)).collect()
    }

    /// Run all producers and block for the first success; the losers are
    /// cancelled. Fails only when every producer has settled without success
    /// (with the last failure cause, or `Cancelled` if none failed).
    ///
    /// # Panics
    ///
    /// Panics if `producers` is empty.
    pub fn invoke_any<V, F, E>(&self, producers: Vec<F>) -> Result<V, FutureError>
    where
        V: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<V, E> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        assert!(!producers.is_empty(), "invoke_any requires at least one producer");
        let winner: ObservableFuture<V> = ObservableFuture::pending();
        let not_yet_failed = Arc::new(AtomicUsize::new(producers.len()));
        let futures: Vec<ObservableFuture<V>> = producers
            .into_iter()
            .map(|producer| self.submit(producer))
            .collect();
        for future in &futures {
            let winner = winner.clone();
            let not_yet_failed = Arc::clone(&not_yet_failed);
            future.add_listener(
                move |settled| {
                    if settled.is_successful() {
                        if let Ok(value) = settled.result() {
                            winner.complete(value);
                        }
                        return;
                    }
                    if not_yet_failed.fetch_sub(1, Ordering::AcqRel) == 1 {
                        // every producer settled without a success
                        match settled.failure() {
                            Ok(cause) => {
                                winner.fail_with_cause(cause);
                            }
                            Err(_) => {
                                winner.cancel(false);
                            }
                        }
                    }
                },
                same_thread(),
            );
        }
        let outcome = winner.get();
        cancel_all(futures.iter(), false);
        outcome
    }
}

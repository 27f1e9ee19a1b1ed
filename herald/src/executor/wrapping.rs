use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::RejectedError;
use crate::executor::{Executor, ExecutorRef, Task};

/// Rewrites tasks before they reach the delegate executor.
pub trait TaskWrapper: Send + Sync {
    fn wrap(&self, task: Task) -> Task;
}

impl<F> TaskWrapper for F
where
    F: Fn(Task) -> Task + Send + Sync,
{
    fn wrap(&self, task: Task) -> Task {
        self(task)
    }
}

/// Decorator that applies a [`TaskWrapper`] to every submission.
pub struct WrappingExecutor {
    delegate: ExecutorRef,
    wrapper: Arc<dyn TaskWrapper>,
}

impl WrappingExecutor {
    pub fn new(delegate: ExecutorRef, wrapper: Arc<dyn TaskWrapper>) -> WrappingExecutor {
        WrappingExecutor { delegate, wrapper }
    }
}

impl Executor for WrappingExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedError> {
        self.delegate.execute(self.wrapper.wrap(task))
    }
}

/// Brackets a task's execution on the worker thread.
pub trait Interceptor: Send + Sync {
    /// Called in place of the task, with the executor the task was submitted
    /// to. Implementations normally invoke `task` exactly once; not invoking
    /// it deliberately drops the task.
    fn intercept(&self, delegate: &ExecutorRef, task: Task);
}

/// Composes an ordered list of interceptors around every submission. The
/// first interceptor in the list is the outermost: it sees the call first and
/// returns last.
pub struct InterceptingExecutor {
    delegate: ExecutorRef,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptingExecutor {
    pub fn new(
        delegate: ExecutorRef,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> InterceptingExecutor {
        InterceptingExecutor {
            delegate,
            interceptors,
        }
    }
}

impl Executor for InterceptingExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedError> {
        let mut wrapped = task;
        // fold from the innermost out so the head of the list runs outermost
        for interceptor in self.interceptors.iter().rev() {
            let interceptor = Arc::clone(interceptor);
            let delegate = Arc::clone(&self.delegate);
            let inner = wrapped;
            wrapped = Box::new(move || interceptor.intercept(&delegate, inner));
        }
        self.delegate.execute(wrapped)
    }
}

/// Snapshot produced by [`ContextPropagator::capture`]; opaque to the
/// executor.
pub type ContextSnapshot = Box<dyn Any + Send>;

/// Token produced by [`ContextPropagator::install`], consumed by
/// [`ContextPropagator::restore`].
pub type RestoreToken = Box<dyn Any + Send>;

/// Carries caller context (tracing ids, security principals, …) from the
/// submit site onto the worker thread.
pub trait ContextPropagator: Send + Sync {
    /// Capture the submitting thread's context.
    fn capture(&self) -> ContextSnapshot;

    /// Install `snapshot` on the worker thread, returning a token that undoes
    /// the installation.
    fn install(&self, snapshot: ContextSnapshot) -> RestoreToken;

    /// Undo a previous [`install`](Self::install).
    fn restore(&self, token: RestoreToken);
}

/// Captures context snapshots at the submit site, installs them (in list
/// order) when the task starts and restores them in reverse when it finishes.
/// A panic from `restore` is suppressed so the remaining propagators still
/// unwind; the task's own panic is re-raised after restoration.
pub struct PropagatingExecutor {
    delegate: ExecutorRef,
    propagators: Vec<Arc<dyn ContextPropagator>>,
}

impl PropagatingExecutor {
    pub fn new(
        delegate: ExecutorRef,
        propagators: Vec<Arc<dyn ContextPropagator>>,
    ) -> PropagatingExecutor {
        PropagatingExecutor {
            delegate,
            propagators,
        }
    }
}

impl Executor for PropagatingExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedError> {
        let snapshots: Vec<(Arc<dyn ContextPropagator>, ContextSnapshot)> = self
            .propagators
            .iter()
            .map(|p| (Arc::clone(p), p.capture()))
            .collect();
        let wrapped: Task = Box::new(move || {
            let mut installed = Vec::with_capacity(snapshots.len());
            for (propagator, snapshot) in snapshots {
                let token = propagator.install(snapshot);
                installed.push((propagator, token));
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(task));
            for (propagator, token) in installed.into_iter().rev() {
                let restore = AssertUnwindSafe(move || propagator.restore(token));
                if panic::catch_unwind(restore).is_err() {
                    log::warn!("context propagator panicked during restore; continuing");
                }
            }
            if let Err(payload) = outcome {
                panic::resume_unwind(payload);
            }
        });
        self.delegate.execute(wrapped)
    }
}

//! Execution contexts and the adapters that layer observability, wrapping,
//! context propagation and per-key serialization on top of them.

mod observable;
mod pool;
mod serializing;
mod wrapping;

pub use observable::ObservableExecutor;
pub use pool::FixedThreadPool;
pub use serializing::SerializingExecutor;
pub use wrapping::{
    ContextPropagator, Interceptor, InterceptingExecutor, PropagatingExecutor, TaskWrapper,
    WrappingExecutor,
};

use std::sync::{Arc, OnceLock};

use crate::error::RejectedError;

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Any `execute(task)`-shaped surface: completion callbacks, wrapped
/// submissions and serialized drains all run on executors.
pub trait Executor: Send + Sync {
    /// Run `task`, now or later. An `Err` means the task was refused and will
    /// never run.
    fn execute(&self, task: Task) -> Result<(), RejectedError>;
}

/// Shared handle to an executor.
pub type ExecutorRef = Arc<dyn Executor>;

struct SameThread;

impl Executor for SameThread {
    fn execute(&self, task: Task) -> Result<(), RejectedError> {
        task();
        Ok(())
    }
}

/// The executor that runs every task inline on the submitting thread.
/// Submissions are complete by the time `execute` returns.
pub fn same_thread() -> ExecutorRef {
    static INSTANCE: OnceLock<ExecutorRef> = OnceLock::new();
    INSTANCE.get_or_init(|| Arc::new(SameThread)).clone()
}

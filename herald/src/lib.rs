//! Observable futures and a managed scheduled-task engine for thread-based
//! programs.
//!
//! The crate has two tightly coupled layers:
//!
//! - [`future`]: a single-assignment result cell with three terminal
//!   dispositions (success, failure, cancellation), completion listeners
//!   dispatched on caller-chosen executors, and blocking/inspection APIs.
//!   [`executor`] supplies the execution contexts and the adapters that make
//!   plain executors observable, wrapped, context-propagating or serialized
//!   per key.
//! - [`schedule`]: a job engine built on those futures, with delayed and
//!   recurring execution (fixed-rate and fixed-delay), per-occurrence
//!   introspection and listeners, pause/resume, bounded execution history
//!   and pluggable rescheduling/exception policies.
//!
//! ```
//! use std::time::Duration;
//! use herald::{FixedRate, ScheduledTaskEngine, TaskDefinition};
//!
//! let engine = ScheduledTaskEngine::with_pool_size(2);
//! let handle = engine
//!     .submit(
//!         TaskDefinition::supplying(|| 42)
//!             .rescheduler(FixedRate::every(Duration::from_millis(10)))
//!             .should_schedule_next(|instance| instance.index() < 4),
//!     )
//!     .unwrap();
//! while !handle.is_finished() {
//!     std::thread::sleep(Duration::from_millis(5));
//! }
//! assert_eq!(handle.success_count(), 5);
//! engine.shutdown();
//! ```

pub mod awaitable;
pub mod cancel;
pub mod clock;
pub mod error;
pub mod executor;
pub mod future;
pub mod interrupt;
pub mod schedule;

pub use awaitable::Awaitable;
pub use cancel::{cancel_all, Cancellable};
pub use error::{cause, Cause, FutureError, RejectedError};
pub use executor::{
    same_thread, Executor, ExecutorRef, FixedThreadPool, ObservableExecutor, SerializingExecutor,
    Task,
};
pub use future::{FutureVisitor, ObservableFuture, RunnableFuture};
pub use schedule::{
    ExceptionPolicy, FixedDelay, FixedRate, ListenerId, PolicyDecision, Rescheduler,
    ScheduledTaskEngine, TaskDefinition, TaskHandle, TaskInstance,
};

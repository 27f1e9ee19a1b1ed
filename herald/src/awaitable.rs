use std::time::Duration;

use crate::error::FutureError;

/// Anything a thread can block on until it finishes.
///
/// The interruptible forms observe the calling thread's cooperative interrupt
/// handle (see [`crate::interrupt`]) and consume the request when reporting
/// [`FutureError::Interrupted`]; the uninterruptible forms ignore the handle
/// and leave any pending request in place for the caller to deal with.
pub trait Awaitable {
    /// Block until done. Fails with `Interrupted` if the calling thread's
    /// interrupt flag is raised while waiting.
    fn await_completion(&self) -> Result<(), FutureError>;

    /// Block for at most `limit`. Returns whether completion happened within
    /// the limit.
    fn await_completion_for(&self, limit: Duration) -> Result<bool, FutureError>;

    /// Block until done, ignoring interrupt requests.
    fn await_uninterruptibly(&self);

    /// Block for at most `limit`, ignoring interrupt requests. Returns
    /// whether completion happened within the limit.
    fn await_uninterruptibly_for(&self, limit: Duration) -> bool;

    /// Non-blocking: has the subject reached a terminal state?
    fn is_done(&self) -> bool;
}

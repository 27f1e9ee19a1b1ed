use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Shared failure cause.
///
/// A future may be observed from any number of threads and listeners, so the
/// cause of a failure is reference-counted rather than owned by whichever
/// observer asked first.
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;

/// Wrap an arbitrary error (or error message) into a [`Cause`].
pub fn cause<E>(err: E) -> Cause
where
    E: Into<Box<dyn Error + Send + Sync>>,
{
    Arc::from(err.into())
}

/// Everything that can go wrong when observing or waiting on a future.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FutureError {
    /// A blocking wait observed a cooperative interrupt request for the
    /// calling thread. The request is consumed when this is reported.
    #[error("wait interrupted")]
    Interrupted,

    /// A bounded wait elapsed before the future completed. The future itself
    /// is untouched and may still complete later.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The producer failed; the original cause is attached.
    #[error("execution failed: {0}")]
    Failed(Cause),

    /// The future was cancelled before it could succeed.
    #[error("cancelled")]
    Cancelled,

    /// An accessor was called while the future was in the wrong state, e.g.
    /// `result()` on a future that has not succeeded.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
}

impl FutureError {
    /// The underlying cause, when this is [`FutureError::Failed`].
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            FutureError::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}

/// An executor refused a submission; the task will never run.
#[derive(Debug, Clone, thiserror::Error)]
#[error("task rejected: {reason}")]
pub struct RejectedError {
    reason: &'static str,
}

impl RejectedError {
    pub fn new(reason: &'static str) -> RejectedError {
        RejectedError { reason }
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

/// A producer panicked; the payload is rendered into a message so the panic
/// can travel through the normal failure channel.
#[derive(Debug)]
pub struct PanicCause {
    message: String,
}

impl PanicCause {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Cause {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Ok(msg) = payload.downcast::<String>() {
            *msg
        } else {
            "<opaque panic payload>".to_string()
        };
        Arc::new(PanicCause { message })
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task panicked: {}", self.message)
    }
}

impl Error for PanicCause {}

/// Marker cause used when a cancellation has to be reported through a
/// failure-shaped channel (e.g. the default visitor behavior).
#[derive(Debug, Clone, Copy)]
pub struct CancelledError;

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cancelled")
    }
}

impl Error for CancelledError {}

/// The process-wide cancellation cause.
pub fn cancellation_cause() -> Cause {
    static INSTANCE: OnceLock<Cause> = OnceLock::new();
    INSTANCE.get_or_init(|| Arc::new(CancelledError)).clone()
}

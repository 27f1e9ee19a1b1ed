use std::sync::Arc;

/// Anything that can be asked to stop before it succeeds.
pub trait Cancellable {
    /// Attempt to cancel. Returns `true` iff this call transitioned the
    /// subject into its cancelled state; calls on an already-terminal subject
    /// return `false` and change nothing.
    ///
    /// `may_interrupt` additionally asks the runner (if one is mid-flight) to
    /// stop, via the cooperative interrupt facility; `cancel(false)` only
    /// transitions state.
    fn cancel(&self, may_interrupt: bool) -> bool;
}

// wrapping is idempotent: a reference, box or arc of a cancellable is itself
// cancellable
impl<T: Cancellable + ?Sized> Cancellable for &T {
    fn cancel(&self, may_interrupt: bool) -> bool {
        (**self).cancel(may_interrupt)
    }
}

impl<T: Cancellable + ?Sized> Cancellable for Box<T> {
    fn cancel(&self, may_interrupt: bool) -> bool {
        (**self).cancel(may_interrupt)
    }
}

impl<T: Cancellable + ?Sized> Cancellable for Arc<T> {
    fn cancel(&self, may_interrupt: bool) -> bool {
        (**self).cancel(may_interrupt)
    }
}

/// Cancel every item in the group. Returns the logical OR of the individual
/// results: `true` iff at least one call caused a transition. Every item is
/// visited even once the result is known.
pub fn cancel_all<I>(items: I, may_interrupt: bool) -> bool
where
    I: IntoIterator,
    I::Item: Cancellable,
{
    let mut any = false;
    for item in items {
        any |= item.cancel(may_interrupt);
    }
    any
}

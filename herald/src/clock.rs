//! The process-wide monotonic clock.
//!
//! All scheduling decisions are made in monotonic nanoseconds measured from a
//! single anchor taken the first time anyone asks. Wall-clock time is never
//! consulted, so the schedule is immune to clock adjustments.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the process anchor.
pub fn now_nanos() -> u64 {
    let anchor = *ANCHOR.get_or_init(Instant::now);
    // u64 nanoseconds cover ~584 years of process uptime
    Instant::now().duration_since(anchor).as_nanos() as u64
}

/// A duration as nanoseconds, saturating at the representable maximum.
pub fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Time remaining from `now` until `deadline`, zero when already due.
pub(crate) fn until(deadline_nanos: u64, now_nanos: u64) -> Duration {
    Duration::from_nanos(deadline_nanos.saturating_sub(now_nanos))
}

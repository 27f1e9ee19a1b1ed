//! Rescheduling policies: pure functions from a completed occurrence's timing
//! to the next occurrence's start.

use std::time::Duration;

use crate::clock;

/// Decides when (in monotonic nanoseconds) the next occurrence of a recurring
/// task starts.
pub trait Rescheduler<V>: Send + Sync {
    /// Next scheduled start, given the prior occurrence's scheduled start,
    /// the completion time `now`, and the prior result when there was one.
    fn next_start(&self, prior_start_nanos: u64, now_nanos: u64, last_result: Option<&V>) -> u64;

    /// Start for an occurrence re-enqueued by `resume()`. `paused_start_nanos`
    /// is the scheduled start the paused occurrence never got to use, so the
    /// default treats it like a completed prior occurrence; fixed-rate
    /// overrides this to reuse the slot itself.
    fn resume_start(&self, paused_start_nanos: u64, now_nanos: u64) -> u64 {
        self.next_start(paused_start_nanos, now_nanos, None)
    }
}

impl<V, F> Rescheduler<V> for F
where
    F: Fn(u64, u64, Option<&V>) -> u64 + Send + Sync,
{
    fn next_start(&self, prior_start_nanos: u64, now_nanos: u64, last_result: Option<&V>) -> u64 {
        self(prior_start_nanos, now_nanos, last_result)
    }
}

/// Starts anchored to the schedule: each occurrence is one period after the
/// previous occurrence's *scheduled* start, independent of how long it ran.
#[derive(Clone, Copy, Debug)]
pub struct FixedRate {
    period_nanos: u64,
    skip_missed: bool,
}

impl FixedRate {
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn every(period: Duration) -> FixedRate {
        let period_nanos = clock::duration_nanos(period);
        assert!(period_nanos > 0, "fixed-rate period must be positive");
        FixedRate {
            period_nanos,
            skip_missed: false,
        }
    }

    /// Catch up when running behind: skip missed occurrences so that at most
    /// one overdue start remains enqueued.
    pub fn skipping_missed(mut self) -> FixedRate {
        self.skip_missed = true;
        self
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_nanos)
    }

    fn caught_up(&self, next: u64, now: u64) -> u64 {
        if now.saturating_sub(next) > self.period_nanos {
            let behind = (now - next) / self.period_nanos;
            next + behind * self.period_nanos
        } else {
            next
        }
    }
}

impl<V> Rescheduler<V> for FixedRate {
    fn next_start(&self, prior_start_nanos: u64, now_nanos: u64, _last_result: Option<&V>) -> u64 {
        let next = prior_start_nanos + self.period_nanos;
        if self.skip_missed {
            self.caught_up(next, now_nanos)
        } else {
            next
        }
    }

    fn resume_start(&self, paused_start_nanos: u64, now_nanos: u64) -> u64 {
        // the paused occurrence never ran: reuse its slot, catching up when
        // it fell more than one period behind
        self.caught_up(paused_start_nanos, now_nanos)
    }
}

/// Starts anchored to completion: the next occurrence begins `delay` after
/// the previous one finished.
#[derive(Clone, Copy, Debug)]
pub struct FixedDelay {
    delay_nanos: u64,
}

impl FixedDelay {
    /// # Panics
    ///
    /// Panics if `delay` is zero.
    pub fn after(delay: Duration) -> FixedDelay {
        let delay_nanos = clock::duration_nanos(delay);
        assert!(delay_nanos > 0, "fixed-delay delay must be positive");
        FixedDelay { delay_nanos }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_nanos(self.delay_nanos)
    }
}

impl<V> Rescheduler<V> for FixedDelay {
    fn next_start(&self, _prior_start_nanos: u64, now_nanos: u64, _last_result: Option<&V>) -> u64 {
        now_nanos + self.delay_nanos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(period_ms: u64) -> FixedRate {
        FixedRate::every(Duration::from_millis(period_ms))
    }

    fn ms(v: u64) -> u64 {
        v * 1_000_000
    }

    #[test]
    fn fixed_rate_anchors_to_the_schedule() {
        let policy = rate(100);
        // k-th start is initial + k * period regardless of completion time
        let mut start = ms(0);
        for k in 1..=5u64 {
            start = Rescheduler::<()>::next_start(&policy, start, start + ms(310), None);
            assert_eq!(start, ms(100) * k);
        }
    }

    #[test]
    fn fixed_rate_without_skip_stays_behind() {
        // prior start 100ms, completion at 410ms: next is 200ms, already due
        let policy = rate(100);
        assert_eq!(
            Rescheduler::<()>::next_start(&policy, ms(100), ms(410), None),
            ms(200)
        );
    }

    #[test]
    fn fixed_rate_with_skip_catches_up() {
        // prior start 100ms, completion at 410ms: 200ms and 300ms are
        // skipped, leaving the single overdue start at 400ms
        let policy = rate(100).skipping_missed();
        assert_eq!(
            Rescheduler::<()>::next_start(&policy, ms(100), ms(410), None),
            ms(400)
        );
    }

    #[test]
    fn fixed_rate_with_skip_leaves_at_most_one_overdue() {
        let policy = rate(100).skipping_missed();
        for now in [ms(150), ms(290), ms(410), ms(1000), ms(1234)] {
            let next = Rescheduler::<()>::next_start(&policy, ms(0), now, None);
            // at most one period behind `now`
            assert!(now.saturating_sub(next) <= ms(100), "next={next} now={now}");
        }
    }

    #[test]
    fn fixed_rate_skip_is_idle_when_on_time() {
        let policy = rate(100).skipping_missed();
        assert_eq!(
            Rescheduler::<()>::next_start(&policy, ms(100), ms(180), None),
            ms(200)
        );
    }

    #[test]
    fn fixed_rate_resume_reuses_the_paused_slot() {
        let policy = rate(100);
        // resumed before the slot passed: keep it
        assert_eq!(
            Rescheduler::<()>::resume_start(&policy, ms(500), ms(450)),
            ms(500)
        );
        // resumed long after: catch up to the last missed slot
        assert_eq!(
            Rescheduler::<()>::resume_start(&policy, ms(500), ms(930)),
            ms(900)
        );
    }

    #[test]
    fn fixed_delay_anchors_to_completion() {
        let policy = FixedDelay::after(Duration::from_millis(50));
        assert_eq!(
            Rescheduler::<()>::next_start(&policy, ms(0), ms(417), None),
            ms(467)
        );
    }

    #[test]
    fn closures_are_policies() {
        let policy = |prior: u64, _now: u64, _last: Option<&u32>| prior + ms(7);
        assert_eq!(policy.next_start(ms(3), ms(100), None), ms(10));
    }

    #[test]
    #[should_panic(expected = "positive")]
    fn zero_period_is_refused() {
        let _ = FixedRate::every(Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "positive")]
    fn zero_delay_is_refused() {
        let _ = FixedDelay::after(Duration::ZERO);
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Sliding-window accounting of admitted work.
//!
//! Time here is counted in ticks of 1/1024 of a second (microseconds shifted
//! down by 10) rather than true milliseconds. The original accounting scheme
//! this preserves chose the power of two so every unit conversion is a shift;
//! rates come out about 2.4 % low as a result, which the consumers accept.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Ticks per second (the power-of-two stand-in for 1000 ms).
const TICKS_PER_SEC: u64 = 1024;

/// Real length of one tick. A queue "second" of 1024 ticks is therefore
/// 1.048576 wall seconds; that is the documented bias.
const MICROS_PER_TICK: u64 = 1024;

/// Stored stamps are rebased once `now` runs this far past the base.
const REBASE_LIMIT: u64 = (1 << 30) - 1;

/// Rebasing rounds the new base down to a multiple of this.
const REBASE_ALIGN: u64 = 1 << 29;

/// One admission bucket: everything admitted during one tick.
#[derive(Clone, Copy, Debug)]
struct Sample {
    /// Tick of admission, relative to the queue's stamp base.
    stamp: u32,
    /// Total amount admitted during that tick.
    amount: u32,
}

/// A fixed-capacity, time-windowed FIFO of admitted amounts.
///
/// [`admit`](Self::admit) suspends the calling task while the retained sum
/// sits at or above `rate × window`; samples leave the window once they are
/// older than `window` **and** past their working-time tail — a sample of
/// amount `a` keeps its slot for `a / rate` seconds, so one oversized
/// admission cannot clear the window before its amortized duration has
/// elapsed. That tail is what keeps throughput enforcement fair regardless of
/// request size.
///
/// A queue with `rate == 0` is unlimited and does no accounting at all.
///
/// Shared state is guarded by a sync mutex held only across bookkeeping;
/// every wait happens with the lock released.
#[derive(Debug)]
pub(crate) struct StatsQueue {
    rate: u32,
    window_ticks: u64,
    limit: u64,
    capacity: usize,
    epoch: Instant,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    events: VecDeque<Sample>,
    sum: u64,
    base: u64,
}

/// Outcome of one locked admission attempt.
enum Admission {
    Done,
    Retry(Duration),
}

impl StatsQueue {
    /// A queue enforcing `rate` units per second over a `window_secs` window
    /// (clamped to at least one second). `rate == 0` disables accounting.
    pub(crate) fn new(rate: u32, window_secs: u32) -> Self {
        let window_secs = u64::from(window_secs.max(1));
        Self {
            rate,
            window_ticks: window_secs * TICKS_PER_SEC,
            limit: u64::from(rate) * window_secs,
            capacity: usize::try_from(window_secs * TICKS_PER_SEC).unwrap_or(usize::MAX),
            epoch: Instant::now(),
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                sum: 0,
                base: 0,
            }),
        }
    }

    /// Accounts `amount` units, suspending until the window has room.
    pub(crate) async fn admit(&self, amount: u32) {
        if self.rate == 0 {
            return;
        }
        loop {
            match self.try_admit(amount) {
                Admission::Done => return,
                Admission::Retry(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Evicts every sample that has left the window.
    pub(crate) fn evict_expired(&self) {
        let mut inner = self.inner.lock();
        let _ = self.evict_locked(&mut inner);
    }

    /// How much longer the in-flight work should be held to amortize the
    /// excess over the window limit; zero while the window is not saturated.
    pub(crate) fn min_duration(&self) -> Duration {
        if self.rate == 0 {
            return Duration::ZERO;
        }
        let inner = self.inner.lock();
        if inner.sum <= self.limit {
            Duration::ZERO
        } else {
            // 1024 * 1024 instead of 1000 * 1000; see the module docs.
            Duration::from_micros((inner.sum - self.limit) * 1024 * 1024 / u64::from(self.rate))
        }
    }

    /// Sum of all retained samples.
    #[cfg(test)]
    pub(crate) fn sum(&self) -> u64 {
        self.inner.lock().sum
    }

    /// Number of retained samples.
    #[cfg(test)]
    pub(crate) fn sample_count(&self) -> usize {
        self.inner.lock().events.len()
    }

    fn try_admit(&self, amount: u32) -> Admission {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = self.evict_locked(inner);

        if inner.sum >= self.limit {
            // Wait out the head sample's window; if the working-time tail is
            // what pins it, poll again a tick later.
            let head = inner.events.front().expect("saturated queue holds at least one sample");
            let window_close = inner.base + u64::from(head.stamp) + self.window_ticks;
            return Admission::Retry(ticks_to_duration(window_close.saturating_sub(now).max(1)));
        }

        let stamp = u32::try_from(now - inner.base).unwrap_or(u32::MAX);
        if let Some(tail) = inner.events.back_mut() {
            if tail.stamp == stamp {
                if let Some(merged) = tail.amount.checked_add(amount) {
                    tail.amount = merged;
                    inner.sum += u64::from(amount);
                    return Admission::Done;
                }
                // A tick bucket overflowing u32 falls through to its own sample.
            }
        }
        if inner.events.len() >= self.capacity {
            // No slot until the head leaves the window.
            return Admission::Retry(ticks_to_duration(1));
        }
        inner.events.push_back(Sample { stamp, amount });
        inner.sum += u64::from(amount);
        Admission::Done
    }

    /// Advances the stamp base if needed, then pops expired heads.
    /// Returns the current tick.
    fn evict_locked(&self, inner: &mut Inner) -> u64 {
        let now = self.now_ticks();
        if now > inner.base + REBASE_LIMIT {
            let new_base = now & !(REBASE_ALIGN - 1);
            for sample in &mut inner.events {
                let absolute = inner.base + u64::from(sample.stamp);
                sample.stamp = u32::try_from(absolute.saturating_sub(new_base)).unwrap_or(u32::MAX);
            }
            inner.base = new_base;
        }
        if self.rate > 0 {
            let window_start = now.saturating_sub(self.window_ticks);
            while let Some(head) = inner.events.front() {
                let admitted = inner.base + u64::from(head.stamp);
                let working_tail = u64::from(head.amount) / u64::from(self.rate) * TICKS_PER_SEC;
                if admitted < window_start && admitted + working_tail <= now {
                    inner.sum -= u64::from(head.amount);
                    let _ = inner.events.pop_front();
                } else {
                    break;
                }
            }
        }
        now
    }

    fn now_ticks(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX) / MICROS_PER_TICK
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_micros(ticks.saturating_mul(MICROS_PER_TICK))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_secs(secs: u64) -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_secs(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_rate_never_accounts() {
        let queue = StatsQueue::new(0, 1);
        for _ in 0..1000 {
            queue.admit(u32::MAX).await;
        }
        assert_eq!(queue.sum(), 0);
        assert_eq!(queue.sample_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_without_waiting() {
        let queue = StatsQueue::new(1000, 2);
        let before = Instant::now();
        queue.admit(2000).await;
        assert_eq!(before, Instant::now(), "admit within the limit must not sleep");
        assert_eq!(queue.sum(), 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn same_tick_admissions_merge_into_one_sample() {
        let queue = StatsQueue::new(1_000_000, 1);
        for _ in 0..10 {
            queue.admit(7).await;
        }
        assert_eq!(queue.sample_count(), 1);
        assert_eq!(queue.sum(), 70);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_ticks_produce_distinct_samples() {
        let queue = StatsQueue::new(1_000_000, 1);
        queue.admit(1).await;
        tokio::time::advance(Duration::from_millis(5)).await;
        queue.admit(1).await;
        assert_eq!(queue.sample_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_admit_waits_for_window() {
        let queue = StatsQueue::new(1000, 1);
        queue.admit(1000).await;
        let before = Instant::now();
        queue.admit(1).await;
        let waited = Instant::now() - before;
        // Head admitted at tick 0 leaves after one window (1024 ticks) plus
        // its one-second working tail.
        assert!(waited >= Duration::from_millis(900), "waited only {waited:?}");
        assert!(waited <= Duration::from_millis(1400), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_admission_amortizes_before_eviction() {
        // 5000 units at 1000/sec: the sample's working tail holds it for five
        // seconds even though the window is only one second.
        let queue = StatsQueue::new(1000, 1);
        queue.admit(5000).await;
        let before = Instant::now();
        queue.admit(1).await;
        let waited = Instant::now() - before;
        assert!(waited >= Duration::from_millis(4500), "waited only {waited:?}");
        assert!(waited <= Duration::from_millis(5700), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_clears_sum_after_window_passes() {
        let queue = StatsQueue::new(1000, 1);
        queue.admit(600).await;
        advance_secs(3).await;
        queue.evict_expired();
        assert_eq!(queue.sum(), 0);
        assert_eq!(queue.sample_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn min_duration_zero_at_or_below_limit() {
        let queue = StatsQueue::new(1000, 1);
        queue.admit(1000).await;
        assert_eq!(queue.min_duration(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn min_duration_scales_with_excess() {
        let queue = StatsQueue::new(1000, 2);
        // The second admission lands while the sum is still under the limit
        // and pushes it past; admission never splits an amount.
        queue.admit(1000).await;
        queue.admit(2000).await;
        // (3000 - 2000) * 1024 * 1024 / 1000 microseconds.
        assert_eq!(queue.min_duration(), Duration::from_micros(1_048_576));
    }

    #[tokio::test(start_paused = true)]
    async fn rebase_preserves_sum_and_admission_behavior() {
        let queue = StatsQueue::new(1000, 1);
        queue.admit(250).await;
        // Push the clock far past the rebase threshold (2^30 ticks is about
        // 12 days) and keep the queue live across it.
        advance_secs(13 * 24 * 3600).await;
        queue.admit(250).await;
        assert_eq!(queue.sum(), 250, "stale sample evicted, fresh one retained");
        queue.admit(750).await;
        let before = Instant::now();
        queue.admit(1).await;
        let waited = Instant::now() - before;
        assert!(waited >= Duration::from_millis(900), "rebased queue must still enforce the window");
    }
}

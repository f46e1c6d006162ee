use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Paces a sender to a fixed interval.
///
/// Deadlines are `start + N * interval`, independent of when the previous tick actually
///  happened. A tick that is late (because sending took longer than the interval) does not
///  shift later deadlines, so the long-term rate stays at the target.
pub struct Pacer {
    interval: Duration,
    next_deadline: Instant,
}

impl Pacer {
    pub fn new(interval: Duration, start: Instant) -> Pacer {
        Pacer {
            interval,
            next_deadline: start + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    /// Waits for the next deadline (returning immediately if it is already due), and advances
    ///  the deadline by one interval
    pub async fn tick(&mut self) {
        let now = Instant::now();
        if now < self.next_deadline {
            sleep_until(self.next_deadline).await;
        }
        else {
            trace!("pacer is behind schedule by {:?}", now - self.next_deadline);
        }
        self.next_deadline += self.interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::time::sleep;

    #[rstest]
    #[case::fast(100, 0)]
    #[case::slow_work(100, 40)]
    #[case::work_exceeds_interval(100, 150)]
    #[case::one_second(1000, 10)]
    #[tokio::test(start_paused = true)]
    async fn test_no_cumulative_drift(#[case] interval_ms: u64, #[case] work_ms: u64) {
        let interval = Duration::from_millis(interval_ms);
        let start = Instant::now();
        let mut pacer = Pacer::new(interval, start);

        for n in 1..=20u32 {
            assert_eq!(pacer.next_deadline(), start + interval * n);
            pacer.tick().await;
            assert!(Instant::now() >= start + interval * n);
            sleep(Duration::from_millis(work_ms)).await;
        }

        // with work shorter than the interval, every tick is on time
        if work_ms < interval_ms {
            assert_eq!(Instant::now(), start + interval * 20 + Duration::from_millis(work_ms));
        }
        assert_eq!(pacer.next_deadline(), start + interval * 21);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_after_stall() {
        let interval = Duration::from_millis(100);
        let start = Instant::now();
        let mut pacer = Pacer::new(interval, start);

        sleep(Duration::from_millis(350)).await;

        // three deadlines passed: they are due immediately
        for _ in 0..3 {
            pacer.tick().await;
            assert_eq!(Instant::now(), start + Duration::from_millis(350));
        }

        pacer.tick().await;
        assert_eq!(Instant::now(), start + Duration::from_millis(400));
    }
}

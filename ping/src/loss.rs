use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;
use transport::Tsi;

/// Loss reported by the transport for one session, possibly accumulated from several reports
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LossEvent {
    pub tsi: Tsi,
    pub first_detected: Instant,
    pub lost: u64,
}

/// Coalesces loss reports to avoid a log line per lost packet during a burst of loss.
///
/// Reports from the session of the pending event are added to it as long as they arrive
///  within `window` after the event was first detected. A report from another session, or
///  after the window, flushes the pending event and starts a new one.
pub struct LossAggregator {
    window: Duration,
    pending: Option<LossEvent>,
}

impl LossAggregator {
    pub fn new(window: Duration) -> LossAggregator {
        LossAggregator {
            window,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&LossEvent> {
        self.pending.as_ref()
    }

    /// Records a loss report, returning a previously pending event if it was flushed
    pub fn on_loss(&mut self, tsi: Tsi, lost: u64, now: Instant) -> Option<LossEvent> {
        if let Some(pending) = &mut self.pending {
            if pending.tsi == tsi && now.saturating_duration_since(pending.first_detected) < self.window {
                pending.lost += lost;
                return None;
            }
        }

        let flushed = self.pending.replace(LossEvent {
            tsi,
            first_detected: now,
            lost,
        });
        if let Some(event) = &flushed {
            Self::log(event);
        }
        flushed
    }

    /// Flushes the pending event if its window has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<LossEvent> {
        match &self.pending {
            Some(pending) if now.saturating_duration_since(pending.first_detected) >= self.window => self.flush(),
            _ => None,
        }
    }

    /// Flushes the pending event regardless of its window
    pub fn flush(&mut self) -> Option<LossEvent> {
        let flushed = self.pending.take();
        if let Some(event) = &flushed {
            Self::log(event);
        }
        flushed
    }

    fn log(event: &LossEvent) {
        warn!("data loss: {} packets detected from {}", event.lost, event.tsi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const WINDOW: Duration = Duration::from_secs(1);

    fn tsi(n: u64) -> Tsi {
        Tsi { gsi: n, source_port: 7 }
    }

    #[rstest]
    #[case::within_window(500, vec![(1, 5)])]
    #[case::just_before_window_end(999, vec![(1, 5)])]
    #[case::at_window_end(1000, vec![(1, 2), (1, 3)])]
    #[case::after_window(1500, vec![(1, 2), (1, 3)])]
    fn test_coalesce_same_session(#[case] delay_ms: u64, #[case] expected: Vec<(u64, u64)>) {
        let start = Instant::now();
        let mut aggregator = LossAggregator::new(WINDOW);

        let mut flushed = vec![];
        flushed.extend(aggregator.on_loss(tsi(1), 2, start));
        flushed.extend(aggregator.on_loss(tsi(1), 3, start + Duration::from_millis(delay_ms)));
        flushed.extend(aggregator.flush());

        let flushed = flushed.iter()
            .map(|e| (e.tsi.gsi, e.lost))
            .collect::<Vec<_>>();
        assert_eq!(flushed, expected);
    }

    #[test]
    fn test_other_session_flushes() {
        let start = Instant::now();
        let mut aggregator = LossAggregator::new(WINDOW);

        assert_eq!(aggregator.on_loss(tsi(1), 2, start), None);
        let flushed = aggregator.on_loss(tsi(2), 4, start + Duration::from_millis(10)).unwrap();
        assert_eq!(flushed, LossEvent { tsi: tsi(1), first_detected: start, lost: 2 });

        let pending = aggregator.pending().unwrap();
        assert_eq!((pending.tsi, pending.lost), (tsi(2), 4));
    }

    #[test]
    fn test_window_starts_at_first_report() {
        let start = Instant::now();
        let mut aggregator = LossAggregator::new(WINDOW);

        aggregator.on_loss(tsi(1), 1, start);
        aggregator.on_loss(tsi(1), 1, start + Duration::from_millis(600));
        // 1200 ms after the first report, although only 600 ms after the previous one
        let flushed = aggregator.on_loss(tsi(1), 1, start + Duration::from_millis(1200)).unwrap();
        assert_eq!(flushed.lost, 2);
        assert_eq!(aggregator.pending().unwrap().first_detected, start + Duration::from_millis(1200));
    }

    #[test]
    fn test_poll() {
        let start = Instant::now();
        let mut aggregator = LossAggregator::new(WINDOW);

        assert_eq!(aggregator.poll(start), None);
        aggregator.on_loss(tsi(1), 3, start);
        assert_eq!(aggregator.poll(start + Duration::from_millis(999)), None);
        assert_eq!(aggregator.poll(start + Duration::from_millis(1000)).unwrap().lost, 3);
        assert_eq!(aggregator.pending(), None);
        assert_eq!(aggregator.flush(), None);
    }
}

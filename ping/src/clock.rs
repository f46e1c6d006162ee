use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the timestamps embedded in ping messages. Sender and receiver of a measurement
///  must see the same clock, i.e. this is only meaningful for an initiator measuring its own
///  echoed messages, or for processes on hosts with synchronized clocks.
pub trait Clock: Send + Sync + 'static {
    /// current time in microseconds since some fixed epoch
    fn now_micros(&self) -> u64;
}

/// Wall clock time, microseconds since the UNIX epoch
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock() {
        // 2020-01-01
        assert!(SystemClock.now_micros() > 1_577_836_800_000_000);
    }
}

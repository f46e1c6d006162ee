use std::fmt::{Display, Formatter};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::debug;

/// Below this number of samples per window, only the latest sample is reported
pub const MIN_SAMPLES_FOR_FULL_REPORT: u64 = 10;

/// Latencies are reported in milliseconds if no sample in the window is below this
const MILLIS_THRESHOLD_MICROS: f64 = 1000.0;

/// Running aggregate of latency samples (in microseconds) for one reporting window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencyWindow {
    sum: f64,
    sum_squares: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        LatencyWindow {
            sum: 0.0,
            sum_squares: 0.0,
            count: 0,
            min: f64::INFINITY,
            max: 0.0,
        }
    }
}

impl LatencyWindow {
    pub fn add(&mut self, latency_micros: f64) {
        self.sum += latency_micros;
        self.sum_squares += latency_micros * latency_micros;
        self.count += 1;
        self.min = self.min.min(latency_micros);
        self.max = self.max.max(latency_micros);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let average = self.average();
        // rounding can make the variance slightly negative for near-constant samples
        (self.sum_squares / self.count as f64 - average * average).max(0.0).sqrt()
    }
}

#[derive(Default)]
struct InboundStatistics {
    window: LatencyWindow,
    in_bytes: u64,
}

/// Everything the statistics tick reads and resets, taken as a single step
#[derive(Clone, Copy, Debug)]
pub struct StatisticsSnapshot {
    pub window: LatencyWindow,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub latency_seqno: u64,
    pub latency_current: u64,
}

/// Counters shared by sender, receiver and the reporting tick.
///
/// The receiver path writes the latency window and inbound bytes under a mutex that is held
///  only for the update itself, and the tick takes and resets them under the same mutex. The
///  sender writes outbound bytes and reads the latest latency through atomics.
pub struct PingStatistics {
    inbound: Mutex<InboundStatistics>,
    out_bytes: AtomicU64,
    latency_current: AtomicU64,
    latency_seqno: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl Default for PingStatistics {
    fn default() -> Self {
        PingStatistics::new()
    }
}

impl PingStatistics {
    pub fn new() -> PingStatistics {
        PingStatistics {
            inbound: Default::default(),
            out_bytes: AtomicU64::new(0),
            latency_current: AtomicU64::new(0),
            latency_seqno: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    pub fn on_sent(&self, bytes: usize) {
        self.out_bytes.fetch_add(bytes as u64, Ordering::AcqRel);
        self.messages_sent.fetch_add(1, Ordering::AcqRel);
    }

    /// a message was received and its latency measured
    pub fn on_received(&self, seqno: u64, latency_micros: u64, bytes: usize) {
        let mut inbound = self.inbound.lock().unwrap();
        inbound.in_bytes += bytes as u64;
        inbound.window.add(latency_micros as f64);
        self.latency_current.store(latency_micros, Ordering::Release);
        self.latency_seqno.store(seqno, Ordering::Release);
        self.messages_received.fetch_add(1, Ordering::AcqRel);
    }

    /// a message was received but did not yield a latency sample
    pub fn on_received_unmeasured(&self, bytes: usize) {
        self.inbound.lock().unwrap().in_bytes += bytes as u64;
        self.messages_received.fetch_add(1, Ordering::AcqRel);
    }

    /// The latency to embed in the next outgoing message: the latest sample if it belongs to
    ///  the immediately preceding message, the nominal value otherwise. A sample that is stale
    ///  (due to loss or reordering) is never sent.
    pub fn latency_for_next(&self, nominal_micros: u64) -> u64 {
        let sent = self.messages_sent.load(Ordering::Acquire);
        if sent > 0 && self.latency_seqno.load(Ordering::Acquire) + 1 == sent {
            self.latency_current.load(Ordering::Acquire)
        }
        else {
            nominal_micros
        }
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Acquire)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Acquire)
    }

    /// returns the window and byte counters, resetting them
    pub fn take_snapshot(&self) -> StatisticsSnapshot {
        let mut inbound = self.inbound.lock().unwrap();
        StatisticsSnapshot {
            window: mem::take(&mut inbound.window),
            in_bytes: mem::take(&mut inbound.in_bytes),
            out_bytes: self.out_bytes.swap(0, Ordering::AcqRel),
            latency_seqno: self.latency_seqno.load(Ordering::Acquire),
            latency_current: self.latency_current.load(Ordering::Acquire),
        }
    }
}

/// One periodic report line. Latencies are in microseconds, throughput in Mbit/s.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Report {
    /// too few samples for meaningful statistics: the latest sample only, in the unit chosen
    ///  by the window's minimum
    Sparse {
        seqno: u64,
        latency: f64,
        window_min: f64,
    },
    Full {
        seq_rate: f64,
        average: f64,
        min: f64,
        max: f64,
        stddev: f64,
        out_mbit: f64,
        in_mbit: f64,
    },
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Report::Sparse { seqno, latency, window_min } => {
                let (factor, unit) = unit_for(window_min);
                write!(f, "seqno={} time={:.1} {}", seqno, latency / factor, unit)
            }
            Report::Full { seq_rate, average, min, max, stddev, out_mbit, in_mbit } => {
                let (factor, unit) = unit_for(min);
                write!(f, "s={:.1} avg={:.1} min={:.1} max={:.1} stddev={:.1} {} o={:.2} i={:.2} mbit",
                       seq_rate, average / factor, min / factor, max / factor, stddev / factor, unit, out_mbit, in_mbit)
            }
        }
    }
}

fn unit_for(min_micros: f64) -> (f64, &'static str) {
    if min_micros < MILLIS_THRESHOLD_MICROS {
        (1.0, "us")
    }
    else {
        (1000.0, "ms")
    }
}

/// Turns the shared counters into one report per tick, using tumbling windows: everything is
///  reset on every tick, whether or not a report was produced.
pub struct StatisticsReporter {
    statistics: Arc<PingStatistics>,
    interval_start: Instant,
    last_seqno: u64,
}

impl StatisticsReporter {
    pub fn new(statistics: Arc<PingStatistics>, start: Instant) -> StatisticsReporter {
        StatisticsReporter {
            statistics,
            interval_start: start,
            last_seqno: 0,
        }
    }

    pub fn tick(&mut self, now: Instant) -> Option<Report> {
        let elapsed = now.saturating_duration_since(self.interval_start).as_secs_f64();
        let snapshot = self.statistics.take_snapshot();

        let per_second = |value: f64| if elapsed > 0.0 { value / elapsed } else { 0.0 };

        let report = match snapshot.window.count() {
            0 => None,
            n if n < MIN_SAMPLES_FOR_FULL_REPORT => Some(Report::Sparse {
                seqno: snapshot.latency_seqno,
                latency: snapshot.latency_current as f64,
                window_min: snapshot.window.min(),
            }),
            _ => Some(Report::Full {
                seq_rate: per_second(snapshot.latency_seqno.saturating_sub(self.last_seqno) as f64),
                average: snapshot.window.average(),
                min: snapshot.window.min(),
                max: snapshot.window.max(),
                stddev: snapshot.window.stddev(),
                out_mbit: per_second(snapshot.out_bytes as f64 * 8.0 / 1_000_000.0),
                in_mbit: per_second(snapshot.in_bytes as f64 * 8.0 / 1_000_000.0),
            }),
        };

        if report.is_none() {
            debug!("no latency samples in the last {:.1}s", elapsed);
        }

        self.interval_start = now;
        self.last_seqno = snapshot.latency_seqno;
        report
    }
}

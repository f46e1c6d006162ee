use std::collections::VecDeque;
use std::future;
use std::sync::Arc;

use anyhow::bail;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, Instrument};

use crate::clock::Clock;
use crate::config::PingConfig;
use crate::ping_transport::PingTransport;
use crate::receiver::{Echo, LatencyRecorder, MessageHandler, Receiver};
use crate::sender::Sender;
use crate::shutdown::Shutdown;
use crate::statistics::{PingStatistics, Report, StatisticsReporter};

/// Number of reports a [RunSummary] keeps, the oldest are dropped first
pub const KEPT_REPORTS: usize = 32;

/// What happened during a run
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub messages_sent: u64,
    pub messages_received: u64,
    /// the most recent report lines that were logged, in order
    pub reports: VecDeque<Report>,
}

/// Runs a ping session: starts the workers for the configured role, logs a statistics report
///  every report interval, and shuts down after the configured duration, when `shutdown` is
///  triggered from outside, or when a worker fails.
///
/// Both workers are joined before the transport is closed. The first worker error (if any) is
///  returned.
pub async fn run(config: Arc<PingConfig>, transport: Arc<dyn PingTransport>, clock: Arc<dyn Clock>, shutdown: Shutdown) -> anyhow::Result<RunSummary> {
    config.validate()?;
    if config.message_len() > transport.max_message_len() {
        bail!("message length {} exceeds the transport's maximum of {}", config.message_len(), transport.max_message_len());
    }

    info!("starting {} at {:.1} messages/s", config.role, config.frequency);

    let statistics = Arc::new(PingStatistics::new());
    let workers = spawn_workers(&config, &transport, &statistics, &clock, &shutdown);

    let start = Instant::now();
    let mut reporter = StatisticsReporter::new(statistics.clone(), start);
    let mut reports = VecDeque::with_capacity(KEPT_REPORTS);

    let mut report_ticks = interval_at(start + config.report_interval, config.report_interval);
    report_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end_of_run = async {
        match config.duration {
            Some(duration) => sleep_until(start + duration).await,
            None => future::pending().await,
        }
    };
    tokio::pin!(end_of_run);

    loop {
        select! {
            _ = shutdown.triggered() => break,
            _ = &mut end_of_run => {
                info!("run duration elapsed");
                shutdown.trigger();
                break;
            }
            _ = report_ticks.tick() => {
                if let Some(report) = reporter.tick(Instant::now()) {
                    info!("{}", report);
                    if reports.len() == KEPT_REPORTS {
                        reports.pop_front();
                    }
                    reports.push_back(report);
                }
            }
        }
    }

    info!("shutting down");
    shutdown.trigger();

    let mut first_error = None;
    for (name, handle) in workers {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context(format!("{} task panicked", name))),
        };
        match result {
            Ok(()) => debug!("{} finished", name),
            Err(e) => {
                error!("{} finished with error: {:#}", name, e);
                first_error.get_or_insert(e);
            }
        }
    }

    // workers are joined, nothing uses the transport any more
    transport.close();

    let summary = RunSummary {
        messages_sent: statistics.messages_sent(),
        messages_received: statistics.messages_received(),
        reports,
    };
    info!("{} messages sent, {} messages received", summary.messages_sent, summary.messages_received);

    match first_error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}

fn spawn_workers(config: &PingConfig, transport: &Arc<dyn PingTransport>, statistics: &Arc<PingStatistics>, clock: &Arc<dyn Clock>, shutdown: &Shutdown) -> Vec<(&'static str, JoinHandle<anyhow::Result<()>>)> {
    let mut workers = Vec::new();

    if config.role.produces() {
        let sender = Sender::new(config, transport.clone(), statistics.clone(), clock.clone(), shutdown.clone());
        workers.push(("sender", tokio::spawn(sender.run().instrument(tracing::info_span!("sender")))));
    }

    if config.role.consumes() {
        let handler: Box<dyn MessageHandler> = if config.role.echoes() {
            Box::new(Echo::new(transport.clone()))
        }
        else {
            Box::new(LatencyRecorder::new(statistics.clone(), clock.clone()))
        };
        let receiver = Receiver::new(config, transport.clone(), handler, shutdown.clone());
        workers.push(("receiver", tokio::spawn(receiver.run().instrument(tracing::info_span!("receiver")))));
    }

    workers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping_transport::MockPingTransport;
    use crate::role::Role;
    use crate::test_util::{LoopbackTransport, PausedClock};
    use std::time::Duration;
    use tokio::time::sleep;

    fn config(role: Role, frequency: f64, duration: Option<Duration>) -> Arc<PingConfig> {
        let mut config = PingConfig::new(role);
        config.frequency = frequency;
        config.payload_size = 100;
        config.duration = duration;
        Arc::new(config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_only_sends() {
        let transport = Arc::new(LoopbackTransport::new());
        let summary = run(config(Role::Source, 10.0, Some(Duration::from_millis(1050))), transport.clone(), Arc::new(PausedClock::new()), Shutdown::new()).await.unwrap();

        assert_eq!(summary.messages_sent, 10);
        assert_eq!(summary.messages_received, 0);
        assert!(summary.reports.is_empty());
        assert!(transport.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_shutdown() {
        let transport = Arc::new(LoopbackTransport::new());
        let shutdown = Shutdown::new();

        let shutdown2 = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(350)).await;
            shutdown2.trigger();
        });

        let summary = run(config(Role::Initiator, 10.0, None), transport.clone(), Arc::new(PausedClock::new()), shutdown).await.unwrap();
        assert_eq!(summary.messages_sent, 3);
        assert_eq!(summary.messages_received, 3);
        assert!(transport.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_every_interval() {
        let transport = Arc::new(LoopbackTransport::new());
        let summary = run(config(Role::Initiator, 20.0, Some(Duration::from_millis(6010))), transport, Arc::new(PausedClock::new()), Shutdown::new()).await.unwrap();

        assert_eq!(summary.reports.len(), 3);
        for report in &summary.reports {
            match report {
                Report::Full { min, max, .. } => {
                    assert_eq!(*min, 0.0);
                    assert_eq!(*max, 0.0);
                }
                other => panic!("expected full report, was {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_only_recent_reports() {
        let transport = Arc::new(LoopbackTransport::new());
        let duration = 2 * (KEPT_REPORTS as u64 + 3) * 1000 + 10;
        let summary = run(config(Role::Initiator, 10.0, Some(Duration::from_millis(duration))), transport, Arc::new(PausedClock::new()), Shutdown::new()).await.unwrap();

        assert_eq!(summary.reports.len(), KEPT_REPORTS);
        assert!(summary.messages_sent > 10 * 2 * KEPT_REPORTS as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_failure_shuts_down() {
        let mut transport = MockPingTransport::new();
        transport.expect_max_message_len().return_const(1400usize);
        transport.expect_send().times(1).returning(|buf| Ok(buf.len() - 1));
        transport.expect_close().times(1).return_const(());

        let result = run(config(Role::Source, 10.0, None), Arc::new(transport), Arc::new(PausedClock::new()), Shutdown::new()).await;
        assert!(result.unwrap_err().to_string().contains("short write"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_too_long() {
        let mut transport = MockPingTransport::new();
        transport.expect_max_message_len().return_const(50usize);
        transport.expect_close().never();

        let result = run(config(Role::Initiator, 10.0, None), Arc::new(transport), Arc::new(PausedClock::new()), Shutdown::new()).await;
        assert!(result.is_err());
    }
}

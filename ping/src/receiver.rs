use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::select;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use transport::{ReceivedMessage, RecvBatch};

use crate::clock::Clock;
use crate::config::PingConfig;
use crate::loss::LossAggregator;
use crate::message::PingMessage;
use crate::ping_transport::PingTransport;
use crate::shutdown::Shutdown;
use crate::statistics::PingStatistics;

/// What a receiver does with the messages it takes from the transport
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_messages(&self, messages: Vec<ReceivedMessage>) -> anyhow::Result<()>;
}

/// Measures the latency of received ping messages
pub struct LatencyRecorder {
    statistics: Arc<PingStatistics>,
    clock: Arc<dyn Clock>,
}

impl LatencyRecorder {
    pub fn new(statistics: Arc<PingStatistics>, clock: Arc<dyn Clock>) -> LatencyRecorder {
        LatencyRecorder { statistics, clock }
    }
}

#[async_trait]
impl MessageHandler for LatencyRecorder {
    async fn on_messages(&self, messages: Vec<ReceivedMessage>) -> anyhow::Result<()> {
        // one receive timestamp per batch
        let now = self.clock.now_micros();

        for received in messages {
            let msg = match PingMessage::deser(&received.payload) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("dropping unparsable message from {}: {}", received.tsi, e);
                    continue;
                }
            };

            if msg.send_time > now {
                warn!("timer mismatch: message {} from {} was sent at {}, after it was received at {}", msg.seqno, received.tsi, msg.send_time, now);
                self.statistics.on_received_unmeasured(received.payload.len());
                continue;
            }

            trace!("received message {} from {}", msg.seqno, received.tsi);
            self.statistics.on_received(msg.seqno, now - msg.send_time, received.payload.len());
        }
        Ok(())
    }
}

/// Sends every received message back unchanged, without measuring anything
pub struct Echo {
    transport: Arc<dyn PingTransport>,
}

impl Echo {
    pub fn new(transport: Arc<dyn PingTransport>) -> Echo {
        Echo { transport }
    }
}

#[async_trait]
impl MessageHandler for Echo {
    async fn on_messages(&self, messages: Vec<ReceivedMessage>) -> anyhow::Result<()> {
        for received in messages {
            let written = self.transport.send(&received.payload).await
                .map_err(|e| anyhow!("error echoing message from {}: {}", received.tsi, e))?;
            if written < received.payload.len() {
                return Err(anyhow!("short write echoing message from {}: {} of {} bytes", received.tsi, written, received.payload.len()));
            }
        }
        Ok(())
    }
}

/// Drains the transport until shutdown, passing messages to a [MessageHandler] and
///  aggregating reported loss.
pub struct Receiver {
    transport: Arc<dyn PingTransport>,
    handler: Box<dyn MessageHandler>,
    loss: LossAggregator,
    batch_size: usize,
    shutdown: Shutdown,
}

impl Receiver {
    pub fn new(config: &PingConfig, transport: Arc<dyn PingTransport>, handler: Box<dyn MessageHandler>, shutdown: Shutdown) -> Receiver {
        Receiver {
            transport,
            handler,
            loss: LossAggregator::new(config.loss_window),
            batch_size: config.batch_size,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("receiver started");

        let result = self.receive_loop().await;
        self.loss.flush();
        if let Err(e) = &result {
            error!("receiver failed: {:#}", e);
            self.shutdown.trigger();
        }

        debug!("receiver stopped");
        result
    }

    async fn receive_loop(&mut self) -> anyhow::Result<()> {
        while !self.shutdown.is_triggered() {
            let batch = self.transport.try_recv_batch(self.batch_size);
            self.loss.poll(Instant::now());

            match batch {
                Ok(RecvBatch::Messages(messages)) => {
                    self.handler.on_messages(messages).await?;
                }
                Ok(RecvBatch::WouldBlock) => {
                    select! {
                        biased;
                        _ = self.shutdown.triggered() => {}
                        r = self.transport.readable() => r
                            .map_err(|e| anyhow!("error waiting for inbound data: {}", e))?,
                    }
                }
                Ok(RecvBatch::Loss(report)) => {
                    debug!("transport reported {} lost packets from {}", report.lost, report.tsi);
                    self.loss.on_loss(report.tsi, report.lost, Instant::now());
                }
                Ok(RecvBatch::Closed) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    return Err(anyhow!("transport closed"));
                }
                Err(e) => {
                    return Err(anyhow!("error receiving messages: {}", e));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping_transport::MockPingTransport;
    use crate::role::Role;
    use crate::test_util::{LoopbackTransport, PausedClock};
    use mockall::Sequence;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use transport::{LossReport, Tsi};

    fn tsi() -> Tsi {
        Tsi { gsi: 5, source_port: 6 }
    }

    fn received(msg: &PingMessage) -> ReceivedMessage {
        ReceivedMessage { tsi: tsi(), payload: msg.to_bytes().to_vec() }
    }

    fn msg(seqno: u64, send_time: u64) -> PingMessage {
        PingMessage { seqno, send_time, latency: 0, payload: vec![1; 10] }
    }

    /// records the batches passed to it
    struct RecordingHandler(Arc<Mutex<Vec<Vec<ReceivedMessage>>>>);

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn on_messages(&self, messages: Vec<ReceivedMessage>) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(messages);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_recorder() {
        let statistics = Arc::new(PingStatistics::new());
        let clock = Arc::new(PausedClock::new());
        let recorder = LatencyRecorder::new(statistics.clone(), clock);

        sleep(Duration::from_millis(10)).await;
        recorder.on_messages(vec![
            received(&msg(3, 2_000)),
            received(&msg(4, 6_000)),
            received(&msg(5, 20_000)), // sent 'after' it was received
            ReceivedMessage { tsi: tsi(), payload: vec![1, 2, 3] },
        ]).await.unwrap();

        assert_eq!(statistics.messages_received(), 3);

        let snapshot = statistics.take_snapshot();
        assert_eq!(snapshot.window.count(), 2);
        assert_eq!(snapshot.window.min(), 4_000.0);
        assert_eq!(snapshot.window.max(), 8_000.0);
        assert_eq!(snapshot.latency_seqno, 4);
        assert_eq!(snapshot.latency_current, 4_000);
        assert_eq!(snapshot.in_bytes, 3 * PingMessage::encoded_len(10) as u64);
    }

    #[tokio::test]
    async fn test_echo() {
        let mut seq = Sequence::new();
        let mut transport = MockPingTransport::new();
        for seqno in [1, 2] {
            let expected = msg(seqno, 0).to_bytes().to_vec();
            transport.expect_send()
                .times(1)
                .in_sequence(&mut seq)
                .withf(move |buf| buf == expected.as_slice())
                .returning(|buf| Ok(buf.len()));
        }

        let echo = Echo::new(Arc::new(transport));
        echo.on_messages(vec![received(&msg(1, 0)), received(&msg(2, 0))]).await.unwrap();
    }

    #[tokio::test]
    async fn test_echo_short_write() {
        let mut transport = MockPingTransport::new();
        transport.expect_send()
            .times(1)
            .returning(|buf| Ok(buf.len() / 2));

        let echo = Echo::new(Arc::new(transport));
        let err = echo.on_messages(vec![received(&msg(1, 0)), received(&msg(2, 0))]).await.unwrap_err();
        assert!(err.to_string().contains("short write"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_batches_until_shutdown() {
        let transport = Arc::new(LoopbackTransport::new());
        let batches = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Shutdown::new();

        let mut config = PingConfig::new(Role::Receiver);
        config.batch_size = 2;
        let receiver = Receiver::new(&config, transport.clone(), Box::new(RecordingHandler(batches.clone())), shutdown.clone());
        let handle = tokio::spawn(receiver.run());

        for seqno in 0..5 {
            transport.send(&msg(seqno, 0).to_bytes()).await.unwrap();
        }
        sleep(Duration::from_millis(1)).await;

        let batch_sizes = batches.lock().unwrap().iter().map(|b| b.len()).collect::<Vec<_>>();
        assert_eq!(batch_sizes.iter().sum::<usize>(), 5);
        assert!(batch_sizes.iter().all(|&n| n <= 2));

        // blocked in the readiness wait, shutdown wakes it up
        assert!(!handle.is_finished());
        shutdown.trigger();
        timeout(Duration::from_millis(1), handle).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_is_aggregated_and_not_fatal() {
        let transport = Arc::new(LoopbackTransport::new());
        let shutdown = Shutdown::new();
        let batches = Arc::new(Mutex::new(Vec::new()));

        let receiver = Receiver::new(&PingConfig::new(Role::Receiver), transport.clone(), Box::new(RecordingHandler(batches.clone())), shutdown.clone());
        let handle = tokio::spawn(receiver.run());

        transport.inject_loss(3);
        transport.send(&msg(0, 0).to_bytes()).await.unwrap();
        sleep(Duration::from_millis(10)).await;

        assert!(!handle.is_finished());
        assert_eq!(batches.lock().unwrap().len(), 1);

        shutdown.trigger();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_is_fatal() {
        let mut transport = MockPingTransport::new();
        transport.expect_try_recv_batch()
            .returning(|_| Ok(RecvBatch::Closed));

        let shutdown = Shutdown::new();
        let receiver = Receiver::new(&PingConfig::new(Role::Receiver), Arc::new(transport), Box::new(RecordingHandler(Default::default())), shutdown.clone());

        let err = receiver.run().await.unwrap_err();
        assert!(err.to_string().contains("closed"));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_error_is_fatal() {
        let mut seq = Sequence::new();
        let mut transport = MockPingTransport::new();
        transport.expect_try_recv_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(RecvBatch::Loss(LossReport { tsi: tsi(), lost: 2 })));
        transport.expect_try_recv_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(io::Error::new(io::ErrorKind::ConnectionRefused, "boom")));

        let shutdown = Shutdown::new();
        let receiver = Receiver::new(&PingConfig::new(Role::Receiver), Arc::new(transport), Box::new(RecordingHandler(Default::default())), shutdown.clone());

        let err = receiver.run().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_start() {
        let mut transport = MockPingTransport::new();
        transport.expect_try_recv_batch()
            .returning(|_| Ok(RecvBatch::WouldBlock));
        transport.expect_readable()
            .returning(|| Ok(()));

        let shutdown = Shutdown::new();
        shutdown.trigger();
        let receiver = Receiver::new(&PingConfig::new(Role::Receiver), Arc::new(transport), Box::new(RecordingHandler(Default::default())), shutdown);
        receiver.run().await.unwrap();
    }
}

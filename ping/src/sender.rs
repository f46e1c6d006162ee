use std::sync::Arc;

use anyhow::anyhow;
use tokio::select;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::clock::Clock;
use crate::config::PingConfig;
use crate::message::PingMessage;
use crate::pacer::Pacer;
use crate::ping_transport::PingTransport;
use crate::shutdown::Shutdown;
use crate::statistics::PingStatistics;

/// Emits one ping message per interval until shutdown.
pub struct Sender {
    transport: Arc<dyn PingTransport>,
    statistics: Arc<PingStatistics>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    pacer: Pacer,
    payload: Vec<u8>,
}

impl Sender {
    pub fn new(config: &PingConfig, transport: Arc<dyn PingTransport>, statistics: Arc<PingStatistics>, clock: Arc<dyn Clock>, shutdown: Shutdown) -> Sender {
        Sender {
            transport,
            statistics,
            clock,
            shutdown,
            pacer: Pacer::new(config.send_interval(), Instant::now()),
            payload: vec![0u8; config.payload_size],
        }
    }

    /// Runs the send loop. A failed or short write ends the loop with an error after triggering
    ///  shutdown.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("sender started, interval {:?}", self.pacer.interval());

        let result = self.send_loop().await;
        if let Err(e) = &result {
            error!("sender failed: {:#}", e);
            self.shutdown.trigger();
        }

        debug!("sender stopped after {} messages", self.statistics.messages_sent());
        result
    }

    async fn send_loop(&mut self) -> anyhow::Result<()> {
        let nominal_latency = self.pacer.interval().as_micros() as u64;

        loop {
            select! {
                biased;
                _ = self.shutdown.triggered() => return Ok(()),
                _ = self.pacer.tick() => {}
            }

            let message = PingMessage {
                seqno: self.statistics.messages_sent(),
                send_time: self.clock.now_micros(),
                latency: self.statistics.latency_for_next(nominal_latency),
                payload: self.payload.clone(),
            };
            let buf = message.to_bytes();

            trace!("sending message {}", message.seqno);
            let written = select! {
                biased;
                _ = self.shutdown.triggered() => return Ok(()),
                r = self.transport.send(&buf) => r
                    .map_err(|e| anyhow!("error sending message {}: {}", message.seqno, e))?,
            };

            if written < buf.len() {
                return Err(anyhow!("short write sending message {}: {} of {} bytes", message.seqno, written, buf.len()));
            }
            self.statistics.on_sent(written);
        }
    }
}

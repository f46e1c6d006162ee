//! In-memory stand-ins for the network and the wall clock, for deterministic tests of the
//!  harness with tokio's paused time. They are part of the regular code so integration tests
//!  can use them.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use transport::{LossReport, ReceivedMessage, RecvBatch, Tsi};

use crate::clock::Clock;
use crate::ping_transport::PingTransport;

/// Microseconds since creation, following tokio's (possibly paused) time
pub struct PausedClock {
    start: Instant,
}

impl Default for PausedClock {
    fn default() -> Self {
        PausedClock::new()
    }
}

impl PausedClock {
    pub fn new() -> PausedClock {
        PausedClock { start: Instant::now() }
    }
}

impl Clock for PausedClock {
    fn now_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

enum Inbound {
    Message(Vec<u8>),
    Loss(u64),
}

/// A transport that delivers every sent message back to itself, without loss unless loss is
///  injected explicitly. It records everything that was sent.
pub struct LoopbackTransport {
    tsi: Tsi,
    loop_back: bool,
    max_message_len: usize,
    inbound: Mutex<VecDeque<Inbound>>,
    sent: Mutex<Vec<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        LoopbackTransport::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> LoopbackTransport {
        LoopbackTransport {
            tsi: Tsi { gsi: 0x1234, source_port: 7500 },
            loop_back: true,
            max_message_len: 1400,
            inbound: Default::default(),
            sent: Default::default(),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// a transport that records sent messages without receiving them, for feeding inbound
    ///  messages explicitly through [LoopbackTransport::deliver]
    pub fn without_loop_back() -> LoopbackTransport {
        LoopbackTransport {
            loop_back: false,
            ..LoopbackTransport::new()
        }
    }

    /// makes a message available for receiving
    pub fn deliver(&self, message: &[u8]) {
        self.inbound.lock().unwrap().push_back(Inbound::Message(message.to_vec()));
        self.notify.notify_one();
    }

    /// makes the next receive call report lost packets
    pub fn inject_loss(&self, lost: u64) {
        self.inbound.lock().unwrap().push_back(Inbound::Loss(lost));
        self.notify.notify_one();
    }

    /// all messages sent so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn has_inbound(&self) -> bool {
        !self.inbound.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl PingTransport for LoopbackTransport {
    fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    async fn send(&self, message: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport is closed"));
        }
        if message.len() > self.max_message_len {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "message too long"));
        }

        self.sent.lock().unwrap().push(message.to_vec());
        if self.loop_back {
            self.deliver(message);
        }
        Ok(message.len())
    }

    fn try_recv_batch(&self, max: usize) -> io::Result<RecvBatch> {
        if self.is_closed() {
            return Ok(RecvBatch::Closed);
        }

        let mut inbound = self.inbound.lock().unwrap();
        if let Some(Inbound::Loss(lost)) = inbound.front() {
            let report = LossReport { tsi: self.tsi, lost: *lost };
            inbound.pop_front();
            return Ok(RecvBatch::Loss(report));
        }

        let mut messages = Vec::new();
        while messages.len() < max {
            match inbound.front() {
                Some(Inbound::Message(_)) => {
                    if let Some(Inbound::Message(payload)) = inbound.pop_front() {
                        messages.push(ReceivedMessage { tsi: self.tsi, payload });
                    }
                }
                _ => break,
            }
        }

        if messages.is_empty() {
            Ok(RecvBatch::WouldBlock)
        }
        else {
            Ok(RecvBatch::Messages(messages))
        }
    }

    async fn readable(&self) -> io::Result<()> {
        loop {
            if self.is_closed() || self.has_inbound() {
                return Ok(());
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

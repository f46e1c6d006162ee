use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};
use tracing::{error, trace};

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<usize>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<usize> {
        trace!("UDP socket: sending packet to {:?}", to);

        self.send_to(packet_buf, to).await
            .inspect_err(|e| error!("error sending UDP packet to {:?}: {}", to, e))
    }
}

/// Limits outbound traffic to a configured number of bytes per second. Every packet reserves
///  its share of the time line when it is sent, and the next packet waits until the
///  reservation is used up.
///
/// Idle time is not accumulated, i.e. there are no bursts above the configured rate after a
///  pause.
pub struct RateLimiter {
    max_rate: u64,
    next_send: Option<Instant>,
}

impl RateLimiter {
    pub fn new(max_rate: u64) -> RateLimiter {
        RateLimiter {
            max_rate,
            next_send: None,
        }
    }

    pub async fn acquire(&mut self, len: usize) {
        let now = Instant::now();
        let start = match self.next_send {
            Some(t) if t > now => {
                trace!("rate limit reached, delaying packet by {:?}", t - now);
                sleep_until(t).await;
                t
            }
            _ => now,
        };
        self.next_send = Some(start + Duration::from_secs_f64(len as f64 / self.max_rate as f64));
    }
}

pub struct SendPipeline {
    socket: Arc<dyn SendSocket>,
    target: SocketAddr,
    rate_limiter: RateLimiter,
}

impl SendPipeline {
    pub fn new(socket: Arc<dyn SendSocket>, target: SocketAddr, max_rate: u64) -> SendPipeline {
        SendPipeline {
            socket,
            target,
            rate_limiter: RateLimiter::new(max_rate),
        }
    }

    pub async fn do_send_packet(&mut self, packet_buf: &[u8]) -> std::io::Result<usize> {
        self.rate_limiter.acquire(packet_buf.len()).await;
        self.socket.do_send_packet(self.target, packet_buf).await
    }
}

use std::io;

use async_trait::async_trait;
use transport::{MulticastTransport, RecvBatch};

/// The part of a transport the ping harness uses. This is the seam for replacing the network
///  with an in-memory transport or a mock in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PingTransport: Send + Sync + 'static {
    fn max_message_len(&self) -> usize;

    /// sends a message, returning the number of bytes written
    async fn send(&self, message: &[u8]) -> io::Result<usize>;

    /// non-blocking batched receive
    fn try_recv_batch(&self, max: usize) -> io::Result<RecvBatch>;

    /// waits until `try_recv_batch` may have something to return
    async fn readable(&self) -> io::Result<()>;

    fn close(&self);
}

#[async_trait]
impl PingTransport for MulticastTransport {
    fn max_message_len(&self) -> usize {
        Self::max_message_len(self)
    }

    async fn send(&self, message: &[u8]) -> io::Result<usize> {
        Self::send(self, message).await
    }

    fn try_recv_batch(&self, max: usize) -> io::Result<RecvBatch> {
        Self::try_recv_batch(self, max)
    }

    async fn readable(&self) -> io::Result<()> {
        Self::readable(self).await
    }

    fn close(&self) {
        Self::close(self)
    }
}

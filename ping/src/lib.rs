//! A multicast ping: a traffic generator and receiver for measuring latency, throughput and
//!  loss of the [transport] crate's multicast transport.
//!
//! A process plays one of several [role::Role]s. A *source* only sends, a *receiver* only
//!  receives, an *initiator* sends and measures the messages it gets back, and a *reflector*
//!  echoes everything it receives. Running an initiator against a reflector measures round
//!  trip latency, running an initiator alone on a multicast group with loop enabled measures
//!  local latency.
//!
//! Every message carries its sequence number, its send time, and the latest latency its
//!  sender observed. Receivers aggregate latency per report interval and log a summary line
//!  at the end of each interval.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod loss;
pub mod message;
pub mod pacer;
pub mod ping_transport;
pub mod receiver;
pub mod role;
pub mod sender;
pub mod shutdown;
pub mod statistics;
pub mod test_util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}

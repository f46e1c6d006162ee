use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rustc_hash::FxHashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::packet_header::{verify_checksum, PacketHeader, Tsi};
use crate::receive_stream::{CodecCache, ReceiveEvent, ReceiveStream};
use crate::send_pipeline::SendPipeline;
use crate::send_stream::SendStream;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportDirection {
    SendOnly,
    ReceiveOnly,
    Duplex,
}

impl TransportDirection {
    pub fn sends(&self) -> bool {
        !matches!(self, TransportDirection::ReceiveOnly)
    }

    pub fn receives(&self) -> bool {
        !matches!(self, TransportDirection::SendOnly)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReceivedMessage {
    pub tsi: Tsi,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LossReport {
    pub tsi: Tsi,
    pub lost: u64,
}

/// Outcome of a non-blocking batched receive
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecvBatch {
    /// at least one message, in the order they were received / recovered
    Messages(Vec<ReceivedMessage>),
    /// no message is available right now, wait for [MulticastTransport::readable]
    WouldBlock,
    /// Packets from a session were lost. Messages received before the loss was detected are
    ///  returned by previous calls, messages after it by subsequent calls.
    Loss(LossReport),
    /// the transport was closed
    Closed,
}

struct Session {
    stream: ReceiveStream,
    last_activity: Instant,
}

struct ReceiveState {
    sessions: FxHashMap<Tsi, Session>,
    session_idle_timeout: Duration,
    last_expiry: Instant,
    codecs: CodecCache,
    pending: VecDeque<(Tsi, ReceiveEvent)>,
    events: Vec<ReceiveEvent>,
    buf: Vec<u8>,
}

impl ReceiveState {
    /// Takes consecutive messages (up to `max`) from the front of the pending queue, or a single
    ///  loss report if that is at the front
    fn take_batch(&mut self, max: usize) -> Option<RecvBatch> {
        if let Some((tsi, ReceiveEvent::Loss(lost))) = self.pending.front() {
            let report = LossReport { tsi: *tsi, lost: *lost };
            self.pending.pop_front();
            return Some(RecvBatch::Loss(report));
        }

        let mut messages = Vec::new();
        while messages.len() < max {
            match self.pending.front() {
                Some((_, ReceiveEvent::Message(_))) => {
                    if let Some((tsi, ReceiveEvent::Message(payload))) = self.pending.pop_front() {
                        messages.push(ReceivedMessage { tsi, payload });
                    }
                }
                _ => break,
            }
        }

        if messages.is_empty() {
            None
        }
        else {
            Some(RecvBatch::Messages(messages))
        }
    }

    /// drops the receive state of sessions that were idle for the configured timeout, checking
    ///  at most once per timeout
    fn expire_idle_sessions(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_expiry) < self.session_idle_timeout {
            return;
        }
        self.last_expiry = now;

        let timeout = self.session_idle_timeout;
        self.sessions.retain(|tsi, session| {
            let idle = now.saturating_duration_since(session.last_activity);
            if idle >= timeout {
                info!("session {} idle for {:?} - dropping its receive state", tsi, idle);
                return false;
            }
            true
        });
    }

    fn on_datagram(&mut self, len: usize, from: SocketAddr, port: u16, now: Instant) {
        self.expire_idle_sessions(now);

        let Some(mut parse_buf) = verify_checksum(&self.buf[..len]) else {
            debug!("received packet with invalid checksum from {:?} - dropping", from);
            return;
        };

        let header = match PacketHeader::deser(&mut parse_buf) {
            Ok(header) => header,
            Err(e) => {
                debug!("received packet with unparsable header from {:?}: {} - dropping", from, e);
                return;
            }
        };

        if header.destination_port != port {
            trace!("received packet for port {} - dropping", header.destination_port);
            return;
        }

        let session = self.sessions
            .entry(header.tsi)
            .or_insert_with(|| {
                info!("new session {} from {:?}", header.tsi, from);
                Session { stream: ReceiveStream::new(header.tsi), last_activity: now }
            });
        session.last_activity = now;

        session.stream.on_packet(&header, parse_buf, &mut self.codecs, &mut self.events);

        let tsi = session.stream.tsi();
        self.pending.extend(self.events.drain(..).map(|e| (tsi, e)));
    }
}

/// A datagram transport over UDP multicast (or unicast), sending to and receiving from a
///  single group.
///
/// Sending and receiving are independent of each other and can happen concurrently from
///  different tasks.
pub struct MulticastTransport {
    config: Arc<TransportConfig>,
    tsi: Tsi,
    send_stream: Option<SendStream>,
    receive_socket: Option<UdpSocket>,
    receive_state: Mutex<ReceiveState>,
    closed: watch::Sender<bool>,
}

impl MulticastTransport {
    pub async fn bind(config: TransportConfig, direction: TransportDirection) -> anyhow::Result<MulticastTransport> {
        config.validate()?;
        let config = Arc::new(config);
        let tsi = Tsi::random();

        let receive_socket = if direction.receives() {
            let socket = Self::create_receive_socket(&config)?;
            info!("bound receive socket to {:?}", socket.local_addr()?);
            Some(socket)
        }
        else {
            None
        };

        let send_stream = if direction.sends() {
            let socket = Arc::new(Self::create_send_socket(&config)?);
            info!("sending to {:?} from {:?}", config.udp_target(), socket.local_addr()?);
            let send_pipeline = SendPipeline::new(Arc::new(socket), config.udp_target(), config.max_rate);
            Some(SendStream::new(&config, tsi, send_pipeline)?)
        }
        else {
            None
        };

        if let Some(fec) = &config.fec {
            info!("FEC enabled: RS({}, {}) with {} proactive parity packets per group", fec.n, fec.k, fec.proactive_parity);
        }
        info!("transport session {} ready ({:?})", tsi, direction);

        Ok(MulticastTransport {
            receive_state: Mutex::new(ReceiveState {
                sessions: Default::default(),
                session_idle_timeout: config.session_idle_timeout,
                last_expiry: Instant::now(),
                codecs: Default::default(),
                pending: Default::default(),
                events: Vec::new(),
                buf: vec![0; config.max_tpdu],
            }),
            config,
            tsi,
            send_stream,
            receive_socket,
            closed: watch::channel(false).0,
        })
    }

    fn unspecified_addr(target: IpAddr, port: u16) -> SocketAddr {
        match target {
            IpAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            IpAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        }
    }

    fn create_receive_socket(config: &TransportConfig) -> anyhow::Result<UdpSocket> {
        let bind_addr = Self::unspecified_addr(config.target, config.udp_port());

        let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
            .context("creating receive socket")?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(config.receive_buffer_size)
            .context("setting receive buffer size")?;
        socket.set_nonblocking(true)?;
        socket.bind(&bind_addr.into())
            .with_context(|| format!("binding receive socket to {:?}", bind_addr))?;

        if let IpAddr::V4(group) = config.target {
            if group.is_multicast() {
                socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
                    .with_context(|| format!("joining multicast group {}", group))?;
                debug!("joined multicast group {}", group);
            }
        }

        Ok(UdpSocket::from_std(socket.into())?)
    }

    fn create_send_socket(config: &TransportConfig) -> anyhow::Result<UdpSocket> {
        let bind_addr = Self::unspecified_addr(config.target, 0);

        let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
            .context("creating send socket")?;
        socket.set_send_buffer_size(config.send_buffer_size)
            .context("setting send buffer size")?;
        socket.set_nonblocking(true)?;
        socket.bind(&bind_addr.into())
            .context("binding send socket")?;

        if config.target.is_multicast() {
            socket.set_multicast_loop_v4(config.multicast_loop)?;
            socket.set_multicast_ttl_v4(config.multicast_hops)?;
        }

        Ok(UdpSocket::from_std(socket.into())?)
    }

    pub fn tsi(&self) -> Tsi {
        self.tsi
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn max_message_len(&self) -> usize {
        self.config.max_message_len()
    }

    pub fn local_receive_addr(&self) -> Option<SocketAddr> {
        self.receive_socket.as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Sends a message in a single packet, returning the number of message bytes written.
    pub async fn send(&self, message: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport is closed"));
        }
        match &self.send_stream {
            Some(send_stream) => send_stream.send_message(message).await,
            None => Err(io::Error::new(io::ErrorKind::Unsupported, "transport is receive-only")),
        }
    }

    /// Non-blocking receive of up to `max` messages.
    ///
    /// NB: A receive-only transport is never readable, and `try_recv_batch` always reports
    ///      `WouldBlock`, until the transport is closed.
    pub fn try_recv_batch(&self, max: usize) -> io::Result<RecvBatch> {
        if self.is_closed() {
            return Ok(RecvBatch::Closed);
        }
        let Some(socket) = &self.receive_socket else {
            return Ok(RecvBatch::WouldBlock);
        };

        let mut state = self.receive_state.lock().unwrap();
        loop {
            if let Some(batch) = state.take_batch(max) {
                return Ok(batch);
            }

            let state = &mut *state;
            match socket.try_recv_from(&mut state.buf) {
                Ok((len, from)) => {
                    trace!("received packet of {} bytes from {:?}", len, from);
                    state.on_datagram(len, from, self.config.port, Instant::now());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(RecvBatch::WouldBlock),
                Err(e) => {
                    warn!("error receiving from UDP socket: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Waits until the receive socket is readable or the transport is closed
    pub async fn readable(&self) -> io::Result<()> {
        match &self.receive_socket {
            Some(socket) => select! {
                r = socket.readable() => r,
                _ = self.wait_closed() => Ok(()),
            },
            None => {
                self.wait_closed().await;
                Ok(())
            }
        }
    }

    async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        // the sender lives as long as self, so this can not fail
        let _ = closed.wait_for(|c| *c).await;
    }

    /// Marks the transport as closed: pending and subsequent receive calls report `Closed`,
    ///  sending fails.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            info!("closing transport session {}", self.tsi);
        }
    }
}

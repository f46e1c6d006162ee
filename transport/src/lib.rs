//! A datagram transport over UDP multicast with transparent forward error correction.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *messages*, each message going into a single
//!   UDP packet. There is no fragmentation, so the maximum message size is derived from the
//!   configured maximum TPDU.
//! * One sender, many receivers: packets go to a multicast group (or a unicast address), and
//!   every receiver that joined the group gets them
//! * There is no retransmission and no acknowledgement. Receivers detect gaps in the packet
//!   sequence and report them to the application as loss
//! * Optionally, the sender adds proactive Reed-Solomon parity after every coding group of
//!   `k` data packets, so receivers can recover from up to that many lost packets per group
//!   without any feedback to the sender
//! * Every packet carries a checksum, corrupted packets are dropped and eventually reported
//!   as lost
//! * Outbound traffic is limited to a configured rate
//! * Receiving is non-blocking and batched, with a readiness notification that integrates
//!   with `tokio::select!`
//!
//! ## Sessions
//!
//! Each transport instance has a random *transport session identifier* (TSI), consisting of a
//!  64 bit global session id and a 16 bit source port. Receivers keep separate state for each
//!  TSI they receive packets from, and report loss per TSI.
//!
//! In addition, every packet carries a *data-destination port*. Receivers drop packets for
//!  other ports, allowing several unrelated transports to share a multicast group and UDP port.
//!
//! ## Header
//!
//! Packet header - all numbers in network byte order (BE):
//! ```ascii
//!  0: protocol version (u8), currently 1
//!  1: flags (8 bits):
//!     * bit 0: 0 for data, 1 for parity
//!     * bit 7: FEC header present
//!     * other bits: unused, must be 0
//!  2: global session id (u64)
//! 10: source port (u16)
//! 12: data-destination port (u16)
//! 14: sequence number (u64): the data packet's sequence number. Parity packets do not consume
//!      sequence numbers, they carry the number of their coding group's first data packet
//!
//!  FEC header (only if flag bit 7 is set):
//! 22: coding group (u64): sequence number of the group's first data packet
//! 30: index inside the coding group (u8): 0..k for data, k..n for parity
//! 31: n (u8)
//! 32: k (u8)
//! ```
//!
//! The header is followed by the payload and a CRC-32 (ISO HDLC) checksum (u32 BE) over all
//!  preceding bytes of the packet.
//!
//! ## FEC
//!
//! The sender collects the messages of a coding group. Messages have different lengths, so for
//!  coding purposes each message is represented by a block of the group's block size: the
//!  message length (u16 BE), the message, and zero padding. The block size is the length of the
//!  group's longest message + 2.
//!
//! Data packets are sent immediately, carrying the message without padding. After the group's
//!  `k`-th data packet, the sender calculates the configured number of parity blocks (codeword
//!  indices `k`, `k+1`, ...) and sends them as parity packets.
//!
//! The receiver buffers the blocks of the current group per session. As soon as it has `k`
//!  blocks of a group with some of the data missing, it reconstructs the missing messages and
//!  delivers them (i.e. recovered messages can be delivered out of order). When packets of a
//!  later group arrive, messages still missing from the current group are reported as lost.

pub mod config;
pub mod end_point;
mod fec_block;
pub mod packet_header;
mod receive_stream;
mod safe_converter;
mod send_pipeline;
mod send_stream;

pub use config::{FecConfig, TransportConfig};
pub use end_point::{LossReport, MulticastTransport, ReceivedMessage, RecvBatch, TransportDirection};
pub use packet_header::Tsi;

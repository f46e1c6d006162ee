use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::bail;
use fec::reed_solomon::ReedSolomon;

use crate::packet_header::PacketHeader;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FecConfig {
    /// total number of blocks per coding group
    pub n: usize,
    /// number of data packets per coding group
    pub k: usize,
    /// This is the number of parity packets sent proactively after every group of `k` data
    ///  packets, allowing receivers to recover from up to this many lost packets per group.
    pub proactive_parity: usize,
}

impl FecConfig {
    pub const DEFAULT_N: usize = 255;
    pub const DEFAULT_K: usize = 64;
    pub const DEFAULT_PROACTIVE_PARITY: usize = 4;

    pub fn new(n: usize, k: usize) -> FecConfig {
        FecConfig {
            n,
            k,
            proactive_parity: Self::DEFAULT_PROACTIVE_PARITY.min(n.saturating_sub(k)),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ReedSolomon::new(self.n, self.k)?;
        if self.proactive_parity == 0 {
            bail!("FEC requires at least one proactive parity packet per group");
        }
        if self.proactive_parity > self.n - self.k {
            bail!("RS({}, {}) has only {} parity blocks, {} proactive parity packets were requested", self.n, self.k, self.n - self.k, self.proactive_parity);
        }
        Ok(())
    }
}

impl Default for FecConfig {
    fn default() -> Self {
        FecConfig::new(Self::DEFAULT_N, Self::DEFAULT_K)
    }
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// multicast group or unicast address that data is sent to
    pub target: IpAddr,

    /// The data-destination port carried in every packet header. Receivers ignore packets for
    ///  other ports, so several transports can share a group.
    pub port: u16,

    /// If set, UDP traffic goes through this port instead of `port`
    pub udp_encap_port: Option<u16>,

    /// Maximum transport PDU, i.e. IP packet size including IP and UDP headers. Packets are
    ///  never fragmented by the transport, so this limits the maximum message size.
    pub max_tpdu: usize,

    /// ceiling for outbound traffic in bytes per second
    pub max_rate: u64,

    pub multicast_loop: bool,
    pub multicast_hops: u32,

    pub send_buffer_size: usize,
    pub receive_buffer_size: usize,

    pub fec: Option<FecConfig>,

    /// receive state of a session is dropped after this long without a packet from it
    pub session_idle_timeout: Duration,
}

impl TransportConfig {
    pub const DEFAULT_TARGET: IpAddr = IpAddr::V4(Ipv4Addr::new(239, 192, 0, 1));
    pub const DEFAULT_PORT: u16 = 7500;

    /// IPv4 header without options + UDP header
    const IP_UDP_OVERHEAD: usize = 20 + 8;

    /// length prefix of a message inside an FEC block
    pub const FEC_LENGTH_PREFIX: usize = size_of::<u16>();

    pub fn new(target: IpAddr, port: u16) -> TransportConfig {
        TransportConfig {
            target,
            port,
            udp_encap_port: None,
            max_tpdu: 1500,
            max_rate: 16 * 1000 * 1000,
            multicast_loop: false,
            multicast_hops: 16,
            send_buffer_size: 1024 * 1024,
            receive_buffer_size: 1024 * 1024,
            fec: None,
            session_idle_timeout: Duration::from_secs(60),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            bail!("data-destination port must not be 0");
        }
        if self.udp_encap_port == Some(0) {
            bail!("UDP encapsulation port must not be 0");
        }
        if self.max_rate == 0 {
            bail!("rate limit must be positive");
        }
        if self.session_idle_timeout.is_zero() {
            bail!("session idle timeout must be positive");
        }
        if self.max_tpdu <= self.overhead() {
            bail!("max TPDU of {} bytes does not leave room for payload after {} bytes of headers", self.max_tpdu, self.overhead());
        }
        if self.max_tpdu > u16::MAX as usize {
            bail!("max TPDU of {} bytes exceeds the maximum IP packet size", self.max_tpdu);
        }
        if self.target.is_multicast() && self.target.is_ipv6() {
            bail!("IPv6 multicast is not supported: {}", self.target);
        }
        if let Some(fec) = &self.fec {
            fec.validate()?;
        }
        Ok(())
    }

    /// the UDP port that packets are actually sent to and received on
    pub fn udp_port(&self) -> u16 {
        self.udp_encap_port.unwrap_or(self.port)
    }

    pub fn udp_target(&self) -> SocketAddr {
        SocketAddr::new(self.target, self.udp_port())
    }

    fn overhead(&self) -> usize {
        let header_len = if self.fec.is_some() {
            PacketHeader::SERIALIZED_LEN_FEC + Self::FEC_LENGTH_PREFIX
        }
        else {
            PacketHeader::SERIALIZED_LEN_PLAIN
        };
        Self::IP_UDP_OVERHEAD + header_len + PacketHeader::CHECKSUM_LEN
    }

    /// This is the maximum length of an application message that fits into a single packet.
    ///
    /// NB: With FEC, parity packets carry a block with the message's length prefix, which is
    ///      accounted for here
    pub fn max_message_len(&self) -> usize {
        self.max_tpdu.saturating_sub(self.overhead())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::new(Self::DEFAULT_TARGET, Self::DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.udp_target(), SocketAddr::from(([239, 192, 0, 1], 7500)));
        assert_eq!(config.max_message_len(), 1500 - 28 - 22 - 4);
    }

    #[test]
    fn test_udp_encap_port() {
        let mut config = TransportConfig::default();
        config.udp_encap_port = Some(3056);
        assert_eq!(config.udp_port(), 3056);
        assert_eq!(config.port, 7500);
    }

    #[test]
    fn test_max_message_len_with_fec() {
        let mut config = TransportConfig::default();
        config.fec = Some(FecConfig::default());
        assert_eq!(config.max_message_len(), 1500 - 28 - 33 - 2 - 4);
    }

    #[rstest]
    #[case::default(FecConfig::default(), true)]
    #[case::small(FecConfig::new(6, 4), true)]
    #[case::no_parity_blocks(FecConfig::new(4, 4), false)]
    #[case::k_zero(FecConfig::new(4, 0), false)]
    #[case::n_too_big(FecConfig::new(256, 64), false)]
    #[case::too_much_proactive(FecConfig { n: 6, k: 4, proactive_parity: 3 }, false)]
    fn test_validate_fec(#[case] fec: FecConfig, #[case] valid: bool) {
        let mut config = TransportConfig::default();
        config.fec = Some(fec);
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[rstest]
    #[case::port_zero(|c: &mut TransportConfig| c.port = 0)]
    #[case::encap_port_zero(|c: &mut TransportConfig| c.udp_encap_port = Some(0))]
    #[case::rate_zero(|c: &mut TransportConfig| c.max_rate = 0)]
    #[case::idle_timeout_zero(|c: &mut TransportConfig| c.session_idle_timeout = Duration::ZERO)]
    #[case::tpdu_too_small(|c: &mut TransportConfig| c.max_tpdu = 54)]
    #[case::tpdu_too_big(|c: &mut TransportConfig| c.max_tpdu = 65536)]
    #[case::ipv6_multicast(|c: &mut TransportConfig| c.target = "ff02::1".parse().unwrap())]
    fn test_validate_invalid(#[case] modify: fn(&mut TransportConfig)) {
        let mut config = TransportConfig::default();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}

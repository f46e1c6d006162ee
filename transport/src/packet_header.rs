use std::fmt::{Display, Formatter};

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use crc::Crc;
use rand::Rng;

/// Transport session identifier: identifies the sending end of a transport instance across
///  all receivers, independent of the UDP addresses involved.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Tsi {
    pub gsi: u64,
    pub source_port: u16,
}

impl Tsi {
    pub fn random() -> Tsi {
        let mut rng = rand::thread_rng();
        Tsi {
            gsi: rng.gen(),
            source_port: rng.gen_range(1..=u16::MAX),
        }
    }
}

impl Display for Tsi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}:{}", self.gsi, self.source_port)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketKind {
    Data,
    Parity,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FecHeader {
    /// sequence number of the group's first data packet
    pub group: u64,
    /// codeword position inside the group: `0..k` for data, `k..n` for parity
    pub index: u8,
    pub n: u8,
    pub k: u8,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub tsi: Tsi,
    pub destination_port: u16,
    /// For data packets, this is the packet's own sequence number. Parity packets do not
    ///  consume sequence numbers, they repeat their group's number here.
    pub sequence_number: u64,
    pub fec: Option<FecHeader>,
}

static CHECKSUM: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

impl PacketHeader {
    pub const PROTOCOL_VERSION_1: u8 = 1;

    const FLAG_PARITY: u8 = 0x01;
    const FLAG_FEC: u8 = 0x80;

    pub const SERIALIZED_LEN_PLAIN: usize = 1 + 1 + 8 + 2 + 2 + 8;
    pub const SERIALIZED_LEN_FEC: usize = Self::SERIALIZED_LEN_PLAIN + 8 + 1 + 1 + 1;
    pub const CHECKSUM_LEN: usize = size_of::<u32>();

    pub fn serialized_len(&self) -> usize {
        if self.fec.is_some() {
            Self::SERIALIZED_LEN_FEC
        }
        else {
            Self::SERIALIZED_LEN_PLAIN
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let mut flags = 0;
        if self.kind == PacketKind::Parity {
            flags |= Self::FLAG_PARITY;
        }
        if self.fec.is_some() {
            flags |= Self::FLAG_FEC;
        }

        buf.put_u8(Self::PROTOCOL_VERSION_1);
        buf.put_u8(flags);
        buf.put_u64(self.tsi.gsi);
        buf.put_u16(self.tsi.source_port);
        buf.put_u16(self.destination_port);
        buf.put_u64(self.sequence_number);

        if let Some(fec) = &self.fec {
            buf.put_u64(fec.group);
            buf.put_u8(fec.index);
            buf.put_u8(fec.n);
            buf.put_u8(fec.k);
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        let version = buf.try_get_u8()?;
        if version != Self::PROTOCOL_VERSION_1 {
            bail!("unsupported protocol version {}", version);
        }

        let flags = buf.try_get_u8()?;
        if flags & !(Self::FLAG_PARITY | Self::FLAG_FEC) != 0 {
            bail!("unsupported flags {:02x}", flags);
        }

        let kind = if flags & Self::FLAG_PARITY != 0 {
            PacketKind::Parity
        }
        else {
            PacketKind::Data
        };

        let tsi = Tsi {
            gsi: buf.try_get_u64()?,
            source_port: buf.try_get_u16()?,
        };
        let destination_port = buf.try_get_u16()?;
        let sequence_number = buf.try_get_u64()?;

        let fec = if flags & Self::FLAG_FEC != 0 {
            let fec = FecHeader {
                group: buf.try_get_u64()?,
                index: buf.try_get_u8()?,
                n: buf.try_get_u8()?,
                k: buf.try_get_u8()?,
            };
            if fec.k == 0 || fec.k > fec.n || fec.index >= fec.n {
                bail!("inconsistent FEC header {:?}", fec);
            }
            Some(fec)
        }
        else {
            None
        };

        if kind == PacketKind::Parity && fec.is_none() {
            bail!("parity packet without FEC header");
        }

        Ok(PacketHeader {
            kind,
            tsi,
            destination_port,
            sequence_number,
            fec,
        })
    }
}

/// append the checksum over the packet's current contents
pub fn finalize_packet(buf: &mut BytesMut) {
    let checksum = CHECKSUM.checksum(buf.as_ref());
    buf.put_u32(checksum);
}

/// returns the packet without its trailing checksum, or `None` if the checksum does not match
pub fn verify_checksum(packet: &[u8]) -> Option<&[u8]> {
    if packet.len() < PacketHeader::CHECKSUM_LEN {
        return None;
    }
    let (content, mut checksum) = packet.split_at(packet.len() - PacketHeader::CHECKSUM_LEN);
    if CHECKSUM.checksum(content) == checksum.get_u32() {
        Some(content)
    }
    else {
        None
    }
}

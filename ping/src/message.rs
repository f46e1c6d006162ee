use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};

/// The message a sender emits once per tick.
///
/// All times are in microseconds. `send_time` is taken from the sender's clock, `latency` is
///  the most recent latency the sender observed for its own messages (or the nominal send
///  interval if it has no current sample).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PingMessage {
    pub seqno: u64,
    pub send_time: u64,
    pub latency: u64,
    pub payload: Vec<u8>,
}

impl PingMessage {
    const FIXED_LEN: usize = 8 + 8 + 8 + 4;

    /// number of bytes a message with a given payload size occupies on the wire
    pub fn encoded_len(payload_len: usize) -> usize {
        Self::FIXED_LEN + payload_len
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.seqno);
        buf.put_u64(self.send_time);
        buf.put_u64(self.latency);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(self.payload.len()));
        self.ser(&mut buf);
        buf
    }

    pub fn deser(mut buf: &[u8]) -> anyhow::Result<PingMessage> {
        let seqno = buf.try_get_u64()?;
        let send_time = buf.try_get_u64()?;
        let latency = buf.try_get_u64()?;
        let payload_len = buf.try_get_u32()? as usize;
        if payload_len != buf.remaining() {
            bail!("payload length {} does not match remaining {} bytes", payload_len, buf.remaining());
        }

        Ok(PingMessage {
            seqno,
            send_time,
            latency,
            payload: buf.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_ser() {
        let msg = PingMessage {
            seqno: 0x0102,
            send_time: 3,
            latency: 4,
            payload: vec![9, 8, 7],
        };

        let buf = msg.to_bytes();
        assert_eq!(buf.len(), PingMessage::encoded_len(3));
        assert_eq!(&buf[..], &[
            0, 0, 0, 0, 0, 0, 1, 2,
            0, 0, 0, 0, 0, 0, 0, 3,
            0, 0, 0, 0, 0, 0, 0, 4,
            0, 0, 0, 3,
            9, 8, 7,
        ]);
        assert_eq!(PingMessage::deser(&buf).unwrap(), msg);
    }

    #[test]
    fn test_deser_empty_payload() {
        let msg = PingMessage { seqno: 1, send_time: 2, latency: 3, payload: vec![] };
        assert_eq!(PingMessage::deser(&msg.to_bytes()).unwrap(), msg);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated_header(vec![0; 20])]
    #[case::payload_too_short(vec![0,0,0,0,0,0,0,1, 0,0,0,0,0,0,0,2, 0,0,0,0,0,0,0,3, 0,0,0,5, 1,2,3])]
    #[case::payload_too_long(vec![0,0,0,0,0,0,0,1, 0,0,0,0,0,0,0,2, 0,0,0,0,0,0,0,3, 0,0,0,1, 1,2,3])]
    fn test_deser_invalid(#[case] buf: Vec<u8>) {
        assert!(PingMessage::deser(&buf).is_err());
    }
}

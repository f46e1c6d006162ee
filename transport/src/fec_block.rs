//! Messages in a coding group have different lengths, while Reed-Solomon operates on blocks of
//!  identical size. A message's block is its length (u16 BE), followed by the message bytes,
//!  zero-padded to the group's block size (longest message + 2).

use bytes::{Buf, BufMut};

use crate::config::TransportConfig;
use crate::safe_converter::PrecheckedCast;

pub fn block_size_for<'a>(messages: impl IntoIterator<Item = &'a [u8]>) -> usize {
    messages.into_iter()
        .map(|m| m.len())
        .max()
        .unwrap_or(0)
        + TransportConfig::FEC_LENGTH_PREFIX
}

pub fn encode_block(message: &[u8], block_size: usize) -> Vec<u8> {
    debug_assert!(message.len() + TransportConfig::FEC_LENGTH_PREFIX <= block_size);

    let mut block = Vec::with_capacity(block_size);
    block.put_u16(message.len().prechecked_cast());
    block.put_slice(message);
    block.resize(block_size, 0);
    block
}

/// the message inside a (reconstructed) block, or `None` if the length prefix is inconsistent
pub fn decode_block(mut block: &[u8]) -> Option<&[u8]> {
    let len = block.try_get_u16().ok()? as usize;
    block.get(..len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::padded(&[7, 8], 6, vec![0, 2, 7, 8, 0, 0])]
    #[case::exact(&[7, 8], 4, vec![0, 2, 7, 8])]
    #[case::empty(&[], 2, vec![0, 0])]
    fn test_encode_block(#[case] message: &[u8], #[case] block_size: usize, #[case] expected: Vec<u8>) {
        let block = encode_block(message, block_size);
        assert_eq!(block, expected);
        assert_eq!(decode_block(&block), Some(message));
    }

    #[rstest]
    #[case::empty(&[])]
    #[case::truncated_prefix(&[0])]
    #[case::length_exceeds_block(&[0, 3, 1, 2])]
    fn test_decode_block_invalid(#[case] block: &[u8]) {
        assert_eq!(decode_block(block), None);
    }

    #[test]
    fn test_block_size_for() {
        let messages: Vec<&[u8]> = vec![&[1, 2, 3], &[], &[4]];
        assert_eq!(block_size_for(messages), 5);
        assert_eq!(block_size_for(Vec::<&[u8]>::new()), 2);
    }
}

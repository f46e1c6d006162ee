use std::io;

use bytes::{BufMut, BytesMut};
use fec::reed_solomon::ReedSolomon;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{FecConfig, TransportConfig};
use crate::fec_block::{block_size_for, encode_block};
use crate::packet_header::{finalize_packet, FecHeader, PacketHeader, PacketKind, Tsi};
use crate::safe_converter::PrecheckedCast;
use crate::send_pipeline::SendPipeline;

/// Collects the messages of the current coding group on the sender side. Once `k` messages
///  are collected, the group is complete and its parity blocks are calculated.
struct FecGroupEncoder {
    codec: ReedSolomon,
    proactive_parity: usize,
    group_start: u64,
    messages: Vec<Vec<u8>>,
}

impl FecGroupEncoder {
    fn new(config: &FecConfig) -> anyhow::Result<FecGroupEncoder> {
        Ok(FecGroupEncoder {
            codec: ReedSolomon::new(config.n, config.k)?,
            proactive_parity: config.proactive_parity,
            group_start: 0,
            messages: Vec::with_capacity(config.k),
        })
    }

    fn header_for(&self, index: usize) -> FecHeader {
        FecHeader {
            group: self.group_start,
            index: index.prechecked_cast(),
            n: self.codec.n().prechecked_cast(),
            k: self.codec.k().prechecked_cast(),
        }
    }

    /// Records a data message, returning the parity blocks (with their codeword index) if this
    ///  message completed the group
    fn on_data(&mut self, message: &[u8], next_sequence_number: u64) -> io::Result<Vec<(usize, Vec<u8>)>> {
        self.messages.push(message.to_vec());
        if self.messages.len() < self.codec.k() {
            return Ok(vec![]);
        }

        let block_size = block_size_for(self.messages.iter().map(|m| m.as_slice()));

        let blocks = self.messages.iter()
            .map(|m| encode_block(m, block_size))
            .collect::<Vec<_>>();

        let parity = (self.codec.k()..self.codec.k() + self.proactive_parity)
            .map(|index| {
                let mut parity_block = vec![0u8; block_size];
                self.codec.encode_parity(&blocks, index, &mut parity_block)
                    .map_err(io::Error::other)?;
                Ok((index, parity_block))
            })
            .collect::<io::Result<Vec<_>>>()?;

        trace!("completed FEC group {} with block size {}", self.group_start, block_size);
        self.messages.clear();
        self.group_start = next_sequence_number;
        Ok(parity)
    }
}

struct SendStreamInner {
    tsi: Tsi,
    destination_port: u16,
    max_message_len: usize,
    next_sequence_number: u64,
    fec: Option<FecGroupEncoder>,
    send_pipeline: SendPipeline,
    send_buf: BytesMut,
}

impl SendStreamInner {
    /// sends a single packet, returning the number of payload bytes that went out
    async fn send_packet(&mut self, header: PacketHeader, payload: &[u8]) -> io::Result<usize> {
        self.send_buf.clear();
        header.ser(&mut self.send_buf);
        self.send_buf.put_slice(payload);
        finalize_packet(&mut self.send_buf);

        let packet_len = self.send_buf.len();
        let sent = self.send_pipeline.do_send_packet(&self.send_buf).await?;
        if sent < packet_len {
            warn!("short write of packet {}: {} of {} bytes", header.sequence_number, sent, packet_len);
            return Ok(sent.saturating_sub(header.serialized_len()).min(payload.len()));
        }
        Ok(payload.len())
    }
}

/// The sending side of a transport: assigns sequence numbers, wraps messages into packets and
///  (optionally) adds proactive parity after every coding group.
pub struct SendStream {
    inner: Mutex<SendStreamInner>,
}

impl SendStream {
    pub fn new(config: &TransportConfig, tsi: Tsi, send_pipeline: SendPipeline) -> anyhow::Result<SendStream> {
        let fec = match &config.fec {
            Some(fec_config) => Some(FecGroupEncoder::new(fec_config)?),
            None => None,
        };

        Ok(SendStream {
            inner: Mutex::new(SendStreamInner {
                tsi,
                destination_port: config.port,
                max_message_len: config.max_message_len(),
                next_sequence_number: 0,
                fec,
                send_pipeline,
                send_buf: BytesMut::with_capacity(config.max_tpdu),
            }),
        })
    }

    /// Sends a message as a single packet, returning the number of message bytes written. A
    ///  result less than the message's length means the packet was truncated by the socket.
    pub async fn send_message(&self, message: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().await;

        if message.len() > inner.max_message_len {
            debug!("message has a maximum length of {} to fit a single packet, was {}", inner.max_message_len, message.len());
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("message length {} exceeds maximum of {}", message.len(), inner.max_message_len)));
        }

        let sequence_number = inner.next_sequence_number;
        inner.next_sequence_number += 1;

        let header = PacketHeader {
            kind: PacketKind::Data,
            tsi: inner.tsi,
            destination_port: inner.destination_port,
            sequence_number,
            fec: inner.fec.as_ref()
                .map(|fec| fec.header_for((sequence_number - fec.group_start) as usize)),
        };

        // the message belongs to its coding group even if sending it fails, so the group's
        //  indices stay aligned with the sequence numbers
        let next_sequence_number = inner.next_sequence_number;
        let parity = match &mut inner.fec {
            Some(fec) => {
                let headers = (fec.codec.k()..fec.codec.n())
                    .map(|index| fec.header_for(index))
                    .collect::<Vec<_>>();
                fec.on_data(message, next_sequence_number)?
                    .into_iter()
                    .map(|(index, block)| (headers[index - fec.codec.k()], block))
                    .collect::<Vec<_>>()
            }
            None => vec![],
        };

        trace!("sending data packet {}", sequence_number);
        let written = inner.send_packet(header, message).await?;
        if written < message.len() {
            return Ok(written);
        }

        for (fec_header, block) in parity {
            let header = PacketHeader {
                kind: PacketKind::Parity,
                tsi: inner.tsi,
                destination_port: inner.destination_port,
                sequence_number: fec_header.group,
                fec: Some(fec_header),
            };
            trace!("sending parity packet {} for group {}", fec_header.index, fec_header.group);
            inner.send_packet(header, &block).await?;
        }

        Ok(message.len())
    }
}

use std::collections::hash_map::Entry;
use std::sync::Arc;

use fec::reed_solomon::ReedSolomon;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::config::TransportConfig;
use crate::fec_block::{decode_block, encode_block};
use crate::packet_header::{FecHeader, PacketHeader, PacketKind, Tsi};

#[derive(Debug, Eq, PartialEq)]
pub enum ReceiveEvent {
    Message(Vec<u8>),
    /// this many data packets were lost and could not be recovered
    Loss(u64),
}

/// Reed-Solomon codecs by `(n, k)`, shared by all sessions since building the generator
///  matrix involves a matrix inversion
#[derive(Default)]
pub struct CodecCache {
    codecs: FxHashMap<(u8, u8), Arc<ReedSolomon>>,
}

impl CodecCache {
    pub fn get(&mut self, n: u8, k: u8) -> Option<Arc<ReedSolomon>> {
        match self.codecs.entry((n, k)) {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(e) => {
                match ReedSolomon::new(n as usize, k as usize) {
                    Ok(codec) => Some(e.insert(Arc::new(codec)).clone()),
                    Err(err) => {
                        warn!("cannot decode FEC groups with n={}, k={}: {}", n, k, err);
                        None
                    }
                }
            }
        }
    }
}

/// The blocks of a single coding group that were received so far
struct FecGroup {
    start: u64,
    codec: Arc<ReedSolomon>,

    /// data messages at `0..k` (received or recovered), parity blocks at `k..n`
    blocks: Vec<Option<Vec<u8>>>,
    block_size: Option<usize>,

    /// Missing data packets before this index are not counted as lost: they were sent before
    ///  the receiver joined the session
    first_counted: usize,
}

impl FecGroup {
    fn new(start: u64, codec: Arc<ReedSolomon>, first_counted: usize) -> FecGroup {
        FecGroup {
            start,
            blocks: vec![None; codec.n()],
            codec,
            block_size: None,
            first_counted,
        }
    }

    fn k(&self) -> usize {
        self.codec.k()
    }

    fn num_missing(&self) -> u64 {
        (self.first_counted..self.k())
            .filter(|&i| self.blocks[i].is_none())
            .count() as u64
    }

    fn is_complete(&self) -> bool {
        self.blocks[..self.k()].iter().all(|b| b.is_some())
    }

    fn on_block(&mut self, kind: PacketKind, index: usize, payload: &[u8], events: &mut Vec<ReceiveEvent>) {
        if self.blocks[index].is_some() {
            trace!("duplicate block {} for FEC group {} - dropping", index, self.start);
            return;
        }

        match kind {
            PacketKind::Data => {
                if index >= self.k() {
                    debug!("data packet with parity index {} - dropping", index);
                    return;
                }
                events.push(ReceiveEvent::Message(payload.to_vec()));
                self.blocks[index] = Some(payload.to_vec());
            }
            PacketKind::Parity => {
                if index < self.k() {
                    debug!("parity packet with data index {} - dropping", index);
                    return;
                }
                if payload.len() < TransportConfig::FEC_LENGTH_PREFIX {
                    debug!("parity block is too short for a length prefix - dropping");
                    return;
                }
                match self.block_size {
                    Some(block_size) if block_size != payload.len() => {
                        warn!("parity block of FEC group {} has size {}, expected {} - dropping", self.start, payload.len(), block_size);
                        return;
                    }
                    _ => self.block_size = Some(payload.len()),
                }
                self.blocks[index] = Some(payload.to_vec());
            }
        }

        self.try_recover(events);
    }

    /// If enough blocks are present to recover missing data, do so and deliver the recovered
    ///  messages
    fn try_recover(&mut self, events: &mut Vec<ReceiveEvent>) {
        let Some(block_size) = self.block_size else {
            return;
        };
        let k = self.k();
        if self.is_complete() || self.blocks.iter().filter(|b| b.is_some()).count() < k {
            return;
        }

        let mut parity_indices = (k..self.codec.n())
            .filter(|&i| self.blocks[i].is_some())
            .collect::<Vec<_>>()
            .into_iter();

        let mut slots = Vec::with_capacity(k);
        let mut indices = Vec::with_capacity(k);
        for i in 0..k {
            match &self.blocks[i] {
                Some(message) => {
                    if message.len() + TransportConfig::FEC_LENGTH_PREFIX > block_size {
                        warn!("message {} of FEC group {} does not fit the group's block size {} - cannot recover", i, self.start, block_size);
                        return;
                    }
                    slots.push(encode_block(message, block_size));
                    indices.push(i);
                }
                None => {
                    let Some(p) = parity_indices.next() else {
                        return;
                    };
                    let Some(parity) = &self.blocks[p] else {
                        return;
                    };
                    slots.push(parity.clone());
                    indices.push(p);
                }
            }
        }

        match self.codec.decode_parity_appended(&mut slots, &indices) {
            Ok(num_recovered) => debug!("recovered {} data packets in FEC group {}", num_recovered, self.start),
            Err(e) => {
                warn!("error decoding FEC group {}: {}", self.start, e);
                return;
            }
        }

        for i in 0..k {
            if self.blocks[i].is_some() {
                continue;
            }
            match decode_block(&slots[i]) {
                Some(message) => {
                    events.push(ReceiveEvent::Message(message.to_vec()));
                    self.blocks[i] = Some(message.to_vec());
                }
                None => warn!("recovered block {} of FEC group {} has an invalid length prefix", i, self.start),
            }
        }
    }
}

/// Receive state for a single sending session: detects gaps in the packet sequence and, for
///  sessions using FEC, recovers lost packets from parity.
///
/// There is no retransmission: packets that are neither received nor recovered are reported as
///  lost, late packets are dropped.
pub struct ReceiveStream {
    tsi: Tsi,
    next_expected: Option<u64>,
    fec_group: Option<FecGroup>,
    synced: bool,
}

impl ReceiveStream {
    pub fn new(tsi: Tsi) -> ReceiveStream {
        ReceiveStream {
            tsi,
            next_expected: None,
            fec_group: None,
            synced: false,
        }
    }

    pub fn tsi(&self) -> Tsi {
        self.tsi
    }

    pub fn on_packet(&mut self, header: &PacketHeader, payload: &[u8], codecs: &mut CodecCache, events: &mut Vec<ReceiveEvent>) {
        match (header.kind, &header.fec) {
            (PacketKind::Data, None) => self.on_plain_data(header.sequence_number, payload, events),
            (PacketKind::Parity, None) => debug!("parity packet without FEC header from {} - dropping", self.tsi),
            (kind, Some(fec)) => self.on_fec_packet(kind, fec, payload, codecs, events),
        }
        self.synced = true;
    }

    fn on_plain_data(&mut self, sequence_number: u64, payload: &[u8], events: &mut Vec<ReceiveEvent>) {
        match self.next_expected {
            Some(next) if sequence_number < next => {
                trace!("late or duplicate packet {} from {} - dropping", sequence_number, self.tsi);
                return;
            }
            Some(next) if sequence_number > next => {
                debug!("gap in packet sequence from {}: expected {}, received {}", self.tsi, next, sequence_number);
                events.push(ReceiveEvent::Loss(sequence_number - next));
            }
            _ => {}
        }

        self.next_expected = Some(sequence_number + 1);
        events.push(ReceiveEvent::Message(payload.to_vec()));
    }

    fn on_fec_packet(&mut self, kind: PacketKind, fec: &FecHeader, payload: &[u8], codecs: &mut CodecCache, events: &mut Vec<ReceiveEvent>) {
        if let Some(group) = &self.fec_group {
            if fec.group < group.start {
                trace!("late packet for FEC group {} from {} - dropping", fec.group, self.tsi);
                return;
            }
            if fec.group > group.start {
                // whole groups that were skipped are lost as well
                let lost = group.num_missing() + fec.group.saturating_sub(group.start + group.k() as u64);
                if lost > 0 {
                    debug!("FEC group {} from {} is incomplete", group.start, self.tsi);
                    events.push(ReceiveEvent::Loss(lost));
                }
                self.fec_group = None;
            }
        }

        if self.fec_group.is_none() {
            let Some(codec) = codecs.get(fec.n, fec.k) else {
                return;
            };
            let first_counted = match (self.synced, kind) {
                (true, _) => 0,
                (false, PacketKind::Data) => fec.index as usize,
                (false, PacketKind::Parity) => codec.k(),
            };
            self.fec_group = Some(FecGroup::new(fec.group, codec, first_counted));
        }

        let Some(group) = self.fec_group.as_mut() else {
            return;
        };
        if (group.codec.n(), group.codec.k()) != (fec.n as usize, fec.k as usize) {
            warn!("FEC parameters changed inside group {} from {} - dropping packet", group.start, self.tsi);
            return;
        }
        group.on_block(kind, fec.index as usize, payload, events);
    }
}

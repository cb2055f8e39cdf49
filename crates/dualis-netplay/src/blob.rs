//! Chunked reliable transfer of opaque blobs (savestates, SRAM).
//!
//! Wire protocol on the control channel: `BlobStart(type, total_len)`, a
//! run of in-order `BlobChunk(offset, data)` messages, then
//! `BlobEnd(type, checksum)` where the checksum is the wrapping u32 sum of
//! every blob byte. The receiver completes exactly once per transfer; any
//! malformed step silently resets it.

use tracing::{debug, warn};

use dualis_netproto::netplay::{BlobType, ControlMessage};
use dualis_transport::{Transport, CHANNEL_CONTROL};

use crate::error::NetplayError;

/// Chunk size used when sending. The wire format allows up to 64 KiB per
/// chunk; we stay inside one transport payload.
const SEND_CHUNK: usize = 24 * 1024;

/// Wrapping byte-sum integrity check.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |sum, &b| sum.wrapping_add(b as u32))
}

/// The encoded message run that transfers `data`.
fn encode_transfer(blob_type: BlobType, data: &[u8]) -> Vec<Vec<u8>> {
    let mut messages = Vec::with_capacity(2 + data.len() / SEND_CHUNK);
    messages.push(
        ControlMessage::BlobStart {
            blob_type,
            total_len: data.len() as u32,
        }
        .encode(),
    );
    for (i, chunk) in data.chunks(SEND_CHUNK).enumerate() {
        messages.push(
            ControlMessage::BlobChunk {
                offset: (i * SEND_CHUNK) as u32,
                data: chunk,
            }
            .encode(),
        );
    }
    messages.push(
        ControlMessage::BlobEnd {
            blob_type,
            checksum: checksum(data),
        }
        .encode(),
    );
    messages
}

/// Stream a blob to one peer, reliably and in order.
pub fn send(
    transport: &Transport,
    peer_idx: usize,
    blob_type: BlobType,
    data: &[u8],
) -> Result<(), NetplayError> {
    debug!(?blob_type, len = data.len(), peer_idx, "blob: sending");
    for message in encode_transfer(blob_type, data) {
        transport.send_to(peer_idx, &message, CHANNEL_CONTROL, true)?;
    }
    transport.flush();
    Ok(())
}

/// Stream a blob to every connected peer.
pub fn broadcast(
    transport: &Transport,
    blob_type: BlobType,
    data: &[u8],
) -> Result<(), NetplayError> {
    debug!(?blob_type, len = data.len(), "blob: broadcasting");
    for message in encode_transfer(blob_type, data) {
        transport.broadcast(&message, CHANNEL_CONTROL, true)?;
    }
    transport.flush();
    Ok(())
}

/// Receiving side of one blob slot.
#[derive(Debug, Default)]
pub struct BlobReceiver {
    buffer: Vec<u8>,
    total_len: usize,
    received_len: usize,
    receiving: bool,
    complete: bool,
}

impl BlobReceiver {
    fn on_start(&mut self, total_len: usize) {
        self.buffer = vec![0; total_len];
        self.total_len = total_len;
        self.received_len = 0;
        self.receiving = true;
        self.complete = false;
    }

    fn on_chunk(&mut self, offset: usize, data: &[u8]) -> bool {
        if !self.receiving {
            return false;
        }
        if offset + data.len() > self.total_len {
            warn!(offset, len = data.len(), "blob: chunk out of bounds");
            self.reset();
            return false;
        }
        self.buffer[offset..offset + data.len()].copy_from_slice(data);
        self.received_len += data.len();
        true
    }

    fn on_end(&mut self, expected: u32) -> bool {
        if !self.receiving {
            return false;
        }
        self.receiving = false;
        if checksum(&self.buffer) != expected {
            warn!("blob: checksum mismatch");
            self.reset();
            return false;
        }
        self.complete = true;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn take_data(&mut self) -> Vec<u8> {
        let data = std::mem::take(&mut self.buffer);
        self.reset();
        data
    }

    pub fn reset(&mut self) {
        self.buffer = Vec::new();
        self.total_len = 0;
        self.received_len = 0;
        self.receiving = false;
        self.complete = false;
    }
}

/// One receiver per blob type, plus the routing chunks need: a chunk
/// carries no type, so it belongs to whichever transfer is in flight
/// (transfers are serialized on the reliable channel).
#[derive(Debug, Default)]
pub struct BlobBank {
    receivers: [BlobReceiver; BlobType::COUNT],
    active: Option<usize>,
}

impl BlobBank {
    /// Feed one control message. Returns the blob type that just completed,
    /// if any; every failure path resets silently and returns `None`.
    pub fn on_message(&mut self, message: &ControlMessage<'_>) -> Option<BlobType> {
        match *message {
            ControlMessage::BlobStart {
                blob_type,
                total_len,
            } => {
                let idx = blob_type.index();
                self.receivers[idx].on_start(total_len as usize);
                self.active = Some(idx);
                None
            }
            ControlMessage::BlobChunk { offset, data } => {
                let Some(idx) = self.active else {
                    // Chunk without a Start.
                    return None;
                };
                if !self.receivers[idx].on_chunk(offset as usize, data) {
                    self.active = None;
                }
                None
            }
            ControlMessage::BlobEnd {
                blob_type,
                checksum,
            } => {
                let idx = blob_type.index();
                if self.active != Some(idx) {
                    // End without a matching Start: completed transfers are
                    // left untouched.
                    return None;
                }
                self.active = None;
                self.receivers[idx].on_end(checksum).then_some(blob_type)
            }
            _ => None,
        }
    }

    pub fn receiver(&self, blob_type: BlobType) -> &BlobReceiver {
        &self.receivers[blob_type.index()]
    }

    pub fn receiver_mut(&mut self, blob_type: BlobType) -> &mut BlobReceiver {
        &mut self.receivers[blob_type.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(bank: &mut BlobBank, encoded: &[Vec<u8>]) -> Vec<BlobType> {
        let mut completed = Vec::new();
        for bytes in encoded {
            let message = ControlMessage::decode(bytes).unwrap();
            if let Some(t) = bank.on_message(&message) {
                completed.push(t);
            }
        }
        completed
    }

    #[test]
    fn transfer_round_trips() {
        // Spans multiple chunks.
        let data: Vec<u8> = (0..60_000u32).map(|i| (i * 7) as u8).collect();
        let messages = encode_transfer(BlobType::Savestate(1), &data);
        assert!(messages.len() > 3);

        let mut bank = BlobBank::default();
        let completed = feed(&mut bank, &messages);
        assert_eq!(completed, vec![BlobType::Savestate(1)]);
        assert_eq!(bank.receiver(BlobType::Savestate(1)).data(), &data[..]);
    }

    #[test]
    fn completion_fires_exactly_once() {
        let data = vec![1u8, 2, 3];
        let messages = encode_transfer(BlobType::Sram, &data);

        let mut bank = BlobBank::default();
        assert_eq!(feed(&mut bank, &messages), vec![BlobType::Sram]);

        // A duplicate End after completion changes nothing.
        let end = messages.last().unwrap().clone();
        let message = ControlMessage::decode(&end).unwrap();
        assert_eq!(bank.on_message(&message), None);
        assert!(bank.receiver(BlobType::Sram).is_complete());
        assert_eq!(bank.receiver(BlobType::Sram).data(), &data[..]);
    }

    #[test]
    fn checksum_mismatch_resets_silently() {
        let data = vec![9u8; 100];
        let mut messages = encode_transfer(BlobType::Sram, &data);
        // Corrupt the checksum in the End message.
        let end = messages.last_mut().unwrap();
        let len = end.len();
        end[len - 1] ^= 0xFF;

        let mut bank = BlobBank::default();
        assert!(feed(&mut bank, &messages).is_empty());
        assert!(!bank.receiver(BlobType::Sram).is_complete());
        assert!(bank.receiver(BlobType::Sram).data().is_empty());
    }

    #[test]
    fn out_of_bounds_chunk_resets() {
        let mut bank = BlobBank::default();
        bank.on_message(&ControlMessage::BlobStart {
            blob_type: BlobType::Sram,
            total_len: 4,
        });
        bank.on_message(&ControlMessage::BlobChunk {
            offset: 2,
            data: &[1, 2, 3],
        });
        // The transfer is dead; a well-formed End no longer completes it.
        assert_eq!(
            bank.on_message(&ControlMessage::BlobEnd {
                blob_type: BlobType::Sram,
                checksum: 0,
            }),
            None
        );
        assert!(!bank.receiver(BlobType::Sram).is_complete());
    }

    #[test]
    fn chunk_without_start_is_ignored() {
        let mut bank = BlobBank::default();
        assert_eq!(
            bank.on_message(&ControlMessage::BlobChunk {
                offset: 0,
                data: &[1],
            }),
            None
        );
    }

    #[test]
    fn checksum_is_a_wrapping_sum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 2, 3]), 6);
        assert_eq!(checksum(&[255; 4]), 1020);
    }
}

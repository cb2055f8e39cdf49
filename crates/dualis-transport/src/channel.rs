//! Per-channel sequencing state.
//!
//! Each peer keeps one [`ChannelTx`]/[`ChannelRx`] pair per channel.
//! Reliable and unreliable packets occupy separate sequence spaces: the
//! reliable space is acknowledged and delivered in order with out-of-order
//! buffering, the unreliable space delivers a packet only if it is newer
//! than everything already delivered on that channel.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// First retransmission timeout. Doubles per retry up to [`MAX_RTO`].
pub const INITIAL_RTO: Duration = Duration::from_millis(100);
pub const MAX_RTO: Duration = Duration::from_millis(800);
/// A reliable packet unacknowledged after this many sends drops the peer.
pub const MAX_RETRIES: u32 = 10;

/// True if sequence `a` is newer than `b` in wrapping u32 space.
pub fn seq_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000_0000
}

#[derive(Debug)]
pub struct PendingPacket {
    pub datagram: Vec<u8>,
    pub last_sent: Instant,
    pub rto: Duration,
    pub retries: u32,
}

/// Send side of one channel.
#[derive(Debug, Default)]
pub struct ChannelTx {
    next_seq: u32,
    next_unreliable_seq: u32,
    pub pending: BTreeMap<u32, PendingPacket>,
}

impl ChannelTx {
    pub fn next_reliable_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    pub fn next_unreliable_seq(&mut self) -> u32 {
        let seq = self.next_unreliable_seq;
        self.next_unreliable_seq = self.next_unreliable_seq.wrapping_add(1);
        seq
    }

    pub fn track(&mut self, seq: u32, datagram: Vec<u8>, now: Instant) {
        self.pending.insert(
            seq,
            PendingPacket {
                datagram,
                last_sent: now,
                rto: INITIAL_RTO,
                retries: 0,
            },
        );
    }

    /// Drop every pending packet covered by `ack`/`ack_bits`.
    pub fn apply_ack(&mut self, ack: u32, ack_bits: u32) {
        self.pending.retain(|&seq, _| {
            if seq == ack {
                return false;
            }
            let diff = ack.wrapping_sub(seq);
            !(1..=32).contains(&diff) || ack_bits & (1 << (diff - 1)) == 0
        });
    }
}

/// What to do with a received data packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Deliver {
    /// Deliver these payloads, in order.
    Now(Vec<Bytes>),
    /// Held for reordering or dropped as duplicate/stale.
    None,
}

/// Receive side of one channel.
#[derive(Debug, Default)]
pub struct ChannelRx {
    /// Next reliable sequence to release to the application.
    next_expected: u32,
    /// Reliable packets that arrived ahead of `next_expected`.
    held: BTreeMap<u32, Bytes>,
    /// Highest reliable sequence seen, for ack generation.
    highest: Option<u32>,
    /// History mask: bit i set = `highest - 1 - i` was received.
    recv_mask: u32,
    /// Newest unreliable sequence delivered.
    last_unreliable: Option<u32>,
}

impl ChannelRx {
    /// Record a reliable arrival and return whatever became deliverable.
    pub fn on_reliable(&mut self, seq: u32, payload: Bytes) -> Deliver {
        self.note_for_ack(seq);

        if seq == self.next_expected {
            let mut out = vec![payload];
            self.next_expected = self.next_expected.wrapping_add(1);
            while let Some(next) = self.held.remove(&self.next_expected) {
                out.push(next);
                self.next_expected = self.next_expected.wrapping_add(1);
            }
            Deliver::Now(out)
        } else if seq_newer(seq, self.next_expected) {
            self.held.entry(seq).or_insert(payload);
            Deliver::None
        } else {
            // Already delivered; the duplicate still refreshes the ack state.
            Deliver::None
        }
    }

    pub fn on_unreliable(&mut self, seq: u32, payload: Bytes) -> Deliver {
        match self.last_unreliable {
            Some(last) if !seq_newer(seq, last) => Deliver::None,
            _ => {
                self.last_unreliable = Some(seq);
                Deliver::Now(vec![payload])
            }
        }
    }

    /// Current (ack, ack_bits) pair for outgoing acknowledgements.
    pub fn ack_state(&self) -> Option<(u32, u32)> {
        self.highest.map(|h| (h, self.recv_mask))
    }

    fn note_for_ack(&mut self, seq: u32) {
        match self.highest {
            None => {
                self.highest = Some(seq);
                self.recv_mask = 0;
            }
            Some(highest) if seq_newer(seq, highest) => {
                let shift = seq.wrapping_sub(highest);
                self.recv_mask = if shift >= 32 {
                    0
                } else {
                    (self.recv_mask << shift) | (1 << (shift - 1))
                };
                self.highest = Some(seq);
            }
            Some(highest) => {
                let diff = highest.wrapping_sub(seq);
                if (1..=32).contains(&diff) {
                    self.recv_mask |= 1 << (diff - 1);
                }
            }
        }
    }
}

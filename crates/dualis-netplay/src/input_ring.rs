//! Per-player delay-buffered input store.
//!
//! A `players x 256` matrix of `(InputFrame, ready)` slots indexed by
//! `frame % 256`. Writes are last-writer-wins per slot; consuming a frame
//! clears its ready flags, so a late duplicate of an already-consumed frame
//! is ignored by construction.

use dualis_netproto::input::InputFrame;

/// Ring capacity per player. The input delay must stay below this.
pub const RING_SIZE: usize = 256;

#[derive(Clone, Copy)]
struct Slot {
    input: InputFrame,
    ready: bool,
}

pub struct InputRing {
    players: usize,
    slots: Vec<[Slot; RING_SIZE]>,
}

impl InputRing {
    pub fn new(players: usize) -> Self {
        let empty = Slot {
            input: InputFrame::neutral(0),
            ready: false,
        };
        Self {
            players,
            slots: vec![[empty; RING_SIZE]; players],
        }
    }

    /// Seed neutral inputs for frames `0..delay` for every player, giving
    /// the session a full delay window before any real input is needed.
    pub fn prefill(&mut self, delay: u32) {
        for player in 0..self.players {
            for frame in 0..delay {
                self.slots[player][frame as usize % RING_SIZE] = Slot {
                    input: InputFrame::neutral(frame),
                    ready: true,
                };
            }
        }
    }

    /// Store an input at the slot its frame number selects.
    pub fn set(&mut self, player: usize, input: InputFrame) {
        if player >= self.players {
            return;
        }
        self.slots[player][input.frame_num as usize % RING_SIZE] = Slot {
            input,
            ready: true,
        };
    }

    pub fn is_ready(&self, player: usize, frame: u32) -> bool {
        self.slots
            .get(player)
            .map(|ring| ring[frame as usize % RING_SIZE].ready)
            .unwrap_or(false)
    }

    /// True iff every player's slot for `frame` holds an unconsumed input.
    pub fn ready_for_frame(&self, frame: u32) -> bool {
        (0..self.players).all(|p| self.is_ready(p, frame))
    }

    /// Consume the inputs for `frame`, clearing the ready flags.
    pub fn take_frame(&mut self, frame: u32) -> Vec<InputFrame> {
        let idx = frame as usize % RING_SIZE;
        self.slots
            .iter_mut()
            .map(|ring| {
                ring[idx].ready = false;
                ring[idx].input
            })
            .collect()
    }

    pub fn players(&self) -> usize {
        self.players
    }
}

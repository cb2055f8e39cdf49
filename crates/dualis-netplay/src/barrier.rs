//! Reusable (N+1)-party frame barrier.
//!
//! Two rendezvous per frame pair the instance workers with the conductor:
//! one releases the workers into `run_frame`, the second collects them. The
//! barrier can be poisoned: a worker that fails poisons it on the way out,
//! and every current and future waiter (the conductor included) returns an
//! error instead of deadlocking.

use parking_lot::{Condvar, Mutex};

/// Returned by [`FrameBarrier::wait`] once the barrier is poisoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierPoisoned;

struct State {
    count: usize,
    generation: u64,
    poisoned: bool,
}

pub struct FrameBarrier {
    parties: usize,
    state: Mutex<State>,
    condvar: Condvar,
}

impl FrameBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(State {
                count: parties,
                generation: 0,
                poisoned: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until all parties arrive (or the barrier is poisoned).
    ///
    /// The barrier regenerates when the last party arrives, so the same
    /// instance serves every frame.
    pub fn wait(&self) -> Result<(), BarrierPoisoned> {
        let mut state = self.state.lock();
        if state.poisoned {
            return Err(BarrierPoisoned);
        }

        let generation = state.generation;
        state.count -= 1;
        if state.count == 0 {
            state.generation += 1;
            state.count = self.parties;
            self.condvar.notify_all();
            Ok(())
        } else {
            while state.generation == generation && !state.poisoned {
                self.condvar.wait(&mut state);
            }
            if state.poisoned {
                Err(BarrierPoisoned)
            } else {
                Ok(())
            }
        }
    }

    /// Mark the barrier failed and wake every waiter.
    pub fn poison(&self) {
        let mut state = self.state.lock();
        state.poisoned = true;
        self.condvar.notify_all();
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned
    }
}

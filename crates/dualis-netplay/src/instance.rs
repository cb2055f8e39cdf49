//! The emulator façade the netplay session drives.
//!
//! The cores themselves live elsewhere; the session only needs frame
//! execution, input setters, savestate import/export, and the state the
//! desync hash covers. [`LocalLink`] is the shared wireless crossbar that
//! lets co-hosted instances exchange MP frames without touching the
//! network.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

/// Error surfaced by a console implementation.
#[derive(Debug, Error)]
#[error("console error: {0}")]
pub struct ConsoleError(pub String);

/// A game cartridge. Carts own mutable save memory, so each instance needs
/// its own copy parsed from the same ROM image.
pub trait Cart: Send {
    fn rom(&self) -> &[u8];
}

/// Parses a fresh cart from ROM bytes, for cloning across instances.
pub type CartParser<'a> = &'a (dyn Fn(&[u8]) -> Result<Box<dyn Cart>, ConsoleError> + Sync);

/// One emulator instance, as seen by the lockstep session.
pub trait Console: Send {
    fn reset(&mut self);

    /// Execute one frame; returns the number of scanlines rendered.
    fn run_frame(&mut self) -> u32;

    fn set_key_mask(&mut self, mask: u32);
    fn touch_screen(&mut self, x: u16, y: u16);
    fn release_screen(&mut self);
    fn set_lid_closed(&mut self, closed: bool);

    fn insert_cart(&mut self, cart: Box<dyn Cart>) -> Result<(), ConsoleError>;
    fn needs_direct_boot(&self) -> bool;
    fn setup_direct_boot(&mut self);

    fn export_state(&mut self) -> Result<Vec<u8>, ConsoleError>;
    fn import_state(&mut self, data: &[u8]) -> Result<(), ConsoleError>;
    fn sram(&self) -> Option<Vec<u8>>;
    fn set_sram(&mut self, data: &[u8]);

    /// Main RAM, in full; hashed for desync detection.
    fn main_ram(&self) -> &[u8];
    /// Both CPU register files, hashed alongside main RAM.
    fn cpu_registers(&self) -> [[u32; 16]; 2];

    /// Power the sound chip on or off. Muted instances still execute the
    /// sound silicon so timing stays bit-identical.
    fn set_sound_power(&mut self, on: bool);
}

/// Local wireless crossbar shared by the instance fleet.
///
/// An instance that has announced itself with [`LocalLink::begin`] receives
/// a copy of every frame any other attached instance sends.
pub struct LocalLink {
    inner: Mutex<LinkInner>,
}

struct LinkInner {
    queues: Vec<VecDeque<Bytes>>,
    attached: u16,
}

impl LocalLink {
    pub fn new(instances: usize) -> Self {
        Self {
            inner: Mutex::new(LinkInner {
                queues: (0..instances).map(|_| VecDeque::new()).collect(),
                attached: 0,
            }),
        }
    }

    pub fn begin(&self, inst: usize) {
        let mut inner = self.inner.lock();
        if inst < inner.queues.len() {
            inner.attached |= 1 << inst;
        }
    }

    pub fn end(&self, inst: usize) {
        let mut inner = self.inner.lock();
        if inst < inner.queues.len() {
            inner.attached &= !(1 << inst);
            inner.queues[inst].clear();
        }
    }

    /// Deliver a frame to every attached instance except the sender.
    pub fn send(&self, from: usize, data: &[u8]) {
        let payload = Bytes::copy_from_slice(data);
        let mut inner = self.inner.lock();
        let attached = inner.attached;
        for inst in 0..inner.queues.len() {
            if inst != from && attached & (1 << inst) != 0 {
                inner.queues[inst].push_back(payload.clone());
            }
        }
    }

    pub fn recv(&self, inst: usize) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        inner.queues.get_mut(inst)?.pop_front()
    }
}

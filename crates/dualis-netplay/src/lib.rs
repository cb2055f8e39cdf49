//! Delay-based lockstep netplay core.
//!
//! One host machine and up to three clients each run the *full* fleet of
//! emulator instances (one per player) in parallel worker threads, clocked
//! by a frame barrier. Inputs are delay-buffered and exchanged over the
//! reliable transport; state hashes are cross-checked every second to catch
//! divergence; joining clients receive the host's savestates up front.
//!
//! - [`barrier`]: poisonable (N+1)-party frame barrier
//! - [`input_ring`]: per-player delay-buffered input store
//! - [`blob`]: chunked reliable transfer of savestates and SRAM
//! - [`instance`]: the emulator façade the session drives
//! - [`session`]: host/client roles, frame driver, desync detection

pub mod barrier;
pub mod blob;
pub mod error;
pub mod input_ring;
pub mod instance;
pub mod session;

pub use error::NetplayError;
pub use instance::{Cart, Console, ConsoleError, LocalLink};
pub use session::{
    DesyncCallback, DisconnectCallback, NetplaySession, DISCONNECT_DESYNC, DISCONNECT_ERROR,
    DISCONNECT_NORMAL,
};

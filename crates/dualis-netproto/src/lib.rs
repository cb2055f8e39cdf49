//! Wire formats for the dualis networking core.
//!
//! Everything that crosses the network is defined here, transport aside:
//! the MP packet header, the LAN control commands and player record, the
//! discovery beacon, and the netplay control/input/blob messages.
//!
//! All layouts are fixed-size little-endian and locked by tests. Encoding
//! goes through explicit offsets rather than a serde codec because the byte
//! layouts themselves are the protocol contract.

pub mod constants;
pub mod discovery;
pub mod error;
pub mod input;
pub mod lan;
pub mod mp;
pub mod netplay;
pub mod player;
mod wire;

pub use error::ProtoError;

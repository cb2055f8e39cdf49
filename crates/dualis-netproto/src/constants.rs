/// Magic of the UDP discovery beacon ("LAND").
pub const DISCOVERY_MAGIC: u32 = 0x444E414C;

/// Magic carried by the LAN control handshake commands ("LANP").
pub const LAN_MAGIC: u32 = 0x504E414C;

/// Magic of the emulated wireless MP packet header ("NIFI").
pub const MP_MAGIC: u32 = 0x4946494E;

/// Wire-format version shared by discovery and the LAN control commands.
/// Bump only for breaking layout changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Fixed UDP port discovery beacons are broadcast to.
pub const DISCOVERY_PORT: u16 = 7063;

/// Default LAN game port. The actual port is configurable per session.
pub const DEFAULT_LAN_PORT: u16 = 7064;

/// Default netplay port.
pub const DEFAULT_NETPLAY_PORT: u16 = 7065;

/// Maximum players in a LAN session.
pub const LAN_MAX_PLAYERS: usize = 16;

/// Maximum players in a netplay session.
pub const NETPLAY_MAX_PLAYERS: usize = 4;

/// Maximum MP packet body for Normal/Command/Ack frames.
pub const MP_MAX_BODY: usize = 2048;

/// Maximum MP packet body for Reply frames.
pub const MP_MAX_REPLY_BODY: usize = 1024;

/// Maximum payload of a single blob chunk (64 KiB).
pub const BLOB_CHUNK_SIZE: usize = 0x10000;

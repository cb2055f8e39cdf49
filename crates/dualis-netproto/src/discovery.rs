//! Discovery beacon broadcast by LAN hosts on UDP port 7063.

use crate::{
    constants::{DISCOVERY_MAGIC, LAN_MAX_PLAYERS, PROTOCOL_VERSION},
    error::ProtoError,
    wire::read_u32_le,
};

/// Maximum session name length in bytes, excluding the NUL terminator.
pub const MAX_SESSION_NAME_LEN: usize = 63;

/// One advertised host session.
///
/// `tick` is the sender's millisecond tick when the beacon was built; the
/// receiver replaces it with its own receive tick before storing the record
/// so that aging does not depend on the remote clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryBeacon {
    pub tick: u32,
    pub session_name: String,
    pub num_players: u8,
    pub max_players: u8,
    pub status: u8,
}

impl DiscoveryBeacon {
    /// magic + version + tick + name[64] + num + max + status + pad.
    pub const WIRE_LEN: usize = 4 + 4 + 4 + 64 + 1 + 1 + 1 + 1;

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&DISCOVERY_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        out[8..12].copy_from_slice(&self.tick.to_le_bytes());
        let name = self.session_name.as_bytes();
        let n = name.len().min(MAX_SESSION_NAME_LEN);
        out[12..12 + n].copy_from_slice(&name[..n]);
        out[76] = self.num_players;
        out[77] = self.max_players;
        out[78] = self.status;
        out
    }

    /// Decode and sanity-check a received datagram.
    ///
    /// Rejects short datagrams, wrong magic/version, `max_players > 16` and
    /// `num_players > max_players` -- the same filters the receive loop
    /// applies before a record may enter the table.
    pub fn decode(buf: &[u8]) -> Result<DiscoveryBeacon, ProtoError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(ProtoError::TooShort);
        }
        if read_u32_le(buf, 0)? != DISCOVERY_MAGIC {
            return Err(ProtoError::BadMagic);
        }
        let version = read_u32_le(buf, 4)?;
        if version != PROTOCOL_VERSION {
            return Err(ProtoError::UnsupportedVersion(version));
        }

        let num_players = buf[76];
        let max_players = buf[77];
        if max_players as usize > LAN_MAX_PLAYERS || num_players > max_players {
            return Err(ProtoError::FieldOutOfRange);
        }

        let name_end = buf[12..76]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_SESSION_NAME_LEN);
        let session_name =
            String::from_utf8_lossy(&buf[12..12 + name_end.min(MAX_SESSION_NAME_LEN)]).into_owned();

        Ok(DiscoveryBeacon {
            tick: read_u32_le(buf, 8)?,
            session_name,
            num_players,
            max_players,
            status: buf[78],
        })
    }
}

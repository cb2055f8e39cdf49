//! Roster entry and its fixed 43-byte wire form.

use crate::{error::ProtoError, wire::read_u32_le};

/// Loopback in host byte order, the address reported for the local entry.
pub const LOCALHOST: u32 = 0x7F000001;

/// Maximum player name length in bytes, excluding the NUL terminator.
pub const MAX_NAME_LEN: usize = 31;

/// Lifecycle status of a roster slot.
///
/// Transitions are monotone along None -> Connecting -> Client ->
/// Disconnected; host entries begin at Host and end at Disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PlayerStatus {
    #[default]
    None = 0,
    Client = 1,
    Host = 2,
    Connecting = 3,
    Disconnected = 4,
}

impl PlayerStatus {
    pub fn from_u8(v: u8) -> Result<Self, ProtoError> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Client),
            2 => Ok(Self::Host),
            3 => Ok(Self::Connecting),
            4 => Ok(Self::Disconnected),
            _ => Err(ProtoError::FieldOutOfRange),
        }
    }
}

/// One roster entry.
///
/// `address` is the peer's IPv4 in host byte order as observed by whoever
/// filled the entry in; the session layer fixes it up on read for the local
/// and host entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Player {
    pub id: u8,
    pub name: String,
    pub status: PlayerStatus,
    pub address: u32,
    pub ping: u32,
    pub is_local: bool,
}

impl Player {
    /// Wire size: name[32] + id + status + address + ping + is_local.
    pub const WIRE_LEN: usize = 32 + 1 + 1 + 4 + 4 + 1;

    /// Encode into `out` at the fixed offsets:
    /// - 0..32  name, NUL-padded (at most 31 name bytes)
    /// - 32     id
    /// - 33     status
    /// - 34..38 address (u32 LE)
    /// - 38..42 ping (u32 LE)
    /// - 42     is_local
    pub fn encode_into(&self, out: &mut [u8; Self::WIRE_LEN]) {
        out.fill(0);
        let name = self.name.as_bytes();
        let n = name.len().min(MAX_NAME_LEN);
        out[..n].copy_from_slice(&name[..n]);
        out[32] = self.id;
        out[33] = self.status as u8;
        out[34..38].copy_from_slice(&self.address.to_le_bytes());
        out[38..42].copy_from_slice(&self.ping.to_le_bytes());
        out[42] = self.is_local as u8;
    }

    /// Decode a record from the front of `buf`.
    ///
    /// The name is truncated at the first NUL and lossily re-encoded, so a
    /// malformed peer cannot smuggle invalid UTF-8 into the roster.
    pub fn decode(buf: &[u8]) -> Result<Player, ProtoError> {
        if buf.len() < Self::WIRE_LEN {
            return Err(ProtoError::TooShort);
        }

        let name_end = buf[..32].iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        let name = String::from_utf8_lossy(&buf[..name_end.min(MAX_NAME_LEN)]).into_owned();

        Ok(Player {
            name,
            id: buf[32],
            status: PlayerStatus::from_u8(buf[33])?,
            address: read_u32_le(buf, 34)?,
            ping: read_u32_le(buf, 38)?,
            is_local: buf[42] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_len_is_locked() {
        assert_eq!(Player::WIRE_LEN, 43);
    }

    #[test]
    fn player_round_trips() {
        let p = Player {
            id: 7,
            name: "kirby".into(),
            status: PlayerStatus::Client,
            address: 0xC0A80102,
            ping: 23,
            is_local: false,
        };
        let mut buf = [0u8; Player::WIRE_LEN];
        p.encode_into(&mut buf);
        assert_eq!(Player::decode(&buf).unwrap(), p);
    }

    #[test]
    fn name_is_truncated_to_31_bytes() {
        let p = Player {
            name: "x".repeat(40),
            ..Player::default()
        };
        let mut buf = [0u8; Player::WIRE_LEN];
        p.encode_into(&mut buf);
        assert_eq!(buf[31], 0);

        let decoded = Player::decode(&buf).unwrap();
        assert_eq!(decoded.name.len(), 31);
    }

    #[test]
    fn bad_status_is_rejected() {
        let mut buf = [0u8; Player::WIRE_LEN];
        Player::default().encode_into(&mut buf);
        buf[33] = 9;
        assert_eq!(Player::decode(&buf), Err(ProtoError::FieldOutOfRange));
    }
}

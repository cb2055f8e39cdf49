//! LAN session control commands (reliable channel 0).
//!
//! Opcodes 1 and 2 carry a preamble of magic + version after the opcode
//! byte; the rest are fixed layouts without it. Sizes are exact: a command
//! that decodes must have come in at precisely its wire length.

use crate::{
    constants::{LAN_MAGIC, LAN_MAX_PLAYERS, PROTOCOL_VERSION},
    error::ProtoError,
    player::Player,
    wire::read_u32_le,
};

pub const CMD_CLIENT_INIT: u8 = 1;
pub const CMD_PLAYER_INFO: u8 = 2;
pub const CMD_PLAYER_LIST: u8 = 3;
pub const CMD_PLAYER_CONNECT: u8 = 4;
pub const CMD_PLAYER_DISCONNECT: u8 = 5;

/// Opcode + magic + version.
const PREAMBLE_LEN: usize = 1 + 4 + 4;

pub const CLIENT_INIT_LEN: usize = PREAMBLE_LEN + 2;
pub const PLAYER_INFO_LEN: usize = PREAMBLE_LEN + Player::WIRE_LEN;
pub const PLAYER_LIST_LEN: usize = 2 + LAN_MAX_PLAYERS * Player::WIRE_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanCommand {
    /// Host -> new client: assigned player ID and the session size.
    ClientInit { assigned_id: u8, max_players: u8 },
    /// Client -> host: the local player record under the assigned ID.
    PlayerInfo(Player),
    /// Host -> everyone: authoritative roster snapshot.
    PlayerList {
        num_players: u8,
        players: Box<[Player; LAN_MAX_PLAYERS]>,
    },
    /// Sender is ready to receive MP frames.
    PlayerConnect,
    /// Sender stopped receiving MP frames.
    PlayerDisconnect,
}

fn encode_preamble(out: &mut Vec<u8>, opcode: u8) {
    out.push(opcode);
    out.extend_from_slice(&LAN_MAGIC.to_le_bytes());
    out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
}

fn check_preamble(buf: &[u8]) -> Result<(), ProtoError> {
    if read_u32_le(buf, 1)? != LAN_MAGIC {
        return Err(ProtoError::BadMagic);
    }
    let version = read_u32_le(buf, 5)?;
    if version != PROTOCOL_VERSION {
        return Err(ProtoError::UnsupportedVersion(version));
    }
    Ok(())
}

impl LanCommand {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            LanCommand::ClientInit {
                assigned_id,
                max_players,
            } => {
                let mut out = Vec::with_capacity(CLIENT_INIT_LEN);
                encode_preamble(&mut out, CMD_CLIENT_INIT);
                out.push(*assigned_id);
                out.push(*max_players);
                out
            }
            LanCommand::PlayerInfo(player) => {
                let mut out = Vec::with_capacity(PLAYER_INFO_LEN);
                encode_preamble(&mut out, CMD_PLAYER_INFO);
                let mut rec = [0u8; Player::WIRE_LEN];
                player.encode_into(&mut rec);
                out.extend_from_slice(&rec);
                out
            }
            LanCommand::PlayerList {
                num_players,
                players,
            } => {
                let mut out = Vec::with_capacity(PLAYER_LIST_LEN);
                out.push(CMD_PLAYER_LIST);
                out.push(*num_players);
                let mut rec = [0u8; Player::WIRE_LEN];
                for player in players.iter() {
                    player.encode_into(&mut rec);
                    out.extend_from_slice(&rec);
                }
                out
            }
            LanCommand::PlayerConnect => vec![CMD_PLAYER_CONNECT],
            LanCommand::PlayerDisconnect => vec![CMD_PLAYER_DISCONNECT],
        }
    }

    /// Decode a full command buffer. Length must match the opcode exactly.
    pub fn decode(buf: &[u8]) -> Result<LanCommand, ProtoError> {
        let opcode = *buf.first().ok_or(ProtoError::TooShort)?;
        match opcode {
            CMD_CLIENT_INIT => {
                if buf.len() != CLIENT_INIT_LEN {
                    return Err(ProtoError::LengthMismatch);
                }
                check_preamble(buf)?;
                let max_players = buf[10];
                if max_players as usize > LAN_MAX_PLAYERS {
                    return Err(ProtoError::FieldOutOfRange);
                }
                Ok(LanCommand::ClientInit {
                    assigned_id: buf[9],
                    max_players,
                })
            }
            CMD_PLAYER_INFO => {
                if buf.len() != PLAYER_INFO_LEN {
                    return Err(ProtoError::LengthMismatch);
                }
                check_preamble(buf)?;
                Ok(LanCommand::PlayerInfo(Player::decode(&buf[PREAMBLE_LEN..])?))
            }
            CMD_PLAYER_LIST => {
                if buf.len() != PLAYER_LIST_LEN {
                    return Err(ProtoError::LengthMismatch);
                }
                let num_players = buf[1];
                if num_players as usize > LAN_MAX_PLAYERS {
                    return Err(ProtoError::FieldOutOfRange);
                }
                let mut players: Box<[Player; LAN_MAX_PLAYERS]> = Default::default();
                for (i, slot) in players.iter_mut().enumerate() {
                    *slot = Player::decode(&buf[2 + i * Player::WIRE_LEN..])?;
                }
                Ok(LanCommand::PlayerList {
                    num_players,
                    players,
                })
            }
            CMD_PLAYER_CONNECT => {
                if buf.len() != 1 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(LanCommand::PlayerConnect)
            }
            CMD_PLAYER_DISCONNECT => {
                if buf.len() != 1 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(LanCommand::PlayerDisconnect)
            }
            other => Err(ProtoError::UnknownOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerStatus;

    #[test]
    fn client_init_is_11_bytes() {
        let cmd = LanCommand::ClientInit {
            assigned_id: 3,
            max_players: 16,
        };
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), 11);
        assert_eq!(bytes[0], CMD_CLIENT_INIT);
        assert_eq!(&bytes[1..5], &LAN_MAGIC.to_le_bytes());
        assert_eq!(LanCommand::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn player_info_round_trips() {
        let cmd = LanCommand::PlayerInfo(Player {
            id: 2,
            name: "guest".into(),
            status: PlayerStatus::Connecting,
            address: 0,
            ping: 0,
            is_local: false,
        });
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), PLAYER_INFO_LEN);
        assert_eq!(LanCommand::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn player_list_round_trips() {
        let mut players: Box<[Player; LAN_MAX_PLAYERS]> = Default::default();
        players[0] = Player {
            id: 0,
            name: "host".into(),
            status: PlayerStatus::Host,
            address: crate::player::LOCALHOST,
            ping: 0,
            is_local: false,
        };
        players[1] = Player {
            id: 1,
            name: "guest".into(),
            status: PlayerStatus::Client,
            address: 0xC0A80105,
            ping: 4,
            is_local: false,
        };
        let cmd = LanCommand::PlayerList {
            num_players: 2,
            players,
        };
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), PLAYER_LIST_LEN);
        assert_eq!(LanCommand::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn lifecycle_commands_are_one_byte() {
        assert_eq!(LanCommand::PlayerConnect.encode(), vec![CMD_PLAYER_CONNECT]);
        assert_eq!(
            LanCommand::PlayerDisconnect.encode(),
            vec![CMD_PLAYER_DISCONNECT]
        );
        assert_eq!(
            LanCommand::decode(&[CMD_PLAYER_CONNECT]).unwrap(),
            LanCommand::PlayerConnect
        );
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut bytes = LanCommand::ClientInit {
            assigned_id: 0,
            max_players: 4,
        }
        .encode();
        bytes.push(0);
        assert_eq!(
            LanCommand::decode(&bytes),
            Err(ProtoError::LengthMismatch)
        );
    }

    #[test]
    fn bad_preamble_is_rejected() {
        let mut bytes = LanCommand::ClientInit {
            assigned_id: 0,
            max_players: 4,
        }
        .encode();
        bytes[1] = 0xFF;
        assert_eq!(LanCommand::decode(&bytes), Err(ProtoError::BadMagic));

        let mut bytes = LanCommand::ClientInit {
            assigned_id: 0,
            max_players: 4,
        }
        .encode();
        bytes[5] = 9;
        assert_eq!(
            LanCommand::decode(&bytes),
            Err(ProtoError::UnsupportedVersion(9))
        );
    }
}

//! Netplay session messages.
//!
//! Control messages ride the reliable control channel; input messages ride
//! the payload channel. The first byte is the message type.

use crate::{
    constants::BLOB_CHUNK_SIZE,
    error::ProtoError,
    input::InputFrame,
    wire::{read_u32_le, read_u64_le},
};

pub const MSG_SESSION_OFFER: u8 = 0x10;
pub const MSG_SESSION_ACCEPT: u8 = 0x11;
pub const MSG_BLOB_START: u8 = 0x12;
pub const MSG_BLOB_CHUNK: u8 = 0x13;
pub const MSG_BLOB_END: u8 = 0x14;
pub const MSG_SYNC_READY: u8 = 0x15;
pub const MSG_START_GAME: u8 = 0x16;
pub const MSG_DESYNC_ALERT: u8 = 0x20;
pub const MSG_DISCONNECT: u8 = 0xFF;

pub const MSG_INPUT_FRAME: u8 = 0x30;
pub const MSG_INPUT_BATCH: u8 = 0x31;

/// Blob identity during state sync. Savestates are indexed by the instance
/// they were taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobType {
    Sram,
    Savestate(u8),
}

impl BlobType {
    /// Number of distinct blob slots (SRAM + one savestate per player).
    pub const COUNT: usize = 1 + crate::constants::NETPLAY_MAX_PLAYERS;

    pub fn to_u8(self) -> u8 {
        match self {
            BlobType::Sram => 0,
            BlobType::Savestate(i) => 1 + i,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, ProtoError> {
        match v {
            0 => Ok(BlobType::Sram),
            1..=4 => Ok(BlobType::Savestate(v - 1)),
            _ => Err(ProtoError::FieldOutOfRange),
        }
    }

    /// Stable index into per-type receiver tables.
    pub fn index(self) -> usize {
        self.to_u8() as usize
    }
}

/// Control-channel message. Chunk data is borrowed from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage<'a> {
    SessionOffer {
        rom_hash: u64,
        num_players: u8,
        input_delay: u8,
    },
    SessionAccept {
        player_id: u8,
    },
    BlobStart {
        blob_type: BlobType,
        total_len: u32,
    },
    BlobChunk {
        offset: u32,
        data: &'a [u8],
    },
    BlobEnd {
        blob_type: BlobType,
        checksum: u32,
    },
    SyncReady,
    StartGame {
        frame: u32,
        input_delay: u8,
    },
    DesyncAlert {
        frame: u32,
        hash: u64,
    },
    Disconnect {
        reason: u8,
    },
}

impl<'a> ControlMessage<'a> {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ControlMessage::SessionOffer {
                rom_hash,
                num_players,
                input_delay,
            } => {
                let mut out = Vec::with_capacity(11);
                out.push(MSG_SESSION_OFFER);
                out.extend_from_slice(&rom_hash.to_le_bytes());
                out.push(*num_players);
                out.push(*input_delay);
                out
            }
            ControlMessage::SessionAccept { player_id } => {
                vec![MSG_SESSION_ACCEPT, *player_id]
            }
            ControlMessage::BlobStart {
                blob_type,
                total_len,
            } => {
                let mut out = Vec::with_capacity(6);
                out.push(MSG_BLOB_START);
                out.push(blob_type.to_u8());
                out.extend_from_slice(&total_len.to_le_bytes());
                out
            }
            ControlMessage::BlobChunk { offset, data } => {
                debug_assert!(data.len() <= BLOB_CHUNK_SIZE);
                let mut out = Vec::with_capacity(5 + data.len());
                out.push(MSG_BLOB_CHUNK);
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(data);
                out
            }
            ControlMessage::BlobEnd {
                blob_type,
                checksum,
            } => {
                let mut out = Vec::with_capacity(6);
                out.push(MSG_BLOB_END);
                out.push(blob_type.to_u8());
                out.extend_from_slice(&checksum.to_le_bytes());
                out
            }
            ControlMessage::SyncReady => vec![MSG_SYNC_READY],
            ControlMessage::StartGame { frame, input_delay } => {
                let mut out = Vec::with_capacity(6);
                out.push(MSG_START_GAME);
                out.extend_from_slice(&frame.to_le_bytes());
                out.push(*input_delay);
                out
            }
            ControlMessage::DesyncAlert { frame, hash } => {
                let mut out = Vec::with_capacity(13);
                out.push(MSG_DESYNC_ALERT);
                out.extend_from_slice(&frame.to_le_bytes());
                out.extend_from_slice(&hash.to_le_bytes());
                out
            }
            ControlMessage::Disconnect { reason } => vec![MSG_DISCONNECT, *reason],
        }
    }

    pub fn decode(buf: &'a [u8]) -> Result<ControlMessage<'a>, ProtoError> {
        let kind = *buf.first().ok_or(ProtoError::TooShort)?;
        match kind {
            MSG_SESSION_OFFER => {
                if buf.len() != 11 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(ControlMessage::SessionOffer {
                    rom_hash: read_u64_le(buf, 1)?,
                    num_players: buf[9],
                    input_delay: buf[10],
                })
            }
            MSG_SESSION_ACCEPT => {
                if buf.len() != 2 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(ControlMessage::SessionAccept { player_id: buf[1] })
            }
            MSG_BLOB_START => {
                if buf.len() != 6 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(ControlMessage::BlobStart {
                    blob_type: BlobType::from_u8(buf[1])?,
                    total_len: read_u32_le(buf, 2)?,
                })
            }
            MSG_BLOB_CHUNK => {
                if buf.len() < 5 {
                    return Err(ProtoError::TooShort);
                }
                let data = &buf[5..];
                if data.len() > BLOB_CHUNK_SIZE {
                    return Err(ProtoError::PayloadTooLarge(data.len()));
                }
                Ok(ControlMessage::BlobChunk {
                    offset: read_u32_le(buf, 1)?,
                    data,
                })
            }
            MSG_BLOB_END => {
                if buf.len() != 6 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(ControlMessage::BlobEnd {
                    blob_type: BlobType::from_u8(buf[1])?,
                    checksum: read_u32_le(buf, 2)?,
                })
            }
            MSG_SYNC_READY => {
                if buf.len() != 1 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(ControlMessage::SyncReady)
            }
            MSG_START_GAME => {
                if buf.len() != 6 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(ControlMessage::StartGame {
                    frame: read_u32_le(buf, 1)?,
                    input_delay: buf[5],
                })
            }
            MSG_DESYNC_ALERT => {
                if buf.len() != 13 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(ControlMessage::DesyncAlert {
                    frame: read_u32_le(buf, 1)?,
                    hash: read_u64_le(buf, 5)?,
                })
            }
            MSG_DISCONNECT => {
                if buf.len() != 2 {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(ControlMessage::Disconnect { reason: buf[1] })
            }
            other => Err(ProtoError::UnknownOpcode(other)),
        }
    }
}

/// Payload-channel input message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMessage {
    Frame(InputFrame),
    Batch(Vec<InputFrame>),
}

impl InputMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut rec = [0u8; InputFrame::WIRE_LEN];
        match self {
            InputMessage::Frame(input) => {
                let mut out = Vec::with_capacity(1 + InputFrame::WIRE_LEN);
                out.push(MSG_INPUT_FRAME);
                input.encode_into(&mut rec);
                out.extend_from_slice(&rec);
                out
            }
            InputMessage::Batch(inputs) => {
                debug_assert!(inputs.len() <= u8::MAX as usize);
                let mut out = Vec::with_capacity(2 + inputs.len() * InputFrame::WIRE_LEN);
                out.push(MSG_INPUT_BATCH);
                out.push(inputs.len() as u8);
                for input in inputs {
                    input.encode_into(&mut rec);
                    out.extend_from_slice(&rec);
                }
                out
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<InputMessage, ProtoError> {
        let kind = *buf.first().ok_or(ProtoError::TooShort)?;
        match kind {
            MSG_INPUT_FRAME => {
                if buf.len() != 1 + InputFrame::WIRE_LEN {
                    return Err(ProtoError::LengthMismatch);
                }
                Ok(InputMessage::Frame(InputFrame::decode(&buf[1..])?))
            }
            MSG_INPUT_BATCH => {
                let count = *buf.get(1).ok_or(ProtoError::TooShort)? as usize;
                if buf.len() != 2 + count * InputFrame::WIRE_LEN {
                    return Err(ProtoError::LengthMismatch);
                }
                let mut inputs = Vec::with_capacity(count);
                for i in 0..count {
                    inputs.push(InputFrame::decode(&buf[2 + i * InputFrame::WIRE_LEN..])?);
                }
                Ok(InputMessage::Batch(inputs))
            }
            other => Err(ProtoError::UnknownOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_round_trip() {
        let msgs = [
            ControlMessage::SessionOffer {
                rom_hash: 0xA1B2C3D4E5F60708,
                num_players: 2,
                input_delay: 4,
            },
            ControlMessage::SessionAccept { player_id: 1 },
            ControlMessage::BlobStart {
                blob_type: BlobType::Savestate(2),
                total_len: 1 << 20,
            },
            ControlMessage::BlobChunk {
                offset: 65536,
                data: &[1, 2, 3, 4],
            },
            ControlMessage::BlobEnd {
                blob_type: BlobType::Sram,
                checksum: 0xCAFEBABE,
            },
            ControlMessage::SyncReady,
            ControlMessage::StartGame {
                frame: 0,
                input_delay: 4,
            },
            ControlMessage::DesyncAlert {
                frame: 120,
                hash: 0x0123456789ABCDEF,
            },
            ControlMessage::Disconnect { reason: 1 },
        ];

        for msg in &msgs {
            let bytes = msg.encode();
            assert_eq!(&ControlMessage::decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn session_offer_is_11_bytes() {
        let bytes = ControlMessage::SessionOffer {
            rom_hash: 1,
            num_players: 4,
            input_delay: 4,
        }
        .encode();
        assert_eq!(bytes.len(), 11);
        assert_eq!(bytes[0], MSG_SESSION_OFFER);
    }

    #[test]
    fn blob_type_mapping_is_stable() {
        assert_eq!(BlobType::Sram.to_u8(), 0);
        assert_eq!(BlobType::Savestate(0).to_u8(), 1);
        assert_eq!(BlobType::Savestate(3).to_u8(), 4);
        assert_eq!(BlobType::from_u8(5), Err(ProtoError::FieldOutOfRange));
        assert_eq!(BlobType::COUNT, 5);
    }

    #[test]
    fn input_frame_message_round_trips() {
        let msg = InputMessage::Frame(InputFrame::neutral(8));
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 19);
        assert_eq!(InputMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn input_batch_round_trips() {
        let msg = InputMessage::Batch(vec![
            InputFrame::neutral(4),
            InputFrame::neutral(5),
            InputFrame::neutral(6),
        ]);
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 2 + 3 * 18);
        assert_eq!(InputMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn truncated_batch_is_rejected() {
        let mut bytes = InputMessage::Batch(vec![InputFrame::neutral(0)]).encode();
        bytes.pop();
        assert_eq!(
            InputMessage::decode(&bytes),
            Err(ProtoError::LengthMismatch)
        );
    }
}

//! Emulated wireless MP frame header.
//!
//! Every MP frame exchanged between session peers is prefixed with this
//! header on the payload channel. The `kind` field packs the frame type in
//! the low 16 bits; for replies the high 16 bits carry the responder's aid.

use crate::{
    constants::MP_MAGIC,
    error::ProtoError,
    wire::{read_u32_le, read_u64_le},
};

/// MP frame types (low 16 bits of [`MpHeader::kind`]).
pub const MP_NORMAL: u32 = 0;
pub const MP_CMD: u32 = 1;
pub const MP_REPLY: u32 = 2;
pub const MP_ACK: u32 = 3;

/// MP packet header (wire format).
///
/// Encoding rules:
/// - Fixed size: exactly `MpHeader::LEN` bytes.
/// - Integer fields are little-endian.
/// - Layout is defined by `encode_into()` / `decode()` offsets below.
///
/// Decode rules:
/// - Requires `buf.len() >= MpHeader::LEN`.
/// - Requires the magic to be `"NIFI"`.
/// - `length` is not validated against the remaining buffer here; the
///   receive path clamps bodies to the per-type maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpHeader {
    /// Player ID of the sending instance.
    pub sender_id: u32,

    /// Frame type, `MP_REPLY | (aid << 16)` for replies.
    pub kind: u32,

    /// Body length in bytes.
    pub length: u32,

    /// 64-bit emulator timestamp, opaque to the session layer.
    pub timestamp: u64,
}

impl MpHeader {
    /// Header size in bytes for the current wire layout.
    pub const LEN: usize = 24;

    /// True if the low 16 bits mark this frame as a reply.
    pub fn is_reply(&self) -> bool {
        (self.kind & 0xFFFF) == MP_REPLY
    }

    /// Responder aid for reply frames (undefined for other types).
    pub fn aid(&self) -> u16 {
        (self.kind >> 16) as u16
    }

    /// Encode this header into `out` using the fixed wire layout.
    ///
    /// Offsets (bytes):
    /// - 0..4   magic "NIFI" (u32 LE)
    /// - 4..8   sender_id (u32 LE)
    /// - 8..12  kind (u32 LE)
    /// - 12..16 length (u32 LE)
    /// - 16..24 timestamp (u64 LE)
    pub fn encode_into(&self, out: &mut [u8; Self::LEN]) {
        out[0..4].copy_from_slice(&MP_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.sender_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.kind.to_le_bytes());
        out[12..16].copy_from_slice(&self.length.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
    }

    /// Decode a header from the front of `buf`, returning it together with
    /// the rest of the buffer (the frame body).
    pub fn decode(buf: &[u8]) -> Result<(MpHeader, &[u8]), ProtoError> {
        if buf.len() < Self::LEN {
            return Err(ProtoError::TooShort);
        }
        if read_u32_le(buf, 0)? != MP_MAGIC {
            return Err(ProtoError::BadMagic);
        }

        let header = MpHeader {
            sender_id: read_u32_le(buf, 4)?,
            kind: read_u32_le(buf, 8)?,
            length: read_u32_le(buf, 12)?,
            timestamp: read_u64_le(buf, 16)?,
        };
        Ok((header, &buf[Self::LEN..]))
    }
}

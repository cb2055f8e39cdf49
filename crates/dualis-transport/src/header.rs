//! Transport datagram header (wire format).

/// Magic bytes at the beginning of every datagram.
pub const MAGIC: [u8; 2] = *b"DX";

/// Transport wire-format version.
pub const VERSION: u8 = 1;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 20;

/// Flag bit: the packet is reliable and must be acknowledged.
pub const FLAG_RELIABLE: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Syn = 1,
    SynAck = 2,
    Data = 3,
    Ack = 4,
    Ping = 5,
    Pong = 6,
    Disconnect = 7,
}

impl PacketKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Syn),
            2 => Some(Self::SynAck),
            3 => Some(Self::Data),
            4 => Some(Self::Ack),
            5 => Some(Self::Ping),
            6 => Some(Self::Pong),
            7 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// Datagram header.
///
/// `seq` is the packet sequence number for data packets; ping/pong reuse it
/// to carry the sender's millisecond tick. `ack`/`ack_bits` acknowledge the
/// reliable sequence space of `channel` (cumulative latest plus a 32-packet
/// history mask).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketKind,
    pub channel: u8,
    pub flags: u8,
    pub seq: u32,
    pub ack: u32,
    pub ack_bits: u32,
    pub payload_len: u16,
}

impl Header {
    pub fn new(kind: PacketKind) -> Self {
        Self {
            kind,
            channel: 0,
            flags: 0,
            seq: 0,
            ack: 0,
            ack_bits: 0,
            payload_len: 0,
        }
    }

    /// Offsets (bytes):
    /// - 0..2   magic "DX"
    /// - 2      version
    /// - 3      kind
    /// - 4      channel
    /// - 5      flags
    /// - 6..10  seq (u32 LE)
    /// - 10..14 ack (u32 LE)
    /// - 14..18 ack_bits (u32 LE)
    /// - 18..20 payload_len (u16 LE)
    pub fn encode_into(&self, out: &mut [u8; HEADER_LEN]) {
        out[0..2].copy_from_slice(&MAGIC);
        out[2] = VERSION;
        out[3] = self.kind as u8;
        out[4] = self.channel;
        out[5] = self.flags;
        out[6..10].copy_from_slice(&self.seq.to_le_bytes());
        out[10..14].copy_from_slice(&self.ack.to_le_bytes());
        out[14..18].copy_from_slice(&self.ack_bits.to_le_bytes());
        out[18..20].copy_from_slice(&self.payload_len.to_le_bytes());
    }

    /// Build a full datagram from this header and a payload.
    pub fn into_datagram(mut self, payload: &[u8]) -> Vec<u8> {
        self.payload_len = payload.len() as u16;
        let mut out = vec![0u8; HEADER_LEN + payload.len()];
        let mut hbuf = [0u8; HEADER_LEN];
        self.encode_into(&mut hbuf);
        out[..HEADER_LEN].copy_from_slice(&hbuf);
        out[HEADER_LEN..].copy_from_slice(payload);
        out
    }

    /// Decode a datagram that contains exactly `[Header][Payload]`.
    ///
    /// Datagrams that fail any check are dropped by the caller; UDP gives no
    /// one to report them to.
    pub fn decode(buf: &[u8]) -> Option<(Header, &[u8])> {
        if buf.len() < HEADER_LEN || buf[0..2] != MAGIC || buf[2] != VERSION {
            return None;
        }
        let kind = PacketKind::from_u8(buf[3])?;
        let payload_len =
            u16::from_le_bytes(buf[18..20].try_into().ok()?) as usize;
        if buf.len() != HEADER_LEN + payload_len {
            return None;
        }

        let header = Header {
            kind,
            channel: buf[4],
            flags: buf[5],
            seq: u32::from_le_bytes(buf[6..10].try_into().ok()?),
            ack: u32::from_le_bytes(buf[10..14].try_into().ok()?),
            ack_bits: u32::from_le_bytes(buf[14..18].try_into().ok()?),
            payload_len: payload_len as u16,
        };
        Some((header, &buf[HEADER_LEN..]))
    }
}

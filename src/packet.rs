use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RconError, Result};

/// Smallest possible frame: size, id and type fields plus both terminators.
pub const MIN_PACKET_SIZE: usize = 14;
/// Largest frame a server will send (4096 bytes of body and header after
/// the size field).
pub const MAX_PACKET_SIZE: usize = 4100;

/// Packet id used for the login exchange.
pub const AUTH_PACKET_ID: i32 = 1;
/// Packet id the server answers with when the password is wrong.
pub const AUTH_FAILED_ID: i32 = -1;

// size field + id + type
const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    // SERVERDATA_AUTH
    Auth,
    // SERVERDATA_EXECCOMMAND
    Exec,
    // SERVERDATA_AUTH_RESPONSE
    AuthResponse,
    // SERVERDATA_RESPONSE_VALUE
    Response,
}

impl From<PacketType> for i32 {
    fn from(packet_type: PacketType) -> Self {
        match packet_type {
            PacketType::Auth => 3,
            PacketType::Exec => 2,
            PacketType::AuthResponse => 2,
            PacketType::Response => 0,
        }
    }
}

/// A single decoded protocol frame.
///
/// `kind` keeps the raw wire discriminant: `Exec` and `AuthResponse` share
/// the value 2, so only the direction of travel tells them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: i32,
    kind: i32,
    body: String,
}

impl Packet {
    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Packet {
            id,
            kind: packet_type.into(),
            body: body.into(),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn kind(&self) -> i32 {
        self.kind
    }

    /// True if the wire discriminant equals the one for `packet_type`.
    pub fn is(&self, packet_type: PacketType) -> bool {
        self.kind == i32::from(packet_type)
    }

    pub fn body(&self) -> &str {
        self.body.as_ref()
    }

    pub fn into_body(self) -> String {
        self.body
    }

    /// Total length on the wire, including the size field itself.
    pub fn wire_len(&self) -> usize {
        self.body.len() + MIN_PACKET_SIZE
    }

    /// Encode the frame. All integers are little-endian; the size field
    /// does not count itself, so it is always 4 less than the frame length.
    pub fn pack(&self) -> Result<Bytes> {
        if !self.body.is_ascii() {
            return Err(RconError::EncodingError("body is not ascii".to_string()));
        }
        if self.body.bytes().any(|b| b == 0) {
            return Err(RconError::EncodingError("body contains a nul byte".to_string()));
        }

        let size = self.wire_len();
        if size > MAX_PACKET_SIZE {
            return Err(RconError::EncodingError(format!(
                "frame of {size} bytes exceeds the {MAX_PACKET_SIZE} byte limit"
            )));
        }

        let mut payload = BytesMut::with_capacity(size);
        payload.put_i32_le((size - 4) as i32);
        payload.put_i32_le(self.id);
        payload.put_i32_le(self.kind);
        payload.put(self.body.as_bytes());
        // body terminator, then packet terminator
        payload.put_u16(0);

        Ok(payload.freeze())
    }

    /// Decode exactly one frame. The size field is not trusted here; the
    /// caller is expected to hand over one complete frame.
    pub fn unpack(mut incoming: &[u8]) -> Result<Self> {
        let total = incoming.len();
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&total) {
            return Err(RconError::MalformedFrame(format!(
                "frame is {total} bytes, expected between {MIN_PACKET_SIZE} and {MAX_PACKET_SIZE}"
            )));
        }

        let _size = incoming.get_i32_le();
        let id = incoming.get_i32_le();
        let kind = incoming.get_i32_le();

        let body = &incoming[..total - HEADER_SIZE - 2];
        if !body.is_ascii() {
            return Err(RconError::MalformedFrame("body is not ascii".to_string()));
        }
        let body = std::str::from_utf8(body)
            .map_err(|e| RconError::MalformedFrame(e.to_string()))?
            .to_string();

        Ok(Packet { id, kind, body })
    }
}

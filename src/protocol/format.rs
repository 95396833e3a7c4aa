//! Wire format structures and constants
//!
//! Every frame travels in a version-stable envelope:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "CRNF"
//! 4       1     version
//! 5       1     reserved (0)
//! 6       2     payload length (u16)
//! 8       N     payload
//! 8+N     4     CRC-32 (IEEE) over header and payload
//! ```
//!
//! Version 1 payload layout:
//!
//! ```text
//! 0   u32   device id
//! 4   u32   sequence
//! 8   u16   flags (see [`flags`])
//! 10  u8    frame-rate preset code
//! 11  u8    reserved
//! 12  u8x4  timecode h, m, s, f  (u32 frame counter with HAS_FRAME_COUNTER)
//! 16  f32x3 position x, y, z
//! 28  f32x3 pan, tilt, roll      (f32x4 x, y, z, w with ROTATION_QUATERNION)
//! ..  f32   track position
//! ..  f32   zoom
//! ..  f32   focus
//! ..  f32   iris
//! ```
//!
//! All multi-byte fields are little-endian.

use bytes::{BufMut, BytesMut};

use super::DecodeError;

/// Frame marker.
pub const MAGIC: [u8; 4] = *b"CRNF";

/// Payload layout version this crate reads and writes.
pub const PROTOCOL_VERSION: u8 = 1;

pub const HEADER_LEN: usize = 8;
pub const TRAILER_LEN: usize = 4;

/// Payload length of a version 1 frame carrying Euler angles.
pub const EULER_PAYLOAD_LEN: usize = 56;
/// Payload length of a version 1 frame carrying a quaternion.
pub const QUATERNION_PAYLOAD_LEN: usize = 60;

/// Smallest payload any version may declare (device id + sequence).
pub const MIN_PAYLOAD_LEN: usize = 8;
/// Largest payload any version may declare. Anything above is a corrupt header.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// Capability and status bits in the payload `flags` field.
pub mod flags {
    pub const HAS_TIMECODE: u16 = 1 << 0;
    pub const HAS_FOCAL_LENGTH: u16 = 1 << 1;
    pub const HAS_FOCUS: u16 = 1 << 2;
    pub const HAS_IRIS: u16 = 1 << 3;
    pub const ROTATION_QUATERNION: u16 = 1 << 4;
    pub const CAMERA_ON: u16 = 1 << 5;
    pub const RUNNING: u16 = 1 << 6;
    pub const ZOOM_CALIBRATED: u16 = 1 << 7;
    pub const FOCUS_CALIBRATED: u16 = 1 << 8;
    pub const IRIS_CALIBRATED: u16 = 1 << 9;
    /// The timecode field holds a raw frame counter. Ignored with HAS_TIMECODE.
    pub const HAS_FRAME_COUNTER: u16 = 1 << 10;
}

/// Frame envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub payload_len: u16,
}

impl FrameHeader {
    /// Parse and validate a header. `bytes` must start with the magic marker.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::TruncatedPayload {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }
        if bytes[..4] != MAGIC {
            return Err(DecodeError::MalformedHeader { reason: "missing frame marker" });
        }

        let version = bytes[4];
        let payload_len = u16::from_le_bytes([bytes[6], bytes[7]]);
        let len = usize::from(payload_len);
        if len < MIN_PAYLOAD_LEN {
            return Err(DecodeError::MalformedHeader { reason: "payload length below minimum" });
        }
        if len > MAX_PAYLOAD_LEN {
            return Err(DecodeError::MalformedHeader { reason: "payload length above maximum" });
        }

        Ok(Self { version, payload_len })
    }

    /// Total envelope size: header, payload and checksum.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + usize::from(self.payload_len) + TRAILER_LEN
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(0);
        buf.put_u16_le(self.payload_len);
    }
}

/// Payload length a version 1 frame with these flags must declare.
pub fn expected_payload_len(frame_flags: u16) -> usize {
    if frame_flags & flags::ROTATION_QUATERNION != 0 {
        QUATERNION_PAYLOAD_LEN
    } else {
        EULER_PAYLOAD_LEN
    }
}

/// CRC-32 (IEEE) used in the trailer.
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Position of the first full frame marker in `bytes`.
pub fn find_magic(bytes: &[u8]) -> Option<usize> {
    bytes.windows(MAGIC.len()).position(|window| window == MAGIC)
}

/// Length of the longest suffix of `bytes` that could be the start of a marker.
pub fn partial_magic_suffix(bytes: &[u8]) -> usize {
    (1..MAGIC.len())
        .rev()
        .find(|&len| len <= bytes.len() && bytes[bytes.len() - len..] == MAGIC[..len])
        .unwrap_or(0)
}

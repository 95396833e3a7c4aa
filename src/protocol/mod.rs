//! Binary telemetry protocol.
//!
//! [`decode`] and [`FrameDecoder`] turn raw socket bytes into [`TrackingFrame`]s.
//! Decoding is resumable: input may end in the middle of a frame and the remainder is
//! carried in a [`DecoderState`]. Corrupt input is skipped by scanning for the next
//! frame marker, so one bad frame never poisons the frames after it.
//!
//! [`FrameEncoder`] is the exact inverse and is what simulators, tests and benches
//! use to produce wire bytes.
//!
//! ```rust
//! use cranelink::protocol::{FrameDecoder, FrameEncoder};
//! use cranelink::types::{DeviceId, TrackingFrame};
//!
//! let bytes = FrameEncoder::new().encode(&TrackingFrame::new(DeviceId(7), 1));
//! let mut decoder = FrameDecoder::default();
//!
//! // Split across two reads: nothing until the frame is complete.
//! assert!(decoder.feed(&bytes[..10]).frames.is_empty());
//! let output = decoder.feed(&bytes[10..]);
//! assert_eq!(output.frames[0].device_id, DeviceId(7));
//! ```
//!
//! [`TrackingFrame`]: crate::types::TrackingFrame

mod decoder;
mod encoder;
pub mod format;

pub use decoder::{DecodeOutput, DecoderOptions, DecoderState, FrameDecoder, decode, decode_with};
pub use encoder::FrameEncoder;

use thiserror::Error;

/// Per-frame decode failure. None of these are fatal to a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed frame header: {reason}")]
    MalformedHeader { reason: &'static str },

    /// Not enough bytes yet. The decoder keeps them as carryover and never reports
    /// this as a failure.
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    TruncatedPayload { needed: usize, available: usize },

    #[error("Unsupported protocol version {version}")]
    UnsupportedVersion { version: u8 },

    #[error("Checksum mismatch: frame says {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl DecodeError {
    /// Whether this only means "wait for more bytes".
    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::TruncatedPayload { .. })
    }
}

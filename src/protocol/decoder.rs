//! Resumable frame decoder

use bytes::{Buf, BytesMut};
use tracing::trace;

use super::DecodeError;
use super::format::{
    FrameHeader, HEADER_LEN, PROTOCOL_VERSION, checksum, expected_payload_len, find_magic, flags,
    partial_magic_suffix,
};
use crate::types::{
    DeviceId, DeviceStatus, EulerAngles, FrameRate, LensState, Quaternion, Rotation, Timecode,
    TrackingFrame, Vec3,
};

/// Settings that affect how payloads are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Rate used when a frame carries the "custom" rate preset.
    pub default_frame_rate: FrameRate,
}

/// Bytes left over from previous input, plus resync bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct DecoderState {
    residue: BytesMut,
    resyncing: bool,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of carried-over bytes.
    pub fn pending(&self) -> usize {
        self.residue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residue.is_empty()
    }
}

/// Frames and failures produced by one decode call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutput {
    pub frames: Vec<TrackingFrame>,
    /// One entry per corrupt region or rejected frame. Never contains
    /// [`DecodeError::TruncatedPayload`].
    pub errors: Vec<DecodeError>,
}

/// Decode `buffer` on top of `carryover` with default options.
pub fn decode(buffer: &[u8], carryover: DecoderState) -> (DecodeOutput, DecoderState) {
    decode_with(buffer, carryover, &DecoderOptions::default())
}

/// Decode `buffer` on top of `carryover`, returning the frames and the new carryover.
pub fn decode_with(
    buffer: &[u8],
    mut carryover: DecoderState,
    options: &DecoderOptions,
) -> (DecodeOutput, DecoderState) {
    carryover.residue.extend_from_slice(buffer);
    let mut output = DecodeOutput::default();
    drain(&mut carryover, options, &mut output);
    (output, carryover)
}

/// Stateful wrapper owning the carryover for one connection.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecoderState,
    options: DecoderOptions,
}

impl FrameDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self { state: DecoderState::default(), options }
    }

    /// Append `bytes` and decode every complete frame.
    pub fn feed(&mut self, bytes: &[u8]) -> DecodeOutput {
        self.state.residue.extend_from_slice(bytes);
        let mut output = DecodeOutput::default();
        drain(&mut self.state, &self.options, &mut output);
        output
    }

    /// Drop any carryover. Called when a new connection starts.
    pub fn reset(&mut self) {
        self.state = DecoderState::default();
    }

    pub fn pending(&self) -> usize {
        self.state.pending()
    }
}

fn drain(state: &mut DecoderState, options: &DecoderOptions, output: &mut DecodeOutput) {
    scan(state, options, output);
    // Garbage in a later read is a new corrupt region
    if state.residue.is_empty() {
        state.resyncing = false;
    }
}

fn scan(state: &mut DecoderState, options: &DecoderOptions, output: &mut DecodeOutput) {
    loop {
        let buf = &state.residue;

        // Align on the next marker, keeping a possible partial marker at the end.
        match find_magic(buf) {
            Some(0) => {}
            Some(offset) => {
                let error = DecodeError::MalformedHeader { reason: "garbage before frame marker" };
                report(state, output, error);
                state.residue.advance(offset);
            }
            None => {
                let keep = partial_magic_suffix(buf);
                let discard = buf.len() - keep;
                if discard > 0 {
                    let error = DecodeError::MalformedHeader { reason: "no frame marker" };
                    report(state, output, error);
                    state.residue.advance(discard);
                }
                return;
            }
        }

        match next_frame(&state.residue, options) {
            Step::NeedMore => return,
            Step::Frame { frame, consumed } => {
                trace!("Decoded frame {} from device {}", frame.sequence, frame.device_id);
                output.frames.push(frame);
                state.resyncing = false;
                state.residue.advance(consumed);
            }
            Step::Skip { error, consumed } => {
                report(state, output, error);
                state.residue.advance(consumed);
            }
        }
    }
}

/// Record an error unless it belongs to a corrupt region already reported.
fn report(state: &mut DecoderState, output: &mut DecodeOutput, error: DecodeError) {
    if !state.resyncing {
        output.errors.push(error);
    }
    state.resyncing = true;
}

enum Step {
    NeedMore,
    Frame { frame: TrackingFrame, consumed: usize },
    Skip { error: DecodeError, consumed: usize },
}

/// Examine the frame at the start of `buf`, which begins with the marker.
fn next_frame(buf: &[u8], options: &DecoderOptions) -> Step {
    let header = match FrameHeader::parse(buf) {
        Ok(header) => header,
        Err(e) if e.is_incomplete() => return Step::NeedMore,
        // Step past this marker and scan for the next one
        Err(error) => return Step::Skip { error, consumed: 1 },
    };

    let total = header.frame_len();
    if buf.len() < total {
        return Step::NeedMore;
    }

    let body_end = HEADER_LEN + usize::from(header.payload_len);
    let expected = u32::from_le_bytes([
        buf[body_end],
        buf[body_end + 1],
        buf[body_end + 2],
        buf[body_end + 3],
    ]);
    let actual = checksum(&buf[..body_end]);
    if expected != actual {
        // The marker may have been a false positive inside another frame
        return Step::Skip {
            error: DecodeError::ChecksumMismatch { expected, actual },
            consumed: 1,
        };
    }

    if header.version != PROTOCOL_VERSION {
        return Step::Skip {
            error: DecodeError::UnsupportedVersion { version: header.version },
            consumed: total,
        };
    }

    match parse_payload(&buf[HEADER_LEN..body_end], options) {
        Ok(frame) => Step::Frame { frame, consumed: total },
        Err(error) => Step::Skip { error, consumed: total },
    }
}

fn finite(value: f32) -> Option<f32> {
    value.is_finite().then_some(value)
}

fn parse_payload(payload: &[u8], options: &DecoderOptions) -> Result<TrackingFrame, DecodeError> {
    if payload.len() < 10 {
        return Err(DecodeError::MalformedHeader { reason: "payload too short for flags" });
    }

    let mut p = payload;
    let device_id = DeviceId(p.get_u32_le());
    let sequence = u64::from(p.get_u32_le());
    let frame_flags = p.get_u16_le();

    if payload.len() != expected_payload_len(frame_flags) {
        return Err(DecodeError::MalformedHeader { reason: "payload length disagrees with flags" });
    }

    let has = |bit: u16| frame_flags & bit != 0;

    let rate_code = p.get_u8();
    let _reserved = p.get_u8();
    let rate = FrameRate::from_preset_code(rate_code).unwrap_or(options.default_frame_rate);

    let mut tc = [0u8; 4];
    p.copy_to_slice(&mut tc);
    let timecode = if has(flags::HAS_TIMECODE) {
        Timecode::new(tc[0], tc[1], tc[2], tc[3], rate)
    } else if has(flags::HAS_FRAME_COUNTER) {
        Some(Timecode::from_frame_number(u64::from(u32::from_le_bytes(tc)), rate))
    } else {
        None
    };

    let position = Vec3::from_finite(p.get_f32_le(), p.get_f32_le(), p.get_f32_le());

    let rotation = if has(flags::ROTATION_QUATERNION) {
        let q = Quaternion {
            x: p.get_f32_le(),
            y: p.get_f32_le(),
            z: p.get_f32_le(),
            w: p.get_f32_le(),
        };
        [q.x, q.y, q.z, q.w].iter().all(|v| v.is_finite()).then_some(Rotation::Quaternion(q))
    } else {
        let e = EulerAngles { pan: p.get_f32_le(), tilt: p.get_f32_le(), roll: p.get_f32_le() };
        [e.pan, e.tilt, e.roll].iter().all(|v| v.is_finite()).then_some(Rotation::Euler(e))
    };

    let track_position = finite(p.get_f32_le());
    let zoom = p.get_f32_le();
    let focus = p.get_f32_le();
    let iris = p.get_f32_le();

    let lens = LensState {
        focal_length: has(flags::HAS_FOCAL_LENGTH).then_some(zoom).and_then(finite),
        focus_distance: has(flags::HAS_FOCUS).then_some(focus).and_then(finite),
        aperture: has(flags::HAS_IRIS).then_some(iris).and_then(finite),
    };

    let status = DeviceStatus {
        camera_on: has(flags::CAMERA_ON),
        running: has(flags::RUNNING),
        zoom_calibrated: has(flags::ZOOM_CALIBRATED),
        focus_calibrated: has(flags::FOCUS_CALIBRATED),
        iris_calibrated: has(flags::IRIS_CALIBRATED),
    };

    Ok(TrackingFrame {
        device_id,
        sequence,
        timecode,
        position,
        rotation,
        track_position,
        lens,
        status,
    })
}

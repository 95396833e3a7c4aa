//! Frame encoder, the inverse of the decoder

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use super::format::{
    FrameHeader, HEADER_LEN, PROTOCOL_VERSION, TRAILER_LEN, checksum, expected_payload_len, flags,
};
use crate::types::{FrameRate, Rotation, Timecode, TrackingFrame};

/// Writes [`TrackingFrame`]s in the wire format.
///
/// Unknown values (`None`) are written as NaN with their capability flag cleared.
/// Sequences wider than 32 bits are truncated.
///
/// Timecode rates travel as a preset code. A rate without a preset can only be
/// sent as the "custom" code, which the decoder resolves to its configured default;
/// the encoder's custom rate must match that default. Timecodes at any other rate
/// cannot be expressed and are left out of the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder {
    custom_frame_rate: FrameRate,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder that sends timecodes at `rate` under the custom preset code.
    pub fn with_custom_frame_rate(rate: FrameRate) -> Self {
        Self { custom_frame_rate: rate }
    }

    /// Preset code for `rate`, or `None` if the wire cannot carry it.
    fn rate_code(&self, rate: FrameRate) -> Option<u8> {
        match rate.preset_code() {
            0 if rate == self.custom_frame_rate => Some(0),
            0 => None,
            code => Some(code),
        }
    }

    fn wire_timecode(&self, frame: &TrackingFrame) -> Option<(Timecode, u8)> {
        let timecode = frame.timecode?;
        let code = self.rate_code(timecode.rate);
        if code.is_none() {
            debug!("Leaving out timecode {} at rate {} with no preset", timecode, timecode.rate);
        }
        code.map(|code| (timecode, code))
    }

    pub fn encode(&self, frame: &TrackingFrame) -> Bytes {
        self.encode_with_version(frame, PROTOCOL_VERSION)
    }

    /// Encode with an arbitrary version byte. Used to exercise version handling.
    pub fn encode_with_version(&self, frame: &TrackingFrame, version: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 60 + TRAILER_LEN);
        self.write(frame, version, &mut buf);
        buf.freeze()
    }

    /// Append the encoded frame to `buf`.
    pub fn encode_into(&self, frame: &TrackingFrame, buf: &mut BytesMut) {
        self.write(frame, PROTOCOL_VERSION, buf);
    }

    fn write(&self, frame: &TrackingFrame, version: u8, buf: &mut BytesMut) {
        let timecode = self.wire_timecode(frame);
        let frame_flags = frame_flags(frame, timecode.is_some());
        let payload_len = expected_payload_len(frame_flags);
        let start = buf.len();

        // Payload lengths are fixed small constants
        FrameHeader { version, payload_len: payload_len as u16 }.write(buf);

        buf.put_u32_le(frame.device_id.0);
        buf.put_u32_le(frame.sequence as u32);
        buf.put_u16_le(frame_flags);
        buf.put_u8(timecode.map(|(_, code)| code).unwrap_or(0));
        buf.put_u8(0);

        match timecode {
            Some((tc, _)) => buf.put_slice(&[tc.hours, tc.minutes, tc.seconds, tc.frames]),
            None => buf.put_u32_le(0),
        }

        let position = frame.position.map(|p| [p.x, p.y, p.z]).unwrap_or([f32::NAN; 3]);
        position.iter().for_each(|v| buf.put_f32_le(*v));

        match frame.rotation {
            Some(Rotation::Quaternion(q)) => {
                [q.x, q.y, q.z, q.w].iter().for_each(|v| buf.put_f32_le(*v));
            }
            Some(Rotation::Euler(e)) => {
                [e.pan, e.tilt, e.roll].iter().for_each(|v| buf.put_f32_le(*v));
            }
            None => [f32::NAN; 3].iter().for_each(|v| buf.put_f32_le(*v)),
        }

        buf.put_f32_le(frame.track_position.unwrap_or(f32::NAN));
        buf.put_f32_le(frame.lens.focal_length.unwrap_or(f32::NAN));
        buf.put_f32_le(frame.lens.focus_distance.unwrap_or(f32::NAN));
        buf.put_f32_le(frame.lens.aperture.unwrap_or(f32::NAN));

        let crc = checksum(&buf[start..]);
        buf.put_u32_le(crc);
    }
}

fn frame_flags(frame: &TrackingFrame, has_timecode: bool) -> u16 {
    let mut bits = 0;
    let mut set = |on: bool, bit: u16| {
        if on {
            bits |= bit;
        }
    };

    set(has_timecode, flags::HAS_TIMECODE);
    set(frame.lens.focal_length.is_some(), flags::HAS_FOCAL_LENGTH);
    set(frame.lens.focus_distance.is_some(), flags::HAS_FOCUS);
    set(frame.lens.aperture.is_some(), flags::HAS_IRIS);
    set(matches!(frame.rotation, Some(Rotation::Quaternion(_))), flags::ROTATION_QUATERNION);
    set(frame.status.camera_on, flags::CAMERA_ON);
    set(frame.status.running, flags::RUNNING);
    set(frame.status.zoom_calibrated, flags::ZOOM_CALIBRATED);
    set(frame.status.focus_calibrated, flags::FOCUS_CALIBRATED);
    set(frame.status.iris_calibrated, flags::IRIS_CALIBRATED);
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::format::{EULER_PAYLOAD_LEN, MAGIC, QUATERNION_PAYLOAD_LEN};
    use crate::types::{DeviceId, DeviceStatus, Quaternion};

    fn written_flags(bytes: &[u8]) -> u16 {
        u16::from_le_bytes([bytes[HEADER_LEN + 8], bytes[HEADER_LEN + 9]])
    }

    #[test]
    fn euler_frame_has_fixed_size_and_valid_trailer() {
        let bytes = FrameEncoder::new().encode(&TrackingFrame::new(DeviceId(1), 1));
        assert_eq!(bytes.len(), HEADER_LEN + EULER_PAYLOAD_LEN + TRAILER_LEN);
        assert_eq!(bytes[..4], MAGIC);

        let body_end = bytes.len() - TRAILER_LEN;
        let trailer = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        assert_eq!(trailer, checksum(&bytes[..body_end]));
    }

    #[test]
    fn quaternion_frame_is_larger() {
        let mut frame = TrackingFrame::new(DeviceId(1), 1);
        frame.rotation = Some(Rotation::Quaternion(Quaternion::IDENTITY));
        let bytes = FrameEncoder::new().encode(&frame);
        assert_eq!(bytes.len(), HEADER_LEN + QUATERNION_PAYLOAD_LEN + TRAILER_LEN);
    }

    #[test]
    fn encode_into_appends() {
        let encoder = FrameEncoder::new();
        let mut buf = BytesMut::new();
        encoder.encode_into(&TrackingFrame::new(DeviceId(1), 1), &mut buf);
        encoder.encode_into(&TrackingFrame::new(DeviceId(1), 2), &mut buf);
        assert_eq!(buf.len(), 2 * (HEADER_LEN + EULER_PAYLOAD_LEN + TRAILER_LEN));
    }

    #[test]
    fn status_bits_are_written() {
        let mut frame = TrackingFrame::new(DeviceId(1), 1);
        frame.status =
            DeviceStatus { camera_on: true, iris_calibrated: true, ..Default::default() };
        let bytes = FrameEncoder::new().encode(&frame);
        assert_eq!(written_flags(&bytes), flags::CAMERA_ON | flags::IRIS_CALIBRATED);
    }

    #[test]
    fn timecode_rate_is_written_as_preset_or_custom_code() {
        let mut frame = TrackingFrame::new(DeviceId(1), 1);
        frame.timecode = Timecode::new(0, 0, 1, 20, FrameRate::FPS_29_97_DROP);
        let bytes = FrameEncoder::new().encode(&frame);
        assert_eq!(written_flags(&bytes), flags::HAS_TIMECODE);
        assert_eq!(bytes[HEADER_LEN + 10], 1);

        let fps_48 = FrameRate { numerator: 48, denominator: 1, drop_frame: false };
        frame.timecode = Timecode::new(0, 0, 1, 40, fps_48);
        let bytes = FrameEncoder::with_custom_frame_rate(fps_48).encode(&frame);
        assert_eq!(written_flags(&bytes), flags::HAS_TIMECODE);
        assert_eq!(bytes[HEADER_LEN + 10], 0);
        assert_eq!(bytes[HEADER_LEN + 12..HEADER_LEN + 16], [0, 0, 1, 40]);
    }

    #[test]
    fn inexpressible_timecode_is_left_out() {
        let mut frame = TrackingFrame::new(DeviceId(1), 1);
        let fps_48 = FrameRate { numerator: 48, denominator: 1, drop_frame: false };
        frame.timecode = Timecode::new(0, 0, 1, 40, fps_48);
        let bytes = FrameEncoder::new().encode(&frame);
        assert_eq!(written_flags(&bytes), 0);
    }
}

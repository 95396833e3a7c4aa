//! Tracking frame types
//!
//! A [`TrackingFrame`] is the fundamental data unit that flows through the bridge.
//! Frames are immutable once decoded and are shared as `Arc<TrackingFrame>` between
//! the frame cache and every subscriber queue.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Timecode;

/// Identifier of a physical tracking device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(value: u32) -> Self {
        DeviceId(value)
    }
}

/// Position in device space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Build from raw components, returning `None` if any is NaN or infinite.
    pub fn from_finite(x: f32, y: f32, z: f32) -> Option<Self> {
        (x.is_finite() && y.is_finite() && z.is_finite()).then_some(Self { x, y, z })
    }
}

/// Head orientation as reported by the device, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct EulerAngles {
    pub pan: f32,
    pub tilt: f32,
    pub roll: f32,
}

/// Unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    /// Yaw (Z), pitch (Y), roll (X) in degrees, applied in that order.
    pub fn from_yaw_pitch_roll(yaw: f32, pitch: f32, roll: f32) -> Self {
        let (sy, cy) = (yaw.to_radians() * 0.5).sin_cos();
        let (sp, cp) = (pitch.to_radians() * 0.5).sin_cos();
        let (sr, cr) = (roll.to_radians() * 0.5).sin_cos();

        Quaternion {
            w: cr * cp * cy + sr * sp * sy,
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
        }
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }
}

/// Orientation as carried on the wire. Which variant a frame uses is decided by
/// the frame's capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Rotation {
    Euler(EulerAngles),
    Quaternion(Quaternion),
}

impl Rotation {
    /// Orientation as a quaternion, treating pan as yaw and tilt as pitch.
    pub fn to_quaternion(&self) -> Quaternion {
        match *self {
            Rotation::Euler(EulerAngles { pan, tilt, roll }) => {
                Quaternion::from_yaw_pitch_roll(pan, tilt, roll)
            }
            Rotation::Quaternion(q) => q,
        }
    }
}

/// Lens state. Each value is `None` when the device does not report it or the
/// reported value was not a finite number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct LensState {
    /// Zoom encoder value, focal length in mm when zoom is calibrated.
    pub focal_length: Option<f32>,
    /// Focus encoder value, distance in device units when focus is calibrated.
    pub focus_distance: Option<f32>,
    /// Iris encoder value, f-stop when iris is calibrated.
    pub aperture: Option<f32>,
}

/// Status bits reported with every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct DeviceStatus {
    pub camera_on: bool,
    pub running: bool,
    pub zoom_calibrated: bool,
    pub focus_calibrated: bool,
    pub iris_calibrated: bool,
}

/// One timestamped sample of tracking telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct TrackingFrame {
    /// Device that produced this frame
    pub device_id: DeviceId,

    /// Device-assigned counter, strictly increasing within a session
    pub sequence: u64,

    /// Device timecode, if the device reported one
    pub timecode: Option<Timecode>,

    /// Camera position, `None` if the device sent non-finite values
    pub position: Option<Vec3>,

    /// Camera orientation, `None` if the device sent non-finite values
    pub rotation: Option<Rotation>,

    /// Dolly track position
    pub track_position: Option<f32>,

    pub lens: LensState,

    pub status: DeviceStatus,
}

impl TrackingFrame {
    /// Create a frame with only identity fields set.
    pub fn new(device_id: DeviceId, sequence: u64) -> Self {
        Self {
            device_id,
            sequence,
            timecode: None,
            position: None,
            rotation: None,
            track_position: None,
            lens: LensState::default(),
            status: DeviceStatus::default(),
        }
    }

    /// Whether every motion channel (position and rotation) is known.
    pub fn has_full_pose(&self) -> bool {
        self.position.is_some() && self.rotation.is_some()
    }
}

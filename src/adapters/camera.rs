//! Engine camera pose

use serde::{Deserialize, Serialize};

use super::FrameAdapter;
use crate::types::{DeviceId, EulerAngles, Quaternion, Rotation, Timecode, TrackingFrame, Vec3};

/// Device units are meters; engine units default to centimeters.
pub const DEFAULT_SPACE_SCALE: f32 = 100.0;

/// Settings for [`CameraPose`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct CameraPoseSettings {
    /// Multiplier from device distance units to engine units
    pub space_scale: f32,
}

impl Default for CameraPoseSettings {
    fn default() -> Self {
        Self { space_scale: DEFAULT_SPACE_SCALE }
    }
}

/// Engine rotator in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// Camera transform and lens in engine space (Z up, scaled units).
///
/// Device axes map as `(x, y, z) -> (x, z, y)`. Pan is measured from the device's
/// forward axis, which sits at 90 degrees engine yaw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct CameraPose {
    pub device_id: DeviceId,
    pub sequence: u64,
    pub timecode: Option<Timecode>,
    pub location: Option<Vec3>,
    /// Only available when the device reports Euler angles.
    pub rotator: Option<Rotator>,
    pub orientation: Option<Quaternion>,
    pub track_position: Option<f32>,
    pub focal_length: Option<f32>,
    /// Scaled like `location`
    pub focus_distance: Option<f32>,
    pub aperture: Option<f32>,
}

impl FrameAdapter for CameraPose {
    type Settings = CameraPoseSettings;

    fn adapt(frame: &TrackingFrame, settings: &CameraPoseSettings) -> Self {
        let scale = settings.space_scale;

        let location = frame.position.map(|p| Vec3::new(scale * p.x, scale * p.z, scale * p.y));

        let (rotator, orientation) = match frame.rotation {
            Some(Rotation::Euler(EulerAngles { pan, tilt, roll })) => {
                let rotator = Rotator { pitch: tilt, yaw: 90.0 + pan, roll };
                let orientation =
                    Quaternion::from_yaw_pitch_roll(rotator.yaw, rotator.pitch, rotator.roll);
                (Some(rotator), Some(orientation))
            }
            Some(Rotation::Quaternion(q)) => (None, Some(q)),
            None => (None, None),
        };

        CameraPose {
            device_id: frame.device_id,
            sequence: frame.sequence,
            timecode: frame.timecode,
            location,
            rotator,
            orientation,
            track_position: frame.track_position.map(|t| scale * t),
            focal_length: frame.lens.focal_length,
            focus_distance: frame.lens.focus_distance.map(|f| scale * f),
            aperture: frame.lens.aperture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LensState;

    fn frame() -> TrackingFrame {
        let mut frame = TrackingFrame::new(DeviceId(2), 77);
        frame.position = Some(Vec3::new(1.0, 2.0, 3.0));
        frame.rotation = Some(Rotation::Euler(EulerAngles { pan: 10.0, tilt: -5.0, roll: 1.0 }));
        frame.track_position = Some(0.5);
        frame.lens =
            LensState { focal_length: Some(24.0), focus_distance: Some(2.0), aperture: None };
        frame
    }

    #[test]
    fn remaps_axes_and_scales() {
        let pose = CameraPose::adapt(&frame(), &CameraPoseSettings::default());
        assert_eq!(pose.location, Some(Vec3::new(100.0, 300.0, 200.0)));
        assert_eq!(pose.track_position, Some(50.0));
        assert_eq!(pose.focus_distance, Some(200.0));
        assert_eq!(pose.focal_length, Some(24.0));
        assert_eq!(pose.aperture, None);
    }

    #[test]
    fn pan_is_offset_into_engine_yaw() {
        let pose = CameraPose::adapt(&frame(), &CameraPoseSettings { space_scale: 1.0 });
        assert_eq!(pose.rotator, Some(Rotator { pitch: -5.0, yaw: 100.0, roll: 1.0 }));
        let q = pose.orientation.unwrap();
        assert!((q.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn quaternion_frames_have_no_rotator() {
        let mut source = frame();
        source.rotation = Some(Rotation::Quaternion(Quaternion::IDENTITY));
        let pose = CameraPose::adapt(&source, &CameraPoseSettings::default());
        assert_eq!(pose.rotator, None);
        assert_eq!(pose.orientation, Some(Quaternion::IDENTITY));
    }

    #[test]
    fn unknown_channels_stay_unknown() {
        let frame = TrackingFrame::new(DeviceId(1), 1);
        let pose = CameraPose::adapt(&frame, &CameraPoseSettings::default());
        assert_eq!(pose.location, None);
        assert_eq!(pose.orientation, None);
        assert_eq!(pose.track_position, None);
    }
}

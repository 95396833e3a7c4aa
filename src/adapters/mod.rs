//! Adapters from decoded frames to consumer representations.
//!
//! A subscription can be turned into a stream of any [`FrameAdapter`] type with
//! [`Subscription::adapt`](crate::publisher::Subscription::adapt). The adapter's
//! settings are fixed for the lifetime of the stream.
//!
//! [`CameraPose`] converts device coordinates into an engine camera transform:
//!
//! ```rust
//! use cranelink::adapters::{CameraPose, CameraPoseSettings, FrameAdapter};
//! use cranelink::types::{DeviceId, EulerAngles, Rotation, TrackingFrame, Vec3};
//!
//! let mut frame = TrackingFrame::new(DeviceId(1), 1);
//! frame.position = Some(Vec3::new(1.0, 0.0, 2.0));
//! frame.rotation = Some(Rotation::Euler(EulerAngles { pan: 0.0, tilt: 0.0, roll: 0.0 }));
//!
//! let pose = CameraPose::adapt(&frame, &CameraPoseSettings::default());
//! assert_eq!(pose.location, Some(Vec3::new(100.0, 200.0, 0.0)));
//! assert_eq!(pose.rotator.unwrap().yaw, 90.0);
//! ```

mod camera;
mod frame_adapter;

pub use camera::{CameraPose, CameraPoseSettings, DEFAULT_SPACE_SCALE, Rotator};
pub use frame_adapter::FrameAdapter;

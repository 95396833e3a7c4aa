//! Core types for tracking telemetry.
//!
//! ## Architecture
//!
//! - [`TrackingFrame`] is one decoded sample: pose, lens, timecode and status bits
//! - [`Timecode`] and [`FrameRate`] model device time, including drop-frame rates
//! - [`ConnectionState`] is the transport lifecycle every component can observe
//! - [`UpdateRate`] sets how often a subscriber stream yields frames
//!
//! ## Usage Example
//!
//! ```rust
//! use cranelink::types::{DeviceId, EulerAngles, Rotation, TrackingFrame, Vec3};
//!
//! let mut frame = TrackingFrame::new(DeviceId(1), 42);
//! frame.position = Vec3::from_finite(1.0, 2.0, 0.5);
//! frame.rotation = Some(Rotation::Euler(EulerAngles { pan: 90.0, tilt: 0.0, roll: 0.0 }));
//!
//! assert!(frame.has_full_pose());
//! assert!(Vec3::from_finite(f32::NAN, 0.0, 0.0).is_none());
//! ```

mod connection_state;
mod frame;
mod timecode;
mod update_rate;

pub use connection_state::{ConnectionState, StateTransition};
pub use frame::{
    DeviceId, DeviceStatus, EulerAngles, LensState, Quaternion, Rotation, TrackingFrame, Vec3,
};
pub use timecode::{FrameRate, Timecode};
pub use update_rate::UpdateRate;

//! Frame adapter trait for consumer-specific representations

use crate::types::TrackingFrame;

/// Converts a [`TrackingFrame`] into a consumer's own type.
///
/// `Settings` is fixed when a subscription is adapted and shared by every call, so
/// per-frame work is limited to the conversion itself.
pub trait FrameAdapter: Sized {
    type Settings;

    fn adapt(frame: &TrackingFrame, settings: &Self::Settings) -> Self;
}

/// Identity adapter for consumers that want the decoded frame itself.
impl FrameAdapter for TrackingFrame {
    type Settings = ();

    fn adapt(frame: &TrackingFrame, _: &()) -> Self {
        frame.clone()
    }
}

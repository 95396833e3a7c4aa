//! Delivery cadence for subscriber streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate at which a subscriber stream yields frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum UpdateRate {
    /// Every frame the subscriber queue holds
    #[default]
    Native,

    /// At most this many frames per second, newest wins.
    /// A rate at or above the source rate behaves like `Native`.
    Max(u32),
}

impl UpdateRate {
    /// Normalize against the source frequency.
    pub fn normalize(self, source_hz: f64) -> Self {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if f64::from(hz) >= source_hz => UpdateRate::Native,
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    /// Pacing interval, if this rate needs one.
    pub fn interval(self) -> Option<Duration> {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / f64::from(hz))),
        }
    }
}

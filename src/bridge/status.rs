//! Health snapshot

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::{ConnectionState, DeviceId};

/// Point-in-time view of the bridge returned by [`Bridge::status`](crate::Bridge::status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct BridgeStatus {
    pub connection_state: ConnectionState,
    /// Milliseconds since the newest cached frame arrived
    pub last_frame_age_ms: Option<u64>,
    /// Frames that passed the checksum and parsed
    pub frames_decoded: u64,
    /// Decoded frames dropped as duplicate or out of order
    pub frames_rejected: u64,
    /// Corrupt regions and unsupported frames skipped by the decoder
    pub decode_errors: u64,
    pub bytes_received: u64,
    pub reconnect_attempts: u64,
    /// Devices with at least one cached frame
    pub devices: Vec<DeviceId>,
    pub subjects: usize,
    pub subscribers: usize,
    /// Deliveries discarded because a subscriber queue was full
    pub deliveries_dropped: u64,
}

impl BridgeStatus {
    pub fn last_frame_age(&self) -> Option<Duration> {
        self.last_frame_age_ms.map(Duration::from_millis)
    }
}

/// Counters written by the driver task.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
    bytes_received: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl Counters {
    pub fn record_bytes(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_frames(&self, n: usize) {
        self.frames_decoded.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_decode_errors(&self, n: usize) {
        self.decode_errors.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn set_reconnect_attempts(&self, n: u64) {
        self.reconnect_attempts.store(n, Ordering::Relaxed);
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }
}

//! Latest-frame cache
//!
//! One slot per device, each a `watch` channel: the driver task is the only writer
//! and replaces the whole frame at once, readers borrow the current value without
//! waiting on the writer's I/O. The slot map lock is only held for lookups.
//!
//! A frame is stored only if its sequence is newer than the last accepted one for
//! that device in the current session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::types::{DeviceId, TrackingFrame};

/// A stored frame and when it arrived.
#[derive(Debug, Clone)]
pub struct CachedFrame {
    pub frame: Arc<TrackingFrame>,
    pub received_at: Instant,
}

impl CachedFrame {
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Outcome of [`FrameCache::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    Accepted,
    /// The sequence was not newer than `last`; nothing changed.
    Rejected { last: u64 },
}

/// Why [`FrameCache::latest`] has no frame to give.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAvailable {
    #[error("No frame received from device {device_id}")]
    NeverReceived { device_id: DeviceId },

    #[error("Last frame from device {device_id} is {age:?} old")]
    Stale { device_id: DeviceId, age: Duration },
}

struct Slot {
    tx: watch::Sender<Option<CachedFrame>>,
    /// Highest accepted sequence this session
    baseline: Option<u64>,
}

impl Slot {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx, baseline: None }
    }
}

pub struct FrameCache {
    slots: RwLock<HashMap<DeviceId, Slot>>,
    stale_after: Duration,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl FrameCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            stale_after,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Store `frame` if it is newer than the device's last accepted frame.
    pub fn update(&self, frame: Arc<TrackingFrame>) -> CacheUpdate {
        let mut slots = self.write();
        let slot = slots.entry(frame.device_id).or_insert_with(Slot::new);

        if let Some(last) = slot.baseline {
            if frame.sequence <= last {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return CacheUpdate::Rejected { last };
            }
        }

        slot.baseline = Some(frame.sequence);
        slot.tx.send_replace(Some(CachedFrame { frame, received_at: Instant::now() }));
        self.accepted.fetch_add(1, Ordering::Relaxed);
        CacheUpdate::Accepted
    }

    /// The device's most recent frame, if it is fresh.
    pub fn latest(&self, device_id: DeviceId) -> Result<Arc<TrackingFrame>, NotAvailable> {
        let cached = self.snapshot(device_id).ok_or(NotAvailable::NeverReceived { device_id })?;
        let age = cached.age();
        if age > self.stale_after {
            return Err(NotAvailable::Stale { device_id, age });
        }
        Ok(cached.frame)
    }

    /// The device's most recent frame regardless of age.
    pub fn snapshot(&self, device_id: DeviceId) -> Option<CachedFrame> {
        self.read().get(&device_id).and_then(|slot| slot.tx.borrow().clone())
    }

    /// Change notifications for one device. Works before the first frame arrives.
    pub fn watch(&self, device_id: DeviceId) -> watch::Receiver<Option<CachedFrame>> {
        if let Some(slot) = self.read().get(&device_id) {
            return slot.tx.subscribe();
        }
        self.write().entry(device_id).or_insert_with(Slot::new).tx.subscribe()
    }

    /// Forget sequence baselines. Called when a new connection starts, since a
    /// restarted device counts from the beginning again. Stored frames stay readable.
    pub fn begin_session(&self) {
        for slot in self.write().values_mut() {
            slot.baseline = None;
        }
    }

    /// Devices that have delivered at least one frame.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .read()
            .iter()
            .filter(|(_, slot)| slot.tx.borrow().is_some())
            .map(|(id, _)| *id)
            .collect();
        devices.sort_unstable();
        devices
    }

    /// Age of the newest frame across all devices.
    pub fn newest_age(&self) -> Option<Duration> {
        self.read()
            .values()
            .filter_map(|slot| slot.tx.borrow().as_ref().map(CachedFrame::age))
            .min()
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeviceId, Slot>> {
        self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeviceId, Slot>> {
        self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(device: u32, sequence: u64) -> Arc<TrackingFrame> {
        Arc::new(TrackingFrame::new(DeviceId(device), sequence))
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_and_older_frames_are_rejected() {
        let cache = FrameCache::new(Duration::from_millis(250));
        let outcomes: Vec<CacheUpdate> =
            [1, 2, 2, 4, 3].iter().map(|&s| cache.update(frame(1, s))).collect();

        assert_eq!(outcomes, vec![
            CacheUpdate::Accepted,
            CacheUpdate::Accepted,
            CacheUpdate::Rejected { last: 2 },
            CacheUpdate::Accepted,
            CacheUpdate::Rejected { last: 4 },
        ]);
        assert_eq!(cache.latest(DeviceId(1)).unwrap().sequence, 4);
        assert_eq!(cache.rejected(), 2);
        assert_eq!(cache.accepted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn devices_are_independent() {
        let cache = FrameCache::new(Duration::from_millis(250));
        cache.update(frame(1, 10));
        assert_eq!(cache.update(frame(2, 1)), CacheUpdate::Accepted);
        assert_eq!(cache.devices(), vec![DeviceId(1), DeviceId(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_go_stale() {
        let cache = FrameCache::new(Duration::from_millis(250));
        assert_eq!(
            cache.latest(DeviceId(1)),
            Err(NotAvailable::NeverReceived { device_id: DeviceId(1) })
        );

        cache.update(frame(1, 1));
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(cache.latest(DeviceId(1)).is_ok());

        tokio::time::advance(Duration::from_millis(100)).await;
        match cache.latest(DeviceId(1)) {
            Err(NotAvailable::Stale { age, .. }) => assert_eq!(age, Duration::from_millis(300)),
            other => panic!("expected stale, got {other:?}"),
        }
        assert_eq!(cache.snapshot(DeviceId(1)).unwrap().frame.sequence, 1);
        assert_eq!(cache.newest_age(), Some(Duration::from_millis(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_accepts_restarted_counters() {
        let cache = FrameCache::new(Duration::from_millis(250));
        cache.update(frame(1, 500));
        assert!(matches!(cache.update(frame(1, 1)), CacheUpdate::Rejected { .. }));

        cache.begin_session();
        assert_eq!(cache.latest(DeviceId(1)).unwrap().sequence, 500);
        assert_eq!(cache.update(frame(1, 1)), CacheUpdate::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn watchers_see_replacements() {
        let cache = FrameCache::new(Duration::from_millis(250));
        let mut rx = cache.watch(DeviceId(9));
        assert!(rx.borrow().is_none());

        cache.update(frame(9, 1));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().frame.sequence, 1);
    }

    proptest! {
        #[test]
        fn stored_sequence_is_running_maximum(sequences in prop::collection::vec(0u64..50, 1..60)) {
            let cache = FrameCache::new(Duration::from_secs(3600));
            let mut rejected = 0;
            let mut max: Option<u64> = None;
            for &seq in &sequences {
                if max.is_some_and(|m| seq <= m) {
                    rejected += 1;
                } else {
                    max = Some(seq);
                }
                cache.update(frame(1, seq));
            }
            prop_assert_eq!(cache.snapshot(DeviceId(1)).map(|c| c.frame.sequence), max);
            prop_assert_eq!(cache.rejected(), rejected);
        }
    }
}

//! Subject-based fan-out of tracking frames.
//!
//! Frames are published to named subjects. Each subscription owns a bounded queue;
//! publishing only ever enqueues, so a slow or stuck consumer loses its own oldest
//! frames and never holds up the driver or other subscribers.
//!
//! Subjects are created on first publish or subscribe. They are destroyed by
//! [`Publisher::collect_garbage`] when their device has been offline for the grace
//! period, or when nobody subscribes and nothing was published for the idle timeout.
//! Destroying a subject closes its subscriptions.
//!
//! ```rust
//! use cranelink::publisher::{Publisher, PublisherConfig, SubjectName};
//! use cranelink::types::{DeviceId, TrackingFrame};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let publisher = Publisher::new(PublisherConfig::default());
//! let subject = SubjectName::for_device(DeviceId(1));
//! let mut subscription = publisher.subscribe(subject.clone());
//!
//! publisher.publish(&subject, Arc::new(TrackingFrame::new(DeviceId(1), 1)));
//! let delivery = subscription.recv().await.unwrap();
//! assert_eq!(delivery.frame.sequence, 1);
//! # }
//! ```

mod subscription;

pub use subscription::{Subscription, TryRecvError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::{DeviceId, TrackingFrame};
use subscription::{Push, SubscriberQueue};

/// Name of a stream of frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectName(Arc<str>);

impl SubjectName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Default subject for a device's frames, `camera/<id>`.
    pub fn for_device(device_id: DeviceId) -> Self {
        Self::new(format!("camera/{}", device_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SubjectName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<DeviceId> for SubjectName {
    fn from(device_id: DeviceId) -> Self {
        Self::for_device(device_id)
    }
}

/// One published frame as seen by a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: SubjectName,
    pub device_id: DeviceId,
    pub frame: Arc<TrackingFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Capacity of each subscriber queue
    pub queue_depth: usize,
    /// Evict a subscriber after this many consecutive overflows. `None` never evicts.
    pub eviction_threshold: Option<u32>,
    /// How long an offline device's subjects survive without a new frame
    pub grace_period: Duration,
    /// How long a subject with no subscribers survives without a new frame
    pub idle_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_depth: 32,
            eviction_threshold: None,
            grace_period: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for [`Publisher::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct PublisherStats {
    pub subjects: usize,
    pub subscribers: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub evicted: u64,
}

struct Subject {
    subscribers: Vec<Arc<SubscriberQueue>>,
    device_id: Option<DeviceId>,
    created_at: Instant,
    last_frame: Option<Instant>,
    offline_since: Option<Instant>,
}

impl Subject {
    fn new(now: Instant) -> Self {
        Self {
            subscribers: Vec::new(),
            device_id: None,
            created_at: now,
            last_frame: None,
            offline_since: None,
        }
    }

    fn last_activity(&self) -> Instant {
        self.last_frame.unwrap_or(self.created_at)
    }

    fn close(&mut self) {
        for queue in self.subscribers.drain(..) {
            queue.close();
        }
    }
}

pub(crate) struct Shared {
    subjects: Mutex<HashMap<SubjectName, Subject>>,
    config: PublisherConfig,
    next_id: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubjectName, Subject>> {
        self.subjects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove one subscriber queue from its subject.
    pub(crate) fn detach(&self, subject: &SubjectName, id: u64) {
        if let Some(entry) = self.lock().get_mut(subject) {
            entry.subscribers.retain(|queue| queue.id != id);
        }
    }
}

/// Subject registry and fan-out. Cheap to clone.
#[derive(Clone)]
pub struct Publisher {
    shared: Arc<Shared>,
}

impl Publisher {
    pub fn new(config: PublisherConfig) -> Self {
        let shared = Shared {
            subjects: Mutex::new(HashMap::new()),
            config,
            next_id: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        };
        Self { shared: Arc::new(shared) }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.shared.config
    }

    /// Enqueue `frame` for every subscriber of `subject`. Returns how many queues
    /// received it.
    pub fn publish(&self, subject: &SubjectName, frame: Arc<TrackingFrame>) -> usize {
        let now = Instant::now();
        let threshold = self.shared.config.eviction_threshold;
        let mut subjects = self.shared.lock();

        let entry = subjects.entry(subject.clone()).or_insert_with(|| {
            debug!("Created subject {}", subject);
            Subject::new(now)
        });
        entry.device_id = Some(frame.device_id);
        entry.last_frame = Some(now);
        entry.offline_since = None;

        let mut queued = 0;
        let mut evict = Vec::new();
        for queue in &entry.subscribers {
            let delivery = Delivery {
                subject: subject.clone(),
                device_id: frame.device_id,
                frame: Arc::clone(&frame),
            };
            match queue.push(delivery) {
                Push::Queued => queued += 1,
                Push::Overflowed { consecutive } => {
                    queued += 1;
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    if threshold.is_some_and(|limit| consecutive > limit) {
                        evict.push(queue.id);
                    }
                }
                Push::Closed => {}
            }
        }

        if !evict.is_empty() {
            entry.subscribers.retain(|queue| {
                if evict.contains(&queue.id) {
                    warn!(
                        "Evicting subscriber {} from {}: queue kept overflowing",
                        queue.id, subject
                    );
                    queue.close();
                    false
                } else {
                    true
                }
            });
            self.shared.evicted.fetch_add(evict.len() as u64, Ordering::Relaxed);
        }

        self.shared.delivered.fetch_add(queued as u64, Ordering::Relaxed);
        queued
    }

    /// Register a subscriber, creating the subject if needed.
    pub fn subscribe(&self, subject: impl Into<SubjectName>) -> Subscription {
        let subject = subject.into();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(id, self.shared.config.queue_depth));

        let mut subjects = self.shared.lock();
        let entry = subjects.entry(subject.clone()).or_insert_with(|| {
            debug!("Created subject {}", subject);
            Subject::new(Instant::now())
        });
        entry.subscribers.push(Arc::clone(&queue));
        drop(subjects);

        debug!("Subscriber {} joined {}", id, subject);
        Subscription::new(subject, queue, Arc::downgrade(&self.shared))
    }

    /// Remove a subscription. Same as dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!("Unsubscribing {:?}", subscription);
        drop(subscription);
    }

    /// Start the grace period for these subjects.
    pub fn mark_offline<'a>(&self, subjects: impl IntoIterator<Item = &'a SubjectName>) {
        let now = Instant::now();
        let mut map = self.shared.lock();
        for name in subjects {
            if let Some(subject) = map.get_mut(name) {
                subject.offline_since.get_or_insert(now);
            }
        }
    }

    /// End the grace period for these subjects; their device is reachable again.
    pub fn mark_online<'a>(&self, subjects: impl IntoIterator<Item = &'a SubjectName>) {
        let mut map = self.shared.lock();
        for name in subjects {
            if let Some(subject) = map.get_mut(name) {
                subject.offline_since = None;
            }
        }
    }

    /// Subjects that carry frames from a device.
    pub fn device_subjects(&self) -> Vec<SubjectName> {
        let mut names: Vec<SubjectName> = self
            .shared
            .lock()
            .iter()
            .filter(|(_, s)| s.device_id.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Destroy offline and idle subjects as of `now`. Returns the removed names.
    pub fn collect_garbage(&self, now: Instant) -> Vec<SubjectName> {
        let config = self.shared.config;
        let mut removed = Vec::new();

        self.shared.lock().retain(|name, subject| {
            let offline_expired = subject
                .offline_since
                .is_some_and(|since| now.saturating_duration_since(since) >= config.grace_period);
            let idle_expired = subject.subscribers.is_empty()
                && now.saturating_duration_since(subject.last_activity()) >= config.idle_timeout;

            if offline_expired || idle_expired {
                subject.close();
                removed.push(name.clone());
                false
            } else {
                true
            }
        });

        if !removed.is_empty() {
            removed.sort();
            info!("Removed {} subject(s): {:?}", removed.len(), removed);
        }
        removed
    }

    pub fn subjects(&self) -> Vec<SubjectName> {
        let mut names: Vec<SubjectName> = self.shared.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every subscription and forget all subjects.
    pub fn close_all(&self) {
        let mut subjects = self.shared.lock();
        for subject in subjects.values_mut() {
            subject.close();
        }
        subjects.clear();
    }

    pub fn stats(&self) -> PublisherStats {
        let subjects = self.shared.lock();
        PublisherStats {
            subjects: subjects.len(),
            subscribers: subjects.values().map(|s| s.subscribers.len()).sum(),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            evicted: self.shared.evicted.load(Ordering::Relaxed),
        }
    }
}

//! Subscriber queues and handles

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tokio::sync::Notify;

use super::{Delivery, Shared, SubjectName};
use crate::adapters::FrameAdapter;
use crate::stream::PaceExt;
use crate::types::UpdateRate;

/// Why [`Subscription::try_recv`] returned nothing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("No delivery queued")]
    Empty,
    #[error("Subscription closed")]
    Closed,
}

/// Result of pushing into a subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Push {
    Queued,
    /// The oldest entry was dropped to make room
    Overflowed { consecutive: u32 },
    Closed,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Delivery>,
    closed: bool,
    dropped: u64,
    consecutive_overflows: u32,
}

/// Bounded newest-wins queue shared by the publisher and one subscriber.
pub(crate) struct SubscriberQueue {
    pub(crate) id: u64,
    depth: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SubscriberQueue {
    pub(crate) fn new(id: u64, depth: usize) -> Self {
        Self {
            id,
            depth: depth.max(1),
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(depth.max(1)),
                ..Default::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Never blocks on the consumer.
    pub(crate) fn push(&self, delivery: Delivery) -> Push {
        let mut state = self.lock();
        if state.closed {
            return Push::Closed;
        }

        let outcome = if state.items.len() >= self.depth {
            state.items.pop_front();
            state.dropped += 1;
            state.consecutive_overflows += 1;
            Push::Overflowed { consecutive: state.consecutive_overflows }
        } else {
            state.consecutive_overflows = 0;
            Push::Queued
        };
        state.items.push_back(delivery);
        drop(state);

        self.notify.notify_one();
        outcome
    }

    /// Mark closed and wake the consumer. Queued deliveries are discarded.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.items.clear();
        drop(state);
        self.notify.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A consumer's handle on one subject.
///
/// Dropping the handle unsubscribes. Deliveries are at most once: when the queue is
/// full the oldest entry is discarded and counted in [`Subscription::dropped`].
pub struct Subscription {
    subject: SubjectName,
    queue: Arc<SubscriberQueue>,
    publisher: Weak<Shared>,
}

impl Subscription {
    pub(crate) fn new(
        subject: SubjectName,
        queue: Arc<SubscriberQueue>,
        publisher: Weak<Shared>,
    ) -> Self {
        Self { subject, queue, publisher }
    }

    pub fn subject(&self) -> &SubjectName {
        &self.subject
    }

    /// Wait for the next delivery. `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            let notified = self.queue.notify.notified();
            {
                let mut state = self.queue.lock();
                if let Some(delivery) = state.items.pop_front() {
                    return Some(delivery);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn try_recv(&mut self) -> Result<Delivery, TryRecvError> {
        let mut state = self.queue.lock();
        match state.items.pop_front() {
            Some(delivery) => Ok(delivery),
            None if state.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Deliveries discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.lock().dropped
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().items.len()
    }

    /// Whether the subject was destroyed, the subscriber evicted, or the
    /// publisher shut down.
    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    /// Turn into a stream of deliveries at `rate`.
    ///
    /// With [`UpdateRate::Max`] the stream yields the newest queued delivery at most
    /// once per interval and skips the rest.
    pub fn into_stream(self, rate: UpdateRate) -> BoxStream<'static, Delivery> {
        let deliveries = stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|delivery| (delivery, subscription))
        });

        match rate.interval() {
            None => deliveries.boxed(),
            Some(interval) => deliveries.pace(interval).boxed(),
        }
    }

    /// Turn into a stream of adapted values at `rate`.
    pub fn adapt<A>(self, settings: A::Settings, rate: UpdateRate) -> BoxStream<'static, A>
    where
        A: FrameAdapter + Send + 'static,
        A::Settings: Send + 'static,
    {
        self.into_stream(rate).map(move |delivery| A::adapt(&delivery.frame, &settings)).boxed()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .field("id", &self.queue.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(shared) = self.publisher.upgrade() {
            shared.detach(&self.subject, self.queue.id);
        }
    }
}

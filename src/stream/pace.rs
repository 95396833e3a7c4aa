//! Latest-wins stream pacing

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to pace any Stream
pub trait PaceExt: Stream {
    /// Emit at most once per `period`.
    ///
    /// Items that arrive between emissions replace each other; only the newest is
    /// emitted. An item that arrives after a quiet period goes out immediately.
    fn pace(self, period: Duration) -> Pace<Self>
    where
        Self: Sized,
    {
        Pace::new(self, period)
    }
}

impl<T: Stream> PaceExt for T {}

pin_project! {
    /// Stream returned by [`PaceExt::pace`]
    pub struct Pace<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        exhausted: bool,
    }
}

impl<S: Stream> Pace<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        let mut interval = interval(period);
        // Don't burst after a quiet period
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { stream, interval, pending: None, exhausted: false }
    }
}

impl<S: Stream> Stream for Pace<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Drain everything available, keeping only the newest
        while !*this.exhausted {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.exhausted = true,
                Poll::Pending => break,
            }
        }

        if this.pending.is_none() {
            return if *this.exhausted { Poll::Ready(None) } else { Poll::Pending };
        }

        ready!(this.interval.poll_tick(cx));
        Poll::Ready(this.pending.take())
    }
}

//! Ingestion task: transport, decoder, cache and publisher in one loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::status::Counters;
use crate::BridgeError;
use crate::cache::{CacheUpdate, FrameCache};
use crate::protocol::{DecodeOutput, DecoderOptions, FrameDecoder};
use crate::publisher::{Publisher, SubjectName};
use crate::transport::{Activity, TransportClient};
use crate::types::{ConnectionState, DeviceId};

/// Everything the driver task owns or shares.
pub(crate) struct DriverContext {
    pub client: TransportClient,
    pub cache: Arc<FrameCache>,
    pub publisher: Publisher,
    pub counters: Arc<Counters>,
    pub decoder_options: DecoderOptions,
    pub housekeeping_interval: Duration,
    pub restart: Arc<Notify>,
    pub cancel: CancellationToken,
}

/// Why the loop left a wait.
enum Wake {
    Cancelled,
    Restart,
    Elapsed,
}

/// Spawns and runs the ingestion task.
///
/// The task owns the [`TransportClient`]. Reading, decoding, caching and publishing
/// all happen sequentially here, so frames from one connection are processed in
/// arrival order. Publishing only enqueues and never waits on subscribers.
pub(crate) struct Driver {
    client: TransportClient,
    decoder: FrameDecoder,
    cache: Arc<FrameCache>,
    publisher: Publisher,
    counters: Arc<Counters>,
    subjects: HashMap<DeviceId, SubjectName>,
    housekeeping: Interval,
    restart: Arc<Notify>,
    cancel: CancellationToken,
    /// Delay to wait before the next connect attempt
    retry_in: Option<Duration>,
}

impl Driver {
    pub fn spawn(context: DriverContext) -> JoinHandle<()> {
        let mut housekeeping = tokio::time::interval(context.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let driver = Driver {
            client: context.client,
            decoder: FrameDecoder::new(context.decoder_options),
            cache: context.cache,
            publisher: context.publisher,
            counters: context.counters,
            subjects: HashMap::new(),
            housekeeping,
            restart: context.restart,
            cancel: context.cancel,
            retry_in: None,
        };

        tokio::spawn(driver.run())
    }

    async fn run(mut self) {
        info!("Driver task started for {}", self.client.endpoint());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.client.state() == ConnectionState::Failed {
                match self.idle_until_restart().await {
                    Wake::Cancelled => break,
                    Wake::Restart => self.client.restart(),
                    Wake::Elapsed => {}
                }
                continue;
            }

            if !self.client.is_connected() {
                if let Some(delay) = self.retry_in.take() {
                    match self.wait(delay).await {
                        Wake::Cancelled => break,
                        Wake::Restart => self.client.restart(),
                        Wake::Elapsed => {}
                    }
                }
                self.connect().await;
                continue;
            }

            let cancel = self.cancel.clone();
            let restart = Arc::clone(&self.restart);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = restart.notified() => {
                    info!("Restart requested, reconnecting to {}", self.client.endpoint());
                    self.connection_lost().await;
                    self.client.restart();
                    self.retry_in = None;
                }
                _ = self.housekeeping.tick() => self.collect_garbage(),
                result = self.client.poll() => match result {
                    Ok(Activity::Data(bytes)) => {
                        self.counters.record_bytes(bytes.len());
                        let output = self.decoder.feed(&bytes);
                        self.ingest(output);
                    }
                    Ok(Activity::Stalled) => {}
                    Err(e) => {
                        warn!("Lost connection to {}: {}", self.client.endpoint(), e);
                        self.connection_lost().await;
                        self.retry_in = Some(self.client.next_backoff());
                    }
                }
            }
        }

        self.client.disconnect().await;
        self.publisher.close_all();
        info!("Driver task ended ({} frames decoded)", self.counters.frames_decoded());
    }

    async fn connect(&mut self) {
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.client.connect() => result,
        };
        self.counters.set_reconnect_attempts(self.client.reconnect_attempts());

        match result {
            Ok(()) => {
                self.decoder.reset();
                self.cache.begin_session();
                self.publisher.mark_online(self.subjects.values());
            }
            Err(BridgeError::ReconnectCeiling { attempts }) => {
                error!("Transport failed after {} attempts; waiting for restart", attempts);
            }
            Err(e) => {
                let delay = self.client.next_backoff();
                debug!("Connect failed ({}), retrying in {:?}", e, delay);
                self.retry_in = Some(delay);
            }
        }
    }

    async fn connection_lost(&mut self) {
        self.client.disconnect().await;
        let subjects: Vec<SubjectName> = self.subjects.values().cloned().collect();
        self.publisher.mark_offline(&subjects);
    }

    /// Sleep for `delay` while still running housekeeping.
    async fn wait(&mut self, delay: Duration) -> Wake {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Wake::Cancelled,
                _ = self.restart.notified() => return Wake::Restart,
                _ = &mut deadline => return Wake::Elapsed,
                _ = self.housekeeping.tick() => self.collect_garbage(),
            }
        }
    }

    async fn idle_until_restart(&mut self) -> Wake {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Wake::Cancelled,
            _ = self.restart.notified() => Wake::Restart,
            _ = self.housekeeping.tick() => {
                self.collect_garbage();
                Wake::Elapsed
            }
        }
    }

    fn ingest(&mut self, output: DecodeOutput) {
        if !output.errors.is_empty() {
            self.counters.record_decode_errors(output.errors.len());
            for e in &output.errors {
                debug!("Skipped input from {}: {}", self.client.endpoint(), e);
            }
        }

        self.counters.record_frames(output.frames.len());
        for frame in output.frames {
            let frame = Arc::new(frame);
            match self.cache.update(Arc::clone(&frame)) {
                CacheUpdate::Accepted => {
                    self.client.note_frame();
                    let subject = self
                        .subjects
                        .entry(frame.device_id)
                        .or_insert_with(|| SubjectName::for_device(frame.device_id));
                    self.publisher.publish(subject, frame);
                }
                CacheUpdate::Rejected { last } => {
                    let error = BridgeError::Sequence {
                        device_id: frame.device_id,
                        sequence: frame.sequence,
                        last,
                    };
                    trace!("{}", error);
                }
            }
        }
    }

    fn collect_garbage(&mut self) {
        let removed = self.publisher.collect_garbage(Instant::now());
        if !removed.is_empty() {
            self.subjects.retain(|_, subject| !removed.contains(subject));
        }
    }
}

//! Bridge controller
//!
//! [`Bridge`] wires the transport, decoder, cache and publisher together and runs
//! them on a single driver task. Everything here is a handle onto shared state, so
//! status and cache reads never wait on socket I/O.

mod config;
mod driver;
mod status;

pub use config::BridgeConfig;
pub use status::BridgeStatus;

use futures::Stream;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{FrameCache, NotAvailable};
use crate::publisher::{Publisher, SubjectName, Subscription};
use crate::transport::{Backoff, Connector, NetworkConnector, TransportClient};
use crate::types::{ConnectionState, DeviceId, StateTransition, TrackingFrame};
use crate::{BridgeError, Result};
use driver::{Driver, DriverContext};
use status::Counters;

/// A running bridge from one tracking endpoint to any number of subscribers.
///
/// Dropping the bridge cancels its driver task. Use [`Bridge::stop`] to also wait
/// for the socket to close.
pub struct Bridge {
    config: BridgeConfig,
    cache: Arc<FrameCache>,
    publisher: Publisher,
    counters: Arc<Counters>,
    state: watch::Receiver<ConnectionState>,
    transitions: broadcast::Sender<StateTransition>,
    restart: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// Validate `config` and start ingesting from its endpoint.
    ///
    /// Returns once the driver task is running. The first connect happens in the
    /// background; watch [`Bridge::state_updates`] to see it complete.
    pub async fn start(config: BridgeConfig) -> Result<Self> {
        let connector = NetworkConnector::new(config.read_buffer_size);
        Self::start_with_connector(config, connector).await
    }

    /// Like [`Bridge::start`], reading through a custom [`Connector`].
    pub async fn start_with_connector(
        config: BridgeConfig,
        connector: impl Connector,
    ) -> Result<Self> {
        config.validate()?;
        info!("Starting bridge for {}", config.endpoint);

        let client = TransportClient::new(
            Arc::new(connector),
            config.endpoint.clone(),
            config.transport_settings(),
            Backoff::from_config(&config.reconnect_backoff),
        );
        let state = client.state_receiver();
        let transitions = client.transition_sender();

        let cache = Arc::new(FrameCache::new(config.stale_frame_timeout()));
        let publisher = Publisher::new(config.publisher_config());
        let counters = Arc::new(Counters::default());
        let restart = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = Driver::spawn(DriverContext {
            client,
            cache: Arc::clone(&cache),
            publisher: publisher.clone(),
            counters: Arc::clone(&counters),
            decoder_options: config.decoder_options(),
            housekeeping_interval: config.housekeeping_interval(),
            restart: Arc::clone(&restart),
            cancel: cancel.clone(),
        });

        Ok(Self {
            config,
            cache,
            publisher,
            counters,
            state,
            transitions,
            restart,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Cancel the driver task and wait for it to close the connection.
    ///
    /// Every subscription is closed. Calling this again does nothing.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        let Some(task) = task else {
            return;
        };
        if let Err(e) = task.await {
            warn!("Driver task ended abnormally: {}", e);
        }
        info!("Bridge for {} stopped", self.config.endpoint);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn status(&self) -> BridgeStatus {
        let publisher = self.publisher.stats();
        BridgeStatus {
            connection_state: self.connection_state(),
            last_frame_age_ms: self.cache.newest_age().map(|age| age.as_millis() as u64),
            frames_decoded: self.counters.frames_decoded(),
            frames_rejected: self.cache.rejected(),
            decode_errors: self.counters.decode_errors(),
            bytes_received: self.counters.bytes_received(),
            reconnect_attempts: self.counters.reconnect_attempts(),
            devices: self.cache.devices(),
            subjects: publisher.subjects,
            subscribers: publisher.subscribers,
            deliveries_dropped: publisher.dropped,
        }
    }

    /// The device's most recent frame, unless it is older than the stale timeout.
    pub fn latest(
        &self,
        device_id: DeviceId,
    ) -> std::result::Result<Arc<TrackingFrame>, NotAvailable> {
        self.cache.latest(device_id)
    }

    /// Subscribe to a subject. Fails once the bridge is stopped.
    pub fn subscribe(&self, subject: impl Into<SubjectName>) -> Result<Subscription> {
        if self.is_stopped() {
            return Err(BridgeError::Stopped);
        }
        Ok(self.publisher.subscribe(subject))
    }

    /// Subscribe to a device's default subject.
    pub fn subscribe_device(&self, device_id: DeviceId) -> Result<Subscription> {
        self.subscribe(SubjectName::for_device(device_id))
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.publisher.unsubscribe(subscription);
    }

    /// Drop the current connection and connect again with a fresh backoff.
    /// This is also the way out of `Failed`.
    pub fn restart(&self) {
        debug!("Restart requested for {}", self.config.endpoint);
        self.restart.notify_one();
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The current state, then every change.
    pub fn state_updates(&self) -> impl Stream<Item = ConnectionState> + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Every state change with its timestamp, from now on.
    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        debug!("Dropping bridge for {}", self.config.endpoint);
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests;

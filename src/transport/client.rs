//! Connection state machine

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{Backoff, Chunk, Connection, Connector, Endpoint};
use crate::types::{ConnectionState, StateTransition};
use crate::{BridgeError, Result};

/// Capacity of the transition broadcast before slow observers start lagging.
const TRANSITION_CAPACITY: usize = 64;

/// Timing limits for a [`TransportClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Bound on a single connect attempt
    pub io_timeout: Duration,
    /// Time without a decoded frame after which a live connection counts as degraded
    pub stale_timeout: Duration,
    /// Consecutive failed connects before giving up
    pub max_reconnect_attempts: u32,
}

/// Result of a successful [`TransportClient::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    Data(Bytes),
    /// No frame was noted within the stale timeout. The state is now `Degraded`.
    Stalled,
}

/// Owns the current connection and the [`ConnectionState`].
pub struct TransportClient {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    settings: TransportSettings,
    backoff: Backoff,
    connection: Option<Box<dyn Connection>>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<StateTransition>,
    last_frame: Instant,
    consecutive_failures: u32,
    connect_attempts: u64,
}

impl TransportClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
        settings: TransportSettings,
        backoff: Backoff,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            connector,
            endpoint,
            settings,
            backoff,
            connection: None,
            state,
            transitions,
            last_frame: Instant::now(),
            consecutive_failures: 0,
            connect_attempts: 0,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Sender side of the transition feed, for handing out receivers after the
    /// client has moved into its task.
    pub fn transition_sender(&self) -> broadcast::Sender<StateTransition> {
        self.transitions.clone()
    }

    /// Connect attempts made after the first one, over the client's lifetime.
    pub fn reconnect_attempts(&self) -> u64 {
        self.connect_attempts.saturating_sub(1)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open a connection.
    ///
    /// On failure the state returns to `Disconnected`, or to `Failed` once
    /// `max_reconnect_attempts` consecutive attempts have failed.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state() {
            ConnectionState::Failed => {
                return Err(BridgeError::ReconnectCeiling { attempts: self.consecutive_failures });
            }
            state if state.is_connected() => return Ok(()),
            _ => {}
        }

        self.connect_attempts += 1;
        self.transition(ConnectionState::Connecting);

        let connecting = self.connector.connect(&self.endpoint);
        let attempt = tokio::time::timeout(self.settings.io_timeout, connecting).await;
        let error = match attempt {
            Ok(Ok(connection)) => {
                info!("Connected to {}", connection.peer());
                self.connection = Some(connection);
                self.consecutive_failures = 0;
                self.backoff.reset();
                self.last_frame = Instant::now();
                self.transition(ConnectionState::Connected);
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => BridgeError::Timeout { duration: self.settings.io_timeout },
        };

        self.consecutive_failures += 1;
        warn!(
            "Connect to {} failed ({}/{}): {}",
            self.endpoint, self.consecutive_failures, self.settings.max_reconnect_attempts, error
        );
        self.transition(ConnectionState::Disconnected);

        if self.consecutive_failures >= self.settings.max_reconnect_attempts {
            error!("Giving up on {} after {} attempts", self.endpoint, self.consecutive_failures);
            self.transition(ConnectionState::Failed);
            return Err(BridgeError::ReconnectCeiling { attempts: self.consecutive_failures });
        }
        Err(error)
    }

    /// Wait for the next bytes from the device.
    ///
    /// While `Connected`, the wait is bounded by the stale timeout measured from the
    /// last [`TransportClient::note_frame`], so cancelling and re-polling does not
    /// extend it and bytes that never decode do not keep the link healthy. A read
    /// error or end of stream drops the connection and moves to `Disconnected`.
    ///
    /// Cancel safe.
    pub async fn poll(&mut self) -> Result<Activity> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(BridgeError::connection_failed("not connected"));
        };

        let result = if *self.state.borrow() == ConnectionState::Degraded {
            connection.poll().await
        } else {
            let deadline = self.last_frame + self.settings.stale_timeout;
            let polled = if Instant::now() >= deadline {
                None
            } else {
                tokio::time::timeout_at(deadline, connection.poll()).await.ok()
            };
            match polled {
                Some(result) => result,
                None => {
                    warn!("No frames from {} for {:?}", self.endpoint, self.settings.stale_timeout);
                    self.transition(ConnectionState::Degraded);
                    return Ok(Activity::Stalled);
                }
            }
        };

        match result {
            Ok(Chunk::Data(bytes)) => Ok(Activity::Data(bytes)),
            Ok(Chunk::EndOfStream) => {
                self.drop_connection().await;
                let reason = format!("{} closed the connection", self.endpoint);
                Err(BridgeError::connection_failed(reason))
            }
            Err(e) => {
                self.drop_connection().await;
                Err(e)
            }
        }
    }

    /// Record that a frame from this connection was decoded and accepted.
    /// Restarts the stale timeout and lifts `Degraded`.
    pub fn note_frame(&mut self) {
        if self.connection.is_none() {
            return;
        }
        self.last_frame = Instant::now();
        if self.state() == ConnectionState::Degraded {
            info!("Frames resumed from {}", self.endpoint);
            self.transition(ConnectionState::Connected);
        }
    }

    /// Close the current connection, if any.
    pub async fn disconnect(&mut self) {
        self.drop_connection().await;
    }

    /// Delay before the next connect attempt.
    pub fn next_backoff(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    /// Leave `Failed` so connect attempts can start over.
    pub fn restart(&mut self) {
        self.consecutive_failures = 0;
        self.backoff.reset();
        if self.state() == ConnectionState::Failed {
            info!("Restarting transport for {}", self.endpoint);
            self.transition(ConnectionState::Disconnected);
        }
    }

    async fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.disconnect().await {
                debug!("Error while closing {}: {}", connection.peer(), e);
            }
        }
        if self.state() != ConnectionState::Failed {
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!("Connection state {} -> {}", from, to);
            // No observers is fine
            let _ = self.transitions.send(StateTransition { from, to, at: Instant::now() });
        }
    }
}

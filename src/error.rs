//! Error types for the tracking bridge.
//!
//! All errors implement `std::error::Error` and carry enough structured context to
//! decide whether to retry, count, or surface the failure to the host.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: transient socket failures that drive reconnect/backoff
//! - **Protocol Errors**: a single frame failed to decode; logged, counted, skipped
//! - **Sequence Errors**: duplicate or out-of-order frames; counted silently
//! - **Configuration Errors**: invalid endpoint or options, fatal at `start()`
//! - **Reconnect Ceiling**: the transport gave up and entered `Failed`
//!
//! Only configuration errors and the reconnect ceiling are actionable for the host;
//! everything else is recovered internally and shows up as counters in
//! [`BridgeStatus`](crate::BridgeStatus).
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use cranelink::BridgeError;
//!
//! let error = BridgeError::connection_failed("device refused connection");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::protocol::DecodeError;
use crate::types::DeviceId;

/// Result type alias for bridge operations.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Main error type for bridge operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("Connection to tracking device failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("Frame {sequence} from device {device_id} is not newer than {last}")]
    Sequence { device_id: DeviceId, sequence: u64, last: u64 },

    #[error("Invalid configuration for '{field}': {reason}")]
    Configuration { field: String, reason: String },

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectCeiling { attempts: u32 },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Bridge is stopped")]
    Stopped,
}

impl BridgeError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Connection { .. } => true,
            BridgeError::Timeout { .. } => true,
            BridgeError::Io { .. } => true,
            BridgeError::Protocol(_) => true,
            BridgeError::Sequence { .. } => false,
            BridgeError::Configuration { .. } => false,
            BridgeError::ReconnectCeiling { .. } => false,
            BridgeError::Stopped => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            BridgeError::Connection { .. } => vec![
                "Check the tracking device is powered and streaming",
                "Verify the endpoint host and port",
                "Check firewall rules between bridge and device",
            ],
            BridgeError::Protocol(_) => vec![
                "Check the device firmware speaks a supported protocol version",
                "Look for another sender on the same port",
            ],
            BridgeError::Sequence { .. } => vec![
                "Check that only one device uses this device id",
                "Restart the device session if counters were reset",
            ],
            BridgeError::Configuration { .. } => vec![
                "Fix the named configuration field",
                "Compare against the documented defaults",
            ],
            BridgeError::ReconnectCeiling { .. } => vec![
                "Bring the tracking device back online",
                "Call restart() once the device is reachable",
                "Raise max_reconnect_attempts if outages are expected",
            ],
            BridgeError::Timeout { .. } => vec![
                "Increase io_timeout_ms",
                "Check network latency to the device",
            ],
            BridgeError::Io { .. } => vec![
                "Check socket permissions and address availability",
                "Verify the network interface is up",
            ],
            BridgeError::Stopped => vec!["Start a new bridge with Bridge::start()"],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        BridgeError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        BridgeError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Configuration { field: field.into(), reason: reason.into() }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BridgeError::Io { context: context.into(), source }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io { context: "socket operation".to_string(), source: err }
    }
}

//! Real-time bridge from camera-tracking hardware to in-process subscribers.
//!
//! Cranelink connects to a tracking device over TCP or UDP, decodes its binary
//! telemetry, keeps the newest frame per device, and fans frames out to any number
//! of subscribers without letting a slow consumer stall ingestion.
//!
//! # Features
//!
//! - **Resumable decoding**: frames split across reads, corrupt regions skipped
//! - **Self-healing transport**: exponential backoff, degraded detection, restart
//! - **Latest-frame cache**: lock-light reads that never wait on the socket
//! - **Bounded fan-out**: newest-wins queues per subscriber, optional pacing
//!
//! ## Example
//!
//! ```rust,no_run
//! use cranelink::{Bridge, BridgeConfig, UpdateRate};
//! use cranelink::adapters::{CameraPose, CameraPoseSettings};
//! use cranelink::types::DeviceId;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> cranelink::Result<()> {
//!     let config = BridgeConfig::from_file("bridge.yaml")?;
//!     let bridge = Bridge::start(config).await?;
//!
//!     let mut poses = bridge
//!         .subscribe_device(DeviceId(1))?
//!         .adapt::<CameraPose>(CameraPoseSettings::default(), UpdateRate::Max(30));
//!
//!     while let Some(pose) = poses.next().await {
//!         println!("{:?} {:?}", pose.location, pose.rotator);
//!     }
//!
//!     bridge.stop().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
mod bridge;
pub mod cache;
mod error;
pub mod protocol;
pub mod publisher;
pub mod stream;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod transport;
pub mod types;

pub use adapters::FrameAdapter;
pub use bridge::{Bridge, BridgeConfig, BridgeStatus};
pub use cache::NotAvailable;
pub use error::*;
pub use publisher::{Delivery, SubjectName, Subscription};
pub use transport::Endpoint;
pub use types::{ConnectionState, DeviceId, TrackingFrame, UpdateRate};

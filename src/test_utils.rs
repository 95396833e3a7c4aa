//! Simulated tracking device for tests and benchmarks
//!
//! [`SimulatedConnector`] stands in for the network. Every successful connect
//! produces a [`LinkHandle`] through [`Links`], which the test uses to push bytes,
//! reset the link or close it, exactly like a device on the other end of a socket.

#![cfg(any(test, feature = "benchmark"))]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::FrameEncoder;
use crate::transport::{Chunk, Connection, Connector, Endpoint};
use crate::types::{DeviceId, EulerAngles, LensState, Rotation, TrackingFrame, Vec3};
use crate::{BridgeError, Result};

enum LinkEvent {
    Data(Bytes),
    Reset,
    Close,
}

/// Test side of one simulated connection.
#[derive(Clone)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkHandle {
    /// Deliver raw bytes to the bridge.
    pub fn send(&self, bytes: impl AsRef<[u8]>) {
        let _ = self.tx.send(LinkEvent::Data(Bytes::copy_from_slice(bytes.as_ref())));
    }

    /// Encode and deliver frames.
    pub fn send_frames<'a>(&self, frames: impl IntoIterator<Item = &'a TrackingFrame>) {
        let encoder = FrameEncoder::new();
        let mut buf = bytes::BytesMut::new();
        for frame in frames {
            encoder.encode_into(frame, &mut buf);
        }
        let _ = self.tx.send(LinkEvent::Data(buf.freeze()));
    }

    /// Fail the link with a connection reset.
    pub fn reset(&self) {
        let _ = self.tx.send(LinkEvent::Reset);
    }

    /// Close the link cleanly.
    pub fn close(&self) {
        let _ = self.tx.send(LinkEvent::Close);
    }
}

/// Receives a [`LinkHandle`] for every connection the connector accepts.
pub struct Links {
    rx: mpsc::UnboundedReceiver<LinkHandle>,
}

impl Links {
    pub async fn next(&mut self) -> Option<LinkHandle> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<LinkHandle> {
        self.rx.try_recv().ok()
    }
}

struct SimulatorState {
    refusals: AtomicU32,
    hang: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
    links: mpsc::UnboundedSender<LinkHandle>,
}

/// In-memory [`Connector`] with scriptable failures.
#[derive(Clone)]
pub struct SimulatedConnector {
    state: Arc<SimulatorState>,
}

impl SimulatedConnector {
    pub fn new() -> (Self, Links) {
        let (links, rx) = mpsc::unbounded_channel();
        let state = SimulatorState {
            refusals: AtomicU32::new(0),
            hang: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            links,
        };
        (Self { state: Arc::new(state) }, Links { rx })
    }

    /// Refuse the next `count` connect attempts.
    pub fn refuse_next(&self, count: u32) {
        self.state.refusals.store(count, Ordering::SeqCst);
    }

    /// Make connect attempts never complete.
    pub fn hang_connects(&self, hang: bool) {
        self.state.hang.store(hang, Ordering::SeqCst);
    }

    /// When each connect attempt started.
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.state.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        if let Ok(mut attempts) = self.state.attempts.lock() {
            attempts.push(Instant::now());
        }

        if self.state.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let refused = self
            .state
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BridgeError::connection_failed(format!(
                "{endpoint} refused the connection"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.state.links.send(LinkHandle { tx });
        Ok(Box::new(SimulatedConnection { rx, peer: endpoint.to_string() }))
    }
}

struct SimulatedConnection {
    rx: mpsc::UnboundedReceiver<LinkEvent>,
    peer: String,
}

#[async_trait]
impl Connection for SimulatedConnection {
    async fn poll(&mut self) -> Result<Chunk> {
        match self.rx.recv().await {
            Some(LinkEvent::Data(bytes)) => Ok(Chunk::Data(bytes)),
            Some(LinkEvent::Reset) => Err(BridgeError::io(
                format!("read from {}", self.peer),
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "simulated reset"),
            )),
            Some(LinkEvent::Close) | None => Ok(Chunk::EndOfStream),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }

    fn peer(&self) -> String {
        format!("simulated {}", self.peer)
    }
}

/// A frame with every channel populated, varied by sequence.
pub fn sample_frame(device: u32, sequence: u64) -> TrackingFrame {
    let t = sequence as f32;
    let mut frame = TrackingFrame::new(DeviceId(device), sequence);
    frame.position = Some(Vec3::new(t * 0.01, 1.5, -t * 0.02));
    frame.rotation = Some(Rotation::Euler(EulerAngles { pan: t % 360.0, tilt: -5.0, roll: 0.0 }));
    frame.track_position = Some(t * 0.1);
    frame.lens = LensState {
        focal_length: Some(35.0),
        focus_distance: Some(3.2),
        aperture: Some(2.8),
    };
    frame.status.camera_on = true;
    frame.status.running = true;
    frame
}

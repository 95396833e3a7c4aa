//! TCP and UDP connections

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info};

use super::{Chunk, Connection, Connector, Endpoint};
use crate::protocol::format::{HEADER_LEN, MAX_PAYLOAD_LEN, TRAILER_LEN};
use crate::{BridgeError, Result};

/// Default size of one socket read.
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Opens real sockets for `tcp://` and `udp://` endpoints.
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    read_buffer_size: usize,
}

impl NetworkConnector {
    pub fn new(read_buffer_size: usize) -> Self {
        Self { read_buffer_size: read_buffer_size.max(64) }
    }
}

impl Default for NetworkConnector {
    fn default() -> Self {
        Self::new(DEFAULT_READ_BUFFER)
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>> {
        match endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await.map_err(|e| {
                    let context = format!("connect to {endpoint}");
                    BridgeError::connection_failed_with_source(context, Box::new(e))
                })?;
                stream.set_nodelay(true).map_err(|e| BridgeError::io("set TCP_NODELAY", e))?;
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| endpoint.to_string());
                info!("Connected to tracking device at {}", peer);

                Ok(Box::new(TcpConnection {
                    stream: Some(stream),
                    buf: BytesMut::with_capacity(self.read_buffer_size),
                    read_size: self.read_buffer_size,
                    peer,
                }))
            }
            Endpoint::Udp { bind, broadcast } => {
                let socket = UdpSocket::bind(bind).await.map_err(|e| {
                    let context = format!("bind {endpoint}");
                    BridgeError::connection_failed_with_source(context, Box::new(e))
                })?;
                if *broadcast {
                    socket.set_broadcast(true).map_err(|e| BridgeError::io("enable broadcast", e))?;
                }
                let local =
                    socket.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| bind.to_string());
                info!("Listening for tracking datagrams on {}", local);

                let largest_frame = HEADER_LEN + MAX_PAYLOAD_LEN + TRAILER_LEN;
                Ok(Box::new(UdpConnection {
                    socket: Some(socket),
                    buf: vec![0; self.read_buffer_size.max(largest_frame)],
                    local,
                }))
            }
        }
    }
}

struct TcpConnection {
    stream: Option<TcpStream>,
    buf: BytesMut,
    read_size: usize,
    peer: String,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn poll(&mut self) -> Result<Chunk> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(BridgeError::connection_failed("connection closed"));
        };

        self.buf.reserve(self.read_size);
        // read_buf is cancel safe: bytes are only appended once the read completes
        let n = stream
            .read_buf(&mut self.buf)
            .await
            .map_err(|e| BridgeError::io(format!("read from {}", self.peer), e))?;
        if n == 0 {
            return Ok(Chunk::EndOfStream);
        }
        Ok(Chunk::Data(self.buf.split().freeze()))
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing connection to {}", self.peer);
            // The peer may already be gone; the descriptor is released either way
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

struct UdpConnection {
    socket: Option<UdpSocket>,
    buf: Vec<u8>,
    local: String,
}

#[async_trait]
impl Connection for UdpConnection {
    async fn poll(&mut self) -> Result<Chunk> {
        let socket =
            self.socket.as_ref().ok_or_else(|| BridgeError::connection_failed("socket closed"))?;
        let (n, from) = socket
            .recv_from(&mut self.buf)
            .await
            .map_err(|e| BridgeError::io(format!("receive on {}", self.local), e))?;
        tracing::trace!("{} byte datagram from {}", n, from);
        Ok(Chunk::Data(Bytes::copy_from_slice(&self.buf[..n])))
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            debug!("Closed datagram socket {}", self.local);
        }
        Ok(())
    }

    fn peer(&self) -> String {
        format!("udp {}", self.local)
    }
}

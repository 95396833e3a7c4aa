//! Transport layer between the tracking device and the decoder.
//!
//! A [`Connector`] opens a [`Connection`] to an [`Endpoint`]; a connection yields
//! raw byte [`Chunk`]s with no regard for frame boundaries. [`TransportClient`]
//! wraps both with the connection state machine:
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected --stale--> Degraded
//!      ^                        |                  |   <--data--       |
//!      +-------- error ---------+------------------+-------------------+
//! Disconnected --too many failed attempts--> Failed --restart--> Disconnected
//! ```
//!
//! [`NetworkConnector`] handles `tcp://` and `udp://` endpoints. Tests and simulators
//! inject their own connector.

mod backoff;
mod client;
mod network;

pub use backoff::{Backoff, BackoffConfig};
pub use client::{Activity, TransportClient, TransportSettings};
pub use network::NetworkConnector;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::{BridgeError, Result};

/// Where the tracking device can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// Stream connection to a device, `tcp://host:port`.
    Tcp { host: String, port: u16 },

    /// Datagram receiver bound locally, `udp://addr:port`. Append `?broadcast` to
    /// accept broadcast datagrams.
    Udp { bind: SocketAddr, broadcast: bool },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp { host: host.into(), port }
    }

    pub fn udp(bind: SocketAddr) -> Self {
        Endpoint::Udp { bind, broadcast: false }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Udp { bind, broadcast: false } => write!(f, "udp://{}", bind),
            Endpoint::Udp { bind, broadcast: true } => write!(f, "udp://{}?broadcast", bind),
        }
    }
}

impl FromStr for Endpoint {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid =
            |reason: &str| BridgeError::invalid_config("endpoint", format!("{reason}: '{s}'"));

        let (scheme, rest) = s.trim().split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let (address, query) = match rest.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (rest, None),
        };

        match scheme.to_ascii_lowercase().as_str() {
            "tcp" => {
                if query.is_some() {
                    return Err(invalid("tcp endpoints take no options"));
                }
                let (host, port) = address.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
                if host.is_empty() {
                    return Err(invalid("missing host"));
                }
                let port = port.parse().map_err(|_| invalid("bad port"))?;
                Ok(Endpoint::Tcp { host: host.trim_matches(['[', ']']).to_string(), port })
            }
            "udp" => {
                let bind = address.parse().map_err(|_| invalid("bad bind address"))?;
                let broadcast = match query {
                    None => false,
                    Some("broadcast") | Some("broadcast=true") => true,
                    Some("broadcast=false") => false,
                    Some(_) => return Err(invalid("unknown udp option")),
                };
                Ok(Endpoint::Udp { bind, broadcast })
            }
            _ => Err(invalid("unsupported scheme")),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// One read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Bytes),
    /// The peer closed the stream.
    EndOfStream,
}

/// An open link to a device.
///
/// `poll` must be cancel safe: dropping the future before it completes may not lose
/// bytes that were already read.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Wait for the next chunk of raw bytes.
    async fn poll(&mut self) -> Result<Chunk>;

    /// Close the link. Calling this more than once is harmless.
    async fn disconnect(&mut self) -> Result<()>;

    /// Human readable peer description for logs.
    fn peer(&self) -> String;
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_endpoints() {
        assert_eq!(
            "tcp://10.0.0.5:6301".parse::<Endpoint>().unwrap(),
            Endpoint::tcp("10.0.0.5", 6301)
        );
        assert_eq!(
            "TCP://crane.local:1".parse::<Endpoint>().unwrap(),
            Endpoint::tcp("crane.local", 1)
        );
        assert_eq!("tcp://[::1]:9000".parse::<Endpoint>().unwrap(), Endpoint::tcp("::1", 9000));
    }

    #[test]
    fn parses_udp_endpoints() {
        let endpoint: Endpoint = "udp://0.0.0.0:15245?broadcast".parse().unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Udp { bind: "0.0.0.0:15245".parse().unwrap(), broadcast: true }
        );
        assert_eq!(endpoint.to_string(), "udp://0.0.0.0:15245?broadcast");

        let endpoint: Endpoint = "udp://127.0.0.1:15245".parse().unwrap();
        assert_eq!(endpoint, Endpoint::udp("127.0.0.1:15245".parse().unwrap()));
    }

    #[test]
    fn rejects_bad_endpoints() {
        let bad_endpoints = [
            "10.0.0.5:6301",
            "http://host:1",
            "tcp://host",
            "tcp://:80",
            "tcp://h:99999",
            "udp://nope:1",
            "udp://0.0.0.0:1?multicast",
        ];
        for bad in bad_endpoints {
            let err = bad.parse::<Endpoint>().unwrap_err();
            assert!(matches!(err, BridgeError::Configuration { .. }), "{bad} gave {err:?}");
        }
    }
}

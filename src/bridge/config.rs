//! Bridge configuration
//!
//! Durations are given in milliseconds. Every field has a default, so a YAML file
//! only needs the fields it changes:
//!
//! ```yaml
//! endpoint: udp://0.0.0.0:15245?broadcast
//! stale_frame_timeout_ms: 500
//! default_frame_rate: "29.97df"
//! reconnect_backoff:
//!   min_ms: 250
//!   max_ms: 10000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::DecoderOptions;
use crate::publisher::PublisherConfig;
use crate::transport::{BackoffConfig, Endpoint, TransportSettings};
use crate::types::FrameRate;
use crate::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// `tcp://host:port` or `udp://addr:port[?broadcast]`
    pub endpoint: Endpoint,
    pub reconnect_backoff: BackoffConfig,
    /// Consecutive failed connects before the transport enters `Failed`
    pub max_reconnect_attempts: u32,
    /// Age after which cached frames are stale and the link counts as degraded
    pub stale_frame_timeout_ms: u64,
    /// Bound on a single connect attempt
    pub io_timeout_ms: u64,
    pub max_subscriber_queue_depth: usize,
    /// Consecutive overflows before a subscriber is evicted, 0 to never evict
    pub subscriber_eviction_threshold: u32,
    pub subject_grace_period_ms: u64,
    pub subject_idle_timeout_ms: u64,
    /// How often subject garbage collection runs
    pub housekeeping_interval_ms: u64,
    /// Rate for frames that carry the "custom" rate preset
    #[serde(with = "frame_rate_text")]
    pub default_frame_rate: FrameRate,
    /// Size of one socket read
    pub read_buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::tcp("127.0.0.1", 15245),
            reconnect_backoff: BackoffConfig::default(),
            max_reconnect_attempts: 10,
            stale_frame_timeout_ms: 250,
            io_timeout_ms: 2_000,
            max_subscriber_queue_depth: 32,
            subscriber_eviction_threshold: 0,
            subject_grace_period_ms: 5_000,
            subject_idle_timeout_ms: 30_000,
            housekeeping_interval_ms: 1_000,
            default_frame_rate: FrameRate::default(),
            read_buffer_size: 4096,
        }
    }
}

impl BridgeConfig {
    /// Defaults with the given endpoint.
    pub fn for_endpoint(endpoint: Endpoint) -> Self {
        Self { endpoint, ..Default::default() }
    }

    /// Parse and validate YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: BridgeConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| {
                BridgeError::invalid_config("yaml", format!("YAML parsing failed: {}", e))
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::io(format!("reading {}", path.display()), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check every field, reporting the first invalid one.
    pub fn validate(&self) -> Result<()> {
        let backoff = &self.reconnect_backoff;
        if backoff.min_ms == 0 {
            return Err(BridgeError::invalid_config(
                "reconnect_backoff.min_ms",
                "must be greater than zero",
            ));
        }
        if backoff.max_ms < backoff.min_ms {
            return Err(BridgeError::invalid_config(
                "reconnect_backoff.max_ms",
                format!("{} is below min_ms {}", backoff.max_ms, backoff.min_ms),
            ));
        }
        if !(0.0..=1.0).contains(&backoff.jitter) {
            return Err(BridgeError::invalid_config(
                "reconnect_backoff.jitter",
                "must be between 0.0 and 1.0",
            ));
        }

        let positive = [
            ("max_reconnect_attempts", u64::from(self.max_reconnect_attempts)),
            ("stale_frame_timeout_ms", self.stale_frame_timeout_ms),
            ("io_timeout_ms", self.io_timeout_ms),
            ("max_subscriber_queue_depth", self.max_subscriber_queue_depth as u64),
            ("housekeeping_interval_ms", self.housekeeping_interval_ms),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(BridgeError::invalid_config(*field, "must be greater than zero"));
        }

        if self.read_buffer_size < 64 {
            return Err(BridgeError::invalid_config(
                "read_buffer_size",
                "must be at least 64 bytes",
            ));
        }
        self.default_frame_rate
            .validate()
            .map_err(|reason| BridgeError::invalid_config("default_frame_rate", reason))?;

        Ok(())
    }

    pub fn stale_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_frame_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            io_timeout: self.io_timeout(),
            stale_timeout: self.stale_frame_timeout(),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            queue_depth: self.max_subscriber_queue_depth,
            eviction_threshold: (self.subscriber_eviction_threshold > 0)
                .then_some(self.subscriber_eviction_threshold),
            grace_period: Duration::from_millis(self.subject_grace_period_ms),
            idle_timeout: Duration::from_millis(self.subject_idle_timeout_ms),
        }
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions { default_frame_rate: self.default_frame_rate }
    }
}

/// Frame rates as text, `"25"`, `"29.97df"`, `"30000/1001"`.
mod frame_rate_text {
    use serde::{Deserialize, Deserializer, Serializer, de};

    use crate::types::FrameRate;

    pub fn serialize<S: Serializer>(rate: &FrameRate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(rate)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FrameRate, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.stale_frame_timeout(), Duration::from_millis(250));
        assert_eq!(config.publisher_config().eviction_threshold, None);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
endpoint: udp://0.0.0.0:15245?broadcast
stale_frame_timeout_ms: 500
default_frame_rate: "29.97df"
subscriber_eviction_threshold: 8
reconnect_backoff:
  min_ms: 250
  max_ms: 10000
"#;
        let config = BridgeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.endpoint,
            Endpoint::Udp { bind: "0.0.0.0:15245".parse().unwrap(), broadcast: true }
        );
        assert_eq!(config.stale_frame_timeout_ms, 500);
        assert_eq!(config.default_frame_rate, FrameRate::FPS_29_97_DROP);
        assert_eq!(config.reconnect_backoff.min_ms, 250);
        assert_eq!(config.reconnect_backoff.jitter, BackoffConfig::default().jitter);
        assert_eq!(config.io_timeout_ms, 2_000);
        assert_eq!(config.publisher_config().eviction_threshold, Some(8));
    }

    #[test]
    fn yaml_round_trips() {
        let config = BridgeConfig::default();
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        assert!(yaml.contains("endpoint: tcp://127.0.0.1:15245"));
        assert_eq!(BridgeConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn frame_rate_bounds() {
        let config = BridgeConfig::from_yaml_str("default_frame_rate: \"255\"").unwrap();
        assert_eq!(config.default_frame_rate.nominal(), 255);
        let config = BridgeConfig::from_yaml_str("default_frame_rate: \"1\"").unwrap();
        assert_eq!(config.default_frame_rate.nominal(), 1);
        assert!(BridgeConfig::from_yaml_str("default_frame_rate: \"0\"").is_err());

        let config = BridgeConfig {
            default_frame_rate: FrameRate { numerator: 300, denominator: 1, drop_frame: false },
            ..BridgeConfig::default()
        };
        match config.validate() {
            Err(BridgeError::Configuration { field, .. }) => {
                assert_eq!(field, "default_frame_rate")
            }
            other => panic!("300 fps gave {other:?}"),
        }
    }

    #[test]
    fn invalid_fields_are_named() {
        let cases = [
            ("endpoint: ftp://x:1", "yaml"),
            ("stale_frame_timeout_ms: 0", "stale_frame_timeout_ms"),
            ("max_subscriber_queue_depth: 0", "max_subscriber_queue_depth"),
            ("reconnect_backoff: { min_ms: 500, max_ms: 100 }", "reconnect_backoff.max_ms"),
            ("reconnect_backoff: { jitter: 2.5 }", "reconnect_backoff.jitter"),
            ("read_buffer_size: 8", "read_buffer_size"),
            ("default_frame_rate: \"25df\"", "yaml"),
            ("default_frame_rate: \"4294967295/1001\"", "yaml"),
            ("default_frame_rate: \"256\"", "yaml"),
            ("unknown_field: 1", "yaml"),
        ];
        for (yaml, expected) in cases {
            match BridgeConfig::from_yaml_str(yaml) {
                Err(BridgeError::Configuration { field, .. }) => {
                    assert_eq!(field, expected, "for {yaml}")
                }
                other => panic!("{yaml} gave {other:?}"),
            }
        }
    }
}

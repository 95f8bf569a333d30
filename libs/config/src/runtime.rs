//! Runtime Configuration Module
//!
//! Loads node configuration from an optional TOML file with `ACTORS_`
//! environment overrides. Nested keys use `__`, so `logging.level` becomes
//! `ACTORS_LOGGING__LEVEL`. Every field has a default; an empty
//! configuration is valid.

use anyhow::{Context, Result};
use client::{ClientOptions, ReconnectPolicy};
use config_crate::{Config, Environment, File};
use network::{Endpoint, TransportPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use streams::StreamSettings;
use tracing::{debug, info};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ACTORS";

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub node: NodeConfig,
    pub transport: TransportConfig,
    pub streams: StreamsConfig,
    pub client: ClientConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

/// Node identity and listeners
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub name: String,
    /// Endpoints to accept connections on, e.g. `tcp://0.0.0.0:7420`
    pub listen: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "actor-node".to_string(),
            listen: vec!["tcp://127.0.0.1:7420".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    /// 0 disables the idle timeout
    pub idle_timeout_secs: u64,
    pub write_timeout_ms: u64,
    pub max_frame_size: usize,
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let policy = TransportPolicy::default();
        Self {
            connect_timeout_ms: policy.connect_timeout.as_millis() as u64,
            idle_timeout_secs: policy.idle_timeout.map(|d| d.as_secs()).unwrap_or(0),
            write_timeout_ms: policy.write_timeout.as_millis() as u64,
            max_frame_size: policy.max_frame_size,
            channel_capacity: policy.channel_capacity,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StreamsConfig {
    pub buffer_capacity: usize,
    pub buffer_ttl_secs: u64,
    pub outlet_capacity: usize,
    pub delta_enabled: bool,
    pub reap_interval_secs: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        let settings = StreamSettings::default();
        Self {
            buffer_capacity: settings.buffer_capacity,
            buffer_ttl_secs: settings.buffer_ttl.as_secs(),
            outlet_capacity: settings.outlet_capacity,
            delta_enabled: settings.delta_enabled,
            reap_interval_secs: settings.reap_interval.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub call_timeout_ms: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_multiplier: f64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let options = ClientOptions::default();
        Self {
            call_timeout_ms: options.call_timeout.as_millis() as u64,
            reconnect_initial_delay_ms: options.reconnect.initial_delay.as_millis() as u64,
            reconnect_multiplier: options.reconnect.multiplier,
            reconnect_max_delay_ms: options.reconnect.max_delay.as_millis() as u64,
            reconnect_max_attempts: options.reconnect.max_attempts,
            stream_buffer: options.stream_buffer,
        }
    }
}

/// Pre-dispatch hook settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Largest accepted argument payload in bytes
    pub max_payload_bytes: usize,
    /// Bearer token → principal name. Empty disables authentication.
    pub tokens: BTreeMap<String, String>,
    /// Principal → actor ids it may call (`*` for any). Empty disables
    /// authorization.
    pub allow: BTreeMap<String, Vec<String>>,
    /// Calls per second per principal. 0 disables rate limiting.
    pub rate_limit_per_sec: u32,
    pub rate_limit_burst: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            tokens: BTreeMap::new(),
            allow: BTreeMap::new(),
            rate_limit_per_sec: 0,
            rate_limit_burst: 0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (ACTORS_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("node.listen")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let config: RuntimeConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        debug!(?config, "Runtime configuration loaded");
        Ok(config)
    }

    /// Reject values that would fail later at bind or connect time
    pub fn validate(&self) -> Result<()> {
        for listen in &self.node.listen {
            Endpoint::parse(listen).with_context(|| format!("Invalid listen endpoint '{}'", listen))?;
        }
        anyhow::ensure!(self.transport.max_frame_size > 0, "transport.max_frame_size must be positive");
        anyhow::ensure!(self.streams.buffer_capacity > 0, "streams.buffer_capacity must be positive");
        anyhow::ensure!(self.streams.outlet_capacity > 0, "streams.outlet_capacity must be positive");
        anyhow::ensure!(self.streams.reap_interval_secs > 0, "streams.reap_interval_secs must be positive");
        anyhow::ensure!(self.client.stream_buffer > 0, "client.stream_buffer must be positive");
        anyhow::ensure!(
            self.client.reconnect_multiplier >= 1.0,
            "client.reconnect_multiplier must be at least 1.0"
        );
        Ok(())
    }

    pub fn listen_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.node
            .listen
            .iter()
            .map(|s| Endpoint::parse(s).with_context(|| format!("Invalid listen endpoint '{}'", s)))
            .collect()
    }

    pub fn transport_policy(&self) -> TransportPolicy {
        let t = &self.transport;
        TransportPolicy {
            connect_timeout: Duration::from_millis(t.connect_timeout_ms),
            idle_timeout: (t.idle_timeout_secs > 0).then(|| Duration::from_secs(t.idle_timeout_secs)),
            write_timeout: Duration::from_millis(t.write_timeout_ms),
            max_frame_size: t.max_frame_size,
            channel_capacity: t.channel_capacity,
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        let s = &self.streams;
        StreamSettings {
            buffer_capacity: s.buffer_capacity,
            buffer_ttl: Duration::from_secs(s.buffer_ttl_secs),
            outlet_capacity: s.outlet_capacity,
            delta_enabled: s.delta_enabled,
            reap_interval: Duration::from_secs(s.reap_interval_secs),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let c = &self.client;
        ReconnectPolicy {
            initial_delay: Duration::from_millis(c.reconnect_initial_delay_ms),
            multiplier: c.reconnect_multiplier,
            max_delay: Duration::from_millis(c.reconnect_max_delay_ms),
            max_attempts: c.reconnect_max_attempts,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            call_timeout: Duration::from_millis(self.client.call_timeout_ms),
            reconnect: self.reconnect_policy(),
            transport: self.transport_policy(),
            stream_buffer: self.client.stream_buffer,
        }
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_sources() {
        let config = RuntimeConfig::load(None).unwrap();
        assert_eq!(config.streams.buffer_capacity, 100);
        assert_eq!(config.streams.buffer_ttl_secs, 300);
        assert_eq!(config.transport_policy(), TransportPolicy::default());
    }

    #[test]
    fn test_load_file_with_partial_sections() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("node.toml");

        let config_content = r#"
[node]
name = "edge-1"
listen = ["tcp://127.0.0.1:9000", "ws://127.0.0.1:9001/actors"]

[transport]
idle_timeout_secs = 0

[streams]
buffer_capacity = 10
delta_enabled = false

[security]
max_payload_bytes = 512
rate_limit_per_sec = 20

[security.tokens]
secret-token = "alice"

[security.allow]
alice = ["counter"]
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = RuntimeConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.node.name, "edge-1");
        assert_eq!(config.listen_endpoints().unwrap().len(), 2);
        assert_eq!(config.transport_policy().idle_timeout, None);
        assert_eq!(config.stream_settings().buffer_capacity, 10);
        assert!(!config.stream_settings().delta_enabled);
        // Untouched sections keep defaults
        assert_eq!(config.streams.buffer_ttl_secs, 300);
        assert_eq!(config.security.tokens.get("secret-token").unwrap(), "alice");
        assert_eq!(config.security.allow["alice"], vec!["counter".to_string()]);
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        // No other test asserts on logging.json
        std::env::set_var("ACTORS_LOGGING__JSON", "true");
        let config = RuntimeConfig::load(None).unwrap();
        std::env::remove_var("ACTORS_LOGGING__JSON");
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_listen_endpoint_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("bad.toml");
        fs::write(&config_path, "[node]\nlisten = [\"udp://127.0.0.1:1\"]\n").unwrap();
        assert!(RuntimeConfig::load(Some(&config_path)).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        assert!(RuntimeConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_to_toml_roundtrips_through_loader() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("effective.toml");
        let mut config = RuntimeConfig::default();
        config.logging.level = "debug".to_string();
        fs::write(&config_path, config.to_toml().unwrap()).unwrap();

        let loaded = RuntimeConfig::load(Some(&config_path)).unwrap();
        assert_eq!(loaded.logging.level, "debug");
        assert_eq!(loaded.streams, config.streams);
    }
}

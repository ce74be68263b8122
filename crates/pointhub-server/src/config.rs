//! Server configuration.
//!
//! Configuration can be loaded from:
//! - The file named by `POINTHUB_CONFIG`
//! - `pointhub.toml`, `/etc/pointhub/pointhub.toml` or
//!   `~/.config/pointhub/pointhub.toml`, first found wins
//! - Environment variables (`POINTHUB_HOST`, `POINTHUB_PORT`), which
//!   override the file

use anyhow::{Context, Result};
use pointhub_core::{HubConfig, PointDefinition, RegistryConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "POINTHUB_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Point store tuning.
    #[serde(default)]
    pub store: StoreSection,

    /// Control command settings.
    #[serde(default)]
    pub control: ControlConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// In-process drivers to register at startup.
    #[serde(default)]
    pub drivers: Vec<DriverConfig>,

    /// Points to pre-register at startup.
    #[serde(default)]
    pub points: Vec<PointDefinition>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of WebSocket connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum prefixes per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,

    /// Updates buffered per connection before the oldest are dropped.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_queue_capacity: usize,

    /// Maximum inbound WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum IDs in one batch query.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

/// Point store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    /// Number of map shards (0 = automatic).
    #[serde(default)]
    pub shard_amount: usize,

    /// Points to reserve room for.
    #[serde(default)]
    pub initial_capacity: usize,
}

/// Control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Driver acknowledgement timeout in milliseconds.
    #[serde(default = "default_control_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// An in-process loopback driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Driver name; points refer to it as their owner.
    pub name: String,

    /// Artificial delay applied to every control write, in milliseconds.
    #[serde(default)]
    pub write_delay_ms: u64,

    /// Refuse every control write.
    #[serde(default)]
    pub reject_writes: bool,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_subscriptions() -> usize {
    1_000
}

fn default_outbound_capacity() -> usize {
    pointhub_core::connection::DEFAULT_OUTBOUND_CAPACITY
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_batch_size() -> usize {
    10_000
}

fn default_control_timeout() -> u64 {
    5_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            store: StoreSection::default(),
            control: ControlConfig::default(),
            metrics: MetricsConfig::default(),
            drivers: Vec::new(),
            points: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            outbound_queue_capacity: default_outbound_capacity(),
            max_message_size: default_max_message_size(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_control_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override is malformed.
    pub fn load() -> Result<Self> {
        let config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(shellexpand::tilde(&path).as_ref())?,
            Err(_) => Self::from_default_paths()?,
        };

        config.with_overrides(
            std::env::var("POINTHUB_HOST").ok(),
            std::env::var("POINTHUB_PORT").ok(),
        )
    }

    fn from_default_paths() -> Result<Self> {
        let config_paths = [
            "pointhub.toml",
            "/etc/pointhub/pointhub.toml",
            "~/.config/pointhub/pointhub.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Replace host and port with the given values when present.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not a valid number.
    pub fn with_overrides(mut self, host: Option<String>, port: Option<String>) -> Result<Self> {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid POINTHUB_PORT: {port}"))?;
        }
        Ok(self)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Core hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            store: StoreConfig {
                shard_amount: self.store.shard_amount,
                initial_capacity: self.store.initial_capacity,
            },
            registry: RegistryConfig {
                max_connections: self.limits.max_connections,
                max_subscriptions_per_connection: self.limits.max_subscriptions_per_connection,
                outbound_capacity: self.limits.outbound_queue_capacity,
            },
            control_timeout: Duration::from_millis(self.control.timeout_ms),
        }
    }
}

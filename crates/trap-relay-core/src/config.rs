//! Configuration types for the trap relay daemon.
//!
//! Configuration is loaded from YAML files and validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Root configuration for the relay daemon.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Subscriber-facing TCP listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// SNMP trap ingestion configuration.
    #[serde(default)]
    pub snmp: SnmpConfig,

    /// Per-session protocol timing and queue configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// TLS material for the subscriber listener. Required when
    /// `listen.security` is `tls`.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Subscriber listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address to bind to, e.g. "localhost:1162".
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// Transport security for subscriber connections.
    ///
    /// `tls` (the default) requires mutual authentication and pins the
    /// protocol to TLS 1.2. `plaintext` exists for the test harness and
    /// loopback debugging only.
    #[serde(default)]
    pub security: ListenSecurity,
}

/// Transport security mode for the subscriber listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenSecurity {
    /// Mutually authenticated TLS 1.2.
    #[default]
    Tls,
    /// Unencrypted TCP. Test harness and loopback debugging only.
    Plaintext,
}

/// SNMP trap ingestion configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnmpConfig {
    /// UDP address to receive traps on, e.g. "0.0.0.0:162".
    #[serde(default = "default_snmp_bind_address")]
    pub bind_address: String,

    /// Maximum accepted datagram size in bytes.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

/// Per-session protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Bound of the private per-session outbound queue. When full, the
    /// newest message is dropped for that session only.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long to wait for an ACK after writing a message before the
    /// client is declared dead.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// How long a connected client may stay silent before REGISTER.
    /// 0 disables the timeout.
    #[serde(default = "default_register_timeout_ms")]
    pub register_timeout_ms: u64,

    /// Maximum accepted command line length in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// TLS material for the subscriber listener.
///
/// Paths support environment variable expansion (`${VAR}`), which keeps
/// secret locations out of checked-in config files.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the server certificate chain (PEM).
    pub cert_path: String,

    /// Path to the server private key (PEM).
    pub key_path: String,

    /// Path to the CA certificate used to verify client certificates (PEM).
    /// Client authentication is always required.
    pub ca_cert_path: String,
}

impl TlsConfig {
    /// Server certificate path with environment variables expanded.
    #[must_use]
    pub fn cert_path(&self) -> PathBuf {
        PathBuf::from(expand_env_vars(&self.cert_path))
    }

    /// Server key path with environment variables expanded.
    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        PathBuf::from(expand_env_vars(&self.key_path))
    }

    /// Client CA path with environment variables expanded.
    #[must_use]
    pub fn ca_cert_path(&self) -> PathBuf {
        PathBuf::from(expand_env_vars(&self.ca_cert_path))
    }
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable.
/// Unset variables expand to an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

// Default value functions

fn default_listen_address() -> String {
    "localhost:1162".to_string()
}

fn default_snmp_bind_address() -> String {
    "0.0.0.0:162".to_string()
}

fn default_max_packet_size() -> usize {
    65_535
}

fn default_queue_capacity() -> usize {
    128
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_register_timeout_ms() -> u64 {
    30_000
}

fn default_max_line_length() -> usize {
    1_024
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_address() -> String {
    "0.0.0.0:9162".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            snmp: SnmpConfig::default(),
            session: SessionConfig::default(),
            tls: None,
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            security: ListenSecurity::default(),
        }
    }
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_snmp_bind_address(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ack_timeout_ms: default_ack_timeout_ms(),
            register_timeout_ms: default_register_timeout_ms(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Configuration loading and validation

impl RelayConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_address(&self.listen.address)?;
        validate_address(&self.snmp.bind_address)?;
        self.session.validate()?;

        if self.listen.security == ListenSecurity::Tls && self.tls.is_none() {
            return Err(ConfigError::MissingTlsSection);
        }

        Ok(())
    }
}

impl SessionConfig {
    /// Validate the session configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue bound, ack window, or line limit is
    /// out of range.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(self.queue_capacity));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::InvalidAckTimeout(self.ack_timeout_ms));
        }
        if self.max_line_length < 16 {
            return Err(ConfigError::InvalidMaxLineLength(self.max_line_length));
        }
        Ok(())
    }
}

fn validate_address(addr: &str) -> ConfigResult<()> {
    let parts: Vec<&str> = addr.rsplitn(2, ':').collect();
    if parts.len() != 2 || parts[1].is_empty() {
        return Err(ConfigError::InvalidAddress(addr.to_string()));
    }
    parts[0]
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidAddress(addr.to_string()))?;
    Ok(())
}

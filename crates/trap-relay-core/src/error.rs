//! Domain error types for the trap relay daemon.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// Per-session queue must hold at least one message.
    #[error("session.queue_capacity must be at least 1, got {0}")]
    InvalidQueueCapacity(usize),

    /// Ack window of zero would declare every client dead immediately.
    #[error("session.ack_timeout_ms must be at least 1, got {0}")]
    InvalidAckTimeout(u64),

    /// Command lines need room for at least `REGISTER <arg>`.
    #[error("session.max_line_length must be at least 16, got {0}")]
    InvalidMaxLineLength(usize),

    /// TLS listeners cannot start without certificate material.
    #[error("tls section is required when listen.security is 'tls'")]
    MissingTlsSection,
}

/// Errors related to TLS setup and handshakes.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to read a certificate file.
    #[error("failed to load certificates from '{path}': {message}")]
    CertificateLoad { path: String, message: String },

    /// A PEM file contained no certificates.
    #[error("no certificates found in '{0}'")]
    NoCertificates(String),

    /// Failed to read a private key file.
    #[error("failed to load private key from '{path}': {message}")]
    PrivateKeyLoad { path: String, message: String },

    /// A PEM file contained no private key.
    #[error("no private key found in '{0}'")]
    NoPrivateKey(String),

    /// The pinned protocol version is not supported by the TLS stack.
    #[error("required TLS protocol version unavailable: {0}")]
    ProtocolVersion(String),

    /// TLS handshake with a client failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// Invalid TLS configuration.
    #[error("invalid TLS configuration: {0}")]
    Config(String),
}

/// Errors that occur during relay operation.
#[derive(Error, Debug)]
pub enum RelayError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Client violated the line protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Client did not acknowledge the in-flight message in time.
    #[error("client did not acknowledge within {timeout_ms} ms")]
    AckTimeout { timeout_ms: u64 },

    /// Client connected but never sent REGISTER.
    #[error("client did not register within {timeout_ms} ms")]
    RegisterTimeout { timeout_ms: u64 },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// TLS error.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// Shutdown signal received.
    #[error("relay shutting down")]
    Shutdown,
}

impl From<LinesCodecError> for RelayError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => RelayError::Connection(e),
            LinesCodecError::MaxLineLengthExceeded => {
                RelayError::Protocol("line exceeds maximum length".to_string())
            }
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

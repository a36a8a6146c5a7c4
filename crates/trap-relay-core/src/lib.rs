//! SNMP Trap Relay Core Library
//!
//! This library implements a relay daemon that receives SNMP traps on the
//! privileged trap port and fans them out, as single-line JSON messages, to
//! any number of unprivileged TCP subscriber clients over mutually
//! authenticated TLS.
//!
//! # Architecture
//!
//! - [`event`] - Immutable trap event and converted message value types
//! - [`convert`] - Canonical JSON conversion of trap events
//! - [`ingest`] - SNMP ingestion boundary (UDP listener + decoder seam)
//! - [`relay`] - Client registry, per-session protocol state machine, fan-out
//! - [`network`] - TCP/TLS listener accepting subscriber connections
//! - [`tls`] - Mutually authenticated TLS acceptor pinned to TLS 1.2
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`metrics`] - Prometheus metrics collection
//!
//! Each accepted subscriber runs as an independent task with a private
//! bounded message queue. The broadcaster never blocks on a slow client:
//! a full queue drops the newest message for that client only.

#![forbid(unsafe_code)]

pub mod config;
pub mod convert;
pub mod error;
pub mod event;
pub mod ingest;
pub mod metrics;
pub mod network;
pub mod relay;
pub mod tls;

/// Test utilities for integration testing.
///
/// Spins up a complete in-process relay with a plaintext listener and a
/// direct trap injection channel. Not part of the stable API.
pub mod testing;

// Re-export commonly used types
pub use config::RelayConfig;
pub use convert::{convert, convert_at};
pub use error::{ConfigError, RelayError, Result, TlsError};
pub use event::{ConvertedMessage, TrapEvent, VarBind};
pub use ingest::{
    BerTrapDecoder, DecodeError, SnmpTrapListener, TrapDecoder, TrapEventSender, TrapIngestionPort,
};
pub use metrics::RelayMetrics;
pub use network::RelayServer;
pub use relay::{ClientRegistry, ClientSession};
pub use tls::TlsServerAcceptor;

//! Subscriber-facing network layer.
//!
//! [`RelayServer`] binds the TCP listener (and builds the TLS acceptor)
//! up front, so configuration problems are fatal before the daemon
//! reports ready. The accept loop itself survives transient errors.

pub mod client_stream;
pub mod listener;

pub use client_stream::ClientStream;
pub use listener::RelayServer;

//! TLS support for the subscriber listener.
//!
//! The relay acts as a TLS server for its subscribers. Client
//! authentication is mandatory and the protocol is pinned to TLS 1.2.

pub mod server;

pub use server::TlsServerAcceptor;

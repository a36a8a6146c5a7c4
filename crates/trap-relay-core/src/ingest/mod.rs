//! SNMP ingestion boundary.
//!
//! The relay core never parses SNMP itself. [`SnmpTrapListener`] owns the
//! UDP socket and hands each datagram to a [`TrapDecoder`], and decoded
//! events flow through the [`TrapIngestionPort`] channel into the relay
//! pipeline. The decoder is a trait so tests and embedders can substitute
//! their own; [`BerTrapDecoder`] is the built-in implementation.
//!
//! A datagram that fails to decode is logged and dropped. Ingestion never
//! stalls on downstream state.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SnmpConfig;
use crate::error::Result;
use crate::event::TrapEvent;

pub mod decoder;

pub use decoder::BerTrapDecoder;

/// Why a datagram could not be decoded into a trap event.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The packet ended before the structure it announced.
    #[error("truncated packet")]
    Truncated,

    /// A field did not have the expected BER shape.
    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    /// The SNMP version is not one the decoder handles.
    #[error("unsupported SNMP version {0}")]
    UnsupportedVersion(i64),

    /// SNMPv3 message with an encrypted scoped PDU. Decryption is out of
    /// scope; the packet is rejected.
    #[error("encrypted SNMPv3 scoped PDU")]
    EncryptedScopedPdu,
}

/// Decodes a raw SNMP datagram into a trap event.
///
/// The seam between wire-format knowledge and the relay core. Decoders
/// must be cheap to call from the receive loop and must not block.
pub trait TrapDecoder: Send + Sync {
    /// Decode one datagram received from `peer`.
    fn decode(&self, packet: &[u8], peer: SocketAddr) -> std::result::Result<TrapEvent, DecodeError>;
}

/// Sending side of the ingestion channel.
///
/// Held by whatever produces trap events, normally the UDP listener. The
/// test harness holds one to inject events directly.
#[derive(Clone)]
pub struct TrapEventSender {
    tx: mpsc::Sender<TrapEvent>,
}

impl TrapEventSender {
    /// Hand an event to the relay pipeline.
    ///
    /// Returns `false` if the pipeline has shut down.
    pub async fn send(&self, event: TrapEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Receiving side of the ingestion channel, consumed by the relay pipeline.
pub struct TrapIngestionPort {
    rx: mpsc::Receiver<TrapEvent>,
}

impl TrapIngestionPort {
    /// Create a connected sender/port pair.
    #[must_use]
    pub fn channel() -> (TrapEventSender, Self) {
        // Small bound: the pipeline drains immediately and broadcasting
        // never blocks, so depth here only smooths receive bursts.
        let (tx, rx) = mpsc::channel(64);
        (TrapEventSender { tx }, Self { rx })
    }

    /// Receive the next trap event. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<TrapEvent> {
        self.rx.recv().await
    }
}

/// UDP listener receiving SNMP trap datagrams.
pub struct SnmpTrapListener {
    config: SnmpConfig,
    decoder: Arc<dyn TrapDecoder>,
    events: TrapEventSender,
}

impl SnmpTrapListener {
    #[must_use]
    pub fn new(config: SnmpConfig, decoder: Arc<dyn TrapDecoder>, events: TrapEventSender) -> Self {
        Self {
            config,
            decoder,
            events,
        }
    }

    /// Bind the trap socket and receive until the pipeline shuts down.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound (typically a
    /// privilege problem on port 162) or a receive fails fatally.
    pub async fn run(self) -> Result<()> {
        let socket = UdpSocket::bind(&self.config.bind_address).await?;
        info!(address = %self.config.bind_address, "SNMP trap listener started");

        let mut buf = vec![0u8; self.config.max_packet_size];
        loop {
            let (len, peer) = socket.recv_from(&mut buf).await?;
            match self.decoder.decode(&buf[..len], peer) {
                Ok(event) => {
                    if !self.events.send(event).await {
                        debug!("relay pipeline gone, trap listener stopping");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, len, error = %e, "discarding undecodable datagram");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::VarBind;

    struct FixedDecoder;

    impl TrapDecoder for FixedDecoder {
        fn decode(
            &self,
            _packet: &[u8],
            peer: SocketAddr,
        ) -> std::result::Result<TrapEvent, DecodeError> {
            Ok(TrapEvent::new(
                format!("{}/{}", peer.ip(), peer.port()),
                1,
                2,
                b"public".to_vec(),
                vec![VarBind::new("1.3.6.1.9.1", "1")],
            ))
        }
    }

    #[tokio::test]
    async fn test_port_delivers_in_order() {
        let (sender, mut port) = TrapIngestionPort::channel();
        for i in 0..3 {
            let event = TrapEvent::new(format!("10.0.0.{i}/0"), 1, 2, Vec::new(), vec![]);
            assert!(sender.send(event).await);
        }

        for i in 0..3 {
            let event = port.recv().await.unwrap();
            assert_eq!(event.peer_address, format!("10.0.0.{i}/0"));
        }
    }

    #[tokio::test]
    async fn test_port_closes_when_sender_dropped() {
        let (sender, mut port) = TrapIngestionPort::channel();
        drop(sender);
        assert!(port.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_listener_decodes_and_forwards_datagrams() {
        let (sender, mut port) = TrapIngestionPort::channel();
        let config = SnmpConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_packet_size: 4096,
        };

        // Bind manually to learn the ephemeral port, then run the same
        // loop the listener runs.
        let socket = UdpSocket::bind(&config.bind_address).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let decoder: Arc<dyn TrapDecoder> = Arc::new(FixedDecoder);
        tokio::spawn(async move {
            let mut buf = vec![0u8; config.max_packet_size];
            loop {
                let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
                match decoder.decode(&buf[..len], peer) {
                    Ok(event) => {
                        if !sender.send(event).await {
                            return;
                        }
                    }
                    Err(_) => continue,
                }
            }
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"anything", addr).await.unwrap();

        let event = port.recv().await.unwrap();
        assert!(event.peer_address.starts_with("127.0.0.1/"));
        assert_eq!(event.security_model, 2);
    }
}

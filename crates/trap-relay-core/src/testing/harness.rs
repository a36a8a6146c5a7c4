//! Test harness for integration testing of the trap relay.
//!
//! Spins up a complete in-process relay:
//! - plaintext subscriber listener on an ephemeral loopback port
//! - the full broadcast pipeline, fed through a direct injection channel
//!   instead of the UDP socket
//! - helpers for driving subscriber clients through the line protocol

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::{ListenSecurity, RelayConfig, SessionConfig};
use crate::event::{TrapEvent, VarBind};
use crate::ingest::{TrapEventSender, TrapIngestionPort};
use crate::metrics::RelayMetrics;
use crate::network::RelayServer;
use crate::relay::{pump_traps, ClientRegistry};

/// How long harness helpers wait before declaring a test stuck.
const HARNESS_TIMEOUT: Duration = Duration::from_secs(5);

/// A trap event with the shape most tests need.
#[must_use]
pub fn sample_trap_event() -> TrapEvent {
    TrapEvent::new(
        "10.0.0.5/0",
        1,
        2,
        b"public".to_vec(),
        vec![VarBind::new("1.3.6.1.4.1.8072.2.3.2.1", "123456")],
    )
}

/// In-process relay with direct trap injection.
pub struct RelayTestHarness {
    address: SocketAddr,
    registry: Arc<ClientRegistry>,
    metrics: Arc<RelayMetrics>,
    events: TrapEventSender,
    shutdown: broadcast::Sender<()>,
}

impl RelayTestHarness {
    /// Start a relay with default session settings.
    pub async fn new() -> Self {
        Self::with_session_config(SessionConfig::default()).await
    }

    /// Start a relay with custom session settings, typically short
    /// timeouts or a small queue.
    pub async fn with_session_config(session: SessionConfig) -> Self {
        let mut config = RelayConfig::default();
        config.listen.address = "127.0.0.1:0".to_string();
        config.listen.security = ListenSecurity::Plaintext;
        config.session = session;

        let registry = Arc::new(ClientRegistry::new());
        let metrics = Arc::new(RelayMetrics::new());

        let server = RelayServer::bind(config, Arc::clone(&registry), Arc::clone(&metrics))
            .await
            .expect("failed to bind test relay");
        let address = server.local_addr().expect("listener has no local address");
        let shutdown = server.shutdown_handle();

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let (events, port) = TrapIngestionPort::channel();
        tokio::spawn(pump_traps(
            port,
            Arc::clone(&registry),
            Arc::clone(&metrics),
        ));

        Self {
            address,
            registry,
            metrics,
            events,
            shutdown,
        }
    }

    /// Address of the subscriber listener.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The live session registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// The relay metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Inject a trap event as if the UDP listener had decoded it.
    pub async fn inject(&self, event: TrapEvent) {
        assert!(
            self.events.send(event).await,
            "relay pipeline is no longer running"
        );
    }

    /// Connect a raw subscriber without registering it.
    pub async fn connect_raw(&self) -> TestClient {
        let stream = timeout(HARNESS_TIMEOUT, TcpStream::connect(self.address))
            .await
            .expect("timed out connecting to relay")
            .expect("failed to connect to relay");
        TestClient {
            stream: BufReader::new(stream),
        }
    }

    /// Connect a subscriber and complete the REGISTER handshake.
    pub async fn connect(&self) -> TestClient {
        let mut client = self.connect_raw().await;
        client.register().await;

        // The session enters the registry from its own task; wait until
        // it shows up so injected traps cannot race past registration.
        timeout(HARNESS_TIMEOUT, async {
            while self.registry.is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session never registered");

        client
    }

    /// Wait until exactly `count` sessions are registered.
    pub async fn wait_for_sessions(&self, count: usize) {
        timeout(HARNESS_TIMEOUT, async {
            while self.registry.len().await != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {count} registered sessions"));
    }

    /// Signal the listener and every session to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// A scripted subscriber client for protocol tests.
pub struct TestClient {
    stream: BufReader<TcpStream>,
}

impl TestClient {
    /// Send one protocol line.
    pub async fn send_line(&mut self, line: &str) {
        self.stream
            .get_mut()
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("failed to write to relay");
    }

    /// Read one protocol line, without the trailing newline.
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(HARNESS_TIMEOUT, self.stream.read_line(&mut line))
            .await
            .expect("timed out reading from relay")
            .expect("failed to read from relay");
        assert!(n > 0, "relay closed the connection");
        line.trim_end().to_string()
    }

    /// Read until the connection is closed by the relay.
    pub async fn read_until_closed(&mut self) {
        let mut line = String::new();
        loop {
            line.clear();
            let n = timeout(HARNESS_TIMEOUT, self.stream.read_line(&mut line))
                .await
                .expect("timed out waiting for relay to close")
                .expect("failed to read from relay");
            if n == 0 {
                return;
            }
        }
    }

    /// Complete the REGISTER handshake.
    pub async fn register(&mut self) {
        self.send_line("REGISTER all").await;
        let reply = self.read_line().await;
        assert_eq!(reply, "OK", "unexpected registration reply");
    }

    /// Acknowledge the last delivered message.
    pub async fn ack(&mut self) {
        self.send_line("ACK").await;
    }

    /// Request a graceful close.
    pub async fn quit(&mut self) {
        self.send_line("QUIT").await;
    }
}

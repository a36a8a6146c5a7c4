//! TCP/TLS listener accepting subscriber connections.
//!
//! Each accepted connection gets its own task running a
//! [`ClientSession`]. The TLS handshake happens inside that task so a
//! stalled handshake never blocks the accept loop. Accept errors are
//! logged and the loop continues; only bind and TLS setup failures are
//! fatal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{ListenSecurity, RelayConfig};
use crate::error::{ConfigError, RelayError, Result};
use crate::metrics::RelayMetrics;
use crate::relay::{ClientRegistry, ClientSession};
use crate::tls::TlsServerAcceptor;

use super::client_stream::ClientStream;

/// Subscriber-facing listener and session spawner.
pub struct RelayServer {
    config: Arc<RelayConfig>,
    registry: Arc<ClientRegistry>,
    metrics: Arc<RelayMetrics>,
    listener: TcpListener,
    tls: Option<TlsServerAcceptor>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Bind the listener and build the TLS acceptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound, the TLS material
    /// cannot be loaded, or the TLS protocol version cannot be enforced.
    /// All of these are fatal: the daemon must not come up half-secured.
    pub async fn bind(
        config: RelayConfig,
        registry: Arc<ClientRegistry>,
        metrics: Arc<RelayMetrics>,
    ) -> Result<Self> {
        let tls = match config.listen.security {
            ListenSecurity::Tls => {
                let tls_config = config
                    .tls
                    .as_ref()
                    .ok_or(RelayError::Config(ConfigError::MissingTlsSection))?;
                Some(TlsServerAcceptor::new(tls_config)?)
            }
            ListenSecurity::Plaintext => {
                warn!("subscriber listener running without TLS");
                None
            }
        };

        let listener = TcpListener::bind(&config.listen.address).await?;
        info!(
            address = %config.listen.address,
            tls = tls.is_some(),
            "subscriber listener started"
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config: Arc::new(config),
            registry,
            metrics,
            listener,
            tls,
            shutdown_tx,
        })
    }

    /// Actual bound address, useful when the port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to signal the listener and every session to stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// The registry of live sessions.
    #[must_use]
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept subscriber connections until shutdown.
    ///
    /// A failed accept is logged and the loop continues; the listener
    /// never dies because one connection attempt went wrong.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => self.spawn_session(socket, addr),
                        Err(e) => {
                            error!(error = %e, "accept error, listener continuing");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, listener stopping");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_session(&self, socket: TcpStream, addr: SocketAddr) {
        debug!(peer = %addr, "accepted subscriber connection");

        let session_config = self.config.session.clone();
        let registry = Arc::clone(&self.registry);
        let metrics = Arc::clone(&self.metrics);
        let tls = self.tls.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let stream = match tls {
                Some(acceptor) => match acceptor.accept(socket).await {
                    Ok(stream) => ClientStream::tls(stream),
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => ClientStream::plain(socket),
            };

            let (session, queue) =
                ClientSession::new(addr, session_config, Arc::clone(&registry), shutdown_rx);
            registry.register(session.id().to_string(), queue).await;

            metrics.active_sessions.inc();
            let result = session.run(stream).await;
            metrics.active_sessions.dec();

            if let Err(RelayError::AckTimeout { .. }) = result {
                metrics.dead_clients.inc();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenSecurity;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::time::timeout;

    fn plaintext_config() -> RelayConfig {
        let mut config = RelayConfig::default();
        config.listen.address = "127.0.0.1:0".to_string();
        config.listen.security = ListenSecurity::Plaintext;
        config
    }

    async fn bound_server() -> (Arc<RelayServer>, SocketAddr) {
        let registry = Arc::new(ClientRegistry::new());
        let metrics = Arc::new(RelayMetrics::new());
        let server = RelayServer::bind(plaintext_config(), registry, metrics)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        (Arc::new(server), addr)
    }

    #[tokio::test]
    async fn test_accepts_and_registers_subscriber() {
        let (server, addr) = bound_server().await;
        let registry = server.registry();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move { server.run().await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = BufReader::new(stream);
        client.get_mut().write_all(b"REGISTER all\n").await.unwrap();

        let mut line = String::new();
        timeout(Duration::from_secs(2), client.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.trim_end(), "OK");
        assert_eq!(registry.len().await, 1);

        let _ = shutdown.send(());
        let _ = timeout(Duration::from_secs(2), task).await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener_and_sessions() {
        let (server, addr) = bound_server().await;
        let registry = server.registry();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(async move { server.run().await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"REGISTER all\n").await.unwrap();

        // Let the session register before signalling shutdown.
        timeout(Duration::from_secs(2), async {
            while registry.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let _ = shutdown.send(());
        let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(result.is_ok());

        timeout(Duration::from_secs(2), async {
            while !registry.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_bind_fails_without_tls_material() {
        let mut config = plaintext_config();
        config.listen.security = ListenSecurity::Tls;
        let registry = Arc::new(ClientRegistry::new());
        let metrics = Arc::new(RelayMetrics::new());

        let result = RelayServer::bind(config, registry, metrics).await;
        assert!(matches!(result, Err(RelayError::Config(_))));
    }
}

//! Per-connection protocol state machine.
//!
//! Each accepted subscriber runs one [`ClientSession`] on its own task. The
//! session owns the socket exclusively; its bounded outbound queue is the
//! only state shared with the broadcaster.
//!
//! Protocol: the client opens with `REGISTER <arg>` (the argument is
//! accepted and ignored) and receives `OK`. From then on the session
//! interleaves two duties, commands first:
//!
//! 1. If the client sent a line, interpret it (`QUIT` closes gracefully,
//!    anything else is logged and ignored).
//! 2. Otherwise, if a converted trap is queued, write it and wait for `ACK`.
//!    A client that does not acknowledge within the ack window is declared
//!    dead and the session closes. There is never more than one message in
//!    flight.
//!
//! Command processing takes priority so that a flood of traps cannot starve
//! a pending `QUIT`. The close path is reachable from every state and runs
//! exactly once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{RelayError, Result};
use crate::event::ConvertedMessage;
use crate::relay::registry::ClientRegistry;

/// Protocol state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for the `REGISTER` command.
    AwaitingRegister,
    /// Registered; relaying traps and processing commands.
    Active,
    /// Tearing down: socket closing, registry entry being removed.
    Closing,
    /// Fully torn down. Terminal.
    Closed,
}

/// Something the client connection produced while we were listening.
enum Inbound {
    Line(String),
    Eof,
    TimedOut,
}

/// One registered TCP client and its protocol state.
pub struct ClientSession {
    id: String,
    config: SessionConfig,
    registry: Arc<ClientRegistry>,
    queue_rx: mpsc::Receiver<ConvertedMessage>,
    shutdown_rx: broadcast::Receiver<()>,
    state: SessionState,
}

impl ClientSession {
    /// Create a session for an accepted connection.
    ///
    /// Returns the session and the sender side of its private outbound
    /// queue, which the caller registers with the [`ClientRegistry`].
    #[must_use]
    pub fn new(
        peer: SocketAddr,
        config: SessionConfig,
        registry: Arc<ClientRegistry>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> (Self, mpsc::Sender<ConvertedMessage>) {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let session = Self {
            id: peer.to_string(),
            config,
            registry,
            queue_rx,
            shutdown_rx,
            state: SessionState::AwaitingRegister,
        };
        (session, queue_tx)
    }

    /// Session identity: remote `ip:port`, also the registry key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Always closes the socket and unregisters from the registry,
    /// whatever path ended the session. The returned error describes why
    /// the session ended when the cause was not a graceful disconnect.
    pub async fn run<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let codec = LinesCodec::new_with_max_length(self.config.max_line_length);
        let mut framed = Framed::new(stream, codec);

        let result = self.drive(&mut framed).await;
        match &result {
            Ok(()) => info!(peer = %self.id, "client disconnected"),
            Err(RelayError::AckTimeout { timeout_ms }) => {
                warn!(peer = %self.id, timeout_ms, "client declared dead: no ACK within window");
            }
            Err(RelayError::RegisterTimeout { timeout_ms }) => {
                warn!(peer = %self.id, timeout_ms, "client never registered, closing");
            }
            Err(RelayError::Shutdown) => {
                debug!(peer = %self.id, "session closing on shutdown signal");
            }
            Err(RelayError::Connection(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(peer = %self.id, "client connection dropped");
            }
            Err(e) => warn!(peer = %self.id, error = %e, "session error"),
        }

        self.close(&mut framed).await;
        result
    }

    async fn drive<S>(&mut self, framed: &mut Framed<S, LinesCodec>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.await_register(framed).await?;
        self.relay_loop(framed).await
    }

    /// AWAITING_REGISTER: wait for a line starting with `REGISTER`, reply
    /// `OK`. Other lines are logged and ignored. A client that stays
    /// unregistered past the registration timeout is closed.
    async fn await_register<S>(&mut self, framed: &mut Framed<S, LinesCodec>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timeout_ms = self.config.register_timeout_ms;
        let deadline = if timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(timeout_ms))
        } else {
            None
        };

        loop {
            let inbound = tokio::select! { biased;
                _ = self.shutdown_rx.recv() => return Err(RelayError::Shutdown),
                inbound = next_inbound(framed, deadline) => inbound?,
            };

            match inbound {
                Inbound::TimedOut => return Err(RelayError::RegisterTimeout { timeout_ms }),
                Inbound::Eof => {
                    return Err(RelayError::Connection(std::io::ErrorKind::UnexpectedEof.into()))
                }
                Inbound::Line(line) if line.trim_end().starts_with("REGISTER") => {
                    framed.send("OK").await?;
                    self.state = SessionState::Active;
                    info!(peer = %self.id, "client registered");
                    return Ok(());
                }
                Inbound::Line(line) => {
                    warn!(peer = %self.id, command = %line.trim_end(), "unexpected command before REGISTER");
                }
            }
        }
    }

    /// ACTIVE: interleave command processing and trap delivery, commands
    /// first. `biased` keeps the priority deterministic when both a client
    /// line and a queued message are ready.
    async fn relay_loop<S>(&mut self, framed: &mut Framed<S, LinesCodec>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! { biased;
                _ = self.shutdown_rx.recv() => return Err(RelayError::Shutdown),
                item = framed.next() => match item {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(line)) => {
                        if !self.handle_command(&line) {
                            return Ok(());
                        }
                    }
                },
                message = self.queue_rx.recv() => match message {
                    Some(message) => self.deliver(framed, &message).await?,
                    // Queue sender gone means we were already unregistered.
                    None => return Err(RelayError::Shutdown),
                },
            }
        }
    }

    /// Interpret a client command line. Returns `false` when the session
    /// should close (QUIT).
    fn handle_command(&mut self, line: &str) -> bool {
        let command = line.trim_end();
        if command == "QUIT" {
            debug!(peer = %self.id, "client sent QUIT");
            false
        } else {
            debug!(peer = %self.id, command = %command, "ignoring unexpected command");
            true
        }
    }

    /// Write one message and wait for `ACK` within the ack window.
    ///
    /// The window is measured from the moment the message was written.
    /// Lines other than `ACK` received while waiting are logged and
    /// ignored. No retransmission: a dead-declared client loses the
    /// in-flight message.
    async fn deliver<S>(
        &mut self,
        framed: &mut Framed<S, LinesCodec>,
        message: &ConvertedMessage,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        framed.send(message.as_str()).await?;
        let timeout_ms = self.config.ack_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            match next_inbound(framed, Some(deadline)).await? {
                Inbound::TimedOut => return Err(RelayError::AckTimeout { timeout_ms }),
                Inbound::Eof => {
                    return Err(RelayError::Connection(std::io::ErrorKind::UnexpectedEof.into()))
                }
                Inbound::Line(line) if line.trim_end() == "ACK" => return Ok(()),
                Inbound::Line(line) => {
                    debug!(peer = %self.id, line = %line.trim_end(), "ignoring line while waiting for ACK");
                }
            }
        }
    }

    /// CLOSING -> CLOSED. Reachable from every state; runs exactly once.
    async fn close<S>(&mut self, framed: &mut Framed<S, LinesCodec>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;

        self.registry.unregister(&self.id).await;
        self.queue_rx.close();
        if let Err(e) = SinkExt::<String>::close(framed).await {
            debug!(peer = %self.id, error = %e, "error closing client socket");
        }

        self.state = SessionState::Closed;
        debug!(peer = %self.id, "session closed");
    }
}

/// Read the next line from the client, optionally bounded by a deadline.
async fn next_inbound<S>(
    framed: &mut Framed<S, LinesCodec>,
    deadline: Option<Instant>,
) -> Result<Inbound>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let item = match deadline {
        Some(deadline) => match timeout_at(deadline, framed.next()).await {
            Ok(item) => item,
            Err(_) => return Ok(Inbound::TimedOut),
        },
        None => framed.next().await,
    };

    match item {
        None => Ok(Inbound::Eof),
        Some(Ok(line)) => Ok(Inbound::Line(line)),
        Some(Err(e)) => Err(e.into()),
    }
}

//! Concurrency-safe registry of live client sessions.
//!
//! The registry maps session identity (remote `ip:port`) to the session's
//! private outbound queue. Broadcasting snapshots the current sessions and
//! delivers with `try_send`, so a slow or dead client can never stall the
//! ingestion path. Sessions whose queue has been closed are removed lazily
//! during the broadcast pass.

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::debug;

use crate::event::ConvertedMessage;

/// Result of one broadcast pass over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Sessions whose queue accepted the message.
    pub delivered: usize,
    /// Sessions whose queue was full; the message was dropped for them only.
    pub dropped: usize,
    /// Sessions found closed and removed during the pass.
    pub removed: usize,
}

/// Concurrency-safe set of live client sessions.
#[derive(Default)]
pub struct ClientRegistry {
    sessions: RwLock<HashMap<String, mpsc::Sender<ConvertedMessage>>>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session's outbound queue under its identity.
    ///
    /// Never rejects: there is no connection cap in the base design.
    pub async fn register(&self, id: String, queue: mpsc::Sender<ConvertedMessage>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, queue);
    }

    /// Remove a session. Idempotent.
    pub async fn unregister(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Whether a session with this identity is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Deliver `message` to every registered session's outbound queue.
    ///
    /// Delivery is non-blocking: a full queue drops the message for that
    /// session only (drop-newest), and a closed queue causes the session to
    /// be removed. No error ever propagates to the trap source.
    ///
    /// Iteration works on a snapshot so sessions may unregister themselves
    /// concurrently without affecting the pass.
    pub async fn broadcast(&self, message: &ConvertedMessage) -> BroadcastOutcome {
        let snapshot: Vec<(String, mpsc::Sender<ConvertedMessage>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, queue)| (id.clone(), queue.clone()))
                .collect()
        };

        let mut outcome = BroadcastOutcome::default();
        let mut dead: Vec<String> = Vec::new();

        for (id, queue) in &snapshot {
            match queue.try_send(message.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    outcome.dropped += 1;
                    debug!(peer = %id, "session queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => dead.push(id.clone()),
            }
        }

        if !dead.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in dead {
                if sessions.remove(&id).is_some() {
                    outcome.removed += 1;
                    debug!(peer = %id, "removed closed session during broadcast");
                }
            }
        }

        outcome
    }
}

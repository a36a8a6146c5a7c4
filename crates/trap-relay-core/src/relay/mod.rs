//! Multi-client relay engine.
//!
//! This module provides:
//! - [`ClientRegistry`] - concurrency-safe set of live sessions and the
//!   non-blocking broadcast fan-out
//! - [`ClientSession`] - per-connection protocol state machine
//! - [`pump_traps`] - the ingestion-to-broadcast pipeline task

use std::sync::Arc;

use tracing::debug;

use crate::convert::convert;
use crate::ingest::TrapIngestionPort;
use crate::metrics::RelayMetrics;

pub mod registry;
pub mod session;

pub use registry::{BroadcastOutcome, ClientRegistry};
pub use session::{ClientSession, SessionState};

/// Drive the ingestion-to-broadcast pipeline until the trap source closes.
///
/// Converts each received trap event to its canonical JSON line and fans it
/// out to every registered session. Broadcasting never blocks on client
/// state; drops and removals are surfaced as metrics only.
pub async fn pump_traps(
    mut port: TrapIngestionPort,
    registry: Arc<ClientRegistry>,
    metrics: Arc<RelayMetrics>,
) {
    while let Some(event) = port.recv().await {
        metrics.traps_received.inc();

        let message = convert(&event);
        let outcome = registry.broadcast(&message).await;

        metrics.messages_broadcast.inc_by(outcome.delivered as u64);
        metrics.messages_dropped.inc_by(outcome.dropped as u64);

        if outcome.dropped > 0 || outcome.removed > 0 {
            debug!(
                delivered = outcome.delivered,
                dropped = outcome.dropped,
                removed = outcome.removed,
                "broadcast shed load"
            );
        }
    }
    debug!("trap ingestion channel closed, pipeline stopping");
}

//! Prometheus metrics for the trap relay daemon.
//!
//! Counters for the trap pipeline and gauges for subscriber sessions,
//! exposed in Prometheus text format.

use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};

/// Relay metrics collection.
pub struct RelayMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Total trap events received from the SNMP listener.
    pub traps_received: IntCounter,

    /// Total messages accepted into a session queue.
    pub messages_broadcast: IntCounter,

    /// Total messages dropped because a session queue was full.
    pub messages_dropped: IntCounter,

    /// Total clients declared dead for not acknowledging in time.
    pub dead_clients: IntCounter,

    /// Current number of live subscriber sessions.
    pub active_sessions: IntGauge,
}

impl RelayMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let traps_received = IntCounter::new(
            "trap_relay_traps_received_total",
            "Total trap events received from the SNMP listener",
        )
        .expect("metric creation should succeed");

        let messages_broadcast = IntCounter::new(
            "trap_relay_messages_broadcast_total",
            "Total messages accepted into a session queue",
        )
        .expect("metric creation should succeed");

        let messages_dropped = IntCounter::new(
            "trap_relay_messages_dropped_total",
            "Total messages dropped because a session queue was full",
        )
        .expect("metric creation should succeed");

        let dead_clients = IntCounter::new(
            "trap_relay_dead_clients_total",
            "Total clients declared dead for not acknowledging in time",
        )
        .expect("metric creation should succeed");

        let active_sessions = IntGauge::new(
            "trap_relay_active_sessions",
            "Current number of live subscriber sessions",
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(traps_received.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(messages_broadcast.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(messages_dropped.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(dead_clients.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            traps_received,
            messages_broadcast,
            messages_dropped,
            dead_clients,
            active_sessions,
        }
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

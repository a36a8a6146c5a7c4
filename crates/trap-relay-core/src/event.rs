//! Immutable value types flowing through the relay pipeline.
//!
//! A [`TrapEvent`] is produced once by the ingestion boundary per received
//! PDU and discarded after conversion. A [`ConvertedMessage`] is the
//! canonical single-line JSON rendering of one event; it is fanned out to
//! every live session as a shared copy and never mutated per recipient.

use std::fmt;
use std::sync::Arc;

/// One (OID, value) pair carried inside a trap PDU.
///
/// Binding order is meaningful (OID enumeration order from the source PDU)
/// and is preserved end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    /// Dotted-decimal object identifier, e.g. `1.3.6.1.2.1.1.3.0`.
    pub oid: String,
    /// Rendered value text.
    pub value: String,
}

impl VarBind {
    pub fn new(oid: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            value: value.into(),
        }
    }
}

/// An SNMP trap as surfaced by the ingestion collaborator.
///
/// Immutable after construction; carries no identity beyond arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapEvent {
    /// Network address of the trap originator, formatted as `ip/port`.
    pub peer_address: String,
    /// SNMP security level (1 = noAuthNoPriv, 2 = authNoPriv, 3 = authPriv).
    pub security_level: i32,
    /// SNMP security model (1 = v1, 2 = v2c, 3 = USM).
    pub security_model: i32,
    /// Security name (community string or USM user name). May contain
    /// arbitrary bytes and is treated as opaque until JSON escaping.
    pub security_name: Vec<u8>,
    /// Variable bindings in PDU order.
    pub bindings: Vec<VarBind>,
}

impl TrapEvent {
    pub fn new(
        peer_address: impl Into<String>,
        security_level: i32,
        security_model: i32,
        security_name: impl Into<Vec<u8>>,
        bindings: Vec<VarBind>,
    ) -> Self {
        Self {
            peer_address: peer_address.into(),
            security_level,
            security_model,
            security_name: security_name.into(),
            bindings,
        }
    }
}

/// A converted trap: one line of JSON text with no embedded newline.
///
/// Cloning is cheap (shared backing storage), which is what makes the
/// broadcast fan-out a by-reference distribution rather than a per-client
/// copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedMessage(Arc<str>);

impl ConvertedMessage {
    /// Wrap an already-serialized JSON line.
    ///
    /// Callers must guarantee the line contains no newline; the converter
    /// upholds this by JSON-escaping all control characters.
    pub(crate) fn from_line(line: String) -> Self {
        debug_assert!(!line.contains('\n'), "converted message must be one line");
        Self(line.into())
    }

    /// The JSON text, without a trailing line break.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConvertedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

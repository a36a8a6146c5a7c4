//! Test utilities for integration testing of the trap relay.

pub mod harness;

pub use harness::{sample_trap_event, RelayTestHarness, TestClient};

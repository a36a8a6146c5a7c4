//! End-to-end tests driving the full relay through the subscriber
//! protocol: REGISTER, JSON delivery, ACK and QUIT.

use trap_relay_core::event::{TrapEvent, VarBind};
use trap_relay_core::testing::{sample_trap_event, RelayTestHarness};

#[tokio::test]
async fn test_trap_reaches_every_registered_subscriber() {
    let harness = RelayTestHarness::new().await;

    let mut first = harness.connect().await;
    let mut second = harness.connect().await;
    harness.wait_for_sessions(2).await;

    harness.inject(sample_trap_event()).await;

    let line_first = first.read_line().await;
    let line_second = second.read_line().await;
    assert_eq!(line_first, line_second);
    first.ack().await;
    second.ack().await;

    first.quit().await;
    second.quit().await;
    harness.wait_for_sessions(0).await;
    harness.shutdown();
}

#[tokio::test]
async fn test_delivered_json_has_canonical_shape() {
    let harness = RelayTestHarness::new().await;
    let mut client = harness.connect().await;

    harness.inject(sample_trap_event()).await;
    let line = client.read_line().await;
    client.ack().await;

    let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["trapSrc"], "10.0.0.5/0");
    assert_eq!(parsed["secLevel"], "1");
    assert_eq!(parsed["secModel"], "2");
    assert_eq!(parsed["secName"], "public");
    assert_eq!(parsed["variables"]["1.3.6.1.4.1.8072.2.3.2.1"], "123456");

    // Top-level keys appear in the documented order.
    let positions: Vec<usize> = ["trapSrc", "timestamp", "secLevel", "secModel", "secName", "variables"]
        .iter()
        .map(|key| line.find(&format!("\"{key}\"")).unwrap())
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);

    client.quit().await;
    harness.shutdown();
}

#[tokio::test]
async fn test_messages_arrive_in_reception_order() {
    let harness = RelayTestHarness::new().await;
    let mut client = harness.connect().await;

    for i in 0..5 {
        let event = TrapEvent::new(
            "10.0.0.5/0",
            1,
            2,
            b"public".to_vec(),
            vec![VarBind::new("1.3.6.1.9.1", i.to_string())],
        );
        harness.inject(event).await;
    }

    for i in 0..5 {
        let line = client.read_line().await;
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["variables"]["1.3.6.1.9.1"], i.to_string());
        client.ack().await;
    }

    client.quit().await;
    harness.shutdown();
}

#[tokio::test]
async fn test_unknown_commands_are_ignored() {
    let harness = RelayTestHarness::new().await;
    let mut client = harness.connect().await;

    client.send_line("STATUS").await;
    client.send_line("PING").await;

    // The session is still alive and still delivers.
    harness.inject(sample_trap_event()).await;
    let line = client.read_line().await;
    assert!(line.contains("\"trapSrc\""));
    client.ack().await;

    client.quit().await;
    harness.shutdown();
}

#[tokio::test]
async fn test_subscriber_connecting_later_misses_earlier_traps() {
    let harness = RelayTestHarness::new().await;

    // No subscriber yet: this trap goes nowhere.
    let early = TrapEvent::new(
        "10.0.0.5/0",
        1,
        2,
        b"public".to_vec(),
        vec![VarBind::new("1.3.6.1.9.1", "early")],
    );
    harness.inject(early).await;

    let mut client = harness.connect().await;
    let late = TrapEvent::new(
        "10.0.0.5/0",
        1,
        2,
        b"public".to_vec(),
        vec![VarBind::new("1.3.6.1.9.1", "late")],
    );
    harness.inject(late).await;

    let line = client.read_line().await;
    let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["variables"]["1.3.6.1.9.1"], "late");
    client.ack().await;

    client.quit().await;
    harness.shutdown();
}

#[tokio::test]
async fn test_quit_before_any_delivery() {
    let harness = RelayTestHarness::new().await;
    let mut client = harness.connect().await;

    client.quit().await;
    harness.wait_for_sessions(0).await;

    // A trap injected afterwards is simply not delivered anywhere.
    harness.inject(sample_trap_event()).await;
    client.read_until_closed().await;
    harness.shutdown();
}

//! Local transport tests.

use std::time::Duration;

use courier::transports::{LocalTransport, Mailbox};
use courier::{OutboundMessage, Transport, TransportError};

fn message(to: &str) -> OutboundMessage {
    OutboundMessage::new()
        .from("noreply@acme.test")
        .to(to)
        .subject("Hello!")
        .body("<p>Hello</p>")
}

// ============================================================================
// Mailbox Tests
// ============================================================================

#[tokio::test]
async fn send_stores_message_in_mailbox() {
    let transport = LocalTransport::new();
    let receipt = transport.send(&message("a@x.com")).await.unwrap();

    let stored = transport.mailbox().get(&receipt.message_id).unwrap();
    assert_eq!(stored.message.html_body.as_deref(), Some("<p>Hello</p>"));
    assert!(stored.message.text_body.is_none());
}

#[tokio::test]
async fn shared_mailbox_sees_every_transport() {
    let mailbox = Mailbox::shared();
    let first = LocalTransport::with_mailbox(mailbox.clone());
    let second = LocalTransport::with_mailbox(mailbox.clone());

    first.send(&message("a@x.com")).await.unwrap();
    second.send(&message("b@x.com")).await.unwrap();

    assert_eq!(mailbox.count(), 2);
    assert!(first.sent_to("b@x.com"));
    assert_eq!(second.find_messages(|m| m.to[0].email == "a@x.com").len(), 1);
}

#[tokio::test]
async fn clear_empties_mailbox() {
    let transport = LocalTransport::new();
    transport.send(&message("a@x.com")).await.unwrap();
    transport.clear();
    assert!(!transport.has_messages());
}

// ============================================================================
// Failure Simulation Tests
// ============================================================================

#[tokio::test]
async fn fail_next_n_then_recovers() {
    let transport = LocalTransport::new();
    transport.fail_next_n(2, TransportError::transient("503"));

    assert!(transport.send(&message("a@x.com")).await.is_err());
    assert!(transport.send(&message("a@x.com")).await.is_err());
    assert!(transport.send(&message("a@x.com")).await.is_ok());
    assert_eq!(transport.attempts(), 3);
    assert_eq!(transport.message_count(), 1);
}

#[tokio::test]
async fn clear_failure_drops_queued_errors() {
    let transport = LocalTransport::new();
    transport.fail_next(TransportError::bounce("550"));
    transport.clear_failure();
    assert!(transport.send(&message("a@x.com")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn delay_is_applied_before_send() {
    let transport = LocalTransport::new();
    transport.set_delay(Duration::from_secs(10));

    let start = tokio::time::Instant::now();
    transport.send(&message("a@x.com")).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(10));

    transport.clear_delay();
    let start = tokio::time::Instant::now();
    transport.send(&message("a@x.com")).await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
}

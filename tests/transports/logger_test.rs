//! Logger transport tests.

use courier::transports::LoggerTransport;
use courier::{OutboundMessage, Transport};

fn message() -> OutboundMessage {
    OutboundMessage::new()
        .from("noreply@acme.test")
        .to("a@x.com")
        .subject("Thanks, A")
        .body("We received your message.")
}

#[tokio::test]
async fn send_returns_unique_ids() {
    let transport = LoggerTransport::new();
    let first = transport.send(&message()).await.unwrap();
    let second = transport.send(&message()).await.unwrap();
    assert_ne!(first.message_id, second.message_id);
}

#[tokio::test]
async fn full_logging_accepts_any_message() {
    // The logger never validates: it reports what would have been sent.
    let receipt = LoggerTransport::full()
        .send(&OutboundMessage::new().subject("no recipients"))
        .await
        .unwrap();
    assert!(!receipt.message_id.is_empty());
}

#[test]
fn provider_name_is_logger() {
    assert_eq!(LoggerTransport::default().provider_name(), "logger");
    assert!(LoggerTransport::new().validate_config().is_ok());
}

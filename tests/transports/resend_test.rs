//! Resend transport tests.

use courier::transports::ResendTransport;
use courier::{OutboundMessage, Transport, TransportError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helper Functions
// ============================================================================

fn valid_message() -> OutboundMessage {
    OutboundMessage::new()
        .from("noreply@acme.test")
        .to("a@x.com")
        .subject("Thanks, A")
        .html_body("<h1>Thanks</h1>")
        .text_body("Thanks")
}

fn success_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "049b9217-30b5-4f61-a8e3-4d2d12f9f5a7"
    }))
}

fn error_response(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "statusCode": status,
        "name": "validation_error",
        "message": message
    }))
}

async fn send_against(server: &MockServer, message: &OutboundMessage) -> Result<String, TransportError> {
    ResendTransport::new("re_123456789")
        .base_url(server.uri())
        .send(message)
        .await
        .map(|receipt| receipt.message_id)
}

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn successful_delivery_returns_message_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("Authorization", "Bearer re_123456789"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({
            "from": "noreply@acme.test",
            "to": ["a@x.com"],
            "subject": "Thanks, A",
            "html": "<h1>Thanks</h1>",
            "text": "Thanks"
        })))
        .respond_with(success_response())
        .expect(1)
        .mount(&server)
        .await;

    let id = send_against(&server, &valid_message()).await.unwrap();
    assert_eq!(id, "049b9217-30b5-4f61-a8e3-4d2d12f9f5a7");
}

#[tokio::test]
async fn idempotency_key_is_sent_as_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("Idempotency-Key", "rule-1:sub-1"))
        .respond_with(success_response())
        .expect(1)
        .mount(&server)
        .await;

    let message = valid_message().idempotency_key("rule-1:sub-1");
    assert!(send_against(&server, &message).await.is_ok());
}

#[tokio::test]
async fn named_addresses_reply_to_and_tags() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(body_json(json!({
            "from": "Acme <noreply@acme.test>",
            "to": ["Ann <a@x.com>"],
            "subject": "Thanks, A",
            "text": "Thanks",
            "reply_to": "info@acme.test",
            "tags": [{"name": "rule_id", "value": "r-1"}]
        })))
        .respond_with(success_response())
        .expect(1)
        .mount(&server)
        .await;

    let message = OutboundMessage::new()
        .from(("Acme", "noreply@acme.test"))
        .to(("Ann", "a@x.com"))
        .reply_to("info@acme.test")
        .subject("Thanks, A")
        .text_body("Thanks")
        .tag("rule_id", "r-1");
    assert!(send_against(&server, &message).await.is_ok());
}

// ============================================================================
// Error Classification Tests
// ============================================================================

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(error_response(503, "Service unavailable"))
        .mount(&server)
        .await;

    let err = send_against(&server, &valid_message()).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn rate_limit_response_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(error_response(429, "Too many requests"))
        .mount(&server)
        .await;

    assert!(send_against(&server, &valid_message())
        .await
        .unwrap_err()
        .is_transient());
}

#[tokio::test]
async fn invalid_recipient_is_a_bounce() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(error_response(422, "Invalid `to` field"))
        .mount(&server)
        .await;

    let err = send_against(&server, &valid_message()).await.unwrap_err();
    assert!(err.is_bounce());
    assert!(err.to_string().contains("Invalid `to` field"));
}

#[tokio::test]
async fn auth_failure_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(error_response(401, "API key is invalid"))
        .mount(&server)
        .await;

    let err = send_against(&server, &valid_message()).await.unwrap_err();
    assert!(matches!(err, TransportError::Rejected { status: Some(401), .. }));
}

#[tokio::test]
async fn missing_from_is_rejected_before_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(success_response())
        .expect(0)
        .mount(&server)
        .await;

    let message = OutboundMessage::new().to("a@x.com").subject("x").text_body("x");
    assert!(matches!(
        send_against(&server, &message).await,
        Err(TransportError::Rejected { .. })
    ));
}

#[test]
fn empty_api_key_fails_validation() {
    assert!(matches!(
        ResendTransport::new(" ").validate_config(),
        Err(TransportError::Configuration(_))
    ));
    assert_eq!(ResendTransport::new("re_1").provider_name(), "resend");
}

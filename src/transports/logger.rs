//! Logger transport that only logs messages.
//!
//! Useful for staging environments or when you want to see what the engine
//! would send without sending or storing anything.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::OutboundMessage;
use crate::transport::{SendReceipt, Transport};

/// Transport that emits tracing events instead of sending.
#[derive(Debug, Clone, Copy)]
pub struct LoggerTransport {
    /// If true, log subject, sender and body too. If false, just recipients.
    log_full: bool,
}

impl LoggerTransport {
    /// Brief output (recipients and subject).
    pub fn new() -> Self {
        Self { log_full: false }
    }

    /// Full message details.
    pub fn full() -> Self {
        Self { log_full: true }
    }

    pub fn log_full(mut self, full: bool) -> Self {
        self.log_full = full;
        self
    }
}

impl Default for LoggerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoggerTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        let message_id = uuid::Uuid::new_v4().to_string();

        if self.log_full {
            tracing::info!(
                message_id = %message_id,
                from = ?message.from.as_ref().map(|a| a.formatted()),
                to = ?message.to.iter().map(|a| a.formatted()).collect::<Vec<_>>(),
                reply_to = ?message.reply_to.as_ref().map(|a| a.formatted()),
                subject = %message.subject,
                idempotency_key = ?message.idempotency_key,
                track_opens = message.tracking.opens,
                track_clicks = message.tracking.clicks,
                "Message logged (full)"
            );
            tracing::debug!(body = %message.body_text(), "Message body");
        } else {
            tracing::info!(
                message_id = %message_id,
                to = ?message.to.iter().map(|a| &a.email).collect::<Vec<_>>(),
                subject = %message.subject,
                "Message logged"
            );
        }

        Ok(SendReceipt::new(message_id))
    }

    fn provider_name(&self) -> &'static str {
        "logger"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logger_returns_message_id() {
        let transport = LoggerTransport::full();
        let message = OutboundMessage::new()
            .from(("Alice", "alice@example.com"))
            .to("bob@example.com")
            .subject("Test Subject")
            .body("<p>HTML</p>");

        let receipt = transport.send(&message).await.unwrap();
        assert!(!receipt.message_id.is_empty());

        let other = LoggerTransport::new().send(&message).await.unwrap();
        assert_ne!(receipt.message_id, other.message_id);
    }

    #[test]
    fn test_builder() {
        assert!(LoggerTransport::new().log_full(true).log_full);
        assert!(!LoggerTransport::default().log_full);
        assert_eq!(LoggerTransport::new().provider_name(), "logger");
    }
}

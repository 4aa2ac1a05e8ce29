//! Transport trait and send receipts.
//!
//! `#[async_trait]` keeps the trait object-safe so the engine can hold an
//! `Arc<dyn Transport>` chosen at runtime (Resend in production, the local
//! mailbox in tests, the logger in development).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::message::OutboundMessage;

/// Result of a send the provider accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Message id assigned by the provider; tracking callbacks refer to it.
    pub message_id: String,
    /// Optional provider-specific response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<serde_json::Value>,
}

impl SendReceipt {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            provider_response: None,
        }
    }

    pub fn with_response(message_id: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            message_id: message_id.into(),
            provider_response: Some(response),
        }
    }
}

/// An outbound mail provider.
///
/// Errors must be classified: [`TransportError::Transient`] is retried,
/// [`TransportError::Bounce`] marks the job bounced, anything else fails it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message.
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError>;

    /// Get the provider name (for logging/debugging).
    fn provider_name(&self) -> &'static str {
        "unknown"
    }

    /// Check required configuration at startup.
    fn validate_config(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

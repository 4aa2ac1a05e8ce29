//! Resend API transport.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier::transports::ResendTransport;
//!
//! let transport = ResendTransport::new("re_xxxxx");
//! ```
//!
//! The message's idempotency key is sent as the `Idempotency-Key` header, so a
//! retried job is not delivered twice when an earlier attempt actually reached
//! Resend. Tags become Resend tags. HTTP statuses are classified by
//! [`TransportError::from_status`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::message::OutboundMessage;
use crate::transport::{SendReceipt, Transport};

const RESEND_API_URL: &str = "https://api.resend.com";

/// Resend API transport.
#[derive(Debug, Clone)]
pub struct ResendTransport {
    api_key: String,
    client: Client,
    base_url: String,
}

impl ResendTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            base_url: RESEND_API_URL.to_string(),
        }
    }

    /// Create with a custom reqwest client.
    pub fn with_client(api_key: impl Into<String>, client: Client) -> Self {
        Self {
            api_key: api_key.into(),
            client,
            base_url: RESEND_API_URL.to_string(),
        }
    }

    /// Set a custom base URL (for testing).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn build_request(&self, message: &OutboundMessage) -> Result<ResendRequest, TransportError> {
        message.validate()?;
        let from = message
            .from
            .as_ref()
            .ok_or_else(|| TransportError::rejected("message has no from address"))?;

        Ok(ResendRequest {
            from: from.formatted(),
            to: message.to.iter().map(|a| a.formatted()).collect(),
            subject: message.subject.clone(),
            html: message.html_body.clone(),
            text: message.text_body.clone(),
            reply_to: message.reply_to.as_ref().map(|a| a.formatted()),
            headers: if message.headers.is_empty() {
                None
            } else {
                Some(
                    message
                        .headers
                        .iter()
                        .map(|(k, v)| ResendHeader {
                            name: k.clone(),
                            value: v.clone(),
                        })
                        .collect(),
                )
            },
            tags: if message.tags.is_empty() {
                None
            } else {
                Some(
                    message
                        .tags
                        .iter()
                        .map(|(k, v)| ResendTag {
                            name: k.clone(),
                            value: v.clone(),
                        })
                        .collect(),
                )
            },
        })
    }
}

#[async_trait]
impl Transport for ResendTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        let request = self.build_request(message)?;

        let url = format!("{}/emails", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("User-Agent", format!("courier/{}", crate::VERSION));

        if let Some(key) = &message.idempotency_key {
            req = req.header("Idempotency-Key", key);
        }

        let response = req.json(&request).send().await?;
        let status = response.status();

        if status.is_success() {
            let result: ResendResponse = response.json().await?;
            Ok(SendReceipt::with_response(
                result.id,
                serde_json::json!({ "provider": "resend" }),
            ))
        } else {
            let error: ResendError = response.json().await.unwrap_or(ResendError {
                message: "Unknown error".to_string(),
                name: None,
            });
            tracing::debug!(
                status = status.as_u16(),
                name = ?error.name,
                "Resend rejected request"
            );
            Err(TransportError::from_status(status.as_u16(), error.message))
        }
    }

    fn provider_name(&self) -> &'static str {
        "resend"
    }

    fn validate_config(&self) -> Result<(), TransportError> {
        if self.api_key.trim().is_empty() {
            return Err(TransportError::Configuration("RESEND_API_KEY is empty".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Resend API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ResendRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<Vec<ResendHeader>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<ResendTag>>,
}

#[derive(Debug, Serialize)]
struct ResendHeader {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ResendTag {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResendError {
    message: String,
    #[serde(default)]
    name: Option<String>,
}

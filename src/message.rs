//! The rendered message handed to a transport.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::address::{Address, ToAddress};
use crate::error::TransportError;

/// Provider-side tracking the sender asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingOptions {
    pub opens: bool,
    pub clicks: bool,
}

/// A fully rendered outbound message.
///
/// ```
/// use courier::OutboundMessage;
///
/// let message = OutboundMessage::new()
///     .from(("Zira Technologies", "noreply@example.com"))
///     .to("a@x.com")
///     .subject("Thanks for reaching out")
///     .body("We received your message.")
///     .idempotency_key("rule:sub-1");
///
/// assert_eq!(message.text_body.as_deref(), Some("We received your message."));
/// assert!(message.html_body.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: Option<Address>,
    pub to: Vec<Address>,
    pub reply_to: Option<Address>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    /// Custom email headers
    pub headers: HashMap<String, String>,
    /// Key/value tags forwarded to providers that support them.
    pub tags: BTreeMap<String, String>,
    /// Sent to providers that deduplicate retried requests.
    pub idempotency_key: Option<String>,
    pub tracking: TrackingOptions,
}

impl OutboundMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, addr: impl ToAddress) -> Self {
        self.from = Some(addr.to_address());
        self
    }

    /// Add a recipient.
    pub fn to(mut self, addr: impl ToAddress) -> Self {
        self.to.push(addr.to_address());
        self
    }

    /// Replace all recipients.
    pub fn put_to(mut self, addrs: Vec<Address>) -> Self {
        self.to = addrs;
        self
    }

    pub fn reply_to(mut self, addr: impl ToAddress) -> Self {
        self.reply_to = Some(addr.to_address());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    pub fn html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    /// Set the body, as HTML when it starts with a tag.
    pub fn body(self, body: impl Into<String>) -> Self {
        let body = body.into();
        if body.trim_start().starts_with('<') {
            self.html_body(body)
        } else {
            self.text_body(body)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn tracking(mut self, tracking: TrackingOptions) -> Self {
        self.tracking = tracking;
        self
    }

    /// The body a transport should fall back to when it sends only one part.
    pub fn body_text(&self) -> &str {
        self.text_body
            .as_deref()
            .or(self.html_body.as_deref())
            .unwrap_or_default()
    }

    /// Check the fields every transport needs.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.from.is_none() {
            return Err(TransportError::rejected("message has no from address"));
        }
        if self.to.is_empty() {
            return Err(TransportError::rejected("message has no recipients"));
        }
        Ok(())
    }
}

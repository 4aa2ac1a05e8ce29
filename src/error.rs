//! Error types for courier.
//!
//! Errors fall into the classes the delivery pipeline treats differently:
//!
//! - **Validation** ([`EventError`], [`ResolutionError`], [`StoreError`]) - never retried
//! - **Transport** ([`TransportError`]) - classified as transient, bounce, or rejected
//! - **Configuration** ([`ConfigError`]) - raised at load or reload time

use std::time::Duration;

use thiserror::Error;

use crate::rule::RuleId;
use crate::template::TemplateId;

/// An email address failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid email address: {0}")]
pub struct AddressError(pub String);

/// A trigger event was rejected before matching.
///
/// These are caller bugs, not transient faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The event carried no `event_type`.
    #[error("Event is missing event_type")]
    MissingEventType,

    /// The `event_type` is not one of the known triggers.
    #[error("Unknown event_type: {0}")]
    UnknownEventType(String),

    /// The event carried no (or an empty) `dedupe_key`.
    #[error("Event is missing dedupe_key")]
    MissingDedupeKey,
}

/// A rule's recipient policy could not produce a destination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// `submitter` policy but the payload has no `email` field.
    #[error("Payload has no submitter email")]
    MissingSubmitterEmail,

    /// `submitter` policy but the payload's `email` is not a valid address.
    #[error("Submitter email is invalid: {0}")]
    InvalidSubmitterEmail(String),

    /// `admin_group` policy but no admin addresses are configured.
    #[error("Admin group has no addresses")]
    EmptyAdminGroup,
}

/// Errors from the rule and template stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No template with this id (or version).
    #[error("Template not found: {0}")]
    TemplateNotFound(TemplateId),

    /// No rule with this id.
    #[error("Rule not found: {0}")]
    RuleNotFound(RuleId),

    /// Rule failed save-time validation.
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Template failed save-time validation.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
}

/// Configuration error (missing env var, invalid value, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required key is absent.
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    /// A key is present but its value is unusable.
    #[error("Invalid configuration for {key}: {reason}")]
    Invalid {
        key: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Errors returned by an outbound [`Transport`](crate::Transport).
///
/// Each variant carries its retry classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Temporary failure (5xx, 429, connection reset). Retried.
    #[error("Transient transport failure: {reason}")]
    Transient {
        reason: String,
        /// Optional HTTP or SMTP status code
        status: Option<u16>,
    },

    /// Permanent recipient failure (invalid or rejected address). Never retried.
    #[error("Hard bounce: {reason}")]
    Bounce {
        reason: String,
        status: Option<u16>,
    },

    /// Permanent non-recipient failure (auth, malformed request). Never retried.
    #[error("Message rejected: {reason}")]
    Rejected {
        reason: String,
        status: Option<u16>,
    },

    /// The send did not complete within the configured timeout. Retried.
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    /// Transport is not configured (missing key, disabled feature).
    #[error("Transport configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    /// Create a transient error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            status: None,
        }
    }

    /// Create a hard-bounce error.
    pub fn bounce(reason: impl Into<String>) -> Self {
        Self::Bounce {
            reason: reason.into(),
            status: None,
        }
    }

    /// Create a permanent rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            status: None,
        }
    }

    /// Classify a provider HTTP status.
    ///
    /// 408, 429 and 5xx are transient; 422 (unprocessable recipient) is a
    /// bounce; every other status is a permanent rejection.
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match status {
            408 | 429 | 500..=599 => Self::Transient {
                reason,
                status: Some(status),
            },
            422 => Self::Bounce {
                reason,
                status: Some(status),
            },
            _ => Self::Rejected {
                reason,
                status: Some(status),
            },
        }
    }

    /// Whether the failure may succeed on a later attempt.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout(_))
    }

    /// Whether the failure is a hard bounce.
    pub const fn is_bounce(&self) -> bool {
        matches!(self, Self::Bounce { .. })
    }

    /// Status code reported by the provider, if any.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. }
            | Self::Bounce { status, .. }
            | Self::Rejected { status, .. } => *status,
            Self::Timeout(_) | Self::Configuration(_) => None,
        }
    }
}

#[cfg(feature = "_http")]
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // Connection, timeout and body errors are all network-level
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), err.to_string()),
            None => Self::transient(err.to_string()),
        }
    }
}

/// Top-level error for engine operations.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Engine was built without a required component.
    #[error("Engine not configured: {0}")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Address(#[from] AddressError),

    /// Outbound send was refused by the rate limiter.
    #[error("Rate limited, retry in {0:?}")]
    RateLimited(Duration),
}

//! Trigger events: the business facts that activate automation rules.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;
use crate::rule::Trigger;

/// Field name to value map carried by an event (name, email, phone, message, ...).
pub type Payload = BTreeMap<String, String>;

/// An event ready for matching.
///
/// Events are ephemeral: the engine keeps a copy of the payload on each job it
/// schedules, but never stores the event itself.
///
/// ```
/// use courier::{Trigger, TriggerEvent};
///
/// let event = TriggerEvent::new(Trigger::FormSubmission, "sub-1")
///     .field("form_name", "contact")
///     .field("email", "a@x.com");
///
/// assert_eq!(event.form_name(), Some("contact"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_type: Trigger,
    pub payload: Payload,
    pub occurred_at: DateTime<Utc>,
    /// Stable id of the originating business fact (e.g. a submission id).
    pub dedupe_key: String,
}

impl TriggerEvent {
    /// Create an event that occurred now with an empty payload.
    pub fn new(event_type: Trigger, dedupe_key: impl Into<String>) -> Self {
        Self {
            event_type,
            payload: Payload::new(),
            occurred_at: Utc::now(),
            dedupe_key: dedupe_key.into(),
        }
    }

    /// Add a payload field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replace the payload.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Set when the event happened.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    /// The `form_name` payload field, if any.
    pub fn form_name(&self) -> Option<&str> {
        self.payload.get("form_name").map(String::as_str)
    }
}

/// Event as received from an external producer, before validation.
///
/// Payload values may be any JSON scalar; they are stringified on
/// validation and `null`s are dropped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTriggerEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Map<String, Value>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dedupe_key: Option<String>,
}

impl RawTriggerEvent {
    /// Validate into a [`TriggerEvent`], stamping `now` when `occurred_at` is absent.
    pub fn validate(self, now: DateTime<Utc>) -> Result<TriggerEvent, EventError> {
        let event_type = match self.event_type.as_deref().map(str::trim) {
            None | Some("") => return Err(EventError::MissingEventType),
            Some(raw) => raw.parse::<Trigger>()?,
        };

        let dedupe_key = match self.dedupe_key {
            Some(key) if !key.trim().is_empty() => key,
            _ => return Err(EventError::MissingDedupeKey),
        };

        let payload = self
            .payload
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::Null => None,
                Value::String(s) => Some((k, s)),
                other => Some((k, other.to_string())),
            })
            .collect();

        Ok(TriggerEvent {
            event_type,
            payload,
            occurred_at: self.occurred_at.unwrap_or(now),
            dedupe_key,
        })
    }
}

//! Automation rules: trigger + conditions mapped to a template and recipient policy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::error::{EventError, StoreError};
use crate::template::TemplateId;

/// Identity of an [`AutomationRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Class of business event that can activate a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    FormSubmission,
    UserRegistration,
    TimeBased,
    Manual,
}

impl Trigger {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FormSubmission => "form_submission",
            Self::UserRegistration => "user_registration",
            Self::TimeBased => "time_based",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "form_submission" => Ok(Self::FormSubmission),
            "user_registration" => Ok(Self::UserRegistration),
            "time_based" => Ok(Self::TimeBased),
            "manual" => Ok(Self::Manual),
            other => Err(EventError::UnknownEventType(other.to_string())),
        }
    }
}

/// Who receives the message a rule sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "address", rename_all = "snake_case")]
pub enum RecipientPolicy {
    /// The `email` field of the event payload.
    Submitter,
    /// The configured admin distribution list.
    AdminGroup,
    /// A fixed address chosen by the operator.
    CustomAddress(Address),
}

/// Filter and delivery conditions of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Only match events whose payload `form_name` equals this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_name: Option<String>,
    /// Seconds between matching and first dispatch.
    #[serde(default)]
    pub delay_seconds: u64,
    pub recipient: RecipientPolicy,
}

impl RuleConditions {
    pub fn new(recipient: RecipientPolicy) -> Self {
        Self {
            form_name: None,
            delay_seconds: 0,
            recipient,
        }
    }
}

/// A stored automation rule.
///
/// Rules are created and edited through a [`RuleStore`](crate::RuleStore);
/// `sent_count` and `last_sent_at` only move when a delivery is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub name: String,
    pub trigger: Trigger,
    pub template_id: TemplateId,
    pub conditions: RuleConditions,
    pub is_active: bool,
    pub sent_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
}

/// The operator-editable part of a rule.
///
/// ```
/// use courier::{RecipientPolicy, RuleDraft, TemplateId, Trigger};
///
/// let draft = RuleDraft::new("Contact confirmation", Trigger::FormSubmission, TemplateId::new())
///     .form_name("contact")
///     .recipient(RecipientPolicy::Submitter)
///     .delay_seconds(300);
/// assert!(draft.is_active);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub trigger: Trigger,
    pub template_id: TemplateId,
    pub conditions: RuleConditions,
    pub is_active: bool,
}

impl RuleDraft {
    /// A new active draft sending to the submitter with no delay.
    pub fn new(name: impl Into<String>, trigger: Trigger, template_id: TemplateId) -> Self {
        Self {
            name: name.into(),
            trigger,
            template_id,
            conditions: RuleConditions::new(RecipientPolicy::Submitter),
            is_active: true,
        }
    }

    pub fn form_name(mut self, form_name: impl Into<String>) -> Self {
        self.conditions.form_name = Some(form_name.into());
        self
    }

    pub fn delay_seconds(mut self, seconds: u64) -> Self {
        self.conditions.delay_seconds = seconds;
        self
    }

    pub fn recipient(mut self, policy: RecipientPolicy) -> Self {
        self.conditions.recipient = policy;
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Save-time validation.
    ///
    /// Custom addresses are checked here so that resolution never has to.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidRule("name must not be empty".into()));
        }
        if let Some(form_name) = &self.conditions.form_name {
            if form_name.trim().is_empty() {
                return Err(StoreError::InvalidRule(
                    "form_name filter must not be empty".into(),
                ));
            }
        }
        if let RecipientPolicy::CustomAddress(address) = &self.conditions.recipient {
            address
                .validate()
                .map_err(|e| StoreError::InvalidRule(e.to_string()))?;
        }
        Ok(())
    }
}

//! Delivery jobs and their status machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::event::Payload;
use crate::rule::RuleId;
use crate::template::TemplateId;

/// Identity of a [`DeliveryJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Uniqueness key of a job: the rule id joined with the event's dedupe key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupeKey(String);

impl DedupeKey {
    pub fn new(rule_id: RuleId, event_key: &str) -> Self {
        Self(format!("{rule_id}:{event_key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// pending ──▶ in_flight ──▶ sent ──(bounce callback)──▶ bounced
///    │            │  ├─────▶ retrying ──▶ in_flight
///    │            │  ├─────▶ failed
///    │            │  └─────▶ bounced
///    └────────────┴────────▶ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Sent,
    Retrying,
    Failed,
    Bounced,
    Cancelled,
}

impl JobStatus {
    /// No further transition is possible (ignoring late bounce reports on `sent`).
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Failed | Self::Bounced | Self::Cancelled
        )
    }

    /// The job may be picked up by a worker once due.
    pub const fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Sent => "sent",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive hold on an `in_flight` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
    /// Status before the claim, restored if the claim is released unused.
    pub previous: JobStatus,
}

/// A scheduled send of one rule for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub id: JobId,
    pub rule_id: RuleId,
    pub template_id: TemplateId,
    /// Template version snapshotted at enqueue.
    pub template_version: u32,
    pub dedupe_key: DedupeKey,
    pub payload: Payload,
    /// Filled on first dispatch; empty until then.
    pub resolved_recipients: Vec<Address>,
    pub rendered_subject: Option<String>,
    pub rendered_body: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Retries consumed.
    pub attempt_count: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
}

impl DeliveryJob {
    /// A fresh `pending` job.
    pub fn pending(
        rule_id: RuleId,
        template_id: TemplateId,
        template_version: u32,
        dedupe_key: DedupeKey,
        payload: Payload,
        now: DateTime<Utc>,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            rule_id,
            template_id,
            template_version,
            dedupe_key,
            payload,
            resolved_recipients: Vec::new(),
            rendered_subject: None,
            rendered_body: None,
            scheduled_at,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
            status: JobStatus::Pending,
            last_error: None,
            provider_message_id: None,
            claim: None,
        }
    }

    /// Due for dispatch at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_dispatchable() && self.scheduled_at <= now
    }

    /// Move to `status`, stamping `updated_at` and dropping any claim.
    pub(crate) fn transition(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        self.claim = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_key_joins_rule_and_event() {
        let rule = RuleId::new();
        let key = DedupeKey::new(rule, "sub-1");
        assert_eq!(key.as_str(), format!("{rule}:sub-1"));
        assert_eq!(key, DedupeKey::new(rule, "sub-1"));
        assert_ne!(key, DedupeKey::new(RuleId::new(), "sub-1"));
    }

    #[test]
    fn test_status_classes() {
        assert!(JobStatus::Pending.is_dispatchable());
        assert!(JobStatus::Retrying.is_dispatchable());
        assert!(!JobStatus::InFlight.is_dispatchable());
        for s in [
            JobStatus::Sent,
            JobStatus::Failed,
            JobStatus::Bounced,
            JobStatus::Cancelled,
        ] {
            assert!(s.is_terminal());
            assert!(!s.is_dispatchable());
        }
        assert_eq!(
            serde_json::to_string(&JobStatus::InFlight).unwrap(),
            "\"in_flight\""
        );
    }

    #[test]
    fn test_is_ready() {
        let now = Utc::now();
        let mut job = DeliveryJob::pending(
            RuleId::new(),
            TemplateId::new(),
            1,
            DedupeKey::new(RuleId::new(), "k"),
            Payload::new(),
            now,
            now + chrono::Duration::seconds(10),
        );
        assert!(!job.is_ready(now));
        assert!(job.is_ready(now + chrono::Duration::seconds(10)));
        job.status = JobStatus::Cancelled;
        assert!(!job.is_ready(now + chrono::Duration::seconds(10)));
    }
}

//! Append-only activity log and the statistics derived from it.
//!
//! Every stage writes here: matching, scheduling, dispatch, delivery outcome
//! and provider callbacks. Entries are never edited or removed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::job::JobId;
use crate::rule::RuleId;

/// Lifecycle stage an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Matched,
    Scheduled,
    Dispatched,
    Sent,
    Retried,
    Failed,
    Bounced,
    Opened,
    Clicked,
    Cancelled,
    /// Non-fatal validation problem, such as a missing template variable.
    Warning,
}

impl ActivityKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Scheduled => "scheduled",
            Self::Dispatched => "dispatched",
            Self::Sent => "sent",
            Self::Retried => "retried",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Cancelled => "cancelled",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The message exactly as it was sent, kept with the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSnapshot {
    pub recipients: Vec<Address>,
    pub subject: String,
    pub body: String,
}

/// One log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    /// `None` for stages before a job exists.
    pub job_id: Option<JobId>,
    pub rule_id: Option<RuleId>,
    pub kind: ActivityKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<RenderedSnapshot>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub fn new(kind: ActivityKind, detail: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_id: None,
            rule_id: None,
            kind,
            detail: detail.into(),
            rendered: None,
            timestamp,
        }
    }

    pub fn job(mut self, id: JobId) -> Self {
        self.job_id = Some(id);
        self
    }

    pub fn rule(mut self, id: RuleId) -> Self {
        self.rule_id = Some(id);
        self
    }

    pub fn rendered(mut self, snapshot: RenderedSnapshot) -> Self {
        self.rendered = Some(snapshot);
        self
    }
}

/// Append-only storage for activity entries.
pub trait ActivityLog: Send + Sync {
    fn append(&self, entry: ActivityLogEntry);

    /// All entries in append order.
    fn entries(&self) -> Vec<ActivityLogEntry>;

    /// Entries for one job, in append order.
    fn for_job(&self, id: JobId) -> Vec<ActivityLogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.job_id == Some(id))
            .collect()
    }

    /// Entries stamped at or after `since`.
    fn since(&self, since: DateTime<Utc>) -> Vec<ActivityLogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.timestamp >= since)
            .collect()
    }

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory activity log.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    entries: RwLock<Vec<ActivityLogEntry>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityLog for MemoryActivityLog {
    fn append(&self, entry: ActivityLogEntry) {
        self.entries.write().push(entry);
    }

    fn entries(&self) -> Vec<ActivityLogEntry> {
        self.entries.read().clone()
    }

    fn for_job(&self, id: JobId) -> Vec<ActivityLogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.job_id == Some(id))
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Counts every appended entry in `courier_activity_total`, then hands it to
/// the wrapped log. The engine wraps whichever log it is built with.
pub(crate) struct MeteredActivityLog {
    inner: Arc<dyn ActivityLog>,
}

impl MeteredActivityLog {
    pub(crate) fn new(inner: Arc<dyn ActivityLog>) -> Self {
        Self { inner }
    }
}

impl ActivityLog for MeteredActivityLog {
    fn append(&self, entry: ActivityLogEntry) {
        #[cfg(feature = "metrics")]
        metrics::counter!("courier_activity_total", "kind" => entry.kind.as_str()).increment(1);

        self.inner.append(entry);
    }

    fn entries(&self) -> Vec<ActivityLogEntry> {
        self.inner.entries()
    }

    fn for_job(&self, id: JobId) -> Vec<ActivityLogEntry> {
        self.inner.for_job(id)
    }

    fn since(&self, since: DateTime<Utc>) -> Vec<ActivityLogEntry> {
        self.inner.since(since)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Delivery statistics over a set of entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub matched: u64,
    pub scheduled: u64,
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
    pub bounced: u64,
    pub cancelled: u64,
    pub opened: u64,
    pub clicked: u64,
    /// Distinct jobs opened per job sent.
    pub open_rate: f64,
    /// Distinct jobs clicked per job sent.
    pub click_rate: f64,
}

impl ActivityStats {
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a ActivityLogEntry>,
    {
        let mut stats = Self::default();
        let mut opened_jobs = HashSet::new();
        let mut clicked_jobs = HashSet::new();

        for entry in entries {
            match entry.kind {
                ActivityKind::Matched => stats.matched += 1,
                ActivityKind::Scheduled => stats.scheduled += 1,
                ActivityKind::Sent => stats.sent += 1,
                ActivityKind::Retried => stats.retried += 1,
                ActivityKind::Failed => stats.failed += 1,
                ActivityKind::Bounced => stats.bounced += 1,
                ActivityKind::Cancelled => stats.cancelled += 1,
                ActivityKind::Opened => {
                    stats.opened += 1;
                    if let Some(id) = entry.job_id {
                        opened_jobs.insert(id);
                    }
                }
                ActivityKind::Clicked => {
                    stats.clicked += 1;
                    if let Some(id) = entry.job_id {
                        clicked_jobs.insert(id);
                    }
                }
                ActivityKind::Dispatched | ActivityKind::Warning => {}
            }
        }

        if stats.sent > 0 {
            let sent = stats.sent as f64;
            stats.open_rate = opened_jobs.len() as f64 / sent;
            stats.click_rate = clicked_jobs.len() as f64 / sent;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metered_log_delegates() {
        let inner = Arc::new(MemoryActivityLog::new());
        let metered = MeteredActivityLog::new(inner.clone());
        let job = JobId::new();

        metered.append(ActivityLogEntry::new(ActivityKind::Sent, "", Utc::now()).job(job));
        assert_eq!(inner.len(), 1);
        assert_eq!(metered.for_job(job).len(), 1);
        assert_eq!(metered.entries()[0].kind, ActivityKind::Sent);
    }

    #[test]
    fn test_append_and_query() {
        let log = MemoryActivityLog::new();
        let now = Utc::now();
        let job = JobId::new();

        log.append(ActivityLogEntry::new(ActivityKind::Matched, "rule matched", now));
        log.append(ActivityLogEntry::new(ActivityKind::Scheduled, "", now).job(job));
        log.append(
            ActivityLogEntry::new(ActivityKind::Sent, "", now + chrono::Duration::seconds(5))
                .job(job),
        );

        assert_eq!(log.len(), 3);
        assert_eq!(log.for_job(job).len(), 2);
        assert_eq!(log.since(now + chrono::Duration::seconds(1)).len(), 1);
        assert_eq!(log.entries()[0].kind, ActivityKind::Matched);
    }

    #[test]
    fn test_stats_rates_use_distinct_jobs() {
        let now = Utc::now();
        let a = JobId::new();
        let b = JobId::new();
        let entries = vec![
            ActivityLogEntry::new(ActivityKind::Sent, "", now).job(a),
            ActivityLogEntry::new(ActivityKind::Sent, "", now).job(b),
            ActivityLogEntry::new(ActivityKind::Opened, "", now).job(a),
            ActivityLogEntry::new(ActivityKind::Opened, "", now).job(a),
            ActivityLogEntry::new(ActivityKind::Clicked, "", now).job(a),
            ActivityLogEntry::new(ActivityKind::Failed, "", now),
        ];

        let stats = ActivityStats::from_entries(&entries);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.open_rate - 0.5).abs() < f64::EPSILON);
        assert!((stats.click_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_empty() {
        let stats = ActivityStats::from_entries(&[]);
        assert_eq!(stats, ActivityStats::default());
    }
}

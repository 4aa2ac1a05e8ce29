//! Provider callbacks: bounces, opens and clicks.
//!
//! Callbacks arrive asynchronously, possibly long after the job was sent and
//! in any order. A bounce can still change a job's status; opens and clicks
//! are only appended to the activity log.

use std::sync::Arc;

use crate::activity::{ActivityKind, ActivityLog, ActivityLogEntry};
use crate::clock::Clock;
use crate::config::SettingsHandle;
use crate::job::{JobId, JobStatus};
use crate::queue::JobQueue;

/// How a callback names its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackTarget {
    Job(JobId),
    /// The id the transport returned when the message was accepted.
    ProviderMessageId(String),
}

impl From<JobId> for CallbackTarget {
    fn from(id: JobId) -> Self {
        Self::Job(id)
    }
}

impl From<&str> for CallbackTarget {
    fn from(message_id: &str) -> Self {
        Self::ProviderMessageId(message_id.to_string())
    }
}

impl From<String> for CallbackTarget {
    fn from(message_id: String) -> Self {
        Self::ProviderMessageId(message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackKind {
    Bounce,
    Open,
    Click { url: String },
}

impl CallbackKind {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Bounce => "bounce",
            Self::Open => "open",
            Self::Click { .. } => "click",
        }
    }
}

/// A delivery notification from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCallback {
    pub target: CallbackTarget,
    pub kind: CallbackKind,
    /// Provider-supplied reason or context.
    pub detail: Option<String>,
}

impl ProviderCallback {
    pub fn bounce(target: impl Into<CallbackTarget>) -> Self {
        Self::new(target, CallbackKind::Bounce)
    }

    pub fn open(target: impl Into<CallbackTarget>) -> Self {
        Self::new(target, CallbackKind::Open)
    }

    pub fn click(target: impl Into<CallbackTarget>, url: impl Into<String>) -> Self {
        Self::new(target, CallbackKind::Click { url: url.into() })
    }

    fn new(target: impl Into<CallbackTarget>, kind: CallbackKind) -> Self {
        Self {
            target: target.into(),
            kind,
            detail: None,
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Why a callback changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No job matches the target.
    UnknownJob,
    /// The corresponding setting is switched off.
    Disabled,
    /// The job already reached a final status.
    AlreadyFinal(JobStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Applied(JobId),
    Ignored(IgnoreReason),
}

impl CallbackOutcome {
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Applies provider callbacks to jobs and the activity log.
pub struct TrackingHandler {
    queue: Arc<JobQueue>,
    activity: Arc<dyn ActivityLog>,
    settings: Arc<SettingsHandle>,
    clock: Arc<dyn Clock>,
}

impl TrackingHandler {
    pub fn new(
        queue: Arc<JobQueue>,
        activity: Arc<dyn ActivityLog>,
        settings: Arc<SettingsHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            activity,
            settings,
            clock,
        }
    }

    pub fn handle(&self, callback: ProviderCallback) -> CallbackOutcome {
        let outcome = self.apply(&callback);

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "courier_callbacks_total",
            "kind" => callback.kind.as_str(),
            "applied" => if outcome.is_applied() { "true" } else { "false" },
        )
        .increment(1);

        if let CallbackOutcome::Ignored(reason) = outcome {
            tracing::debug!(
                kind = callback.kind.as_str(),
                target = ?callback.target,
                ?reason,
                "Callback ignored"
            );
        }
        outcome
    }

    fn apply(&self, callback: &ProviderCallback) -> CallbackOutcome {
        let settings = self.settings.snapshot();
        let enabled = match callback.kind {
            CallbackKind::Bounce => settings.bounce_handling_enabled,
            CallbackKind::Open => settings.track_opens,
            CallbackKind::Click { .. } => settings.track_clicks,
        };
        if !enabled {
            return CallbackOutcome::Ignored(IgnoreReason::Disabled);
        }

        let Some(id) = self.resolve(&callback.target) else {
            return CallbackOutcome::Ignored(IgnoreReason::UnknownJob);
        };

        match &callback.kind {
            CallbackKind::Bounce => self.bounce(id, callback.detail.as_deref()),
            CallbackKind::Open => {
                self.append(id, ActivityKind::Opened, callback.detail.clone().unwrap_or_default())
            }
            CallbackKind::Click { url } => self.append(id, ActivityKind::Clicked, url.clone()),
        }
    }

    fn resolve(&self, target: &CallbackTarget) -> Option<JobId> {
        let id = match target {
            CallbackTarget::Job(id) => *id,
            CallbackTarget::ProviderMessageId(message_id) => {
                self.queue.by_provider_message_id(message_id)?
            }
        };
        self.queue.get(id).map(|job| job.id)
    }

    fn bounce(&self, id: JobId, detail: Option<&str>) -> CallbackOutcome {
        let now = self.clock.now();
        let reason = detail.unwrap_or("provider reported a hard bounce").to_string();

        let mut final_status = None;
        let updated = self.queue.update(id, |job| {
            if matches!(
                job.status,
                JobStatus::Failed | JobStatus::Bounced | JobStatus::Cancelled
            ) {
                final_status = Some(job.status);
                return false;
            }
            job.last_error = Some(reason.clone());
            job.transition(JobStatus::Bounced, now);
            true
        });

        let Some(job) = updated else {
            return CallbackOutcome::Ignored(
                final_status.map_or(IgnoreReason::UnknownJob, IgnoreReason::AlreadyFinal),
            );
        };

        tracing::warn!(job_id = %id, rule_id = %job.rule_id, reason = %reason, "Bounce reported");
        self.activity.append(
            ActivityLogEntry::new(ActivityKind::Bounced, reason, now)
                .job(id)
                .rule(job.rule_id),
        );
        CallbackOutcome::Applied(id)
    }

    fn append(&self, id: JobId, kind: ActivityKind, detail: String) -> CallbackOutcome {
        let rule_id = self.queue.get(id).map(|job| job.rule_id);
        let mut entry = ActivityLogEntry::new(kind, detail, self.clock.now()).job(id);
        if let Some(rule_id) = rule_id {
            entry = entry.rule(rule_id);
        }
        tracing::debug!(job_id = %id, kind = %kind, "Tracking event recorded");
        self.activity.append(entry);
        CallbackOutcome::Applied(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::MemoryActivityLog;
    use crate::clock::ManualClock;
    use crate::config::DeliverySettings;
    use crate::event::Payload;
    use crate::job::{DedupeKey, DeliveryJob};
    use crate::rule::RuleId;
    use crate::template::TemplateId;

    struct Fixture {
        queue: Arc<JobQueue>,
        log: Arc<MemoryActivityLog>,
        settings: Arc<SettingsHandle>,
        handler: TrackingHandler,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let queue = Arc::new(JobQueue::new());
        let log = Arc::new(MemoryActivityLog::new());
        let settings = Arc::new(SettingsHandle::default());
        let handler = TrackingHandler::new(queue.clone(), log.clone(), settings.clone(), clock);
        Fixture {
            queue,
            log,
            settings,
            handler,
        }
    }

    fn job_with_status(f: &Fixture, status: JobStatus) -> JobId {
        let rule_id = RuleId::new();
        let now = chrono::Utc::now();
        let mut job = DeliveryJob::pending(
            rule_id,
            TemplateId::new(),
            1,
            DedupeKey::new(rule_id, "k"),
            Payload::new(),
            now,
            now,
        );
        job.status = status;
        job.provider_message_id = Some("msg-1".into());
        let id = f.queue.enqueue(job).job_id();
        f.queue.index_provider_id("msg-1", id);
        id
    }

    #[test]
    fn test_bounce_after_sent() {
        let f = fixture();
        let id = job_with_status(&f, JobStatus::Sent);

        let outcome = f
            .handler
            .handle(ProviderCallback::bounce("msg-1").detail("mailbox does not exist"));
        assert_eq!(outcome, CallbackOutcome::Applied(id));

        let job = f.queue.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Bounced);
        assert_eq!(job.last_error.as_deref(), Some("mailbox does not exist"));
        assert_eq!(f.log.for_job(id)[0].kind, ActivityKind::Bounced);
    }

    #[test]
    fn test_bounce_ignored_for_final_jobs() {
        let f = fixture();
        let id = job_with_status(&f, JobStatus::Cancelled);

        assert_eq!(
            f.handler.handle(ProviderCallback::bounce(id)),
            CallbackOutcome::Ignored(IgnoreReason::AlreadyFinal(JobStatus::Cancelled))
        );
        assert!(f.log.is_empty());
    }

    #[test]
    fn test_bounce_respects_setting() {
        let f = fixture();
        let id = job_with_status(&f, JobStatus::Sent);
        f.settings
            .reload(DeliverySettings {
                bounce_handling_enabled: false,
                ..DeliverySettings::default()
            })
            .unwrap();

        assert_eq!(
            f.handler.handle(ProviderCallback::bounce(id)),
            CallbackOutcome::Ignored(IgnoreReason::Disabled)
        );
        assert_eq!(f.queue.get(id).unwrap().status, JobStatus::Sent);
    }

    #[test]
    fn test_open_and_click_only_log() {
        let f = fixture();
        let id = job_with_status(&f, JobStatus::Sent);

        // Click before open: order does not matter.
        assert!(f
            .handler
            .handle(ProviderCallback::click(id, "https://example.com/a"))
            .is_applied());
        assert!(f.handler.handle(ProviderCallback::open("msg-1")).is_applied());

        let kinds: Vec<_> = f.log.for_job(id).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ActivityKind::Clicked, ActivityKind::Opened]);
        assert_eq!(f.log.for_job(id)[0].detail, "https://example.com/a");
        assert_eq!(f.queue.get(id).unwrap().status, JobStatus::Sent);
    }

    #[test]
    fn test_tracking_flags() {
        let f = fixture();
        let id = job_with_status(&f, JobStatus::Sent);
        f.settings
            .reload(DeliverySettings {
                track_opens: false,
                ..DeliverySettings::default()
            })
            .unwrap();

        assert!(!f.handler.handle(ProviderCallback::open(id)).is_applied());
        assert!(f.handler.handle(ProviderCallback::click(id, "u")).is_applied());
    }

    #[test]
    fn test_unknown_target() {
        let f = fixture();
        assert_eq!(
            f.handler.handle(ProviderCallback::open("nope")),
            CallbackOutcome::Ignored(IgnoreReason::UnknownJob)
        );
        assert_eq!(
            f.handler.handle(ProviderCallback::bounce(JobId::new())),
            CallbackOutcome::Ignored(IgnoreReason::UnknownJob)
        );
    }
}

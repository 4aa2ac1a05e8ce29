//! Scheduler: turns a (rule, event) match into at most one delivery job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::activity::{ActivityKind, ActivityLog, ActivityLogEntry};
use crate::clock::{delta, Clock};
use crate::event::TriggerEvent;
use crate::job::{DedupeKey, DeliveryJob, JobId, JobStatus};
use crate::queue::{EnqueueOutcome, JobQueue};
use crate::rule::{AutomationRule, RuleId};
use crate::store::Store;

/// Result of [`Scheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new `pending` job was created.
    Scheduled(JobId),
    /// A live job for this (rule, event) pair already exists; nothing changed.
    Duplicate(JobId),
    /// The rule's template does not exist; the job was recorded as `failed`.
    Failed(JobId),
}

impl ScheduleOutcome {
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Scheduled(id) | Self::Duplicate(id) | Self::Failed(id) => *id,
        }
    }
}

/// Creates delivery jobs and cancels those whose rule was switched off.
pub struct Scheduler {
    store: Arc<dyn Store>,
    queue: Arc<JobQueue>,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<JobQueue>,
        activity: Arc<dyn ActivityLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            activity,
            clock,
        }
    }

    /// Enqueue the job for `rule` and `event`, unless one already exists.
    ///
    /// The job is due `delay_seconds` from now and renders the template
    /// version current at this moment.
    pub fn schedule(&self, rule: &AutomationRule, event: &TriggerEvent) -> ScheduleOutcome {
        let now = self.clock.now();
        let dedupe_key = DedupeKey::new(rule.id, &event.dedupe_key);
        let scheduled_at = now + delta(Duration::from_secs(rule.conditions.delay_seconds));

        let template = self.store.template(rule.template_id);
        let version = template.as_ref().map_or(0, |t| t.version);

        let mut job = DeliveryJob::pending(
            rule.id,
            rule.template_id,
            version,
            dedupe_key.clone(),
            event.payload.clone(),
            now,
            scheduled_at,
        );
        let failed = template.is_none();
        if failed {
            job.status = JobStatus::Failed;
            job.last_error = Some(format!("template {} not found", rule.template_id));
        }

        match self.queue.enqueue(job) {
            EnqueueOutcome::Duplicate(id) => {
                tracing::debug!(
                    job_id = %id,
                    rule_id = %rule.id,
                    dedupe_key = %dedupe_key,
                    "Job already exists, skipping"
                );
                ScheduleOutcome::Duplicate(id)
            }
            EnqueueOutcome::Created(id) if failed => {
                tracing::warn!(
                    job_id = %id,
                    rule_id = %rule.id,
                    template_id = %rule.template_id,
                    "Rule references a missing template"
                );
                self.activity.append(
                    ActivityLogEntry::new(
                        ActivityKind::Failed,
                        format!("template {} not found", rule.template_id),
                        now,
                    )
                    .job(id)
                    .rule(rule.id),
                );
                ScheduleOutcome::Failed(id)
            }
            EnqueueOutcome::Created(id) => {
                tracing::info!(
                    job_id = %id,
                    rule_id = %rule.id,
                    dedupe_key = %dedupe_key,
                    %scheduled_at,
                    "Job scheduled"
                );
                self.activity.append(
                    ActivityLogEntry::new(
                        ActivityKind::Scheduled,
                        format!("due at {}", scheduled_at.to_rfc3339()),
                        now,
                    )
                    .job(id)
                    .rule(rule.id),
                );
                ScheduleOutcome::Scheduled(id)
            }
        }
    }

    /// Cancel every waiting job whose rule is inactive or gone.
    pub fn sweep_inactive(&self) -> Vec<JobId> {
        let mut active: HashMap<RuleId, bool> = HashMap::new();
        let mut cancelled = Vec::new();

        for job in self.queue.all() {
            if !job.status.is_dispatchable() {
                continue;
            }
            let is_active = *active
                .entry(job.rule_id)
                .or_insert_with(|| self.store.rule(job.rule_id).is_some_and(|r| r.is_active));
            if is_active {
                continue;
            }
            if self.cancel(job.id).is_some() {
                cancelled.push(job.id);
            }
        }
        cancelled
    }

    /// Cancel a job if it is still waiting for dispatch.
    pub(crate) fn cancel(&self, id: JobId) -> Option<DeliveryJob> {
        let now = self.clock.now();
        let job = self.queue.update(id, |job| {
            if !job.status.is_dispatchable() {
                return false;
            }
            job.transition(JobStatus::Cancelled, now);
            true
        })?;

        tracing::info!(job_id = %id, rule_id = %job.rule_id, "Job cancelled, rule inactive");
        self.activity.append(
            ActivityLogEntry::new(ActivityKind::Cancelled, "rule inactive", now)
                .job(id)
                .rule(job.rule_id),
        );
        Some(job)
    }
}

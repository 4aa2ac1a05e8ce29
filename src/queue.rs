//! Concurrent job table with a dedupe index and per-job claims.
//!
//! There is no lock over the whole job set: every mutation goes through a
//! single map entry, and dispatch ownership is a compare-and-swap on the job's
//! status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::clock::delta;
use crate::job::{Claim, DedupeKey, DeliveryJob, JobId, JobStatus};

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The job was stored.
    Created(JobId),
    /// A live job with the same dedupe key already exists.
    Duplicate(JobId),
}

impl EnqueueOutcome {
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Created(id) | Self::Duplicate(id) => *id,
        }
    }

    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// A job held under an exclusive claim.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: DeliveryJob,
    pub token: Uuid,
}

/// Job storage shared by the scheduler, workers and tracking handler.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: DashMap<JobId, DeliveryJob>,
    by_dedupe: DashMap<DedupeKey, JobId>,
    by_provider_id: DashMap<String, JobId>,
}

impl JobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a job unless a non-cancelled job with its dedupe key exists.
    ///
    /// A cancelled job stays in the table for audit but no longer blocks its key.
    pub fn enqueue(&self, job: DeliveryJob) -> EnqueueOutcome {
        match self.by_dedupe.entry(job.dedupe_key.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = *entry.get();
                let live = self
                    .jobs
                    .get(&existing)
                    .is_some_and(|j| j.status != JobStatus::Cancelled);
                if live {
                    return EnqueueOutcome::Duplicate(existing);
                }
                let id = job.id;
                self.jobs.insert(id, job);
                entry.insert(id);
                EnqueueOutcome::Created(id)
            }
            Entry::Vacant(entry) => {
                let id = job.id;
                self.jobs.insert(id, job);
                entry.insert(id);
                EnqueueOutcome::Created(id)
            }
        }
    }

    /// Get a copy of a job.
    pub fn get(&self, id: JobId) -> Option<DeliveryJob> {
        self.jobs.get(&id).map(|entry| entry.value().clone())
    }

    /// The live job for a dedupe key, if any.
    pub fn by_dedupe_key(&self, key: &DedupeKey) -> Option<DeliveryJob> {
        let id = *self.by_dedupe.get(key)?;
        self.get(id)
    }

    /// Ids of jobs due at `now`, earliest `scheduled_at` first.
    pub fn ready(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let mut ready: Vec<_> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().is_ready(now))
            .map(|entry| {
                let job = entry.value();
                (job.scheduled_at, job.created_at, job.id)
            })
            .collect();
        ready.sort();
        ready.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Earliest `scheduled_at` among dispatchable jobs.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .filter(|entry| entry.value().status.is_dispatchable())
            .map(|entry| entry.value().scheduled_at)
            .min()
    }

    /// Take exclusive ownership of a due job, moving it to `in_flight`.
    ///
    /// Returns `None` if the job is not due, not dispatchable, or already claimed.
    pub fn claim(&self, id: JobId, now: DateTime<Utc>, visibility: Duration) -> Option<ClaimedJob> {
        let mut entry = self.jobs.get_mut(&id)?;
        let job = entry.value_mut();
        if !job.is_ready(now) {
            return None;
        }

        let token = Uuid::new_v4();
        job.claim = Some(Claim {
            token,
            expires_at: now + delta(visibility),
            previous: job.status,
        });
        job.status = JobStatus::InFlight;
        job.updated_at = now;

        Some(ClaimedJob {
            job: job.clone(),
            token,
        })
    }

    /// Give a claim back unused, restoring the prior status at a new due time.
    pub fn release(
        &self,
        id: JobId,
        token: Uuid,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        self.update_claimed(id, token, |job| {
            if let Some(claim) = job.claim {
                job.status = claim.previous;
            }
            job.claim = None;
            job.scheduled_at = scheduled_at;
            job.updated_at = now;
        })
        .is_some()
    }

    /// Mutate a job only while `token` still holds its claim.
    ///
    /// Returns the updated job, or `None` if the claim was lost.
    pub fn update_claimed<F>(&self, id: JobId, token: Uuid, f: F) -> Option<DeliveryJob>
    where
        F: FnOnce(&mut DeliveryJob),
    {
        let mut entry = self.jobs.get_mut(&id)?;
        let job = entry.value_mut();
        let holds = job.status == JobStatus::InFlight
            && job.claim.is_some_and(|claim| claim.token == token);
        if !holds {
            return None;
        }
        f(job);
        Some(job.clone())
    }

    /// Mutate a job if `f` accepts it. `f` returns whether it changed anything.
    pub fn update<F>(&self, id: JobId, f: F) -> Option<DeliveryJob>
    where
        F: FnOnce(&mut DeliveryJob) -> bool,
    {
        let mut entry = self.jobs.get_mut(&id)?;
        let job = entry.value_mut();
        f(job).then(|| job.clone())
    }

    /// In-flight jobs whose claim has passed its visibility window.
    pub fn expired_claims(&self, now: DateTime<Utc>) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|entry| {
                let job = entry.value();
                job.status == JobStatus::InFlight
                    && job.claim.is_some_and(|claim| claim.expires_at <= now)
            })
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remember which job a provider message id belongs to.
    pub fn index_provider_id(&self, message_id: impl Into<String>, id: JobId) {
        self.by_provider_id.insert(message_id.into(), id);
    }

    /// Look up a job by the provider's message id.
    pub fn by_provider_message_id(&self, message_id: &str) -> Option<JobId> {
        self.by_provider_id.get(message_id).map(|entry| *entry.value())
    }

    /// Every job, oldest first.
    pub fn all(&self) -> Vec<DeliveryJob> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Number of jobs in `status`.
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs
            .iter()
            .filter(|entry| entry.value().status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use crate::rule::RuleId;
    use crate::template::TemplateId;

    fn job(rule: RuleId, key: &str, now: DateTime<Utc>) -> DeliveryJob {
        DeliveryJob::pending(
            rule,
            TemplateId::new(),
            1,
            DedupeKey::new(rule, key),
            Payload::new(),
            now,
            now,
        )
    }

    #[test]
    fn test_enqueue_dedupes() {
        let queue = JobQueue::new();
        let now = Utc::now();
        let rule = RuleId::new();

        let first = queue.enqueue(job(rule, "sub-1", now));
        let second = queue.enqueue(job(rule, "sub-1", now));
        assert!(first.is_created());
        assert_eq!(second, EnqueueOutcome::Duplicate(first.job_id()));
        assert_eq!(queue.len(), 1);

        assert!(queue.enqueue(job(RuleId::new(), "sub-1", now)).is_created());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_cancelled_job_frees_its_key() {
        let queue = JobQueue::new();
        let now = Utc::now();
        let rule = RuleId::new();

        let first = queue.enqueue(job(rule, "k", now)).job_id();
        queue.update(first, |j| {
            j.transition(JobStatus::Cancelled, now);
            true
        });

        let second = queue.enqueue(job(rule, "k", now));
        assert!(second.is_created());
        assert_ne!(second.job_id(), first);
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.by_dedupe_key(&DedupeKey::new(rule, "k")).unwrap().id,
            second.job_id()
        );
    }

    #[test]
    fn test_claim_is_exclusive() {
        let queue = JobQueue::new();
        let now = Utc::now();
        let id = queue.enqueue(job(RuleId::new(), "k", now)).job_id();

        let claimed = queue.claim(id, now, Duration::from_secs(60)).unwrap();
        assert_eq!(claimed.job.status, JobStatus::InFlight);
        assert!(queue.claim(id, now, Duration::from_secs(60)).is_none());
        assert!(queue.ready(now).is_empty());
    }

    #[test]
    fn test_release_restores_previous_status() {
        let queue = JobQueue::new();
        let now = Utc::now();
        let id = queue.enqueue(job(RuleId::new(), "k", now)).job_id();
        let claimed = queue.claim(id, now, Duration::from_secs(60)).unwrap();

        let later = now + chrono::Duration::seconds(30);
        assert!(queue.release(id, claimed.token, later, now));
        let job = queue.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.scheduled_at, later);
        assert!(job.claim.is_none());
    }

    #[test]
    fn test_stale_token_cannot_update() {
        let queue = JobQueue::new();
        let now = Utc::now();
        let id = queue.enqueue(job(RuleId::new(), "k", now)).job_id();
        let _ = queue.claim(id, now, Duration::from_secs(60)).unwrap();

        assert!(queue
            .update_claimed(id, Uuid::new_v4(), |j| j.status = JobStatus::Sent)
            .is_none());
        assert_eq!(queue.get(id).unwrap().status, JobStatus::InFlight);
    }

    #[test]
    fn test_ready_orders_by_schedule() {
        let queue = JobQueue::new();
        let now = Utc::now();
        let rule = RuleId::new();

        let mut late = job(rule, "late", now);
        late.scheduled_at = now - chrono::Duration::seconds(1);
        let mut early = job(rule, "early", now);
        early.scheduled_at = now - chrono::Duration::seconds(10);
        let mut future = job(rule, "future", now);
        future.scheduled_at = now + chrono::Duration::seconds(10);

        let late_id = queue.enqueue(late).job_id();
        let early_id = queue.enqueue(early).job_id();
        queue.enqueue(future);

        assert_eq!(queue.ready(now), vec![early_id, late_id]);
        assert_eq!(queue.next_due(), Some(now - chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_expired_claims() {
        let queue = JobQueue::new();
        let now = Utc::now();
        let id = queue.enqueue(job(RuleId::new(), "k", now)).job_id();
        queue.claim(id, now, Duration::from_secs(60)).unwrap();

        assert!(queue.expired_claims(now).is_empty());
        assert_eq!(
            queue.expired_claims(now + chrono::Duration::seconds(60)),
            vec![id]
        );
    }

    #[test]
    fn test_provider_id_index() {
        let queue = JobQueue::new();
        let id = JobId::new();
        queue.index_provider_id("re_123", id);
        assert_eq!(queue.by_provider_message_id("re_123"), Some(id));
        assert_eq!(queue.by_provider_message_id("re_456"), None);
    }
}

//! Delivery workers.
//!
//! A [`DeliveryWorker`] owns the single dispatch path: claim a due job,
//! re-check its rule, render and resolve (first attempt only), pass the rate
//! limiter, send under a timeout, and record the outcome. A [`WorkerPool`]
//! runs several of them as tokio tasks that wake on a timer tick or when new
//! work is scheduled.
//!
//! Retry policy: a transient failure consumes one retry while
//! `attempt_count < retry_attempts` and re-queues the job after the fixed
//! `retry_delay_seconds`; once the budget is spent the job fails. Hard
//! bounces and permanent rejections are never retried.

use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "metrics")]
use std::time::Instant;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::activity::{ActivityKind, ActivityLog, ActivityLogEntry, RenderedSnapshot};
use crate::address::Address;
use crate::clock::{delta, Clock};
use crate::config::{DeliverySettings, EngineConfig, SettingsHandle};
use crate::error::{StoreError, TransportError};
use crate::job::{DeliveryJob, JobId, JobStatus};
use crate::message::{OutboundMessage, TrackingOptions};
use crate::queue::{ClaimedJob, JobQueue};
use crate::rate_limiter::{Admission, RateLimiter};
use crate::recipient;
use crate::rule::AutomationRule;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::template::render;
use crate::transport::{SendReceipt, Transport};

/// What one dispatch did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Retrying,
    Failed,
    Bounced,
    Cancelled,
    /// The rate limiter refused; the job is due again after this long.
    Deferred(Duration),
    /// The job was not due, already claimed, or the claim was lost.
    Skipped,
}

/// Summary of one [`DeliveryWorker::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Expired claims turned into retries or failures.
    pub recovered: usize,
    pub cancelled: usize,
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
    pub bounced: usize,
    pub deferred: usize,
}

impl TickReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Retrying => self.retrying += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::Bounced => self.bounced += 1,
            DispatchOutcome::Cancelled => self.cancelled += 1,
            DispatchOutcome::Deferred(_) => self.deferred += 1,
            DispatchOutcome::Skipped => {}
        }
    }

    /// Jobs that reached the transport this tick.
    pub fn attempted(&self) -> usize {
        self.sent + self.retrying + self.failed + self.bounced
    }
}

struct Prepared {
    subject: String,
    body: String,
    recipients: Vec<Address>,
    missing: Vec<String>,
}

/// The dispatch path shared by every worker task.
pub struct DeliveryWorker {
    store: Arc<dyn Store>,
    queue: Arc<JobQueue>,
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    settings: Arc<SettingsHandle>,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl DeliveryWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<JobQueue>,
        scheduler: Arc<Scheduler>,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        settings: Arc<SettingsHandle>,
        activity: Arc<dyn ActivityLog>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            scheduler,
            transport,
            limiter,
            settings,
            activity,
            clock,
            config,
        }
    }

    /// One scheduling pass: recover expired claims, cancel jobs of inactive
    /// rules, then dispatch every due job in `scheduled_at` order.
    ///
    /// Stops dispatching at the first rate-limit deferral; the remaining jobs
    /// stay due for the next tick.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport {
            recovered: self.recover_expired(),
            cancelled: self.scheduler.sweep_inactive().len(),
            ..TickReport::default()
        };

        for id in self.queue.ready(self.clock.now()) {
            let outcome = self.dispatch(id).await;
            report.record(outcome);
            if matches!(outcome, DispatchOutcome::Deferred(_)) {
                break;
            }
        }
        report
    }

    /// Claim and attempt one job.
    pub async fn dispatch(&self, id: JobId) -> DispatchOutcome {
        let now = self.clock.now();
        let Some(ClaimedJob { job, token }) =
            self.queue.claim(id, now, self.config.visibility_timeout)
        else {
            return DispatchOutcome::Skipped;
        };

        let span = tracing::info_span!(
            "courier.dispatch",
            job_id = %id,
            rule_id = %job.rule_id,
            dedupe_key = %job.dedupe_key,
            attempt = job.attempt_count + 1,
        );
        self.dispatch_claimed(job, token).instrument(span).await
    }

    async fn dispatch_claimed(&self, mut job: DeliveryJob, token: Uuid) -> DispatchOutcome {
        let settings = self.settings.snapshot();

        let rule = match self.store.rule(job.rule_id) {
            Some(rule) if rule.is_active => rule,
            _ => {
                tracing::info!("Rule inactive at dispatch, cancelling");
                return self.conclude(&job, token, JobStatus::Cancelled, "rule inactive".into());
            }
        };

        if job.rendered_subject.is_none() {
            let prepared = match self.prepare(&rule, &job) {
                Ok(prepared) => prepared,
                Err(reason) => {
                    tracing::warn!(error = %reason, "Job failed validation");
                    return self.conclude(&job, token, JobStatus::Failed, reason);
                }
            };
            if !prepared.missing.is_empty() {
                let detail = format!("missing template variables: {}", prepared.missing.join(", "));
                tracing::warn!(missing = ?prepared.missing, "Sending with unfilled placeholders");
                self.record(&job, ActivityKind::Warning, detail);
            }

            job.rendered_subject = Some(prepared.subject);
            job.rendered_body = Some(prepared.body);
            job.resolved_recipients = prepared.recipients;
            let stored = self.queue.update_claimed(job.id, token, |j| {
                j.rendered_subject.clone_from(&job.rendered_subject);
                j.rendered_body.clone_from(&job.rendered_body);
                j.resolved_recipients.clone_from(&job.resolved_recipients);
            });
            if stored.is_none() {
                return DispatchOutcome::Skipped;
            }
        }

        if let Admission::Wait(wait) = self.limiter.acquire() {
            let now = self.clock.now();
            self.queue.release(job.id, token, now + delta(wait), now);

            #[cfg(feature = "metrics")]
            metrics::counter!("courier_rate_limited_total").increment(1);

            tracing::debug!(wait_seconds = wait.as_secs(), "Send deferred by rate limiter");
            return DispatchOutcome::Deferred(wait);
        }

        self.record(&job, ActivityKind::Dispatched, format!("attempt {}", job.attempt_count + 1));
        let message = self.build_message(&job, &settings);
        let result = self.send(&message).await;
        let now = self.clock.now();

        match result {
            Ok(receipt) => self.mark_sent(&job, token, receipt),
            Err(error) if error.is_transient() => {
                if job.attempt_count < settings.retry_attempts {
                    let next = now + delta(settings.retry_delay());
                    let attempt = job.attempt_count + 1;
                    let updated = self.queue.update_claimed(job.id, token, |j| {
                        j.attempt_count = attempt;
                        j.last_error = Some(error.to_string());
                        j.scheduled_at = next;
                        j.transition(JobStatus::Retrying, now);
                    });
                    if updated.is_none() {
                        return DispatchOutcome::Skipped;
                    }
                    tracing::warn!(
                        error = %error,
                        retry = attempt,
                        retry_attempts = settings.retry_attempts,
                        next_attempt_at = %next,
                        "Transient send failure, retrying"
                    );
                    self.record(
                        &job,
                        ActivityKind::Retried,
                        format!("retry {attempt} of {} after: {error}", settings.retry_attempts),
                    );
                    DispatchOutcome::Retrying
                } else {
                    tracing::error!(error = %error, "Retries exhausted");
                    self.conclude(&job, token, JobStatus::Failed, error.to_string())
                }
            }
            Err(error) if error.is_bounce() => {
                tracing::warn!(error = %error, "Hard bounce");
                self.conclude(&job, token, JobStatus::Bounced, error.to_string())
            }
            Err(error) => {
                tracing::error!(error = %error, "Permanent send failure");
                self.conclude(&job, token, JobStatus::Failed, error.to_string())
            }
        }
    }

    /// Render the snapshotted template and resolve recipients.
    fn prepare(&self, rule: &AutomationRule, job: &DeliveryJob) -> Result<Prepared, String> {
        let template = self
            .store
            .template_version(job.template_id, job.template_version)
            .ok_or_else(|| StoreError::TemplateNotFound(job.template_id).to_string())?;

        let rendered = render(&template, &job.payload);
        let missing: Vec<String> = rendered
            .missing_declared(&template)
            .map(str::to_string)
            .collect();
        if !missing.is_empty() && self.config.strict_variables {
            return Err(format!("missing template variables: {}", missing.join(", ")));
        }

        let recipients = recipient::resolve(rule, &job.payload, &self.config.admin_groups)
            .map_err(|e| e.to_string())?;

        Ok(Prepared {
            subject: rendered.subject,
            body: rendered.body,
            recipients,
            missing,
        })
    }

    fn build_message(&self, job: &DeliveryJob, settings: &DeliverySettings) -> OutboundMessage {
        let mut message = OutboundMessage::new()
            .put_to(job.resolved_recipients.clone())
            .subject(job.rendered_subject.clone().unwrap_or_default())
            .body(job.rendered_body.clone().unwrap_or_default())
            .idempotency_key(job.dedupe_key.as_str())
            .tag("rule_id", job.rule_id.to_string())
            .header("X-Courier-Job-Id", job.id.to_string())
            .tracking(TrackingOptions {
                opens: settings.track_opens,
                clicks: settings.track_clicks,
            });
        if let Some(sender) = &self.config.sender {
            message = message.from(&sender.from);
            if let Some(reply_to) = &sender.reply_to {
                message = message.reply_to(reply_to);
            }
        }
        message
    }

    /// Send through the transport under the configured timeout.
    pub(crate) async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let timeout = self.config.send_timeout;
        let result = match tokio::time::timeout(timeout, self.transport.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        #[cfg(feature = "metrics")]
        {
            let provider = self.transport.provider_name();
            let status = match &result {
                Ok(_) => "success",
                Err(e) if e.is_transient() => "transient",
                Err(e) if e.is_bounce() => "bounce",
                Err(_) => "error",
            };
            metrics::counter!("courier_sends_total", "provider" => provider, "status" => status)
                .increment(1);
            metrics::histogram!("courier_send_duration_seconds", "provider" => provider)
                .record(start.elapsed().as_secs_f64());
        }

        result
    }

    pub(crate) fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub(crate) fn sender(&self) -> Option<&crate::config::Sender> {
        self.config.sender.as_ref()
    }

    fn mark_sent(&self, job: &DeliveryJob, token: Uuid, receipt: SendReceipt) -> DispatchOutcome {
        let now = self.clock.now();
        self.queue.index_provider_id(receipt.message_id.clone(), job.id);

        // A late success still beats a retry that has not started yet.
        let updated = self.queue.update(job.id, |j| {
            let ours =
                j.status == JobStatus::InFlight && j.claim.is_some_and(|c| c.token == token);
            if !ours && !j.status.is_dispatchable() {
                return false;
            }
            j.provider_message_id = Some(receipt.message_id.clone());
            j.last_error = None;
            j.transition(JobStatus::Sent, now);
            true
        });
        if updated.is_none() {
            tracing::warn!(
                message_id = %receipt.message_id,
                "Send succeeded after the job was reclaimed"
            );
            return DispatchOutcome::Skipped;
        }

        if let Err(e) = self.store.record_sent(job.rule_id, now) {
            tracing::warn!(error = %e, "Could not update rule counters");
        }

        tracing::info!(
            message_id = %receipt.message_id,
            recipients = job.resolved_recipients.len(),
            "Job sent"
        );
        self.activity.append(
            ActivityLogEntry::new(
                ActivityKind::Sent,
                format!("provider message id {}", receipt.message_id),
                now,
            )
            .job(job.id)
            .rule(job.rule_id)
            .rendered(RenderedSnapshot {
                recipients: job.resolved_recipients.clone(),
                subject: job.rendered_subject.clone().unwrap_or_default(),
                body: job.rendered_body.clone().unwrap_or_default(),
            }),
        );
        DispatchOutcome::Sent
    }

    /// Move a claimed job to a final status and log it.
    fn conclude(
        &self,
        job: &DeliveryJob,
        token: Uuid,
        status: JobStatus,
        reason: String,
    ) -> DispatchOutcome {
        let now = self.clock.now();
        let updated = self.queue.update_claimed(job.id, token, |j| {
            j.last_error = Some(reason.clone());
            j.transition(status, now);
        });
        if updated.is_none() {
            return DispatchOutcome::Skipped;
        }

        let (kind, outcome) = match status {
            JobStatus::Cancelled => (ActivityKind::Cancelled, DispatchOutcome::Cancelled),
            JobStatus::Bounced => (ActivityKind::Bounced, DispatchOutcome::Bounced),
            _ => (ActivityKind::Failed, DispatchOutcome::Failed),
        };
        self.record(job, kind, reason);
        outcome
    }

    /// Treat in-flight jobs whose claim expired as transient failures.
    pub fn recover_expired(&self) -> usize {
        let now = self.clock.now();
        let settings = self.settings.snapshot();
        let mut recovered = 0;

        for id in self.queue.expired_claims(now) {
            let Some(job) = self.queue.update(id, |j| {
                let expired = j.status == JobStatus::InFlight
                    && j.claim.is_some_and(|c| c.expires_at <= now);
                if !expired {
                    return false;
                }
                j.last_error = Some("claim expired before the attempt completed".into());
                if j.attempt_count < settings.retry_attempts {
                    j.attempt_count += 1;
                    j.scheduled_at = now;
                    j.transition(JobStatus::Retrying, now);
                } else {
                    j.transition(JobStatus::Failed, now);
                }
                true
            }) else {
                continue;
            };

            recovered += 1;
            tracing::warn!(job_id = %id, status = %job.status, "Claim expired");
            let kind = if job.status == JobStatus::Retrying {
                ActivityKind::Retried
            } else {
                ActivityKind::Failed
            };
            self.record(&job, kind, "claim expired before the attempt completed");
        }
        recovered
    }

    fn record(&self, job: &DeliveryJob, kind: ActivityKind, detail: impl Into<String>) {
        self.activity.append(
            ActivityLogEntry::new(kind, detail, self.clock.now())
                .job(job.id)
                .rule(job.rule_id),
        );
    }
}

/// Worker tasks sharing one [`DeliveryWorker`].
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    wake: Arc<Notify>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` tasks that tick every `tick_interval` or when `wake` fires.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        worker: Arc<DeliveryWorker>,
        count: usize,
        tick_interval: Duration,
        wake: Arc<Notify>,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);

        let handles = (0..count.max(1))
            .map(|n| {
                let worker = Arc::clone(&worker);
                let wake = Arc::clone(&wake);
                let mut rx = rx.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker = n, "Delivery worker started");
                    loop {
                        let report = worker.tick().await;
                        if report != TickReport::default() {
                            tracing::debug!(worker = n, ?report, "Tick complete");
                        }
                        tokio::select! {
                            _ = rx.changed() => break,
                            _ = wake.notified() => {}
                            _ = tokio::time::sleep(tick_interval) => {}
                        }
                    }
                    tracing::debug!(worker = n, "Delivery worker stopped");
                })
            })
            .collect();

        Self {
            shutdown,
            wake,
            handles,
        }
    }

    /// Wake idle workers now.
    pub fn wake(&self) {
        self.wake.notify_waiters();
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Signal every task to stop and wait for in-progress ticks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Delivery worker task failed");
            }
        }
    }
}

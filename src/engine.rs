//! The engine facade: one value that wires stores, queue, workers and tracking.
//!
//! ```rust,ignore
//! use courier::{Engine, EngineConfig, MemoryStore, Sender, TriggerEvent, Trigger};
//! use courier::transports::LocalTransport;
//!
//! let engine = Engine::builder()
//!     .store(MemoryStore::shared())
//!     .transport(LocalTransport::new())
//!     .config(EngineConfig::default().sender(Sender::new("noreply@example.com")))
//!     .build()?;
//!
//! engine.ingest(&TriggerEvent::new(Trigger::FormSubmission, "sub-1")
//!     .field("email", "a@x.com"));
//! engine.tick().await;
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::activity::{
    ActivityKind, ActivityLog, ActivityLogEntry, ActivityStats, MemoryActivityLog,
    MeteredActivityLog, RenderedSnapshot,
};
use crate::address::ToAddress;
use crate::clock::{Clock, SystemClock};
use crate::config::{DeliverySettings, EngineConfig, SettingsHandle};
use crate::error::{EngineError, StoreError};
use crate::event::{Payload, RawTriggerEvent, TriggerEvent};
use crate::job::{DeliveryJob, JobId};
use crate::matcher::matching_rules;
use crate::message::{OutboundMessage, TrackingOptions};
use crate::queue::JobQueue;
use crate::rate_limiter::{Admission, RateLimitStats, RateLimiter};
use crate::rule::{RuleId, Trigger};
use crate::scheduler::{ScheduleOutcome, Scheduler};
use crate::store::{MemoryStore, Store};
use crate::template::{render, TemplateId};
use crate::tracking::{CallbackOutcome, ProviderCallback, TrackingHandler};
use crate::transport::{SendReceipt, Transport};
use crate::worker::{DeliveryWorker, TickReport, WorkerPool};

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    store: Option<Arc<dyn Store>>,
    transport: Option<Arc<dyn Transport>>,
    activity: Option<Arc<dyn ActivityLog>>,
    clock: Option<Arc<dyn Clock>>,
    settings: DeliverySettings,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded from environment variables.
    ///
    /// Reads delivery settings, the sender identity, admin addresses and the
    /// transport (see the crate docs for the variable list).
    pub fn from_env() -> Result<Self, EngineError> {
        let settings = DeliverySettings::from_env()?;
        let sender = crate::config::Sender::from_env()?;
        let admins = crate::config::AdminGroups::from_env()?;
        let transport = crate::transport_from_env()?;

        Ok(Self::new()
            .settings(settings)
            .config(EngineConfig::default().sender(sender).admin_groups(admins))
            .shared_transport(transport))
    }

    pub fn store<S: Store + 'static>(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn activity<L: ActivityLog + 'static>(mut self, log: Arc<L>) -> Self {
        self.activity = Some(log);
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: Arc<C>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn settings(mut self, settings: DeliverySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate everything and assemble the engine.
    ///
    /// A transport and a sender are required. The store and activity log
    /// default to the in-memory implementations, the clock to the system clock.
    pub fn build(self) -> Result<Engine, EngineError> {
        let transport = self.transport.ok_or(EngineError::NotConfigured("transport"))?;
        transport.validate_config()?;
        self.settings.validate()?;
        self.config.validate()?;
        if self.config.sender.is_none() {
            return Err(EngineError::NotConfigured("sender"));
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let store = self.store.unwrap_or_else(|| {
            Arc::new(MemoryStore::with_clock(Arc::clone(&clock))) as Arc<dyn Store>
        });
        let activity: Arc<dyn ActivityLog> = Arc::new(MeteredActivityLog::new(
            self.activity
                .unwrap_or_else(|| Arc::new(MemoryActivityLog::new()) as Arc<dyn ActivityLog>),
        ));

        let queue = Arc::new(JobQueue::new());
        let limiter = Arc::new(RateLimiter::with_clock(
            self.settings.rate_limit_per_hour,
            Arc::clone(&clock),
        ));
        let settings = Arc::new(SettingsHandle::new(self.settings));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&activity),
            Arc::clone(&clock),
        ));
        let worker = Arc::new(DeliveryWorker::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&scheduler),
            Arc::clone(&transport),
            Arc::clone(&limiter),
            Arc::clone(&settings),
            Arc::clone(&activity),
            Arc::clone(&clock),
            self.config.clone(),
        ));
        let tracking = TrackingHandler::new(
            Arc::clone(&queue),
            Arc::clone(&activity),
            Arc::clone(&settings),
            Arc::clone(&clock),
        );

        tracing::info!(
            provider = transport.provider_name(),
            workers = self.config.worker_count,
            rate_limit_per_hour = settings.snapshot().rate_limit_per_hour,
            "Engine ready"
        );

        Ok(Engine {
            store,
            queue,
            activity,
            clock,
            settings,
            limiter,
            scheduler,
            worker,
            tracking,
            config: self.config,
            wake: Arc::new(Notify::new()),
        })
    }
}

/// Form-triggered notification engine.
pub struct Engine {
    store: Arc<dyn Store>,
    queue: Arc<JobQueue>,
    activity: Arc<dyn ActivityLog>,
    clock: Arc<dyn Clock>,
    settings: Arc<SettingsHandle>,
    limiter: Arc<RateLimiter>,
    scheduler: Arc<Scheduler>,
    worker: Arc<DeliveryWorker>,
    tracking: TrackingHandler,
    config: EngineConfig,
    wake: Arc<Notify>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Match an event against every rule and schedule one job per match.
    ///
    /// Re-ingesting the same event yields [`ScheduleOutcome::Duplicate`] for
    /// rules that already have a job.
    pub fn ingest(&self, event: &TriggerEvent) -> Vec<ScheduleOutcome> {
        let _span = tracing::info_span!(
            "courier.ingest",
            event_type = %event.event_type,
            dedupe_key = %event.dedupe_key,
        )
        .entered();

        let rules = self.store.rules();
        let matched = matching_rules(event, &rules);
        if matched.is_empty() {
            tracing::debug!("No rule matched");
            return Vec::new();
        }

        let now = self.clock.now();
        let outcomes: Vec<_> = matched
            .into_iter()
            .map(|rule| {
                tracing::debug!(rule_id = %rule.id, rule = %rule.name, "Rule matched");
                self.activity.append(
                    ActivityLogEntry::new(
                        ActivityKind::Matched,
                        format!(
                            "{} event {} matched '{}'",
                            event.event_type, event.dedupe_key, rule.name
                        ),
                        now,
                    )
                    .rule(rule.id),
                );
                self.scheduler.schedule(rule, event)
            })
            .collect();

        if outcomes
            .iter()
            .any(|o| matches!(o, ScheduleOutcome::Scheduled(_)))
        {
            self.wake.notify_waiters();
        }
        outcomes
    }

    /// Validate an event in its wire shape, then [`ingest`](Self::ingest) it.
    ///
    /// A malformed event is logged and rejected; nothing is scheduled.
    pub fn ingest_raw(&self, raw: RawTriggerEvent) -> Result<Vec<ScheduleOutcome>, EngineError> {
        let now = self.clock.now();
        match raw.validate(now) {
            Ok(event) => Ok(self.ingest(&event)),
            Err(e) => {
                tracing::warn!(error = %e, "Event rejected");
                self.activity.append(ActivityLogEntry::new(
                    ActivityKind::Failed,
                    format!("matched: event rejected: {e}"),
                    now,
                ));
                Err(e.into())
            }
        }
    }

    /// Fire the `manual` trigger with `payload`.
    pub fn trigger_manual(
        &self,
        payload: Payload,
        dedupe_key: impl Into<String>,
    ) -> Vec<ScheduleOutcome> {
        let event = TriggerEvent::new(Trigger::Manual, dedupe_key)
            .payload(payload)
            .occurred_at(self.clock.now());
        self.ingest(&event)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Run one scheduling pass on the calling task.
    pub async fn tick(&self) -> TickReport {
        self.worker.tick().await
    }

    /// Spawn `worker_count` background workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_workers(&self) -> WorkerPool {
        WorkerPool::spawn(
            Arc::clone(&self.worker),
            self.config.worker_count,
            self.config.tick_interval,
            Arc::clone(&self.wake),
        )
    }

    /// Render a template and send it now, outside any rule or job.
    ///
    /// Goes through the rate limiter like every other send.
    pub async fn send_test(
        &self,
        template_id: TemplateId,
        to: impl ToAddress,
        payload: &Payload,
    ) -> Result<SendReceipt, EngineError> {
        let template = self
            .store
            .template(template_id)
            .ok_or(StoreError::TemplateNotFound(template_id))?;
        let to = to.to_address();
        to.validate()?;

        if let Admission::Wait(wait) = self.worker.limiter().acquire() {
            return Err(EngineError::RateLimited(wait));
        }

        let rendered = render(&template, payload);
        let settings = self.settings.snapshot();
        let mut message = OutboundMessage::new()
            .to(&to)
            .subject(rendered.subject.clone())
            .body(rendered.body.clone())
            .tag("template_id", template_id.to_string())
            .tracking(TrackingOptions {
                opens: settings.track_opens,
                clicks: settings.track_clicks,
            });
        if let Some(sender) = self.worker.sender() {
            message = message.from(&sender.from);
            if let Some(reply_to) = &sender.reply_to {
                message = message.reply_to(reply_to);
            }
        }

        let result = self.worker.send(&message).await;
        let now = self.clock.now();
        match &result {
            Ok(receipt) => {
                tracing::info!(template_id = %template_id, to = %to.email, "Test message sent");
                self.activity.append(
                    ActivityLogEntry::new(
                        ActivityKind::Sent,
                        format!(
                            "test send of template {template_id}, provider message id {}",
                            receipt.message_id
                        ),
                        now,
                    )
                    .rendered(RenderedSnapshot {
                        recipients: vec![to],
                        subject: rendered.subject,
                        body: rendered.body,
                    }),
                );
            }
            Err(e) => {
                tracing::warn!(template_id = %template_id, error = %e, "Test send failed");
                self.activity.append(ActivityLogEntry::new(
                    ActivityKind::Failed,
                    format!("test send of template {template_id}: {e}"),
                    now,
                ));
            }
        }
        Ok(result?)
    }

    // =========================================================================
    // Operator actions
    // =========================================================================

    /// Apply a provider bounce, open or click notification.
    pub fn handle_callback(&self, callback: ProviderCallback) -> CallbackOutcome {
        self.tracking.handle(callback)
    }

    /// Validate and swap in new delivery settings.
    ///
    /// Dispatches already in progress keep the settings they started with.
    pub fn reload_settings(&self, settings: DeliverySettings) -> Result<(), EngineError> {
        let limit = settings.rate_limit_per_hour;
        self.settings.reload(settings)?;
        self.limiter.set_limit(limit);
        Ok(())
    }

    /// Turn a rule on or off. Switching it off cancels its waiting jobs now.
    pub fn set_rule_active(&self, id: RuleId, active: bool) -> Result<Vec<JobId>, EngineError> {
        self.store.set_active(id, active)?;
        if active {
            return Ok(Vec::new());
        }
        Ok(self.scheduler.sweep_inactive())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Rule and template store, for operator CRUD.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> Arc<DeliverySettings> {
        self.settings.snapshot()
    }

    pub fn job(&self, id: JobId) -> Option<DeliveryJob> {
        self.queue.get(id)
    }

    /// Every job, oldest first.
    pub fn jobs(&self) -> Vec<DeliveryJob> {
        self.queue.all()
    }

    pub fn activity(&self) -> Vec<ActivityLogEntry> {
        self.activity.entries()
    }

    pub fn activity_for(&self, id: JobId) -> Vec<ActivityLogEntry> {
        self.activity.for_job(id)
    }

    pub fn stats(&self) -> ActivityStats {
        ActivityStats::from_entries(&self.activity.entries())
    }

    /// Statistics over entries stamped at or after `since`.
    pub fn stats_since(&self, since: DateTime<Utc>) -> ActivityStats {
        ActivityStats::from_entries(&self.activity.since(since))
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.limiter.stats()
    }
}

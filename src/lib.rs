//! # Courier
//!
//! Form-triggered email automation. Business events (form submissions,
//! registrations, timers, manual runs) are matched against automation rules;
//! each match schedules one delivery job that is rendered from a template,
//! admitted by an hourly rate limiter, sent through a pluggable transport,
//! retried on transient failure, and tracked through provider callbacks.
//!
//! ## Quick Start
//!
//! Set environment variables:
//! ```bash
//! EMAIL_PROVIDER=resend
//! RESEND_API_KEY=re_xxxxx
//! EMAIL_FROM=noreply@example.com
//! EMAIL_FROM_NAME=My Company
//! ADMIN_EMAILS=info@example.com
//! ```
//!
//! Build an engine, add a rule, and feed it events:
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! let engine = EngineBuilder::from_env()?.build()?;
//!
//! let template = engine.store().create_template(TemplateDraft::new(
//!     "Contact confirmation",
//!     TemplateKind::FormConfirmation,
//!     "Thanks, {{name}}",
//!     "We received your message and will reply soon.",
//! ))?;
//! engine.store().create_rule(
//!     RuleDraft::new("Confirm contact form", Trigger::FormSubmission, template.id)
//!         .form_name("contact"),
//! )?;
//!
//! let workers = engine.spawn_workers();
//! engine.ingest(
//!     &TriggerEvent::new(Trigger::FormSubmission, "submission-42")
//!         .field("form_name", "contact")
//!         .field("name", "Ann")
//!         .field("email", "ann@example.com"),
//! );
//! // ...
//! workers.shutdown().await;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `EMAIL_PROVIDER` | `resend`, `local`, `logger`, `logger_full` |
//! | `RESEND_API_KEY` | Resend API key |
//! | `EMAIL_FROM` | Sender email (required by [`EngineBuilder::from_env`]) |
//! | `EMAIL_FROM_NAME` | Sender display name |
//! | `EMAIL_REPLY_TO` | Reply-to address |
//! | `ADMIN_EMAILS` | Comma-separated admin distribution list |
//! | `DELIVERY_RATE_LIMIT_PER_HOUR` | Sends per rolling hour (default: 100) |
//! | `DELIVERY_RETRY_ATTEMPTS` | Retries after a transient failure (default: 3) |
//! | `DELIVERY_RETRY_DELAY_SECONDS` | Fixed delay between attempts (default: 300) |
//! | `DELIVERY_BOUNCE_HANDLING` | Process bounce callbacks (default: true) |
//! | `DELIVERY_TRACK_OPENS` | Record opens (default: true) |
//! | `DELIVERY_TRACK_CLICKS` | Record clicks (default: true) |
//!
//! ## Feature Flags
//!
//! - `resend` - Resend API transport
//! - `local` - LocalTransport and the [`testing`] helpers (default)
//! - `metrics` - Prometheus-style metrics (counters/histograms)
//! - `full` - all of the above
//!
//! ## Metrics
//!
//! Enable `features = ["metrics"]` to emit:
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `courier_activity_total` | Counter | kind | Activity log entries |
//! | `courier_sends_total` | Counter | provider, status | Transport attempts |
//! | `courier_send_duration_seconds` | Histogram | provider | Transport latency |
//! | `courier_rate_limited_total` | Counter | | Sends deferred by the rate limiter |
//! | `courier_callbacks_total` | Counter | kind, applied | Provider callbacks |
//!
//! Install a recorder (e.g., `metrics-exporter-prometheus`) in your app to collect them.

/// The version of the courier crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod activity;
mod address;
mod clock;
mod config;
mod engine;
mod error;
mod event;
mod job;
mod matcher;
mod message;
mod queue;
mod rate_limiter;
mod recipient;
mod rule;
mod scheduler;
mod store;
mod template;
mod tracking;
mod transport;
mod worker;

pub mod transports;

#[cfg(feature = "local")]
pub mod testing;

use std::env;
use std::sync::Arc;

// Re-exports
pub use activity::{
    ActivityKind, ActivityLog, ActivityLogEntry, ActivityStats, MemoryActivityLog,
    RenderedSnapshot,
};
pub use address::{Address, ToAddress};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AdminGroups, DeliverySettings, EngineConfig, Sender, SettingsHandle};
pub use engine::{Engine, EngineBuilder};
pub use error::{
    AddressError, ConfigError, EngineError, EventError, ResolutionError, StoreError,
    TransportError,
};
pub use event::{Payload, RawTriggerEvent, TriggerEvent};
pub use job::{Claim, DedupeKey, DeliveryJob, JobId, JobStatus};
pub use matcher::{matches, matching_rules};
pub use message::{OutboundMessage, TrackingOptions};
pub use queue::{ClaimedJob, EnqueueOutcome, JobQueue};
pub use rate_limiter::{Admission, RateLimitStats, RateLimiter};
pub use recipient::resolve as resolve_recipients;
pub use rule::{AutomationRule, RecipientPolicy, RuleConditions, RuleDraft, RuleId, Trigger};
pub use scheduler::{ScheduleOutcome, Scheduler};
pub use store::{MemoryStore, RuleStore, Store, TemplateStore};
pub use template::{render, Rendered, Template, TemplateDraft, TemplateId, TemplateKind};
pub use tracking::{
    CallbackKind, CallbackOutcome, CallbackTarget, IgnoreReason, ProviderCallback,
    TrackingHandler,
};
pub use transport::{SendReceipt, Transport};
pub use worker::{DeliveryWorker, DispatchOutcome, TickReport, WorkerPool};

/// Common imports for building and driving an engine.
pub mod prelude {
    pub use crate::{
        Address, DeliverySettings, Engine, EngineBuilder, EngineConfig, Payload,
        ProviderCallback, RecipientPolicy, RuleDraft, RuleStore, TemplateDraft, TemplateKind,
        TemplateStore, Trigger, TriggerEvent,
    };
}

// ============================================================================
// Transport Configuration
// ============================================================================

/// Auto-detect a transport from enabled features and available API keys.
fn detect_provider() -> Option<&'static str> {
    #[cfg(feature = "resend")]
    if env::var("RESEND_API_KEY").is_ok() {
        return Some("resend");
    }
    #[cfg(feature = "local")]
    {
        return Some("local");
    }
    #[allow(unreachable_code)]
    None
}

/// Create a transport from environment variables.
///
/// Uses `EMAIL_PROVIDER` when set, otherwise auto-detects: Resend when
/// `RESEND_API_KEY` is present, then the local mailbox.
pub fn transport_from_env() -> Result<Arc<dyn Transport>, TransportError> {
    let provider = match env::var("EMAIL_PROVIDER") {
        Ok(p) => p.to_lowercase(),
        Err(_) => match detect_provider() {
            Some(p) => {
                tracing::debug!(provider = p, "Auto-detected email provider");
                p.to_string()
            }
            None => {
                return Err(TransportError::Configuration(
                    "EMAIL_PROVIDER not set and could not auto-detect. \
                    Set EMAIL_PROVIDER or ensure an API key is configured."
                        .into(),
                ));
            }
        },
    };

    match provider.as_str() {
        #[cfg(feature = "resend")]
        "resend" => {
            let key = env::var("RESEND_API_KEY")
                .map_err(|_| TransportError::Configuration("RESEND_API_KEY not set".into()))?;
            Ok(Arc::new(transports::ResendTransport::new(key)))
        }
        #[cfg(not(feature = "resend"))]
        "resend" => Err(TransportError::Configuration(
            "EMAIL_PROVIDER=resend but 'resend' feature is not enabled. \
            Add `features = [\"resend\"]` to Cargo.toml"
                .into(),
        )),

        #[cfg(feature = "local")]
        "local" => Ok(Arc::new(transports::LocalTransport::new())),
        #[cfg(not(feature = "local"))]
        "local" => Err(TransportError::Configuration(
            "EMAIL_PROVIDER=local but 'local' feature is not enabled. \
            Add `features = [\"local\"]` to Cargo.toml"
                .into(),
        )),

        "logger" => Ok(Arc::new(transports::LoggerTransport::new())),
        "logger_full" => Ok(Arc::new(transports::LoggerTransport::full())),

        _ => Err(TransportError::Configuration(format!(
            "Unknown EMAIL_PROVIDER: {provider}. Valid providers are: resend, local, logger, logger_full"
        ))),
    }
}

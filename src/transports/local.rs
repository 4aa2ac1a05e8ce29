//! Local transport for development and testing.
//!
//! Captures messages in an in-memory [`Mailbox`] for programmatic assertions,
//! and can be scripted to fail so retry, bounce and timeout paths can be
//! exercised without a real provider.
//!
//! # Testing Usage
//!
//! ```rust,ignore
//! use courier::transports::LocalTransport;
//! use courier::TransportError;
//!
//! let transport = LocalTransport::new();
//! transport.fail_next(TransportError::transient("503 Service Unavailable"));
//!
//! // first send fails, the retry lands in the mailbox
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::error::TransportError;
use crate::message::OutboundMessage;
use crate::transport::{SendReceipt, Transport};

/// A message the local transport accepted.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Provider message id returned in the receipt.
    pub id: String,
    pub message: OutboundMessage,
    pub sent_at: DateTime<Utc>,
}

/// Thread-safe store of accepted messages, oldest first.
#[derive(Debug, Default)]
pub struct Mailbox {
    messages: RwLock<Vec<SentMessage>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mailbox wrapped in an Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn push(&self, message: OutboundMessage) -> String {
        let id = format!("local-{}", uuid::Uuid::new_v4());
        self.messages.write().push(SentMessage {
            id: id.clone(),
            message,
            sent_at: Utc::now(),
        });
        id
    }

    pub fn all(&self) -> Vec<SentMessage> {
        self.messages.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<SentMessage> {
        self.messages.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn count(&self) -> usize {
        self.messages.read().len()
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }

    /// Remove and return all messages.
    pub fn flush(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.messages.write())
    }
}

#[derive(Debug, Default)]
struct Script {
    /// One-shot failures, consumed in order before `persistent`.
    queued: VecDeque<TransportError>,
    persistent: Option<TransportError>,
    delay: Option<Duration>,
}

/// Local transport that stores messages in memory.
///
/// Clones share the mailbox and the failure script.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    mailbox: Arc<Mailbox>,
    script: Arc<Mutex<Script>>,
    attempts: Arc<Mutex<u64>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing mailbox.
    pub fn with_mailbox(mailbox: Arc<Mailbox>) -> Self {
        Self {
            mailbox,
            ..Self::default()
        }
    }

    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    // =========================================================================
    // Failure Simulation (for testing)
    // =========================================================================

    /// Fail the next send with `error`. Calls queue up.
    pub fn fail_next(&self, error: TransportError) {
        self.script.lock().queued.push_back(error);
    }

    /// Fail the next `n` sends with `error`.
    pub fn fail_next_n(&self, n: usize, error: TransportError) {
        let mut script = self.script.lock();
        script
            .queued
            .extend(std::iter::repeat(error).take(n));
    }

    /// Fail every send until [`clear_failure`](Self::clear_failure).
    pub fn set_failure(&self, error: TransportError) {
        self.script.lock().persistent = Some(error);
    }

    /// Drop queued and persistent failures.
    pub fn clear_failure(&self) {
        let mut script = self.script.lock();
        script.queued.clear();
        script.persistent = None;
    }

    /// Sleep this long inside every send.
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().delay = Some(delay);
    }

    pub fn clear_delay(&self) {
        self.script.lock().delay = None;
    }

    /// Sends attempted, successful or not.
    pub fn attempts(&self) -> u64 {
        *self.attempts.lock()
    }

    // =========================================================================
    // Message Access (for testing assertions)
    // =========================================================================

    /// All accepted messages, oldest first.
    pub fn messages(&self) -> Vec<SentMessage> {
        self.mailbox.all()
    }

    pub fn last_message(&self) -> Option<SentMessage> {
        self.mailbox.all().pop()
    }

    pub fn message_count(&self) -> usize {
        self.mailbox.count()
    }

    pub fn has_messages(&self) -> bool {
        self.mailbox.count() > 0
    }

    pub fn clear(&self) {
        self.mailbox.clear();
    }

    pub fn flush(&self) -> Vec<SentMessage> {
        self.mailbox.flush()
    }

    // =========================================================================
    // Query Helpers (for testing)
    // =========================================================================

    /// Check if a message was sent to a specific address.
    pub fn sent_to(&self, email: &str) -> bool {
        self.mailbox.all().iter().any(|sent| {
            sent.message
                .to
                .iter()
                .any(|addr| addr.is_mailbox(email))
        })
    }

    pub fn sent_with_subject(&self, subject: &str) -> bool {
        self.mailbox
            .all()
            .iter()
            .any(|sent| sent.message.subject == subject)
    }

    pub fn sent_with_subject_containing(&self, text: &str) -> bool {
        self.mailbox
            .all()
            .iter()
            .any(|sent| sent.message.subject.contains(text))
    }

    /// Find messages matching a predicate.
    pub fn find_messages<F>(&self, predicate: F) -> Vec<SentMessage>
    where
        F: Fn(&OutboundMessage) -> bool,
    {
        self.mailbox
            .all()
            .into_iter()
            .filter(|sent| predicate(&sent.message))
            .collect()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        *self.attempts.lock() += 1;

        let (failure, delay) = {
            let mut script = self.script.lock();
            let failure = script
                .queued
                .pop_front()
                .or_else(|| script.persistent.clone());
            (failure, script.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        message.validate()?;
        let id = self.mailbox.push(message.clone());
        Ok(SendReceipt::new(id))
    }

    fn provider_name(&self) -> &'static str {
        "local"
    }
}

//! Testing utilities and assertion helpers.
//!
//! Assertions over what a [`LocalTransport`] accepted and what the activity
//! log recorded for a job. Failure messages list what was actually sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier::transports::LocalTransport;
//! use courier::testing::*;
//!
//! #[tokio::test]
//! async fn test_contact_form_confirmation() {
//!     let transport = LocalTransport::new();
//!
//!     // ... build an engine, ingest an event, tick ...
//!
//!     assert_sent(&transport);
//!     assert_sent_to(&transport, "a@x.com");
//!     assert_subject_contains(&transport, "Thanks");
//!     assert_subject_matches(&transport, r"Thanks, \w+");
//!     assert_activity(&engine.activity_for(job_id), ActivityKind::Sent);
//! }
//! ```

use regex::Regex;

use crate::activity::{ActivityKind, ActivityLogEntry};
use crate::transports::{LocalTransport, SentMessage};

fn summary(messages: &[SentMessage]) -> String {
    if messages.is_empty() {
        return "  (no messages sent)".to_string();
    }

    messages
        .iter()
        .enumerate()
        .map(|(i, sent)| {
            let m = &sent.message;
            let to = m
                .to
                .iter()
                .map(|a| a.email.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("  {}. To: [{}], Subject: \"{}\"", i + 1, to, m.subject)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assert that at least one message was sent.
///
/// # Panics
///
/// Panics if nothing was sent.
pub fn assert_sent(transport: &LocalTransport) {
    assert!(
        transport.has_messages(),
        "Expected at least one message to be sent, but none were sent"
    );
}

/// Assert that nothing was sent.
///
/// # Panics
///
/// Panics if any message was sent.
pub fn assert_no_messages(transport: &LocalTransport) {
    let messages = transport.messages();
    assert!(
        messages.is_empty(),
        "Expected no messages, but {} were sent.\n\nMessages sent:\n{}",
        messages.len(),
        summary(&messages)
    );
}

/// Assert that exactly `expected` messages were sent.
///
/// # Panics
///
/// Panics if the count differs.
pub fn assert_message_count(transport: &LocalTransport, expected: usize) {
    let messages = transport.messages();
    assert!(
        messages.len() == expected,
        "Expected {} message(s), but {} were sent.\n\nMessages sent:\n{}",
        expected,
        messages.len(),
        summary(&messages)
    );
}

/// Assert that a message was sent to `email` (case-insensitive).
///
/// # Panics
///
/// Panics if no message went to the address.
pub fn assert_sent_to(transport: &LocalTransport, email: &str) {
    assert!(
        transport.sent_to(email),
        "Expected a message to {}, but none was found.\n\nMessages sent:\n{}",
        email,
        summary(&transport.messages())
    );
}

/// Assert that no message was sent to `email`.
///
/// # Panics
///
/// Panics if a message went to the address.
pub fn refute_sent_to(transport: &LocalTransport, email: &str) {
    assert!(
        !transport.sent_to(email),
        "Expected no message to {}, but one was sent.\n\nMessages sent:\n{}",
        email,
        summary(&transport.messages())
    );
}

/// Assert that a sent subject contains `text`.
///
/// # Panics
///
/// Panics if no subject contains the text.
pub fn assert_subject_contains(transport: &LocalTransport, text: &str) {
    assert!(
        transport.sent_with_subject_containing(text),
        "Expected a subject containing \"{}\".\n\nMessages sent:\n{}",
        text,
        summary(&transport.messages())
    );
}

/// Assert that a sent subject matches `pattern`.
///
/// # Panics
///
/// Panics if the pattern is invalid or no subject matches.
pub fn assert_subject_matches(transport: &LocalTransport, pattern: &str) {
    let re = Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Invalid regex pattern \"{pattern}\": {e}"));
    let messages = transport.messages();
    assert!(
        messages.iter().any(|sent| re.is_match(&sent.message.subject)),
        "Expected a subject matching /{}/.\n\nMessages sent:\n{}",
        pattern,
        summary(&messages)
    );
}

/// Assert that the last message's body contains `text`.
///
/// # Panics
///
/// Panics if nothing was sent or the body lacks the text.
pub fn assert_body_contains(transport: &LocalTransport, text: &str) {
    let last = last_message(transport);
    let body = last.message.body_text();
    assert!(
        body.contains(text),
        "Expected the last body to contain \"{text}\", got:\n{body}"
    );
}

/// The last message sent.
///
/// # Panics
///
/// Panics if nothing was sent.
pub fn last_message(transport: &LocalTransport) -> SentMessage {
    transport
        .last_message()
        .unwrap_or_else(|| panic!("Expected a message to be sent, but none were sent"))
}

/// Assert that `entries` contain one of `kind`.
///
/// # Panics
///
/// Panics if no entry has that kind.
pub fn assert_activity(entries: &[ActivityLogEntry], kind: ActivityKind) {
    assert!(
        entries.iter().any(|e| e.kind == kind),
        "Expected a '{}' activity entry, found: [{}]",
        kind,
        entries
            .iter()
            .map(|e| e.kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

/// Assert that `entries` contain none of `kind`.
///
/// # Panics
///
/// Panics if an entry has that kind.
pub fn refute_activity(entries: &[ActivityLogEntry], kind: ActivityKind) {
    let count = entries.iter().filter(|e| e.kind == kind).count();
    assert!(
        count == 0,
        "Expected no '{kind}' activity entries, found {count}"
    );
}

/// Kinds of `entries` in log order.
pub fn activity_kinds(entries: &[ActivityLogEntry]) -> Vec<ActivityKind> {
    entries.iter().map(|e| e.kind).collect()
}

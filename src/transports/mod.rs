//! Outbound transport implementations.
//!
//! Each transport implements the [`Transport`](crate::Transport) trait.
//!
//! ## Available Transports
//!
//! | Transport | Feature Flag | Description |
//! |-----------|-------------|-------------|
//! | [`ResendTransport`] | `resend` | Resend API |
//! | [`LocalTransport`] | `local` | In-memory mailbox with scripted failures for dev/testing |
//! | [`LoggerTransport`] | (none) | Logs messages without sending |

#[cfg(feature = "resend")]
mod resend;
#[cfg(feature = "resend")]
pub use resend::ResendTransport;

#[cfg(feature = "local")]
mod local;
#[cfg(feature = "local")]
pub use local::{LocalTransport, Mailbox, SentMessage};

mod logger;
pub use logger::LoggerTransport;

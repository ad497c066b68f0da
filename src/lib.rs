//! IMAP mailbox monitor with webhook delivery
//!
//! Watches one mailbox over IMAP (IDLE where the server supports it,
//! polling otherwise) and turns every new message into a webhook POST.
//! The monitor emits [`Event`]s on a bounded channel; the dispatcher
//! fetches each message, normalizes it with `mail-parser`, and
//! delivers a JSON [`Payload`] with retries. Delivery is at-least-once
//! and strictly ordered by UID within a connection.

mod config;
mod dispatch;
mod drain;
mod error;
mod executor;
mod fetch;
mod monitor;
mod session;
mod webhook;

pub use config::MonitorConfig;
pub use dispatch::run_dispatcher;
pub use drain::DrainCoordinator;
pub use error::{ConnectPhase, Error, Result};
pub use executor::{CommandExecutor, OpStat};
pub use fetch::{NormalizedMessage, fetch_and_normalize, normalize};
pub use monitor::{EVENT_CHANNEL_CAPACITY, Event, Monitor};
pub use session::{ImapSession, Transport};
pub use webhook::{Payload, WebhookSender, build_payload, parse_headers};

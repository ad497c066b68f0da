//! Error types for mailwatch

use std::fmt;
use thiserror::Error;

/// The connection phase a [`Error::Connect`] failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    /// TCP dial (including the dial timeout).
    Dial,
    /// TLS setup, either the implicit handshake or the STARTTLS upgrade.
    Upgrade,
    /// IMAP LOGIN.
    Auth,
    /// Mailbox SELECT.
    Select,
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dial => "dial",
            Self::Upgrade => "upgrade",
            Self::Auth => "auth",
            Self::Select => "select",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("connect failed during {phase}: {message}")]
    Connect {
        phase: ConnectPhase,
        message: String,
    },

    #[error("status query failed: {0}")]
    Status(String),

    #[error("timeout during operation {op}")]
    Timeout { op: String },

    #[error("no live session")]
    NoSession,

    #[error("monitor closed")]
    Closed,

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("message parsing error: {0}")]
    Parse(String),

    #[error("webhook delivery error: {0}")]
    Delivery(String),
}

/// Error substrings treated as transient for fetch retries.
const TRANSIENT_PATTERNS: &[&str] = &["short write", "timeout", "temporarily", "reset", "closed"];

impl Error {
    /// Whether a fetch failure is worth retrying.
    ///
    /// Classification is by substring match on the rendered error text,
    /// case-insensitive. Crude, but it catches the usual suspects
    /// (half-dead connections, server-side resets) without needing every
    /// underlying error type to cooperate.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        let text = self.to_string().to_ascii_lowercase();
        TRANSIENT_PATTERNS.iter().any(|p| text.contains(p))
    }
}

impl From<async_imap::error::Error> for Error {
    fn from(e: async_imap::error::Error) -> Self {
        Self::Imap(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

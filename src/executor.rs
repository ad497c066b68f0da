//! Serialized command execution
//!
//! All IMAP commands outside of IDLE go through [`CommandExecutor`],
//! which guarantees one command at a time on the wire, bounds each
//! command with a timeout, and keeps per-operation statistics.

use crate::error::{Error, Result};
use crate::session::{ImapSession, Transport};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Accumulated statistics for one named operation.
#[derive(Debug, Clone, Default)]
pub struct OpStat {
    pub count: u64,
    pub errors: u64,
    pub last_duration: Duration,
    pub total_duration: Duration,
    pub last_error: Option<String>,
}

/// Runs IMAP commands one at a time against the transport's session.
pub struct CommandExecutor {
    transport: Arc<Transport>,
    serial: tokio::sync::Mutex<()>,
    stats: std::sync::Mutex<HashMap<String, OpStat>>,
    default_timeout: Duration,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(transport: Arc<Transport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            serial: tokio::sync::Mutex::new(()),
            stats: std::sync::Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Run `f` against the live session under the default timeout.
    ///
    /// # Errors
    ///
    /// [`Error::NoSession`] when the transport has no live session,
    /// [`Error::Timeout`] when the command outlives its budget, or
    /// whatever `f` itself returns.
    pub async fn execute<T, F>(&self, op: &str, f: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut ImapSession) -> BoxFuture<'s, Result<T>>,
    {
        self.execute_with_timeout(op, self.default_timeout, f).await
    }

    /// Like [`execute`](Self::execute) with an explicit timeout.
    ///
    /// On timeout the in-flight future is dropped; the session is
    /// restored as-is and the next command (or a reset) deals with any
    /// half-read state.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn execute_with_timeout<T, F>(&self, op: &str, timeout: Duration, f: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut ImapSession) -> BoxFuture<'s, Result<T>>,
    {
        let _serial = self.serial.lock().await;

        let Some(mut session) = self.transport.take_session().await else {
            return Err(Error::NoSession);
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, f(&mut session)).await {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout { op: op.to_string() }),
        };
        let elapsed = started.elapsed();

        self.transport.restore_session(session).await;
        self.record(op, elapsed, result.as_ref().err());
        debug!(op, ?elapsed, ok = result.is_ok(), "command executed");
        result
    }

    fn record(&self, op: &str, elapsed: Duration, error: Option<&Error>) {
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stat = stats.entry(op.to_string()).or_default();
        stat.count += 1;
        stat.last_duration = elapsed;
        stat.total_duration += elapsed;
        if let Some(e) = error {
            stat.errors += 1;
            stat.last_error = Some(e.to_string());
        }
    }

    /// Snapshot of per-operation statistics.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, OpStat> {
        match self.stats.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

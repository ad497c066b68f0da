//! In-flight work tracking
//!
//! The monitor hands events to a consumer it does not control. Before
//! re-entering IDLE it waits (bounded) for the consumer to finish the
//! commands those events trigger, since IDLE and commands cannot share
//! the connection.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Counts in-flight consumer work. Cloneable handle; all clones share
/// the same counter.
#[derive(Clone, Default)]
pub struct DrainCoordinator {
    active: Arc<Mutex<u32>>,
}

impl DrainCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one unit of work as started.
    pub fn begin(&self) {
        *self.lock() += 1;
    }

    /// Mark one unit of work as finished. Floored at zero so an
    /// unbalanced `end` cannot wedge the counter.
    pub fn end(&self) {
        let mut active = self.lock();
        *active = active.saturating_sub(1);
    }

    /// Current number of in-flight units.
    #[must_use]
    pub fn active(&self) -> u32 {
        *self.lock()
    }

    /// Wait until the counter reaches zero, the timeout expires, or
    /// `cancel` fires. Returns true when fully drained.
    pub async fn wait(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let active = self.active();
            if active == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "drain timed out with work still in flight");
                return false;
            }
            tokio::select! {
                () = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
                () = cancel.cancelled() => return false,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, u32> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

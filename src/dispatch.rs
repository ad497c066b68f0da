//! Event consumer
//!
//! Receives UIDs from the monitor, fetches and normalizes each
//! message, delivers the webhook payload, and releases the drain slot
//! the monitor opened for the event. Every path out of an event ends
//! it exactly once.

use crate::config::MonitorConfig;
use crate::drain::DrainCoordinator;
use crate::executor::CommandExecutor;
use crate::fetch::{NormalizedMessage, fetch_and_normalize};
use crate::monitor::Event;
use crate::webhook::{WebhookSender, build_payload};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Extra fetch attempts for transient failures.
const FETCH_RETRY_MAX: u32 = 2;
const FETCH_RETRY_DELAY: Duration = Duration::from_millis(150);

/// Consume events until the channel closes or `token` fires.
pub async fn run_dispatcher(
    mut events: mpsc::Receiver<Event>,
    executor: Arc<CommandExecutor>,
    drain: DrainCoordinator,
    sender: WebhookSender,
    config: Arc<MonitorConfig>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            () = token.cancelled() => break,
        };

        debug!(uid = event.uid, "handling event");
        match fetch_with_retry(&executor, event.uid, config.body_limit).await {
            Ok(message) => {
                let payload = build_payload(&message, &config.mailbox);
                if let Err(e) = sender.send_with_retry(&payload).await {
                    warn!(uid = event.uid, error = %e, "webhook delivery failed");
                }
            }
            Err(e) => {
                warn!(uid = event.uid, error = %e, "fetch failed, dropping event");
            }
        }
        drain.end();
    }
    debug!("dispatcher finished");
}

/// Fetch and normalize with a couple of retries for transient wire
/// failures (the monitor may be mid-reconnect when we run).
async fn fetch_with_retry(
    executor: &CommandExecutor,
    uid: u32,
    body_limit: usize,
) -> crate::error::Result<NormalizedMessage> {
    let mut attempt = 0;
    loop {
        match fetch_and_normalize(executor, uid, body_limit).await {
            Ok(message) => return Ok(message),
            Err(e) if attempt < FETCH_RETRY_MAX && e.is_transient() => {
                attempt += 1;
                debug!(uid, attempt, error = %e, "transient fetch failure, retrying");
                tokio::time::sleep(FETCH_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

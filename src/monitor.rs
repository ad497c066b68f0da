//! Mailbox monitoring engine
//!
//! [`Monitor::run`] owns the connection lifecycle: connect with capped
//! exponential backoff, establish a message-count baseline, then watch
//! the mailbox for growth. Servers advertising IDLE get the long-poll
//! path (with periodic renewal standing in for keepalive, since a
//! command cannot share the wire with an open IDLE); everything else
//! falls back to plain polling. Growth is resolved to UIDs and emitted
//! on the bounded event channel in ascending order, then the monitor
//! waits for in-flight consumer work to drain before idling again.

use crate::config::MonitorConfig;
use crate::drain::DrainCoordinator;
use crate::error::Error;
use crate::executor::CommandExecutor;
use crate::session::Transport;
use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::{MailboxDatum, Response};
use futures::{FutureExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Cadence used on servers without IDLE when the poll tick is
/// disabled; zero would spin.
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the event channel. Producers block when the consumer
/// falls this far behind; events are never dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 50;

/// A newly observed message, identified by UID in the watched mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub uid: u32,
}

/// Outcome of one watch cycle.
enum Cycle {
    /// Keep watching on the same connection.
    Continue,
    /// Connection is gone; reconnect after the configured delay.
    Reconnect,
    /// Cancellation observed; shut down.
    Stopped,
}

/// What woke the idle wait up.
enum Wakeup {
    Idle(std::result::Result<IdleResponse, async_imap::error::Error>),
    PollTick,
    Cancelled,
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

pub struct Monitor {
    config: Arc<MonitorConfig>,
    transport: Arc<Transport>,
    executor: Arc<CommandExecutor>,
    drain: DrainCoordinator,
    events: mpsc::Sender<Event>,
    token: CancellationToken,
}

impl Monitor {
    #[must_use]
    pub fn new(
        config: Arc<MonitorConfig>,
        transport: Arc<Transport>,
        executor: Arc<CommandExecutor>,
        drain: DrainCoordinator,
        events: mpsc::Sender<Event>,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            executor,
            drain,
            events,
            token,
        }
    }

    /// Run the monitor until cancellation or [`Transport::close`].
    pub async fn run(&self) {
        let mut backoff = INITIAL_BACKOFF;
        'outer: loop {
            if self.token.is_cancelled() {
                break;
            }

            match self.transport.connect().await {
                Ok(()) => backoff = INITIAL_BACKOFF,
                Err(Error::Closed) => break,
                Err(e) => {
                    warn!(error = %e, delay = ?backoff, "connect failed, backing off");
                    if !self.sleep_cancellable(backoff).await {
                        break;
                    }
                    backoff = next_backoff(backoff);
                    continue;
                }
            }

            let mut baseline = match self.transport.status().await {
                Ok(n) => n,
                Err(e) => {
                    self.transport.reset("baseline query failed", &e).await;
                    if !self.sleep_cancellable(self.config.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };

            let supports_idle = self.supports_idle().await;
            info!(baseline, supports_idle, mailbox = %self.config.mailbox, "watching mailbox");

            loop {
                if self.token.is_cancelled() {
                    break 'outer;
                }
                let cycle = if supports_idle {
                    self.idle_cycle(&mut baseline).await
                } else {
                    self.poll_cycle(&mut baseline).await
                };
                match cycle {
                    Cycle::Continue => {}
                    Cycle::Reconnect => {
                        if !self.sleep_cancellable(self.config.reconnect_delay).await {
                            break 'outer;
                        }
                        continue 'outer;
                    }
                    Cycle::Stopped => break 'outer,
                }
            }
        }
        debug!("monitor loop finished");
    }

    /// One IDLE cycle: enter IDLE, wait for push data, renewal timeout,
    /// poll tick, or cancellation, then terminate IDLE and act.
    async fn idle_cycle(&self, baseline: &mut u32) -> Cycle {
        let Some(session) = self.transport.take_session().await else {
            return Cycle::Reconnect;
        };

        let mut handle = session.idle();
        if let Err(e) = handle.init().await {
            // The session was consumed by the idle handle; dropping it
            // is the reset.
            warn!(reason = "entering IDLE failed", error = %e, "reset connection");
            return Cycle::Reconnect;
        }

        let wakeup = {
            let (idle_wait, stop) = handle.wait_with_timeout(self.config.idle_refresh);
            let wakeup = tokio::select! {
                res = idle_wait => Wakeup::Idle(res),
                () = self.poll_tick() => Wakeup::PollTick,
                () = self.token.cancelled() => Wakeup::Cancelled,
            };
            drop(stop);
            wakeup
        };

        // Inspect push data before DONE consumes the handle.
        let pushed_exists = match &wakeup {
            Wakeup::Idle(Ok(IdleResponse::NewData(data))) => match data.parsed() {
                Response::MailboxData(MailboxDatum::Exists(n)) => Some(*n),
                other => {
                    debug!(?other, "unsolicited response during IDLE");
                    None
                }
            },
            _ => None,
        };

        if let Wakeup::Idle(Err(e)) = &wakeup {
            warn!(reason = "IDLE wait failed", error = %e, "reset connection");
            return Cycle::Reconnect;
        }

        let session = match handle.done().await {
            Ok(session) => session,
            Err(e) => {
                warn!(reason = "terminating IDLE failed", error = %e, "reset connection");
                return Cycle::Reconnect;
            }
        };
        self.transport.restore_session(session).await;

        match wakeup {
            Wakeup::Cancelled => Cycle::Stopped,
            Wakeup::PollTick => self.check_growth(baseline).await,
            Wakeup::Idle(Ok(IdleResponse::NewData(_))) => match pushed_exists {
                Some(observed) if observed > *baseline => {
                    self.emit_range(baseline, observed).await
                }
                // Counts at or below the baseline (expunge) are
                // ignored; the baseline never regresses within one
                // session and is re-derived on reconnect.
                Some(_) => Cycle::Continue,
                // Push that wasn't an EXISTS count; requery to be sure.
                None => self.check_growth(baseline).await,
            },
            // Renewal timeout. Requery before re-entering IDLE: an
            // EXISTS push racing the DONE handshake is swallowed as an
            // unsolicited response nothing reads, so the count has to
            // be checked here or the growth is lost.
            Wakeup::Idle(Ok(IdleResponse::Timeout | IdleResponse::ManualInterrupt)) => {
                self.check_growth(baseline).await
            }
            Wakeup::Idle(Err(_)) => unreachable!("handled above"),
        }
    }

    /// One polling cycle for servers without IDLE.
    async fn poll_cycle(&self, baseline: &mut u32) -> Cycle {
        let interval = if self.config.poll_interval.is_zero() {
            FALLBACK_POLL_INTERVAL
        } else {
            self.config.poll_interval
        };
        if !self.sleep_cancellable(interval).await {
            return Cycle::Stopped;
        }
        self.check_growth(baseline).await
    }

    /// Re-query the mailbox count and emit for any growth.
    async fn check_growth(&self, baseline: &mut u32) -> Cycle {
        match self.transport.status().await {
            Ok(observed) if observed > *baseline => self.emit_range(baseline, observed).await,
            Ok(_) => Cycle::Continue,
            Err(e) => {
                self.transport.reset("status query failed", &e).await;
                Cycle::Reconnect
            }
        }
    }

    /// Resolve sequence numbers `baseline+1 ..= observed` to UIDs and
    /// emit one event per message, ascending. The baseline only
    /// advances once every event is on the channel.
    async fn emit_range(&self, baseline: &mut u32, observed: u32) -> Cycle {
        let range = format!("{}:{}", *baseline + 1, observed);
        debug!(range = %range, "resolving new messages");

        let fetched = self
            .executor
            .execute("fetch-uids", |session| {
                let range = range.clone();
                async move {
                    let stream = session.fetch(&range, "(UID)").await?;
                    let fetches: Vec<_> = stream.try_collect().await?;
                    Ok(fetches.iter().filter_map(|f| f.uid).collect::<Vec<u32>>())
                }
                .boxed()
            })
            .await;

        let mut uids = match fetched {
            Ok(uids) => uids,
            Err(Error::NoSession) => return Cycle::Reconnect,
            Err(e) => {
                // Baseline stays put; the next cycle retries the range.
                warn!(error = %e, range = %range, "UID resolution failed");
                return Cycle::Continue;
            }
        };
        uids.sort_unstable();

        for uid in uids {
            self.drain.begin();
            tokio::select! {
                sent = self.events.send(Event { uid }) => {
                    if sent.is_err() {
                        self.drain.end();
                        warn!("event channel closed");
                        return Cycle::Stopped;
                    }
                }
                () = self.token.cancelled() => {
                    self.drain.end();
                    return Cycle::Stopped;
                }
            }
        }
        *baseline = observed;

        self.drain.wait(self.config.drain_timeout, &self.token).await;
        Cycle::Continue
    }

    /// Check the IDLE capability once per connection. Errors fall back
    /// to polling rather than killing the connection.
    async fn supports_idle(&self) -> bool {
        let result = self
            .executor
            .execute("capability", |session| {
                async move {
                    let caps = session.capabilities().await?;
                    Ok(caps.has_str("IDLE"))
                }
                .boxed()
            })
            .await;
        match result {
            Ok(supported) => supported,
            Err(e) => {
                warn!(error = %e, "capability query failed, assuming no IDLE");
                false
            }
        }
    }

    /// Sleep while polling is enabled; pend forever at a zero interval
    /// so the select never wakes on this branch.
    async fn poll_tick(&self) {
        if self.config.poll_interval.is_zero() {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Sleep unless cancelled first; true means the full delay passed.
    async fn sleep_cancellable(&self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.token.cancelled() => false,
        }
    }
}

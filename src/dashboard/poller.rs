use alloy::eips::BlockNumberOrTag;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::client::ChainReader;
use super::sink::{Head, RefreshSink, RefreshUpdate};
use crate::config::PollerConfig;
use crate::error::{DashboardError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// No timer registered.
    Idle,
    /// Timer registered, nothing in flight.
    Armed,
    /// A poll cycle is awaiting the node.
    Fetching,
}

/// Cycle outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub succeeded: u64,
    pub failed: u64,
    /// Results that resolved after `stop()` and were dropped.
    pub discarded: u64,
}

#[derive(Debug)]
struct Control {
    /// Bumped on every start and stop; a task only runs while its session is
    /// current.
    session: u64,
    /// Tag of the most recent cycle. Results carrying an older tag are stale.
    generation: u64,
    state: PollerState,
    /// Whether this poller holds the sink's driver claim.
    claimed: bool,
}

struct Shared<R> {
    reader: Arc<R>,
    sink: RefreshSink,
    config: PollerConfig,
    control: Mutex<Control>,
    succeeded: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// Periodically reads the chain head and forwards it to a [`RefreshSink`].
///
/// Cycles never overlap: the next tick is only taken once the current cycle
/// has resolved. Dropping the poller stops it.
#[must_use = "`start` must be called to run the poller"]
pub struct Poller<R: ChainReader> {
    shared: Arc<Shared<R>>,
    handle: Option<JoinHandle<()>>,
    limit: usize,
}

impl<R: ChainReader> Poller<R> {
    /// Create a new poller
    pub fn new(reader: Arc<R>, sink: RefreshSink, config: PollerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                reader,
                sink,
                config,
                control: Mutex::new(Control {
                    session: 0,
                    generation: 0,
                    state: PollerState::Idle,
                    claimed: false,
                }),
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
            handle: None,
            limit: usize::MAX,
        }
    }

    /// Caps the number of cycles a started poller runs before going idle.
    /// Reaching the cap frees the sink for another poller.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn state(&self) -> PollerState {
        self.shared.control().state
    }

    pub fn stats(&self) -> PollStats {
        PollStats {
            succeeded: self.shared.succeeded.load(Ordering::Acquire),
            failed: self.shared.failed.load(Ordering::Acquire),
            discarded: self.shared.discarded.load(Ordering::Acquire),
        }
    }

    /// Arms the timer and runs the first cycle right away.
    ///
    /// Starting a running poller does nothing. A zero poll interval or
    /// request timeout is a configuration error. Must be called from within a
    /// tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let config = &self.shared.config;
        if config.poll_interval.is_zero() {
            return Err(DashboardError::config("poll interval must be greater than zero"));
        }
        if config.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(DashboardError::config("request timeout must be greater than zero"));
        }

        let session = {
            let mut control = self.shared.control();
            if control.state != PollerState::Idle {
                debug!("poller already running");
                return Ok(());
            }
            if !control.claimed {
                if !self.shared.sink.try_claim() {
                    return Err(DashboardError::AlreadyPolling);
                }
                control.claimed = true;
            }
            control.session += 1;
            control.state = PollerState::Armed;
            control.session
        };

        if let Some(previous) = self.handle.take() {
            previous.abort();
        }
        info!(
            interval = ?self.shared.config.poll_interval,
            timeout = ?self.shared.config.request_timeout,
            "starting block poller"
        );
        self.handle = Some(tokio::spawn(run(self.shared.clone(), session, self.limit)));
        Ok(())
    }

    /// Cancels the timer. Results of a cycle still in flight are discarded.
    pub fn stop(&mut self) {
        {
            let mut control = self.shared.control();
            control.session += 1;
            control.generation += 1;
            if control.state != PollerState::Idle {
                info!("stopping block poller");
            }
            control.state = PollerState::Idle;
            self.shared.release_claim(&mut control);
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl<R: ChainReader> Drop for Poller<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<R: ChainReader>(shared: Arc<Shared<R>>, session: u64, limit: usize) {
    let mut ticker = tokio::time::interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for _ in 0..limit {
        // The first tick completes immediately.
        ticker.tick().await;
        let Some(generation) = shared.begin_cycle(session) else {
            return;
        };
        let outcome = shared.fetch().await;
        shared.complete(generation, outcome);
    }

    let mut control = shared.control();
    if control.session == session {
        debug!(limit, "poll limit reached");
        control.state = PollerState::Idle;
        shared.release_claim(&mut control);
    }
}

impl<R: ChainReader> Shared<R> {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_claim(&self, control: &mut Control) {
        if control.claimed {
            self.sink.release();
            control.claimed = false;
        }
    }

    /// Armed -> Fetching. Returns the cycle's generation tag.
    fn begin_cycle(&self, session: u64) -> Option<u64> {
        let mut control = self.control();
        if control.session != session || control.state != PollerState::Armed {
            return None;
        }
        control.generation += 1;
        control.state = PollerState::Fetching;
        Some(control.generation)
    }

    /// Fetching -> Armed. The sink is written under the control lock so a
    /// concurrent `stop()` either happens before (and the result is dropped)
    /// or after the write.
    fn complete(&self, generation: u64, outcome: Result<Head>) {
        let mut control = self.control();
        if control.generation != generation || control.state != PollerState::Fetching {
            self.discarded.fetch_add(1, Ordering::AcqRel);
            debug!(generation, "discarding stale poll result");
            return;
        }
        control.state = PollerState::Armed;

        match outcome {
            Ok(head) => {
                debug!(generation, number = head.number, "polled chain head");
                self.succeeded.fetch_add(1, Ordering::AcqRel);
                self.sink.update(RefreshUpdate::head(head));
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::AcqRel);
                warn!(generation, %err, "poll cycle failed");
            }
        }
    }

    async fn fetch(&self) -> Result<Head> {
        match self.config.request_timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.fetch_with_retries())
                .await
                .map_err(|_| {
                    DashboardError::network(format!("poll cycle timed out after {deadline:?}"), true)
                })?,
            None => self.fetch_with_retries().await,
        }
    }

    async fn fetch_with_retries(&self) -> Result<Head> {
        let mut retries = self.config.max_retries;
        loop {
            match self.fetch_head().await {
                Err(err) if retries > 0 && err.is_retryable() => {
                    retries -= 1;
                    debug!(%err, retries_left = retries, "retrying poll");
                }
                outcome => return outcome,
            }
        }
    }

    async fn fetch_head(&self) -> Result<Head> {
        let number = self.reader.get_block_number().await?;
        let block = self
            .reader
            .get_block(BlockNumberOrTag::Number(number))
            .await?;
        Ok(Head::new(number, Some(block)))
    }
}

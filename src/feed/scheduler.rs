use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinError, JoinHandle};

use super::due::select_due;
use super::refresher::{FeedRefresher, RefreshClaim, RefreshOutcome};
use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Due feeds dispatched per tick
    pub feeds_per_cycle: usize,
    /// Refreshes running at once across all ticks
    pub max_concurrent_refreshes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.poll_interval(),
            feeds_per_cycle: config.feeds_per_cycle,
            max_concurrent_refreshes: config.max_concurrent_refreshes,
        }
    }
}

/// Feeds dispatched by one tick.
///
/// Dropping the report detaches the refresh tasks; they keep running.
pub struct TickReport {
    dispatched: Vec<(i64, JoinHandle<RefreshOutcome>)>,
}

impl TickReport {
    pub fn feed_ids(&self) -> Vec<i64> {
        self.dispatched.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.dispatched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty()
    }

    /// Wait for every dispatched refresh. A panicked task is logged and
    /// reported as `Err`.
    pub async fn join(self) -> Vec<(i64, Result<RefreshOutcome, JoinError>)> {
        let mut results = Vec::with_capacity(self.dispatched.len());
        for (feed_id, handle) in self.dispatched {
            let result = handle.await;
            if let Err(e) = &result {
                tracing::error!(feed_id = feed_id, error = %e, "Refresh task panicked");
            }
            results.push((feed_id, result));
        }
        results
    }
}

/// Process-wide polling loop.
///
/// Every tick selects due feeds and spawns one refresh task per feed. Tasks
/// wait on a shared semaphore, so a slow feed delays neither its siblings
/// nor the next tick.
#[derive(Clone)]
pub struct PollScheduler {
    refresher: FeedRefresher,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
}

impl PollScheduler {
    pub fn new(refresher: FeedRefresher, config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_refreshes.max(1)));
        Self {
            refresher,
            config,
            permits,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one polling cycle. Never fails: a due-selection error is logged
    /// and yields an empty report.
    pub async fn tick(&self) -> TickReport {
        let due = match select_due(self.refresher.database(), self.config.feeds_per_cycle).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Due selection failed, skipping cycle");
                return TickReport {
                    dispatched: Vec::new(),
                };
            }
        };

        // Claim before queueing on the semaphore so a feed waiting for a
        // permit is not dispatched again by a later tick
        let claims: Vec<RefreshClaim> = due
            .into_iter()
            .filter_map(|feed_id| {
                let claim = self.refresher.try_claim(feed_id);
                if claim.is_none() {
                    tracing::debug!(feed_id = feed_id, "Refresh still pending, not dispatching");
                }
                claim
            })
            .collect();

        if !claims.is_empty() {
            tracing::info!(count = claims.len(), "Dispatching due feeds");
        }

        let dispatched = claims
            .into_iter()
            .map(|claim| (claim.feed_id(), self.dispatch(claim)))
            .collect();
        TickReport { dispatched }
    }

    fn dispatch(&self, claim: RefreshClaim) -> JoinHandle<RefreshOutcome> {
        let refresher = self.refresher.clone();
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            // Held for the whole refresh; released on drop
            let _permit = permits.acquire_owned().await;
            refresher.refresh_claimed(claim).await
        })
    }

    /// Tick on the configured interval until `shutdown` fires.
    ///
    /// The first tick runs immediately. Ticks missed while a cycle was
    /// selecting are skipped rather than bunched.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            feeds_per_cycle = self.config.feeds_per_cycle,
            max_concurrent = self.config.max_concurrent_refreshes,
            "Poll scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Poll scheduler shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    // Fire-and-forget: refreshes outlive the tick
                    drop(self.tick().await);
                }
            }
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let refresher = self.refresher.clone();
        let join = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle {
            shutdown_tx,
            join,
            refresher,
        }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
    refresher: FeedRefresher,
}

impl SchedulerHandle {
    /// Stop ticking, then wait for refreshes already dispatched to finish.
    ///
    /// Dispatched refreshes are not cancelled, so once this returns the
    /// database is no longer in use by the scheduler and can be closed.
    pub async fn stop(self) -> Result<(), JoinError> {
        let _ = self.shutdown_tx.send(());
        let result = self.join.await;
        let pending = self.refresher.in_flight();
        if pending > 0 {
            tracing::info!(pending = pending, "Waiting for dispatched refreshes");
        }
        self.refresher.wait_idle().await;
        result
    }
}

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Notify;

use super::merger::merge;
use super::normalizer::normalize;
use super::parser::ParsedFeed;
use super::source::{FeedSource, FetchError};
use crate::storage::{Database, DatabaseError, EnrichedFields, Feed, MergeOutcome};
use crate::util::{strip_control_chars, strip_html};

/// Why a refresh did not complete.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Why a refresh was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    Inactive,
}

/// Counts from one completed refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub created: usize,
    pub updated: usize,
    /// Entries whose merge failed; the rest of the batch still ran
    pub failed_entries: usize,
    pub enriched: EnrichedFields,
}

/// Result of [`FeedRefresher::refresh`]. Refresh never returns an error:
/// every failure is logged and reported here.
#[derive(Debug)]
pub enum RefreshOutcome {
    Skipped(SkipReason),
    /// Another refresh of the same feed is still running
    AlreadyRunning,
    /// Loading, fetching or parsing failed; the fetch time was still stamped
    /// when the feed could be loaded
    Failed(RefreshError),
    Completed(RefreshSummary),
}

impl RefreshOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RefreshOutcome::Completed(_))
    }

    pub fn summary(&self) -> Option<&RefreshSummary> {
        match self {
            RefreshOutcome::Completed(summary) => Some(summary),
            _ => None,
        }
    }
}

/// Feeds currently claimed, plus a wake-up for [`FeedRefresher::wait_idle`].
#[derive(Default)]
struct InFlight {
    feeds: Mutex<HashSet<i64>>,
    idle: Notify,
}

impl InFlight {
    fn feeds(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive claim on refreshing one feed, released on drop.
///
/// The scheduler takes the claim when it dispatches, before the refresh
/// waits for a concurrency permit, so a queued refresh already blocks
/// duplicates.
pub struct RefreshClaim {
    in_flight: Arc<InFlight>,
    feed_id: i64,
}

impl RefreshClaim {
    pub fn feed_id(&self) -> i64 {
        self.feed_id
    }
}

impl std::fmt::Debug for RefreshClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshClaim")
            .field("feed_id", &self.feed_id)
            .finish()
    }
}

impl Drop for RefreshClaim {
    fn drop(&mut self) {
        let mut feeds = self.in_flight.feeds();
        feeds.remove(&self.feed_id);
        if feeds.is_empty() {
            self.in_flight.idle.notify_waiters();
        }
    }
}

/// Runs the fetch, normalize, merge pipeline for one feed at a time.
///
/// Cloning is cheap and clones share the in-flight set, so two clones never
/// refresh the same feed concurrently.
#[derive(Clone)]
pub struct FeedRefresher {
    db: Database,
    source: Arc<dyn FeedSource>,
    fetch_deadline: Duration,
    in_flight: Arc<InFlight>,
}

impl FeedRefresher {
    /// `fetch_deadline` bounds the whole fetch including retries.
    pub fn new(db: Database, source: Arc<dyn FeedSource>, fetch_deadline: Duration) -> Self {
        Self {
            db,
            source,
            fetch_deadline,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Claim a feed for refreshing. `None` if it is already claimed.
    pub fn try_claim(&self, feed_id: i64) -> Option<RefreshClaim> {
        let inserted = self.in_flight.feeds().insert(feed_id);
        inserted.then(|| RefreshClaim {
            in_flight: Arc::clone(&self.in_flight),
            feed_id,
        })
    }

    /// Number of feeds currently claimed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.feeds().len()
    }

    /// Wait until no feed is claimed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.feeds().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Refresh one feed.
    ///
    /// Missing and inactive feeds are skipped without touching storage. For
    /// an active feed the fetch time is stamped whether the fetch succeeds or
    /// not, so a broken feed waits a full interval before the next attempt.
    pub async fn refresh(&self, feed_id: i64) -> RefreshOutcome {
        match self.try_claim(feed_id) {
            Some(claim) => self.refresh_claimed(claim).await,
            None => {
                tracing::debug!(feed_id = feed_id, "Refresh already running, skipping");
                RefreshOutcome::AlreadyRunning
            }
        }
    }

    /// [`refresh`](Self::refresh) for a feed already claimed by the caller.
    /// The claim is released when the refresh finishes.
    pub async fn refresh_claimed(&self, claim: RefreshClaim) -> RefreshOutcome {
        let feed_id = claim.feed_id;
        let feed = match self.db.get_feed(feed_id).await {
            Ok(Some(feed)) if feed.is_active() => feed,
            Ok(Some(_)) => {
                tracing::debug!(feed_id = feed_id, "Feed inactive, skipping");
                return RefreshOutcome::Skipped(SkipReason::Inactive);
            }
            Ok(None) => {
                tracing::debug!(feed_id = feed_id, "Feed not found, skipping");
                return RefreshOutcome::Skipped(SkipReason::NotFound);
            }
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Failed to load feed");
                return RefreshOutcome::Failed(e.into());
            }
        };

        let outcome = match self.fetch(&feed).await {
            Ok(parsed) => {
                let summary = self.ingest(&feed, parsed).await;
                tracing::info!(
                    feed_id = feed.id,
                    created = summary.created,
                    updated = summary.updated,
                    failed = summary.failed_entries,
                    "Feed refreshed"
                );
                RefreshOutcome::Completed(summary)
            }
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed fetch failed");
                RefreshOutcome::Failed(e.into())
            }
        };

        if let Err(e) = self.db.mark_feed_fetched(feed.id, Utc::now()).await {
            tracing::warn!(feed_id = feed.id, error = %e, "Failed to stamp fetch time");
        }

        outcome
    }

    async fn fetch(&self, feed: &Feed) -> Result<ParsedFeed, FetchError> {
        tokio::time::timeout(self.fetch_deadline, self.source.fetch_and_parse(&feed.url))
            .await
            .map_err(|_| FetchError::Timeout)?
    }

    async fn ingest(&self, feed: &Feed, parsed: ParsedFeed) -> RefreshSummary {
        let mut summary = RefreshSummary {
            enriched: self.enrich(feed, &parsed).await,
            ..RefreshSummary::default()
        };

        for raw in &parsed.items {
            let entry = normalize(raw);
            match merge(&self.db, feed.id, &entry).await {
                Ok(MergeOutcome::Created { .. }) => summary.created += 1,
                Ok(MergeOutcome::Updated { .. }) => summary.updated += 1,
                Err(e) => {
                    summary.failed_entries += 1;
                    tracing::warn!(
                        feed_id = feed.id,
                        guid = %entry.guid,
                        error = %e,
                        "Failed to merge entry"
                    );
                }
            }
        }

        summary
    }

    /// Adopt the source title and description where the feed still carries
    /// its creation defaults.
    async fn enrich(&self, feed: &Feed, parsed: &ParsedFeed) -> EnrichedFields {
        let title = parsed
            .title
            .as_deref()
            .filter(|_| feed.has_generic_title())
            .map(|t| strip_control_chars(t).trim().to_string())
            .filter(|t| !t.is_empty());
        let description = parsed
            .description
            .as_deref()
            .filter(|_| feed.has_generic_description())
            .and_then(strip_html);

        if title.is_none() && description.is_none() {
            return EnrichedFields::default();
        }

        match self
            .db
            .enrich_feed_metadata(feed.id, title.as_deref(), description.as_deref())
            .await
        {
            Ok(enriched) => {
                if enriched.any() {
                    tracing::debug!(
                        feed_id = feed.id,
                        title = enriched.title,
                        description = enriched.description,
                        "Enriched feed metadata"
                    );
                }
                enriched
            }
            Err(e) => {
                tracing::warn!(feed_id = feed.id, error = %e, "Failed to enrich feed metadata");
                EnrichedFields::default()
            }
        }
    }
}

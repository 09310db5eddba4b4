//! Feed polling and ingestion.
//!
//! - [`parser`] turns RSS/Atom/JSON Feed bytes into raw entries via `feed-rs`
//! - [`source`] fetches documents over HTTP behind the [`FeedSource`] trait
//! - [`normalizer`] maps raw entries onto [`CanonicalEntry`] and derives the
//!   dedup key
//! - [`merger`] upserts canonical entries by `(feed_id, guid)`
//! - [`refresher`] runs the per-feed pipeline and never propagates errors
//! - [`due`] picks which active feeds have waited out their interval
//! - [`scheduler`] ticks, selects and dispatches refreshes with bounded
//!   concurrency
//!
//! Data flow: timer → [`PollScheduler`] → [`select_due`] → [`FeedRefresher`]
//! per feed → [`normalize`] → [`merge`] → storage.

pub mod due;
pub mod merger;
pub mod normalizer;
pub mod parser;
pub mod refresher;
pub mod scheduler;
pub mod source;

pub use crate::storage::CanonicalEntry;
pub use due::{candidate_window, is_due, select_due, select_due_at};
pub use merger::merge;
pub use normalizer::{derive_guid, normalize, NO_GUID};
pub use parser::{parse_feed, ParseError, ParsedFeed, RawEntry};
pub use refresher::{
    FeedRefresher, RefreshClaim, RefreshError, RefreshOutcome, RefreshSummary, SkipReason,
};
pub use scheduler::{PollScheduler, SchedulerConfig, SchedulerHandle, TickReport};
pub use source::{FeedSource, FetchError, FetchOptions, HttpFeedSource};

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors surfaced by every `Database` operation.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Schema migration failed while opening the database
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A referenced row does not exist
    #[error("{0} {1} not found")]
    NotFound(&'static str, i64),

    /// Input rejected before it reached SQLite
    #[error("Invalid value: {0}")]
    Invalid(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Constants
// ============================================================================

/// Refresh interval assigned to feeds created without one.
pub const DEFAULT_UPDATE_FREQ_MIN: i64 = 60;

/// Title stored for entries whose source gives none.
pub const UNTITLED_ARTICLE: &str = "Untitled";

// ============================================================================
// Feed
// ============================================================================

/// Whether the ingestion engine polls a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedStatus {
    #[default]
    Active,
    Inactive,
}

impl FeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStatus::Active => "active",
            FeedStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(FeedStatus::Active),
            "inactive" => Ok(FeedStatus::Inactive),
            other => Err(DatabaseError::Invalid(format!("feed status {other:?}"))),
        }
    }
}

/// A subscription to a remote syndication source, owned by a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub collection_id: i64,
    pub url: String,
    /// Equals `url` until a member customizes it or the first fetch enriches it
    pub title: String,
    pub description: Option<String>,
    /// Minutes between polls; always positive
    pub update_freq_min: i64,
    pub status: FeedStatus,
    /// Stamped on every fetch attempt, successful or not
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl Feed {
    pub fn is_active(&self) -> bool {
        self.status == FeedStatus::Active
    }

    /// True while the title was never set to anything but the URL.
    pub fn has_generic_title(&self) -> bool {
        self.title == self.url
    }

    /// True while the description is missing or empty.
    pub fn has_generic_description(&self) -> bool {
        self.description.as_deref().map_or(true, str::is_empty)
    }
}

/// Input for creating a feed. Unset fields take the service defaults.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub update_freq_min: Option<i64>,
    pub status: Option<FeedStatus>,
}

impl NewFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_update_freq_min(mut self, minutes: i64) -> Self {
        self.update_freq_min = Some(minutes);
        self
    }

    pub fn with_status(mut self, status: FeedStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Partial feed update. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedUpdate {
    pub title: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
    pub update_freq_min: Option<i64>,
    pub status: Option<FeedStatus>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl FeedUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetched_at(at: DateTime<Utc>) -> Self {
        Self {
            last_fetched_at: Some(at),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_update_freq_min(mut self, minutes: i64) -> Self {
        self.update_freq_min = Some(minutes);
        self
    }

    pub fn with_status(mut self, status: FeedStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.update_freq_min.is_none()
            && self.status.is_none()
            && self.last_fetched_at.is_none()
    }
}

/// The three columns the due-selection query needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueCandidate {
    pub id: i64,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub update_freq_min: i64,
}

/// Internal row type for feed queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub collection_id: i64,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub update_freq_min: i64,
    pub status: String,
    pub last_fetched_at: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Result<Feed, DatabaseError> {
        Ok(Feed {
            id: self.id,
            collection_id: self.collection_id,
            url: self.url,
            title: self.title,
            description: self.description,
            update_freq_min: self.update_freq_min,
            status: self.status.parse()?,
            last_fetched_at: self.last_fetched_at.and_then(from_millis),
        })
    }
}

// ============================================================================
// Article
// ============================================================================

/// One syndicated item once merged into storage, unique per `(feed_id, guid)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Markup-stripped plain text
    pub summary: Option<String>,
    pub content_html: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    /// How many fetches have carried this guid
    pub seen_count: i64,
}

/// Canonical form of one feed entry, as produced by the normalizer and
/// consumed by the article upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEntry {
    /// Derived dedup key, unique within a feed
    pub guid: String,
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub content_html: Option<String>,
}

/// Internal row type for Article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    pub summary: Option<String>,
    pub content_html: Option<String>,
    pub first_seen_at: i64,
    pub seen_count: i64,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            guid: self.guid,
            title: self.title,
            link: self.link,
            author: self.author,
            published_at: self.published_at.and_then(from_millis),
            summary: self.summary,
            content_html: self.content_html,
            first_seen_at: from_millis(self.first_seen_at).unwrap_or_default(),
            seen_count: self.seen_count,
        }
    }
}

/// Result of a create-or-update on `(feed_id, guid)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First sighting: every canonical field was written
    Created { article_id: i64 },
    /// Repeat sighting: only title and link were rewritten
    Updated { article_id: i64 },
}

impl MergeOutcome {
    pub fn article_id(&self) -> i64 {
        match self {
            MergeOutcome::Created { article_id } | MergeOutcome::Updated { article_id } => {
                *article_id
            }
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, MergeOutcome::Created { .. })
    }
}

/// One page of a collection's articles, newest first.
#[derive(Debug, Clone)]
pub struct ArticlePage {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub articles: Vec<CollectionArticle>,
}

/// Article listing row carrying its feed's title.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionArticle {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CollectionArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    pub summary: Option<String>,
}

impl CollectionArticleDbRow {
    pub(crate) fn into_article(self) -> CollectionArticle {
        CollectionArticle {
            id: self.id,
            feed_id: self.feed_id,
            feed_title: self.feed_title,
            title: self.title,
            link: self.link,
            author: self.author,
            published_at: self.published_at.and_then(from_millis),
            summary: self.summary,
        }
    }
}

// ============================================================================
// Collection
// ============================================================================

/// A named group of feeds shared by its members.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Collection {
    pub id: i64,
    pub name: String,
}

// ============================================================================
// Timestamp helpers
// ============================================================================

/// Timestamps are stored as Unix milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

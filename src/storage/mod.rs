//! SQLite store for collections, feeds and articles.
//!
//! The ingestion engine reads feeds, stamps fetch times, enriches metadata
//! and upserts articles through [`Database`]. Per-user article state lives
//! outside this crate.

mod articles;
mod collections;
mod feeds;
mod schema;
mod types;

pub use articles::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use feeds::EnrichedFields;
pub use schema::Database;
pub use types::{
    Article, ArticlePage, CanonicalEntry, Collection, CollectionArticle, DatabaseError,
    DueCandidate, Feed, FeedStatus, FeedUpdate, MergeOutcome, NewFeed, DEFAULT_UPDATE_FREQ_MIN,
    UNTITLED_ARTICLE,
};

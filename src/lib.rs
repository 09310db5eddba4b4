//! Feed polling and ingestion engine for a shared feed-reading service.
//!
//! Collections group feeds; each active feed is polled on its own interval,
//! and its entries are normalized and merged into SQLite without
//! duplicates. A failure in one feed or one entry never stops the others.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    from_millis, to_millis, DatabaseError, DueCandidate, Feed, FeedDbRow, FeedStatus, FeedUpdate,
    NewFeed, DEFAULT_UPDATE_FREQ_MIN,
};

/// Which metadata columns a refresh filled in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichedFields {
    pub title: bool,
    pub description: bool,
}

impl EnrichedFields {
    pub fn any(&self) -> bool {
        self.title || self.description
    }
}

const FEED_COLUMNS: &str =
    "id, collection_id, url, title, description, update_freq_min, status, last_fetched_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Create a feed in a collection, returning its ID.
    ///
    /// Defaults: title is the URL, no description, 60 minute interval, active.
    /// A feed created with its URL as title gets its title from the source on
    /// the first successful fetch.
    pub async fn insert_feed(
        &self,
        collection_id: i64,
        feed: &NewFeed,
    ) -> Result<i64, DatabaseError> {
        let url = feed.url.trim();
        if url.is_empty() {
            return Err(DatabaseError::Invalid("feed url cannot be empty".to_string()));
        }
        let update_freq_min = feed.update_freq_min.unwrap_or(DEFAULT_UPDATE_FREQ_MIN);
        validate_update_freq(update_freq_min)?;

        if self.get_collection(collection_id).await?.is_none() {
            return Err(DatabaseError::NotFound("collection", collection_id));
        }

        let title = feed
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(url);

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (collection_id, url, title, description, update_freq_min, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(collection_id)
        .bind(url)
        .bind(title)
        .bind(&feed.description)
        .bind(update_freq_min)
        .bind(feed.status.unwrap_or_default().as_str())
        .bind(to_millis(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Load one feed. A missing feed is `Ok(None)`, not an error.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedDbRow::into_feed).transpose()
    }

    /// All feeds of a collection, ordered by title.
    pub async fn get_feeds_for_collection(
        &self,
        collection_id: i64,
    ) -> Result<Vec<Feed>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE collection_id = ? ORDER BY title, id"
        ))
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FeedDbRow::into_feed).collect()
    }

    /// Active feeds ordered by `last_fetched_at` ascending, never-fetched first.
    ///
    /// Ties (including all never-fetched feeds) break on ID so the order is
    /// stable between calls.
    pub async fn list_active_feeds_by_last_fetched(
        &self,
        limit: usize,
    ) -> Result<Vec<DueCandidate>, DatabaseError> {
        let rows: Vec<(i64, Option<i64>, i64)> = sqlx::query_as(
            r#"
            SELECT id, last_fetched_at, update_freq_min
            FROM feeds
            WHERE status = 'active'
            ORDER BY last_fetched_at IS NOT NULL, last_fetched_at ASC, id ASC
            LIMIT ?
        "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, last_fetched_at, update_freq_min)| DueCandidate {
                id,
                last_fetched_at: last_fetched_at.and_then(from_millis),
                update_freq_min,
            })
            .collect())
    }

    /// Apply a partial update. Returns whether the feed exists.
    pub async fn update_feed(&self, feed_id: i64, update: &FeedUpdate) -> Result<bool, DatabaseError> {
        if let Some(minutes) = update.update_freq_min {
            validate_update_freq(minutes)?;
        }
        if update.is_empty() {
            return Ok(self.get_feed(feed_id).await?.is_some());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE feeds SET ");
        let mut set = builder.separated(", ");
        if let Some(title) = &update.title {
            set.push("title = ").push_bind_unseparated(title);
        }
        if let Some(description) = &update.description {
            set.push("description = ")
                .push_bind_unseparated(description.as_deref());
        }
        if let Some(minutes) = update.update_freq_min {
            set.push("update_freq_min = ").push_bind_unseparated(minutes);
        }
        if let Some(status) = update.status {
            set.push("status = ").push_bind_unseparated(status.as_str());
        }
        if let Some(at) = update.last_fetched_at {
            set.push("last_fetched_at = ")
                .push_bind_unseparated(to_millis(at));
        }
        builder.push(" WHERE id = ").push_bind(feed_id);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stamp the time of a fetch attempt.
    pub async fn mark_feed_fetched(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.update_feed(feed_id, &FeedUpdate::fetched_at(at)).await
    }

    /// Change whether a feed is polled.
    pub async fn set_feed_status(
        &self,
        feed_id: i64,
        status: FeedStatus,
    ) -> Result<(), DatabaseError> {
        if self
            .update_feed(feed_id, &FeedUpdate::new().with_status(status))
            .await?
        {
            Ok(())
        } else {
            Err(DatabaseError::NotFound("feed", feed_id))
        }
    }

    /// Fill in title and description from source metadata, only where they
    /// are still generic.
    ///
    /// The title is replaced only while it still equals the URL; the
    /// description only while it is NULL or empty. The gate is evaluated by
    /// SQLite in the same statement as the write, so a member renaming the
    /// feed mid-refresh is never overwritten.
    pub async fn enrich_feed_metadata(
        &self,
        feed_id: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<EnrichedFields, DatabaseError> {
        let mut enriched = EnrichedFields::default();
        if title.is_none() && description.is_none() {
            return Ok(enriched);
        }

        let mut tx = self.pool.begin().await?;

        if let Some(title) = title {
            let result = sqlx::query("UPDATE feeds SET title = ? WHERE id = ? AND title = url")
                .bind(title)
                .bind(feed_id)
                .execute(&mut *tx)
                .await?;
            enriched.title = result.rows_affected() > 0;
        }

        if let Some(description) = description {
            let result = sqlx::query(
                "UPDATE feeds SET description = ? WHERE id = ? AND (description IS NULL OR description = '')",
            )
            .bind(description)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
            enriched.description = result.rows_affected() > 0;
        }

        tx.commit().await?;
        Ok(enriched)
    }
}

fn validate_update_freq(minutes: i64) -> Result<(), DatabaseError> {
    if minutes <= 0 {
        return Err(DatabaseError::Invalid(format!(
            "update_freq_min must be positive, got {minutes}"
        )));
    }
    Ok(())
}

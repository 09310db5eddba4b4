use chrono::Utc;

use super::schema::Database;
use super::types::{
    to_millis, Article, ArticleDbRow, ArticlePage, CanonicalEntry, CollectionArticleDbRow,
    DatabaseError, MergeOutcome,
};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from a per-feed query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// Default page size for collection listings
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Largest page a collection listing will return
pub const MAX_PAGE_SIZE: i64 = 100;

const ARTICLE_COLUMNS: &str = "id, feed_id, guid, title, link, author, published_at, summary, \
                               content_html, first_seen_at, seen_count";

impl Database {
    // ========================================================================
    // Article Upsert
    // ========================================================================

    /// Create or update the article keyed by `(feed_id, guid)`.
    ///
    /// First sighting inserts every canonical field. A repeat sighting
    /// rewrites only `title` and `link`; author, publication date, summary and
    /// content keep their first-written values.
    ///
    /// This is one `INSERT ... ON CONFLICT DO UPDATE` statement, so two
    /// refreshes of the same feed racing on the same guid serialize in SQLite:
    /// exactly one of them creates the row and the other updates it.
    /// `seen_count` tells the two cases apart.
    pub async fn upsert_article(
        &self,
        feed_id: i64,
        entry: &CanonicalEntry,
    ) -> Result<MergeOutcome, DatabaseError> {
        let (article_id, seen_count): (i64, i64) = sqlx::query_as(
            r#"
            INSERT INTO articles
                (feed_id, guid, title, link, author, published_at, summary, content_html, first_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(feed_id, guid) DO UPDATE SET
                title = excluded.title,
                link = excluded.link,
                seen_count = seen_count + 1
            RETURNING id, seen_count
        "#,
        )
        .bind(feed_id)
        .bind(&entry.guid)
        .bind(&entry.title)
        .bind(&entry.link)
        .bind(&entry.author)
        .bind(entry.published_at.map(to_millis))
        .bind(&entry.summary)
        .bind(&entry.content_html)
        .bind(to_millis(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        Ok(if seen_count == 1 {
            MergeOutcome::Created { article_id }
        } else {
            MergeOutcome::Updated { article_id }
        })
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Look up an article by its identity.
    pub async fn get_article(
        &self,
        feed_id: i64,
        guid: &str,
    ) -> Result<Option<Article>, DatabaseError> {
        let row = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE feed_id = ? AND guid = ?"
        ))
        .bind(feed_id)
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ArticleDbRow::into_article))
    }

    /// Articles of one feed, newest first, capped at 2000 rows.
    pub async fn get_articles_for_feed(&self, feed_id: i64) -> Result<Vec<Article>, DatabaseError> {
        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS}
            FROM articles
            WHERE feed_id = ?
            ORDER BY published_at DESC, first_seen_at DESC, id DESC
            LIMIT ?
        "#
        ))
        .bind(feed_id)
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    pub async fn count_articles_for_feed(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// One page of a collection's articles across all its feeds, newest first.
    ///
    /// `page` is 1-based and clamped to at least 1; `page_size` is clamped
    /// to `1..=100`.
    pub async fn get_articles_for_collection(
        &self,
        collection_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<ArticlePage, DatabaseError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(page_size);

        let rows = sqlx::query_as::<_, CollectionArticleDbRow>(
            r#"
            SELECT a.id, a.feed_id, f.title AS feed_title, a.title, a.link, a.author,
                   a.published_at, a.summary
            FROM articles a
            JOIN feeds f ON f.id = a.feed_id
            WHERE f.collection_id = ?
            ORDER BY a.published_at DESC, a.id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(collection_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM articles a JOIN feeds f ON f.id = a.feed_id WHERE f.collection_id = ?",
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ArticlePage {
            page,
            page_size,
            total: total.0,
            articles: rows
                .into_iter()
                .map(CollectionArticleDbRow::into_article)
                .collect(),
        })
    }
}

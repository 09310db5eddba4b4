use chrono::{DateTime, Duration, Utc};

use crate::storage::{Database, DatabaseError, DEFAULT_UPDATE_FREQ_MIN};

/// Smallest number of candidates read per selection.
pub const MIN_CANDIDATE_WINDOW: usize = 20;

/// Candidates read per requested feed. Feeds whose interval has not elapsed
/// are filtered after the query, so the window over-fetches.
pub const CANDIDATE_FACTOR: usize = 3;

/// Size of the candidate window for a per-cycle budget of `limit` feeds.
pub fn candidate_window(limit: usize) -> usize {
    limit.saturating_mul(CANDIDATE_FACTOR).max(MIN_CANDIDATE_WINDOW)
}

/// Whether a feed's refresh interval has elapsed.
///
/// Never-fetched feeds are always due. The comparison is strict: a feed
/// fetched exactly `update_freq_min` minutes ago is not due yet. An interval
/// too large to represent as a duration never elapses.
pub fn is_due(
    last_fetched_at: Option<DateTime<Utc>>,
    update_freq_min: i64,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_fetched_at else {
        return true;
    };
    let freq = if update_freq_min > 0 {
        update_freq_min
    } else {
        DEFAULT_UPDATE_FREQ_MIN
    };
    match Duration::try_minutes(freq) {
        Some(interval) => now.signed_duration_since(last) > interval,
        None => false,
    }
}

/// Up to `limit` due feed IDs, oldest fetch first.
pub async fn select_due(db: &Database, limit: usize) -> Result<Vec<i64>, DatabaseError> {
    select_due_at(db, limit, Utc::now()).await
}

/// [`select_due`] against an explicit clock.
pub async fn select_due_at(
    db: &Database,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<i64>, DatabaseError> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let candidates = db
        .list_active_feeds_by_last_fetched(candidate_window(limit))
        .await?;
    let considered = candidates.len();

    let due: Vec<i64> = candidates
        .into_iter()
        .filter(|c| is_due(c.last_fetched_at, c.update_freq_min, now))
        .map(|c| c.id)
        .take(limit)
        .collect();

    tracing::debug!(
        considered = considered,
        due = due.len(),
        limit = limit,
        "Selected due feeds"
    );
    Ok(due)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FeedStatus, NewFeed};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    // ------------------------------------------------------------------------
    // Predicate
    // ------------------------------------------------------------------------

    #[test]
    fn test_never_fetched_is_due() {
        assert!(is_due(None, 60, now()));
    }

    #[test]
    fn test_due_boundary() {
        assert!(is_due(Some(now() - Duration::minutes(61)), 60, now()));
        assert!(!is_due(Some(now() - Duration::minutes(59)), 60, now()));
        assert!(!is_due(Some(now() - Duration::minutes(60)), 60, now()));
    }

    #[test]
    fn test_non_positive_interval_uses_default() {
        assert!(!is_due(Some(now() - Duration::minutes(30)), 0, now()));
        assert!(is_due(Some(now() - Duration::minutes(61)), -5, now()));
    }

    #[test]
    fn test_unrepresentable_interval_never_due() {
        let long_ago = Some(now() - Duration::days(365 * 100));
        assert!(!is_due(long_ago, i64::MAX, now()));
        assert!(!is_due(long_ago, 200_000_000_000_000, now()));
        assert!(is_due(None, i64::MAX, now()));
    }

    #[test]
    fn test_future_fetch_time_not_due() {
        assert!(!is_due(Some(now() + Duration::minutes(5)), 60, now()));
    }

    #[test]
    fn test_candidate_window() {
        assert_eq!(candidate_window(0), 20);
        assert_eq!(candidate_window(5), 20);
        assert_eq!(candidate_window(10), 30);
        assert_eq!(candidate_window(usize::MAX), usize::MAX);
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let collection = db.create_collection("Test").await.unwrap();
        (db, collection)
    }

    async fn feed(db: &Database, collection: i64, url: &str, fetched_min_ago: Option<i64>) -> i64 {
        let id = db.insert_feed(collection, &NewFeed::new(url)).await.unwrap();
        if let Some(minutes) = fetched_min_ago {
            db.mark_feed_fetched(id, now() - Duration::minutes(minutes))
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test]
    async fn test_select_orders_oldest_first_and_filters() {
        let (db, c) = setup().await;
        let recent = feed(&db, c, "https://a/feed", Some(10)).await;
        let stale = feed(&db, c, "https://b/feed", Some(120)).await;
        let never = feed(&db, c, "https://c/feed", None).await;
        let staler = feed(&db, c, "https://d/feed", Some(600)).await;

        let due = select_due_at(&db, 10, now()).await.unwrap();
        assert_eq!(due, vec![never, staler, stale]);
        assert!(!due.contains(&recent));
    }

    #[tokio::test]
    async fn test_select_truncates_to_limit() {
        let (db, c) = setup().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(feed(&db, c, &format!("https://f{}/feed", i), None).await);
        }

        let due = select_due_at(&db, 2, now()).await.unwrap();
        assert_eq!(due, ids[..2].to_vec());
    }

    #[tokio::test]
    async fn test_select_skips_inactive() {
        let (db, c) = setup().await;
        let paused = feed(&db, c, "https://a/feed", None).await;
        let live = feed(&db, c, "https://b/feed", None).await;
        db.set_feed_status(paused, FeedStatus::Inactive).await.unwrap();

        assert_eq!(select_due_at(&db, 10, now()).await.unwrap(), vec![live]);
    }

    #[tokio::test]
    async fn test_select_respects_per_feed_interval() {
        let (db, c) = setup().await;
        let hourly = feed(&db, c, "https://a/feed", Some(90)).await;
        let daily = db
            .insert_feed(
                c,
                &NewFeed::new("https://b/feed").with_update_freq_min(24 * 60),
            )
            .await
            .unwrap();
        db.mark_feed_fetched(daily, now() - Duration::minutes(90))
            .await
            .unwrap();

        assert_eq!(select_due_at(&db, 10, now()).await.unwrap(), vec![hourly]);
    }

    #[tokio::test]
    async fn test_select_survives_huge_interval() {
        let (db, c) = setup().await;
        let huge = db
            .insert_feed(
                c,
                &NewFeed::new("https://a/feed").with_update_freq_min(200_000_000_000_000),
            )
            .await
            .unwrap();
        db.mark_feed_fetched(huge, now() - Duration::minutes(90))
            .await
            .unwrap();
        let normal = feed(&db, c, "https://b/feed", Some(90)).await;

        assert_eq!(select_due_at(&db, 10, now()).await.unwrap(), vec![normal]);
    }

    #[tokio::test]
    async fn test_select_zero_limit_and_empty_store() {
        let (db, c) = setup().await;
        assert!(select_due_at(&db, 10, now()).await.unwrap().is_empty());
        feed(&db, c, "https://a/feed", None).await;
        assert!(select_due_at(&db, 0, now()).await.unwrap().is_empty());
    }
}

use crate::storage::{CanonicalEntry, Database, DatabaseError, MergeOutcome};

/// Merge one canonical entry into the feed's article set.
///
/// Identity is `(feed_id, entry.guid)`. The first sighting stores every
/// field; later sightings refresh only the title and link.
pub async fn merge(
    db: &Database,
    feed_id: i64,
    entry: &CanonicalEntry,
) -> Result<MergeOutcome, DatabaseError> {
    let outcome = db.upsert_article(feed_id, entry).await?;
    tracing::trace!(
        feed_id = feed_id,
        guid = %entry.guid,
        article_id = outcome.article_id(),
        created = outcome.is_created(),
        "Merged entry"
    );
    Ok(outcome)
}

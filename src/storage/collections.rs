use super::schema::Database;
use super::types::{Collection, DatabaseError};
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Collection Operations
    // ========================================================================

    /// Create a collection, returning its ID.
    ///
    /// The name has control characters stripped and is trimmed; a blank name
    /// is rejected.
    pub async fn create_collection(&self, name: &str) -> Result<i64, DatabaseError> {
        let sanitized = strip_control_chars(name);
        let name = sanitized.trim();
        if name.is_empty() {
            return Err(DatabaseError::Invalid(
                "collection name cannot be empty".to_string(),
            ));
        }

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO collections (name, created_at) VALUES (?, ?) RETURNING id",
        )
        .bind(name)
        .bind(chrono::Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    pub async fn get_collection(&self, id: i64) -> Result<Option<Collection>, DatabaseError> {
        let collection = sqlx::query_as::<_, Collection>(
            "SELECT id, name FROM collections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(collection)
    }
}

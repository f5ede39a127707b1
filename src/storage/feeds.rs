use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedWithOwner};

const FEED_COLUMNS: &str = "id, name, url, user_id, last_fetched_at, created_at, updated_at";

/// Fetch stamp for a feed being marked now, in Unix milliseconds.
///
/// Never lower than one past the newest stamp in the table, so the feed just
/// marked is always strictly the freshest and rotation holds even when
/// several feeds are marked within the same millisecond.
const NEXT_FETCH_STAMP: &str =
    "MAX(?, (SELECT COALESCE(MAX(last_fetched_at), 0) + 1 FROM feeds))";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed owned by `user_id`.
    ///
    /// Returns `DatabaseError::Conflict` if the URL is already registered.
    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        user_id: i64,
    ) -> Result<Feed, DatabaseError> {
        let now = Utc::now().timestamp();
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "INSERT INTO feeds (name, url, user_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {FEED_COLUMNS}"
        ))
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DatabaseError::NotFound("feed"))
    }

    /// All feeds with the name of the user who added them, oldest first
    pub async fn list_feeds_with_users(&self) -> Result<Vec<FeedWithOwner>, DatabaseError> {
        let feeds = sqlx::query_as::<_, FeedWithOwner>(
            r#"
            SELECT f.name AS feed_name, f.url AS feed_url, u.name AS owner_name
            FROM feeds f
            LEFT JOIN users u ON u.id = f.user_id
            ORDER BY f.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    // ========================================================================
    // Scheduling Operations
    // ========================================================================

    /// The feed most overdue for a fetch.
    ///
    /// Never-fetched feeds come first, then the oldest `last_fetched_at`;
    /// ties go to the lowest id (insertion order). Returns
    /// `DatabaseError::NoFeeds` when the table is empty.
    pub async fn next_due_feed(&self) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             ORDER BY last_fetched_at ASC NULLS FIRST, id ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DatabaseError::NoFeeds)
    }

    /// Stamp a feed as fetched now (UTC) and return the stamp
    pub async fn mark_feed_fetched(&self, feed_id: i64) -> Result<DateTime<Utc>, DatabaseError> {
        let now = Utc::now();
        let stamp: Option<(i64,)> = sqlx::query_as(&format!(
            "UPDATE feeds SET last_fetched_at = {NEXT_FETCH_STAMP}, updated_at = ? \
             WHERE id = ? RETURNING last_fetched_at"
        ))
        .bind(now.timestamp_millis())
        .bind(now.timestamp())
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        let (stamp,) = stamp.ok_or(DatabaseError::NotFound("feed"))?;
        Ok(DateTime::from_timestamp_millis(stamp).unwrap_or(now))
    }

    /// Select the next due feed and mark it fetched in one statement.
    ///
    /// The subquery and the update run atomically, so two schedulers sharing
    /// a database never claim the same feed for the same slot. The returned
    /// row already carries the new `last_fetched_at`.
    pub async fn claim_next_feed(&self) -> Result<Feed, DatabaseError> {
        let now = Utc::now();
        sqlx::query_as::<_, Feed>(&format!(
            "UPDATE feeds SET last_fetched_at = {NEXT_FETCH_STAMP}, updated_at = ? \
             WHERE id = (SELECT id FROM feeds \
                         ORDER BY last_fetched_at ASC NULLS FIRST, id ASC LIMIT 1) \
             RETURNING {FEED_COLUMNS}"
        ))
        .bind(now.timestamp_millis())
        .bind(now.timestamp())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DatabaseError::NoFeeds)
    }
}

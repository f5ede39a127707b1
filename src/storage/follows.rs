use super::schema::Database;
use super::types::{DatabaseError, FeedFollow};

const FOLLOW_SELECT: &str = r#"
    SELECT ff.id, ff.user_id, ff.feed_id, u.name AS user_name, f.name AS feed_name,
           ff.created_at
    FROM feed_follows ff
    INNER JOIN users u ON u.id = ff.user_id
    INNER JOIN feeds f ON f.id = ff.feed_id
"#;

impl Database {
    // ========================================================================
    // Follow Operations
    // ========================================================================

    /// Subscribe a user to a feed.
    ///
    /// Returns the new relation with user and feed names filled in, or
    /// `DatabaseError::Conflict` if the user already follows the feed.
    pub async fn create_feed_follow(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<FeedFollow, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let (follow_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let follow = sqlx::query_as::<_, FeedFollow>(&format!("{FOLLOW_SELECT} WHERE ff.id = ?"))
            .bind(follow_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(follow)
    }

    /// Unsubscribe a user from the feed with the given URL.
    ///
    /// Returns `DatabaseError::NotFound` if the user was not following it.
    pub async fn delete_feed_follow(&self, user_id: i64, url: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            DELETE FROM feed_follows
            WHERE user_id = ? AND feed_id = (SELECT id FROM feeds WHERE url = ?)
        "#,
        )
        .bind(user_id)
        .bind(url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("follow"));
        }
        Ok(())
    }

    /// Every feed a user follows, in the order they were followed
    pub async fn get_feed_follows_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<FeedFollow>, DatabaseError> {
        let follows = sqlx::query_as::<_, FeedFollow>(&format!(
            "{FOLLOW_SELECT} WHERE ff.user_id = ? ORDER BY ff.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }
}

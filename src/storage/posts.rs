use super::schema::Database;
use super::types::{DatabaseError, NewPost, Post};

/// Maximum number of posts returned by a single browse query
const MAX_BROWSE_LIMIT: i64 = 500;

const POST_COLUMNS: &str =
    "id, feed_id, title, description, url, published_at, created_at, updated_at";

/// Durable sink for ingested posts.
///
/// Implementations must report a duplicate URL as [`DatabaseError::Conflict`]
/// and nothing else as a conflict; ingestion relies on that to tell expected
/// duplicates from real failures.
#[allow(async_fn_in_trait)]
pub trait PostStore {
    async fn insert_post(&self, post: &NewPost) -> Result<Post, DatabaseError>;
}

impl PostStore for Database {
    async fn insert_post(&self, post: &NewPost) -> Result<Post, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let stored = sqlx::query_as::<_, Post>(&format!(
            "INSERT INTO posts (feed_id, title, description, url, published_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {POST_COLUMNS}"
        ))
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.description)
        .bind(&post.url)
        .bind(post.published_at)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }
}

impl Database {
    // ========================================================================
    // Post Queries
    // ========================================================================

    /// Posts from every feed the user follows, newest first.
    ///
    /// Posts without a publish date sort after dated ones. `limit` is capped
    /// at [`MAX_BROWSE_LIMIT`].
    pub async fn get_posts_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Post>, DatabaseError> {
        let limit = limit.clamp(0, MAX_BROWSE_LIMIT);
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT p.id, p.feed_id, p.title, p.description, p.url, p.published_at,
                   p.created_at, p.updated_at
            FROM posts p
            INNER JOIN feed_follows ff ON ff.feed_id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC NULLS LAST, p.id DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    /// All posts stored for one feed, in insertion order
    pub async fn get_posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>, DatabaseError> {
        let posts = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE feed_id = ? ORDER BY id"
        ))
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Feed, User};

    async fn setup() -> (Database, User, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        let feed = db
            .create_feed("Blog", "https://example.com/rss", user.id)
            .await
            .unwrap();
        (db, user, feed)
    }

    fn new_post(feed_id: i64, slug: &str, published_at: Option<i64>) -> NewPost {
        NewPost {
            feed_id,
            title: format!("Post {}", slug),
            description: Some("Body".to_string()),
            url: format!("https://example.com/{}", slug),
            published_at,
        }
    }

    #[tokio::test]
    async fn test_insert_post() {
        let (db, _user, feed) = setup().await;
        let post = db
            .insert_post(&new_post(feed.id, "a", Some(1136239445)))
            .await
            .unwrap();
        assert!(post.id > 0);
        assert_eq!(post.title, "Post a");
        assert_eq!(post.published_at, Some(1136239445));
        assert!(post.created_at > 0);
    }

    #[tokio::test]
    async fn test_insert_duplicate_url_is_conflict() {
        let (db, _user, feed) = setup().await;
        db.insert_post(&new_post(feed.id, "a", None)).await.unwrap();

        let err = db
            .insert_post(&new_post(feed.id, "a", None))
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "Expected Conflict, got {:?}", err);
    }

    #[tokio::test]
    async fn test_duplicate_url_across_feeds_is_conflict() {
        let (db, user, feed) = setup().await;
        let other = db
            .create_feed("Mirror", "https://mirror.example.com/rss", user.id)
            .await
            .unwrap();
        db.insert_post(&new_post(feed.id, "a", None)).await.unwrap();

        let err = db
            .insert_post(&new_post(other.id, "a", None))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_insert_for_missing_feed_is_not_conflict() {
        let (db, _user, _feed) = setup().await;
        let err = db.insert_post(&new_post(9999, "a", None)).await.unwrap_err();
        assert!(!err.is_conflict());
    }

    #[tokio::test]
    async fn test_posts_for_user_only_followed_feeds() {
        let (db, user, feed) = setup().await;
        let unfollowed = db
            .create_feed("Other", "https://other.example.com/rss", user.id)
            .await
            .unwrap();
        db.create_feed_follow(user.id, feed.id).await.unwrap();

        db.insert_post(&new_post(feed.id, "mine", Some(100)))
            .await
            .unwrap();
        db.insert_post(&new_post(unfollowed.id, "theirs", Some(200)))
            .await
            .unwrap();

        let posts = db.get_posts_for_user(user.id, 10).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "Post mine");
    }

    #[tokio::test]
    async fn test_posts_for_user_newest_first_undated_last() {
        let (db, user, feed) = setup().await;
        db.create_feed_follow(user.id, feed.id).await.unwrap();

        db.insert_post(&new_post(feed.id, "undated", None))
            .await
            .unwrap();
        db.insert_post(&new_post(feed.id, "old", Some(100)))
            .await
            .unwrap();
        db.insert_post(&new_post(feed.id, "new", Some(300)))
            .await
            .unwrap();

        let titles: Vec<String> = db
            .get_posts_for_user(user.id, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["Post new", "Post old", "Post undated"]);

        let limited = db.get_posts_for_user(user.id, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }
}

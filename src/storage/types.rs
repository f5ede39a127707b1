use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors, classified at the storage boundary.
///
/// Callers match on the variant instead of inspecting driver messages. In
/// particular a unique-constraint violation always surfaces as
/// [`DatabaseError::Conflict`], which the ingestion path treats as an
/// expected duplicate.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The feeds table is empty, so there is nothing to schedule
    #[error("No feeds have been added yet")]
    NoFeeds,

    /// The requested row does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A uniqueness constraint rejected the write
    #[error("Already exists: {0}")]
    Conflict(String),

    /// The store could not be reached (pool timeout, closed pool, I/O, lock contention)
    #[error("Database unavailable: {0}")]
    Unavailable(sqlx::Error),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error.
    ///
    /// SQLite result codes 5 (SQLITE_BUSY) and 6 (SQLITE_LOCKED) mean another
    /// writer holds the database, which we report as unavailability.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DatabaseError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::Database(ref db_err)
                if matches!(db_err.code().as_deref(), Some("5") | Some("6")) =>
            {
                DatabaseError::Unavailable(err)
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Unavailable(err)
            }
            other => DatabaseError::Other(other),
        }
    }

    /// True when the write was rejected by a uniqueness constraint
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict(_))
    }

    /// True when the store itself could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DatabaseError::Unavailable(_))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Feed row.
///
/// `last_fetched_at` is only ever written by the scheduler's mark-fetched
/// step and is in UTC Unix milliseconds. The other timestamps are UTC Unix
/// seconds.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// User who added the feed
    pub user_id: Option<i64>,
    pub last_fetched_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Feed joined with the name of the user who added it (`feeds` command)
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedWithOwner {
    pub feed_name: String,
    pub feed_url: String,
    pub owner_name: Option<String>,
}

/// A follow relation, denormalized with user and feed names for display
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedFollow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub user_name: String,
    pub feed_name: String,
    pub created_at: i64,
}

/// Post about to be inserted. The id and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub feed_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub published_at: Option<i64>,
}

/// Stored post
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

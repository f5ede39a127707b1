//! SQLite-backed persistence for users, feeds, follows, and posts.
//!
//! All operations live on [`Database`], split across one file per table.
//! Errors are classified into [`DatabaseError`] variants here, at the
//! storage boundary, so callers never inspect driver messages.

mod feeds;
mod follows;
mod posts;
mod schema;
mod types;
mod users;

pub use posts::PostStore;
pub use schema::Database;
pub use types::{DatabaseError, Feed, FeedFollow, FeedWithOwner, NewPost, Post, User};

//! Command handlers behind the CLI.
//!
//! Every handler takes an explicit [`Session`] carrying the loaded config
//! and the open database, and writes its user-facing output to `out`.
//! Handlers that act on behalf of someone resolve the current user through
//! [`Session::require_user`] first.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::{parse_interval, Config, ConfigError};
use crate::feed::{FeedFetcher, FetchError};
use crate::scheduler::Scheduler;
use crate::storage::{Database, DatabaseError, User};
use crate::util::{strip_control_chars, validate_feed_url, UrlValidationError};

/// Number of posts `browse` shows when no limit is given
pub const DEFAULT_BROWSE_LIMIT: i64 = 2;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Not logged in: run `gator register <name>` or `gator login <name>` first")]
    NotLoggedIn,

    #[error("User name must not be empty")]
    EmptyName,

    #[error("User {0:?} already exists")]
    UserExists(String),

    #[error("User {0:?} does not exist")]
    UnknownUser(String),

    #[error("A feed with URL {0} already exists, use `gator follow` instead")]
    FeedExists(String),

    #[error("No feed with URL {0}, add it with `gator addfeed` first")]
    FeedNotFound(String),

    #[error("Already following {0}")]
    AlreadyFollowing(String),

    #[error("Not following {0}")]
    NotFollowing(String),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Per-invocation state: config, where it lives, and the database.
pub struct Session {
    config: Config,
    config_path: PathBuf,
    db: Database,
}

impl Session {
    pub fn new(config: Config, config_path: PathBuf, db: Database) -> Self {
        Self {
            config,
            config_path,
            db,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn current_user_name(&self) -> Option<&str> {
        self.config.current_user_name.as_deref()
    }

    /// Resolve the logged-in user, failing if nobody is logged in or the
    /// user no longer exists (e.g. after `reset`).
    pub async fn require_user(&self) -> Result<User, CommandError> {
        let name = self.current_user_name().ok_or(CommandError::NotLoggedIn)?;
        match self.db.get_user(name).await {
            Ok(user) => Ok(user),
            Err(DatabaseError::NotFound(_)) => Err(CommandError::UnknownUser(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Switch the current user and persist the config file
    pub fn set_current_user(&mut self, name: &str) -> Result<(), ConfigError> {
        self.config.current_user_name = Some(name.to_string());
        self.config.save(&self.config_path)?;
        tracing::debug!(user = %name, path = %self.config_path.display(), "Current user saved");
        Ok(())
    }
}

// ============================================================================
// User commands
// ============================================================================

pub async fn register(
    session: &mut Session,
    name: &str,
    out: &mut dyn Write,
) -> Result<User, CommandError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CommandError::EmptyName);
    }

    let user = match session.db.create_user(name).await {
        Ok(user) => user,
        Err(DatabaseError::Conflict(_)) => return Err(CommandError::UserExists(name.to_string())),
        Err(e) => return Err(e.into()),
    };
    session.set_current_user(&user.name)?;

    tracing::info!(user = %user.name, id = user.id, "User registered");
    writeln!(out, "User {} created (id {})", user.name, user.id)?;
    Ok(user)
}

pub async fn login(
    session: &mut Session,
    name: &str,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let user = match session.db.get_user(name.trim()).await {
        Ok(user) => user,
        Err(DatabaseError::NotFound(_)) => {
            return Err(CommandError::UnknownUser(name.trim().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    session.set_current_user(&user.name)?;
    writeln!(out, "Current user set to {}", user.name)?;
    Ok(())
}

/// Delete every user along with their feeds, follows and posts
pub async fn reset(session: &mut Session, out: &mut dyn Write) -> Result<u64, CommandError> {
    let removed = session.db.reset().await?;
    tracing::info!(users = removed, "Database reset");
    writeln!(out, "Database reset, {} user(s) removed", removed)?;
    Ok(removed)
}

pub async fn users(session: &Session, out: &mut dyn Write) -> Result<(), CommandError> {
    let current = session.current_user_name();
    for user in session.db.list_users().await? {
        if Some(user.name.as_str()) == current {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

// ============================================================================
// Aggregation
// ============================================================================

/// Poll feeds every `interval` until Ctrl-C.
///
/// The interval is validated before anything else happens; a bad value never
/// starts the loop.
pub async fn agg(
    session: &Session,
    interval: &str,
    fetch_timeout: Duration,
    out: &mut dyn Write,
) -> Result<u64, CommandError> {
    let interval = parse_interval(interval)?;
    let fetcher = FeedFetcher::new(fetch_timeout)?;
    let scheduler = Scheduler::new(session.db.clone(), fetcher, interval)?;

    writeln!(out, "Collecting feeds every {:?}", scheduler.interval())?;
    out.flush()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, stopping after the current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive: dropping it would stop the loop
                tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
        }
    });

    Ok(scheduler.run(shutdown_rx).await)
}

// ============================================================================
// Feed commands
// ============================================================================

/// Add a feed owned by the current user and follow it
pub async fn addfeed(
    session: &Session,
    name: &str,
    url: &str,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let user = session.require_user().await?;
    let url = validate_feed_url(url)?;

    let feed = match session.db.create_feed(name.trim(), url.as_str(), user.id).await {
        Ok(feed) => feed,
        Err(DatabaseError::Conflict(_)) => return Err(CommandError::FeedExists(url.to_string())),
        Err(e) => return Err(e.into()),
    };
    tracing::info!(feed = %feed.name, url = %feed.url, user = %user.name, "Feed added");
    writeln!(out, "Added feed {} ({}) with id {}", feed.name, feed.url, feed.id)?;

    let follow = session.db.create_feed_follow(user.id, feed.id).await?;
    writeln!(
        out,
        "User {} is now following feed {}",
        follow.user_name, follow.feed_name
    )?;
    Ok(())
}

pub async fn feeds(session: &Session, out: &mut dyn Write) -> Result<(), CommandError> {
    let feeds = session.db.list_feeds_with_users().await?;
    if feeds.is_empty() {
        writeln!(out, "No feeds yet")?;
        return Ok(());
    }
    for feed in feeds {
        writeln!(out, "* {}", strip_control_chars(&feed.feed_name))?;
        writeln!(out, "  URL:      {}", feed.feed_url)?;
        writeln!(
            out,
            "  Added by: {}",
            feed.owner_name.as_deref().unwrap_or("(unknown)")
        )?;
    }
    Ok(())
}

pub async fn follow(session: &Session, url: &str, out: &mut dyn Write) -> Result<(), CommandError> {
    let user = session.require_user().await?;
    let url = validate_feed_url(url)?;

    let feed = match session.db.get_feed_by_url(url.as_str()).await {
        Ok(feed) => feed,
        Err(DatabaseError::NotFound(_)) => return Err(CommandError::FeedNotFound(url.to_string())),
        Err(e) => return Err(e.into()),
    };

    let follow = match session.db.create_feed_follow(user.id, feed.id).await {
        Ok(follow) => follow,
        Err(DatabaseError::Conflict(_)) => {
            return Err(CommandError::AlreadyFollowing(feed.name))
        }
        Err(e) => return Err(e.into()),
    };
    writeln!(
        out,
        "User {} is now following feed {}",
        follow.user_name, follow.feed_name
    )?;
    Ok(())
}

pub async fn following(session: &Session, out: &mut dyn Write) -> Result<(), CommandError> {
    let user = session.require_user().await?;
    let follows = session.db.get_feed_follows_for_user(user.id).await?;
    if follows.is_empty() {
        writeln!(out, "{} is not following any feeds", user.name)?;
        return Ok(());
    }
    writeln!(out, "Followed feeds:")?;
    for (i, follow) in follows.iter().enumerate() {
        writeln!(out, "{}. {}", i + 1, strip_control_chars(&follow.feed_name))?;
    }
    Ok(())
}

pub async fn unfollow(session: &Session, url: &str, out: &mut dyn Write) -> Result<(), CommandError> {
    let user = session.require_user().await?;
    let url = validate_feed_url(url)?;

    match session.db.delete_feed_follow(user.id, url.as_str()).await {
        Ok(()) => {}
        Err(DatabaseError::NotFound(_)) => return Err(CommandError::NotFollowing(url.to_string())),
        Err(e) => return Err(e.into()),
    }
    writeln!(out, "Unfollowed {}", url)?;
    Ok(())
}

/// Show the newest posts from feeds the current user follows
pub async fn browse(session: &Session, limit: i64, out: &mut dyn Write) -> Result<usize, CommandError> {
    let user = session.require_user().await?;
    let posts = session.db.get_posts_for_user(user.id, limit).await?;

    if posts.is_empty() {
        writeln!(out, "No posts yet, run `gator agg <interval>` to collect some")?;
        return Ok(0);
    }

    for post in &posts {
        let published = post
            .published_at
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "unknown date".to_string());

        writeln!(out, "{} ({})", strip_control_chars(&post.title), published)?;
        writeln!(out, "  {}", post.url)?;
        if let Some(description) = &post.description {
            writeln!(out, "  {}", strip_control_chars(description))?;
        }
        writeln!(out)?;
    }
    Ok(posts.len())
}

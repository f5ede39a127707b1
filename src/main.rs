use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use gator::commands::{self, Session, DEFAULT_BROWSE_LIMIT};
use gator::config::Config;
use gator::feed::DEFAULT_FETCH_TIMEOUT;
use gator::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "Multi-user RSS aggregator")]
struct Args {
    /// Config file to use instead of ~/.gatorconfig.json
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// Delete all users, feeds, follows and posts
    Reset,
    /// List users
    Users,
    /// Poll feeds forever, one feed per interval (e.g. 30s, 1m, 1h30m)
    Agg {
        interval: String,
        /// Per-fetch timeout in seconds
        #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs())]
        timeout: u64,
    },
    /// Add a feed and follow it
    Addfeed { name: String, url: String },
    /// List all feeds and who added them
    Feeds,
    /// Follow an existing feed by URL
    Follow { url: String },
    /// List feeds the current user follows
    Following,
    /// Stop following a feed by URL
    Unfollow { url: String },
    /// Show the newest posts from followed feeds
    Browse {
        #[arg(default_value_t = DEFAULT_BROWSE_LIMIT)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path().context("Failed to locate config file")?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to read config '{}'", config_path.display()))?;

    let location = config
        .database_location()
        .context("Failed to resolve database location")?;
    let db = Database::open(&location)
        .await
        .with_context(|| format!("Failed to open database '{}'", location))?;

    let mut session = Session::new(config, config_path, db);
    let mut out = std::io::stdout().lock();

    match args.command {
        Command::Register { name } => {
            commands::register(&mut session, &name, &mut out).await?;
        }
        Command::Login { name } => commands::login(&mut session, &name, &mut out).await?,
        Command::Reset => {
            commands::reset(&mut session, &mut out).await?;
        }
        Command::Users => commands::users(&session, &mut out).await?,
        Command::Agg { interval, timeout } => {
            commands::agg(&session, &interval, Duration::from_secs(timeout), &mut out).await?;
        }
        Command::Addfeed { name, url } => commands::addfeed(&session, &name, &url, &mut out).await?,
        Command::Feeds => commands::feeds(&session, &mut out).await?,
        Command::Follow { url } => commands::follow(&session, &url, &mut out).await?,
        Command::Following => commands::following(&session, &mut out).await?,
        Command::Unfollow { url } => commands::unfollow(&session, &url, &mut out).await?,
        Command::Browse { limit } => {
            commands::browse(&session, limit, &mut out).await?;
        }
    }

    Ok(())
}

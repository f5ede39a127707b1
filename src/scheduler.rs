//! The polling loop.
//!
//! One cycle per tick: claim the most overdue feed (select and mark fetched
//! in one statement), fetch it, ingest it. Cycles never overlap; a tick that
//! comes due while a cycle is still running is delayed, so the interval is a
//! minimum spacing rather than a fixed cadence.
//!
//! Marking before fetching means a failing feed still gives up its slot and
//! drops to the back of the queue instead of being retried on every tick.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::ConfigError;
use crate::feed::{ingest, FeedFetcher, IngestReport};
use crate::storage::{Database, DatabaseError};

/// How a single cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Feed table is empty, nothing to do
    NoFeeds,
    /// The store could not hand out a feed
    StoreError,
    /// The feed was claimed but the fetch failed; no ingestion was attempted
    FetchFailed { feed_id: i64 },
    /// Items were ingested (individually stored or skipped)
    Ingested { feed_id: i64, report: IngestReport },
    /// Ingestion stopped early because the store went away
    IngestAborted { feed_id: i64 },
}

pub struct Scheduler {
    db: Database,
    fetcher: FeedFetcher,
    interval: Duration,
}

impl Scheduler {
    /// Returns `ConfigError::InvalidInterval` for a zero interval.
    pub fn new(db: Database, fetcher: FeedFetcher, interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval(format!(
                "{:?} (must be positive)",
                interval
            )));
        }
        Ok(Self {
            db,
            fetcher,
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run cycles until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The first cycle starts immediately. Shutdown is only observed between
    /// cycles; an in-flight fetch is allowed to finish (it is bounded by the
    /// fetcher's timeout). Returns the number of completed cycles.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval = ?self.interval,
            fetch_timeout = ?self.fetcher.timeout(),
            "Collecting feeds"
        );

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            self.tick().await;
            cycles += 1;
        }

        tracing::info!(cycles, "Feed collection stopped");
        cycles
    }

    /// Perform exactly one select → fetch → ingest cycle.
    pub async fn tick(&self) -> TickOutcome {
        let feed = match self.db.claim_next_feed().await {
            Ok(feed) => feed,
            Err(DatabaseError::NoFeeds) => {
                tracing::info!("No feeds to fetch, skipping tick");
                return TickOutcome::NoFeeds;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to select next feed");
                return TickOutcome::StoreError;
            }
        };

        tracing::debug!(feed_id = feed.id, feed = %feed.name, url = %feed.url, "Fetching feed");

        let channel = match self.fetcher.fetch(&feed.url).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(
                    feed_id = feed.id,
                    feed = %feed.name,
                    url = %feed.url,
                    error = %e,
                    "Failed to fetch feed"
                );
                return TickOutcome::FetchFailed { feed_id: feed.id };
            }
        };

        match ingest(&self.db, feed.id, &channel).await {
            Ok(report) => {
                tracing::info!(
                    feed = %feed.name,
                    found = channel.items.len(),
                    inserted = report.inserted,
                    skipped = report.skipped(),
                    "Feed collected"
                );
                TickOutcome::Ingested {
                    feed_id: feed.id,
                    report,
                }
            }
            Err(e) => {
                tracing::error!(feed = %feed.name, error = %e, "Ingestion aborted");
                TickOutcome::IngestAborted { feed_id: feed.id }
            }
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::User;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(items: &[&str]) -> String {
        let items: String = items
            .iter()
            .map(|slug| {
                format!(
                    "<item><title>{slug}</title><link>https://posts.example.com/{slug}</link>\
                     <pubDate>Mon, 02 Jan 2006 15:04:05 -0700</pubDate></item>"
                )
            })
            .collect();
        format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>{items}</channel></rss>"#)
    }

    async fn setup() -> (Database, User, MockServer) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        (db, user, MockServer::start().await)
    }

    async fn mount_feed(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn scheduler(db: &Database, interval: Duration) -> Scheduler {
        let fetcher = FeedFetcher::new(Duration::from_secs(5)).unwrap();
        Scheduler::new(db.clone(), fetcher, interval).unwrap()
    }

    #[tokio::test]
    async fn test_new_keeps_interval_and_fetch_timeout() {
        let db = Database::open(":memory:").await.unwrap();
        let sched = scheduler(&db, Duration::from_millis(500));
        assert_eq!(sched.interval(), Duration::from_millis(500));
        assert_eq!(sched.fetcher.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let db = Database::open(":memory:").await.unwrap();
        let fetcher = FeedFetcher::new(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            Scheduler::new(db, fetcher, Duration::ZERO),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[tokio::test]
    async fn test_tick_without_feeds() {
        let db = Database::open(":memory:").await.unwrap();
        assert_eq!(
            scheduler(&db, Duration::from_secs(1)).tick().await,
            TickOutcome::NoFeeds
        );
    }

    #[tokio::test]
    async fn test_ticks_visit_null_feeds_by_id() {
        let (db, user, server) = setup().await;
        let mut ids = Vec::new();
        for name in ["one", "two", "three"] {
            mount_feed(&server, &format!("/{name}"), rss(&[name])).await;
            let feed = db
                .create_feed(name, &format!("{}/{name}", server.uri()), user.id)
                .await
                .unwrap();
            ids.push(feed.id);
        }

        let sched = scheduler(&db, Duration::from_secs(1));

        match sched.tick().await {
            TickOutcome::Ingested { feed_id, report } => {
                assert_eq!(feed_id, ids[0]);
                assert_eq!(report.inserted, 1);
            }
            other => panic!("Unexpected outcome {:?}", other),
        }
        match sched.tick().await {
            TickOutcome::Ingested { feed_id, .. } => assert_eq!(feed_id, ids[1]),
            other => panic!("Unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_still_marks_feed() {
        let (db, user, server) = setup().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        let url = format!("{}/missing", server.uri());
        let feed = db.create_feed("Missing", &url, user.id).await.unwrap();

        let outcome = scheduler(&db, Duration::from_secs(1)).tick().await;
        assert_eq!(outcome, TickOutcome::FetchFailed { feed_id: feed.id });

        let stored = db.get_feed_by_url(&url).await.unwrap();
        assert!(stored.last_fetched_at.is_some());
        assert!(db.get_posts_for_feed(feed.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_feed_yields_slot_to_others() {
        let (db, user, server) = setup().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_feed(&server, "/ok", rss(&["a"])).await;

        let broken = db
            .create_feed("Broken", &format!("{}/broken", server.uri()), user.id)
            .await
            .unwrap();
        let ok = db
            .create_feed("Ok", &format!("{}/ok", server.uri()), user.id)
            .await
            .unwrap();

        let sched = scheduler(&db, Duration::from_secs(1));
        assert_eq!(
            sched.tick().await,
            TickOutcome::FetchFailed { feed_id: broken.id }
        );
        assert!(matches!(
            sched.tick().await,
            TickOutcome::Ingested { feed_id, .. } if feed_id == ok.id
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (db, user, server) = setup().await;
        mount_feed(&server, "/feed", rss(&["a", "b"])).await;
        let feed = db
            .create_feed("Feed", &format!("{}/feed", server.uri()), user.id)
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let sched = scheduler(&db, Duration::from_millis(20));
        let handle = tokio::spawn(async move { sched.run(rx).await });

        // Wait for the first cycle to land
        for _ in 0..100 {
            if !db.get_posts_for_feed(feed.id).await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tx.send(true).unwrap();
        let cycles = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert!(cycles >= 1);
        assert_eq!(db.get_posts_for_feed(feed.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_with_shutdown_already_requested() {
        let db = Database::open(":memory:").await.unwrap();
        let (_tx, rx) = watch::channel(true);
        assert_eq!(scheduler(&db, Duration::from_millis(10)).run(rx).await, 0);
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let db = Database::open(":memory:").await.unwrap();
        let (tx, rx) = watch::channel(false);
        drop(tx);
        assert_eq!(scheduler(&db, Duration::from_millis(10)).run(rx).await, 0);
    }
}

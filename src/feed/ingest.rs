use chrono::DateTime;

use super::parser::{FetchedChannel, FetchedItem};
use crate::storage::{DatabaseError, NewPost, PostStore};

/// RFC 1123 with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`
pub const PUB_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Outcome of one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Items stored as new posts
    pub inserted: usize,
    /// Items whose URL was already stored
    pub duplicates: usize,
    /// Items rejected for any other reason
    pub failed: usize,
}

impl IngestReport {
    /// Every item that did not produce a new post
    pub fn skipped(&self) -> usize {
        self.duplicates + self.failed
    }
}

/// Parse a `<pubDate>` value into a UTC Unix timestamp.
///
/// Any layout other than [`PUB_DATE_FORMAT`] yields `None`.
pub fn parse_pub_date(raw: &str) -> Option<i64> {
    DateTime::parse_from_str(raw.trim(), PUB_DATE_FORMAT)
        .ok()
        .map(|dt| dt.timestamp())
}

/// Store every item of `channel` as a post of `feed_id`, in feed order.
///
/// Each item is attempted exactly once. A duplicate URL or any other
/// per-item failure is counted and logged, and the pass moves on to the next
/// item. Only losing the store altogether ([`DatabaseError::Unavailable`])
/// ends the pass early, since every remaining insert would fail the same way.
pub async fn ingest<S: PostStore>(
    store: &S,
    feed_id: i64,
    channel: &FetchedChannel,
) -> Result<IngestReport, DatabaseError> {
    let mut report = IngestReport::default();

    for item in &channel.items {
        let Some(post) = to_new_post(feed_id, item) else {
            tracing::warn!(feed_id, title = %item.title, "Skipping item without a link");
            report.failed += 1;
            continue;
        };

        match store.insert_post(&post).await {
            Ok(_) => report.inserted += 1,
            Err(DatabaseError::Conflict(_)) => {
                tracing::debug!(feed_id, url = %post.url, "Post already stored");
                report.duplicates += 1;
            }
            Err(e) if e.is_unavailable() => {
                tracing::error!(feed_id, error = %e, "Store unavailable, aborting ingestion");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(feed_id, url = %post.url, error = %e, "Couldn't create post");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

fn to_new_post(feed_id: i64, item: &FetchedItem) -> Option<NewPost> {
    let url = item.link.trim();
    if url.is_empty() {
        return None;
    }

    let published_at = parse_pub_date(&item.pub_date);
    if published_at.is_none() && !item.pub_date.trim().is_empty() {
        tracing::debug!(url = %url, pub_date = %item.pub_date, "Unparseable pubDate, storing without it");
    }

    Some(NewPost {
        feed_id,
        title: item.title.clone(),
        description: Some(item.description.clone()).filter(|d| !d.is_empty()),
        url: url.to_string(),
        published_at,
    })
}

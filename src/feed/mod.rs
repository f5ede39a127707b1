//! Feed retrieval and ingestion.
//!
//! - [`parser`] - RSS 2.0 XML into a [`FetchedChannel`], entity decoding included
//! - [`fetcher`] - one bounded HTTP GET per call, no retries
//! - [`ingest`] - maps fetched items to posts and stores them, duplicate-safe
//!
//! # Example
//!
//! ```ignore
//! use gator::feed::{ingest, FeedFetcher, DEFAULT_FETCH_TIMEOUT};
//!
//! let fetcher = FeedFetcher::new(DEFAULT_FETCH_TIMEOUT)?;
//! let channel = fetcher.fetch(&feed.url).await?;
//! let report = ingest(&db, feed.id, &channel).await?;
//! ```

mod fetcher;
mod ingest;
mod parser;

pub use fetcher::{FeedFetcher, FetchError, DEFAULT_FETCH_TIMEOUT};
pub use ingest::{ingest, parse_pub_date, IngestReport, PUB_DATE_FORMAT};
pub use parser::{parse_channel, FetchedChannel, FetchedItem, ParseError};

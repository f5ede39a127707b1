//! Utility functions for common operations.
//!
//! - **Text**: HTML entity decoding for feed text, terminal-safe output
//! - **Durations**: Go-style interval strings (`30s`, `1h30m`) for `agg`
//! - **URL validation**: checks applied before a feed is stored
//!
//! # Examples
//!
//! ```
//! use gator::util::{decode_entities, parse_duration, validate_feed_url};
//! use std::time::Duration;
//!
//! assert_eq!(decode_entities("Q&amp;A"), "Q&A");
//! assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
//! assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
//! ```

mod duration;
mod text;
mod url_validator;

pub use duration::{parse_duration, DurationError};
pub use text::{decode_entities, strip_control_chars};
pub use url_validator::{validate_feed_url, UrlValidationError};

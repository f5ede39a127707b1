//! gator: a multi-user RSS aggregator.
//!
//! Users register, add and follow feeds, and [`scheduler::Scheduler`] polls
//! the stalest feed on every tick, storing new posts and skipping ones it
//! has already seen.

pub mod commands;
pub mod config;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod util;

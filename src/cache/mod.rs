//! Offline caching for the app shell and page requests.
//!
//! - `storage`: durable, versioned key→response store (cache generations)
//! - `strategy`: network-first request handling with cache and offline fallback

mod storage;
mod strategy;
mod traits;

pub use storage::{CacheStorage, SqliteStorage};
pub use strategy::NetworkFirst;
pub use traits::{FetchDisposition, ResponseSource, StrategyResponse};

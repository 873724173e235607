//! # WxAlert Cache
//!
//! The agent's Cache Store: named, versioned generations of request → response snapshots.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage (one per agent origin, shared across agent versions)
//!     ├── Cache "weather-app-cache-v2.0"
//!     └── Cache "weather-app-cache-v2.1"
//!             └── RequestKey (GET + URL) → CacheEntry (status, headers, body)
//! ```
//!
//! Only retrieval (`GET`) requests produce keys, and only successful responses are
//! stored. A storage is either purely in memory or mirrored to a directory, one
//! subdirectory per generation and one JSON file per entry.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

mod entry;
mod persist;
mod storage;

pub use entry::{CacheEntry, RequestKey};
pub use storage::{Cache, CacheStorage};

/// Cache storage shared between concurrently running agent handlers.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Request method {0} is not cacheable")]
    NotRetrieval(String),

    #[error("Refusing to cache {url}: status {status}")]
    NotOk { url: String, status: u16 },

    #[error("Quota exceeded: {needed} bytes needed, quota is {quota}")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

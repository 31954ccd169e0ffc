//! Paged fetch/cache engine.
//!
//! This module reconciles a remote paginated JSON API with a local SQLite
//! cache:
//! - Records are projected onto persisted entities bound to `(filter, order)` slots
//! - Each fetched page replaces the slots from its start onwards
//! - Fetch timestamps drive TTL-based cache policies

mod local;
mod query;
mod remote;
mod stamps;
mod storage;
mod traits;

pub use local::LocalCacheService;
pub use query::{PageQuery, PageRange};
pub use remote::{
  HttpTransport, RemoteFetchService, ReqwestTransport, DEFAULT_CACHE_TIME_INTERVAL_SECS,
  DEFAULT_REQUEST_TIMEOUT,
};
pub use stamps::{SqliteStampStore, StampStore};
#[cfg(test)]
pub use stamps::FetchStamp;
pub use storage::{CachedRow, EntityPredicate, SqliteStore};
pub use traits::{update_if_needed, CachePolicy, PagedResource};

//! Fetch timestamps used to decide whether a cached page is still fresh.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use super::storage::{SqliteStore, StoreContext};
use crate::error::{ServiceError, ServiceResult};

/// When a page request last succeeded and what total it reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchStamp {
  pub fetched_at: DateTime<Utc>,
  pub total_items: usize,
}

impl FetchStamp {
  pub fn now(total_items: usize) -> Self {
    Self {
      fetched_at: Utc::now(),
      total_items,
    }
  }

  pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
    self.fetched_at + ttl < now
  }
}

/// Key-value registry of fetch stamps, keyed by cache identifier.
#[async_trait]
pub trait StampStore: Send + Sync {
  async fn stamp(&self, cache_identifier: &str) -> ServiceResult<Option<FetchStamp>>;

  async fn record(&self, cache_identifier: &str, stamp: FetchStamp) -> ServiceResult<()>;

  /// Forget every recorded stamp. Returns how many were removed.
  async fn clear(&self) -> ServiceResult<usize>;
}

/// Stamps kept in the `fetch_stamps` table of the cache database. Every call
/// is one unit of work on the store.
pub struct SqliteStampStore {
  store: Arc<SqliteStore>,
}

impl SqliteStampStore {
  pub fn new(store: Arc<SqliteStore>) -> Self {
    Self { store }
  }
}

#[async_trait]
impl StampStore for SqliteStampStore {
  async fn stamp(&self, cache_identifier: &str) -> ServiceResult<Option<FetchStamp>> {
    let cache_identifier = cache_identifier.to_string();
    self
      .store
      .perform(move |ctx| ctx.fetch_stamp(&cache_identifier))
      .await
  }

  async fn record(&self, cache_identifier: &str, stamp: FetchStamp) -> ServiceResult<()> {
    let cache_identifier = cache_identifier.to_string();
    self
      .store
      .perform(move |ctx| ctx.record_stamp(&cache_identifier, stamp))
      .await
  }

  async fn clear(&self) -> ServiceResult<usize> {
    self.store.perform(|ctx| ctx.clear_stamps()).await
  }
}

/// SHA256 hash for stable, fixed-length keys
fn cache_hash(cache_identifier: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(cache_identifier.as_bytes());
  hex::encode(hasher.finalize())
}

impl StoreContext<'_> {
  /// Stamp recorded for a cache identifier, if any.
  pub fn fetch_stamp(&self, cache_identifier: &str) -> ServiceResult<Option<FetchStamp>> {
    let row: Option<(i64, String)> = self
      .connection()
      .query_row(
        "SELECT total_items, fetched_at FROM fetch_stamps WHERE cache_hash = ?1",
        params![cache_hash(cache_identifier)],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    let Some((total_items, fetched_at)) = row else {
      return Ok(None);
    };

    let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
      .map_err(|e| ServiceError::Internal(format!("Failed to parse stamp '{}': {}", fetched_at, e)))?
      .with_timezone(&Utc);

    Ok(Some(FetchStamp {
      fetched_at,
      total_items: total_items as usize,
    }))
  }

  pub fn record_stamp(&mut self, cache_identifier: &str, stamp: FetchStamp) -> ServiceResult<()> {
    self.connection().execute(
      "INSERT OR REPLACE INTO fetch_stamps (cache_hash, cache_identifier, total_items, fetched_at)
       VALUES (?1, ?2, ?3, ?4)",
      params![
        cache_hash(cache_identifier),
        cache_identifier,
        stamp.total_items as i64,
        stamp.fetched_at.to_rfc3339()
      ],
    )?;
    self.mark_dirty();
    Ok(())
  }

  /// Forget every recorded stamp. Returns how many were removed.
  pub fn clear_stamps(&mut self) -> ServiceResult<usize> {
    let removed = self.connection().execute("DELETE FROM fetch_stamps", [])?;
    if removed > 0 {
      self.mark_dirty();
    }
    Ok(removed)
  }
}

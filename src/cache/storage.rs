//! SQLite-backed persisted store for entities and their page records.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{ServiceError, ServiceResult};

/// Capacity of the change feed; slow listeners see `Lagged` and resync.
const CHANGE_FEED_CAPACITY: usize = 64;

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Persisted entities (stores serialized JSON)
CREATE TABLE IF NOT EXISTS entities (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (entity_type, entity_key)
);

-- Entity to (filter, order) slot bindings
CREATE TABLE IF NOT EXISTS page_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    filter_id TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    ord INTEGER NOT NULL,
    FOREIGN KEY (entity_type, entity_key)
        REFERENCES entities(entity_type, entity_key) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_page_records_filter
    ON page_records(entity_type, filter_id, ord);
CREATE INDEX IF NOT EXISTS idx_page_records_entity
    ON page_records(entity_type, entity_key);

-- Last successful fetch per page request
CREATE TABLE IF NOT EXISTS fetch_stamps (
    cache_hash TEXT PRIMARY KEY,
    cache_identifier TEXT NOT NULL,
    total_items INTEGER NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS search_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE,
    searched_at TEXT NOT NULL
);
"#;

/// Binding of one entity to one `(filter_id, order)` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
  pub id: i64,
  pub filter_id: String,
  pub entity_key: String,
  pub order: usize,
}

/// A page record joined with its entity, as read back by a cache cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRow<E> {
  pub order: usize,
  pub key: String,
  pub entity: E,
}

/// Which entities a cache clear applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityPredicate {
  All,
  /// Entities referenced by any page record of this filter.
  Filter(String),
}

/// Notification published after a committed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
  pub entity_type: String,
  /// Filters whose page records were inserted, reordered or deleted.
  pub filter_ids: BTreeSet<String>,
  /// Entity rows themselves changed, which may affect any filter.
  pub entities_changed: bool,
}

impl StoreChange {
  pub fn affects(&self, entity_type: &str, filter_id: &str) -> bool {
    self.entity_type == entity_type
      && (self.entities_changed || self.filter_ids.contains(filter_id))
  }
}

#[derive(Debug, Default)]
struct ChangeScope {
  filter_ids: BTreeSet<String>,
  entities_changed: bool,
}

/// SQLite store. The connection mutex is the working context: every unit of
/// work runs serialized and inside one transaction.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
  /// Open the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory store.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lom").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
    Ok(Self {
      conn: Mutex::new(conn),
      changes,
    })
  }

  /// Subscribe to notifications of committed changes.
  pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
    self.changes.subscribe()
  }

  /// Run `work` as one atomic unit on the blocking pool.
  pub async fn perform<T, F>(self: &Arc<Self>, work: F) -> ServiceResult<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut StoreContext<'_>) -> ServiceResult<T> + Send + 'static,
  {
    let store = Arc::clone(self);
    tokio::task::spawn_blocking(move || store.perform_blocking(work)).await?
  }

  /// Run `work` inside one transaction on the calling thread.
  ///
  /// The transaction commits only if the work marked the context dirty and
  /// returned `Ok`; otherwise it rolls back.
  pub fn perform_blocking<T, F>(&self, work: F) -> ServiceResult<T>
  where
    F: FnOnce(&mut StoreContext<'_>) -> ServiceResult<T>,
  {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    let mut ctx = StoreContext {
      conn: &tx,
      dirty: false,
      scopes: BTreeMap::new(),
    };
    let value = work(&mut ctx)?;
    let dirty = ctx.dirty;
    let scopes = std::mem::take(&mut ctx.scopes);

    if !dirty {
      return Ok(value);
    }
    tx.commit()?;
    drop(conn);

    for (entity_type, scope) in scopes {
      trace!(entity_type = %entity_type, filters = scope.filter_ids.len(), "store change");
      // No subscribers is fine
      let _ = self.changes.send(StoreChange {
        entity_type,
        filter_ids: scope.filter_ids,
        entities_changed: scope.entities_changed,
      });
    }
    Ok(value)
  }

  fn lock(&self) -> ServiceResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| ServiceError::Internal(format!("lock poisoned: {}", e)))
  }
}

/// Handle to the store inside one unit of work.
pub struct StoreContext<'a> {
  conn: &'a Connection,
  dirty: bool,
  scopes: BTreeMap<String, ChangeScope>,
}

impl StoreContext<'_> {
  /// Page records of a filter with `order >= from_order`, ascending.
  pub fn page_window(
    &self,
    entity_type: &str,
    filter_id: &str,
    from_order: usize,
  ) -> ServiceResult<Vec<PageRecord>> {
    let mut stmt = self.conn.prepare(
      "SELECT id, entity_key, ord FROM page_records
       WHERE entity_type = ?1 AND filter_id = ?2 AND ord >= ?3
       ORDER BY ord, id",
    )?;

    let records = stmt
      .query_map(params![entity_type, filter_id, from_order as i64], |row| {
        Ok(PageRecord {
          id: row.get(0)?,
          filter_id: filter_id.to_string(),
          entity_key: row.get(1)?,
          order: row.get::<_, i64>(2)? as usize,
        })
      })?
      .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
  }

  /// All rows of a filter joined with their entities, sorted by order.
  pub fn page_rows<E: DeserializeOwned>(
    &self,
    entity_type: &str,
    filter_id: &str,
  ) -> ServiceResult<Vec<CachedRow<E>>> {
    let mut stmt = self.conn.prepare(
      "SELECT p.ord, p.entity_key, e.data FROM page_records p
       INNER JOIN entities e ON e.entity_type = p.entity_type AND e.entity_key = p.entity_key
       WHERE p.entity_type = ?1 AND p.filter_id = ?2
       ORDER BY p.ord, p.id",
    )?;

    let raw: Vec<(i64, String, Vec<u8>)> = stmt
      .query_map(params![entity_type, filter_id], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    raw
      .into_iter()
      .map(|(order, key, data)| {
        let entity = decode_entity(&data)?;
        Ok(CachedRow {
          order: order as usize,
          key,
          entity,
        })
      })
      .collect()
  }

  /// Number of page records bound to a filter.
  pub fn page_count(&self, entity_type: &str, filter_id: &str) -> ServiceResult<usize> {
    let count: i64 = self.conn.query_row(
      "SELECT COUNT(*) FROM page_records WHERE entity_type = ?1 AND filter_id = ?2",
      params![entity_type, filter_id],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  pub fn entity<E: DeserializeOwned>(&self, entity_type: &str, key: &str) -> ServiceResult<Option<E>> {
    let data: Option<Vec<u8>> = self
      .conn
      .query_row(
        "SELECT data FROM entities WHERE entity_type = ?1 AND entity_key = ?2",
        params![entity_type, key],
        |row| row.get(0),
      )
      .optional()?;

    data.map(|d| decode_entity(&d)).transpose()
  }

  pub fn entity_count(&self, entity_type: &str) -> ServiceResult<usize> {
    let count: i64 = self.conn.query_row(
      "SELECT COUNT(*) FROM entities WHERE entity_type = ?1",
      params![entity_type],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  /// Insert or update an entity row in place.
  ///
  /// Uses an upsert rather than `INSERT OR REPLACE`, which would delete the row
  /// and cascade to its page records.
  pub fn save_entity<E: Serialize>(
    &mut self,
    entity_type: &str,
    key: &str,
    entity: &E,
  ) -> ServiceResult<()> {
    let data = serde_json::to_vec(entity)
      .map_err(|e| ServiceError::Internal(format!("Failed to serialize entity: {}", e)))?;

    self.conn.execute(
      "INSERT INTO entities (entity_type, entity_key, data, cached_at)
       VALUES (?1, ?2, ?3, datetime('now'))
       ON CONFLICT(entity_type, entity_key)
       DO UPDATE SET data = excluded.data, cached_at = excluded.cached_at",
      params![entity_type, key, data],
    )?;

    self.scope(entity_type).entities_changed = true;
    Ok(())
  }

  /// Bind an entity to `(filter_id, order)`. Returns the new record id.
  pub fn insert_page_record(
    &mut self,
    entity_type: &str,
    filter_id: &str,
    key: &str,
    order: usize,
  ) -> ServiceResult<i64> {
    self.conn.execute(
      "INSERT INTO page_records (entity_type, filter_id, entity_key, ord)
       VALUES (?1, ?2, ?3, ?4)",
      params![entity_type, filter_id, key, order as i64],
    )?;

    self.touch_filter(entity_type, filter_id);
    Ok(self.conn.last_insert_rowid())
  }

  /// Overwrite a record's order if it differs. Returns whether it changed.
  pub fn set_page_order(
    &mut self,
    entity_type: &str,
    record: &PageRecord,
    order: usize,
  ) -> ServiceResult<bool> {
    if record.order == order {
      return Ok(false);
    }

    self.conn.execute(
      "UPDATE page_records SET ord = ?1 WHERE id = ?2",
      params![order as i64, record.id],
    )?;

    self.touch_filter(entity_type, &record.filter_id);
    Ok(true)
  }

  pub fn delete_page_records(
    &mut self,
    entity_type: &str,
    filter_id: &str,
    ids: &[i64],
  ) -> ServiceResult<usize> {
    if ids.is_empty() {
      return Ok(0);
    }

    let mut deleted = 0;
    {
      let mut stmt = self
        .conn
        .prepare("DELETE FROM page_records WHERE id = ?1")?;
      for id in ids {
        deleted += stmt.execute(params![id])?;
      }
    }

    if deleted > 0 {
      self.touch_filter(entity_type, filter_id);
    }
    Ok(deleted)
  }

  /// Delete entities no page record references any more.
  pub fn purge_orphans(&mut self, entity_type: &str) -> ServiceResult<usize> {
    let purged = self.conn.execute(
      "DELETE FROM entities
       WHERE entity_type = ?1
         AND NOT EXISTS (
           SELECT 1 FROM page_records p
           WHERE p.entity_type = entities.entity_type AND p.entity_key = entities.entity_key
         )",
      params![entity_type],
    )?;

    if purged > 0 {
      self.scope(entity_type).entities_changed = true;
    }
    Ok(purged)
  }

  /// Delete matching entities; their page records go with them.
  pub fn delete_entities(
    &mut self,
    entity_type: &str,
    predicate: &EntityPredicate,
  ) -> ServiceResult<usize> {
    let deleted = match predicate {
      EntityPredicate::All => self.conn.execute(
        "DELETE FROM entities WHERE entity_type = ?1",
        params![entity_type],
      )?,
      EntityPredicate::Filter(filter_id) => self.conn.execute(
        "DELETE FROM entities
         WHERE entity_type = ?1
           AND entity_key IN (
             SELECT entity_key FROM page_records WHERE entity_type = ?1 AND filter_id = ?2
           )",
        params![entity_type, filter_id],
      )?,
    };

    if deleted > 0 {
      self.scope(entity_type).entities_changed = true;
    }
    Ok(deleted)
  }

  /// Raw connection for tables outside the entity/page model.
  pub(crate) fn connection(&self) -> &Connection {
    self.conn
  }

  /// Force a commit for writes made through `connection()`.
  pub(crate) fn mark_dirty(&mut self) {
    self.dirty = true;
  }

  fn touch_filter(&mut self, entity_type: &str, filter_id: &str) {
    self
      .scope(entity_type)
      .filter_ids
      .insert(filter_id.to_string());
  }

  fn scope(&mut self, entity_type: &str) -> &mut ChangeScope {
    self.dirty = true;
    self.scopes.entry(entity_type.to_string()).or_default()
  }
}

fn decode_entity<E: DeserializeOwned>(data: &[u8]) -> ServiceResult<E> {
  serde_json::from_slice(data)
    .map_err(|e| ServiceError::Internal(format!("Failed to deserialize entity: {}", e)))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
  }

  #[test]
  fn test_clean_unit_of_work_publishes_nothing() {
    let store = store();
    let mut feed = store.subscribe();

    let count = store
      .perform_blocking(|ctx| ctx.page_count("release", "artists/2/releases"))
      .unwrap();

    assert_eq!(count, 0);
    assert!(feed.try_recv().is_err());
  }

  #[test]
  fn test_commit_publishes_touched_filters() {
    let store = store();
    let mut feed = store.subscribe();

    store
      .perform_blocking(|ctx| {
        ctx.save_entity("release", "1", &"Kind of Blue")?;
        ctx.insert_page_record("release", "artists/2/releases", "1", 0)?;
        Ok(())
      })
      .unwrap();

    let change = feed.try_recv().unwrap();
    assert!(change.affects("release", "artists/2/releases"));
    assert!(change.entities_changed);
    assert!(!change.affects("album", "artists/2/releases"));
  }

  #[test]
  fn test_failed_work_rolls_back() {
    let store = store();

    let result: ServiceResult<()> = store.perform_blocking(|ctx| {
      ctx.save_entity("release", "1", &"Kind of Blue")?;
      Err(ServiceError::WrongResponseFormat)
    });
    assert!(result.is_err());

    let count = store
      .perform_blocking(|ctx| ctx.entity_count("release"))
      .unwrap();
    assert_eq!(count, 0);
  }

  #[test]
  fn test_save_entity_keeps_page_records() {
    let store = store();

    store
      .perform_blocking(|ctx| {
        ctx.save_entity("release", "1", &"first")?;
        ctx.insert_page_record("release", "f", "1", 0)?;
        ctx.save_entity("release", "1", &"second")?;
        Ok(())
      })
      .unwrap();

    let rows: Vec<CachedRow<String>> = store
      .perform_blocking(|ctx| ctx.page_rows("release", "f"))
      .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].entity, "second");
  }

  #[test]
  fn test_deleting_entities_cascades_to_page_records() {
    let store = store();

    store
      .perform_blocking(|ctx| {
        for (order, key) in ["1", "2", "3"].iter().enumerate() {
          ctx.save_entity("release", key, key)?;
          ctx.insert_page_record("release", "f", key, order)?;
        }
        ctx.insert_page_record("release", "g", "2", 0)?;
        Ok(())
      })
      .unwrap();

    let deleted = store
      .perform_blocking(|ctx| {
        ctx.delete_entities("release", &EntityPredicate::Filter("g".to_string()))
      })
      .unwrap();
    assert_eq!(deleted, 1);

    let rows: Vec<CachedRow<String>> = store
      .perform_blocking(|ctx| ctx.page_rows("release", "f"))
      .unwrap();
    let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["1", "3"]);
  }

  #[test]
  fn test_purge_orphans_only_removes_unreferenced() {
    let store = store();

    let purged = store
      .perform_blocking(|ctx| {
        ctx.save_entity("release", "kept", &"a")?;
        ctx.insert_page_record("release", "f", "kept", 0)?;
        ctx.save_entity("release", "orphan", &"b")?;
        ctx.purge_orphans("release")
      })
      .unwrap();

    assert_eq!(purged, 1);
    let kept: Option<String> = store
      .perform_blocking(|ctx| ctx.entity("release", "kept"))
      .unwrap();
    assert_eq!(kept.as_deref(), Some("a"));
  }
}

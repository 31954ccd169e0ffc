//! Reconciles fetched pages against the cached page records of a filter.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::query::{PageQuery, PageRange};
use super::storage::{CachedRow, EntityPredicate, SqliteStore, StoreContext};
use super::traits::{PageInfo, PagedResource};
use crate::error::{ServiceError, ServiceResult};

/// Local side of the cache for one resource type.
pub struct LocalCacheService<R: PagedResource> {
  store: Arc<SqliteStore>,
  _resource: PhantomData<fn() -> R>,
}

impl<R: PagedResource> LocalCacheService<R> {
  pub fn new(store: Arc<SqliteStore>) -> Self {
    Self {
      store,
      _resource: PhantomData,
    }
  }

  pub fn store(&self) -> &Arc<SqliteStore> {
    &self.store
  }

  /// Reconcile one page of `payload` into the slots starting at the range
  /// start (0 when unpaged).
  ///
  /// Every record is decoded and identified before the store is touched; a
  /// single unidentifiable record fails the whole page with
  /// `WrongResponseFormat` and nothing is written.
  pub async fn reconcile_page(
    &self,
    query: &PageQuery,
    payload: Value,
    range: Option<PageRange>,
  ) -> ServiceResult<PageInfo> {
    let raw = R::extract_records(&payload).ok_or(ServiceError::WrongResponseFormat)?;
    let total_items = R::total_items(&payload);

    let records = raw
      .into_iter()
      .map(|value| {
        let record = R::decode(value)?;
        let identifier = R::identifier(&record)?;
        Ok((identifier, record))
      })
      .collect::<Result<Vec<_>, crate::error::ParseError>>()?;

    let filter_id = query.filter_identifier();
    let start = range.map(|r| r.start).unwrap_or(0);
    let count = records.len();
    let query = query.clone();

    let deleted = self
      .store
      .perform(move |ctx| apply_page::<R>(ctx, &query, &filter_id, records, start))
      .await?;

    debug!(
      entity_type = R::entity_type(),
      start,
      count,
      deleted,
      total_items,
      "reconciled page"
    );

    Ok(PageInfo { total_items })
  }

  /// Delete all entities matching `predicate`.
  pub async fn clear_cache(&self, predicate: EntityPredicate) -> ServiceResult<usize> {
    let deleted = self
      .store
      .perform(move |ctx| ctx.delete_entities(R::entity_type(), &predicate))
      .await?;

    debug!(entity_type = R::entity_type(), deleted, "cleared cache");
    Ok(deleted)
  }

  /// Cached rows of a filter in slot order.
  pub async fn cached_rows(&self, filter_id: &str) -> ServiceResult<Vec<CachedRow<R::Entity>>> {
    let filter_id = filter_id.to_string();
    self
      .store
      .perform(move |ctx| ctx.page_rows(R::entity_type(), &filter_id))
      .await
  }

  pub async fn cached_count(&self, filter_id: &str) -> ServiceResult<usize> {
    let filter_id = filter_id.to_string();
    self
      .store
      .perform(move |ctx| ctx.page_count(R::entity_type(), &filter_id))
      .await
  }
}

impl<R: PagedResource> Clone for LocalCacheService<R> {
  fn clone(&self) -> Self {
    Self::new(Arc::clone(&self.store))
  }
}

/// Apply identified records to the page window `[start, ..)` of a filter.
///
/// Returns the number of page records evicted from the window.
fn apply_page<R: PagedResource>(
  ctx: &mut StoreContext<'_>,
  query: &PageQuery,
  filter_id: &str,
  records: Vec<(String, R::Record)>,
  start: usize,
) -> ServiceResult<usize> {
  let entity_type = R::entity_type();
  let window = ctx.page_window(entity_type, filter_id, start)?;

  // First record per identifier; duplicates are evicted below
  let mut cached = HashMap::new();
  for page in &window {
    cached.entry(page.entity_key.as_str()).or_insert(page);
  }

  let mut handled: HashSet<i64> = HashSet::new();

  for (offset, (identifier, record)) in records.iter().enumerate() {
    let order = start + offset;

    let existing = ctx.entity::<R::Entity>(entity_type, identifier)?;
    let is_new = existing.is_none();
    let mut entity = existing.unwrap_or_else(|| R::new_entity(identifier));
    if R::apply_fields(&mut entity, record, query) || is_new {
      ctx.save_entity(entity_type, identifier, &entity)?;
    }

    match cached.get(identifier.as_str()) {
      Some(page) if !handled.contains(&page.id) => {
        ctx.set_page_order(entity_type, page, order)?;
        handled.insert(page.id);
      }
      _ => {
        ctx.insert_page_record(entity_type, filter_id, identifier, order)?;
      }
    }
  }

  let stale: Vec<i64> = window
    .iter()
    .filter(|page| !handled.contains(&page.id))
    .map(|page| page.id)
    .collect();
  let deleted = ctx.delete_page_records(entity_type, filter_id, &stale)?;
  if deleted > 0 {
    ctx.purge_orphans(entity_type)?;
  }

  Ok(deleted)
}

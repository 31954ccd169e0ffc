//! Core traits and types for the paged cache.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::query::PageQuery;
use crate::error::ParseError;

/// A remote resource whose pages can be reconciled into the local cache.
///
/// Implementors describe how to find the record array inside a response
/// envelope, how to identify a record, and how to project a record onto a
/// persisted entity.
pub trait PagedResource: Send + Sync + 'static {
  /// Typed form of one raw record.
  type Record: DeserializeOwned + Send + 'static;

  /// Persisted entity the records are projected onto.
  type Entity: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

  /// Envelope key holding the record array (e.g. "releases").
  const ENVELOPE_KEY: &'static str;

  /// Entity type name for storage organization (e.g. "release").
  fn entity_type() -> &'static str;

  /// Stable identifier of one record.
  fn identifier(record: &Self::Record) -> Result<String, ParseError>;

  /// Fresh entity for an identifier seen for the first time.
  fn new_entity(identifier: &str) -> Self::Entity;

  /// Writes the record's fields onto the entity.
  ///
  /// Returns true if any field changed. Fields whose value is unchanged must
  /// not be touched.
  fn apply_fields(entity: &mut Self::Entity, record: &Self::Record, query: &PageQuery) -> bool;

  /// Locates the raw records inside the response envelope.
  fn extract_records(payload: &Value) -> Option<Vec<Value>> {
    payload.get(Self::ENVELOPE_KEY)?.as_array().cloned()
  }

  /// Decodes one raw record into its typed form.
  fn decode(raw: Value) -> Result<Self::Record, ParseError> {
    serde_json::from_value(raw).map_err(|_| ParseError::InvalidData)
  }

  /// Server-reported total of matching items, 0 when absent.
  fn total_items(payload: &Value) -> usize {
    payload
      .pointer("/pagination/items")
      .and_then(Value::as_u64)
      .map(|n| n as usize)
      .unwrap_or(0)
  }
}

/// Assigns `value` only if it differs. Returns whether the field changed.
pub fn update_if_needed<T: PartialEq>(field: &mut T, value: T) -> bool {
  if *field == value {
    return false;
  }
  *field = value;
  true
}

/// Pagination facts reported by one page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
  pub total_items: usize,
}

/// Governs whether a page load goes to the network at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
  /// Never issue a request; serve whatever is cached.
  CachedOnly,
  /// Serve cached rows, then refresh from the network.
  CachedThenLoad,
  /// Serve from cache while the fetch stamp is fresh, else load.
  CachedElseLoad,
  /// Always load from the network.
  #[default]
  ReloadIgnoringCache,
}

impl CachePolicy {
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_lowercase().as_str() {
      "cached-only" | "cached" => Some(Self::CachedOnly),
      "cached-then-load" => Some(Self::CachedThenLoad),
      "cached-else-load" => Some(Self::CachedElseLoad),
      "reload" | "reload-ignoring-cache" => Some(Self::ReloadIgnoringCache),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_update_if_needed_reports_changes() {
    let mut title = Some("Kind of Blue".to_string());
    assert!(!update_if_needed(&mut title, Some("Kind of Blue".to_string())));
    assert!(update_if_needed(&mut title, None));
    assert_eq!(title, None);
  }

  #[test]
  fn test_cache_policy_parse() {
    assert_eq!(CachePolicy::parse("cached-only"), Some(CachePolicy::CachedOnly));
    assert_eq!(
      CachePolicy::parse("Cached-Else-Load"),
      Some(CachePolicy::CachedElseLoad)
    );
    assert_eq!(CachePolicy::parse("sometimes"), None);
  }
}

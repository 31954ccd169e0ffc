//! Recently searched titles.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use tracing::debug;

use super::types::SearchHistoryItem;
use crate::cache::SqliteStore;
use crate::error::{ServiceError, ServiceResult};

/// Search history kept next to the entity cache.
#[derive(Clone)]
pub struct SearchHistory {
  store: Arc<SqliteStore>,
}

impl SearchHistory {
  pub fn new(store: Arc<SqliteStore>) -> Self {
    Self { store }
  }

  /// Remember `title`, refreshing its date if it was searched before.
  pub async fn add_item(&self, title: &str) -> ServiceResult<()> {
    let title = title.trim().to_string();
    if title.is_empty() {
      return Ok(());
    }

    let searched_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    debug!(title = %title, "recording search");

    self
      .store
      .perform(move |ctx| {
        ctx.connection().execute(
          "INSERT INTO search_history (title, searched_at) VALUES (?1, ?2)
           ON CONFLICT(title) DO UPDATE SET searched_at = excluded.searched_at",
          params![title, searched_at],
        )?;
        ctx.mark_dirty();
        Ok(())
      })
      .await
  }

  /// Most recent searches first.
  pub async fn recent(&self, limit: usize) -> ServiceResult<Vec<SearchHistoryItem>> {
    let rows: Vec<(i64, String, String)> = self
      .store
      .perform(move |ctx| {
        let mut stmt = ctx.connection().prepare(
          "SELECT id, title, searched_at FROM search_history
           ORDER BY searched_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(params![limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(id, title, searched_at)| {
        let searched_at = DateTime::parse_from_rfc3339(&searched_at)
          .map_err(|e| ServiceError::Internal(format!("Bad history date '{}': {}", searched_at, e)))?
          .with_timezone(&Utc);
        Ok(SearchHistoryItem {
          id,
          title,
          searched_at,
        })
      })
      .collect()
  }

  /// Forget every search. Returns how many were removed.
  pub async fn clear(&self) -> ServiceResult<usize> {
    self
      .store
      .perform(|ctx| {
        let removed = ctx.connection().execute("DELETE FROM search_history", [])?;
        if removed > 0 {
          ctx.mark_dirty();
        }
        Ok(removed)
      })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn history() -> SearchHistory {
    SearchHistory::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
  }

  // Keeps timestamps distinct at microsecond resolution
  async fn add(history: &SearchHistory, title: &str) {
    history.add_item(title).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
  }

  fn titles(items: &[SearchHistoryItem]) -> Vec<&str> {
    items.iter().map(|item| item.title.as_str()).collect()
  }

  #[tokio::test]
  async fn test_recent_is_newest_first() {
    let history = history();
    add(&history, "coltrane").await;
    add(&history, "mingus").await;
    add(&history, "monk").await;

    let recent = history.recent(2).await.unwrap();
    assert_eq!(titles(&recent), vec!["monk", "mingus"]);
  }

  #[tokio::test]
  async fn test_repeated_search_moves_to_top() {
    let history = history();
    add(&history, "coltrane").await;
    add(&history, "mingus").await;
    add(&history, "coltrane").await;

    let recent = history.recent(10).await.unwrap();
    assert_eq!(titles(&recent), vec!["coltrane", "mingus"]);
  }

  #[tokio::test]
  async fn test_blank_titles_are_ignored_and_clear_removes_all() {
    let history = history();
    history.add_item("   ").await.unwrap();
    add(&history, "monk").await;
    assert_eq!(history.recent(10).await.unwrap().len(), 1);

    assert_eq!(history.clear().await.unwrap(), 1);
    assert!(history.recent(10).await.unwrap().is_empty());
  }
}

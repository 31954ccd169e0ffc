//! Debounced album search driving a paged fetch result.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::discogs::{album_search, AlbumSearch, AlbumsResource, SearchHistory};
use crate::fetch::PagedFetchResult;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Handle to a scheduled search.
#[derive(Debug)]
pub struct SearchTask(JoinHandle<()>);

impl SearchTask {
  /// Wait for the search to run, or to be superseded by a newer one.
  pub async fn finished(self) {
    match self.0.await {
      Ok(()) => {}
      Err(e) if e.is_cancelled() => debug!("search superseded"),
      Err(e) => warn!(error = %e, "search task failed"),
    }
  }
}

#[derive(Default)]
struct Pending {
  /// Last text handed to `search`, `None` before the first call
  previous: Option<Option<String>>,
  task: Option<AbortHandle>,
}

/// Turns search box input into album search queries.
pub struct SearchViewModel {
  result: Arc<PagedFetchResult<AlbumsResource>>,
  history: SearchHistory,
  artists_only: bool,
  debounce: Duration,
  pending: Mutex<Pending>,
}

impl SearchViewModel {
  pub fn new(result: Arc<PagedFetchResult<AlbumsResource>>, history: SearchHistory) -> Self {
    Self {
      result,
      history,
      artists_only: false,
      debounce: DEFAULT_DEBOUNCE,
      pending: Mutex::new(Pending::default()),
    }
  }

  pub fn with_debounce(mut self, debounce: Duration) -> Self {
    self.debounce = debounce;
    self
  }

  /// Search artists (`type=artist`) instead of free text.
  pub fn artists_only(mut self, artists_only: bool) -> Self {
    self.artists_only = artists_only;
    self
  }

  pub fn result(&self) -> &Arc<PagedFetchResult<AlbumsResource>> {
    &self.result
  }

  /// Schedule a search for `text` after the debounce interval.
  ///
  /// Returns `None` when `text` equals the previous input. A pending search
  /// that has not fired yet is replaced. Empty text clears the query.
  pub fn search(&self, text: Option<&str>) -> Option<SearchTask> {
    let text = text.map(str::to_string);
    let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if pending.previous.as_ref() == Some(&text) {
      debug!(text = ?text, "ignoring repeated search");
      return None;
    }
    pending.previous = Some(text.clone());

    if let Some(task) = pending.task.take() {
      task.abort();
    }

    let result = Arc::clone(&self.result);
    let history = self.history.clone();
    let artists_only = self.artists_only;
    let debounce = self.debounce;

    let handle = tokio::spawn(async move {
      tokio::time::sleep(debounce).await;

      let text = text.filter(|text| !text.trim().is_empty());
      let Some(text) = text else {
        result.set_query(None);
        return;
      };

      let search = if artists_only {
        AlbumSearch::Artist(text.clone())
      } else {
        AlbumSearch::Text(text.clone())
      };
      let load = result.set_query(Some(album_search(&search)));

      if let Err(e) = history.add_item(&text).await {
        warn!(error = %e, "failed to record search");
      }
      if let Some(load) = load {
        load.finished().await;
      }
    });

    pending.task = Some(handle.abort_handle());
    Some(SearchTask(handle))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{LocalCacheService, RemoteFetchService, SqliteStampStore, SqliteStore};
  use crate::fetch::FetchState;
  use crate::testing::{albums_payload, StubTransport};
  use url::Url;

  const SEARCH_PATH: &str = "/database/search";

  fn view_model(transport: Arc<StubTransport>) -> SearchViewModel {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let service = RemoteFetchService::new(
      Url::parse("https://api.test/").unwrap(),
      transport,
      LocalCacheService::new(Arc::clone(&store)),
      Arc::new(SqliteStampStore::new(Arc::clone(&store))),
    );
    let result = Arc::new(PagedFetchResult::new(Arc::new(service), Some(20)));
    SearchViewModel::new(result, SearchHistory::new(store)).with_debounce(Duration::from_millis(20))
  }

  #[tokio::test]
  async fn test_only_last_search_in_burst_runs() {
    let transport = Arc::new(StubTransport::default());
    transport.respond(SEARCH_PATH, 1, albums_payload(1..=3, 3));
    let vm = view_model(transport.clone());

    let first = vm.search(Some("blu")).unwrap();
    let second = vm.search(Some("blue train")).unwrap();
    first.finished().await;
    second.finished().await;

    assert_eq!(transport.request_count(), 1);
    assert_eq!(
      vm.result().query().map(|q| q.filter_identifier()),
      Some("database/search?q=blue+train".to_string())
    );
    assert_eq!(vm.result().visible_row_count(), 3);

    let recent = vm.history.recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].title, "blue train");
  }

  #[tokio::test]
  async fn test_repeated_text_is_ignored() {
    let transport = Arc::new(StubTransport::default());
    transport.respond(SEARCH_PATH, 1, albums_payload(1..=3, 3));
    let vm = view_model(transport.clone());

    vm.search(Some("monk")).unwrap().finished().await;
    assert!(vm.search(Some("monk")).is_none());
    assert_eq!(transport.request_count(), 1);
  }

  #[tokio::test]
  async fn test_empty_text_clears_query() {
    let transport = Arc::new(StubTransport::default());
    transport.respond(SEARCH_PATH, 1, albums_payload(1..=3, 3));
    let vm = view_model(transport.clone());

    vm.search(Some("monk")).unwrap().finished().await;
    vm.search(Some("")).unwrap().finished().await;

    assert_eq!(vm.result().state(), FetchState::None);
    assert!(vm.result().query().is_none());
    assert_eq!(vm.result().visible_row_count(), 0);
    assert_eq!(vm.history.recent(10).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_artist_search_adds_type() {
    let transport = Arc::new(StubTransport::default());
    transport.respond(SEARCH_PATH, 1, albums_payload(1..=2, 2));
    let vm = view_model(transport.clone()).artists_only(true);

    vm.search(Some("mingus")).unwrap().finished().await;
    assert!(transport.requests()[0].as_str().ends_with("type=artist"));
  }
}

//! Paged fetch result: the query lifecycle over the cache engine.
//!
//! A `PagedFetchResult` owns one active query at a time. It loads pages through
//! the remote fetch service, keeps a cursor over the cached rows of the active
//! filter, and publishes state transitions and row changes on one broadcast
//! channel.
//!
//! # Example
//!
//! ```ignore
//! let result = PagedFetchResult::new(service, Some(6));
//! let mut events = result.subscribe();
//!
//! if let Some(load) = result.set_query(Some(artist_releases(2))) {
//!     load.finished().await;
//! }
//!
//! // Later, when the list is scrolled to the bottom
//! result.load_next_page_if_needed();
//! ```

mod changes;
mod cursor;

pub use changes::ChangeRecord;
use cursor::CacheCursor;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CachePolicy, CachedRow, PageQuery, PageRange, PagedResource, RemoteFetchService};
use crate::error::ServiceError;

const EVENT_CAPACITY: usize = 256;

/// Load status of a paged fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchState {
  /// No active query.
  #[default]
  None,
  /// A page request is in flight.
  Loading,
  /// The last page request finished, successfully or not.
  Loaded,
}

/// Notifications published to subscribers.
#[derive(Debug, Clone)]
pub enum FetchEvent {
  State(FetchState),
  /// Row changes within the visible rows. An empty batch means "reload".
  Changes(Vec<ChangeRecord>),
  PageFailed {
    page: usize,
    error: Arc<ServiceError>,
  },
}

/// Handle to an in-flight page load.
#[derive(Debug)]
pub struct PageLoad(JoinHandle<()>);

impl PageLoad {
  /// Wait for the page load, including its completion handling, to finish.
  pub async fn finished(self) {
    if let Err(e) = self.0.await {
      warn!(error = %e, "page load task failed");
    }
  }
}

/// Identity of one page request, captured when it is issued.
#[derive(Debug, Clone)]
struct PageRequest {
  session: u64,
  filter_id: String,
  query: PageQuery,
  page: usize,
}

struct Inner<E> {
  /// Bumped on every query switch
  session: u64,
  query: Option<PageQuery>,
  cursor: Option<CacheCursor<E>>,
  loaded_page_count: usize,
  total_count: usize,
  state: FetchState,
}

impl<E: PartialEq> Inner<E> {
  fn cached_row_count(&self) -> usize {
    self.cursor.as_ref().map(CacheCursor::len).unwrap_or(0)
  }

  /// Rows the loaded pages may show, `None` when unpaged.
  fn row_limit(&self, page_size: Option<usize>) -> Option<usize> {
    page_size.map(|size| size * self.loaded_page_count)
  }

  fn visible_row_count(&self, page_size: Option<usize>) -> usize {
    let cached = self.cached_row_count();
    self
      .row_limit(page_size)
      .map_or(cached, |limit| cached.min(limit))
  }

  fn is_current(&self, request: &PageRequest) -> bool {
    self.session == request.session
      && self
        .cursor
        .as_ref()
        .is_some_and(|cursor| cursor.filter_id() == request.filter_id)
  }
}

struct Shared<R: PagedResource> {
  service: Arc<RemoteFetchService<R>>,
  page_size: Option<usize>,
  cache_policy: CachePolicy,
  inner: Mutex<Inner<R::Entity>>,
  events: broadcast::Sender<FetchEvent>,
  /// Serializes cursor refreshes so snapshots are applied in read order
  refresh: tokio::sync::Mutex<()>,
}

/// Paginated, cache-backed view of one query's results.
pub struct PagedFetchResult<R: PagedResource> {
  shared: Arc<Shared<R>>,
  listener: JoinHandle<()>,
}

impl<R: PagedResource> PagedFetchResult<R> {
  /// Create a result with no active query. Must be called inside a tokio runtime.
  pub fn new(service: Arc<RemoteFetchService<R>>, page_size: Option<usize>) -> Self {
    Self::with_cache_policy(service, page_size, CachePolicy::default())
  }

  pub fn with_cache_policy(
    service: Arc<RemoteFetchService<R>>,
    page_size: Option<usize>,
    cache_policy: CachePolicy,
  ) -> Self {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let shared = Arc::new(Shared {
      service,
      page_size: page_size.filter(|size| *size > 0),
      cache_policy,
      inner: Mutex::new(Inner {
        session: 0,
        query: None,
        cursor: None,
        loaded_page_count: 0,
        total_count: 0,
        state: FetchState::None,
      }),
      events,
      refresh: tokio::sync::Mutex::new(()),
    });

    let listener = tokio::spawn(Shared::listen(Arc::clone(&shared)));
    Self { shared, listener }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
    self.shared.events.subscribe()
  }

  /// Switch the active query, or clear it with `None`.
  ///
  /// A new query resets pagination and starts loading page 0; the returned
  /// handle completes when that load is done. Responses still in flight for
  /// the previous query are discarded when they arrive.
  pub fn set_query(&self, query: Option<PageQuery>) -> Option<PageLoad> {
    let mut inner = self.shared.lock();
    inner.session += 1;
    inner.loaded_page_count = 0;
    inner.total_count = 0;

    let Some(query) = query else {
      inner.query = None;
      inner.cursor = None;
      inner.state = FetchState::None;
      drop(inner);

      debug!("query cleared");
      self.shared.emit(FetchEvent::State(FetchState::None));
      self.shared.emit(FetchEvent::Changes(Vec::new()));
      return None;
    };

    let filter_id = query.filter_identifier();
    info!(filter = %filter_id, "switching query");
    inner.cursor = Some(CacheCursor::new(filter_id));
    inner.query = Some(query);
    self.shared.emit(FetchEvent::Changes(Vec::new()));

    Some(self.shared.start_page_load(&mut inner, 0))
  }

  /// Request the next page unless one is loading or everything is visible.
  pub fn load_next_page_if_needed(&self) -> Option<PageLoad> {
    let mut inner = self.shared.lock();
    inner.query.as_ref()?;

    let visible = inner.visible_row_count(self.shared.page_size);
    if inner.state == FetchState::Loading || inner.total_count <= visible {
      debug!(
        state = ?inner.state,
        total = inner.total_count,
        visible,
        "next page not needed"
      );
      return None;
    }

    let page = inner.loaded_page_count;
    Some(self.shared.start_page_load(&mut inner, page))
  }

  pub fn state(&self) -> FetchState {
    self.shared.lock().state
  }

  pub fn query(&self) -> Option<PageQuery> {
    self.shared.lock().query.clone()
  }

  pub fn loaded_page_count(&self) -> usize {
    self.shared.lock().loaded_page_count
  }

  pub fn total_count(&self) -> usize {
    self.shared.lock().total_count
  }

  /// Cached rows capped to the pages requested by this result.
  pub fn visible_row_count(&self) -> usize {
    self.shared.lock().visible_row_count(self.shared.page_size)
  }

  /// Entity at a visible position.
  pub fn row(&self, index: usize) -> Option<R::Entity> {
    let inner = self.shared.lock();
    if index >= inner.visible_row_count(self.shared.page_size) {
      return None;
    }
    inner
      .cursor
      .as_ref()
      .and_then(|cursor| cursor.rows().get(index))
      .map(|row| row.entity.clone())
  }

  /// All visible entities in order.
  pub fn rows(&self) -> Vec<R::Entity> {
    let inner = self.shared.lock();
    let visible = inner.visible_row_count(self.shared.page_size);
    inner
      .cursor
      .as_ref()
      .map(|cursor| {
        cursor
          .rows()
          .iter()
          .take(visible)
          .map(|row| row.entity.clone())
          .collect()
      })
      .unwrap_or_default()
  }
}

impl<R: PagedResource> Drop for PagedFetchResult<R> {
  fn drop(&mut self) {
    self.listener.abort();
  }
}

impl<R: PagedResource> Shared<R> {
  fn lock(&self) -> MutexGuard<'_, Inner<R::Entity>> {
    // A panic while holding the lock leaves counters usable; keep going
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn emit(&self, event: FetchEvent) {
    // No subscribers is fine
    let _ = self.events.send(event);
  }

  fn start_page_load(self: &Arc<Self>, inner: &mut Inner<R::Entity>, page: usize) -> PageLoad {
    let (Some(query), Some(cursor)) = (inner.query.clone(), inner.cursor.as_ref()) else {
      // Callers check for an active query first
      return PageLoad(tokio::spawn(async {}));
    };

    let request = PageRequest {
      session: inner.session,
      filter_id: cursor.filter_id().to_string(),
      query,
      page,
    };

    inner.state = FetchState::Loading;
    self.emit(FetchEvent::State(FetchState::Loading));
    debug!(filter = %request.filter_id, page, "loading page");

    let shared = Arc::clone(self);
    PageLoad(tokio::spawn(async move { shared.load_page(request).await }))
  }

  async fn load_page(self: Arc<Self>, request: PageRequest) {
    let range = self
      .page_size
      .map(|size| PageRange::for_page(request.page, size));

    if request.page == 0 && self.cache_policy == CachePolicy::CachedThenLoad {
      self.show_cached_page(&request, range).await;
    }

    let result = self
      .service
      .load(&request.query, self.cache_policy, range)
      .await;

    let _refresh = self.refresh.lock().await;
    let rows = self.service.local().cached_rows(&request.filter_id).await;

    let mut inner = self.lock();
    if !inner.is_current(&request) {
      debug!(filter = %request.filter_id, page = request.page, "discarding stale page response");
      return;
    }

    let loaded_page_count = match &result {
      Ok(info) => {
        inner.total_count = info.total_items;
        request.page + 1
      }
      Err(_) => {
        // Stop paginating until the caller retries
        inner.total_count = 0;
        inner.loaded_page_count
      }
    };

    match rows {
      Ok(rows) => self.apply_rows(&mut inner, rows, loaded_page_count),
      Err(e) => {
        warn!(filter = %request.filter_id, error = %e, "failed to read cached rows");
        inner.loaded_page_count = loaded_page_count;
      }
    }

    inner.state = FetchState::Loaded;
    let (loaded, total) = (inner.loaded_page_count, inner.total_count);
    drop(inner);

    match result {
      Ok(_) => {
        info!(filter = %request.filter_id, page = request.page, loaded, total, "page loaded");
      }
      Err(e) => {
        warn!(filter = %request.filter_id, page = request.page, error = %e, "page load failed");
        self.emit(FetchEvent::PageFailed {
          page: request.page,
          error: Arc::new(e),
        });
      }
    }
    self.emit(FetchEvent::State(FetchState::Loaded));
  }

  /// Show the cached first page while its refresh is in flight.
  async fn show_cached_page(&self, request: &PageRequest, range: Option<PageRange>) {
    let _refresh = self.refresh.lock().await;

    let cached = self
      .service
      .load(&request.query, CachePolicy::CachedOnly, range)
      .await;
    let rows = self.service.local().cached_rows(&request.filter_id).await;
    let (info, rows) = match (cached, rows) {
      (Ok(info), Ok(rows)) => (info, rows),
      (Err(e), _) | (_, Err(e)) => {
        warn!(filter = %request.filter_id, error = %e, "failed to read cached page");
        return;
      }
    };
    if rows.is_empty() {
      return;
    }

    let mut inner = self.lock();
    if !inner.is_current(request) {
      return;
    }
    inner.total_count = info.total_items;
    self.apply_rows(&mut inner, rows, 1);
    debug!(filter = %request.filter_id, total = info.total_items, "showing cached page while refreshing");
  }

  /// Replace the cursor snapshot, move to `loaded_page_count` pages and
  /// publish the changes between the rows shown before and after.
  fn apply_rows(
    &self,
    inner: &mut Inner<R::Entity>,
    rows: Vec<CachedRow<R::Entity>>,
    loaded_page_count: usize,
  ) {
    let before = inner.visible_row_count(self.page_size);
    inner.loaded_page_count = loaded_page_count;
    let limit = inner.row_limit(self.page_size);

    let Some(cursor) = inner.cursor.as_mut() else {
      return;
    };
    let changes = cursor.replace(rows, before, limit);

    let after = inner.visible_row_count(self.page_size);
    debug_assert!(changes.iter().all(|change| change.is_within(before, after)));
    if !changes.is_empty() {
      self.emit(FetchEvent::Changes(changes));
    }
  }

  /// Refresh the cursor when another unit of work touches its filter.
  async fn listen(self: Arc<Self>) {
    let mut feed = self.service.local().store().subscribe();

    loop {
      let change = match feed.recv().await {
        Ok(change) => Some(change),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          debug!(skipped, "store change feed lagged; resyncing");
          None
        }
        Err(broadcast::error::RecvError::Closed) => break,
      };

      let _refresh = self.refresh.lock().await;

      let (session, filter_id) = {
        let inner = self.lock();
        // An in-flight load refreshes the cursor itself on completion
        if inner.state == FetchState::Loading {
          continue;
        }
        let Some(cursor) = inner.cursor.as_ref() else {
          continue;
        };
        (inner.session, cursor.filter_id().to_string())
      };

      if let Some(change) = &change {
        if !change.affects(R::entity_type(), &filter_id) {
          continue;
        }
      }

      let rows = match self.service.local().cached_rows(&filter_id).await {
        Ok(rows) => rows,
        Err(e) => {
          warn!(filter = %filter_id, error = %e, "failed to refresh cached rows");
          continue;
        }
      };

      let mut inner = self.lock();
      if inner.session == session {
        let loaded_page_count = inner.loaded_page_count;
        self.apply_rows(&mut inner, rows, loaded_page_count);
      }
    }
  }
}

//! Remote side of the cache: one HTTP GET per page, reconciled locally.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::local::LocalCacheService;
use super::query::{PageQuery, PageRange};
use super::stamps::{FetchStamp, StampStore};
use super::traits::{CachePolicy, PageInfo, PagedResource};
use crate::error::{ServiceError, ServiceResult};

/// Default freshness window for `CachePolicy::CachedElseLoad`, in seconds.
pub const DEFAULT_CACHE_TIME_INTERVAL_SECS: i64 = 60;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Issues GET requests and returns the decoded JSON object body.
#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn get_json(&self, url: Url) -> ServiceResult<Value>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(timeout: StdDuration, user_agent: &str) -> ServiceResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(user_agent)
      .build()?;
    Ok(Self { client })
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn get_json(&self, url: Url) -> ServiceResult<Value> {
    let response = self.client.get(url).send().await?.error_for_status()?;
    let body = response.bytes().await?;
    parse_object(&body)
  }
}

/// Decode a response body, accepting only a JSON object.
pub fn parse_object(body: &[u8]) -> ServiceResult<Value> {
  let value: Value = serde_json::from_slice(body).map_err(|_| ServiceError::WrongResponseFormat)?;
  if !value.is_object() {
    return Err(ServiceError::WrongResponseFormat);
  }
  Ok(value)
}

/// Fetches pages of one resource type and hands them to the local cache.
///
/// Failures are never retried here; retry belongs to the caller.
pub struct RemoteFetchService<R: PagedResource> {
  base_url: Url,
  credentials: BTreeMap<String, String>,
  transport: Arc<dyn HttpTransport>,
  local: LocalCacheService<R>,
  stamps: Arc<dyn StampStore>,
  cache_time_interval: Duration,
}

impl<R: PagedResource> RemoteFetchService<R> {
  pub fn new(
    base_url: Url,
    transport: Arc<dyn HttpTransport>,
    local: LocalCacheService<R>,
    stamps: Arc<dyn StampStore>,
  ) -> Self {
    Self {
      base_url,
      credentials: BTreeMap::new(),
      transport,
      local,
      stamps,
      cache_time_interval: Duration::seconds(DEFAULT_CACHE_TIME_INTERVAL_SECS),
    }
  }

  /// Parameters sent with every request but excluded from identifiers.
  pub fn with_credentials(mut self, credentials: BTreeMap<String, String>) -> Self {
    self.credentials = credentials;
    self
  }

  pub fn with_cache_time_interval(mut self, interval: Duration) -> Self {
    self.cache_time_interval = interval;
    self
  }

  pub fn local(&self) -> &LocalCacheService<R> {
    &self.local
  }

  /// Full request URL for a query and optional page range.
  pub fn url_for(&self, query: &PageQuery, range: Option<PageRange>) -> ServiceResult<Url> {
    let mut url = self
      .base_url
      .join(query.path())
      .map_err(|e| ServiceError::Internal(format!("bad path '{}': {}", query.path(), e)))?;

    let mut params = query.parameters(range);
    params.extend(self.credentials.clone());
    if !params.is_empty() {
      url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
  }

  /// Fetch one page from the network, reconcile it into the cache and stamp it.
  ///
  /// The page counts as loaded once reconciled; a stamp that cannot be
  /// recorded only makes the next `CachedElseLoad` fetch again.
  pub async fn fetch_page(&self, query: &PageQuery, range: Option<PageRange>) -> ServiceResult<PageInfo> {
    if range.is_some_and(|r| r.length == 0) {
      return Err(ServiceError::Internal("page range with zero length".to_string()));
    }

    let url = self.url_for(query, range)?;
    debug!(filter = %query.filter_identifier(), page = range.map(|r| r.page_number()), "fetching page");

    let payload = self.transport.get_json(url).await.map_err(|e| {
      warn!(filter = %query.filter_identifier(), error = %e, "page request failed");
      e
    })?;

    let info = self.local.reconcile_page(query, payload, range).await?;

    let stamp = FetchStamp::now(info.total_items);
    if let Err(e) = self.stamps.record(&query.cache_identifier(range), stamp).await {
      warn!(filter = %query.filter_identifier(), error = %e, "failed to record fetch stamp");
    }

    Ok(info)
  }

  /// Load a page according to `policy`.
  ///
  /// `CachedThenLoad` fetches like `ReloadIgnoringCache`; showing the cached
  /// rows before the response arrives is up to the caller.
  pub async fn load(
    &self,
    query: &PageQuery,
    policy: CachePolicy,
    range: Option<PageRange>,
  ) -> ServiceResult<PageInfo> {
    match policy {
      CachePolicy::CachedOnly => self.cached_info(query, range).await,
      CachePolicy::CachedElseLoad => {
        if self.is_cache_expired(query, range).await? {
          self.fetch_page(query, range).await
        } else {
          debug!(filter = %query.filter_identifier(), "serving page from cache");
          self.cached_info(query, range).await
        }
      }
      CachePolicy::CachedThenLoad | CachePolicy::ReloadIgnoringCache => {
        self.fetch_page(query, range).await
      }
    }
  }

  /// True when no stamp exists for the request or it is older than the TTL.
  pub async fn is_cache_expired(&self, query: &PageQuery, range: Option<PageRange>) -> ServiceResult<bool> {
    let stamp = self.stamp(query, range).await?;
    Ok(match stamp {
      Some(stamp) => stamp.is_expired(self.cache_time_interval, Utc::now()),
      None => true,
    })
  }

  /// Forget every fetch stamp so the next `CachedElseLoad` goes to the network.
  pub async fn clear_cache_stamps(&self) -> ServiceResult<usize> {
    self.stamps.clear().await
  }

  async fn stamp(&self, query: &PageQuery, range: Option<PageRange>) -> ServiceResult<Option<FetchStamp>> {
    self.stamps.stamp(&query.cache_identifier(range)).await
  }

  async fn cached_info(&self, query: &PageQuery, range: Option<PageRange>) -> ServiceResult<PageInfo> {
    if let Some(stamp) = self.stamp(query, range).await? {
      return Ok(PageInfo {
        total_items: stamp.total_items,
      });
    }

    let total_items = self.local.cached_count(&query.filter_identifier()).await?;
    Ok(PageInfo { total_items })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStore;
  use crate::discogs::{album_search, artist_releases, AlbumSearch, ReleasesResource};
  use crate::testing::{releases_payload, MemoryStampStore, StubTransport};

  fn service(transport: Arc<StubTransport>) -> RemoteFetchService<ReleasesResource> {
    service_with_stamps(transport, Arc::new(MemoryStampStore::default()))
  }

  fn service_with_stamps(
    transport: Arc<StubTransport>,
    stamps: Arc<dyn StampStore>,
  ) -> RemoteFetchService<ReleasesResource> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    RemoteFetchService::new(
      Url::parse("https://api.test/").unwrap(),
      transport,
      LocalCacheService::new(store),
      stamps,
    )
  }

  #[test]
  fn test_parse_object_rejects_non_objects() {
    assert!(parse_object(br#"{"releases": []}"#).is_ok());
    assert!(matches!(
      parse_object(b"[1, 2, 3]"),
      Err(ServiceError::WrongResponseFormat)
    ));
    assert!(matches!(
      parse_object(b"<html>"),
      Err(ServiceError::WrongResponseFormat)
    ));
  }

  #[test]
  fn test_url_merges_paging_and_credentials() {
    let service = service(Arc::new(StubTransport::default())).with_credentials(
      [("key".to_string(), "k".to_string())].into_iter().collect(),
    );

    let query = album_search(&AlbumSearch::Text("blue train".to_string()));
    let url = service.url_for(&query, Some(PageRange::for_page(1, 20))).unwrap();

    assert_eq!(
      url.as_str(),
      "https://api.test/database/search?key=k&page=2&per_page=20&q=blue+train"
    );
    assert_eq!(query.filter_identifier(), "database/search?q=blue+train");
  }

  #[tokio::test]
  async fn test_fetch_page_reconciles_and_stamps() {
    let transport = Arc::new(StubTransport::default());
    transport.respond("/artists/2/releases", 1, releases_payload(1..=6, 14));
    let service = service(transport.clone());
    let query = artist_releases(2);
    let range = Some(PageRange::for_page(0, 6));

    assert!(service.is_cache_expired(&query, range).await.unwrap());

    let info = service.fetch_page(&query, range).await.unwrap();
    assert_eq!(info.total_items, 14);
    assert_eq!(transport.request_count(), 1);
    assert!(!service.is_cache_expired(&query, range).await.unwrap());
    assert_eq!(
      service.local().cached_count(&query.filter_identifier()).await.unwrap(),
      6
    );
  }

  #[tokio::test]
  async fn test_stamp_failure_keeps_fetched_page() {
    let transport = Arc::new(StubTransport::default());
    transport.respond("/artists/2/releases", 1, releases_payload(1..=6, 14));
    let service = service_with_stamps(transport, Arc::new(MemoryStampStore::failing()));
    let query = artist_releases(2);
    let range = Some(PageRange::for_page(0, 6));

    let info = service.fetch_page(&query, range).await.unwrap();
    assert_eq!(info.total_items, 14);
    assert_eq!(
      service.local().cached_count(&query.filter_identifier()).await.unwrap(),
      6
    );
    assert!(service.is_cache_expired(&query, range).await.unwrap());
  }

  #[tokio::test]
  async fn test_transport_failure_is_network_error() {
    let transport = Arc::new(StubTransport::default());
    transport.fail("/artists/2/releases", 1);
    let service = service(transport);
    let query = artist_releases(2);

    let result = service.fetch_page(&query, Some(PageRange::for_page(0, 6))).await;
    assert!(matches!(result, Err(ServiceError::Network(_))));
    assert!(service
      .is_cache_expired(&query, Some(PageRange::for_page(0, 6)))
      .await
      .unwrap());
  }

  #[tokio::test]
  async fn test_zero_length_range_is_internal_error() {
    let service = service(Arc::new(StubTransport::default()));
    let result = service
      .fetch_page(&artist_releases(2), Some(PageRange::new(0, 0)))
      .await;
    assert!(matches!(result, Err(ServiceError::Internal(_))));
  }

  #[tokio::test]
  async fn test_cached_only_never_requests() {
    let transport = Arc::new(StubTransport::default());
    let service = service(transport.clone());

    let info = service
      .load(&artist_releases(2), CachePolicy::CachedOnly, Some(PageRange::for_page(0, 6)))
      .await
      .unwrap();

    assert_eq!(info.total_items, 0);
    assert_eq!(transport.request_count(), 0);
  }

  #[tokio::test]
  async fn test_cached_else_load_respects_ttl() {
    let transport = Arc::new(StubTransport::default());
    transport.respond("/artists/2/releases", 1, releases_payload(1..=6, 14));
    let query = artist_releases(2);
    let range = Some(PageRange::for_page(0, 6));

    let service = service(transport.clone());
    let first = service.load(&query, CachePolicy::CachedElseLoad, range).await.unwrap();
    let second = service.load(&query, CachePolicy::CachedElseLoad, range).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.request_count(), 1);

    let service = service.with_cache_time_interval(Duration::seconds(-1));
    service.load(&query, CachePolicy::CachedElseLoad, range).await.unwrap();
    assert_eq!(transport.request_count(), 2);

    assert_eq!(service.clear_cache_stamps().await.unwrap(), 1);
    service.load(&query, CachePolicy::ReloadIgnoringCache, range).await.unwrap();
    assert_eq!(transport.request_count(), 3);
  }
}

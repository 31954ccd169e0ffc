//! Service wiring and command handlers.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tokio::sync::broadcast;
use tracing::info;
use url::Url;

use crate::cache::{
  CachePolicy, EntityPredicate, HttpTransport, LocalCacheService, PagedResource, RemoteFetchService,
  ReqwestTransport, SqliteStampStore, SqliteStore, StampStore,
};
use crate::config::Config;
use crate::discogs::{artist_releases, AlbumsResource, ReleasesResource, SearchHistory};
use crate::fetch::{FetchEvent, PagedFetchResult};
use crate::list::{AlbumCell, ListViewModel, ReleaseCell};
use crate::search::SearchViewModel;

/// Services shared by every command
pub struct App {
  config: Config,
  releases: Arc<RemoteFetchService<ReleasesResource>>,
  albums: Arc<RemoteFetchService<AlbumsResource>>,
  history: SearchHistory,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let store = Arc::new(SqliteStore::open(config.cache.database.as_deref())?);
    let transport: Arc<dyn HttpTransport> = Arc::new(
      ReqwestTransport::new(config.network.timeout(), &config.discogs.user_agent)
        .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?,
    );
    let base_url = Url::parse(&config.discogs.base_url)
      .map_err(|e| eyre!("Invalid base_url '{}': {}", config.discogs.base_url, e))?;
    let stamps: Arc<dyn StampStore> = Arc::new(SqliteStampStore::new(Arc::clone(&store)));

    let releases = Arc::new(Self::service(&config, &base_url, &transport, &store, &stamps));
    let albums = Arc::new(Self::service(&config, &base_url, &transport, &store, &stamps));
    let history = SearchHistory::new(store);

    Ok(Self {
      config,
      releases,
      albums,
      history,
    })
  }

  fn service<R: PagedResource>(
    config: &Config,
    base_url: &Url,
    transport: &Arc<dyn HttpTransport>,
    store: &Arc<SqliteStore>,
    stamps: &Arc<dyn StampStore>,
  ) -> RemoteFetchService<R> {
    RemoteFetchService::new(
      base_url.clone(),
      Arc::clone(transport),
      LocalCacheService::new(Arc::clone(store)),
      Arc::clone(stamps),
    )
    .with_credentials(Config::credentials())
    .with_cache_time_interval(chrono::Duration::seconds(config.cache.time_interval_secs))
  }

  /// List the releases of an artist, loading up to `pages` pages.
  pub async fn releases(&self, artist_id: u64, pages: usize, policy: CachePolicy) -> Result<()> {
    let result = Arc::new(PagedFetchResult::with_cache_policy(
      Arc::clone(&self.releases),
      Some(self.config.paging.releases_page_size),
      policy,
    ));
    let mut events = result.subscribe();

    if let Some(load) = result.set_query(Some(artist_releases(artist_id))) {
      load.finished().await;
    }
    check_failures(&mut events)?;
    load_more(&result, &mut events, pages).await?;

    let list = ListViewModel::new(result, ReleaseCell::from_release);
    print_list(&list.cells(), list.result().total_count());
    Ok(())
  }

  /// Search albums (or artists) and record the search in history.
  pub async fn search(&self, text: &str, artists_only: bool, pages: usize, policy: CachePolicy) -> Result<()> {
    let result = Arc::new(PagedFetchResult::with_cache_policy(
      Arc::clone(&self.albums),
      Some(self.config.paging.search_page_size),
      policy,
    ));
    let mut events = result.subscribe();

    let search = SearchViewModel::new(Arc::clone(&result), self.history.clone())
      .with_debounce(Duration::ZERO)
      .artists_only(artists_only);
    if let Some(task) = search.search(Some(text)) {
      task.finished().await;
    }
    check_failures(&mut events)?;
    load_more(&result, &mut events, pages).await?;

    let list = ListViewModel::new(result, AlbumCell::from_album);
    print_list(&list.cells(), list.result().total_count());
    Ok(())
  }

  pub async fn history(&self, limit: usize) -> Result<()> {
    for item in self.history.recent(limit).await? {
      println!("{}  {}", item.searched_at.format("%Y-%m-%d %H:%M"), item.title);
    }
    Ok(())
  }

  /// Drop cached entities, all of them or those of one filter identifier.
  pub async fn clear_cache(&self, filter: Option<String>) -> Result<()> {
    let predicate = match filter {
      Some(filter_id) => EntityPredicate::Filter(filter_id),
      None => EntityPredicate::All,
    };

    let releases = self.releases.local().clear_cache(predicate.clone()).await?;
    let albums = self.albums.local().clear_cache(predicate).await?;
    // Stamps are shared by every resource type
    let stamps = self.releases.clear_cache_stamps().await?;

    info!(releases, albums, stamps, "cache cleared");
    println!("Removed {} releases, {} albums", releases, albums);
    Ok(())
  }
}

/// Load further pages until `pages` are loaded or everything is visible.
async fn load_more<R: PagedResource>(
  result: &PagedFetchResult<R>,
  events: &mut broadcast::Receiver<FetchEvent>,
  pages: usize,
) -> Result<()> {
  while result.loaded_page_count() < pages {
    let Some(load) = result.load_next_page_if_needed() else {
      break;
    };
    load.finished().await;
    check_failures(events)?;
  }
  Ok(())
}

fn check_failures(events: &mut broadcast::Receiver<FetchEvent>) -> Result<()> {
  loop {
    match events.try_recv() {
      Ok(FetchEvent::PageFailed { page, error }) => {
        return Err(eyre!("Loading page {} failed: {}", page + 1, error));
      }
      Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
      Err(_) => return Ok(()),
    }
  }
}

fn print_list<C: Display>(cells: &[C], total: usize) {
  for (index, cell) in cells.iter().enumerate() {
    println!("{:>4}  {}", index + 1, cell);
  }
  println!("-- {} of {}", cells.len(), total);
}

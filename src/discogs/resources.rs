//! Paged resource definitions and query builders for the Discogs endpoints.

use super::api_types::{ApiRelease, ApiSearchResult};
use super::types::{Album, Release};
use crate::cache::{update_if_needed, PageQuery, PagedResource};
use crate::error::ParseError;

/// Releases listed under an artist (`artists/{id}/releases`).
pub struct ReleasesResource;

impl PagedResource for ReleasesResource {
  type Record = ApiRelease;
  type Entity = Release;

  const ENVELOPE_KEY: &'static str = "releases";

  fn entity_type() -> &'static str {
    "release"
  }

  fn identifier(record: &ApiRelease) -> Result<String, ParseError> {
    record.id.map(|id| id.to_string()).ok_or(ParseError::InvalidData)
  }

  fn new_entity(identifier: &str) -> Release {
    Release {
      release_id: identifier.to_string(),
      ..Default::default()
    }
  }

  fn apply_fields(entity: &mut Release, record: &ApiRelease, _query: &PageQuery) -> bool {
    let mut changed = false;
    changed |= update_if_needed(&mut entity.title, record.title.clone());
    changed |= update_if_needed(&mut entity.year, record.year.clone());
    changed |= update_if_needed(&mut entity.artist, record.artist.clone());
    changed |= update_if_needed(&mut entity.role, record.role.clone());
    changed |= update_if_needed(&mut entity.thumb, record.thumb.clone());
    changed |= update_if_needed(&mut entity.release_type, record.release_type.clone());
    changed
  }
}

/// Albums found by a database search (`database/search`).
pub struct AlbumsResource;

impl PagedResource for AlbumsResource {
  type Record = ApiSearchResult;
  type Entity = Album;

  const ENVELOPE_KEY: &'static str = "results";

  fn entity_type() -> &'static str {
    "album"
  }

  fn identifier(record: &ApiSearchResult) -> Result<String, ParseError> {
    record.id.map(|id| id.to_string()).ok_or(ParseError::InvalidData)
  }

  fn new_entity(identifier: &str) -> Album {
    Album {
      album_id: identifier.to_string(),
      ..Default::default()
    }
  }

  fn apply_fields(entity: &mut Album, record: &ApiSearchResult, _query: &PageQuery) -> bool {
    let mut changed = false;
    changed |= update_if_needed(&mut entity.title, record.title.clone());
    changed |= update_if_needed(&mut entity.thumb, record.thumb.clone());
    changed |= update_if_needed(&mut entity.country, record.country.clone());
    changed |= update_if_needed(&mut entity.year, record.year.clone());
    changed |= update_if_needed(&mut entity.genre, joined(&record.genre));
    changed |= update_if_needed(&mut entity.style, joined(&record.style));
    changed |= update_if_needed(&mut entity.album_type, record.result_type.clone());
    changed
  }
}

fn joined(values: &[String]) -> Option<String> {
  if values.is_empty() {
    None
  } else {
    Some(values.join(", "))
  }
}

/// Query for the releases of one artist.
pub fn artist_releases(artist_id: u64) -> PageQuery {
  PageQuery::new("ReleasesQuery", format!("artists/{}/releases", artist_id))
}

/// What an album search looks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlbumSearch {
  /// Free text across the whole database
  Text(String),
  /// Artists matching the text
  Artist(String),
}

impl AlbumSearch {
  pub fn text(&self) -> &str {
    match self {
      AlbumSearch::Text(text) | AlbumSearch::Artist(text) => text,
    }
  }
}

/// Query for a database search.
pub fn album_search(search: &AlbumSearch) -> PageQuery {
  let query = PageQuery::new("AlbumQuery", "database/search").with_param("q", search.text());
  match search {
    AlbumSearch::Text(_) => query,
    AlbumSearch::Artist(_) => query.with_param("type", "artist"),
  }
}

//! List view models: visible entities mapped to display cells.

use std::fmt;
use std::sync::Arc;

use crate::cache::PagedResource;
use crate::discogs::{Album, Release};
use crate::fetch::PagedFetchResult;

/// Rows of a paged fetch result mapped through `cell`.
pub struct ListViewModel<R: PagedResource, C> {
  result: Arc<PagedFetchResult<R>>,
  cell: fn(&R::Entity) -> C,
}

impl<R: PagedResource, C> ListViewModel<R, C> {
  pub fn new(result: Arc<PagedFetchResult<R>>, cell: fn(&R::Entity) -> C) -> Self {
    Self { result, cell }
  }

  pub fn result(&self) -> &Arc<PagedFetchResult<R>> {
    &self.result
  }

  pub fn number_of_items(&self) -> usize {
    self.result.visible_row_count()
  }

  pub fn cell_view_model(&self, index: usize) -> Option<C> {
    self.result.row(index).map(|entity| (self.cell)(&entity))
  }

  pub fn cells(&self) -> Vec<C> {
    self.result.rows().iter().map(self.cell).collect()
  }
}

/// Cell of an artist release list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCell {
  pub title: String,
  pub year: Option<String>,
}

impl ReleaseCell {
  pub fn from_release(release: &Release) -> Self {
    Self {
      title: release.title.clone().unwrap_or_default(),
      year: release.year.clone(),
    }
  }
}

impl fmt::Display for ReleaseCell {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.year {
      Some(year) => write!(f, "{} ({})", self.title, year),
      None => write!(f, "{}", self.title),
    }
  }
}

/// Cell of an album search result list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumCell {
  pub title: String,
  pub country: String,
}

impl AlbumCell {
  pub fn from_album(album: &Album) -> Self {
    Self {
      title: album.title.clone().unwrap_or_default(),
      country: album.country.clone().unwrap_or_default(),
    }
  }
}

impl fmt::Display for AlbumCell {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.country.is_empty() {
      write!(f, "{}", self.title)
    } else {
      write!(f, "{} [{}]", self.title, self.country)
    }
  }
}

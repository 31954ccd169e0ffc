//! Remote query description and page ranges.

use std::collections::BTreeMap;

use url::form_urlencoded;

/// Pagination parameter names understood by the discography API.
const PER_PAGE_PARAM: &str = "per_page";
const PAGE_PARAM: &str = "page";

/// Absolute item range `[start, start + length)` of one page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
  pub start: usize,
  pub length: usize,
}

impl PageRange {
  pub fn new(start: usize, length: usize) -> Self {
    Self { start, length }
  }

  /// Range of the zero-based `page` for the given page size.
  pub fn for_page(page: usize, page_size: usize) -> Self {
    Self::new(page * page_size, page_size)
  }

  /// One-based page number sent to the server.
  pub fn page_number(&self) -> usize {
    if self.length == 0 {
      return 1;
    }
    self.start / self.length + 1
  }
}

/// A remote request for one logical, paginated result set.
///
/// Queries are plain values built per search/filter action. The filter
/// identifier is derived from the path and the non-paging parameters, so every
/// page of the same result set shares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
  kind: &'static str,
  path: String,
  params: BTreeMap<String, String>,
}

impl PageQuery {
  /// `kind` names the query type and prefixes cache identifiers.
  pub fn new(kind: &'static str, path: impl Into<String>) -> Self {
    Self {
      kind,
      path: path.into(),
      params: BTreeMap::new(),
    }
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.insert(key.into(), value.into());
    self
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  /// Stable key of the result set: path plus serialized non-paging parameters.
  pub fn filter_identifier(&self) -> String {
    if self.params.is_empty() {
      self.path.clone()
    } else {
      format!("{}?{}", self.path, encode(&self.params))
    }
  }

  /// Query parameters for a request, merged with pagination for `range`.
  pub fn parameters(&self, range: Option<PageRange>) -> BTreeMap<String, String> {
    let mut params = self.params.clone();
    if let Some(range) = range {
      params.insert(PER_PAGE_PARAM.to_string(), range.length.to_string());
      params.insert(PAGE_PARAM.to_string(), range.page_number().to_string());
    }
    params
  }

  /// Key under which the fetch timestamp of one page request is recorded:
  /// query kind, path and every parameter including paging.
  pub fn cache_identifier(&self, range: Option<PageRange>) -> String {
    let params = self.parameters(range);
    if params.is_empty() {
      format!("{}:{}", self.kind, self.path)
    } else {
      format!("{}:{}?{}", self.kind, self.path, encode(&params))
    }
  }
}

fn encode(params: &BTreeMap<String, String>) -> String {
  form_urlencoded::Serializer::new(String::new())
    .extend_pairs(params.iter())
    .finish()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_page_number_is_one_based() {
    assert_eq!(PageRange::for_page(0, 6).page_number(), 1);
    assert_eq!(PageRange::for_page(2, 6), PageRange::new(12, 6));
    assert_eq!(PageRange::new(12, 6).page_number(), 3);
  }

  #[test]
  fn test_filter_identifier_without_params_is_path() {
    let query = PageQuery::new("ReleasesQuery", "artists/2/releases");
    assert_eq!(query.filter_identifier(), "artists/2/releases");
  }

  #[test]
  fn test_filter_identifier_ignores_paging() {
    let query = PageQuery::new("AlbumQuery", "database/search")
      .with_param("type", "artist")
      .with_param("q", "miles davis");

    let id = query.filter_identifier();
    assert_eq!(id, "database/search?q=miles+davis&type=artist");

    let paged = query.parameters(Some(PageRange::for_page(1, 20)));
    assert_eq!(paged.get("page").map(String::as_str), Some("2"));
    assert_eq!(paged.get("per_page").map(String::as_str), Some("20"));
    assert_eq!(query.filter_identifier(), id);
  }

  #[test]
  fn test_cache_identifier_includes_kind_and_page() {
    let query = PageQuery::new("ReleasesQuery", "artists/2/releases");
    assert_eq!(
      query.cache_identifier(Some(PageRange::for_page(0, 6))),
      "ReleasesQuery:artists/2/releases?page=1&per_page=6"
    );
    assert_eq!(query.cache_identifier(None), "ReleasesQuery:artists/2/releases");
  }
}

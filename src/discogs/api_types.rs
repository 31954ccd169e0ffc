//! Serde-deserializable types matching Discogs API records.
//!
//! These types are separate from the persisted entities so a record can be
//! decoded leniently while the entities stay focused on display fields.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

// ============================================================================
// Artist releases endpoint record
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRelease {
  pub id: Option<u64>,
  pub title: Option<String>,
  #[serde(default, deserialize_with = "string_or_number")]
  pub year: Option<String>,
  pub artist: Option<String>,
  pub role: Option<String>,
  pub thumb: Option<String>,
  #[serde(rename = "type")]
  pub release_type: Option<String>,
}

// ============================================================================
// Database search endpoint record
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSearchResult {
  pub id: Option<u64>,
  pub title: Option<String>,
  pub thumb: Option<String>,
  pub country: Option<String>,
  #[serde(default, deserialize_with = "string_or_number")]
  pub year: Option<String>,
  #[serde(default)]
  pub genre: Vec<String>,
  #[serde(default)]
  pub style: Vec<String>,
  #[serde(rename = "type")]
  pub result_type: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Years arrive as strings from search and as numbers from artist releases.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Option::<Value>::deserialize(deserializer)? {
    Some(Value::String(s)) if !s.is_empty() => Some(s),
    Some(Value::Number(n)) => Some(n.to_string()),
    _ => None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_release_year_as_number() {
    let release: ApiRelease = serde_json::from_value(json!({
      "id": 20209,
      "title": "Kind Of Blue",
      "year": 1959,
      "type": "master",
    }))
    .unwrap();

    assert_eq!(release.id, Some(20209));
    assert_eq!(release.year.as_deref(), Some("1959"));
    assert_eq!(release.release_type.as_deref(), Some("master"));
  }

  #[test]
  fn test_search_result_defaults() {
    let result: ApiSearchResult = serde_json::from_value(json!({
      "id": 1,
      "title": "Miles Davis - Kind Of Blue",
      "year": "",
    }))
    .unwrap();

    assert_eq!(result.year, None);
    assert!(result.genre.is_empty());
    assert!(result.style.is_empty());
  }
}

use serde::{Deserialize, Serialize};

/// Release of an artist, as listed on the artist's release page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
  pub release_id: String,
  pub title: Option<String>,
  pub year: Option<String>,
  pub artist: Option<String>,
  pub role: Option<String>,
  pub thumb: Option<String>,
  pub release_type: Option<String>, // "master" or "release"
}

/// Album search result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Album {
  pub album_id: String,
  pub title: Option<String>,
  pub thumb: Option<String>,
  pub country: Option<String>,
  pub year: Option<String>,
  pub genre: Option<String>, // comma-joined
  pub style: Option<String>, // comma-joined
  pub album_type: Option<String>,
}

/// One remembered search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHistoryItem {
  pub id: i64,
  pub title: String,
  pub searched_at: chrono::DateTime<chrono::Utc>,
}

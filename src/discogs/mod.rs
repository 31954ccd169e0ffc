//! Discogs resources: artist releases, album search and search history.

mod api_types;
mod history;
mod resources;
mod types;

pub use history::SearchHistory;
pub use resources::{album_search, artist_releases, AlbumSearch, AlbumsResource, ReleasesResource};
pub use types::{Album, Release};

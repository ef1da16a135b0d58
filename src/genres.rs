//! Genre resolution backed by the persistent genre cache.

use log::{debug, warn};

use crate::cache::{ArtistTagCache, CacheStore};
use crate::musicbrainz::{MetadataService, ServiceError};

/// Persistent map of compound key -> genre names
pub type GenreCache = CacheStore<Vec<String>>;

const KEY_SEPARATOR: &str = "::";

/// Case-insensitive compound key. Distinct pairs that lowercase to the same
/// string share one entry.
pub fn cache_key(artist: &str, title: &str) -> String {
    format!("{}{}{}", artist, KEY_SEPARATOR, title).to_lowercase()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub cache_hits: usize,
    pub remote_lookups: usize,
    pub service_errors: usize,
}

pub struct GenreResolver<S> {
    service: S,
    artist_tags: ArtistTagCache,
    stats: ResolverStats,
}

impl<S: MetadataService> GenreResolver<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            artist_tags: ArtistTagCache::new(),
            stats: ResolverStats::default(),
        }
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    /// Genres for `(artist, title)`. Cached answers, empty ones included, are
    /// returned without touching the network; anything looked up is written
    /// back into `cache` before returning.
    pub fn resolve_genres(
        &mut self,
        artist: &str,
        title: &str,
        cache: &mut GenreCache,
    ) -> Vec<String> {
        let key = cache_key(artist, title);
        if let Some(genres) = cache.get(&key) {
            self.stats.cache_hits += 1;
            debug!("Genre cache hit for {:?}: {:?}", key, genres);
            return genres.clone();
        }

        self.stats.remote_lookups += 1;
        let genres = match self.lookup(artist, title) {
            Ok(genres) => genres,
            Err(e) => {
                self.stats.service_errors += 1;
                warn!("Genre lookup for {} - {} failed: {}", artist, title, e);
                Vec::new()
            }
        };
        debug!("Resolved {:?} -> {:?}", key, genres);

        cache.insert(key, genres.clone());
        genres
    }

    /// Recording tags first, then the first credited artist's tags.
    fn lookup(&mut self, artist: &str, title: &str) -> Result<Vec<String>, ServiceError> {
        let Some(top) = self.service.search_top_recording(artist, title)? else {
            return Ok(Vec::new());
        };

        if let Some(tags) = top.tags {
            return Ok(tags);
        }

        match top.artist_id {
            Some(artist_id) => {
                if let Some(tags) = self.artist_tags.get(&artist_id) {
                    return Ok(tags);
                }
                let tags = self.service.artist_tags(&artist_id)?;
                self.artist_tags.put(artist_id, tags.clone());
                Ok(tags)
            }
            None => Ok(Vec::new()),
        }
    }
}

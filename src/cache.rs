//! Persistent and in-run caches.
//!
//! [`CacheStore`] is a flat string-keyed JSON mapping backed by one file. It is
//! loaded once, mutated in memory for the whole run and saved at the end; the
//! in-memory map is the only source of truth in between.
//!
//! [`ArtistTagCache`] is a bounded LRU of MusicBrainz artist tag answers that
//! only lives for the current run.

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default capacity for the artist tag memo
const ARTIST_CACHE_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize cache for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A string-keyed mapping persisted as a pretty-printed JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStore<V> {
    entries: BTreeMap<String, V>,
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> CacheStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Load from a JSON file. A missing file yields an empty store; a file
    /// that exists but does not parse is an error, never silently dropped.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = serde_json::from_str(&content).map_err(|source| CacheError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { entries })
    }

    /// Overwrite the file with the current contents. Last write wins.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let content = serde_json::to_string_pretty(&self.entries).map_err(|source| {
            CacheError::Encode {
                path: path.to_path_buf(),
                source,
            }
        })?;
        write_atomic(path, content.as_bytes()).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl<V> CacheStore<V> {
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, value: V) {
        self.entries.insert(key, value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)
}

/// In-run memo of artist id -> tag names
pub struct ArtistTagCache {
    tags: LruCache<String, Vec<String>>,
}

impl ArtistTagCache {
    pub fn new() -> Self {
        Self::with_capacity(ARTIST_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            tags: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, artist_id: &str) -> Option<Vec<String>> {
        self.tags.get(artist_id).cloned()
    }

    pub fn put(&mut self, artist_id: String, tags: Vec<String>) {
        self.tags.put(artist_id, tags);
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }
}

impl Default for ArtistTagCache {
    fn default() -> Self {
        Self::new()
    }
}

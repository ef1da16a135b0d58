use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

use crate::cache::write_atomic;
use crate::jellyfin::{LibrarySource, TrackRecord};

/// Load the library snapshot from `cache_path`, or fetch it from `source` and
/// write it there when the file does not exist yet. A snapshot on disk is
/// trusted as-is until the file is deleted.
pub fn get_library(cache_path: &Path, source: &impl LibrarySource) -> Result<Vec<TrackRecord>> {
    if cache_path.exists() {
        info!("Loading library from {:?}...", cache_path);
        let content =
            fs::read_to_string(cache_path).context("Failed to read library cache file")?;
        let library: Vec<TrackRecord> =
            serde_json::from_str(&content).context("Failed to parse library cache JSON")?;
        info!("Loaded {} tracks from cache", library.len());
        return Ok(library);
    }

    info!("Fetching music library from Jellyfin...");
    let library = source
        .fetch_library()
        .context("Error connecting to Jellyfin")?;
    let content = serde_json::to_string(&library).context("Failed to serialize library")?;
    write_atomic(cache_path, content.as_bytes()).context("Failed to write library cache file")?;
    info!("Found {} tracks", library.len());
    Ok(library)
}

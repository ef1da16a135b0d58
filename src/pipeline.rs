//! Per-track enrichment pass.

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::genres::{GenreCache, GenreResolver};
use crate::jellyfin::TrackRecord;
use crate::musicbrainz::MetadataService;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Jellyfin run-time ticks per second
const TICKS_PER_SECOND: f64 = 10_000_000.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnrichedTrack {
    pub title: String,
    pub artists: Vec<String>,
    pub duration: Option<f64>, // Duration in seconds
    pub genres: Vec<String>,
    pub album: String,
    pub year: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenreSource {
    Server,
    Resolved,
}

/// Soft-cancel signal shared between the interrupt handler and the pass.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub cancelled: bool,
    pub server_genres: usize,
    pub resolved_genres: usize,
}

fn artists_of(record: &TrackRecord) -> Vec<String> {
    match (&record.album_artist, &record.artists) {
        (Some(album_artist), _) if !album_artist.is_empty() => vec![album_artist.clone()],
        (_, Some(artists)) if !artists.is_empty() => artists.clone(),
        _ => Vec::new(),
    }
}

/// Build the output record for one library item. Server genres are used as-is
/// when present; the resolver is only consulted when they are missing.
pub fn enrich_track<S: MetadataService>(
    record: &TrackRecord,
    resolver: &mut GenreResolver<S>,
    genre_cache: &mut GenreCache,
) -> (EnrichedTrack, GenreSource) {
    let title = record
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(UNKNOWN_TITLE)
        .to_string();
    let artists = artists_of(record);
    let primary_artist = artists.first().map(String::as_str).unwrap_or(UNKNOWN_ARTIST);

    let (genres, source) = match &record.genres {
        Some(genres) if !genres.is_empty() => (genres.clone(), GenreSource::Server),
        _ => (
            resolver.resolve_genres(primary_artist, &title, genre_cache),
            GenreSource::Resolved,
        ),
    };

    let track = EnrichedTrack {
        duration: record
            .run_time_ticks
            .map(|ticks| ticks as f64 / TICKS_PER_SECOND),
        album: record
            .album
            .clone()
            .unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        year: record.production_year,
        title,
        artists,
        genres,
    };
    (track, source)
}

/// Enrich `library` in order, appending to `output`. The cancel flag is
/// checked before each track; on cancel the pass stops and whatever is in
/// `output` stays there.
pub fn enrich<S: MetadataService>(
    library: &[TrackRecord],
    resolver: &mut GenreResolver<S>,
    genre_cache: &mut GenreCache,
    output: &mut Vec<EnrichedTrack>,
    cancel: &CancelFlag,
    mut on_progress: impl FnMut(usize, usize),
) -> PassOutcome {
    let total = library.len();
    let mut outcome = PassOutcome::default();

    for (i, record) in library.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!("Cancelled after {} of {} tracks", i, total);
            outcome.cancelled = true;
            break;
        }

        let (track, source) = enrich_track(record, resolver, genre_cache);
        match source {
            GenreSource::Server => outcome.server_genres += 1,
            GenreSource::Resolved => outcome.resolved_genres += 1,
        }
        output.push(track);
        on_progress(i + 1, total);
    }

    outcome
}

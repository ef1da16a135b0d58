//! Run orchestration with guaranteed finalization.
//!
//! Once the library snapshot is in hand, the output list and the genre cache
//! live in a [`Session`]. `Session::finish` writes both; if the session is
//! dropped without finishing (unwinding from a panic), `Drop` makes a
//! best-effort flush so accumulated work is not lost.

use anyhow::{Context, Result};
use log::{error, info};
use std::path::PathBuf;

use crate::cache::write_atomic;
use crate::config::Config;
use crate::genres::{GenreCache, GenreResolver};
use crate::jellyfin::LibrarySource;
use crate::library::get_library;
use crate::musicbrainz::MetadataService;
use crate::pipeline::{enrich, CancelFlag, EnrichedTrack};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tracks_written: usize,
    pub library_size: usize,
    pub server_genres: usize,
    pub resolved_genres: usize,
    pub cache_hits: usize,
    pub remote_lookups: usize,
    pub service_errors: usize,
    pub cancelled: bool,
}

pub struct Session {
    output: Vec<EnrichedTrack>,
    genre_cache: GenreCache,
    output_path: PathBuf,
    genre_cache_path: PathBuf,
    cancelled: bool,
    finished: bool,
}

impl Session {
    pub fn new(genre_cache: GenreCache, output_path: PathBuf, genre_cache_path: PathBuf) -> Self {
        Self {
            output: Vec::new(),
            genre_cache,
            output_path,
            genre_cache_path,
            cancelled: false,
            finished: false,
        }
    }

    /// Write the output and save the genre cache. Both are attempted; the
    /// first failure is returned.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        let output = self.write_output();

        info!(
            "Saving genre cache ({} entries) to {:?}...",
            self.genre_cache.len(),
            self.genre_cache_path
        );
        let cache = self
            .genre_cache
            .save(&self.genre_cache_path)
            .context("Failed to save genre cache");

        output.and(cache)
    }

    /// A pass cancelled before its first track never replaces output left by
    /// an earlier run.
    fn write_output(&self) -> Result<()> {
        if self.cancelled && self.output.is_empty() && self.output_path.exists() {
            info!("No tracks processed, keeping {:?}", self.output_path);
            return Ok(());
        }
        info!("Writing {} tracks to {:?}...", self.output.len(), self.output_path);
        let content =
            serde_json::to_string_pretty(&self.output).context("Failed to serialize output")?;
        write_atomic(&self.output_path, content.as_bytes()).context("Failed to write output file")
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.flush() {
            error!("Failed to save partial results: {:#}", e);
        }
    }
}

/// Obtain the library, enrich it and persist the output and the genre cache.
/// Failing to obtain the library or load the genre cache returns early and
/// writes nothing else; from then on finalization always runs.
pub fn run<L, S>(
    config: &Config,
    source: &L,
    service: S,
    cancel: &CancelFlag,
    on_progress: impl FnMut(usize, usize),
) -> Result<RunSummary>
where
    L: LibrarySource,
    S: MetadataService,
{
    let library = get_library(&config.library_cache, source)?;

    info!("Loading genre cache from {:?}...", config.genre_cache);
    let genre_cache = GenreCache::load(&config.genre_cache).context("Failed to load genre cache")?;
    info!("Loaded {} cached genre entries", genre_cache.len());

    let mut session = Session::new(
        genre_cache,
        config.output.clone(),
        config.genre_cache.clone(),
    );
    let mut resolver = GenreResolver::new(service);

    info!("Processing tracks...");
    let outcome = enrich(
        &library,
        &mut resolver,
        &mut session.genre_cache,
        &mut session.output,
        cancel,
        on_progress,
    );
    if outcome.cancelled {
        info!("Interrupted, saving anyway");
        session.cancelled = true;
    }

    let stats = resolver.stats();
    let summary = RunSummary {
        tracks_written: session.output.len(),
        library_size: library.len(),
        server_genres: outcome.server_genres,
        resolved_genres: outcome.resolved_genres,
        cache_hits: stats.cache_hits,
        remote_lookups: stats.remote_lookups,
        service_errors: stats.service_errors,
        cancelled: outcome.cancelled,
    };

    session.finish()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;
    use crate::genres::tests::FakeService;
    use crate::jellyfin::{TrackRecord, TransportError};
    use crate::musicbrainz::RecordingMatch;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    struct FakeServer(Option<serde_json::Value>);

    impl LibrarySource for FakeServer {
        fn fetch_library(&self) -> Result<Vec<TrackRecord>, TransportError> {
            match &self.0 {
                Some(items) => Ok(serde_json::from_value(items.clone()).unwrap()),
                None => Err(TransportError::Status {
                    url: "http://localhost:8096/Items".to_string(),
                    status: StatusCode::BAD_GATEWAY,
                }),
            }
        }
    }

    fn config_in(dir: &Path) -> Config {
        Config::from_raw(RawConfig {
            api_key: Some("key".to_string()),
            user_id: Some("user".to_string()),
            library_cache: dir.join("jellyfin_library_cache.json"),
            genre_cache: dir.join("genre_cache.json"),
            output: dir.join("out.json"),
            ..Default::default()
        })
        .unwrap()
    }

    fn two_tracks() -> FakeServer {
        FakeServer(Some(json!([
            {"Name": "X", "AlbumArtist": "A", "Genres": ["Rock"], "RunTimeTicks": 30000000},
            {"Name": "Y", "Artists": ["B", "C"], "RunTimeTicks": null}
        ])))
    }

    fn jazz_for_b() -> FakeService {
        FakeService::default().with_recording(
            "B",
            "Y",
            RecordingMatch {
                tags: Some(vec!["Jazz".to_string()]),
                artist_id: None,
            },
        )
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_end_to_end_two_tracks() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let service = jazz_for_b();

        let summary = run(&config, &two_tracks(), &service, &CancelFlag::new(), |_, _| {}).unwrap();

        assert_eq!(
            read_json(&config.output),
            json!([
                {"title": "X", "artists": ["A"], "duration": 3.0, "genres": ["Rock"],
                 "album": "Unknown Album", "year": null},
                {"title": "Y", "artists": ["B", "C"], "duration": null, "genres": ["Jazz"],
                 "album": "Unknown Album", "year": null}
            ])
        );
        assert_eq!(read_json(&config.genre_cache), json!({"b::y": ["Jazz"]}));
        assert!(config.library_cache.exists());
        assert_eq!(summary.tracks_written, 2);
        assert_eq!(summary.server_genres, 1);
        assert_eq!(summary.remote_lookups, 1);
        assert!(!summary.cancelled);
    }

    #[test]
    fn test_second_run_uses_both_caches() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let service = jazz_for_b();

        run(&config, &two_tracks(), &service, &CancelFlag::new(), |_, _| {}).unwrap();
        // Server is gone now; the snapshot and genre cache carry the run
        let summary = run(&config, &FakeServer(None), &service, &CancelFlag::new(), |_, _| {}).unwrap();

        assert_eq!(service.searches.get(), 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.remote_lookups, 0);
        assert_eq!(read_json(&config.output)[1]["genres"], json!(["Jazz"]));
    }

    #[test]
    fn test_fetch_failure_writes_no_output() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let service = FakeService::default();

        let result = run(&config, &FakeServer(None), &service, &CancelFlag::new(), |_, _| {});
        assert!(result.is_err());
        assert!(!config.output.exists());
        assert!(!config.genre_cache.exists());
        assert!(!config.library_cache.exists());
    }

    #[test]
    fn test_corrupt_genre_cache_is_fatal() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.genre_cache, "not json").unwrap();
        let service = FakeService::default();

        let result = run(&config, &two_tracks(), &service, &CancelFlag::new(), |_, _| {});
        assert!(result.is_err());
        assert!(!config.output.exists());
        assert_eq!(fs::read_to_string(&config.genre_cache).unwrap(), "not json");
    }

    #[test]
    fn test_cancelled_run_still_finalizes() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let service = jazz_for_b();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let summary = run(&config, &two_tracks(), &service, &cancel, |_, _| {}).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.tracks_written, 0);
        assert_eq!(read_json(&config.output), json!([]));
        assert_eq!(read_json(&config.genre_cache), json!({}));
    }

    #[test]
    fn test_cancel_before_first_track_keeps_previous_output() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.output, r#"[{"title": "previous"}]"#).unwrap();
        let service = jazz_for_b();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let summary = run(&config, &two_tracks(), &service, &cancel, |_, _| {}).unwrap();

        assert!(summary.cancelled);
        assert_eq!(read_json(&config.output), json!([{"title": "previous"}]));
        assert_eq!(read_json(&config.genre_cache), json!({}));
    }

    #[test]
    fn test_empty_library_replaces_previous_output() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.output, r#"[{"title": "previous"}]"#).unwrap();
        let service = FakeService::default();

        let server = FakeServer(Some(json!([])));
        let summary = run(&config, &server, &service, &CancelFlag::new(), |_, _| {}).unwrap();

        assert!(!summary.cancelled);
        assert_eq!(read_json(&config.output), json!([]));
    }

    #[test]
    fn test_genre_cache_saved_when_output_write_fails() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.json");
        fs::create_dir(&output).unwrap();
        let cache_path = dir.path().join("genre_cache.json");

        let mut cache = GenreCache::default();
        cache.insert("a::x".to_string(), vec!["Rock".to_string()]);
        let mut session = Session::new(cache, output, cache_path.clone());
        session.output.push(track_x());

        let err = session.finish().unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to write output file"));
        assert_eq!(read_json(&cache_path), json!({"a::x": ["Rock"]}));
    }

    fn track_x() -> EnrichedTrack {
        EnrichedTrack {
            title: "X".to_string(),
            artists: vec!["A".to_string()],
            duration: None,
            genres: vec!["Rock".to_string()],
            album: "Unknown Album".to_string(),
            year: None,
        }
    }

    #[test]
    fn test_dropped_session_flushes() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.json");
        let cache_path = dir.path().join("genre_cache.json");

        let mut cache = GenreCache::default();
        cache.insert("a::x".to_string(), vec!["Rock".to_string()]);
        {
            let mut session = Session::new(cache, output.clone(), cache_path.clone());
            session.output.push(track_x());
        }

        assert_eq!(read_json(&output)[0]["title"], json!("X"));
        assert_eq!(read_json(&cache_path), json!({"a::x": ["Rock"]}));
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use std::io::Write;
use std::path::PathBuf;

pub mod cache;
pub mod config;
pub mod genres;
pub mod jellyfin;
pub mod library;
pub mod musicbrainz;
pub mod pipeline;
pub mod session;

use config::{Config, RawConfig};
use jellyfin::JellyfinClient;
use musicbrainz::MusicBrainzClient;
use pipeline::CancelFlag;

/// Tag a Jellyfin music library with genres, filling gaps from MusicBrainz
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the Jellyfin server
    #[arg(long, env = "JELLYFIN_URL")]
    server_url: Option<String>,

    /// Jellyfin API key
    #[arg(long, env = "JELLYFIN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Jellyfin user ID
    #[arg(long, env = "JELLYFIN_USER_ID")]
    user_id: Option<String>,

    /// Library snapshot cache; delete it to refetch from the server
    #[arg(long, default_value = "jellyfin_library_cache.json")]
    library_cache: PathBuf,

    /// Genre lookup cache
    #[arg(long, default_value = "genre_cache.json")]
    genre_cache: PathBuf,

    /// Where to write the enriched track list
    #[arg(short, long, default_value = "out.json")]
    output: PathBuf,

    /// Contact (email or URL) sent in the MusicBrainz user agent
    #[arg(long, env = "MUSICBRAINZ_CONTACT")]
    contact: Option<String>,

    /// Pause after each MusicBrainz request, in milliseconds
    #[arg(long, default_value_t = 1000)]
    request_delay_ms: u64,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl From<Cli> for RawConfig {
    fn from(cli: Cli) -> Self {
        RawConfig {
            server_url: cli.server_url,
            api_key: cli.api_key,
            user_id: cli.user_id,
            library_cache: cli.library_cache,
            genre_cache: cli.genre_cache,
            output: cli.output,
            contact: cli.contact,
            request_delay_ms: cli.request_delay_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
    );
    clog.init();

    let config = Config::from_raw(cli.into())?;
    info!("Connecting to Jellyfin server at {}...", config.server_url);

    let cancel = CancelFlag::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    // Blocking HTTP clients must not live on the async runtime threads
    let summary = tokio::task::spawn_blocking(move || {
        let server = JellyfinClient::new(&config);
        let musicbrainz = MusicBrainzClient::new(&config);
        session::run(&config, &server, musicbrainz, &cancel, |done, total| {
            print!("\rProcessed: {}/{} tracks", done, total);
            std::io::stdout().flush().ok();
        })
    })
    .await
    .context("Enrichment task panicked")??;
    println!();

    info!(
        "Wrote {} of {} tracks ({} with Jellyfin genres, {} resolved)",
        summary.tracks_written, summary.library_size, summary.server_genres, summary.resolved_genres
    );
    info!(
        "Genre cache hits: {}, MusicBrainz lookups: {}, lookup errors: {}",
        summary.cache_hits, summary.remote_lookups, summary.service_errors
    );
    if summary.cancelled {
        info!("Run was interrupted; partial results saved");
    }
    info!("Done.");

    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8096";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "JELLYFIN_API_KEY environment variable not set \
         (you can find your API key in Jellyfin Dashboard -> API Keys)"
    )]
    MissingApiKey,

    #[error(
        "JELLYFIN_USER_ID environment variable not set \
         (you can find your user ID in Jellyfin Dashboard -> Users)"
    )]
    MissingUserId,
}

/// Settings for one run, built once in `main` and handed to the clients.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub api_key: String,
    pub user_id: String,
    pub library_cache: PathBuf,
    pub genre_cache: PathBuf,
    pub output: PathBuf,
    /// Contact string embedded in the MusicBrainz user agent
    pub contact: Option<String>,
    /// Pause after each MusicBrainz request
    pub request_delay: Duration,
}

/// Raw values as they come off the command line / environment.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    pub server_url: Option<String>,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
    pub library_cache: PathBuf,
    pub genre_cache: PathBuf,
    pub output: PathBuf,
    pub contact: Option<String>,
    pub request_delay_ms: u64,
}

impl Config {
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let api_key = non_empty(raw.api_key).ok_or(ConfigError::MissingApiKey)?;
        let user_id = non_empty(raw.user_id).ok_or(ConfigError::MissingUserId)?;
        let server_url = non_empty(raw.server_url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            server_url,
            api_key,
            user_id,
            library_cache: raw.library_cache,
            genre_cache: raw.genre_cache,
            output: raw.output,
            contact: non_empty(raw.contact),
            request_delay: Duration::from_millis(raw.request_delay_ms),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

//! Jellyfin media-server client.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::Config;

const ITEM_FIELDS: &str =
    "Genres,DateCreated,MediaSources,Duration,Album,AlbumArtist,Artists,ProductionYear";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Jellyfin returned {status} for {url}")]
    Status { url: String, status: StatusCode },
}

/// One library item as the server reports it. Fields the enrichment does not
/// read are kept in `extra` so the snapshot round-trips.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrackRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artists: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_year: Option<i64>,
    /// Duration in 100ns ticks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time_ticks: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse {
    #[serde(rename = "Items", default)]
    items: Vec<TrackRecord>,
}

/// Anything that can produce the full track list.
pub trait LibrarySource {
    fn fetch_library(&self) -> Result<Vec<TrackRecord>, TransportError>;
}

pub struct JellyfinClient {
    client: Client,
    server_url: String,
    api_key: String,
    user_id: String,
}

impl JellyfinClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            server_url: config.server_url.clone(),
            api_key: config.api_key.clone(),
            user_id: config.user_id.clone(),
        }
    }

    fn items_url(&self) -> String {
        format!("{}/Items", self.server_url)
    }
}

impl LibrarySource for JellyfinClient {
    fn fetch_library(&self) -> Result<Vec<TrackRecord>, TransportError> {
        let url = self.items_url();
        let params = [
            ("userId", self.user_id.as_str()),
            ("IncludeItemTypes", "Audio"),
            ("Recursive", "true"),
            ("Fields", ITEM_FIELDS),
        ];

        let resp = self
            .client
            .get(&url)
            .header("X-Emby-Token", &self.api_key)
            .query(&params)
            .send()
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(TransportError::Status {
                url,
                status: resp.status(),
            });
        }

        let data: ItemsResponse = resp
            .json()
            .map_err(|source| TransportError::Request { url, source })?;
        Ok(data.items)
    }
}

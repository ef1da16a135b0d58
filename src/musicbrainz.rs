use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

const MUSICBRAINZ_API_URL: &str = "https://musicbrainz.org/ws/2";
const DEFAULT_CONTACT: &str = "myemail@example.com";

/// Characters with a meaning in Lucene query syntax
const LUCENE_SPECIAL: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':',
    '\\', '/',
];

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to query MusicBrainz: {0}")]
    Request(#[source] reqwest::Error),

    #[error("MusicBrainz API error: {0}")]
    Status(StatusCode),

    #[error("failed to parse MusicBrainz response: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
pub struct MBSearchResponse {
    #[serde(default)]
    pub recordings: Vec<MBRecording>,
}

#[derive(Debug, Deserialize)]
pub struct MBRecording {
    pub tags: Option<Vec<MBTag>>,
    #[serde(rename = "artist-credit")]
    pub artist_credit: Option<Vec<ArtistCredit>>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistCredit {
    pub artist: Option<MBArtist>,
}

#[derive(Debug, Deserialize)]
pub struct MBArtist {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct MBTag {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MBArtistResponse {
    pub tags: Option<Vec<MBTag>>,
}

/// The parts of a top search hit the genre lookup cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingMatch {
    /// Tag names on the recording itself; `None` when it carries no tags
    pub tags: Option<Vec<String>>,
    /// Id of the first credited artist
    pub artist_id: Option<String>,
}

impl From<MBRecording> for RecordingMatch {
    fn from(recording: MBRecording) -> Self {
        let tags = recording
            .tags
            .map(tag_names)
            .filter(|names| !names.is_empty());
        let artist_id = recording
            .artist_credit
            .and_then(|credits| credits.into_iter().next())
            .and_then(|credit| credit.artist)
            .map(|artist| artist.id);
        Self { tags, artist_id }
    }
}

fn tag_names(tags: Vec<MBTag>) -> Vec<String> {
    tags.into_iter().map(|t| t.name).collect()
}

/// Remote metadata lookups used by the genre resolver.
pub trait MetadataService {
    fn search_top_recording(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<RecordingMatch>, ServiceError>;

    fn artist_tags(&self, artist_id: &str) -> Result<Vec<String>, ServiceError>;
}

pub struct MusicBrainzClient {
    client: Client,
    user_agent: String,
    request_delay: Duration,
}

impl MusicBrainzClient {
    pub fn new(config: &Config) -> Self {
        let contact = config.contact.as_deref().unwrap_or(DEFAULT_CONTACT);
        Self {
            client: Client::new(),
            user_agent: format!(
                "JellyfinGenres/{} ( {} )",
                env!("CARGO_PKG_VERSION"),
                contact
            ),
            request_delay: config.request_delay,
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .query(params)
            .send()
            .map_err(ServiceError::Request);

        // Sleep to respect rate limits (1 req/sec), whatever the outcome
        if !self.request_delay.is_zero() {
            std::thread::sleep(self.request_delay);
        }

        let resp = resp?;
        if !resp.status().is_success() {
            return Err(ServiceError::Status(resp.status()));
        }
        resp.json().map_err(ServiceError::Decode)
    }
}

impl MetadataService for MusicBrainzClient {
    fn search_top_recording(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<Option<RecordingMatch>, ServiceError> {
        let url = format!("{}/recording", MUSICBRAINZ_API_URL);
        let query = recording_query(artist, title);
        let data: MBSearchResponse = self.get_json(
            &url,
            &[("query", query.as_str()), ("limit", "1"), ("fmt", "json")],
        )?;
        Ok(data.recordings.into_iter().next().map(RecordingMatch::from))
    }

    fn artist_tags(&self, artist_id: &str) -> Result<Vec<String>, ServiceError> {
        let url = format!("{}/artist/{}", MUSICBRAINZ_API_URL, artist_id);
        let data: MBArtistResponse = self.get_json(&url, &[("inc", "tags"), ("fmt", "json")])?;
        Ok(data.tags.map(tag_names).unwrap_or_default())
    }
}

/// Loose Lucene query for an artist and a recording title. Each value is
/// lowercased and escaped inside a group, so relevance scoring picks the best
/// hit instead of requiring an exact phrase.
pub fn recording_query(artist: &str, title: &str) -> String {
    [("artist", artist), ("recording", title)]
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(field, value)| {
            format!("{}:({})", field, escape_lucene(&value.to_lowercase()))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_lucene(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if LUCENE_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

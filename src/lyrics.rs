use crate::error::SyncError;
use crate::http::{with_query, HttpTransport};
use crate::lrc::{parse_lrc, LyricsIndex};
use crate::types::Track;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    #[serde(default)]
    track_name: Option<String>,
    #[serde(default)]
    synced_lyrics: Option<String>,
    #[serde(default)]
    plain_lyrics: Option<String>,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

pub struct LyricsClient {
    transport: Arc<dyn HttpTransport>,
    search_url: String,
}

impl LyricsClient {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str) -> Self {
        Self {
            transport,
            search_url: format!("{}/api/search", base_url.trim_end_matches('/')),
        }
    }

    pub async fn fetch_for_track(&self, track: &Track) -> Result<LyricsIndex, SyncError> {
        self.fetch_lyrics(track.primary_artist(), &track.title, &track.album)
            .await
    }

    /// Searches once and builds an index from the first result that carries
    /// synced lyrics.
    ///
    /// "Nothing synced" is an empty index, not an error. Errors mean the
    /// lookup itself failed.
    pub async fn fetch_lyrics(
        &self,
        artist_name: &str,
        track_name: &str,
        album_name: &str,
    ) -> Result<LyricsIndex, SyncError> {
        info!("Fetching lyrics for: {} by {}", track_name, artist_name);

        let url = with_query(
            &self.search_url,
            &[
                ("artist_name", artist_name),
                ("track_name", track_name),
                ("album_name", album_name),
            ],
        );
        debug!("Request URL: {}", url);

        let response = self.transport.get(&url, None).await?;
        match response.status {
            _ if response.is_success() => {}
            404 => return Ok(LyricsIndex::empty()),
            429 => {
                return Err(SyncError::RateLimited {
                    retry_after: response.retry_after,
                })
            }
            status => {
                return Err(SyncError::TransientNetwork(format!(
                    "lyrics search returned HTTP {}",
                    status
                )))
            }
        }

        let results: Vec<SearchResult> = serde_json::from_str(&response.body)
            .map_err(|e| SyncError::TransientNetwork(format!("JSON parse error: {}", e)))?;
        debug!("Found {} search results", results.len());

        let Some(chosen) = results.iter().find(|r| non_empty(&r.synced_lyrics)) else {
            if results.iter().any(|r| non_empty(&r.plain_lyrics)) {
                info!("Only unsynced lyrics available for '{}'", track_name);
            } else {
                info!("No lyrics found for '{}' by '{}'", track_name, artist_name);
            }
            return Ok(LyricsIndex::empty());
        };

        let synced = chosen.synced_lyrics.as_deref().unwrap_or("");
        let parsed = parse_lrc(synced);
        if !parsed.errors.is_empty() {
            warn!(
                "{} malformed line(s) skipped in lyrics for '{}'",
                parsed.errors.len(),
                chosen.track_name.as_deref().unwrap_or(track_name)
            );
        }
        info!("Loaded {} lyric lines", parsed.index.len());
        Ok(parsed.index)
    }
}

use crate::error::SyncError;
use crate::http::HttpTransport;
use crate::types::{Playback, PlaybackSnapshot, Track};
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    #[serde(default)]
    is_playing: bool,
    progress_ms: Option<u64>,
    item: Option<PlayerItem>,
}

#[derive(Debug, Deserialize)]
struct PlayerItem {
    // local files and some podcast episodes have no id
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    artists: Vec<NamedEntity>,
    album: Option<Album>,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Album {
    #[serde(default)]
    name: String,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

pub struct PlaybackClient {
    transport: Arc<dyn HttpTransport>,
    player_url: String,
}

impl PlaybackClient {
    pub fn new(transport: Arc<dyn HttpTransport>, api_base: &str) -> Self {
        Self {
            transport,
            player_url: format!("{}/v1/me/player", api_base.trim_end_matches('/')),
        }
    }

    /// One read of the current playback state.
    pub async fn current_playback(&self, token: &str) -> Result<Playback, SyncError> {
        let response = self.transport.get(&self.player_url, Some(token)).await?;
        match response.status {
            200 => parse_playback(&response.body),
            // nothing is playing on any device
            204 => Ok(Playback::idle()),
            401 => Err(SyncError::Unauthorized),
            429 => Err(SyncError::RateLimited {
                retry_after: response.retry_after,
            }),
            status => {
                warn!("Playback request returned HTTP {}", status);
                Err(SyncError::TransientNetwork(format!(
                    "playback request returned HTTP {}",
                    status
                )))
            }
        }
    }
}

fn parse_playback(body: &str) -> Result<Playback, SyncError> {
    if body.trim().is_empty() {
        return Ok(Playback::idle());
    }
    let player: PlayerResponse = serde_json::from_str(body)
        .map_err(|e| SyncError::TransientNetwork(format!("malformed playback response: {}", e)))?;

    let track = player.item.and_then(|item| {
        let Some(id) = item.id else {
            debug!("Playing item '{}' has no id, ignoring", item.name);
            return None;
        };
        let (album, artwork_url) = match item.album {
            Some(album) => {
                let artwork = album.images.into_iter().next().map(|image| image.url);
                (album.name, artwork)
            }
            None => (String::new(), None),
        };
        Some(Track {
            id,
            title: item.name,
            artists: item.artists.into_iter().map(|a| a.name).collect(),
            album,
            duration_ms: item.duration_ms,
            artwork_url,
        })
    });

    Ok(Playback {
        snapshot: PlaybackSnapshot {
            track_id: track.as_ref().map(|t| t.id.clone()),
            position_ms: player.progress_ms.unwrap_or(0),
            is_playing: player.is_playing,
        },
        track,
    })
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    pub duration_ms: u64,
    pub artwork_url: Option<String>,
}

impl Track {
    /// First credited artist, used for lyric lookups.
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or("")
    }

    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub timestamp: Duration,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub track_id: Option<String>,
    pub position_ms: u64,
    pub is_playing: bool,
}

/// One successful read of the remote session: the snapshot plus whatever track
/// metadata came with it.
#[derive(Debug, Clone)]
pub struct Playback {
    pub snapshot: PlaybackSnapshot,
    pub track: Option<Track>,
}

impl Playback {
    pub fn idle() -> Self {
        Self {
            snapshot: PlaybackSnapshot {
                track_id: None,
                position_ms: 0,
                is_playing: false,
            },
            track: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollState {
    /// `None` means before the first line, or no lyrics at all.
    pub active_line: Option<usize>,
    pub last_track_id: Option<String>,
}

impl PollState {
    pub fn reset(&mut self) {
        self.active_line = None;
        self.last_track_id = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialStatus {
    Valid,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub status: CredentialStatus,
}

// Events emitted by the polling loop for the presentation layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    AuthorizationRequired { url: String },
    Authenticated,
    AuthFailed { reason: String },
    TrackChanged(Track),
    LyricsLoaded { lines: Arc<[LyricLine]> },
    LyricsNotFound,
    LyricsUnavailable { reason: String },
    LineChanged { index: Option<usize>, text: Option<String> },
    ScrollTarget { offset: f64 },
    Progress { position_ms: u64, duration_ms: u64, is_playing: bool },
    PlaybackStopped,
}

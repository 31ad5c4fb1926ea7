//! The playback polling loop.
//!
//! One cooperative task: get a token, read one snapshot, update the lyric
//! position, sleep. Failures only change how long it sleeps.

use crate::auth::TokenManager;
use crate::error::SyncError;
use crate::lrc::LyricsIndex;
use crate::lyrics::LyricsClient;
use crate::scroll::ScrollLayout;
use crate::spotify::PlaybackClient;
use crate::types::{Playback, PollState, SyncEvent, Track};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Delay after a network or server error.
    pub transient_delay: Duration,
    /// Floor for rate-limit delays, also used when no Retry-After is sent.
    pub min_rate_limit_delay: Duration,
    /// Wait after the first failed sign-in. Doubles with every further
    /// failure up to `max_sign_in_retry`.
    pub sign_in_retry: Duration,
    pub max_sign_in_retry: Duration,
    pub layout: ScrollLayout,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            transient_delay: Duration::from_millis(1500),
            min_rate_limit_delay: Duration::from_secs(1),
            sign_in_retry: Duration::from_secs(60),
            max_sign_in_retry: Duration::from_secs(15 * 60),
            layout: ScrollLayout::default(),
        }
    }
}

const SESSION_EXPIRED: &str = "Session expired. Please sign in again.";

/// Whether the loop may open a new interactive sign-in on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignInGate {
    Open,
    BackOff { until: Instant, failures: u32 },
    /// The redirect listener cannot bind. Stays closed until restart.
    Disabled,
}

pub struct Poller {
    tokens: TokenManager,
    playback: PlaybackClient,
    lyrics: LyricsClient,
    config: PollerConfig,
    index: LyricsIndex,
    state: PollState,
    sign_in_gate: SignInGate,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl Poller {
    pub fn new(
        tokens: TokenManager,
        playback: PlaybackClient,
        lyrics: LyricsClient,
        config: PollerConfig,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            tokens,
            playback,
            lyrics,
            config,
            index: LyricsIndex::empty(),
            state: PollState::default(),
            sign_in_gate: SignInGate::Open,
            events,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn index(&self) -> &LyricsIndex {
        &self.index
    }

    /// Polls until `cancel` fires. An iteration in progress is dropped, not
    /// finished, when that happens.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Playback polling started (every {:?})", self.config.interval);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let delay = tokio::select! {
                _ = cancel.cancelled() => break,
                delay = self.poll_once(&cancel) => delay,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Playback polling stopped");
    }

    /// Runs one iteration and returns how long to wait before the next.
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Duration {
        let had_credential = self.tokens.credential().is_some();
        let token = match self.tokens.get_valid_token().await {
            Ok(token) => token,
            Err(e) if e.needs_sign_in() => {
                if had_credential {
                    self.emit(SyncEvent::AuthFailed {
                        reason: SESSION_EXPIRED.to_string(),
                    });
                }
                match self.sign_in(cancel).await {
                    Ok(token) => token,
                    Err(delay) => return delay,
                }
            }
            Err(e) => return self.backoff_for(&e),
        };

        let playback = match self.playback.current_playback(&token).await {
            Ok(playback) => playback,
            Err(SyncError::Unauthorized) => match self.recover_and_retry(cancel).await {
                Ok(playback) => playback,
                Err(delay) => return delay,
            },
            Err(e) => return self.backoff_for(&e),
        };

        self.apply(playback).await;
        self.config.interval
    }

    // 401 on the snapshot: refresh (or sign in again), then retry once.
    async fn recover_and_retry(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Playback, Duration> {
        info!("Playback request unauthorized, refreshing token");
        self.tokens.mark_unauthorized();

        let token = match self.tokens.refresh().await {
            Ok(token) => token,
            Err(e) if e.needs_sign_in() => {
                self.emit(SyncEvent::AuthFailed {
                    reason: SESSION_EXPIRED.to_string(),
                });
                self.sign_in(cancel).await?
            }
            Err(e) => return Err(self.backoff_for(&e)),
        };

        match self.playback.current_playback(&token).await {
            Ok(playback) => Ok(playback),
            Err(SyncError::Unauthorized) => {
                warn!("Playback request still unauthorized with a new token");
                self.tokens.mark_unauthorized();
                Err(self.config.transient_delay)
            }
            Err(e) => Err(self.backoff_for(&e)),
        }
    }

    /// Runs the interactive flow unless a recent failure holds it back.
    /// `Err` carries the delay before the next poll.
    async fn sign_in(&mut self, cancel: &CancellationToken) -> Result<String, Duration> {
        match self.sign_in_gate {
            SignInGate::Open => {}
            SignInGate::BackOff { until, .. } => {
                let now = Instant::now();
                if now < until {
                    debug!("Sign-in on hold for another {:?}", until - now);
                    return Err(until - now);
                }
            }
            SignInGate::Disabled => {
                debug!("Sign-in disabled until restart");
                return Err(self.config.max_sign_in_retry);
            }
        }

        info!("Sign-in required, starting authorization flow");
        match self.tokens.authenticate(cancel).await {
            Ok(token) => {
                self.sign_in_gate = SignInGate::Open;
                self.emit(SyncEvent::Authenticated);
                Ok(token)
            }
            Err(SyncError::Cancelled) | Err(SyncError::AuthFlowInProgress) => {
                Err(self.config.transient_delay)
            }
            Err(e @ SyncError::CallbackBind { .. }) => {
                error!(
                    "Sign-in disabled: {}. Free the port or change the redirect URI, then restart.",
                    e
                );
                self.sign_in_gate = SignInGate::Disabled;
                self.emit(SyncEvent::AuthFailed {
                    reason: e.to_string(),
                });
                Err(self.config.max_sign_in_retry)
            }
            Err(e) => {
                let failures = match self.sign_in_gate {
                    SignInGate::BackOff { failures, .. } => failures.saturating_add(1),
                    _ => 1,
                };
                let delay = self.sign_in_delay(failures);
                error!("Sign-in failed: {}; next attempt in {:?}", e, delay);
                self.sign_in_gate = SignInGate::BackOff {
                    until: Instant::now() + delay,
                    failures,
                };
                self.emit(SyncEvent::AuthFailed {
                    reason: e.to_string(),
                });
                Err(delay)
            }
        }
    }

    fn sign_in_delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.config
            .sign_in_retry
            .saturating_mul(factor)
            .min(self.config.max_sign_in_retry)
    }

    fn backoff_for(&self, err: &SyncError) -> Duration {
        match err {
            SyncError::RateLimited { retry_after } => {
                let delay = retry_after
                    .unwrap_or(self.config.min_rate_limit_delay)
                    .max(self.config.min_rate_limit_delay)
                    .max(self.config.interval);
                warn!("Rate limited, next poll in {:?}", delay);
                delay
            }
            _ if err.is_retryable() => {
                warn!(
                    "Polling failed: {}; retrying in {:?}",
                    err, self.config.transient_delay
                );
                self.config.transient_delay
            }
            _ => {
                error!(
                    "Unexpected polling error: {}; retrying in {:?}",
                    err, self.config.transient_delay
                );
                self.config.transient_delay
            }
        }
    }

    async fn apply(&mut self, playback: Playback) {
        let Playback { snapshot, track } = playback;

        let Some(track_id) = snapshot.track_id.as_deref() else {
            if self.state.last_track_id.is_some() {
                info!("Playback stopped");
                self.state.reset();
                self.index = LyricsIndex::empty();
                self.emit(SyncEvent::PlaybackStopped);
            }
            return;
        };

        let duration_ms = track.as_ref().map(|t| t.duration_ms).unwrap_or(0);
        if self.state.last_track_id.as_deref() != Some(track_id) {
            if let Some(track) = track {
                self.start_track(track).await;
            }
        }

        self.emit(SyncEvent::Progress {
            position_ms: snapshot.position_ms,
            duration_ms,
            is_playing: snapshot.is_playing,
        });
        self.sync_line(Duration::from_millis(snapshot.position_ms));
    }

    async fn start_track(&mut self, track: Track) {
        info!(
            "Track changed: '{}' by '{}'",
            track.title,
            track.artist_line()
        );
        self.state.active_line = None;
        self.state.last_track_id = Some(track.id.clone());
        self.index = LyricsIndex::empty();
        self.emit(SyncEvent::TrackChanged(track.clone()));

        match self.lyrics.fetch_for_track(&track).await {
            Ok(index) if index.is_empty() => self.emit(SyncEvent::LyricsNotFound),
            Ok(index) => {
                self.emit(SyncEvent::LyricsLoaded {
                    lines: index.shared_lines(),
                });
                self.index = index;
            }
            Err(e) => {
                warn!("Failed to fetch lyrics for '{}': {}", track.title, e);
                self.emit(SyncEvent::LyricsUnavailable {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn sync_line(&mut self, position: Duration) {
        let active = self.index.active_line(position);
        if active == self.state.active_line {
            return;
        }
        debug!(
            "Active line {:?} -> {:?} at {:?}",
            self.state.active_line, active, position
        );
        self.state.active_line = active;

        let text = active
            .and_then(|i| self.index.get(i))
            .map(|line| line.text.clone());
        let offset = active
            .map(|i| self.config.layout.centered_offset(i))
            .unwrap_or(0.0);
        self.emit(SyncEvent::LineChanged {
            index: active,
            text,
        });
        self.emit(SyncEvent::ScrollTarget { offset });
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("No event listener, dropping event");
        }
    }
}

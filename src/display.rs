//! Terminal presentation of sync events, plus the clock that drives the
//! scroll animation.

use crate::scroll::{ScrollAnimation, ScrollSmoother};
use crate::types::{LyricLine, SyncEvent, Track};
use log::{debug, info, warn};
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// What is currently on screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    pub track: Option<Track>,
    pub lines: Vec<LyricLine>,
    pub active_line: Option<usize>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    pub status: Option<String>,
}

pub struct Display<W: Write> {
    state: DisplayState,
    scroll: ScrollAnimation,
    out: W,
}

impl<W: Write> Display<W> {
    pub fn new(smoother: ScrollSmoother, out: W) -> Self {
        Self {
            state: DisplayState::default(),
            scroll: ScrollAnimation::new(smoother, 0.0),
            out,
        }
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll.offset()
    }

    pub fn scroll_target(&self) -> f64 {
        self.scroll.target()
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn tick(&mut self, dt: Duration) -> f64 {
        self.scroll.tick(dt)
    }

    pub fn handle(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::AuthorizationRequired { url } => {
                self.state.status = Some("Waiting for sign-in".into());
                self.print(format_args!(
                    "Open this link in your browser to sign in:\n  {}",
                    url
                ));
            }
            SyncEvent::Authenticated => {
                info!("Signed in to Spotify");
                self.state.status = None;
                self.print(format_args!("Signed in."));
            }
            SyncEvent::AuthFailed { reason } => {
                self.print(format_args!("Sign-in failed: {}", reason));
                self.state.status = Some(reason);
            }
            SyncEvent::TrackChanged(track) => {
                self.print(format_args!(
                    "\n♪ {} - {} ({})",
                    track.title,
                    track.artist_line(),
                    track.album
                ));
                self.state.track = Some(track);
                self.state.lines.clear();
                self.state.active_line = None;
                self.state.status = Some("Loading lyrics...".into());
                self.scroll.retarget(0.0);
            }
            SyncEvent::LyricsLoaded { lines } => {
                debug!("Displaying {} lyric lines", lines.len());
                self.state.lines = lines.to_vec();
                self.state.status = None;
            }
            SyncEvent::LyricsNotFound => {
                self.state.status = Some("No synced lyrics found".into());
                self.print(format_args!("  (no synced lyrics found)"));
            }
            SyncEvent::LyricsUnavailable { reason } => {
                self.print(format_args!("  (lyrics unavailable: {})", reason));
                self.state.status = Some("Lyrics unavailable".into());
            }
            SyncEvent::LineChanged { index, text } => {
                self.state.active_line = index;
                if let Some(text) = text {
                    self.print(format_args!("  {}", text));
                }
            }
            SyncEvent::ScrollTarget { offset } => self.scroll.retarget(offset),
            SyncEvent::Progress {
                position_ms,
                duration_ms,
                is_playing,
            } => {
                if is_playing != self.state.is_playing {
                    debug!("Playback {}", if is_playing { "resumed" } else { "paused" });
                }
                self.state.position_ms = position_ms;
                self.state.duration_ms = duration_ms;
                self.state.is_playing = is_playing;
            }
            SyncEvent::PlaybackStopped => {
                self.state = DisplayState {
                    status: Some("Nothing playing".into()),
                    ..DisplayState::default()
                };
                self.scroll.retarget(0.0);
                self.print(format_args!("\nPlayback stopped."));
            }
        }
    }

    fn print(&mut self, args: fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{}", args).and_then(|_| self.out.flush()) {
            warn!("Failed to write to display: {}", e);
        }
    }
}

/// Applies events as they arrive and advances the scroll animation every
/// frame. Returns the display once cancelled or once every sender is gone.
pub async fn run_display<W: Write>(
    mut display: Display<W>,
    mut events: mpsc::UnboundedReceiver<SyncEvent>,
    cancel: CancellationToken,
) -> Display<W> {
    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => display.handle(event),
                None => {
                    debug!("Event channel closed");
                    break;
                }
            },
            _ = frames.tick() => {
                let now = Instant::now();
                display.tick(now - last_frame);
                last_frame = now;
            }
        }
    }
    display
}

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Raw player states collapsed to [`PlayState::Pause`].
const PAUSED_PLAYER_STATES: [&str; 3] = ["PAUSED", "IDLE", "BUFFERING"];

const NO_MEDIA: &str = "none";

/// Whether the device is considered awake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PowerState {
    On,
    Off,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => f.write_str("on"),
            PowerState::Off => f.write_str("off"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PlayState {
    Play,
    #[default]
    Pause,
}

impl PlayState {
    /// Collapses a receiver-reported player state (`PLAYING`, `PAUSED`, ...).
    ///
    /// `PAUSED`, `IDLE` and `BUFFERING` map to `Pause`, anything else to `Play`.
    pub fn from_player_state(raw: &str) -> Self {
        if PAUSED_PLAYER_STATES.contains(&raw) {
            PlayState::Pause
        } else {
            PlayState::Play
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayState::Play => f.write_str("play"),
            PlayState::Pause => f.write_str("pause"),
        }
    }
}

/// Now-playing metadata. Replaced wholesale on change.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Media {
    pub artist: String,
    pub title: String,
}

impl Media {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }
}

impl Default for Media {
    fn default() -> Self {
        Self::new(NO_MEDIA, NO_MEDIA)
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    PowerState,
    PlayState,
    Application,
    Media,
}

/// State-change notification sent to subscribers.
///
/// Each variant carries the new value. A given kind is never emitted twice in a
/// row with the same value.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitorEvent {
    PowerState(PowerState),
    PlayState(PlayState),
    Application(String),
    Media(Media),
}

impl MonitorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MonitorEvent::PowerState(_) => EventKind::PowerState,
            MonitorEvent::PlayState(_) => EventKind::PlayState,
            MonitorEvent::Application(_) => EventKind::Application,
            MonitorEvent::Media(_) => EventKind::Media,
        }
    }
}

/// Point-in-time copy of everything the monitor knows about its device.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MonitorSnapshot {
    /// `None` until the first status or the bootstrap deadline.
    pub power_state: Option<PowerState>,
    pub play_state: PlayState,
    pub application: Option<String>,
    pub media: Media,
    pub address: Option<SocketAddr>,
    pub session_attached: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Monotonic id source shared by clones.
///
/// Used for request ids (shared by a session and its media sessions), for
/// session ids and for connection ids. Ids start at 1.
#[derive(Clone, Debug, Default)]
pub struct IdSequence(Arc<AtomicU64>);

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

use serde::{Deserialize, Serialize};

use crate::descriptor::PlaybackDescriptor;

/// Commands accepted by the session core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { item: PlaybackDescriptor },
    TogglePlayPause,
    PauseAll,
    Stop,
    Volume { value: f32 },
    ToggleMute,
    /// Seek to a fraction (0.0..=1.0) of the known duration.
    Seek { fraction: f64 },
    PlayWelcome,
    ResumeLast,
    SetAlarm { time: String },
    CancelAlarm,
    /// Equalizer band gain in dB (band 0 = 31 Hz ... band 9 = 16 kHz).
    EqGain { band: usize, gain_db: f32 },
    EqReset,
}

/// Transport phase derived from `(current.kind, is_playing, pending request)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle, // nothing selected
    Loading, // committed, play request not settled (or waiting for a handle)
    Playing,
    Paused, // explicitly paused, current retained
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Timeline {
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
}

/// Immutable view of the session handed to every observer.  `rev` increases
/// on every published change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub rev: u64,
    pub current: PlaybackDescriptor,
    pub last_non_trivial: Option<PlaybackDescriptor>,
    pub is_playing: bool,
    pub phase: PlaybackPhase,
    pub volume: f32,
    pub active_theme_genre: Option<String>,
    pub welcome_played: bool,
    pub handle_attached: bool,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub alarm: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            rev: 0,
            current: PlaybackDescriptor::empty(),
            last_non_trivial: None,
            is_playing: false,
            phase: PlaybackPhase::Idle,
            volume: 1.0,
            active_theme_genre: None,
            welcome_played: false,
            handle_attached: false,
            timeline: Timeline::default(),
            alarm: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One-line user notification (toast).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub detail: String,
}

impl Notice {
    pub fn new(severity: Severity, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            detail: detail.into(),
        }
    }
}

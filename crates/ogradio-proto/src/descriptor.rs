//! Playback descriptors: immutable records naming one playable thing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Id of the canonical "nothing selected" descriptor.
pub const EMPTY_ID: &str = "empty_state";
/// Id of the one-shot welcome message.
pub const WELCOME_ID: &str = "welcome_track";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    Track,
    Station,
    Playlist,
    Welcome,
    #[default]
    None,
}

impl DescriptorKind {
    /// Kinds worth remembering for "resume last" (alarm, play button with
    /// nothing selected).
    pub fn is_non_trivial(self) -> bool {
        matches!(
            self,
            DescriptorKind::Track | DescriptorKind::Station | DescriptorKind::Playlist
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("cannot play \"{title}\": audio source is missing")]
    MissingSource { id: String, title: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackDescriptor {
    pub id: String,
    pub kind: DescriptorKind,
    #[serde(default)]
    pub source_uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub context_label: String,
    /// Theme selector only; playback ignores it.
    #[serde(default)]
    pub genre_tag: Option<String>,
    #[serde(default)]
    pub artwork_uri: Option<String>,
}

impl PlaybackDescriptor {
    /// The "Ready to Play" descriptor `current` falls back to.
    pub fn empty() -> Self {
        Self {
            id: EMPTY_ID.to_string(),
            kind: DescriptorKind::None,
            source_uri: String::new(),
            title: "Ready to Play".to_string(),
            context_label: "Select a station or track".to_string(),
            genre_tag: None,
            artwork_uri: None,
        }
    }

    pub fn welcome(source_uri: impl Into<String>) -> Self {
        Self {
            id: WELCOME_ID.to_string(),
            kind: DescriptorKind::Welcome,
            source_uri: source_uri.into(),
            title: "Welcome to OG Radio".to_string(),
            context_label: "OnkelGashi".to_string(),
            genre_tag: None,
            artwork_uri: None,
        }
    }

    pub fn station(
        id: &str,
        name: impl Into<String>,
        source_uri: impl Into<String>,
        genre: Option<&str>,
    ) -> Self {
        Self {
            id: format!("station_{id}"),
            kind: DescriptorKind::Station,
            source_uri: source_uri.into(),
            title: name.into(),
            context_label: String::new(),
            genre_tag: genre.map(str::to_string),
            artwork_uri: None,
        }
    }

    pub fn playlist(id: &str, title: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            id: format!("playlist_{id}"),
            kind: DescriptorKind::Playlist,
            source_uri: source_uri.into(),
            title: title.into(),
            context_label: String::new(),
            genre_tag: None,
            artwork_uri: None,
        }
    }

    pub fn track(id: &str, title: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            id: format!("track_{id}"),
            kind: DescriptorKind::Track,
            source_uri: source_uri.into(),
            title: title.into(),
            context_label: String::new(),
            genre_tag: None,
            artwork_uri: None,
        }
    }

    pub fn with_context(mut self, label: impl Into<String>) -> Self {
        self.context_label = label.into();
        self
    }

    pub fn with_genre(mut self, genre: Option<String>) -> Self {
        self.genre_tag = genre;
        self
    }

    pub fn with_artwork(mut self, artwork: Option<String>) -> Self {
        self.artwork_uri = artwork;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kind == DescriptorKind::None
    }

    /// True when the descriptor names something that can actually be played.
    pub fn is_playable(&self) -> bool {
        !self.is_empty() && !self.source_uri.trim().is_empty()
    }

    /// Enforces "`kind ≠ none` implies a non-empty source".
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if !self.is_empty() && self.source_uri.trim().is_empty() {
            let title = if self.title.is_empty() {
                "Unknown Track".to_string()
            } else {
                self.title.clone()
            };
            return Err(DescriptorError::MissingSource {
                id: self.id.clone(),
                title,
            });
        }
        Ok(())
    }
}

impl Default for PlaybackDescriptor {
    fn default() -> Self {
        Self::empty()
    }
}

//! Station / playlist / track catalog loaded from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::descriptor::PlaybackDescriptor;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate catalog id {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Catalog {
    #[serde(default, rename = "genre")]
    pub genres: Vec<Genre>,
    #[serde(default, rename = "playlist")]
    pub playlists: Vec<Playlist>,
    #[serde(default, rename = "track")]
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    /// Also the theme tag handed to the visual layer (e.g. "hip-hop").
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "station")]
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub src: String,
    #[serde(default)]
    pub listeners: u32,
    #[serde(default)]
    pub live: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    pub src: String,
    #[serde(default)]
    pub curator: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub artwork: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub src: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub artwork: Option<String>,
}

impl Catalog {
    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = toml::from_str(content)?;
        catalog.check_unique()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Try the configured file, then `catalog.toml` beside the executable,
    /// then in the working directory.  An empty catalog is not an error.
    pub fn discover(configured: &Path) -> Self {
        let mut candidates = vec![configured.to_path_buf()];
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join("catalog.toml"));
            }
        }
        candidates.push(PathBuf::from("catalog.toml"));

        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load(path) {
                Ok(c) => {
                    info!(
                        "Loaded catalog from {}: {} genres, {} playlists, {} tracks",
                        path.display(),
                        c.genres.len(),
                        c.playlists.len(),
                        c.tracks.len()
                    );
                    return c;
                }
                Err(e) => warn!("Failed to load catalog {}: {}", path.display(), e),
            }
        }

        info!("No catalog found, starting with an empty one");
        Self::default()
    }

    /// Every playable entry as a descriptor, stations first.
    pub fn descriptors(&self) -> Vec<PlaybackDescriptor> {
        let stations = self.genres.iter().flat_map(|g| {
            g.stations.iter().map(move |s| {
                PlaybackDescriptor::station(&s.id, s.name.clone(), s.src.clone(), Some(&g.id))
                    .with_context(g.name.clone())
            })
        });
        let playlists = self.playlists.iter().map(|p| {
            PlaybackDescriptor::playlist(&p.id, p.title.clone(), p.src.clone())
                .with_context(p.curator.clone())
                .with_genre(p.genre.clone())
                .with_artwork(p.artwork.clone())
        });
        let tracks = self.tracks.iter().map(|t| {
            PlaybackDescriptor::track(&t.id, t.title.clone(), t.src.clone())
                .with_context(t.artist.clone())
                .with_genre(t.genre.clone())
                .with_artwork(t.artwork.clone())
        });
        stations.chain(playlists).chain(tracks).collect()
    }

    /// Look up by namespaced descriptor id (`station_hh1`, `playlist_3`, ...).
    pub fn find(&self, descriptor_id: &str) -> Option<PlaybackDescriptor> {
        self.descriptors().into_iter().find(|d| d.id == descriptor_id)
    }

    fn check_unique(&self) -> Result<(), CatalogError> {
        let mut seen = std::collections::HashSet::new();
        for d in self.descriptors() {
            if !seen.insert(d.id.clone()) {
                return Err(CatalogError::Duplicate(d.id));
            }
        }
        Ok(())
    }
}

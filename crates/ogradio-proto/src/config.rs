use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub visualizer: VisualizerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_welcome_uri")]
    pub welcome_uri: String,
    /// Prefix joined onto catalog sources that start with `/`.
    /// Empty means sources are handed to the player unchanged.
    #[serde(default)]
    pub media_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizerConfig {
    /// Analyser FFT size; must be a power of two in 32..=32768.
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Number of amplitude bands per frame.
    #[serde(default = "default_bands")]
    pub bands: usize,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Analyser smoothing time constant (0.0..1.0).
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_toml")]
    pub catalog_toml: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            welcome_uri: default_welcome_uri(),
            media_root: String::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            bands: default_bands(),
            fps: default_fps(),
            smoothing: default_smoothing(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_toml: default_catalog_toml(),
        }
    }
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("daemon.log")
}

fn default_volume() -> f32 {
    1.0
}

fn default_welcome_uri() -> String {
    "/audio/welcome/Welcome.mp3".to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_fft_size() -> usize {
    256
}

fn default_bands() -> usize {
    32
}

fn default_fps() -> u32 {
    30
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_catalog_toml() -> PathBuf {
    platform::config_dir().join("catalog.toml")
}

impl Config {
    /// Load from the default location, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    fn validate(&self) -> anyhow::Result<()> {
        let fft = self.visualizer.fft_size;
        if !fft.is_power_of_two() || !(32..=32768).contains(&fft) {
            anyhow::bail!("visualizer.fft_size must be a power of two in 32..=32768, got {fft}");
        }
        if self.visualizer.bands == 0 {
            anyhow::bail!("visualizer.bands must be at least 1");
        }
        if self.visualizer.fps == 0 {
            anyhow::bail!("visualizer.fps must be at least 1");
        }
        if !(0.0..1.0).contains(&self.visualizer.smoothing) {
            anyhow::bail!("visualizer.smoothing must be in 0.0..1.0");
        }
        Ok(())
    }

    /// Resolve a catalog source against `session.media_root`.
    pub fn resolve_media(&self, source: &str) -> String {
        let root = self.session.media_root.trim_end_matches('/');
        if root.is_empty() || !source.starts_with('/') {
            source.to_string()
        } else {
            format!("{root}{source}")
        }
    }
}

//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Preference-ordered output formats probed when exporting.
pub const DEFAULT_MIME_CANDIDATES: [&str; 4] = [
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=vp8",
    "video/webm",
];

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default export settings.
    pub export: ExportDefaults,

    /// Preview playback behaviour.
    pub playback: PlaybackDefaults,

    /// Overlay rendering resources.
    pub overlay: OverlayConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Capture frame rate.
    pub fps: u32,

    /// Whether a clip's text overlay is burned into the export.
    pub include_text_overlay: bool,

    /// Surface size used until a source reports its native dimensions.
    pub surface_width: u32,
    pub surface_height: u32,

    /// Output formats, most preferred first.
    pub mime_candidates: Vec<String>,
}

/// Preview playback parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackDefaults {
    /// Position tolerance in seconds for seeks and segment ends.
    pub epsilon: f64,

    /// Wrap to the first segment after the last one.
    pub looping: bool,

    /// Clamp segment ends to the decoder-reported duration in preview.
    pub clamp_to_source_duration: bool,

    /// Log a warning when a wait sees no media event for this long.
    pub stall_warning_secs: u64,
}

/// Overlay text rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TrueType font used for overlay glyphs. Without one, only
    /// background boxes are rasterised.
    pub font_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "clipreel=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            export: ExportDefaults::default(),
            playback: PlaybackDefaults::default(),
            overlay: OverlayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            include_text_overlay: true,
            surface_width: 1280,
            surface_height: 720,
            mime_candidates: DEFAULT_MIME_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for PlaybackDefaults {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            looping: true,
            clamp_to_source_duration: true,
            stall_warning_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("clipreel").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.export.fps, 30);
        assert!(config.export.include_text_overlay);
        assert_eq!(
            (config.export.surface_width, config.export.surface_height),
            (1280, 720)
        );
        assert_eq!(config.export.mime_candidates[0], "video/webm;codecs=vp9,opus");
        assert_eq!(config.export.mime_candidates.last().unwrap(), "video/webm");
        assert!((config.playback.epsilon - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"export": {"fps": 24}, "logging": {"json": true}}"#).unwrap();
        assert_eq!(config.export.fps, 24);
        assert!(config.export.include_text_overlay);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert!(config.playback.looping);
    }

    #[test]
    fn test_save_and_load_roundtrip_on_disk() {
        let dir = std::env::temp_dir().join(format!("clipreel-config-{}", std::process::id()));
        let path = dir.join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.playback.looping = false;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert!(!loaded.playback.looping);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unparseable_file_falls_back() {
        let dir = std::env::temp_dir().join(format!("clipreel-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.export.fps, 30);
        let _ = std::fs::remove_dir_all(&dir);
    }
}

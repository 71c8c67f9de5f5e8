// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing or partial config.toml is fine.
// Positional command line arguments (title, width, height) override the
// [window] section.

use anyhow::{bail, Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::engine::EngineSettings;
use crate::window::WindowRequest;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings. A zero dimension means "fill the primary monitor".
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vk-frame-engine".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub depth: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vk_frame_engine.log".to_string(),
            show_fps: true,
        }
    }
}

/// Pre-compiled SPIR-V shader paths
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/cube.vert.spv"),
            fragment: PathBuf::from("shaders/cube.frag.spv"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.graphics.frames_in_flight == 0 {
            bail!("graphics.frames_in_flight must be at least 1");
        }
        Ok(())
    }

    /// Apply `<title> [width] [height]` (program name already stripped).
    pub fn apply_args<I, S>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        if let Some(title) = args.next() {
            self.window.title = title.as_ref().to_string();
        }
        if let Some(width) = args.next() {
            self.window.width = parse_dimension("width", width.as_ref())?;
        }
        if let Some(height) = args.next() {
            self.window.height = parse_dimension("height", height.as_ref())?;
        }
        if let Some(extra) = args.next() {
            bail!("unexpected argument {:?}", extra.as_ref());
        }
        Ok(())
    }

    /// Log filter from `debug.log_level`; unknown names fall back to Info.
    pub fn log_level(&self) -> LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            eprintln!(
                "Unknown log level '{}', defaulting to info",
                self.debug.log_level
            );
            LevelFilter::Info
        })
    }

    pub fn window_request(&self) -> WindowRequest {
        WindowRequest {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            app_name: self.window.title.clone(),
            frames_in_flight: self.graphics.frames_in_flight,
            clear_color: self.graphics.clear_color,
            depth: self.graphics.depth,
            validation: self.debug.validation_layers,
        }
    }
}

fn parse_dimension(name: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .with_context(|| format!("{name} must be a non-negative integer, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("config.toml")).unwrap();
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert!(config.graphics.depth);
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
            [window]
            title = "Cubes"

            [graphics]
            frames_in_flight = 3

            [shaders]
            vertex = "out/a.spv"
            "#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.window.title, "Cubes");
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert_eq!(config.shaders.vertex, PathBuf::from("out/a.spv"));
        assert_eq!(
            config.shaders.fragment,
            PathBuf::from("shaders/cube.frag.spv")
        );
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let file = write_config("[graphics]\nframes_in_flight = 0\n");
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config("[window\ntitle = ");
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn args_override_window_section() {
        let mut config = Config::default();
        config.apply_args(["Demo", "0", "0"]).unwrap();
        assert_eq!(config.window.title, "Demo");
        assert_eq!((config.window.width, config.window.height), (0, 0));

        let mut config = Config::default();
        config.apply_args(["Only title"]).unwrap();
        assert_eq!(config.window.title, "Only title");
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn bad_args_are_rejected() {
        assert!(Config::default().apply_args(["T", "wide"]).is_err());
        assert!(Config::default().apply_args(["T", "1", "2", "3"]).is_err());
    }

    #[test]
    fn log_level_parses_names() {
        let mut config = Config::default();
        config.debug.log_level = "debug".to_string();
        assert_eq!(config.log_level(), LevelFilter::Debug);
        config.debug.log_level = "loud".to_string();
        assert_eq!(config.log_level(), LevelFilter::Info);
    }
}

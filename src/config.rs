// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// A missing file means defaults; a file that exists but fails to parse is a
// fatal ConfigLoad error rather than a silent fallback.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::Stage;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub resources: ResourcesConfig,
}

/// Window settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "PXCube".to_string(),
            width: 1000,
            height: 700,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub surface_format: String,
    pub present_mode: String,
    /// Query the surface and fall back when the preferred format/mode is missing
    pub negotiate_surface: bool,
    pub clear_color: [f32; 4],
    /// None waits on the in-flight fence forever
    pub fence_timeout_ms: Option<u64>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            surface_format: "b8g8r8a8_srgb".to_string(),
            present_mode: "mailbox".to_string(),
            negotiate_surface: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout_ms: None,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "pxcube.log".to_string(),
        }
    }
}

/// Resource blobs, loaded in order. Index 0 is the vertex shader, index 1 the
/// fragment shader.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourcesConfig {
    pub shaders: Vec<PathBuf>,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            shaders: vec![
                PathBuf::from("shaders/triangle.vert.spv"),
                PathBuf::from("shaders/triangle.frag.spv"),
            ],
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))
            .context(Stage::ConfigLoad)?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context(Stage::ConfigLoad)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Get surface format as Vulkan format + color space
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        let format = match self.graphics.surface_format.to_lowercase().as_str() {
            "b8g8r8a8_srgb" => vk::Format::B8G8R8A8_SRGB,
            "b8g8r8a8_unorm" => vk::Format::B8G8R8A8_UNORM,
            "r8g8b8a8_srgb" => vk::Format::R8G8B8A8_SRGB,
            "r8g8b8a8_unorm" => vk::Format::R8G8B8A8_UNORM,
            _ => {
                log::warn!(
                    "Unknown surface format '{}', defaulting to B8G8R8A8_SRGB",
                    self.graphics.surface_format
                );
                vk::Format::B8G8R8A8_SRGB
            }
        };

        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    /// Fence wait timeout in nanoseconds
    pub fn fence_timeout(&self) -> u64 {
        self.graphics
            .fence_timeout_ms
            .map(|ms| ms.saturating_mul(1_000_000))
            .unwrap_or(u64::MAX)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', using info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code_of;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.window.title, "PXCube");
        assert_eq!((config.window.width, config.window.height), (1000, 700));
        assert_eq!(config.resources.shaders.len(), 2);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 640

            [graphics]
            present_mode = "fifo"
            fence_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 700);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.fence_timeout(), 250_000_000);
        assert!(!config.graphics.negotiate_surface);
    }

    #[test]
    fn default_policy_is_bgra_srgb_mailbox_unbounded() {
        let config = Config::default();
        let format = config.surface_format();
        assert_eq!(format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(format.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.fence_timeout(), u64::MAX);
    }

    #[test]
    fn unknown_names_fall_back() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync-please".into();
        config.graphics.surface_format = "rgb565".into();
        config.debug.log_level = "loud".into();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.surface_format().format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn malformed_file_is_config_stage_error() {
        let err = Config::parse("[window\nwidth = ").unwrap_err();
        assert_eq!(exit_code_of(&err), Stage::ConfigLoad.exit_code());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("pxcube-config-does-not-exist.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseConfig {
    /// ONNX heatmap model. `None` disables pose-aware placement.
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
}

fn default_confidence_threshold() -> f32 {
    0.15
}

fn default_input_size() -> u32 {
    368
}

/// Largest accepted garment-to-shoulder width ratio
pub const MAX_WIDTH_FACTOR: f32 = 5.0;

/// Largest accepted vertical offset, as a fraction of garment height
pub const MAX_VERTICAL_OFFSET_RATIO: f32 = 1.0;

/// Width factor and vertical offset ratio for one body region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionFit {
    pub width_factor: f32,
    pub vertical_offset_ratio: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default = "default_fallback_width_ratio")]
    pub fallback_width_ratio: f32,
    #[serde(default = "default_fallback_top_ratio")]
    pub fallback_top_ratio: f32,

    #[serde(default = "default_upper_body")]
    pub upper_body: RegionFit,
    #[serde(default = "default_lower_body")]
    pub lower_body: RegionFit,
    #[serde(default = "default_dresses")]
    pub dresses: RegionFit,
}

fn default_fallback_width_ratio() -> f32 {
    0.55
}

fn default_fallback_top_ratio() -> f32 {
    0.25
}

fn default_upper_body() -> RegionFit {
    RegionFit { width_factor: 1.5, vertical_offset_ratio: -0.10 }
}

fn default_lower_body() -> RegionFit {
    RegionFit { width_factor: 1.6, vertical_offset_ratio: 0.20 }
}

fn default_dresses() -> RegionFit {
    RegionFit { width_factor: 1.7, vertical_offset_ratio: 0.05 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("static/outputs")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Where `snapwear compose --debug` writes overlays when no path is given
    #[serde(default = "default_debug_dir")]
    pub output_dir: PathBuf,
}

fn default_debug_dir() -> PathBuf {
    PathBuf::from("~/.cache/snapwear/debug")
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            confidence_threshold: default_confidence_threshold(),
            input_width: default_input_size(),
            input_height: default_input_size(),
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            fallback_width_ratio: default_fallback_width_ratio(),
            fallback_top_ratio: default_fallback_top_ratio(),
            upper_body: default_upper_body(),
            lower_body: default_lower_body(),
            dresses: default_dresses(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: default_output_dir() }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            output_dir: default_debug_dir(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/snapwear/snapwear.toml (system-wide)
    /// 2. ~/.config/snapwear/snapwear.toml (user)
    /// 3. Compiled defaults
    ///
    /// Environment overrides are applied on top of whichever source won.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_first_available();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn load_first_available() -> Self {
        if let Ok(config) = Self::load_from_path("/etc/snapwear/snapwear.toml") {
            return config;
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("snapwear")
                .join("snapwear.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply `SNAPWEAR_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(model) = std::env::var_os("SNAPWEAR_POSE_MODEL") {
            self.pose.model_path = if model.is_empty() {
                None
            } else {
                Some(PathBuf::from(model))
            };
        }

        if let Ok(threshold) = std::env::var("SNAPWEAR_POSE_CONF_THRESHOLD") {
            self.pose.confidence_threshold = threshold.trim().parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "SNAPWEAR_POSE_CONF_THRESHOLD is not a number: {:?}",
                    threshold
                ))
            })?;
        }

        if let Some(dir) = std::env::var_os("SNAPWEAR_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.pose.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Pose confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.pose.input_width == 0 || self.pose.input_height == 0 {
            return Err(ConfigError::Validation(
                "Pose model input dimensions must be non-zero".to_string(),
            ));
        }

        for (name, fit) in [
            ("upper_body", &self.placement.upper_body),
            ("lower_body", &self.placement.lower_body),
            ("dresses", &self.placement.dresses),
        ] {
            if !(fit.width_factor > 0.0 && fit.width_factor <= MAX_WIDTH_FACTOR) {
                return Err(ConfigError::Validation(format!(
                    "Width factor for {} must be in (0.0, {}]",
                    name, MAX_WIDTH_FACTOR
                )));
            }

            if !(fit.vertical_offset_ratio.abs() <= MAX_VERTICAL_OFFSET_RATIO) {
                return Err(ConfigError::Validation(format!(
                    "Vertical offset ratio for {} must be within ±{}",
                    name, MAX_VERTICAL_OFFSET_RATIO
                )));
            }
        }

        let fallback_width = self.placement.fallback_width_ratio;
        if !(fallback_width > 0.0 && fallback_width <= 1.0) {
            return Err(ConfigError::Validation(
                "Fallback width ratio must be in (0.0, 1.0]".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.placement.fallback_top_ratio) {
            return Err(ConfigError::Validation(
                "Fallback top ratio must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.output.dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Output directory cannot be empty".to_string(),
            ));
        }

        if self.debug.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Debug output directory cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

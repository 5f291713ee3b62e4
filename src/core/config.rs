use crate::core::drape_engine::{
    DEFAULT_HEM_EXTENSION, DEFAULT_HIP_RATIO, DEFAULT_NECK_EXTENSION, DEFAULT_SHOULDER_COVERAGE,
    DEFAULT_SMOOTHING_FACTOR, DEFAULT_VISIBLE_HEIGHT, DEFAULT_WAIST_RATIO, DEFAULT_WRAP_DEPTH,
};
use crate::models::pose::PoseConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine home directory")]
    NoHomeDirectory,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MirrorConfig {
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub drape: DrapeConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Camera capture resolution; also the size of the composite still
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl VideoConfig {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Constants of the stylized drape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrapeConfig {
    /// World units spanned by the camera's visible height
    pub visible_height: f32,
    /// Collar raised above the shoulders, as a fraction of spine length
    pub neck_extension: f32,
    /// Hem dropped below the hips, as a fraction of spine length
    pub hem_extension: f32,
    /// Share of the garment's top width covered by the shoulders
    pub shoulder_coverage: f32,
    /// Waist width relative to top width
    pub waist_ratio: f32,
    /// Hip width relative to top width
    pub hip_ratio: f32,
    /// Depth pushed back at the garment's side edges
    pub wrap_depth: f32,
    /// Per-frame blend from the previous positions to the new targets
    pub smoothing_factor: f32,
}

impl Default for DrapeConfig {
    fn default() -> Self {
        Self {
            visible_height: DEFAULT_VISIBLE_HEIGHT,
            neck_extension: DEFAULT_NECK_EXTENSION,
            hem_extension: DEFAULT_HEM_EXTENSION,
            shoulder_coverage: DEFAULT_SHOULDER_COVERAGE,
            waist_ratio: DEFAULT_WAIST_RATIO,
            hip_ratio: DEFAULT_HIP_RATIO,
            wrap_depth: DEFAULT_WRAP_DEPTH,
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
        }
    }
}

/// Countdown and capture timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    pub countdown_start: u8,       // Default: 3
    pub tick_interval_ms: u64,     // Default: 1000
    pub settle_delay_ms: u64,      // Default: 100
    /// When true, losing the body mid-countdown cancels the countdown.
    /// When false the countdown runs to completion once started.
    pub cancel_countdown_on_tracking_loss: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            countdown_start: 3,
            tick_interval_ms: 1000,
            settle_delay_ms: 100,
            cancel_countdown_on_tracking_loss: false,
        }
    }
}

/// Garment image cleanup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreprocessConfig {
    pub crop_padding: u32,   // Pixels kept around the garment, source resolution
    pub alpha_threshold: u8, // Pixels above this alpha count as garment
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            crop_padding: 20,
            alpha_threshold: 10,
        }
    }
}

/// Fit analysis backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// `{closet}` is replaced with the serialized closet items
    pub system_prompt: String,
    pub user_prompt: String,
    pub timeout_seconds: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "google/gemma-3-27b-it:free".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            system_prompt: "You are Naomi, an elite AI fashion stylist. \
                You are trendy, direct and extremely helpful. \
                You have access to the user's closet: {closet}. \
                You will receive a photo of the user wearing a virtual garment. \
                Analyze the fit, the style, and how it looks on them. \
                Be honest but encouraging; it is a virtual try-on, so call out anything that looks off. \
                Keep responses short, punchy, and emoji-rich."
                .to_string(),
            user_prompt: "How does this look on me? Be honest!".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl MirrorConfig {
    /// Load configuration from the default location, creating it with defaults if missing
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: MirrorConfig = serde_json::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.video.width == 0 || self.video.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Invalid video size: {}x{}",
                self.video.width, self.video.height
            )));
        }

        let thresholds = [
            ("detection", self.pose.min_detection_confidence),
            ("presence", self.pose.min_presence_confidence),
            ("tracking", self.pose.min_tracking_confidence),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "Invalid {} confidence: {}. Must be between 0.0 and 1.0",
                    name, value
                )));
            }
        }

        if self.pose.num_poses != 1 {
            return Err(ConfigError::Invalid(format!(
                "Invalid pose count: {}. Only single-person tracking is supported",
                self.pose.num_poses
            )));
        }

        if self.pose.target_fps == 0 || self.pose.target_fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "Invalid target FPS: {}. Must be between 1 and 120",
                self.pose.target_fps
            )));
        }

        if self.drape.visible_height <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "Invalid visible height: {}",
                self.drape.visible_height
            )));
        }

        if self.drape.shoulder_coverage <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "Invalid shoulder coverage: {}",
                self.drape.shoulder_coverage
            )));
        }

        if !(self.drape.smoothing_factor > 0.0 && self.drape.smoothing_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "Invalid smoothing factor: {}. Must be in (0.0, 1.0]",
                self.drape.smoothing_factor
            )));
        }

        if self.capture.countdown_start == 0 {
            return Err(ConfigError::Invalid("Countdown must start above zero".to_string()));
        }

        if self.capture.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("Tick interval cannot be zero".to_string()));
        }

        if self.analysis.endpoint.is_empty() {
            return Err(ConfigError::Invalid("Analysis endpoint cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Reset to default configuration
    pub fn reset() -> ConfigResult<Self> {
        let config = Self::default();
        config.save()?;
        Ok(config)
    }

    /// Get the configuration file path
    fn get_config_path() -> ConfigResult<PathBuf> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| ConfigError::NoHomeDirectory)?;

        let mut path = PathBuf::from(home);
        path.push(".virtual_mirror");
        path.push("config");
        path.push("settings.json");

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uuid::Uuid;

    fn get_test_config_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("virtual_mirror_test_{}", Uuid::new_v4()));
        path.push("settings.json");
        path
    }

    fn cleanup_test_config(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert_eq!(config.video.width, 1280);
        assert_eq!(config.video.height, 720);
        assert_eq!(config.drape.visible_height, DEFAULT_VISIBLE_HEIGHT);
        assert_eq!(config.drape.smoothing_factor, DEFAULT_SMOOTHING_FACTOR);
        assert_eq!(config.drape.wrap_depth, DEFAULT_WRAP_DEPTH);
        assert_eq!(config.capture.countdown_start, 3);
        assert_eq!(config.capture.tick_interval_ms, 1000);
        assert_eq!(config.capture.settle_delay_ms, 100);
        assert!(!config.capture.cancel_countdown_on_tracking_loss);
        assert_eq!(config.preprocess.crop_padding, 20);
        assert_eq!(config.pose.min_tracking_confidence, 0.6);
    }

    #[test]
    fn test_config_validation() {
        let mut config = MirrorConfig::default();
        assert!(config.validate().is_ok());

        config.pose.min_detection_confidence = 1.5;
        assert!(config.validate().is_err());
        config.pose.min_detection_confidence = 0.6;

        config.drape.smoothing_factor = 0.0;
        assert!(config.validate().is_err());
        config.drape.smoothing_factor = DEFAULT_SMOOTHING_FACTOR;

        config.capture.countdown_start = 0;
        assert!(config.validate().is_err());
        config.capture.countdown_start = 3;

        config.pose.num_poses = 2;
        assert!(config.validate().is_err());
        config.pose.num_poses = 1;

        config.video.height = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = MirrorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: MirrorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MirrorConfig =
            serde_json::from_str(r#"{"video": {"width": 640, "height": 480}}"#).unwrap();
        assert_eq!(config.video.width, 640);
        assert_eq!(config.drape, DrapeConfig::default());
    }

    #[test]
    fn test_load_creates_default_file() {
        let path = get_test_config_path();

        let config = MirrorConfig::load_from(&path).unwrap();
        assert_eq!(config, MirrorConfig::default());
        assert!(path.exists());

        let mut changed = config.clone();
        changed.capture.cancel_countdown_on_tracking_loss = true;
        changed.save_to(&path).unwrap();
        assert_eq!(MirrorConfig::load_from(&path).unwrap(), changed);

        cleanup_test_config(&path);
    }
}

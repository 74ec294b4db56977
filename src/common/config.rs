use crate::common::error::{GymAuthError, Result};
use crate::camera::FacingMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Auto-detect sentinel for `camera.device_index`.
pub const AUTO_DETECT_DEVICE: u32 = 999;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub camera: CameraConfig,
    pub models: ModelConfig,
    pub detector: DetectorConfig,
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    /// Device used for `FacingMode::User`. 999 means auto-detect.
    pub device_index: u32,
    /// Device used for `FacingMode::Environment`, if the machine has one.
    #[serde(default)]
    pub rear_device_index: Option<u32>,
    #[serde(default)]
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_warmup_delay() -> u64 {
    50
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub detection_confidence: f32,
    #[serde(default = "default_nms_iou")]
    pub nms_iou_threshold: f32,
}

fn default_nms_iou() -> f32 { 0.45 }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    pub input_size: u32,
    pub normalization_value: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Maximum descriptor distance still accepted as the same person.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
}

fn default_tick_interval() -> u64 { 1000 }
fn default_match_threshold() -> f32 { 0.6 }

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            match_threshold: default_match_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Overrides the platform data directory outside dev mode.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/gym-auth.toml";
        Self::load_from_path(Path::new(config_path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GymAuthError::Other(anyhow::anyhow!(
                "Config file not found: {}. Please create it from the example.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| GymAuthError::Other(anyhow::anyhow!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(invalid(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(invalid(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if self.detector.detection_confidence < 0.0 || self.detector.detection_confidence > 1.0 {
            return Err(invalid(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.detection_confidence
            )));
        }
        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(invalid(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(invalid(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }

        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(invalid(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }
        if self.recognizer.normalization_value <= 0.0 {
            return Err(invalid(format!(
                "Recognizer normalization value must be positive, got {}",
                self.recognizer.normalization_value
            )));
        }

        // Descriptors are unit length, so no two can be further apart than 2.0
        if self.scan.match_threshold <= 0.0 || self.scan.match_threshold > 2.0 {
            return Err(invalid(format!(
                "Match threshold must be in (0.0, 2.0], got {}", self.scan.match_threshold
            )));
        }
        if self.scan.tick_interval_ms < 10 || self.scan.tick_interval_ms > 60_000 {
            return Err(invalid(format!(
                "Tick interval must be between 10 and 60000 ms, got {}",
                self.scan.tick_interval_ms
            )));
        }

        Ok(())
    }
}

fn invalid(message: String) -> GymAuthError {
    GymAuthError::Other(anyhow::anyhow!(message))
}

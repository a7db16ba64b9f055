use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub resize: ImageSize,
    pub crop: ImageSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for ImageConfig {
    fn default() -> Self {
        let size = ImageSize {
            height: 224,
            width: 224,
        };
        Self {
            resize: size,
            crop: size,
        }
    }
}

// ImageNet channel statistics.
impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image: ImageConfig::default(),
            normalization: NormalizationConfig::default(),
        }
    }
}

impl PreprocessConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |msg: String| ConfigError::InvalidValue("PREPROCESS_CONFIG".to_string(), msg);

        let raw = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&raw).map_err(invalid)?;
        log::info!("Loaded preprocessing settings from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        let config: PreprocessConfig = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), String> {
        let ImageConfig { resize, crop } = self.image;
        if resize.height == 0 || resize.width == 0 || crop.height == 0 || crop.width == 0 {
            return Err("image sizes must be positive".to_string());
        }
        if crop.height > resize.height || crop.width > resize.width {
            return Err("crop must fit inside the resized image".to_string());
        }
        if self.normalization.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("normalization std must be positive".to_string());
        }
        Ok(())
    }
}

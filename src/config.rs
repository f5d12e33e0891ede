//! Makeup transfer service configuration

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub models: ModelsConfig,
    pub preprocess: PreprocessConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub body_limit_mb: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub detector: PathBuf,
    pub parser: PathBuf,
    pub generator: PathBuf,
}

/// Face detection and crop parameters
#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Fraction of the detected face height added above the box
    pub up_ratio: f32,
    /// Fraction of the detected face height added below the box
    pub down_ratio: f32,
    /// Fraction of the detected face width added on each side
    pub width_ratio: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Side length of the square crop the generator works on
    pub native_size: u32,
    /// Re-add the original's high-frequency detail when pasting back
    pub detail_restore: bool,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 3000,
                body_limit_mb: 50,
                request_timeout_secs: 60,
            },
            inference: InferenceConfig {
                device: "CPU".to_string(),
            },
            models: ModelsConfig {
                detector: PathBuf::from("models/scrfd_10g_kps.onnx"),
                parser: PathBuf::from("models/bisenet_face_parsing.onnx"),
                generator: PathBuf::from("models/makeup_generator.onnx"),
            },
            preprocess: PreprocessConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            up_ratio: 0.6,
            down_ratio: 0.2,
            width_ratio: 0.2,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            native_size: 256,
            detail_restore: true,
        }
    }
}

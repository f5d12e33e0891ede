//! Service layer types

use std::collections::HashMap;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// One reference style applied to a region of the source
#[derive(Debug, Clone)]
pub struct StyleLayer {
    pub reference: RgbImage,
    pub region: String,
    pub intensity: f32,
}

impl StyleLayer {
    pub fn new(reference: RgbImage, region: impl Into<String>, intensity: f32) -> Self {
        Self {
            reference,
            region: region.into(),
            intensity,
        }
    }
}

/// How a transfer request combines source and reference
#[derive(Debug, Clone, PartialEq)]
pub enum TransferMode {
    /// Whole-face transfer at neutral intensity
    Full { postprocess: bool },
    /// Transfer restricted to one region
    Region { region: String, intensity: f32 },
    /// Whole-face transfer blended over the source
    Blended { intensity: f32 },
}

impl Default for TransferMode {
    fn default() -> Self {
        TransferMode::Full { postprocess: true }
    }
}

/// A single pipeline invocation
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: RgbImage,
    pub reference: RgbImage,
    pub mode: TransferMode,
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub version: String,
    pub models_loaded: HashMap<String, bool>,
}

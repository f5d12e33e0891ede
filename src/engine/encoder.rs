//! Sample encoding
//!
//! Wraps a prepared face into the tensors the generator consumes. Source
//! samples carry the identity to keep; reference samples carry a style plus
//! the regions of the source it may touch and how strongly.

use std::sync::Arc;

use image::RgbImage;
use ndarray::Array4;

use crate::error::{Error, Result};

use super::mask::{RegionMask, RegionSelector};
use super::preprocess::{image_to_nchw, Channels, PreparedFace};

/// Intensity bounds; 1.0 is the reference's own strength
pub const MIN_INTENSITY: f32 = 0.0;
pub const MAX_INTENSITY: f32 = 2.0;
pub const NEUTRAL_INTENSITY: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRole {
    Source,
    Reference,
}

/// Face crop with its mask and generator-ready tensors
#[derive(Debug, Clone)]
pub struct EncodedFace {
    image: RgbImage,
    mask: RegionMask,
    image_tensor: Array4<f32>,
    mask_tensor: Array4<f32>,
}

impl EncodedFace {
    fn encode(prepared: &PreparedFace) -> Self {
        Self {
            image: prepared.image.clone(),
            mask: prepared.mask.clone(),
            image_tensor: image_to_nchw(&prepared.image, Channels::Rgb, |v| v / 127.5 - 1.0),
            mask_tensor: prepared.mask.to_one_hot(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn mask(&self) -> &RegionMask {
        &self.mask
    }

    /// `[1, 3, N, N]`, RGB in [-1, 1]
    pub fn image_tensor(&self) -> &Array4<f32> {
        &self.image_tensor
    }

    /// `[1, labels, N, N]` one-hot
    pub fn mask_tensor(&self) -> &Array4<f32> {
        &self.mask_tensor
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }
}

/// Identity to preserve
#[derive(Debug, Clone)]
pub struct SourceSample {
    face: EncodedFace,
}

impl SourceSample {
    pub fn role(&self) -> SampleRole {
        SampleRole::Source
    }

    pub fn face(&self) -> &EncodedFace {
        &self.face
    }

    pub fn intensity(&self) -> f32 {
        NEUTRAL_INTENSITY
    }
}

/// Style to apply, restricted to a region of the source
#[derive(Debug, Clone)]
pub struct ReferenceSample {
    face: EncodedFace,
    selector: RegionSelector,
    target_mask: Arc<RegionMask>,
    intensity: f32,
}

impl ReferenceSample {
    pub fn role(&self) -> SampleRole {
        SampleRole::Reference
    }

    pub fn face(&self) -> &EncodedFace {
        &self.face
    }

    pub fn selector(&self) -> RegionSelector {
        self.selector
    }

    /// Mask of the source face this reference was encoded against
    pub fn target_mask(&self) -> &RegionMask {
        &self.target_mask
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }
}

/// Encode a source face: full mask, no restriction, neutral intensity
pub fn encode_source(prepared: &PreparedFace) -> SourceSample {
    SourceSample {
        face: EncodedFace::encode(prepared),
    }
}

/// Encode a reference face against the source mask it will restyle.
///
/// `selector` must name a region (`lips`, `eyeshadow`, `skin`) or `all`.
/// Finite intensities are clamped to [0, 2].
pub fn encode_reference(
    prepared: &PreparedFace,
    source_mask: &RegionMask,
    selector: &str,
    intensity: f32,
) -> Result<ReferenceSample> {
    let selector: RegionSelector = selector.parse()?;
    encode_reference_with(prepared, source_mask, selector, intensity)
}

/// `encode_reference` for an already parsed selector
pub fn encode_reference_with(
    prepared: &PreparedFace,
    source_mask: &RegionMask,
    selector: RegionSelector,
    intensity: f32,
) -> Result<ReferenceSample> {
    let intensity = clamp_intensity(intensity)?;

    if source_mask.dimensions() != prepared.mask.dimensions() {
        return Err(Error::dimensions(prepared.mask.dimensions(), source_mask.dimensions()));
    }

    Ok(ReferenceSample {
        face: EncodedFace::encode(prepared),
        selector,
        target_mask: Arc::new(source_mask.clone()),
        intensity,
    })
}

fn clamp_intensity(intensity: f32) -> Result<f32> {
    if !intensity.is_finite() {
        return Err(Error::InvalidIntensity(intensity));
    }
    Ok(intensity.clamp(MIN_INTENSITY, MAX_INTENSITY))
}

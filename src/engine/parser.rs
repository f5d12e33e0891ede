//! BiSeNet Face Parser
//!
//! Semantic face parsing with a BiSeNet model trained on CelebAMask-HQ.
//! The 19 parsing classes are folded into the closed `RegionLabel` set.

use std::sync::Arc;

use anyhow::{bail, Result};
use image::{imageops::FilterType, RgbImage};

use super::mask::{RegionLabel, RegionMask};
use super::pool::{read_tensor_f32, to_tensor, ModelPool, ModelType};
use super::preprocess::{image_to_nchw, Channels};

/// Input size of the parsing model
pub const PARSER_INPUT_SIZE: u32 = 512;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Anything that can label the regions of a face crop
pub trait FaceParser: Send + Sync {
    fn parse(&self, face: &RgbImage) -> Result<RegionMask>;
}

/// Map a CelebAMask-HQ class index onto a region label
pub fn celebamask_label(class: usize) -> RegionLabel {
    match class {
        1 | 10 => RegionLabel::Skin,  // skin, nose
        2 | 3 => RegionLabel::Brows,  // left/right brow
        4 | 5 => RegionLabel::Eyes,   // left/right eye
        12 | 13 => RegionLabel::Lips, // upper/lower lip
        _ => RegionLabel::Background,
    }
}

/// BiSeNet face parser
pub struct BiSeNetParser {
    pool: Arc<ModelPool>,
}

impl BiSeNetParser {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }
}

impl FaceParser for BiSeNetParser {
    fn parse(&self, face: &RgbImage) -> Result<RegionMask> {
        let resized = image::imageops::resize(face, PARSER_INPUT_SIZE, PARSER_INPUT_SIZE, FilterType::Triangle);

        let mut tensor = image_to_nchw(&resized, Channels::Rgb, |v| v / 255.0);
        for c in 0..3 {
            tensor
                .index_axis_mut(ndarray::Axis(1), c)
                .mapv_inplace(|v| (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
        }

        let model = self.pool.get_model(ModelType::Parser)?;
        let mut request = model.create_infer_request()?;
        request.set_input_tensor(&to_tensor(&tensor)?)?;
        request.infer()?;

        // First output holds the fused logits: [1, classes, H, W]
        let (dims, logits) = read_tensor_f32(&request.get_output_tensor_by_index(0)?)?;
        if dims.len() != 4 || dims[0] != 1 {
            bail!("unexpected parser output shape {:?}", dims);
        }
        let mask = logits_to_mask(&logits, dims[1], dims[3] as u32, dims[2] as u32)?;

        Ok(mask.resize(face.width(), face.height()))
    }
}

/// Per-pixel argmax over class planes stored as `[classes][h][w]`
pub fn logits_to_mask(logits: &[f32], classes: usize, width: u32, height: u32) -> Result<RegionMask> {
    let plane = width as usize * height as usize;
    if width == 0 || height == 0 {
        bail!("parser output has an empty {}x{} plane", width, height);
    }
    if classes == 0 || logits.len() != classes * plane {
        bail!(
            "parser logits length {} does not match {} classes of {}x{}",
            logits.len(),
            classes,
            width,
            height
        );
    }

    let labels = (0..plane)
        .map(|p| {
            let best = (0..classes)
                .max_by(|&a, &b| logits[a * plane + p].total_cmp(&logits[b * plane + p]))
                .unwrap_or(0);
            celebamask_label(best)
        })
        .collect();

    Ok(RegionMask::new(width, height, labels)?)
}

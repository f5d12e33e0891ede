//! Makeup generator
//!
//! Runs the exported transfer network. Input contract, all NCHW f32:
//! 0 source image `[1,3,N,N]` in [-1, 1], 1 source mask `[1,L,N,N]` one-hot,
//! 2 reference image, 3 reference mask. Output 0 is `[1,3,N,N]` in [-1, 1].

use std::sync::Arc;

use anyhow::{bail, Result};
use image::RgbImage;
use ndarray::Array4;

use super::encoder::{ReferenceSample, SourceSample};
use super::pool::{read_tensor_f32, to_tensor, ModelPool, ModelType};
use super::preprocess::nchw_to_image;
use super::transfer::StyleGenerator;

/// OpenVINO-backed generator
pub struct OpenVinoGenerator {
    pool: Arc<ModelPool>,
    native_size: u32,
}

impl OpenVinoGenerator {
    pub fn new(pool: Arc<ModelPool>, native_size: u32) -> Self {
        Self { pool, native_size }
    }
}

impl StyleGenerator for OpenVinoGenerator {
    fn native_size(&self) -> u32 {
        self.native_size
    }

    fn stylize(&self, source: &SourceSample, reference: &ReferenceSample) -> Result<RgbImage> {
        let inputs = [
            to_tensor(source.face().image_tensor())?,
            to_tensor(source.face().mask_tensor())?,
            to_tensor(reference.face().image_tensor())?,
            to_tensor(reference.face().mask_tensor())?,
        ];

        let model = self.pool.get_model(ModelType::Generator)?;
        let mut request = model.create_infer_request()?;
        for (index, tensor) in inputs.iter().enumerate() {
            request.set_input_tensor_by_index(index, tensor)?;
        }
        request.infer()?;

        let (dims, data) = read_tensor_f32(&request.get_output_tensor_by_index(0)?)?;
        let n = self.native_size as usize;
        if dims != [1, 3, n, n] {
            bail!("generator output shape {:?}, expected [1, 3, {n}, {n}]", dims);
        }

        let output = Array4::from_shape_vec((1, 3, n, n), data)?;
        Ok(nchw_to_image(&output)?)
    }
}

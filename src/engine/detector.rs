//! SCRFD Face Detector
//!
//! Face detection using the InsightFace SCRFD model.
//! Outputs bounding boxes and 5-point landmarks.

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;
use openvino::InferRequest;

use super::pool::{read_tensor_f32, to_tensor, ModelPool, ModelType};
use super::preprocess::{preprocess_for_detection, ResizeInfo, DETECTOR_INPUT_SIZE};

/// Face detection result
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub landmarks: [(f32, f32); 5],
}

/// Anything that can find faces in an RGB image
pub trait FaceLocator: Send + Sync {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceBox>>;
}

/// SCRFD Face Detector
pub struct FaceDetector {
    pool: Arc<ModelPool>,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl FaceDetector {
    /// Create a new face detector
    pub fn new(pool: Arc<ModelPool>, confidence_threshold: f32, nms_threshold: f32) -> Self {
        Self {
            pool,
            confidence_threshold,
            nms_threshold,
        }
    }

    /// Detect faces in an image
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<FaceBox>> {
        let resize_info = ResizeInfo::new(image.dimensions(), DETECTOR_INPUT_SIZE);
        let input = to_tensor(&preprocess_for_detection(image))?;

        let model = self.pool.get_model(ModelType::Detector)?;
        let mut request = model.create_infer_request()?;
        request.set_input_tensor(&input)?;
        request.infer()?;

        let detections = self.parse_outputs(&request, &resize_info)?;
        let final_detections = nms(detections, self.nms_threshold);

        tracing::debug!("Detected {} faces after NMS", final_detections.len());

        Ok(final_detections)
    }

    /// Parse SCRFD outputs
    ///
    /// The model has `fmc` strides; outputs are ordered scores for every
    /// stride, then bbox distances, then (optionally) keypoints.
    fn parse_outputs(&self, request: &InferRequest, resize_info: &ResizeInfo) -> Result<Vec<FaceBox>> {
        let mut all_boxes = Vec::new();

        let mut output_count = 0;
        for i in 0..20 {
            if request.get_output_tensor_by_index(i).is_ok() {
                output_count += 1;
            } else {
                break;
            }
        }

        let (fmc, use_kps, num_anchors) = match output_count {
            6 => (3, false, 2),
            9 => (3, true, 2),
            10 => (5, false, 1),
            15 => (5, true, 1),
            _ => {
                tracing::warn!("Unknown SCRFD output count: {}, trying default", output_count);
                (3, true, 2)
            }
        };

        let strides: &[i32] = if fmc == 3 { &[8, 16, 32] } else { &[8, 16, 32, 64, 128] };
        let (input_h, input_w) = (DETECTOR_INPUT_SIZE.1 as i32, DETECTOR_INPUT_SIZE.0 as i32);

        for (idx, &stride) in strides.iter().enumerate() {
            let (_, scores) = read_tensor_f32(&request.get_output_tensor_by_index(idx)?)?;
            let (_, bboxes) = read_tensor_f32(&request.get_output_tensor_by_index(idx + fmc)?)?;
            let kps = if use_kps {
                Some(read_tensor_f32(&request.get_output_tensor_by_index(idx + fmc * 2)?)?.1)
            } else {
                None
            };

            let feat_h = input_h / stride;
            let feat_w = input_w / stride;
            let stride = stride as f32;

            let mut anchor = 0usize;
            for y in 0..feat_h {
                for x in 0..feat_w {
                    let (cx, cy) = (x as f32 * stride, y as f32 * stride);
                    for _ in 0..num_anchors {
                        let i = anchor;
                        anchor += 1;

                        let Some(&score) = scores.get(i) else { continue };
                        if score < self.confidence_threshold || i * 4 + 3 >= bboxes.len() {
                            continue;
                        }

                        // distances: left, top, right, bottom
                        let d = &bboxes[i * 4..i * 4 + 4];
                        let (x1, y1) = resize_info.to_original(cx - d[0] * stride, cy - d[1] * stride);
                        let (x2, y2) = resize_info.to_original(cx + d[2] * stride, cy + d[3] * stride);

                        let mut landmarks = [(0.0f32, 0.0f32); 5];
                        if let Some(kps) = kps.as_ref().filter(|k| i * 10 + 9 < k.len()) {
                            for (j, lm) in landmarks.iter_mut().enumerate() {
                                let lx = cx + kps[i * 10 + j * 2] * stride;
                                let ly = cy + kps[i * 10 + j * 2 + 1] * stride;
                                *lm = resize_info.to_original(lx, ly);
                            }
                        }

                        let max_w = resize_info.original_width as f32;
                        let max_h = resize_info.original_height as f32;
                        all_boxes.push(FaceBox {
                            x1: x1.clamp(0.0, max_w),
                            y1: y1.clamp(0.0, max_h),
                            x2: x2.clamp(0.0, max_w),
                            y2: y2.clamp(0.0, max_h),
                            confidence: score,
                            landmarks,
                        });
                    }
                }
            }
        }

        tracing::debug!("Total {} faces before NMS", all_boxes.len());

        Ok(all_boxes)
    }
}

impl FaceLocator for FaceDetector {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceBox>> {
        self.detect(image)
    }
}

/// Non-maximum suppression, highest confidence first
pub fn nms(mut boxes: Vec<FaceBox>, threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| compute_iou(k, &candidate) <= threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Compute intersection over union
pub fn compute_iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);

    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

//! Face preprocessing for makeup transfer
//!
//! Decoding, tensor conversion, and the `Preprocessor` stage that turns a
//! full image into an aligned face crop, its region mask, and the crop
//! geometry needed to paste a result back.

use std::sync::Arc;

use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;
use tracing::debug;

use crate::config::PreprocessConfig;
use crate::error::{Error, Result};

use super::detector::{FaceBox, FaceLocator};
use super::geometry::{warp_affine, CropGeometry};
use super::mask::RegionMask;
use super::parser::FaceParser;

/// Standard input size for face detection (SCRFD)
pub const DETECTOR_INPUT_SIZE: (u32, u32) = (640, 640);

/// Cropped face plus its region mask, both at the generator's native size
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFace {
    pub image: RgbImage,
    pub mask: RegionMask,
}

impl PreparedFace {
    /// Pair a crop with its mask; both must have the same size
    pub fn new(image: RgbImage, mask: RegionMask) -> Result<Self> {
        if !mask.matches(&image) {
            return Err(Error::dimensions(image.dimensions(), mask.dimensions()));
        }
        Ok(Self { image, mask })
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }
}

/// Detects, crops and parses faces
pub struct Preprocessor {
    locator: Arc<dyn FaceLocator>,
    parser: Arc<dyn FaceParser>,
    config: PreprocessConfig,
    crop_size: u32,
}

impl Preprocessor {
    pub fn new(
        locator: Arc<dyn FaceLocator>,
        parser: Arc<dyn FaceParser>,
        config: PreprocessConfig,
        crop_size: u32,
    ) -> Self {
        Self {
            locator,
            parser,
            config,
            crop_size,
        }
    }

    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    /// Find the most confident face, crop it to the native size and label
    /// its regions. The input image is not modified.
    pub fn preprocess(&self, image: &RgbImage) -> Result<(PreparedFace, CropGeometry)> {
        let faces = self
            .locator
            .locate(image)
            .map_err(|e| Error::Model(format!("face detection failed: {e:#}")))?;

        let face = select_face(&faces).ok_or(Error::NoFaceDetected)?;
        debug!(
            "Selected face ({:.1}, {:.1})-({:.1}, {:.1}) conf {:.3} of {} candidates",
            face.x1, face.y1, face.x2, face.y2, face.confidence, faces.len()
        );

        let geometry = self.crop_geometry(face, image.dimensions())?;
        let crop = warp_affine(image, geometry.to_original(), self.crop_size, self.crop_size);

        let parsed = self
            .parser
            .parse(&crop)
            .map_err(|e| Error::Model(format!("face parsing failed: {e:#}")))?;
        if parsed.is_empty() {
            return Err(Error::Model("face parsing returned an empty mask".into()));
        }
        let mut mask = parsed.resize(self.crop_size, self.crop_size);
        mask.derive_eyeshadow();

        Ok((PreparedFace::new(crop, mask)?, geometry))
    }

    /// Square window around the face box, extended by the configured ratios
    fn crop_geometry(&self, face: &FaceBox, image_size: (u32, u32)) -> Result<CropGeometry> {
        let w = face.x2 - face.x1;
        let h = face.y2 - face.y1;

        let left = face.x1 - self.config.width_ratio * w;
        let right = face.x2 + self.config.width_ratio * w;
        let top = face.y1 - self.config.up_ratio * h;
        let bottom = face.y2 + self.config.down_ratio * h;

        let side = (right - left).max(bottom - top);
        let cx = (left + right) / 2.0;
        let cy = (top + bottom) / 2.0;

        CropGeometry::from_square(cx - side / 2.0, cy - side / 2.0, side, self.crop_size, image_size)
    }
}

/// Highest-confidence box with a positive area; the first wins ties
fn select_face(faces: &[FaceBox]) -> Option<&FaceBox> {
    faces
        .iter()
        .filter(|f| f.x2 > f.x1 && f.y2 > f.y1 && f.confidence.is_finite())
        .fold(None, |best: Option<&FaceBox>, f| match best {
            Some(b) if b.confidence >= f.confidence => Some(b),
            _ => Some(f),
        })
}

/// Preprocess image for detection model
/// Resizes to 640x640 with padding and normalizes to [-1, 1]
pub fn preprocess_for_detection(image: &RgbImage) -> Array4<f32> {
    let (target_w, target_h) = DETECTOR_INPUT_SIZE;
    let resized = resize_with_padding(image, target_w, target_h);
    image_to_nchw(&resized, Channels::Bgr, |v| (v - 127.5) / 128.0)
}

/// Resize image with padding to maintain aspect ratio
fn resize_with_padding(image: &RgbImage, target_w: u32, target_h: u32) -> RgbImage {
    let info = ResizeInfo::new(image.dimensions(), (target_w, target_h));
    let new_w = ((info.original_width as f32 * info.scale) as u32).max(1);
    let new_h = ((info.original_height as f32 * info.scale) as u32).max(1);

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut padded = ImageBuffer::from_pixel(target_w, target_h, Rgb([0u8, 0, 0]));
    image::imageops::replace(&mut padded, &resized, info.offset_x as i64, info.offset_y as i64);
    padded
}

/// Channel order expected by a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    Rgb,
    Bgr,
}

/// Convert image to NCHW tensor, applying `normalize` to each 0-255 value
pub fn image_to_nchw(image: &RgbImage, order: Channels, normalize: impl Fn(f32) -> f32) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let src = match order {
                Channels::Rgb => c,
                Channels::Bgr => 2 - c,
            };
            tensor[[0, c, y, x]] = normalize(pixel[src] as f32);
        }
    }

    tensor
}

/// Inverse of `image_to_nchw` for an RGB tensor in [-1, 1]
pub fn nchw_to_image(tensor: &Array4<f32>) -> Result<RgbImage> {
    let shape = tensor.shape();
    if shape[0] < 1 || shape[1] != 3 {
        return Err(Error::TransferFailed(format!(
            "unsupported output shape {:?}",
            shape
        )));
    }
    let (height, width) = (shape[2], shape[3]);
    let mut image = RgbImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let mut px = [0u8; 3];
            for c in 0..3 {
                let v = tensor[[0, c, y, x]];
                if !v.is_finite() {
                    return Err(Error::TransferFailed("generator produced non-finite values".into()));
                }
                px[c] = ((v + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8;
            }
            image.put_pixel(x as u32, y as u32, Rgb(px));
        }
    }
    Ok(image)
}

/// Decode image from bytes with EXIF orientation handling, normalized to RGB
pub fn decode_image(data: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(data).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(apply_exif_orientation(data, image).to_rgb8())
}

/// Apply EXIF orientation to correct image rotation
/// Mobile phones often store images with EXIF orientation tags instead of rotating pixels
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1) as u8,
        Err(_) => 1,
    };

    // See: https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Letterbox parameters for detection post-processing
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;

        let scale = f32::min(
            target_w as f32 / orig_w as f32,
            target_h as f32 / orig_h as f32,
        );

        let new_w = ((orig_w as f32 * scale) as u32).clamp(1, target_w);
        let new_h = ((orig_h as f32 * scale) as u32).clamp(1, target_h);

        Self {
            scale,
            offset_x: (target_w - new_w) / 2,
            offset_y: (target_h - new_h) / 2,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    /// Convert detection coordinates back to original image space
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.offset_x as f32) / self.scale;
        let y = (y - self.offset_y as f32) / self.scale;
        (x, y)
    }
}

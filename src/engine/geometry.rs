//! Crop geometry and affine warping
//!
//! The preprocessor records how a face was cut out of the full image as an
//! explicit affine map plus its inverse, so the compositor can paste the
//! result back without recomputing anything.

use image::{ImageBuffer, Rgb, RgbImage};

use crate::error::{Error, Result};

/// 2x3 affine transform `[a b c; d e f]` mapping `(x, y)` to
/// `(a*x + b*y + c, d*x + e*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    m: [[f32; 3]; 2],
}

impl AffineTransform {
    pub fn new(m: [[f32; 3]; 2]) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        Self::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    /// `p' = (p - offset) * scale`
    pub fn scale_translate(scale: f32, offset_x: f32, offset_y: f32) -> Self {
        Self::new([
            [scale, 0.0, -offset_x * scale],
            [0.0, scale, -offset_y * scale],
        ])
    }

    pub fn matrix(&self) -> [[f32; 3]; 2] {
        self.m
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.m;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    /// Inverse transform, `None` when the linear part is singular
    pub fn invert(&self) -> Option<Self> {
        let [[a, b, c], [d, e, f]] = self.m;
        let det = a * e - b * d;
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        Some(Self::new([
            [e / det, -b / det, (b * f - c * e) / det],
            [-d / det, a / det, (c * d - a * f) / det],
        ]))
    }
}

/// Integer pixel rectangle in full-image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// How a face crop was extracted from its source image
#[derive(Debug, Clone, PartialEq)]
pub struct CropGeometry {
    bounds: CropRect,
    to_crop: AffineTransform,
    to_original: AffineTransform,
    crop_size: u32,
    image_size: (u32, u32),
}

impl CropGeometry {
    /// Geometry for a square window `side` pixels wide at `(left, top)`,
    /// resampled to `crop_size` x `crop_size`. The window may extend past
    /// the image; `bounds` is its part that lies inside.
    pub fn from_square(
        left: f32,
        top: f32,
        side: f32,
        crop_size: u32,
        image_size: (u32, u32),
    ) -> Result<Self> {
        if !(side.is_finite() && side > 0.0) || crop_size == 0 {
            return Err(Error::NoFaceDetected);
        }
        let (img_w, img_h) = image_size;

        let x0 = left.max(0.0).floor();
        let y0 = top.max(0.0).floor();
        let x1 = (left + side).min(img_w as f32).ceil();
        let y1 = (top + side).min(img_h as f32).ceil();
        if x1 <= x0 || y1 <= y0 {
            return Err(Error::NoFaceDetected);
        }

        let bounds = CropRect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        };

        let to_crop = AffineTransform::scale_translate(crop_size as f32 / side, left, top);
        let to_original = to_crop.invert().ok_or(Error::NoFaceDetected)?;

        Ok(Self {
            bounds,
            to_crop,
            to_original,
            crop_size,
            image_size,
        })
    }

    pub fn bounds(&self) -> CropRect {
        self.bounds
    }

    /// Original image coordinates to crop coordinates
    pub fn to_crop(&self) -> &AffineTransform {
        &self.to_crop
    }

    /// Crop coordinates to original image coordinates
    pub fn to_original(&self) -> &AffineTransform {
        &self.to_original
    }

    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    pub fn image_size(&self) -> (u32, u32) {
        self.image_size
    }
}

/// Bilinear sample at continuous pixel-centre coordinates.
/// Returns `None` outside the image; within half a pixel of the border the
/// edge value is used.
pub fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Option<[f32; 3]> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    if x < -0.5 || y < -0.5 || x >= w as f32 - 0.5 || y >= h as f32 - 0.5 {
        return None;
    }
    Some(sample_clamped(image, x, y))
}

/// Bilinear sample with edge clamping
pub fn sample_clamped(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = image.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0);
    let p01 = image.get_pixel(x0, y1);
    let p10 = image.get_pixel(x1, y0);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
    }
    out
}

/// Backward-map warp: every output pixel centre is sent through
/// `to_source` and sampled bilinearly. Samples that fall outside the
/// source stay black.
pub fn warp_affine(
    image: &RgbImage,
    to_source: &AffineTransform,
    out_width: u32,
    out_height: u32,
) -> RgbImage {
    let mut output = ImageBuffer::from_pixel(out_width, out_height, Rgb([0u8, 0, 0]));

    for y in 0..out_height {
        for x in 0..out_width {
            let (sx, sy) = to_source.apply(x as f32 + 0.5, y as f32 + 0.5);
            if let Some(value) = sample_bilinear(image, sx - 0.5, sy - 0.5) {
                output.put_pixel(x, y, Rgb(to_rgb8(value)));
            }
        }
    }

    output
}

pub(crate) fn to_rgb8(value: [f32; 3]) -> [u8; 3] {
    [
        value[0].round().clamp(0.0, 255.0) as u8,
        value[1].round().clamp(0.0, 255.0) as u8,
        value[2].round().clamp(0.0, 255.0) as u8,
    ]
}

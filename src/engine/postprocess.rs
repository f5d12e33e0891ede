//! Postprocessing
//!
//! Pastes a transferred crop back into the full-resolution source and
//! blends whole-image results by intensity.

use image::{Rgb, RgbImage};

use crate::error::{Error, Result};

use super::geometry::{sample_clamped, to_rgb8, warp_affine, CropGeometry};
use super::transfer::TransferResult;

/// Maps transfer results back into original image space
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    detail_restore: bool,
}

impl Default for Compositor {
    fn default() -> Self {
        Self { detail_restore: true }
    }
}

impl Compositor {
    pub fn new(detail_restore: bool) -> Self {
        Self { detail_restore }
    }

    /// Paste `result` into a copy of `original` inside `crop.bounds()`.
    ///
    /// Pixels outside the bounds are copied unchanged. With detail restore
    /// on, the original's high-frequency residual (what the downsampled crop
    /// lost) is added back, so face areas the transfer left untouched come
    /// out identical to the original.
    pub fn composite(&self, original: &RgbImage, crop: &CropGeometry, result: &TransferResult) -> Result<RgbImage> {
        if original.dimensions() != crop.image_size() {
            return Err(Error::dimensions(crop.image_size(), original.dimensions()));
        }
        let n = crop.crop_size();
        if result.image.dimensions() != (n, n) {
            return Err(Error::dimensions((n, n), result.image.dimensions()));
        }

        let low = self
            .detail_restore
            .then(|| warp_affine(original, crop.to_original(), n, n));

        let mut output = original.clone();
        let bounds = crop.bounds();
        for y in bounds.y..bounds.y + bounds.height {
            for x in bounds.x..bounds.x + bounds.width {
                let (cx, cy) = crop.to_crop().apply(x as f32 + 0.5, y as f32 + 0.5);
                let styled = sample_clamped(&result.image, cx - 0.5, cy - 0.5);

                let value = match &low {
                    Some(low) => {
                        let base = sample_clamped(low, cx - 0.5, cy - 0.5);
                        let orig = original.get_pixel(x, y);
                        let mut v = [0.0f32; 3];
                        for c in 0..3 {
                            v[c] = orig[c] as f32 + (styled[c] - base[c]);
                        }
                        v
                    }
                    None => styled,
                };
                output.put_pixel(x, y, Rgb(to_rgb8(value)));
            }
        }

        Ok(output)
    }
}

/// Paste with detail restore enabled
pub fn composite(original: &RgbImage, crop: &CropGeometry, result: &TransferResult) -> Result<RgbImage> {
    Compositor::default().composite(original, crop, result)
}

/// Per-pixel linear interpolation from `source` (0) to `raw` (1).
/// `intensity` is clamped to [0, 1].
pub fn blend(source: &RgbImage, raw: &RgbImage, intensity: f32) -> Result<RgbImage> {
    if source.dimensions() != raw.dimensions() {
        return Err(Error::dimensions(source.dimensions(), raw.dimensions()));
    }
    if !intensity.is_finite() {
        return Err(Error::InvalidIntensity(intensity));
    }
    let t = intensity.clamp(0.0, 1.0);

    let mut output = source.clone();
    for (out, styled) in output.pixels_mut().zip(raw.pixels()) {
        let mut v = [0.0f32; 3];
        for c in 0..3 {
            let s = out[c] as f32;
            v[c] = s + t * (styled[c] as f32 - s);
        }
        *out = Rgb(to_rgb8(v));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::geometry::CropRect;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8]))
    }

    fn result(n: u32, color: [u8; 3]) -> TransferResult {
        TransferResult {
            image: RgbImage::from_pixel(n, n, Rgb(color)),
            restyled: Vec::new(),
        }
    }

    #[test]
    fn test_background_untouched() {
        let original = gradient(80, 60);
        let crop = CropGeometry::from_square(20.0, 10.0, 30.0, 32, (80, 60)).unwrap();
        let out = composite(&original, &crop, &result(32, [255, 0, 255])).unwrap();

        assert_eq!(out.dimensions(), original.dimensions());
        let bounds = crop.bounds();
        assert_eq!(bounds, CropRect { x: 20, y: 10, width: 30, height: 30 });
        for (x, y, px) in out.enumerate_pixels() {
            if !bounds.contains(x, y) {
                assert_eq!(px, original.get_pixel(x, y), "pixel ({x}, {y}) changed");
            }
        }
        assert_ne!(out.get_pixel(35, 25), original.get_pixel(35, 25));
    }

    #[test]
    fn test_window_past_image_edge() {
        let original = gradient(40, 40);

        // covers the whole frame once clipped
        let crop = CropGeometry::from_square(-10.0, -5.0, 60.0, 32, (40, 40)).unwrap();
        assert_eq!(crop.bounds(), CropRect { x: 0, y: 0, width: 40, height: 40 });
        let out = composite(&original, &crop, &result(32, [255, 0, 255])).unwrap();
        assert_eq!(out.dimensions(), (40, 40));
        for (x, y, px) in out.enumerate_pixels() {
            if !crop.bounds().contains(x, y) {
                assert_eq!(px, original.get_pixel(x, y), "pixel ({x}, {y}) changed");
            }
        }

        // hangs off the top-left corner only
        let crop = CropGeometry::from_square(-10.0, -5.0, 30.0, 32, (40, 40)).unwrap();
        let bounds = crop.bounds();
        assert_eq!(bounds, CropRect { x: 0, y: 0, width: 20, height: 25 });
        let out = composite(&original, &crop, &result(32, [255, 0, 255])).unwrap();
        for (x, y, px) in out.enumerate_pixels() {
            if !bounds.contains(x, y) {
                assert_eq!(px, original.get_pixel(x, y), "pixel ({x}, {y}) changed");
            }
        }
        assert_ne!(out.get_pixel(5, 5), original.get_pixel(5, 5));
    }

    #[test]
    fn test_unchanged_crop_past_edge_roundtrips() {
        let original = gradient(40, 40);
        let crop = CropGeometry::from_square(-10.0, -5.0, 30.0, 32, (40, 40)).unwrap();
        // black where the window leaves the image
        let source_crop = warp_affine(&original, crop.to_original(), 32, 32);
        assert_eq!(source_crop.get_pixel(0, 0).0, [0, 0, 0]);
        let unchanged = TransferResult { image: source_crop, restyled: Vec::new() };
        assert_eq!(composite(&original, &crop, &unchanged).unwrap(), original);
    }

    #[test]
    fn test_without_detail_restore_pastes_result() {
        let original = gradient(40, 40);
        let crop = CropGeometry::from_square(10.0, 10.0, 16.0, 16, (40, 40)).unwrap();
        let out = Compositor::new(false)
            .composite(&original, &crop, &result(16, [7, 8, 9]))
            .unwrap();
        for y in 10..26 {
            for x in 10..26 {
                assert_eq!(out.get_pixel(x, y).0, [7, 8, 9]);
            }
        }
        assert_eq!(out.get_pixel(9, 9), original.get_pixel(9, 9));
    }

    #[test]
    fn test_unchanged_crop_roundtrips_exactly() {
        let original = gradient(64, 64);
        let crop = CropGeometry::from_square(8.0, 4.0, 48.0, 24, (64, 64)).unwrap();
        let source_crop = warp_affine(&original, crop.to_original(), 24, 24);
        let unchanged = TransferResult { image: source_crop, restyled: Vec::new() };
        let out = composite(&original, &crop, &unchanged).unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn test_composite_size_checks() {
        let original = gradient(40, 40);
        let crop = CropGeometry::from_square(0.0, 0.0, 20.0, 16, (40, 40)).unwrap();
        assert!(matches!(
            composite(&original, &crop, &result(8, [0, 0, 0])),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            composite(&gradient(41, 40), &crop, &result(16, [0, 0, 0])),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_blend_endpoints() {
        let source = gradient(10, 10);
        let raw = RgbImage::from_fn(10, 10, |x, y| Rgb([255 - x as u8, 100, (y * 20) as u8]));
        assert_eq!(blend(&source, &raw, 0.0).unwrap(), source);
        assert_eq!(blend(&source, &raw, 1.0).unwrap(), raw);
        assert_eq!(blend(&source, &raw, -3.0).unwrap(), source);
        assert_eq!(blend(&source, &raw, 9.0).unwrap(), raw);
    }

    #[test]
    fn test_blend_monotonic() {
        let source = RgbImage::from_pixel(1, 1, Rgb([10, 200, 50]));
        let raw = RgbImage::from_pixel(1, 1, Rgb([250, 0, 50]));
        let mut previous = source.get_pixel(0, 0).0;
        for step in 1..=10 {
            let px = blend(&source, &raw, step as f32 / 10.0).unwrap().get_pixel(0, 0).0;
            assert!(px[0] >= previous[0]);
            assert!(px[1] <= previous[1]);
            assert_eq!(px[2], 50);
            previous = px;
        }
    }

    #[test]
    fn test_blend_size_mismatch() {
        let err = blend(&gradient(4, 4), &gradient(4, 5), 0.5).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}

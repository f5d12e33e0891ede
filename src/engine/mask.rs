//! Semantic face regions
//!
//! A `RegionMask` labels every pixel of a face crop with one of a fixed set
//! of regions. Reference samples use a `RegionSelector` to say which of
//! those regions they are allowed to restyle.

use std::fmt;
use std::str::FromStr;

use image::RgbImage;
use ndarray::Array4;

use crate::error::{Error, Result};

/// Closed set of region labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RegionLabel {
    Background = 0,
    Skin = 1,
    Brows = 2,
    Eyes = 3,
    Eyeshadow = 4,
    Lips = 5,
}

impl RegionLabel {
    pub const COUNT: usize = 6;

    pub const ALL: [RegionLabel; Self::COUNT] = [
        RegionLabel::Background,
        RegionLabel::Skin,
        RegionLabel::Brows,
        RegionLabel::Eyes,
        RegionLabel::Eyeshadow,
        RegionLabel::Lips,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionLabel::Background => "background",
            RegionLabel::Skin => "skin",
            RegionLabel::Brows => "brows",
            RegionLabel::Eyes => "eyes",
            RegionLabel::Eyeshadow => "eyeshadow",
            RegionLabel::Lips => "lips",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Per-pixel label map over a face crop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    width: u32,
    height: u32,
    labels: Vec<RegionLabel>,
}

impl RegionMask {
    /// Build a mask from row-major labels
    pub fn new(width: u32, height: u32, labels: Vec<RegionLabel>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if labels.len() != expected {
            return Err(Error::DimensionMismatch {
                expected: format!("{} labels", expected),
                actual: format!("{} labels", labels.len()),
            });
        }
        Ok(Self { width, height, labels })
    }

    /// Mask with every pixel set to `label`
    pub fn filled(width: u32, height: u32, label: RegionLabel) -> Self {
        Self {
            width,
            height,
            labels: vec![label; width as usize * height as usize],
        }
    }

    /// Build a mask by evaluating `f` at every pixel
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> RegionLabel) -> Self {
        let mut labels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                labels.push(f(x, y));
            }
        }
        Self { width, height, labels }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn labels(&self) -> &[RegionLabel] {
        &self.labels
    }

    pub fn get(&self, x: u32, y: u32) -> RegionLabel {
        self.labels[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, label: RegionLabel) {
        let idx = (y * self.width + x) as usize;
        self.labels[idx] = label;
    }

    pub fn count(&self, label: RegionLabel) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    /// True when the mask has no pixels
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: RegionLabel) -> bool {
        self.labels.contains(&label)
    }

    /// Nearest-neighbour resize, labels are never interpolated.
    /// An empty mask resizes to all `Background`.
    pub fn resize(&self, width: u32, height: u32) -> RegionMask {
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        if self.is_empty() {
            return RegionMask::filled(width, height, RegionLabel::Background);
        }
        RegionMask::from_fn(width, height, |x, y| {
            let sx = ((x as u64 * self.width as u64) / width as u64) as u32;
            let sy = ((y as u64 * self.height as u64) / height as u64) as u32;
            self.get(sx.min(self.width - 1), sy.min(self.height - 1))
        })
    }

    /// Whether the mask has the same size as `image`
    pub fn matches(&self, image: &RgbImage) -> bool {
        self.dimensions() == image.dimensions()
    }

    /// One-hot NCHW tensor, one channel per label
    pub fn to_one_hot(&self) -> Array4<f32> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut tensor = Array4::<f32>::zeros((1, RegionLabel::COUNT, h, w));
        for y in 0..h {
            for x in 0..w {
                let label = self.labels[y * w + x];
                tensor[[0, label.index(), y, x]] = 1.0;
            }
        }
        tensor
    }

    /// Relabel `Skin` around each eye as `Eyeshadow`.
    ///
    /// Eyes in the left and right halves are handled separately. The search
    /// window is the eye's bounding box widened by half its width on each
    /// side, raised by 1.5x its height and lowered by half its height.
    pub fn derive_eyeshadow(&mut self) {
        let mid = self.width / 2;
        for (lo, hi) in [(0, mid), (mid, self.width)] {
            let Some((x0, y0, x1, y1)) = self.bounds_of(RegionLabel::Eyes, lo, hi) else {
                continue;
            };
            let w = (x1 - x0 + 1) as f32;
            let h = (y1 - y0 + 1) as f32;
            let left = (x0 as f32 - 0.5 * w).max(0.0) as u32;
            let right = ((x1 as f32 + 0.5 * w) as u32).min(self.width - 1);
            let top = (y0 as f32 - 1.5 * h).max(0.0) as u32;
            let bottom = ((y1 as f32 + 0.5 * h) as u32).min(self.height - 1);

            for y in top..=bottom {
                for x in left..=right {
                    if self.get(x, y) == RegionLabel::Skin {
                        self.set(x, y, RegionLabel::Eyeshadow);
                    }
                }
            }
        }
    }

    /// Inclusive bounding box of `label` restricted to columns `[lo, hi)`
    fn bounds_of(&self, label: RegionLabel, lo: u32, hi: u32) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for y in 0..self.height {
            for x in lo..hi {
                if self.get(x, y) != label {
                    continue;
                }
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        bounds
    }
}

/// Which regions a reference style may influence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionSelector {
    Lips,
    Eyeshadow,
    Skin,
    All,
}

impl RegionSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionSelector::Lips => "lips",
            RegionSelector::Eyeshadow => "eyeshadow",
            RegionSelector::Skin => "skin",
            RegionSelector::All => "all",
        }
    }

    /// Labels covered by this selector
    pub fn labels(&self) -> &'static [RegionLabel] {
        match self {
            RegionSelector::Lips => &[RegionLabel::Lips],
            RegionSelector::Eyeshadow => &[RegionLabel::Eyeshadow],
            RegionSelector::Skin => &[RegionLabel::Skin],
            RegionSelector::All => &[
                RegionLabel::Skin,
                RegionLabel::Brows,
                RegionLabel::Eyes,
                RegionLabel::Eyeshadow,
                RegionLabel::Lips,
            ],
        }
    }

    pub fn covers(&self, label: RegionLabel) -> bool {
        self.labels().contains(&label)
    }

    /// Named selectors outrank `All` when both claim a region
    pub fn is_specific(&self) -> bool {
        !matches!(self, RegionSelector::All)
    }
}

impl FromStr for RegionSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lips" => Ok(RegionSelector::Lips),
            "eyeshadow" => Ok(RegionSelector::Eyeshadow),
            "skin" => Ok(RegionSelector::Skin),
            "all" => Ok(RegionSelector::All),
            _ => Err(Error::InvalidRegionSelector(s.to_string())),
        }
    }
}

impl fmt::Display for RegionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_length_checked() {
        assert!(RegionMask::new(2, 2, vec![RegionLabel::Skin; 4]).is_ok());
        let err = RegionMask::new(2, 2, vec![RegionLabel::Skin; 3]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!("lips".parse::<RegionSelector>().unwrap(), RegionSelector::Lips);
        assert_eq!(" Eyeshadow ".parse::<RegionSelector>().unwrap(), RegionSelector::Eyeshadow);
        assert_eq!("ALL".parse::<RegionSelector>().unwrap(), RegionSelector::All);
        assert_eq!(
            "eyebrows".parse::<RegionSelector>().unwrap_err(),
            Error::InvalidRegionSelector("eyebrows".to_string())
        );
        assert!("".parse::<RegionSelector>().is_err());
    }

    #[test]
    fn test_all_excludes_background() {
        assert!(!RegionSelector::All.covers(RegionLabel::Background));
        assert!(RegionSelector::All.covers(RegionLabel::Lips));
        assert!(!RegionSelector::Lips.covers(RegionLabel::Skin));
        assert!(!RegionSelector::All.is_specific());
    }

    #[test]
    fn test_resize_nearest() {
        let mask = RegionMask::from_fn(2, 2, |x, _| {
            if x == 0 { RegionLabel::Skin } else { RegionLabel::Lips }
        });
        let big = mask.resize(4, 4);
        assert_eq!(big.dimensions(), (4, 4));
        assert_eq!(big.get(1, 3), RegionLabel::Skin);
        assert_eq!(big.get(2, 0), RegionLabel::Lips);
        assert_eq!(big.count(RegionLabel::Lips), 8);
    }

    #[test]
    fn test_resize_empty_mask() {
        let empty = RegionMask::filled(0, 0, RegionLabel::Skin);
        assert!(empty.is_empty());
        let grown = empty.resize(3, 2);
        assert_eq!(grown.dimensions(), (3, 2));
        assert_eq!(grown.count(RegionLabel::Background), 6);
    }

    #[test]
    fn test_one_hot() {
        let mask = RegionMask::filled(3, 2, RegionLabel::Eyes);
        let t = mask.to_one_hot();
        assert_eq!(t.shape(), &[1, 6, 2, 3]);
        assert_eq!(t[[0, RegionLabel::Eyes.index(), 1, 2]], 1.0);
        assert_eq!(t.sum(), 6.0);
    }

    #[test]
    fn test_derive_eyeshadow() {
        // 20x20 skin with one 2x2 eye in each half
        let mut mask = RegionMask::from_fn(20, 20, |x, y| {
            let left_eye = (4..6).contains(&x) && (10..12).contains(&y);
            let right_eye = (14..16).contains(&x) && (10..12).contains(&y);
            if left_eye || right_eye {
                RegionLabel::Eyes
            } else {
                RegionLabel::Skin
            }
        });
        mask.derive_eyeshadow();

        // directly above the left eye
        assert_eq!(mask.get(4, 8), RegionLabel::Eyeshadow);
        // eyes keep their label
        assert_eq!(mask.get(14, 10), RegionLabel::Eyes);
        // far below stays skin
        assert_eq!(mask.get(4, 18), RegionLabel::Skin);
        // between the eyes stays skin
        assert_eq!(mask.get(10, 10), RegionLabel::Skin);
        assert!(mask.count(RegionLabel::Eyeshadow) > 0);
    }

    #[test]
    fn test_derive_eyeshadow_without_eyes() {
        let mut mask = RegionMask::filled(8, 8, RegionLabel::Skin);
        mask.derive_eyeshadow();
        assert_eq!(mask.count(RegionLabel::Eyeshadow), 0);
    }
}

//! Transfer Engine
//!
//! Combines one source sample with an ordered list of reference samples.
//! Each region of the source face is owned by at most one reference:
//! a reference naming the region specifically beats an `all` reference,
//! and within each group the later reference wins. The owner's styled
//! pixels are mixed into the source by its intensity.

use std::sync::Arc;
use std::time::Instant;

use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

use super::encoder::{ReferenceSample, SourceSample};
use super::geometry::to_rgb8;
use super::mask::RegionLabel;

/// The generative model: renders the source face fully in the style of
/// the reference, at its native resolution.
pub trait StyleGenerator: Send + Sync {
    /// Side length of the square images the generator consumes and produces
    fn native_size(&self) -> u32;

    fn stylize(&self, source: &SourceSample, reference: &ReferenceSample) -> anyhow::Result<RgbImage>;
}

/// Transferred face crop at the generator's native resolution
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    pub image: RgbImage,
    /// Regions that received a style, in label order
    pub restyled: Vec<RegionLabel>,
}

/// Serializes generator calls and composes their outputs per region
pub struct TransferEngine {
    generator: Arc<dyn StyleGenerator>,
    // the generator is not safe for concurrent forward passes
    lock: Mutex<()>,
}

impl TransferEngine {
    pub fn new(generator: Arc<dyn StyleGenerator>) -> Self {
        Self {
            generator,
            lock: Mutex::new(()),
        }
    }

    pub fn native_size(&self) -> u32 {
        self.generator.native_size()
    }

    /// Apply `references` to `source`
    pub fn transfer(&self, source: &SourceSample, references: &[ReferenceSample]) -> Result<TransferResult> {
        if references.is_empty() {
            return Err(Error::TransferFailed("at least one reference sample is required".into()));
        }

        let size = self.native_size();
        let source_face = source.face();
        if source_face.size() != size || source_face.image().height() != size {
            return Err(Error::TransferFailed(format!(
                "source is {}x{}, generator expects {size}x{size}",
                source_face.image().width(),
                source_face.image().height()
            )));
        }
        for (i, reference) in references.iter().enumerate() {
            if reference.face().image().dimensions() != (size, size) {
                return Err(Error::TransferFailed(format!(
                    "reference {i} is {}x{}, generator expects {size}x{size}",
                    reference.face().image().width(),
                    reference.face().image().height()
                )));
            }
            if reference.target_mask() != source_face.mask() {
                return Err(Error::TransferFailed(format!(
                    "reference {i} was encoded against a different source mask"
                )));
            }
        }

        let owners = resolve_owners(references);
        let mask = source_face.mask();
        let mut output = source_face.image().clone();
        let mut restyled = Vec::new();

        for (idx, reference) in references.iter().enumerate() {
            let owned: Vec<RegionLabel> = RegionLabel::ALL
                .iter()
                .copied()
                .filter(|l| owners[l.index()] == Some(idx) && mask.contains(*l))
                .collect();
            if owned.is_empty() || reference.intensity() == 0.0 {
                debug!("Reference {} owns no visible region, skipping generator", idx);
                continue;
            }

            let start = Instant::now();
            let styled = {
                let _guard = self.lock.lock();
                self.generator.stylize(source, reference)
            }
            .map_err(|e| Error::TransferFailed(format!("{e:#}")))?;
            debug!("Generator pass for reference {} took {:?}", idx, start.elapsed());

            if styled.dimensions() != (size, size) {
                return Err(Error::TransferFailed(format!(
                    "generator returned {}x{}, expected {size}x{size}",
                    styled.width(),
                    styled.height()
                )));
            }

            let k = reference.intensity();
            for (x, y, pixel) in output.enumerate_pixels_mut() {
                if owners[mask.get(x, y).index()] != Some(idx) {
                    continue;
                }
                let style = styled.get_pixel(x, y);
                *pixel = Rgb(mix(pixel.0, style.0, k));
            }
            restyled.extend(owned);
        }

        restyled.sort();
        Ok(TransferResult { image: output, restyled })
    }
}

/// Owning reference index per label
fn resolve_owners(references: &[ReferenceSample]) -> [Option<usize>; RegionLabel::COUNT] {
    let mut specific = [None; RegionLabel::COUNT];
    let mut general = [None; RegionLabel::COUNT];

    for (i, reference) in references.iter().enumerate() {
        let selector = reference.selector();
        let slots = if selector.is_specific() { &mut specific } else { &mut general };
        for label in selector.labels() {
            slots[label.index()] = Some(i);
        }
    }

    let mut owners = [None; RegionLabel::COUNT];
    for i in 0..owners.len() {
        owners[i] = specific[i].or(general[i]);
    }
    owners
}

/// `src + k * (style - src)`, rounded and clamped
fn mix(src: [u8; 3], style: [u8; 3], k: f32) -> [u8; 3] {
    let mut v = [0.0f32; 3];
    for c in 0..3 {
        let s = src[c] as f32;
        v[c] = s + k * (style[c] as f32 - s);
    }
    to_rgb8(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::encoder::{encode_reference, encode_source};
    use crate::engine::mask::RegionMask;
    use crate::engine::preprocess::PreparedFace;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const N: u32 = 8;

    /// Returns the reference crop as the styled output
    struct CopyReference {
        calls: AtomicUsize,
    }

    impl StyleGenerator for CopyReference {
        fn native_size(&self) -> u32 {
            N
        }

        fn stylize(&self, _source: &SourceSample, reference: &ReferenceSample) -> anyhow::Result<RgbImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(reference.face().image().clone())
        }
    }

    fn engine() -> (TransferEngine, Arc<CopyReference>) {
        let generator = Arc::new(CopyReference { calls: AtomicUsize::new(0) });
        (TransferEngine::new(generator.clone()), generator)
    }

    /// Top rows skin, bottom two rows lips, left column background
    fn face_mask() -> RegionMask {
        RegionMask::from_fn(N, N, |x, y| {
            if x == 0 {
                RegionLabel::Background
            } else if y >= N - 2 {
                RegionLabel::Lips
            } else {
                RegionLabel::Skin
            }
        })
    }

    fn face(color: [u8; 3]) -> PreparedFace {
        PreparedFace::new(RgbImage::from_pixel(N, N, Rgb(color)), face_mask()).unwrap()
    }

    #[test]
    fn test_requires_reference() {
        let (engine, _) = engine();
        let source = encode_source(&face([10, 10, 10]));
        assert!(matches!(engine.transfer(&source, &[]), Err(Error::TransferFailed(_))));
    }

    #[test]
    fn test_region_restricted() {
        let (engine, _) = engine();
        let src = face([100, 100, 100]);
        let source = encode_source(&src);
        let reference = encode_reference(&face([200, 0, 0]), &src.mask, "lips", 1.0).unwrap();

        let result = engine.transfer(&source, &[reference]).unwrap();
        assert_eq!(result.image.get_pixel(3, N - 1).0, [200, 0, 0]);
        assert_eq!(result.image.get_pixel(3, 0).0, [100, 100, 100]);
        assert_eq!(result.image.get_pixel(0, N - 1).0, [100, 100, 100]);
        assert_eq!(result.restyled, vec![RegionLabel::Lips]);
    }

    #[test]
    fn test_zero_intensity_is_identity() {
        let (engine, generator) = engine();
        let src = face([40, 50, 60]);
        let source = encode_source(&src);
        let reference = encode_reference(&face([250, 250, 250]), &src.mask, "all", 0.0).unwrap();

        let result = engine.transfer(&source, &[reference]).unwrap();
        assert_eq!(&result.image, source.face().image());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_half_and_amplified_intensity() {
        let (engine, _) = engine();
        let src = face([100, 100, 100]);
        let source = encode_source(&src);

        let half = encode_reference(&face([200, 100, 0]), &src.mask, "skin", 0.5).unwrap();
        let result = engine.transfer(&source, &[half]).unwrap();
        assert_eq!(result.image.get_pixel(2, 2).0, [150, 100, 50]);

        let double = encode_reference(&face([150, 100, 60]), &src.mask, "skin", 2.0).unwrap();
        let result = engine.transfer(&source, &[double]).unwrap();
        assert_eq!(result.image.get_pixel(2, 2).0, [200, 100, 20]);
    }

    #[test]
    fn test_last_reference_wins() {
        let (engine, _) = engine();
        let src = face([0, 0, 0]);
        let source = encode_source(&src);
        let red = encode_reference(&face([255, 0, 0]), &src.mask, "lips", 1.0).unwrap();
        let blue = encode_reference(&face([0, 0, 255]), &src.mask, "lips", 1.0).unwrap();

        let result = engine.transfer(&source, &[red.clone(), blue.clone()]).unwrap();
        assert_eq!(result.image.get_pixel(4, N - 1).0, [0, 0, 255]);

        let result = engine.transfer(&source, &[blue, red]).unwrap();
        assert_eq!(result.image.get_pixel(4, N - 1).0, [255, 0, 0]);
    }

    #[test]
    fn test_specific_beats_all() {
        let (engine, generator) = engine();
        let src = face([0, 0, 0]);
        let source = encode_source(&src);
        let lips = encode_reference(&face([255, 0, 0]), &src.mask, "lips", 1.0).unwrap();
        let all = encode_reference(&face([0, 255, 0]), &src.mask, "all", 1.0).unwrap();

        let result = engine.transfer(&source, &[lips, all]).unwrap();
        assert_eq!(result.image.get_pixel(4, N - 1).0, [255, 0, 0]);
        assert_eq!(result.image.get_pixel(4, 1).0, [0, 255, 0]);
        assert_eq!(result.image.get_pixel(0, 1).0, [0, 0, 0]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unclaimed_reference_not_generated() {
        let (engine, generator) = engine();
        let src = face([0, 0, 0]);
        let source = encode_source(&src);
        // no eyeshadow pixels in this mask
        let shadow = encode_reference(&face([9, 9, 9]), &src.mask, "eyeshadow", 1.0).unwrap();
        let result = engine.transfer(&source, &[shadow]).unwrap();
        assert_eq!(&result.image, source.face().image());
        assert!(result.restyled.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_foreign_mask_rejected() {
        let (engine, _) = engine();
        let src = face([0, 0, 0]);
        let source = encode_source(&src);
        let other = RegionMask::filled(N, N, RegionLabel::Skin);
        let reference = encode_reference(&face([1, 1, 1]), &other, "all", 1.0).unwrap();
        assert!(matches!(engine.transfer(&source, &[reference]), Err(Error::TransferFailed(_))));
    }

    struct Failing;

    impl StyleGenerator for Failing {
        fn native_size(&self) -> u32 {
            N
        }

        fn stylize(&self, _: &SourceSample, _: &ReferenceSample) -> anyhow::Result<RgbImage> {
            anyhow::bail!("numerical divergence")
        }
    }

    #[test]
    fn test_generator_failure_classified() {
        let engine = TransferEngine::new(Arc::new(Failing));
        let src = face([0, 0, 0]);
        let source = encode_source(&src);
        let reference = encode_reference(&face([1, 1, 1]), &src.mask, "all", 1.0).unwrap();
        let err = engine.transfer(&source, &[reference]).unwrap_err();
        assert_eq!(err, Error::TransferFailed("numerical divergence".into()));
    }

    /// Fails if two forward passes overlap
    struct Exclusive {
        busy: AtomicBool,
        overlapped: AtomicBool,
    }

    impl StyleGenerator for Exclusive {
        fn native_size(&self) -> u32 {
            N
        }

        fn stylize(&self, _: &SourceSample, reference: &ReferenceSample) -> anyhow::Result<RgbImage> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.busy.store(false, Ordering::SeqCst);
            Ok(reference.face().image().clone())
        }
    }

    #[test]
    fn test_generator_calls_serialized() {
        let generator = Arc::new(Exclusive {
            busy: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
        });
        let engine = Arc::new(TransferEngine::new(generator.clone()));
        let src = face([0, 0, 0]);
        let source = encode_source(&src);
        let reference = encode_reference(&face([1, 2, 3]), &src.mask, "all", 1.0).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                let source = source.clone();
                let reference = reference.clone();
                std::thread::spawn(move || engine.transfer(&source, &[reference]).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!generator.overlapped.load(Ordering::SeqCst));
    }
}

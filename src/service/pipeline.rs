//! Makeup transfer pipeline
//!
//! Chains preprocessing, sample encoding, transfer and compositing. Every
//! stage returns a classified `Error`; the first failure is surfaced as is
//! and no partial image is produced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info};

use crate::config::{Config, PreprocessConfig, TransferConfig};
use crate::engine::encoder::{encode_reference_with, NEUTRAL_INTENSITY};
use crate::engine::{
    encode_source, postprocess, BiSeNetParser, Compositor, FaceDetector, FaceLocator, FaceParser,
    ModelPool, OpenVinoGenerator, Preprocessor, RegionSelector, StyleGenerator, TransferEngine,
};
use crate::error::{Error, Result};

use super::types::{HealthResult, StyleLayer, TransferMode, TransferRequest};

/// Process-wide transfer context: models are loaded once and shared by
/// every request
pub struct Pipeline {
    preprocessor: Preprocessor,
    engine: TransferEngine,
    compositor: Compositor,
    pool: Option<Arc<ModelPool>>,
}

impl Pipeline {
    /// Build a pipeline from arbitrary collaborators. The crop size follows
    /// the generator's native resolution.
    pub fn new(
        locator: Arc<dyn FaceLocator>,
        parser: Arc<dyn FaceParser>,
        generator: Arc<dyn StyleGenerator>,
        preprocess: PreprocessConfig,
        transfer: &TransferConfig,
    ) -> Self {
        let crop_size = generator.native_size();
        Self {
            preprocessor: Preprocessor::new(locator, parser, preprocess, crop_size),
            engine: TransferEngine::new(generator),
            compositor: Compositor::new(transfer.detail_restore),
            pool: None,
        }
    }

    /// Load the OpenVINO models named in `config` and wire them up
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = Arc::new(ModelPool::new(&config.inference, &config.models)?);
        pool.preload()?;

        let locator = Arc::new(FaceDetector::new(
            pool.clone(),
            config.preprocess.confidence_threshold,
            config.preprocess.nms_threshold,
        ));
        let parser = Arc::new(BiSeNetParser::new(pool.clone()));
        let generator = Arc::new(OpenVinoGenerator::new(pool.clone(), config.transfer.native_size));

        let mut pipeline = Self::new(locator, parser, generator, config.preprocess.clone(), &config.transfer);
        pipeline.pool = Some(pool);
        Ok(pipeline)
    }

    pub fn pool(&self) -> Option<&Arc<ModelPool>> {
        self.pool.as_ref()
    }

    /// Whole-face transfer of `reference` onto `source`.
    ///
    /// With `postprocess` the styled crop is pasted back into the source
    /// frame; without it the raw crop is resized to the source dimensions.
    pub fn run(&self, source: &RgbImage, reference: &RgbImage, postprocess: bool) -> Result<RgbImage> {
        let start = Instant::now();

        let (source_face, crop) = self.preprocessor.preprocess(source)?;
        let (reference_face, _) = self.preprocessor.preprocess(reference)?;
        debug!("Preprocessed both faces in {:?}", start.elapsed());

        let source_sample = encode_source(&source_face);
        let reference_sample =
            encode_reference_with(&reference_face, &source_face.mask, RegionSelector::All, NEUTRAL_INTENSITY)?;

        let result = self.engine.transfer(&source_sample, &[reference_sample])?;

        let output = if postprocess {
            self.compositor.composite(source, &crop, &result)?
        } else {
            imageops::resize(&result.image, source.width(), source.height(), FilterType::Triangle)
        };

        info!(
            "Transfer {}x{} done in {}ms",
            source.width(),
            source.height(),
            start.elapsed().as_millis()
        );
        Ok(output)
    }

    /// Transfer restricted to `region` at `intensity` (0.0 to 2.0)
    pub fn run_region(&self, source: &RgbImage, reference: &RgbImage, region: &str, intensity: f32) -> Result<RgbImage> {
        self.run_layered(source, &[StyleLayer::new(reference.clone(), region, intensity)])
    }

    /// Apply several reference styles in order. Where two layers claim the
    /// same region the later one wins; a named region beats `all`.
    pub fn run_layered(&self, source: &RgbImage, layers: &[StyleLayer]) -> Result<RgbImage> {
        let start = Instant::now();

        // reject bad selectors and intensities before any model runs
        let selectors = layers
            .iter()
            .map(|layer| {
                if !layer.intensity.is_finite() {
                    return Err(Error::InvalidIntensity(layer.intensity));
                }
                layer.region.parse::<RegionSelector>()
            })
            .collect::<Result<Vec<_>>>()?;
        if layers.is_empty() {
            return Err(Error::TransferFailed("at least one reference is required".into()));
        }

        let (source_face, crop) = self.preprocessor.preprocess(source)?;
        let source_sample = encode_source(&source_face);

        let mut references = Vec::with_capacity(layers.len());
        for (layer, selector) in layers.iter().zip(selectors) {
            let (reference_face, _) = self.preprocessor.preprocess(&layer.reference)?;
            references.push(encode_reference_with(
                &reference_face,
                &source_face.mask,
                selector,
                layer.intensity,
            )?);
        }

        let result = self.engine.transfer(&source_sample, &references)?;
        let output = self.compositor.composite(source, &crop, &result)?;

        info!(
            "Region transfer with {} layer(s), restyled {:?} in {}ms",
            layers.len(),
            result.restyled,
            start.elapsed().as_millis()
        );
        Ok(output)
    }

    /// Whole-face transfer faded over the source. `intensity` uses the same
    /// 0.0 to 2.0 scale as region mode and is halved into a blend factor.
    pub fn run_blended(&self, source: &RgbImage, reference: &RgbImage, intensity: f32) -> Result<RgbImage> {
        if !intensity.is_finite() {
            return Err(Error::InvalidIntensity(intensity));
        }
        let raw = self.run(source, reference, true)?;
        postprocess::blend(source, &raw, intensity * 0.5)
    }

    /// Dispatch a request according to its mode
    pub fn execute(&self, request: &TransferRequest) -> Result<RgbImage> {
        match &request.mode {
            TransferMode::Full { postprocess } => self.run(&request.source, &request.reference, *postprocess),
            TransferMode::Region { region, intensity } => {
                self.run_region(&request.source, &request.reference, region, *intensity)
            }
            TransferMode::Blended { intensity } => self.run_blended(&request.source, &request.reference, *intensity),
        }
    }

    /// Run `request` on the blocking pool, failing with `Timeout` once
    /// `deadline` passes. The underlying work is not cancelled.
    pub async fn run_with_timeout(self: Arc<Self>, request: TransferRequest, deadline: Duration) -> Result<RgbImage> {
        let task = tokio::task::spawn_blocking(move || self.execute(&request));

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::TransferFailed(format!("pipeline task failed: {e}"))),
            Err(_) => Err(Error::Timeout(deadline)),
        }
    }

    /// Model load status for health reporting
    pub fn health(&self) -> HealthResult {
        let models_loaded: HashMap<String, bool> = self
            .pool
            .as_ref()
            .map(|pool| {
                pool.get_status()
                    .into_iter()
                    .map(|(model, loaded)| (model.as_str().to_string(), loaded))
                    .collect()
            })
            .unwrap_or_default();

        HealthResult {
            healthy: models_loaded.values().all(|&loaded| loaded),
            version: env!("CARGO_PKG_VERSION").to_string(),
            models_loaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::encoder::{ReferenceSample, SourceSample};
    use crate::engine::{FaceBox, RegionLabel, RegionMask};
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const N: u32 = 16;

    struct CenterFace;

    impl FaceLocator for CenterFace {
        fn locate(&self, image: &RgbImage) -> anyhow::Result<Vec<FaceBox>> {
            let (w, h) = (image.width() as f32, image.height() as f32);
            Ok(vec![FaceBox {
                x1: w * 0.4,
                y1: h * 0.4,
                x2: w * 0.6,
                y2: h * 0.6,
                confidence: 0.9,
                landmarks: [(0.0, 0.0); 5],
            }])
        }
    }

    struct NoFace;

    impl FaceLocator for NoFace {
        fn locate(&self, _: &RgbImage) -> anyhow::Result<Vec<FaceBox>> {
            Ok(Vec::new())
        }
    }

    struct AllSkin;

    impl FaceParser for AllSkin {
        fn parse(&self, crop: &RgbImage) -> anyhow::Result<RegionMask> {
            Ok(RegionMask::filled(crop.width(), crop.height(), RegionLabel::Skin))
        }
    }

    struct Counting {
        calls: AtomicUsize,
    }

    impl StyleGenerator for Counting {
        fn native_size(&self) -> u32 {
            N
        }

        fn stylize(&self, _: &SourceSample, reference: &ReferenceSample) -> anyhow::Result<RgbImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(reference.face().image().clone())
        }
    }

    fn pipeline(locator: Arc<dyn FaceLocator>) -> (Pipeline, Arc<Counting>) {
        let generator = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let pipeline = Pipeline::new(
            locator,
            Arc::new(AllSkin),
            generator.clone(),
            PreprocessConfig::default(),
            &TransferConfig::default(),
        );
        (pipeline, generator)
    }

    fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(100, 80, Rgb(color))
    }

    #[test]
    fn test_run_without_postprocess_matches_source_size() {
        let (pipeline, generator) = pipeline(Arc::new(CenterFace));
        let out = pipeline.run(&solid([10, 10, 10]), &solid([200, 50, 50]), false).unwrap();
        assert_eq!(out.dimensions(), (100, 80));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_face_short_circuits() {
        let (pipeline, generator) = pipeline(Arc::new(NoFace));
        let err = pipeline.run(&solid([10, 10, 10]), &solid([200, 50, 50]), true).unwrap_err();
        assert_eq!(err, Error::NoFaceDetected);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_region_validated_before_models() {
        let (pipeline, generator) = pipeline(Arc::new(NoFace));
        let err = pipeline
            .run_region(&solid([0, 0, 0]), &solid([1, 1, 1]), "eyebrows", 1.0)
            .unwrap_err();
        assert_eq!(err, Error::InvalidRegionSelector("eyebrows".into()));

        let err = pipeline
            .run_region(&solid([0, 0, 0]), &solid([1, 1, 1]), "lips", f32::INFINITY)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidIntensity(_)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blended_zero_is_source() {
        let (pipeline, _) = pipeline(Arc::new(CenterFace));
        let source = solid([30, 60, 90]);
        let out = pipeline.run_blended(&source, &solid([250, 0, 0]), 0.0).unwrap();
        assert_eq!(out, source);
    }

    #[test]
    fn test_execute_dispatches_modes() {
        let (pipeline, _) = pipeline(Arc::new(CenterFace));
        let request = TransferRequest {
            source: solid([30, 60, 90]),
            reference: solid([250, 0, 0]),
            mode: TransferMode::Region {
                region: "skin".into(),
                intensity: 0.0,
            },
        };
        assert_eq!(pipeline.execute(&request).unwrap(), request.source);
    }

    #[test]
    fn test_health_without_pool() {
        let (pipeline, _) = pipeline(Arc::new(CenterFace));
        let health = pipeline.health();
        assert!(health.healthy);
        assert!(health.models_loaded.is_empty());
        assert!(pipeline.pool().is_none());
    }

    #[tokio::test]
    async fn test_run_with_timeout_completes() {
        let (pipeline, _) = pipeline(Arc::new(CenterFace));
        let request = TransferRequest {
            source: solid([30, 60, 90]),
            reference: solid([250, 0, 0]),
            mode: TransferMode::Full { postprocess: true },
        };
        let out = Arc::new(pipeline)
            .run_with_timeout(request, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(out.dimensions(), (100, 80));
    }
}

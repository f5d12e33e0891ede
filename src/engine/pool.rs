//! Model Pool
//!
//! Loads each compiled model once and keeps it for the life of the process.
//! `preload` is called at startup so the first request never pays for (or
//! fails on) model loading.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array4;
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use parking_lot::RwLock;
use tracing::info;

use crate::config::{InferenceConfig, ModelsConfig};

/// Wrapper for OpenVINO Core that implements Send + Sync
pub struct SafeCore(Core);
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

impl Deref for SafeCore {
    type Target = Core;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for SafeCore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Wrapper for OpenVINO CompiledModel that implements Send + Sync
#[derive(Clone)]
pub struct SafeCompiledModel(pub Arc<CompiledModel>);
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

impl SafeCompiledModel {
    /// Create an inference request
    /// OpenVINO CompiledModel methods are thread-safe in C++, but Rust bindings
    /// require &mut self.
    pub fn create_infer_request(&self) -> anyhow::Result<InferRequest> {
        unsafe {
            let ptr = Arc::as_ptr(&self.0) as *mut CompiledModel;
            (*ptr).create_infer_request().map_err(|e| e.into())
        }
    }
}

/// Model types that can be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Detector,
    Parser,
    Generator,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [ModelType::Detector, ModelType::Parser, ModelType::Generator];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Detector => "detector",
            ModelType::Parser => "parser",
            ModelType::Generator => "generator",
        }
    }
}

/// Process-wide cache of compiled models
pub struct ModelPool {
    core: RwLock<SafeCore>,
    device: String,

    detector_path: String,
    parser_path: String,
    generator_path: String,

    detector: RwLock<Option<SafeCompiledModel>>,
    parser: RwLock<Option<SafeCompiledModel>>,
    generator: RwLock<Option<SafeCompiledModel>>,
}

impl ModelPool {
    /// Create a new model pool; nothing is loaded until `get_model` or `preload`
    pub fn new(config: &InferenceConfig, models: &ModelsConfig) -> anyhow::Result<Self> {
        let core = Core::new()?;

        Ok(Self {
            core: RwLock::new(SafeCore(core)),
            device: config.device.clone(),
            detector_path: models.detector.to_string_lossy().into_owned(),
            parser_path: models.parser.to_string_lossy().into_owned(),
            generator_path: models.generator.to_string_lossy().into_owned(),
            detector: RwLock::new(None),
            parser: RwLock::new(None),
            generator: RwLock::new(None),
        })
    }

    fn slot(&self, model_type: ModelType) -> (&RwLock<Option<SafeCompiledModel>>, &str) {
        match model_type {
            ModelType::Detector => (&self.detector, &self.detector_path),
            ModelType::Parser => (&self.parser, &self.parser_path),
            ModelType::Generator => (&self.generator, &self.generator_path),
        }
    }

    /// Get or load a model
    pub fn get_model(&self, model_type: ModelType) -> anyhow::Result<SafeCompiledModel> {
        let (cache, path) = self.slot(model_type);

        if let Some(cached) = cache.read().as_ref() {
            return Ok(cached.clone());
        }

        let mut write_guard = cache.write();

        // Double-check after acquiring write lock
        if let Some(cached) = write_guard.as_ref() {
            return Ok(cached.clone());
        }

        info!("Loading model: {} from {}", model_type.as_str(), path);
        let start = Instant::now();

        // Core methods like read_model require &mut self in Rust bindings
        let mut core = self.core.write();
        let model = core.read_model_from_file(path, "")?;
        let compiled = core.compile_model(&model, self.device.as_str().into())?;
        let safe_compiled = SafeCompiledModel(Arc::new(compiled));

        info!("Model {} loaded in {:?}", model_type.as_str(), start.elapsed());

        *write_guard = Some(safe_compiled.clone());
        Ok(safe_compiled)
    }

    /// Load every model now
    pub fn preload(&self) -> anyhow::Result<()> {
        for model_type in ModelType::ALL {
            self.get_model(model_type)?;
        }
        Ok(())
    }

    /// Check if a model is loaded
    pub fn is_loaded(&self, model_type: ModelType) -> bool {
        self.slot(model_type).0.read().is_some()
    }

    /// Get status of all models
    pub fn get_status(&self) -> Vec<(ModelType, bool)> {
        ModelType::ALL
            .iter()
            .map(|&t| (t, self.is_loaded(t)))
            .collect()
    }

    /// Drop all compiled models
    pub fn shutdown(&self) {
        for model_type in ModelType::ALL {
            let mut guard = self.slot(model_type).0.write();
            if guard.take().is_some() {
                info!("Unloaded model: {}", model_type.as_str());
            }
        }
    }
}

/// Copy an NCHW array into a new f32 OpenVINO tensor
pub fn to_tensor(array: &Array4<f32>) -> anyhow::Result<Tensor> {
    let dims: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    let shape = Shape::new(&dims)?;
    let mut tensor = Tensor::new(ElementType::F32, &shape)?;

    let contiguous = array.as_standard_layout();
    let data = contiguous
        .as_slice()
        .ok_or_else(|| anyhow::anyhow!("input array is not contiguous"))?;
    unsafe {
        let tensor_data = tensor.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
        std::ptr::copy_nonoverlapping(data.as_ptr(), tensor_data, data.len());
    }
    Ok(tensor)
}

/// Read tensor data as f32 vector together with its dimensions
pub fn read_tensor_f32(tensor: &Tensor) -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
    let shape = tensor.get_shape()?;
    let dims: Vec<usize> = shape.get_dimensions().iter().map(|&d| d as usize).collect();
    let total_elements: usize = dims.iter().product();

    let data: Vec<f32> = unsafe {
        let ptr = tensor.get_raw_data()?.as_ptr() as *const f32;
        std::slice::from_raw_parts(ptr, total_elements).to_vec()
    };

    Ok((dims, data))
}

//! Inference engine module
//!
//! Everything between decoded pixels and a finished image:
//! - Face detection, cropping and parsing (`preprocess`)
//! - Sample encoding and region-restricted transfer
//! - Compositing back into the original frame
//! - OpenVINO model loading shared by the three networks

pub mod mask;
pub mod geometry;
pub mod pool;
pub mod detector;
pub mod parser;
pub mod preprocess;
pub mod encoder;
pub mod transfer;
pub mod generator;
pub mod postprocess;

pub use pool::{ModelPool, ModelType};
pub use detector::{FaceBox, FaceDetector, FaceLocator};
pub use parser::{BiSeNetParser, FaceParser};
pub use mask::{RegionLabel, RegionMask, RegionSelector};
pub use geometry::{AffineTransform, CropGeometry, CropRect};
pub use preprocess::{decode_image, PreparedFace, Preprocessor};
pub use encoder::{encode_reference, encode_source, ReferenceSample, SampleRole, SourceSample};
pub use transfer::{StyleGenerator, TransferEngine, TransferResult};
pub use generator::OpenVinoGenerator;
pub use postprocess::{blend, composite, Compositor};

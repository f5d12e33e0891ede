//! Service layer module

pub mod pipeline;
pub mod types;

pub use pipeline::Pipeline;
pub use types::*;

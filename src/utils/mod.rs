//! Shared helpers

pub mod image;

pub use self::image::{encode_jpeg, encode_png};

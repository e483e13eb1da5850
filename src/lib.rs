//! mipforge - GPU block compression for mip-mapped textures
//!
//! Forges a full mip chain on the GPU and lets the device encode
//! every level into a hardware block-compressed format.

pub mod config;
pub mod device;
pub mod error;
pub mod image_source;
pub mod textures;

pub use error::{Error, Result};

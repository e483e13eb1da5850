//! GPU texture compression
//!
//! Decodes an image, renders a mip chain on the device and lets the device
//! encode every level into a hardware block-compressed format.

mod blit;
mod compressor;
mod encoder;
mod format;
mod mip_chain;
mod result;

pub use blit::{BlitPipeline, BLIT_SHADERS, FULL_SCREEN_QUAD, SAMPLER_NAME};
pub use compressor::{Compressed, CompressionReport, Compressor};
pub use encoder::LevelReport;
pub use format::CompressionFormat;
pub use mip_chain::{MipLevel, MipLevelPlan, MIN_BASE_WIDTH};
pub use result::{BindTarget, CompressedTexture};

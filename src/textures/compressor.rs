//! Compression orchestration
//!
//! `Decode -> Validate -> UploadSource -> BuildMipChain -> Encode ->
//! ReleaseIntermediates -> ReturnResult`, strictly in that order. Every
//! intermediate object is a scoped guard, so a failure at any step releases
//! what was already created before the error reaches the caller.

use std::path::Path;

use tracing::info;

use super::blit::{BlitPipeline, BLIT_SHADERS};
use super::encoder::{encode, LevelReport};
use super::format::CompressionFormat;
use super::mip_chain::{build_mip_chain, upload_source, MipLevelPlan, OffscreenTarget};
use super::result::CompressedTexture;
use crate::device::{GraphicsDevice, ShaderSource};
use crate::error::Result;
use crate::image_source::SourceImage;

/// What one `compress` call produced, for logging and display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionReport {
    pub format: CompressionFormat,
    pub base_width: u32,
    pub levels: Vec<LevelReport>,
    /// Sum of the per-level sizes queried from the device
    pub total_bytes: u64,
}

/// Output of [`Compressor::compress`]
pub struct Compressed<'d, D: GraphicsDevice + ?Sized> {
    pub texture: CompressedTexture<'d, D>,
    pub report: CompressionReport,
}

impl<D: GraphicsDevice + ?Sized> std::fmt::Debug for Compressed<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressed")
            .field("texture", &self.texture)
            .field("report", &self.report)
            .finish()
    }
}

/// Turns image files into compressed, mip-mapped device textures
pub struct Compressor<'d, D: GraphicsDevice + ?Sized> {
    device: &'d D,
    blit: BlitPipeline<'d, D>,
}

impl<'d, D: GraphicsDevice + ?Sized> Compressor<'d, D> {
    /// Build the blit pipeline with the stock shaders
    pub fn new(device: &'d D) -> Result<Self> {
        Self::with_shaders(device, &BLIT_SHADERS)
    }

    pub fn with_shaders(device: &'d D, shaders: &ShaderSource) -> Result<Self> {
        let blit = BlitPipeline::new(device, shaders)?;
        Ok(Self { device, blit })
    }

    /// Decode `path`, build a `base_width` square mip chain on the device and
    /// encode it into `format`
    pub fn compress(
        &self,
        path: &Path,
        format: CompressionFormat,
        base_width: u32,
    ) -> Result<Compressed<'d, D>> {
        let device = self.device;
        let plan = MipLevelPlan::new(base_width)?;
        let image = SourceImage::load(path)?;

        info!(
            "Compressing {} ({}x{}) as {} ({}), {} levels from {}",
            path.display(),
            image.width(),
            image.height(),
            format,
            format.gl_enum(),
            plan.level_count(),
            base_width
        );

        let source = upload_source(device, &image)?;
        let pixel_format = image.pixel_format();
        drop(image);

        let target = OffscreenTarget::new(device, base_width)?;
        let chain = build_mip_chain(device, &self.blit, &target, &source, pixel_format, plan)?;
        let encoded = encode(device, &target, &chain, format)?;

        drop(chain);
        drop(target);
        drop(source);

        let total_bytes = encoded.total_bytes();
        info!("Total bytes: {}", total_bytes);

        let report = CompressionReport {
            format,
            base_width,
            levels: encoded.levels,
            total_bytes,
        };
        Ok(Compressed {
            texture: CompressedTexture::new(encoded.texture, device, plan.level_count()),
            report,
        })
    }
}

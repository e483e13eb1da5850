//! Mip-chain builder
//!
//! Renders the source texture into every level of an uncompressed chain.
//! Each level is resampled straight from the full-resolution source, not
//! from the previous level.

use tracing::debug;

use super::blit::BlitPipeline;
use crate::device::{
    DepthStencil, Framebuffer, GraphicsDevice, PixelFormat, Texture, TextureDesc, TextureFormat,
};
use crate::error::{Error, Result};
use crate::image_source::SourceImage;

/// Smallest accepted base width
pub const MIN_BASE_WIDTH: u32 = 16;

/// One level of a square mip chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLevel {
    pub index: u32,
    pub width: u32,
}

/// Level count and widths derived from a base width
///
/// `L = floor(log2(base)) - 2`, which keeps the smallest level at 8 texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipLevelPlan {
    base_width: u32,
    level_count: u32,
}

impl MipLevelPlan {
    pub fn new(base_width: u32) -> Result<Self> {
        if base_width < MIN_BASE_WIDTH || !base_width.is_power_of_two() {
            return Err(Error::InvalidBaseWidth { width: base_width });
        }
        Ok(Self {
            base_width,
            level_count: base_width.ilog2() - 2,
        })
    }

    pub fn base_width(&self) -> u32 {
        self.base_width
    }

    pub fn level_count(&self) -> u32 {
        self.level_count
    }

    pub fn levels(&self) -> impl Iterator<Item = MipLevel> {
        let base = self.base_width;
        (0..self.level_count).map(move |index| MipLevel {
            index,
            width: base >> index,
        })
    }

    pub fn smallest_width(&self) -> u32 {
        self.base_width >> (self.level_count - 1)
    }
}

/// Framebuffer plus its depth-stencil renderbuffer
///
/// The depth-stencil is sized to the base width and never resized; the blit
/// pass does no depth or stencil testing.
pub struct OffscreenTarget<'d, D: GraphicsDevice + ?Sized> {
    framebuffer: Framebuffer<'d, D>,
    _depth_stencil: DepthStencil<'d, D>,
}

impl<'d, D: GraphicsDevice + ?Sized> OffscreenTarget<'d, D> {
    pub fn new(device: &'d D, base_width: u32) -> Result<Self> {
        let depth_stencil = DepthStencil::new(device, base_width, base_width)?;
        let framebuffer = Framebuffer::new(device, &depth_stencil)?;
        Ok(Self {
            framebuffer,
            _depth_stencil: depth_stencil,
        })
    }

    /// Re-point the color attachment and make this the active framebuffer
    pub fn attach(&self, texture: &Texture<'d, D>, level: u32) -> Result<()> {
        self.framebuffer.bind();
        self.framebuffer.attach_color(texture, level)
    }
}

/// Renderable texture holding every planned level
pub struct UncompressedMipChain<'d, D: GraphicsDevice + ?Sized> {
    texture: Texture<'d, D>,
    plan: MipLevelPlan,
}

impl<'d, D: GraphicsDevice + ?Sized> UncompressedMipChain<'d, D> {
    pub fn texture(&self) -> &Texture<'d, D> {
        &self.texture
    }

    pub fn plan(&self) -> &MipLevelPlan {
        &self.plan
    }
}

/// Upload the decoded image at its native size as a single-level texture
pub fn upload_source<'d, D: GraphicsDevice + ?Sized>(device: &'d D, image: &SourceImage) -> Result<Texture<'d, D>> {
    let texture = Texture::new(
        device,
        &TextureDesc {
            label: "source",
            width: image.width(),
            height: image.height(),
            mip_levels: 1,
            format: TextureFormat::Uncompressed(image.pixel_format()),
            renderable: false,
        },
    )?;
    device.upload_texture(texture.id(), 0, image.width(), image.height(), image.rgba())?;
    Ok(texture)
}

/// Render `source` into each level of a fresh chain through `target`
pub fn build_mip_chain<'d, D: GraphicsDevice + ?Sized>(
    device: &'d D,
    blit: &BlitPipeline<'d, D>,
    target: &OffscreenTarget<'d, D>,
    source: &Texture<'d, D>,
    format: PixelFormat,
    plan: MipLevelPlan,
) -> Result<UncompressedMipChain<'d, D>> {
    let texture = Texture::new(
        device,
        &TextureDesc {
            label: "uncompressed mip chain",
            width: plan.base_width(),
            height: plan.base_width(),
            mip_levels: plan.level_count(),
            format: TextureFormat::Uncompressed(format),
            renderable: true,
        },
    )?;

    for level in plan.levels() {
        debug!("Rendering mip level {} ({}x{})", level.index, level.width, level.width);
        target.attach(&texture, level.index)?;
        device.set_viewport(level.width, level.width);
        device.bind_texture(0, Some(source.id()));
        blit.draw(device)?;
    }

    Ok(UncompressedMipChain { texture, plan })
}

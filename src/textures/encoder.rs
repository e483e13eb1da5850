//! Compression encoder
//!
//! Copies each uncompressed level out of the framebuffer into a texture
//! declared with a compressed format; the device encodes during the copy.

use tracing::debug;

use super::format::CompressionFormat;
use super::mip_chain::{OffscreenTarget, UncompressedMipChain};
use crate::device::{GraphicsDevice, Texture, TextureDesc, TextureFormat};
use crate::error::Result;

/// Compressed size of one level as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelReport {
    pub level: u32,
    pub width: u32,
    pub compressed_bytes: u64,
}

/// Encoded destination texture plus the per-level sizes
pub struct EncodedTexture<'d, D: GraphicsDevice + ?Sized> {
    pub texture: Texture<'d, D>,
    pub levels: Vec<LevelReport>,
}

impl<D: GraphicsDevice + ?Sized> EncodedTexture<'_, D> {
    pub fn total_bytes(&self) -> u64 {
        self.levels.iter().map(|l| l.compressed_bytes).sum()
    }
}

/// Encode every level of `chain` into a new `format` texture
pub fn encode<'d, D: GraphicsDevice + ?Sized>(
    device: &'d D,
    target: &OffscreenTarget<'d, D>,
    chain: &UncompressedMipChain<'d, D>,
    format: CompressionFormat,
) -> Result<EncodedTexture<'d, D>> {
    let plan = *chain.plan();
    let texture = Texture::new(
        device,
        &TextureDesc {
            label: "compressed destination",
            width: plan.base_width(),
            height: plan.base_width(),
            mip_levels: plan.level_count(),
            format: TextureFormat::Compressed(format),
            renderable: false,
        },
    )?;

    let mut levels = Vec::with_capacity(plan.level_count() as usize);
    for level in plan.levels() {
        target.attach(chain.texture(), level.index)?;
        device.copy_framebuffer_to_texture(texture.id(), level.index, level.width, level.width)?;

        let compressed_bytes = device.query_compressed_size(texture.id(), level.index)?;
        debug!(
            "Level {} ({}x{}) -> {} bytes as {}",
            level.index, level.width, level.width, compressed_bytes, format
        );
        levels.push(LevelReport {
            level: level.index,
            width: level.width,
            compressed_bytes,
        });
    }

    Ok(EncodedTexture { texture, levels })
}

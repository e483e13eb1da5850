//! Compression result handle

use crate::device::{GraphicsDevice, Texture, TextureId};
use crate::error::{Error, Result};

/// Texture bind targets a result can live on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindTarget {
    Texture2D,
}

/// The finished compressed texture
///
/// Owns its device handle exclusively and releases it exactly once. An empty
/// handle (after [`take`](Self::take) or [`reset`](Self::reset)) releases
/// nothing.
pub struct CompressedTexture<'d, D: GraphicsDevice + ?Sized> {
    device: &'d D,
    target: BindTarget,
    texture: Option<TextureId>,
    level_count: u32,
}

impl<'d, D: GraphicsDevice + ?Sized> CompressedTexture<'d, D> {
    pub(crate) fn new(texture: Texture<'d, D>, device: &'d D, level_count: u32) -> Self {
        Self {
            device,
            target: BindTarget::Texture2D,
            texture: Some(texture.into_raw()),
            level_count,
        }
    }

    /// A handle that owns nothing
    pub fn empty(device: &'d D) -> Self {
        Self {
            device,
            target: BindTarget::Texture2D,
            texture: None,
            level_count: 0,
        }
    }

    pub fn target(&self) -> BindTarget {
        self.target
    }

    pub fn id(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn is_empty(&self) -> bool {
        self.texture.is_none()
    }

    /// Valid levels are `[0, level_count - 1]`
    pub fn level_count(&self) -> u32 {
        self.level_count
    }

    /// Make this texture current on texture unit 0
    ///
    /// Replaces whatever was bound on unit 0.
    pub fn bind(&self) {
        self.device.bind_texture(0, self.texture);
    }

    /// Move the texture out, leaving this handle empty
    pub fn take(&mut self) -> Self {
        let taken = Self {
            device: self.device,
            target: self.target,
            texture: self.texture.take(),
            level_count: self.level_count,
        };
        self.level_count = 0;
        taken
    }

    /// Release the texture now
    pub fn reset(&mut self) {
        if let Some(texture) = self.texture.take() {
            self.device.delete_texture(texture);
        }
        self.level_count = 0;
    }

    /// Download the encoded blocks of one level
    pub fn read_level(&self, level: u32) -> Result<Vec<u8>> {
        let texture = self
            .texture
            .ok_or_else(|| Error::device("read from an empty compressed texture"))?;
        if level >= self.level_count {
            return Err(Error::device(format!(
                "level {} out of range (texture has {})",
                level, self.level_count
            )));
        }
        self.device.read_compressed_level(texture, level)
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for CompressedTexture<'_, D> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<D: GraphicsDevice + ?Sized> std::fmt::Debug for CompressedTexture<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedTexture")
            .field("target", &self.target)
            .field("texture", &self.texture)
            .field("level_count", &self.level_count)
            .finish()
    }
}

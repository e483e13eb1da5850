//! Scoped device objects
//!
//! Each guard owns exactly one device handle and releases it on drop, so
//! every early return through `?` cleans up whatever was created so far.

use super::{
    BufferId, FramebufferId, GraphicsDevice, ProgramId, RenderbufferId, ShaderSource, TextureDesc, TextureId,
    VertexArrayId, VertexLayout,
};
use crate::error::Result;

/// Owned texture
pub struct Texture<'d, D: GraphicsDevice + ?Sized> {
    device: &'d D,
    id: TextureId,
}

impl<'d, D: GraphicsDevice + ?Sized> Texture<'d, D> {
    pub fn new(device: &'d D, desc: &TextureDesc) -> Result<Self> {
        let id = device.create_texture(desc)?;
        Ok(Self { device, id })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Give up ownership without releasing the handle
    pub fn into_raw(self) -> TextureId {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for Texture<'_, D> {
    fn drop(&mut self) {
        self.device.delete_texture(self.id);
    }
}

/// Owned depth-stencil renderbuffer
pub struct DepthStencil<'d, D: GraphicsDevice + ?Sized> {
    device: &'d D,
    id: RenderbufferId,
}

impl<'d, D: GraphicsDevice + ?Sized> DepthStencil<'d, D> {
    pub fn new(device: &'d D, width: u32, height: u32) -> Result<Self> {
        let id = device.create_depth_stencil(width, height)?;
        Ok(Self { device, id })
    }

    pub fn id(&self) -> RenderbufferId {
        self.id
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for DepthStencil<'_, D> {
    fn drop(&mut self) {
        self.device.delete_depth_stencil(self.id);
    }
}

/// Owned framebuffer; unbinds itself before release
pub struct Framebuffer<'d, D: GraphicsDevice + ?Sized> {
    device: &'d D,
    id: FramebufferId,
}

impl<'d, D: GraphicsDevice + ?Sized> Framebuffer<'d, D> {
    pub fn new(device: &'d D, depth_stencil: &DepthStencil<'d, D>) -> Result<Self> {
        let id = device.create_framebuffer(depth_stencil.id())?;
        Ok(Self { device, id })
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn attach_color(&self, texture: &Texture<'d, D>, level: u32) -> Result<()> {
        self.device.attach_color(self.id, texture.id(), level)
    }

    pub fn bind(&self) {
        self.device.bind_framebuffer(Some(self.id));
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for Framebuffer<'_, D> {
    fn drop(&mut self) {
        self.device.bind_framebuffer(None);
        self.device.delete_framebuffer(self.id);
    }
}

/// Owned, linked shader program
pub struct ShaderProgram<'d, D: GraphicsDevice + ?Sized> {
    device: &'d D,
    id: ProgramId,
}

impl<'d, D: GraphicsDevice + ?Sized> ShaderProgram<'d, D> {
    pub fn new(device: &'d D, source: &ShaderSource) -> Result<Self> {
        let id = device.create_shader_program(source)?;
        Ok(Self { device, id })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn set_sampler_unit(&self, name: &str, unit: u32) -> Result<()> {
        self.device.set_sampler_unit(self.id, name, unit)
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for ShaderProgram<'_, D> {
    fn drop(&mut self) {
        self.device.delete_shader_program(self.id);
    }
}

/// Owned vertex buffer
pub struct VertexBuffer<'d, D: GraphicsDevice + ?Sized> {
    device: &'d D,
    id: BufferId,
}

impl<'d, D: GraphicsDevice + ?Sized> VertexBuffer<'d, D> {
    pub fn new(device: &'d D, data: &[f32]) -> Result<Self> {
        let id = device.create_vertex_buffer(data)?;
        Ok(Self { device, id })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for VertexBuffer<'_, D> {
    fn drop(&mut self) {
        self.device.delete_vertex_buffer(self.id);
    }
}

/// Owned vertex array
pub struct VertexArray<'d, D: GraphicsDevice + ?Sized> {
    device: &'d D,
    id: VertexArrayId,
}

impl<'d, D: GraphicsDevice + ?Sized> VertexArray<'d, D> {
    pub fn new(device: &'d D, buffer: &VertexBuffer<'d, D>, layout: VertexLayout) -> Result<Self> {
        let id = device.create_vertex_array(buffer.id(), layout)?;
        Ok(Self { device, id })
    }

    pub fn id(&self) -> VertexArrayId {
        self.id
    }
}

impl<D: GraphicsDevice + ?Sized> Drop for VertexArray<'_, D> {
    fn drop(&mut self) {
        self.device.delete_vertex_array(self.id);
    }
}

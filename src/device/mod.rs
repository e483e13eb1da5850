//! Graphics device capability
//!
//! Every pipeline component talks to the GPU through [`GraphicsDevice`].
//! Handles are plain ids; ownership lives in the guards in [`resources`].
//! The device keeps GL-style bound state (texture unit 0, the active
//! framebuffer, the viewport) and callers set it explicitly before use.

#[cfg(test)]
pub(crate) mod mock;
pub mod resources;
pub mod wgpu_device;

use crate::error::Result;
use crate::textures::CompressionFormat;

pub use resources::{DepthStencil, Framebuffer, ShaderProgram, Texture, VertexArray, VertexBuffer};
pub use wgpu_device::{list_gpus, GpuInfo, WgpuDevice};

macro_rules! device_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

device_id!(
    /// Texture object
    TextureId,
    /// Depth-stencil renderbuffer
    RenderbufferId,
    /// Offscreen framebuffer
    FramebufferId,
    /// Linked shader program
    ProgramId,
    /// Vertex buffer
    BufferId,
    /// Vertex array (buffer + attribute layout)
    VertexArrayId,
);

/// Uncompressed 8-bit-per-channel color formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    /// Pick the format matching a decoded channel count
    pub fn from_channels(channels: u8) -> Option<Self> {
        match channels {
            3 => Some(PixelFormat::Rgb8),
            4 => Some(PixelFormat::Rgba8),
            _ => None,
        }
    }
}

/// Internal storage format of a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Uncompressed(PixelFormat),
    Compressed(CompressionFormat),
}

/// Parameters for [`GraphicsDevice::create_texture`]
///
/// Textures are always sampled with linear filtering.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    /// Levels `[0, mip_levels - 1]` are valid
    pub mip_levels: u32,
    pub format: TextureFormat,
    /// Can be attached as a framebuffer color target
    pub renderable: bool,
}

/// Vertex and fragment source for one program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: &'static str,
    pub fragment: &'static str,
}

/// Layout of the single float attribute at location 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub components: u32,
    pub stride_bytes: u32,
}

impl VertexLayout {
    /// Tightly packed (x, y) positions
    pub const POSITION_2D: Self = Self {
        components: 2,
        stride_bytes: 2 * std::mem::size_of::<f32>() as u32,
    };
}

/// A non-indexed triangle-list draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub vertex_array: VertexArrayId,
    pub vertex_count: u32,
}

/// Device operations the pipeline depends on
pub trait GraphicsDevice {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId>;
    /// Upload tightly packed RGBA8 pixels into one level
    fn upload_texture(&self, texture: TextureId, level: u32, width: u32, height: u32, rgba: &[u8]) -> Result<()>;
    fn delete_texture(&self, texture: TextureId);

    fn create_depth_stencil(&self, width: u32, height: u32) -> Result<RenderbufferId>;
    fn delete_depth_stencil(&self, renderbuffer: RenderbufferId);

    fn create_framebuffer(&self, depth_stencil: RenderbufferId) -> Result<FramebufferId>;
    /// Point the color attachment at one level of a renderable texture
    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId, level: u32) -> Result<()>;
    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>);
    fn delete_framebuffer(&self, framebuffer: FramebufferId);

    fn create_shader_program(&self, source: &ShaderSource) -> Result<ProgramId>;
    /// Point a named sampler at a texture unit
    fn set_sampler_unit(&self, program: ProgramId, name: &str, unit: u32) -> Result<()>;
    fn delete_shader_program(&self, program: ProgramId);

    fn create_vertex_buffer(&self, data: &[f32]) -> Result<BufferId>;
    fn delete_vertex_buffer(&self, buffer: BufferId);
    fn create_vertex_array(&self, buffer: BufferId, layout: VertexLayout) -> Result<VertexArrayId>;
    fn delete_vertex_array(&self, vertex_array: VertexArrayId);

    fn bind_texture(&self, unit: u32, texture: Option<TextureId>);
    fn set_viewport(&self, width: u32, height: u32);
    /// Render into the bound framebuffer, sampling texture unit 0
    fn draw(&self, call: &DrawCall) -> Result<()>;

    /// Copy the bound framebuffer's color attachment into `level` of
    /// `destination`, encoding into its compressed format
    fn copy_framebuffer_to_texture(&self, destination: TextureId, level: u32, width: u32, height: u32) -> Result<()>;
    /// Driver-reported byte size of one compressed level; waits for the copy
    fn query_compressed_size(&self, texture: TextureId, level: u32) -> Result<u64>;
    /// Download the encoded blocks of one compressed level
    fn read_compressed_level(&self, texture: TextureId, level: u32) -> Result<Vec<u8>>;
}

//! Resource-accounting device for tests
//!
//! Tracks every live handle per object kind, records draws and copies, and
//! can be told to fail at a chosen point in the pipeline.

use std::cell::RefCell;
use std::collections::HashMap;

use super::{
    BufferId, DrawCall, FramebufferId, GraphicsDevice, ProgramId, RenderbufferId, ShaderSource, TextureDesc,
    TextureFormat, TextureId, VertexArrayId, VertexLayout,
};
use crate::error::{Error, Result, ShaderStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Texture,
    Renderbuffer,
    Framebuffer,
    Program,
    Buffer,
    VertexArray,
}

/// Where the next matching call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    ShaderCompile(ShaderStage),
    ShaderLink,
    CreateFramebuffer,
    /// The draw issued while the given level is attached
    Draw { level: u32 },
    Copy { level: u32 },
}

/// One recorded draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRecord {
    pub target: (TextureId, u32),
    pub viewport: (u32, u32),
    pub sampled: TextureId,
}

/// One recorded framebuffer-to-texture copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRecord {
    pub source: (TextureId, u32),
    pub destination: TextureId,
    pub level: u32,
    pub size: (u32, u32),
}

struct MockTexture {
    desc: TextureDesc,
    compressed_levels: HashMap<u32, Vec<u8>>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    live: HashMap<ObjectKind, usize>,
    created: HashMap<ObjectKind, usize>,
    double_frees: usize,
    textures: HashMap<u32, MockTexture>,
    renderbuffers: HashMap<u32, (u32, u32)>,
    framebuffers: HashMap<u32, Option<(TextureId, u32)>>,
    programs: HashMap<u32, HashMap<String, u32>>,
    buffers: HashMap<u32, usize>,
    vertex_arrays: HashMap<u32, BufferId>,
    bound_textures: HashMap<u32, TextureId>,
    bound_framebuffer: Option<FramebufferId>,
    viewport: (u32, u32),
    draws: Vec<DrawRecord>,
    copies: Vec<CopyRecord>,
    reported_sizes: Vec<u64>,
    fail: Option<FailPoint>,
}

impl State {
    fn allocate(&mut self, kind: ObjectKind) -> u32 {
        self.next_id += 1;
        *self.live.entry(kind).or_default() += 1;
        *self.created.entry(kind).or_default() += 1;
        self.next_id
    }

    fn release(&mut self, kind: ObjectKind, found: bool) {
        if found {
            *self.live.entry(kind).or_default() -= 1;
        } else {
            self.double_frees += 1;
        }
    }
}

pub struct MockDevice {
    state: RefCell<State>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State::default()),
        }
    }

    pub fn failing_at(fail: FailPoint) -> Self {
        let device = Self::new();
        device.state.borrow_mut().fail = Some(fail);
        device
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.state.borrow().live.get(&kind).copied().unwrap_or(0)
    }

    pub fn created(&self, kind: ObjectKind) -> usize {
        self.state.borrow().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_created(&self) -> usize {
        self.state.borrow().created.values().sum()
    }

    pub fn double_frees(&self) -> usize {
        self.state.borrow().double_frees
    }

    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.state.borrow().bound_framebuffer
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.state.borrow().bound_textures.get(&unit).copied()
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.state.borrow().textures.get(&texture.0).map(|t| t.desc.clone())
    }

    pub fn renderbuffer_size(&self, renderbuffer: RenderbufferId) -> Option<(u32, u32)> {
        self.state.borrow().renderbuffers.get(&renderbuffer.0).copied()
    }

    pub fn live_renderbuffers(&self) -> Vec<RenderbufferId> {
        self.state.borrow().renderbuffers.keys().map(|id| RenderbufferId(*id)).collect()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        self.state.borrow().copies.clone()
    }

    /// Sizes handed out by `query_compressed_size`, in call order
    pub fn reported_sizes(&self) -> Vec<u64> {
        self.state.borrow().reported_sizes.clone()
    }

    /// Driver-style level size: block estimate plus per-level padding
    pub fn level_size(format: crate::textures::CompressionFormat, width: u32, height: u32, level: u32) -> u64 {
        format.estimated_level_bytes(width, height) + 4 * (level as u64 + 1)
    }
}

impl GraphicsDevice for MockDevice {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.mip_levels == 0 || desc.width == 0 || desc.height == 0 {
            return Err(Error::device(format!("invalid texture '{}'", desc.label)));
        }
        let mut state = self.state.borrow_mut();
        let id = state.allocate(ObjectKind::Texture);
        state.textures.insert(
            id,
            MockTexture {
                desc: desc.clone(),
                compressed_levels: HashMap::new(),
            },
        );
        Ok(TextureId(id))
    }

    fn upload_texture(&self, texture: TextureId, level: u32, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
        let state = self.state.borrow();
        let tex = state
            .textures
            .get(&texture.0)
            .ok_or_else(|| Error::device("upload into unknown texture"))?;
        if level >= tex.desc.mip_levels {
            return Err(Error::device(format!("level {} out of range", level)));
        }
        if rgba.len() != (width * height * 4) as usize {
            return Err(Error::device("pixel buffer size mismatch"));
        }
        Ok(())
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut state = self.state.borrow_mut();
        let found = state.textures.remove(&texture.0).is_some();
        state.bound_textures.retain(|_, t| *t != texture);
        state.release(ObjectKind::Texture, found);
    }

    fn create_depth_stencil(&self, width: u32, height: u32) -> Result<RenderbufferId> {
        let mut state = self.state.borrow_mut();
        let id = state.allocate(ObjectKind::Renderbuffer);
        state.renderbuffers.insert(id, (width, height));
        Ok(RenderbufferId(id))
    }

    fn delete_depth_stencil(&self, renderbuffer: RenderbufferId) {
        let mut state = self.state.borrow_mut();
        let found = state.renderbuffers.remove(&renderbuffer.0).is_some();
        state.release(ObjectKind::Renderbuffer, found);
    }

    fn create_framebuffer(&self, depth_stencil: RenderbufferId) -> Result<FramebufferId> {
        let mut state = self.state.borrow_mut();
        if state.fail == Some(FailPoint::CreateFramebuffer) {
            return Err(Error::device("framebuffer creation failed"));
        }
        if !state.renderbuffers.contains_key(&depth_stencil.0) {
            return Err(Error::device("unknown depth-stencil attachment"));
        }
        let id = state.allocate(ObjectKind::Framebuffer);
        state.framebuffers.insert(id, None);
        Ok(FramebufferId(id))
    }

    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId, level: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let tex = state
            .textures
            .get(&texture.0)
            .ok_or_else(|| Error::device("attach of unknown texture"))?;
        if !tex.desc.renderable || level >= tex.desc.mip_levels {
            return Err(Error::device("texture level is not attachable"));
        }
        let slot = state
            .framebuffers
            .get_mut(&framebuffer.0)
            .ok_or_else(|| Error::device("unknown framebuffer"))?;
        *slot = Some((texture, level));
        Ok(())
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        self.state.borrow_mut().bound_framebuffer = framebuffer;
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut state = self.state.borrow_mut();
        let found = state.framebuffers.remove(&framebuffer.0).is_some();
        if state.bound_framebuffer == Some(framebuffer) {
            state.bound_framebuffer = None;
        }
        state.release(ObjectKind::Framebuffer, found);
    }

    fn create_shader_program(&self, source: &ShaderSource) -> Result<ProgramId> {
        let mut state = self.state.borrow_mut();
        match state.fail {
            Some(FailPoint::ShaderCompile(stage)) => {
                return Err(Error::ShaderCompile {
                    stage,
                    log: "syntax error".to_string(),
                })
            }
            Some(FailPoint::ShaderLink) => {
                return Err(Error::ShaderLink {
                    log: "missing entry point".to_string(),
                })
            }
            _ => {}
        }
        if source.vertex.is_empty() || source.fragment.is_empty() {
            return Err(Error::ShaderLink {
                log: "empty stage".to_string(),
            });
        }
        let id = state.allocate(ObjectKind::Program);
        state.programs.insert(id, HashMap::new());
        Ok(ProgramId(id))
    }

    fn set_sampler_unit(&self, program: ProgramId, name: &str, unit: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let samplers = state
            .programs
            .get_mut(&program.0)
            .ok_or_else(|| Error::device("unknown program"))?;
        samplers.insert(name.to_string(), unit);
        Ok(())
    }

    fn delete_shader_program(&self, program: ProgramId) {
        let mut state = self.state.borrow_mut();
        let found = state.programs.remove(&program.0).is_some();
        state.release(ObjectKind::Program, found);
    }

    fn create_vertex_buffer(&self, data: &[f32]) -> Result<BufferId> {
        let mut state = self.state.borrow_mut();
        let id = state.allocate(ObjectKind::Buffer);
        state.buffers.insert(id, data.len());
        Ok(BufferId(id))
    }

    fn delete_vertex_buffer(&self, buffer: BufferId) {
        let mut state = self.state.borrow_mut();
        let found = state.buffers.remove(&buffer.0).is_some();
        state.release(ObjectKind::Buffer, found);
    }

    fn create_vertex_array(&self, buffer: BufferId, _layout: VertexLayout) -> Result<VertexArrayId> {
        let mut state = self.state.borrow_mut();
        if !state.buffers.contains_key(&buffer.0) {
            return Err(Error::device("unknown vertex buffer"));
        }
        let id = state.allocate(ObjectKind::VertexArray);
        state.vertex_arrays.insert(id, buffer);
        Ok(VertexArrayId(id))
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        let mut state = self.state.borrow_mut();
        let found = state.vertex_arrays.remove(&vertex_array.0).is_some();
        state.release(ObjectKind::VertexArray, found);
    }

    fn bind_texture(&self, unit: u32, texture: Option<TextureId>) {
        let mut state = self.state.borrow_mut();
        match texture {
            Some(texture) => state.bound_textures.insert(unit, texture),
            None => state.bound_textures.remove(&unit),
        };
    }

    fn set_viewport(&self, width: u32, height: u32) {
        self.state.borrow_mut().viewport = (width, height);
    }

    fn draw(&self, call: &DrawCall) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let samplers = state
            .programs
            .get(&call.program.0)
            .ok_or_else(|| Error::device("draw with unknown program"))?;
        if samplers.values().any(|unit| *unit != 0) {
            return Err(Error::device("sampler bound to a unit other than 0"));
        }
        if !state.vertex_arrays.contains_key(&call.vertex_array.0) {
            return Err(Error::device("draw with unknown vertex array"));
        }
        let framebuffer = state
            .bound_framebuffer
            .ok_or_else(|| Error::device("draw without a framebuffer"))?;
        let target = state
            .framebuffers
            .get(&framebuffer.0)
            .copied()
            .flatten()
            .ok_or_else(|| Error::device("framebuffer has no color attachment"))?;
        if state.fail == Some(FailPoint::Draw { level: target.1 }) {
            return Err(Error::device(format!("draw into level {} failed", target.1)));
        }
        let sampled = state
            .bound_textures
            .get(&0)
            .copied()
            .ok_or_else(|| Error::device("nothing bound on texture unit 0"))?;
        let viewport = state.viewport;
        state.draws.push(DrawRecord {
            target,
            viewport,
            sampled,
        });
        Ok(())
    }

    fn copy_framebuffer_to_texture(&self, destination: TextureId, level: u32, width: u32, height: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail == Some(FailPoint::Copy { level }) {
            return Err(Error::device(format!("copy into level {} failed", level)));
        }
        let framebuffer = state
            .bound_framebuffer
            .ok_or_else(|| Error::device("copy without a framebuffer"))?;
        let source = state
            .framebuffers
            .get(&framebuffer.0)
            .copied()
            .flatten()
            .ok_or_else(|| Error::device("framebuffer has no color attachment"))?;
        let tex = state
            .textures
            .get_mut(&destination.0)
            .ok_or_else(|| Error::device("copy into unknown texture"))?;
        let format = match tex.desc.format {
            TextureFormat::Compressed(format) => format,
            TextureFormat::Uncompressed(_) => return Err(Error::device("destination is not compressed")),
        };
        if level >= tex.desc.mip_levels {
            return Err(Error::device(format!("level {} out of range", level)));
        }
        let size = Self::level_size(format, width, height, level) as usize;
        tex.compressed_levels.insert(level, vec![0xA5; size]);
        state.copies.push(CopyRecord {
            source,
            destination,
            level,
            size: (width, height),
        });
        Ok(())
    }

    fn query_compressed_size(&self, texture: TextureId, level: u32) -> Result<u64> {
        let mut state = self.state.borrow_mut();
        let size = state
            .textures
            .get(&texture.0)
            .and_then(|t| t.compressed_levels.get(&level))
            .map(|data| data.len() as u64)
            .ok_or_else(|| Error::device(format!("level {} has no compressed image", level)))?;
        state.reported_sizes.push(size);
        Ok(size)
    }

    fn read_compressed_level(&self, texture: TextureId, level: u32) -> Result<Vec<u8>> {
        self.state
            .borrow()
            .textures
            .get(&texture.0)
            .and_then(|t| t.compressed_levels.get(&level))
            .cloned()
            .ok_or_else(|| Error::device(format!("level {} has no compressed image", level)))
    }
}

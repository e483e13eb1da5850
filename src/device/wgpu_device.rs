//! wgpu-backed graphics device
//!
//! Render passes go through wgpu render pipelines; block encoding runs on the
//! GPU via `block_compression` compute shaders and the encoded blocks are
//! written into a texture declared with the matching BC format.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;

use block_compression::{BC7Settings, CompressionVariant, GpuBlockCompressor};
use tracing::{debug, info};
use wgpu::util::DeviceExt;
use wgpu::{
    Backends, BufferDescriptor, BufferUsages, CommandEncoderDescriptor, Extent3d, Features, Instance,
    TextureDimension, TextureUsages, TextureViewDescriptor,
};

use super::{
    BufferId, DrawCall, FramebufferId, GraphicsDevice, PixelFormat, ProgramId, RenderbufferId,
    ShaderSource, TextureDesc, TextureFormat, TextureId, VertexArrayId, VertexLayout,
};
use crate::error::{Error, Result, ShaderStage};
use crate::textures::CompressionFormat;

const VERTEX_ENTRY: &str = "vs_main";
const FRAGMENT_ENTRY: &str = "fs_main";
const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// GPU information for display/selection
#[derive(Debug, Clone)]
pub struct GpuInfo {
    pub name: String,
    pub backend: String,
    pub device_type: String,
    pub adapter_index: usize,
}

impl std::fmt::Display for GpuInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.backend, self.device_type)
    }
}

struct TextureEntry {
    texture: wgpu::Texture,
    sampler: wgpu::Sampler,
    desc: TextureDesc,
    compressed_levels: HashMap<u32, Vec<u8>>,
}

struct FramebufferEntry {
    #[allow(dead_code)] // Attached for the framebuffer's lifetime, never bound to a pass
    depth_stencil: RenderbufferId,
    color: Option<(TextureId, u32)>,
}

struct ProgramEntry {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    samplers: HashMap<String, u32>,
    /// Linked pipelines, one per vertex layout drawn with
    pipelines: HashMap<VertexLayout, wgpu::RenderPipeline>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    textures: HashMap<u32, TextureEntry>,
    renderbuffers: HashMap<u32, wgpu::Texture>,
    framebuffers: HashMap<u32, FramebufferEntry>,
    programs: HashMap<u32, ProgramEntry>,
    buffers: HashMap<u32, wgpu::Buffer>,
    vertex_arrays: HashMap<u32, (BufferId, VertexLayout)>,
    bound_textures: HashMap<u32, TextureId>,
    bound_framebuffer: Option<FramebufferId>,
    viewport: (u32, u32),
}

impl State {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// A wgpu device driven through the GL-style [`GraphicsDevice`] model
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    compressor: RefCell<GpuBlockCompressor>,
    state: RefCell<State>,
    pub gpu_info: GpuInfo,
}

impl WgpuDevice {
    /// Initialize with automatic GPU selection
    pub fn new() -> Result<Self> {
        Self::with_gpu_index(None)
    }

    /// Initialize with a specific GPU index
    pub fn with_gpu_index(gpu_index: Option<usize>) -> Result<Self> {
        pollster::block_on(Self::new_async(gpu_index))
    }

    async fn new_async(gpu_index: Option<usize>) -> Result<Self> {
        info!("Initializing GPU device...");

        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: Backends::VULKAN | Backends::DX12 | Backends::METAL,
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(Backends::all()).await;

        if adapters.is_empty() {
            return Err(Error::device("No GPU found on this system"));
        }

        for (i, adapter) in adapters.iter().enumerate() {
            let info = adapter.get_info();
            info!(
                "GPU {}: {} ({:?}, {:?})",
                i, info.name, info.backend, info.device_type
            );
        }

        let (adapter_index, adapter) = match gpu_index {
            Some(idx) => {
                let adapter = adapters.get(idx).ok_or_else(|| {
                    Error::device(format!(
                        "GPU index {} out of range (found {} GPUs)",
                        idx,
                        adapters.len()
                    ))
                })?;
                (idx, adapter)
            }
            // Prefer discrete GPU, then Vulkan backend
            None => adapters
                .iter()
                .enumerate()
                .max_by_key(|(_, a)| {
                    let info = a.get_info();
                    let mut score = 0i32;
                    if info.device_type == wgpu::DeviceType::DiscreteGpu {
                        score += 100;
                    }
                    if info.backend == wgpu::Backend::Vulkan {
                        score += 10;
                    }
                    score
                })
                .ok_or_else(|| Error::device("No GPU found on this system"))?,
        };

        let adapter_info = adapter.get_info();
        let gpu_info = GpuInfo {
            name: adapter_info.name.clone(),
            backend: format!("{:?}", adapter_info.backend),
            device_type: format!("{:?}", adapter_info.device_type),
            adapter_index,
        };

        info!(
            "Selected GPU: {} ({}, {})",
            gpu_info.name, gpu_info.backend, gpu_info.device_type
        );

        // BC textures are optional; without them every compressed format fails
        let required_features = adapter.features() & Features::TEXTURE_COMPRESSION_BC;
        if required_features.is_empty() {
            info!("Adapter lacks BC texture compression; compressed textures unavailable");
        }

        let (device, queue) = adapter
            .request_device(&Self::device_descriptor(required_features))
            .await
            .map_err(|e| Error::device(format!("Failed to create GPU device: {}", e)))?;

        let device = Self::from_parts(device, queue, gpu_info);
        info!("GPU device initialized successfully");
        Ok(device)
    }

    /// A device on wgpu's no-op backend: full validation, no GPU work
    #[cfg(test)]
    pub(crate) fn noop() -> Self {
        let (device, queue) = wgpu::Device::noop(&Self::device_descriptor(Features::TEXTURE_COMPRESSION_BC));
        let gpu_info = GpuInfo {
            name: "noop".to_string(),
            backend: format!("{:?}", wgpu::Backend::Noop),
            device_type: format!("{:?}", wgpu::DeviceType::Other),
            adapter_index: 0,
        };
        Self::from_parts(device, queue, gpu_info)
    }

    fn device_descriptor(required_features: Features) -> wgpu::DeviceDescriptor<'static> {
        wgpu::DeviceDescriptor {
            label: Some("mipforge device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            ..Default::default()
        }
    }

    fn from_parts(device: wgpu::Device, queue: wgpu::Queue, gpu_info: GpuInfo) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let compressor = GpuBlockCompressor::new(device.clone(), queue.clone());

        Self {
            device,
            queue,
            bind_group_layout,
            compressor: RefCell::new(compressor),
            state: RefCell::new(State::default()),
            gpu_info,
        }
    }

    /// Get GPU information
    pub fn info(&self) -> &GpuInfo {
        &self.gpu_info
    }

    /// Whether the device can hold BC-compressed textures
    pub fn supports_compression(&self) -> bool {
        self.device.features().contains(Features::TEXTURE_COMPRESSION_BC)
    }

    fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| Error::device(format!("Failed to wait for the GPU: {}", e)))?;
        Ok(())
    }

    /// Run `f` inside a validation error scope
    ///
    /// wgpu reports validation failures through the device's error handler,
    /// which panics unless a scope captures them.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> std::result::Result<T, wgpu::Error> {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(scope.pop()) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    fn create_module(&self, source: &'static str, stage: ShaderStage) -> Result<wgpu::ShaderModule> {
        let label = match stage {
            ShaderStage::Vertex => "blit vertex",
            ShaderStage::Fragment => "blit fragment",
        };
        self.scoped(|| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            })
        })
        .map_err(|e| Error::ShaderCompile {
            stage,
            log: e.to_string(),
        })
    }

    /// Link a vertex/fragment pair into a render pipeline for `layout`
    fn link_pipeline(
        &self,
        vertex: &wgpu::ShaderModule,
        fragment: &wgpu::ShaderModule,
        layout: VertexLayout,
    ) -> Result<wgpu::RenderPipeline> {
        let format = match layout.components {
            1 => wgpu::VertexFormat::Float32,
            2 => wgpu::VertexFormat::Float32x2,
            3 => wgpu::VertexFormat::Float32x3,
            4 => wgpu::VertexFormat::Float32x4,
            n => return Err(Error::device(format!("unsupported vertex component count {}", n))),
        };
        let attributes = [wgpu::VertexAttribute {
            format,
            offset: 0,
            shader_location: 0,
        }];

        self.scoped(|| {
            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("blit pipeline layout"),
                bind_group_layouts: &[&self.bind_group_layout],
                ..Default::default()
            });

            self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("blit pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: vertex,
                    entry_point: Some(VERTEX_ENTRY),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: layout.stride_bytes as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: fragment,
                    entry_point: Some(FRAGMENT_ENTRY),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview_mask: None,
                cache: None,
            })
        })
        .map_err(|e| Error::ShaderLink { log: e.to_string() })
    }

    /// Run the compute encoder over one attached level and read the blocks back
    fn encode_level(
        &self,
        source: &wgpu::Texture,
        source_level: u32,
        variant: CompressionVariant,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        let view = source.create_view(&TextureViewDescriptor {
            label: Some("encode source level"),
            base_mip_level: source_level,
            mip_level_count: Some(1),
            ..Default::default()
        });

        let output_size = variant.blocks_byte_size(width, height) as u64;

        let staging_buffer = self
            .scoped(|| {
                let output_buffer = self.device.create_buffer(&BufferDescriptor {
                    label: Some("block output buffer"),
                    size: output_size,
                    usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                });

                let staging_buffer = self.device.create_buffer(&BufferDescriptor {
                    label: Some("block staging buffer"),
                    size: output_size,
                    usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });

                let mut compressor = self.compressor.borrow_mut();
                compressor.add_compression_task(variant, &view, width, height, &output_buffer, None, None);

                let mut encoder = self
                    .device
                    .create_command_encoder(&CommandEncoderDescriptor {
                        label: Some("block compression encoder"),
                    });

                {
                    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("block compression pass"),
                        timestamp_writes: None,
                    });
                    compressor.compress(&mut compute_pass);
                }

                encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_size);
                self.queue.submit(std::iter::once(encoder.finish()));
                staging_buffer
            })
            .map_err(|e| Error::device(format!("Block compression failed: {}", e)))?;

        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.wait_idle()?;
        rx.recv()
            .map_err(|_| Error::device("Channel closed"))?
            .map_err(|e| Error::device(format!("Failed to map buffer: {}", e)))?;

        let data = buffer_slice.get_mapped_range();
        let blocks = data.to_vec();

        drop(data);
        staging_buffer.unmap();

        Ok(blocks)
    }
}

fn compressed_texture_format(format: CompressionFormat) -> wgpu::TextureFormat {
    match format {
        CompressionFormat::RgbS3tcDxt1 | CompressionFormat::RgbaS3tcDxt1 => wgpu::TextureFormat::Bc1RgbaUnorm,
        CompressionFormat::RgbaS3tcDxt3 => wgpu::TextureFormat::Bc2RgbaUnorm,
        CompressionFormat::RgbaS3tcDxt5 => wgpu::TextureFormat::Bc3RgbaUnorm,
        CompressionFormat::RedRgtc1 => wgpu::TextureFormat::Bc4RUnorm,
        CompressionFormat::SignedRedRgtc1 => wgpu::TextureFormat::Bc4RSnorm,
        CompressionFormat::RedGreenRgtc2 => wgpu::TextureFormat::Bc5RgUnorm,
        CompressionFormat::SignedRedGreenRgtc2 => wgpu::TextureFormat::Bc5RgSnorm,
        CompressionFormat::RgbaBptc => wgpu::TextureFormat::Bc7RgbaUnorm,
    }
}

/// Compute encoder for a format, if one exists
fn compression_variant(format: CompressionFormat) -> Option<CompressionVariant> {
    match format {
        CompressionFormat::RgbS3tcDxt1 | CompressionFormat::RgbaS3tcDxt1 => Some(CompressionVariant::BC1),
        CompressionFormat::RgbaS3tcDxt3 => Some(CompressionVariant::BC2),
        CompressionFormat::RgbaS3tcDxt5 => Some(CompressionVariant::BC3),
        CompressionFormat::RedRgtc1 => Some(CompressionVariant::BC4),
        CompressionFormat::RedGreenRgtc2 => Some(CompressionVariant::BC5),
        CompressionFormat::RgbaBptc => Some(CompressionVariant::BC7(BC7Settings::alpha_basic())),
        CompressionFormat::SignedRedRgtc1 | CompressionFormat::SignedRedGreenRgtc2 => None,
    }
}

/// Parse and validate one WGSL stage before handing it to wgpu
fn validate_stage(source: &str, stage: ShaderStage, entry: &str) -> Result<()> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| Error::ShaderCompile {
        stage,
        log: e.emit_to_string(source),
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    );
    validator.validate(&module).map_err(|e| Error::ShaderCompile {
        stage,
        log: format!("{:?}", e),
    })?;

    let naga_stage = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry && ep.stage == naga_stage)
    {
        return Err(Error::ShaderLink {
            log: format!("no {} entry point named '{}'", stage, entry),
        });
    }
    Ok(())
}

impl GraphicsDevice for WgpuDevice {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(Error::device(format!(
                "texture '{}' size {}x{} outside 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }
        let max_levels = desc.width.max(desc.height).ilog2() + 1;
        if desc.mip_levels == 0 || desc.mip_levels > max_levels {
            return Err(Error::device(format!(
                "texture '{}' cannot have {} mip levels",
                desc.label, desc.mip_levels
            )));
        }

        let (format, usage) = match desc.format {
            // wgpu has no 3-channel 8-bit format; RGB sources arrive with opaque alpha
            TextureFormat::Uncompressed(PixelFormat::Rgb8 | PixelFormat::Rgba8) => {
                let mut usage = TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST;
                if desc.renderable {
                    usage |= TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC;
                }
                (COLOR_FORMAT, usage)
            }
            TextureFormat::Compressed(format) => {
                if !self.supports_compression() {
                    return Err(Error::device(format!(
                        "{} textures need BC compression support, which this device lacks",
                        format
                    )));
                }
                if desc.renderable {
                    return Err(Error::device("compressed textures cannot be render targets"));
                }
                if desc.width % 4 != 0 || desc.height % 4 != 0 {
                    return Err(Error::device(format!(
                        "{} requires dimensions divisible by 4, got {}x{}",
                        format, desc.width, desc.height
                    )));
                }
                (
                    compressed_texture_format(format),
                    TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                )
            }
        };

        let (texture, sampler) = self
            .scoped(|| {
                let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label),
                    size: Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: desc.mip_levels,
                    sample_count: 1,
                    dimension: TextureDimension::D2,
                    format,
                    usage,
                    view_formats: &[],
                });
                let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some(desc.label),
                    mag_filter: wgpu::FilterMode::Linear,
                    min_filter: wgpu::FilterMode::Linear,
                    ..Default::default()
                });
                (texture, sampler)
            })
            .map_err(|e| Error::device(format!("Failed to create texture '{}': {}", desc.label, e)))?;

        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.textures.insert(
            id,
            TextureEntry {
                texture,
                sampler,
                desc: desc.clone(),
                compressed_levels: HashMap::new(),
            },
        );
        debug!("Created texture '{}' #{} ({}x{}, {} levels)", desc.label, id, desc.width, desc.height, desc.mip_levels);
        Ok(TextureId(id))
    }

    fn upload_texture(&self, texture: TextureId, level: u32, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
        if rgba.len() != (width * height * 4) as usize {
            return Err(Error::device(format!(
                "Invalid RGBA data size: expected {} bytes, got {}",
                width * height * 4,
                rgba.len()
            )));
        }

        let state = self.state.borrow();
        let entry = state
            .textures
            .get(&texture.0)
            .ok_or_else(|| Error::device("upload into unknown texture"))?;
        let fits = level < entry.desc.mip_levels
            && width == (entry.desc.width >> level).max(1)
            && height == (entry.desc.height >> level).max(1);
        if !matches!(entry.desc.format, TextureFormat::Uncompressed(_)) || !fits {
            return Err(Error::device(format!("cannot upload pixels into level {} of '{}'", level, entry.desc.label)));
        }

        self.scoped(|| {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &entry.texture,
                    mip_level: level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                rgba,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            )
        })
        .map_err(|e| Error::device(format!("Failed to upload '{}': {}", entry.desc.label, e)))
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut state = self.state.borrow_mut();
        state.bound_textures.retain(|_, t| *t != texture);
        if let Some(entry) = state.textures.remove(&texture.0) {
            entry.texture.destroy();
        }
    }

    fn create_depth_stencil(&self, width: u32, height: u32) -> Result<RenderbufferId> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(Error::device(format!(
                "depth-stencil size {}x{} outside 1..={}",
                width, height, max
            )));
        }

        let texture = self
            .scoped(|| {
                self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("depth-stencil"),
                    size: Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: TextureDimension::D2,
                    format: wgpu::TextureFormat::Depth24PlusStencil8,
                    usage: TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
            })
            .map_err(|e| Error::device(format!("Failed to create depth-stencil: {}", e)))?;
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.renderbuffers.insert(id, texture);
        Ok(RenderbufferId(id))
    }

    fn delete_depth_stencil(&self, renderbuffer: RenderbufferId) {
        if let Some(texture) = self.state.borrow_mut().renderbuffers.remove(&renderbuffer.0) {
            texture.destroy();
        }
    }

    fn create_framebuffer(&self, depth_stencil: RenderbufferId) -> Result<FramebufferId> {
        let mut state = self.state.borrow_mut();
        if !state.renderbuffers.contains_key(&depth_stencil.0) {
            return Err(Error::device("unknown depth-stencil renderbuffer"));
        }
        let id = state.next_id();
        state.framebuffers.insert(
            id,
            FramebufferEntry {
                depth_stencil,
                color: None,
            },
        );
        Ok(FramebufferId(id))
    }

    fn attach_color(&self, framebuffer: FramebufferId, texture: TextureId, level: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .textures
            .get(&texture.0)
            .ok_or_else(|| Error::device("attach of unknown texture"))?;
        if !entry.desc.renderable || level >= entry.desc.mip_levels {
            return Err(Error::device(format!(
                "level {} of '{}' is not attachable",
                level, entry.desc.label
            )));
        }
        let framebuffer = state
            .framebuffers
            .get_mut(&framebuffer.0)
            .ok_or_else(|| Error::device("unknown framebuffer"))?;
        framebuffer.color = Some((texture, level));
        Ok(())
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        self.state.borrow_mut().bound_framebuffer = framebuffer;
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut state = self.state.borrow_mut();
        state.framebuffers.remove(&framebuffer.0);
        if state.bound_framebuffer == Some(framebuffer) {
            state.bound_framebuffer = None;
        }
    }

    fn create_shader_program(&self, source: &ShaderSource) -> Result<ProgramId> {
        validate_stage(source.vertex, ShaderStage::Vertex, VERTEX_ENTRY)?;
        validate_stage(source.fragment, ShaderStage::Fragment, FRAGMENT_ENTRY)?;

        let vertex = self.create_module(source.vertex, ShaderStage::Vertex)?;
        let fragment = self.create_module(source.fragment, ShaderStage::Fragment)?;

        // Stage interfaces and bindings only meet at pipeline creation
        let pipeline = self.link_pipeline(&vertex, &fragment, VertexLayout::POSITION_2D)?;

        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.programs.insert(
            id,
            ProgramEntry {
                vertex,
                fragment,
                samplers: HashMap::new(),
                pipelines: HashMap::from([(VertexLayout::POSITION_2D, pipeline)]),
            },
        );
        Ok(ProgramId(id))
    }

    fn set_sampler_unit(&self, program: ProgramId, name: &str, unit: u32) -> Result<()> {
        if unit != 0 {
            return Err(Error::device(format!("sampler '{}' must use texture unit 0", name)));
        }
        let mut state = self.state.borrow_mut();
        let entry = state
            .programs
            .get_mut(&program.0)
            .ok_or_else(|| Error::device("unknown shader program"))?;
        entry.samplers.insert(name.to_string(), unit);
        Ok(())
    }

    fn delete_shader_program(&self, program: ProgramId) {
        let mut state = self.state.borrow_mut();
        state.programs.remove(&program.0);
    }

    fn create_vertex_buffer(&self, data: &[f32]) -> Result<BufferId> {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        let buffer = self
            .scoped(|| {
                self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("vertex buffer"),
                    contents: &bytes,
                    usage: BufferUsages::VERTEX,
                })
            })
            .map_err(|e| Error::device(format!("Failed to create vertex buffer: {}", e)))?;
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.buffers.insert(id, buffer);
        Ok(BufferId(id))
    }

    fn delete_vertex_buffer(&self, buffer: BufferId) {
        if let Some(buffer) = self.state.borrow_mut().buffers.remove(&buffer.0) {
            buffer.destroy();
        }
    }

    fn create_vertex_array(&self, buffer: BufferId, layout: VertexLayout) -> Result<VertexArrayId> {
        let mut state = self.state.borrow_mut();
        if !state.buffers.contains_key(&buffer.0) {
            return Err(Error::device("unknown vertex buffer"));
        }
        let id = state.next_id();
        state.vertex_arrays.insert(id, (buffer, layout));
        Ok(VertexArrayId(id))
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        let mut state = self.state.borrow_mut();
        state.vertex_arrays.remove(&vertex_array.0);
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
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        let (buffer_id, layout) = *state
            .vertex_arrays
            .get(&call.vertex_array.0)
            .ok_or_else(|| Error::device("draw with unknown vertex array"))?;
        let program = state
            .programs
            .get_mut(&call.program.0)
            .ok_or_else(|| Error::device("draw with unknown shader program"))?;
        if !program.pipelines.contains_key(&layout) {
            let pipeline = self.link_pipeline(&program.vertex, &program.fragment, layout)?;
            program.pipelines.insert(layout, pipeline);
        }
        let pipeline = &program.pipelines[&layout];
        let buffer = state
            .buffers
            .get(&buffer_id.0)
            .ok_or_else(|| Error::device("vertex array refers to a deleted buffer"))?;

        let framebuffer = state
            .bound_framebuffer
            .and_then(|fb| state.framebuffers.get(&fb.0))
            .ok_or_else(|| Error::device("draw without a bound framebuffer"))?;
        let (target_id, target_level) = framebuffer
            .color
            .ok_or_else(|| Error::device("framebuffer has no color attachment"))?;
        let target = state
            .textures
            .get(&target_id.0)
            .ok_or_else(|| Error::device("color attachment was deleted"))?;

        let sampled_id = state
            .bound_textures
            .get(&0)
            .copied()
            .ok_or_else(|| Error::device("nothing bound on texture unit 0"))?;
        if sampled_id == target_id {
            return Err(Error::device("cannot sample the texture being rendered to"));
        }
        let sampled = state
            .textures
            .get(&sampled_id.0)
            .ok_or_else(|| Error::device("bound texture was deleted"))?;

        let (width, height) = state.viewport;
        let level_width = (target.desc.width >> target_level).max(1);
        let level_height = (target.desc.height >> target_level).max(1);
        if width == 0 || height == 0 || width > level_width || height > level_height {
            return Err(Error::device(format!(
                "viewport {}x{} outside attachment {}x{}",
                width, height, level_width, level_height
            )));
        }

        let target_view = target.texture.create_view(&TextureViewDescriptor {
            label: Some("color attachment"),
            base_mip_level: target_level,
            mip_level_count: Some(1),
            ..Default::default()
        });
        let sampled_view = sampled.texture.create_view(&TextureViewDescriptor::default());

        self.scoped(|| {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("blit bind group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&sampled_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampled.sampler),
                    },
                ],
            });

            let mut encoder = self
                .device
                .create_command_encoder(&CommandEncoderDescriptor {
                    label: Some("blit encoder"),
                });

            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("blit pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target_view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    ..Default::default()
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.set_vertex_buffer(0, buffer.slice(..));
                pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
                pass.draw(0..call.vertex_count, 0..1);
            }

            self.queue.submit(std::iter::once(encoder.finish()));
        })
        .map_err(|e| Error::device(format!("Draw failed: {}", e)))
    }

    fn copy_framebuffer_to_texture(&self, destination: TextureId, level: u32, width: u32, height: u32) -> Result<()> {
        let (source, source_level, format) = {
            let state = self.state.borrow();
            let framebuffer = state
                .bound_framebuffer
                .and_then(|fb| state.framebuffers.get(&fb.0))
                .ok_or_else(|| Error::device("copy without a bound framebuffer"))?;
            let (source_id, source_level) = framebuffer
                .color
                .ok_or_else(|| Error::device("framebuffer has no color attachment"))?;
            let source = state
                .textures
                .get(&source_id.0)
                .ok_or_else(|| Error::device("color attachment was deleted"))?;
            if width > (source.desc.width >> source_level) || height > (source.desc.height >> source_level) {
                return Err(Error::device(format!(
                    "copy region {}x{} exceeds attached level {}",
                    width, height, source_level
                )));
            }

            let destination = state
                .textures
                .get(&destination.0)
                .ok_or_else(|| Error::device("copy into unknown texture"))?;
            let format = match destination.desc.format {
                TextureFormat::Compressed(format) => format,
                TextureFormat::Uncompressed(_) => {
                    return Err(Error::device(format!("'{}' is not compressed", destination.desc.label)))
                }
            };
            if level >= destination.desc.mip_levels {
                return Err(Error::device(format!("level {} out of range for '{}'", level, destination.desc.label)));
            }
            (source.texture.clone(), source_level, format)
        };

        let variant = compression_variant(format)
            .ok_or_else(|| Error::device(format!("no GPU encoder available for {}", format)))?;

        debug!("GPU encoding {}: {}x{} level {}", format, width, height, level);
        let blocks = self.encode_level(&source, source_level, variant, width, height)?;

        let mut state = self.state.borrow_mut();
        let entry = state
            .textures
            .get_mut(&destination.0)
            .ok_or_else(|| Error::device("destination was deleted during the copy"))?;

        self.scoped(|| {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &entry.texture,
                    mip_level: level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &blocks,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(width.div_ceil(4) * format.block_bytes()),
                    rows_per_image: None,
                },
                Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            )
        })
        .map_err(|e| Error::device(format!("Failed to store level {}: {}", level, e)))?;
        entry.compressed_levels.insert(level, blocks);
        Ok(())
    }

    fn query_compressed_size(&self, texture: TextureId, level: u32) -> Result<u64> {
        // Encoding already waited on the device; the blocks are on hand
        self.state
            .borrow()
            .textures
            .get(&texture.0)
            .and_then(|t| t.compressed_levels.get(&level))
            .map(|blocks| blocks.len() as u64)
            .ok_or_else(|| Error::device(format!("level {} has no compressed image", level)))
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

/// List available GPUs
pub fn list_gpus() -> Vec<GpuInfo> {
    pollster::block_on(list_gpus_async())
}

async fn list_gpus_async() -> Vec<GpuInfo> {
    let instance = Instance::new(&wgpu::InstanceDescriptor {
        backends: Backends::VULKAN | Backends::DX12 | Backends::METAL,
        ..Default::default()
    });

    let adapters = instance.enumerate_adapters(Backends::all()).await;

    adapters
        .iter()
        .enumerate()
        .map(|(idx, adapter)| {
            let info = adapter.get_info();
            GpuInfo {
                name: info.name.clone(),
                backend: format!("{:?}", info.backend),
                device_type: format!("{:?}", info.device_type),
                adapter_index: idx,
            }
        })
        .collect()
}

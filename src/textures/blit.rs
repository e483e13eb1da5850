//! Full-screen blit pipeline
//!
//! A screen-covering quad that samples whatever is bound on texture unit 0.
//! Built once per [`Compressor`](super::Compressor) and reused by every pass.

use crate::device::{
    DrawCall, GraphicsDevice, ShaderProgram, ShaderSource, VertexArray, VertexBuffer, VertexLayout,
};
use crate::error::Result;

/// Two triangles covering clip space, as (x, y) pairs
pub const FULL_SCREEN_QUAD: [f32; 12] = [
    -1.0, -1.0, 1.0, -1.0, -1.0, 1.0, //
    1.0, -1.0, -1.0, 1.0, 1.0, 1.0,
];

const BLIT_VERTEX: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    let coords = (position + 1.0) * 0.5;
    out.tex_coords = vec2<f32>(coords.x, 1.0 - coords.y);
    out.position = vec4<f32>(position, 0.0, 1.0);
    return out;
}
"#;

const BLIT_FRAGMENT: &str = r#"
@group(0) @binding(0) var tex: texture_2d<f32>;
@group(0) @binding(1) var tex_sampler: sampler;

@fragment
fn fs_main(@location(0) tex_coords: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(tex, tex_sampler, tex_coords);
}
"#;

/// Shader pair used for every resample pass
pub const BLIT_SHADERS: ShaderSource = ShaderSource {
    vertex: BLIT_VERTEX,
    fragment: BLIT_FRAGMENT,
};

/// Name of the sampled texture in [`BLIT_SHADERS`]
pub const SAMPLER_NAME: &str = "tex";

pub struct BlitPipeline<'d, D: GraphicsDevice + ?Sized> {
    program: ShaderProgram<'d, D>,
    vertex_array: VertexArray<'d, D>,
    // Declared last: the array references it
    _vertex_buffer: VertexBuffer<'d, D>,
}

impl<'d, D: GraphicsDevice + ?Sized> BlitPipeline<'d, D> {
    pub fn new(device: &'d D, shaders: &ShaderSource) -> Result<Self> {
        let program = ShaderProgram::new(device, shaders)?;
        program.set_sampler_unit(SAMPLER_NAME, 0)?;

        let vertex_buffer = VertexBuffer::new(device, &FULL_SCREEN_QUAD)?;
        let vertex_array = VertexArray::new(
            device,
            &vertex_buffer,
            VertexLayout::POSITION_2D,
        )?;

        Ok(Self {
            program,
            vertex_array,
            _vertex_buffer: vertex_buffer,
        })
    }

    /// Draw the quad into the bound framebuffer and viewport
    pub fn draw(&self, device: &D) -> Result<()> {
        device.draw(&DrawCall {
            program: self.program.id(),
            vertex_array: self.vertex_array.id(),
            vertex_count: (FULL_SCREEN_QUAD.len() / 2) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{FailPoint, MockDevice, ObjectKind};
    use crate::error::{Error, ShaderStage};

    #[test]
    fn test_pipeline_owns_three_objects() {
        let device = MockDevice::new();
        let pipeline = BlitPipeline::new(&device, &BLIT_SHADERS).unwrap();
        assert_eq!(device.live(ObjectKind::Program), 1);
        assert_eq!(device.live(ObjectKind::Buffer), 1);
        assert_eq!(device.live(ObjectKind::VertexArray), 1);

        drop(pipeline);
        assert_eq!(device.live(ObjectKind::Program), 0);
        assert_eq!(device.live(ObjectKind::Buffer), 0);
        assert_eq!(device.live(ObjectKind::VertexArray), 0);
        assert_eq!(device.double_frees(), 0);
    }

    #[test]
    fn test_compile_error_surfaces() {
        let device = MockDevice::failing_at(FailPoint::ShaderCompile(ShaderStage::Fragment));
        let err = BlitPipeline::new(&device, &BLIT_SHADERS).err().unwrap();
        assert!(matches!(
            err,
            Error::ShaderCompile {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
        assert_eq!(device.total_created(), 0);
    }

    #[test]
    fn test_quad_covers_clip_space() {
        let xs: Vec<f32> = FULL_SCREEN_QUAD.iter().step_by(2).copied().collect();
        let ys: Vec<f32> = FULL_SCREEN_QUAD.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(xs.len(), 6);
        assert!(xs.iter().all(|x| x.abs() == 1.0));
        assert!(ys.iter().all(|y| y.abs() == 1.0));
    }
}

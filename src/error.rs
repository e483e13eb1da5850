//! Error types for the compression pipeline
//!
//! Every variant is terminal for the `compress` call that produced it.

use std::path::PathBuf;

/// Shader stage a compile diagnostic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
        }
    }
}

/// Errors raised by the decoder, the device and the pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to open image file {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image must be RGB or RGBA, got {channels} channel(s)")]
    UnsupportedFormat { channels: u8 },

    #[error("Base width must be a power of two >= 16, got {width}")]
    InvalidBaseWidth { width: u32 },

    #[error("Failed to compile {stage} shader: {log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    #[error("Failed to link shader program: {log}")]
    ShaderLink { log: String },

    #[error("Device error: {0}")]
    DeviceResource(String),
}

impl Error {
    pub(crate) fn device(message: impl Into<String>) -> Self {
        Error::DeviceResource(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Hardware block-compression formats the device can encode into

/// Closed set of compressed internal formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    /// BC1 without alpha
    RgbS3tcDxt1,
    /// BC1 with 1-bit alpha
    RgbaS3tcDxt1,
    /// BC2, explicit 4-bit alpha
    RgbaS3tcDxt3,
    /// BC3, interpolated alpha
    RgbaS3tcDxt5,
    /// BC4 unsigned, single channel
    RedRgtc1,
    /// BC4 signed
    SignedRedRgtc1,
    /// BC5 unsigned, two channels
    RedGreenRgtc2,
    /// BC5 signed
    SignedRedGreenRgtc2,
    /// BC7
    RgbaBptc,
}

impl CompressionFormat {
    /// Every format, in cycling order
    pub const ALL: [CompressionFormat; 9] = [
        CompressionFormat::RgbS3tcDxt1,
        CompressionFormat::RgbaS3tcDxt1,
        CompressionFormat::RgbaS3tcDxt3,
        CompressionFormat::RgbaS3tcDxt5,
        CompressionFormat::RedRgtc1,
        CompressionFormat::SignedRedRgtc1,
        CompressionFormat::RedGreenRgtc2,
        CompressionFormat::SignedRedGreenRgtc2,
        CompressionFormat::RgbaBptc,
    ];

    /// Get format name for logging
    pub fn name(self) -> &'static str {
        match self {
            CompressionFormat::RgbS3tcDxt1 => "RGB_S3TC_DXT1",
            CompressionFormat::RgbaS3tcDxt1 => "RGBA_S3TC_DXT1",
            CompressionFormat::RgbaS3tcDxt3 => "RGBA_S3TC_DXT3",
            CompressionFormat::RgbaS3tcDxt5 => "RGBA_S3TC_DXT5",
            CompressionFormat::RedRgtc1 => "RED_RGTC1",
            CompressionFormat::SignedRedRgtc1 => "SIGNED_RED_RGTC1",
            CompressionFormat::RedGreenRgtc2 => "RED_GREEN_RGTC2",
            CompressionFormat::SignedRedGreenRgtc2 => "SIGNED_RED_GREEN_RGTC2",
            CompressionFormat::RgbaBptc => "RGBA_BPTC",
        }
    }

    /// The OpenGL internal format enum for this format
    pub fn gl_enum(self) -> u32 {
        match self {
            CompressionFormat::RgbS3tcDxt1 => 0x83F0,
            CompressionFormat::RgbaS3tcDxt1 => 0x83F1,
            CompressionFormat::RgbaS3tcDxt3 => 0x83F2,
            CompressionFormat::RgbaS3tcDxt5 => 0x83F3,
            CompressionFormat::RedRgtc1 => 0x8DBB,
            CompressionFormat::SignedRedRgtc1 => 0x8DBC,
            CompressionFormat::RedGreenRgtc2 => 0x8DBD,
            CompressionFormat::SignedRedGreenRgtc2 => 0x8DBE,
            CompressionFormat::RgbaBptc => 0x8E8C,
        }
    }

    /// Bytes per encoded 4x4 block
    pub fn block_bytes(self) -> u32 {
        match self {
            CompressionFormat::RgbS3tcDxt1
            | CompressionFormat::RgbaS3tcDxt1
            | CompressionFormat::RedRgtc1
            | CompressionFormat::SignedRedRgtc1 => 8,
            CompressionFormat::RgbaS3tcDxt3
            | CompressionFormat::RgbaS3tcDxt5
            | CompressionFormat::RedGreenRgtc2
            | CompressionFormat::SignedRedGreenRgtc2
            | CompressionFormat::RgbaBptc => 16,
        }
    }

    /// Naive size estimate for one level; the device is the authority
    pub fn estimated_level_bytes(self, width: u32, height: u32) -> u64 {
        let blocks_wide = width.div_ceil(4) as u64;
        let blocks_high = height.div_ceil(4) as u64;
        blocks_wide * blocks_high * self.block_bytes() as u64
    }

    /// The format following this one in `ALL`, wrapping around
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|f| *f == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        let upper = s.trim().to_uppercase().replace('-', "_");
        let name = upper.strip_prefix("COMPRESSED_").unwrap_or(&upper);
        match name {
            "RGB_S3TC_DXT1" | "DXT1" | "BC1" | "BC1_RGB" => Some(CompressionFormat::RgbS3tcDxt1),
            "RGBA_S3TC_DXT1" | "DXT1A" | "BC1_RGBA" => Some(CompressionFormat::RgbaS3tcDxt1),
            "RGBA_S3TC_DXT3" | "DXT3" | "BC2" => Some(CompressionFormat::RgbaS3tcDxt3),
            "RGBA_S3TC_DXT5" | "DXT5" | "BC3" => Some(CompressionFormat::RgbaS3tcDxt5),
            "RED_RGTC1" | "BC4" | "BC4_UNORM" => Some(CompressionFormat::RedRgtc1),
            "SIGNED_RED_RGTC1" | "BC4_SNORM" => Some(CompressionFormat::SignedRedRgtc1),
            "RED_GREEN_RGTC2" | "BC5" | "BC5_UNORM" => Some(CompressionFormat::RedGreenRgtc2),
            "SIGNED_RED_GREEN_RGTC2" | "BC5_SNORM" => Some(CompressionFormat::SignedRedGreenRgtc2),
            "RGBA_BPTC" | "RGBA_BPTC_UNORM" | "BC7" => Some(CompressionFormat::RgbaBptc),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

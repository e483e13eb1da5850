//! Source image decoding
//!
//! Wraps the `image` decoder. The pixel buffer is always normalized to RGBA8,
//! but validation uses the channel count the file was actually stored with.

use std::path::Path;

use image::RgbaImage;
use tracing::debug;

use crate::device::PixelFormat;
use crate::error::{Error, Result};

/// Decoded pixels plus the channel count detected in the file
#[derive(Debug)]
pub struct SourceImage {
    pixels: RgbaImage,
    channels: u8,
}

impl SourceImage {
    /// Decode `path` and check it is RGB or RGBA
    pub fn load(path: &Path) -> Result<Self> {
        let decoded = image::open(path).map_err(|source| Error::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let channels = decoded.color().channel_count();
        debug!(
            "Decoded {}: {}x{}, {} channel(s)",
            path.display(),
            decoded.width(),
            decoded.height(),
            channels
        );

        Self::from_rgba(decoded.to_rgba8(), channels)
    }

    /// Wrap an already-normalized buffer, validating the original channel count
    pub fn from_rgba(pixels: RgbaImage, channels: u8) -> Result<Self> {
        if PixelFormat::from_channels(channels).is_none() {
            return Err(Error::UnsupportedFormat { channels });
        }
        Ok(Self { pixels, channels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Channel count detected before normalization
    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixel_format(&self) -> PixelFormat {
        if self.channels == 4 {
            PixelFormat::Rgba8
        } else {
            PixelFormat::Rgb8
        }
    }

    /// Tightly packed RGBA8 rows
    pub fn rgba(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba};
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub(crate) fn write_rgb(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join(name);
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]))
            .save(&path)
            .unwrap();
        path
    }

    pub(crate) fn write_rgba(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join(name);
        image::RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 64, 200]))
            .save(&path)
            .unwrap();
        path
    }

    pub(crate) fn write_gray(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join(name);
        GrayImage::from_fn(width, height, |x, _| Luma([x as u8]))
            .save(&path)
            .unwrap();
        path
    }

    /// A `.png` whose contents are not an image
    pub(crate) fn write_corrupt(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"definitely not a png").unwrap();
        path
    }

    #[test]
    fn test_load_rgb_normalizes_to_rgba() {
        let dir = TempDir::new().unwrap();
        let path = write_rgb(&dir, "rgb.png", 20, 10);

        let image = SourceImage::load(&path).unwrap();
        assert_eq!(image.channels(), 3);
        assert_eq!(image.pixel_format(), PixelFormat::Rgb8);
        assert_eq!((image.width(), image.height()), (20, 10));
        assert_eq!(image.rgba().len(), 20 * 10 * 4);
        assert_eq!(image.rgba()[3], 255);
    }

    #[test]
    fn test_load_rgba() {
        let dir = TempDir::new().unwrap();
        let path = write_rgba(&dir, "rgba.png", 8, 8);

        let image = SourceImage::load(&path).unwrap();
        assert_eq!(image.channels(), 4);
        assert_eq!(image.pixel_format(), PixelFormat::Rgba8);
        assert_eq!(image.rgba()[3], 200);
    }

    #[test]
    fn test_grayscale_rejected_despite_normalization() {
        let dir = TempDir::new().unwrap();
        let path = write_gray(&dir, "gray.png", 8, 8);

        let err = SourceImage::load(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { channels: 1 }));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = SourceImage::load(&dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, Error::ImageLoad { .. }));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = write_corrupt(&dir, "corrupt.png");

        let err = SourceImage::load(&path).unwrap_err();
        assert!(matches!(err, Error::ImageLoad { .. }));
    }
}

//! Immutable descriptions of a pixel buffer and its encoding.

use crate::error::{FramecastError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGB (24 bits per pixel)
    Rgb8,
    /// 8-bit RGBA (32 bits per pixel)
    Rgba8,
    /// 16-bit unsigned RGBA (64 bits per pixel)
    Rgba16,
    /// 16-bit RGBA half-float (64 bits per pixel)
    RgbaF16,
    /// 32-bit RGBA float (128 bits per pixel)
    RgbaF32,
    /// Packed 10-bit 4:2:2 YCbCr: 16 bytes per group of 6 samples.
    /// Width must be divisible by 6.
    Yuv10Bit422,
}

impl PixelFormat {
    /// Total bytes needed for a frame of this format.
    pub fn byte_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::Rgb8 => w * h * 3,
            Self::Rgba8 => w * h * 4,
            Self::Rgba16 | Self::RgbaF16 => w * h * 8,
            Self::RgbaF32 => w * h * 16,
            Self::Yuv10Bit422 => (w / 6) * 16 * h,
        }
    }

    /// Whether this is a packed (non-RGB-family) format.
    pub fn is_packed(self) -> bool {
        matches!(self, Self::Yuv10Bit422)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb8 => "RGB_8BIT",
            Self::Rgba8 => "RGBA_8BIT",
            Self::Rgba16 => "RGBA_16BIT",
            Self::RgbaF16 => "RGBA_FLOAT_16BIT",
            Self::RgbaF32 => "RGBA_FLOAT_32BIT",
            Self::Yuv10Bit422 => "YUV_10BIT_422",
        };
        f.write_str(name)
    }
}

/// Transfer function of the encoded values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transfer {
    Bt709,
    Bt601,
    Srgb,
    Linear,
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bt709 => "BT_709",
            Self::Bt601 => "BT_601",
            Self::Srgb => "SRGB",
            Self::Linear => "LINEAR",
        };
        f.write_str(name)
    }
}

/// Chromaticity of the primaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chromaticity {
    Bt709,
    Bt601,
    Srgb,
}

impl fmt::Display for Chromaticity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bt709 => "BT_709",
            Self::Bt601 => "BT_601",
            Self::Srgb => "SRGB",
        };
        f.write_str(name)
    }
}

/// Vertical origin of the first row in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    LowerLeft,
    UpperLeft,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LowerLeft => "LOWER_LEFT",
            Self::UpperLeft => "UPPER_LEFT",
        };
        f.write_str(name)
    }
}

/// Immutable description of a pixel buffer and its encoding.
///
/// Construction validates the dimensional invariants, so a value of this
/// type always describes a representable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageFormat {
    width: u32,
    height: u32,
    transfer: Transfer,
    chromaticity: Chromaticity,
    pixel_format: PixelFormat,
    origin: Origin,
}

impl ImageFormat {
    /// Create a new format description.
    ///
    /// Fails if width or height is zero, or if the packed 10-bit format
    /// is requested with a width not divisible by 6 (one coded group
    /// covers 6 samples).
    pub fn new(
        width: u32,
        height: u32,
        transfer: Transfer,
        chromaticity: Chromaticity,
        pixel_format: PixelFormat,
        origin: Origin,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(FramecastError::Configuration(format!(
                "image dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        if pixel_format == PixelFormat::Yuv10Bit422 && width % 6 != 0 {
            return Err(FramecastError::Configuration(format!(
                "packed 10-bit width must be divisible by 6, got {}",
                width
            )));
        }
        Ok(Self {
            width,
            height,
            transfer,
            chromaticity,
            pixel_format,
            origin,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn transfer(&self) -> Transfer {
        self.transfer
    }

    pub fn chromaticity(&self) -> Chromaticity {
        self.chromaticity
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Number of bytes one image carrying this format occupies.
    pub fn byte_size(&self) -> usize {
        self.pixel_format.byte_size(self.width, self.height)
    }

    /// A format identical to this one except for the pixel format.
    ///
    /// Fails when the new pixel format's invariants do not hold for the
    /// current dimensions.
    pub fn with_pixel_format(&self, pixel_format: PixelFormat) -> Result<Self> {
        Self::new(
            self.width,
            self.height,
            self.transfer,
            self.chromaticity,
            pixel_format,
            self.origin,
        )
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} (transfer {}, chromaticity {}, origin {})",
            self.width, self.height, self.pixel_format, self.transfer, self.chromaticity, self.origin
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v210_1080p() -> ImageFormat {
        ImageFormat::new(
            1920,
            1080,
            Transfer::Bt709,
            Chromaticity::Bt709,
            PixelFormat::Yuv10Bit422,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    #[test]
    fn test_packed_byte_size() {
        // 1920 / 6 groups of 16 bytes per row
        assert_eq!(v210_1080p().byte_size(), 320 * 16 * 1080);
    }

    #[test]
    fn test_rgb_byte_sizes() {
        let f = ImageFormat::new(
            1920,
            1080,
            Transfer::Srgb,
            Chromaticity::Srgb,
            PixelFormat::Rgb8,
            Origin::LowerLeft,
        )
        .unwrap();
        assert_eq!(f.byte_size(), 1920 * 1080 * 3);
        assert_eq!(
            f.with_pixel_format(PixelFormat::RgbaF32).unwrap().byte_size(),
            1920 * 1080 * 16
        );
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let err = ImageFormat::new(
            0,
            1080,
            Transfer::Bt709,
            Chromaticity::Bt709,
            PixelFormat::Rgb8,
            Origin::UpperLeft,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_packed_width_divisibility() {
        let err = ImageFormat::new(
            1921,
            1080,
            Transfer::Bt709,
            Chromaticity::Bt709,
            PixelFormat::Yuv10Bit422,
            Origin::UpperLeft,
        );
        assert!(matches!(err, Err(FramecastError::Configuration(_))));
    }

    #[test]
    fn test_value_comparison() {
        assert_eq!(v210_1080p(), v210_1080p());
        let other = v210_1080p().with_pixel_format(PixelFormat::Rgba8).unwrap();
        assert_ne!(v210_1080p(), other);
    }
}

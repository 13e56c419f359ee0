//! Portable pixel formats

use serde::{Deserialize, Serialize};

/// Pixel format of a captured frame, independent of the capture backend.
///
/// Serialized by variant index; add new formats at the end rather than
/// reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    None,
    Custom,
    Translucent,
    Transparent,
    Opaque,
    Rgba8888,
    Rgbx8888,
    Rgb888,
    Rgb565,
    Bgra8888,
    Rgba5551,
    Rgba4444,
    /// Backend reported a format outside the known set; the frame is still
    /// usable as opaque bytes via its stride and size.
    Unknown,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats
    pub fn bytes_per_pixel(self) -> Option<u8> {
        match self {
            Self::Rgba8888 | Self::Rgbx8888 | Self::Bgra8888 => Some(4),
            Self::Rgb888 => Some(3),
            Self::Rgb565 | Self::Rgba5551 | Self::Rgba4444 => Some(2),
            _ => None,
        }
    }
}

//! Captured frame data structures

use std::fmt;

use bytes::Bytes;
use shared_protocol::{FrameHeader, PixelFormat};

/// A captured frame, borrowed from the buffer queue's locked slot.
///
/// The pixel data is not copied; it stays valid until the next
/// `wait_for_frame`, `apply_config_changes` or `release` call on the
/// controller that produced it.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Raw pixel data, `stride`-padded rows
    pub data: &'a [u8],
    /// Pixel format
    pub format: PixelFormat,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Row pitch in pixels (>= width)
    pub stride: u32,
    /// Bytes per pixel, 0 for non-packed formats
    pub bytes_per_pixel: u8,
    /// `stride * height * bytes_per_pixel`
    pub size: u32,
    /// Producer-side frame counter
    pub frame_number: u64,
    /// Queue timestamp in nanoseconds
    pub timestamp_ns: i64,
}

impl<'a> Frame<'a> {
    /// Wire description of this frame's layout
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            format: self.format,
            width: self.width,
            height: self.height,
            stride: self.stride,
            bpp: self.bytes_per_pixel,
            size: self.size,
        }
    }

    /// Pixel rows with the stride padding cut off
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + use<'a> {
        let data = self.data;
        let bpp = self.bytes_per_pixel as usize;
        let row_pitch = self.stride as usize * bpp;
        let row_bytes = self.width as usize * bpp;
        let height = if row_pitch == 0 { 0 } else { self.height as usize };

        data.chunks(row_pitch.max(1))
            .take(height)
            .map(move |row| &row[..row_bytes.min(row.len())])
    }

    /// Copy the pixel data out of the locked buffer
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.data)
    }
}

impl fmt::Display for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame#{}({}x{} stride={} {:?}, {} bytes)",
            self.frame_number, self.width, self.height, self.stride, self.format, self.size
        )
    }
}

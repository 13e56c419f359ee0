//! Frame layout description for downstream consumers

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{PROTOCOL_VERSION, PixelFormat, ProtocolError, ProtocolResult};

/// Memory layout of one captured frame.
///
/// Pixel rows are `stride` pixels apart; `size = stride * height * bpp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Row pitch in pixels
    pub stride: u32,
    /// Bytes per pixel
    pub bpp: u8,
    /// Total byte size of the pixel data
    pub size: u32,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    header: FrameHeader,
}

impl FrameHeader {
    /// Build a header, deriving `size` from the layout
    pub fn new(format: PixelFormat, width: u32, height: u32, stride: u32, bpp: u8) -> Self {
        Self {
            format,
            width,
            height,
            stride,
            bpp,
            size: stride
                .saturating_mul(height)
                .saturating_mul(bpp as u32),
        }
    }

    /// Check that `size` agrees with `stride * height * bpp`
    pub fn validate(&self) -> ProtocolResult<()> {
        let expected = self.stride as u64 * self.height as u64 * self.bpp as u64;
        if expected != self.size as u64 {
            return Err(ProtocolError::SizeMismatch {
                declared: self.size,
                expected,
            });
        }
        Ok(())
    }

    /// Byte length of one unpadded row
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bpp as usize
    }

    /// Serialize to bytes for transmission
    pub fn to_bytes(&self) -> ProtocolResult<Bytes> {
        let encoded = bincode::serialize(&Envelope {
            version: PROTOCOL_VERSION,
            header: *self,
        })?;
        Ok(Bytes::from(encoded))
    }

    /// Deserialize from received bytes
    pub fn from_bytes(data: &[u8]) -> ProtocolResult<Self> {
        let envelope: Envelope = bincode::deserialize(data)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: envelope.version,
            });
        }
        envelope.header.validate()?;
        Ok(envelope.header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_derivation() {
        let header = FrameHeader::new(PixelFormat::Rgba8888, 540, 960, 544, 4);
        assert_eq!(header.size, 544 * 960 * 4);
        assert_eq!(header.row_bytes(), 540 * 4);
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_rejects_inconsistent_size() {
        let mut header = FrameHeader::new(PixelFormat::Rgb565, 10, 10, 16, 2);
        header.size += 1;
        let bytes = header.to_bytes().unwrap();
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_other_version() {
        let header = FrameHeader::new(PixelFormat::Bgra8888, 4, 4, 4, 4);
        let bytes = bincode::serialize(&Envelope {
            version: PROTOCOL_VERSION + 1,
            header,
        })
        .unwrap();
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::VersionMismatch { .. })
        ));
    }
}

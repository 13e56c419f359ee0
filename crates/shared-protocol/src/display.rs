//! Display geometry snapshots

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Display rotation, in clockwise quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Orientation {
    #[default]
    Rotation0 = 0,
    Rotation90 = 1,
    Rotation180 = 2,
    Rotation270 = 3,
}

impl Orientation {
    /// Parse a quarter-turn count (0-3)
    pub fn from_quarter_turns(turns: u8) -> Option<Self> {
        match turns {
            0 => Some(Self::Rotation0),
            1 => Some(Self::Rotation90),
            2 => Some(Self::Rotation180),
            3 => Some(Self::Rotation270),
            _ => None,
        }
    }

    /// Parse a rotation in degrees (0, 90, 180 or 270)
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Rotation0),
            90 => Some(Self::Rotation90),
            180 => Some(Self::Rotation180),
            270 => Some(Self::Rotation270),
            _ => None,
        }
    }

    pub fn quarter_turns(self) -> u8 {
        self as u8
    }

    pub fn degrees(self) -> u32 {
        self.quarter_turns() as u32 * 90
    }

    /// Whether this rotation swaps width and height
    pub fn is_transposed(self) -> bool {
        matches!(self, Self::Rotation90 | Self::Rotation270)
    }
}

impl TryFrom<u8> for Orientation {
    type Error = ProtocolError;

    fn try_from(turns: u8) -> Result<Self, Self::Error> {
        Self::from_quarter_turns(turns).ok_or(ProtocolError::InvalidOrientation(turns as u32))
    }
}

impl From<Orientation> for u8 {
    fn from(orientation: Orientation) -> Self {
        orientation.quarter_turns()
    }
}

/// Immutable snapshot of a display's geometry and timing
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Current rotation
    pub orientation: Orientation,
    /// Refresh rate in Hz
    pub fps: f32,
    /// Logical density factor
    pub density: f32,
    /// Physical pixels per inch, horizontally
    pub xdpi: f32,
    /// Physical pixels per inch, vertically
    pub ydpi: f32,
    /// Whether the display accepts secure content
    pub secure: bool,
    /// Diagonal size in inches
    pub size: f32,
}

impl DisplayInfo {
    /// Geometry-only info, as used for desired/real capture settings
    pub fn with_geometry(width: u32, height: u32, orientation: Orientation) -> Self {
        Self {
            width,
            height,
            orientation,
            fps: 0.0,
            density: 0.0,
            xdpi: 0.0,
            ydpi: 0.0,
            secure: false,
            size: 0.0,
        }
    }
}

/// Diagonal size in inches, `sqrt((w/xdpi)^2 + (h/ydpi)^2)`.
///
/// Returns 0 when either density is not positive, since the physical size is
/// unknown in that case.
pub fn diagonal_inches(width: u32, height: u32, xdpi: f32, ydpi: f32) -> f32 {
    if xdpi <= 0.0 || ydpi <= 0.0 {
        return 0.0;
    }

    let w = width as f32 / xdpi;
    let h = height as f32 / ydpi;
    (w * w + h * h).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_conversions() {
        assert_eq!(Orientation::from_degrees(270), Some(Orientation::Rotation270));
        assert_eq!(Orientation::from_degrees(45), None);
        assert_eq!(Orientation::Rotation90.degrees(), 90);
        assert!(Orientation::Rotation90.is_transposed());
        assert!(!Orientation::Rotation180.is_transposed());
        assert!(Orientation::try_from(4u8).is_err());
    }

    #[test]
    fn test_diagonal_inches() {
        // 3x4 inch panel at 100 dpi
        let size = diagonal_inches(300, 400, 100.0, 100.0);
        assert!((size - 5.0).abs() < 1e-4);
        assert_eq!(diagonal_inches(300, 400, 0.0, 100.0), 0.0);
    }
}

//! Native pixel format translation

use shared_protocol::PixelFormat;

/// Native pixel format codes of the platform graphics stack
pub mod native {
    pub const NONE: i32 = 0;
    pub const CUSTOM: i32 = -4;
    pub const TRANSLUCENT: i32 = -3;
    pub const TRANSPARENT: i32 = -2;
    pub const OPAQUE: i32 = -1;
    pub const RGBA_8888: i32 = 1;
    pub const RGBX_8888: i32 = 2;
    pub const RGB_888: i32 = 3;
    pub const RGB_565: i32 = 4;
    pub const BGRA_8888: i32 = 5;
    pub const RGBA_5551: i32 = 6;
    pub const RGBA_4444: i32 = 7;
}

/// Map a native format code to the portable enum. Unrecognized codes become
/// [`PixelFormat::Unknown`].
pub fn to_portable(code: i32) -> PixelFormat {
    match code {
        native::NONE => PixelFormat::None,
        native::CUSTOM => PixelFormat::Custom,
        native::TRANSLUCENT => PixelFormat::Translucent,
        native::TRANSPARENT => PixelFormat::Transparent,
        native::OPAQUE => PixelFormat::Opaque,
        native::RGBA_8888 => PixelFormat::Rgba8888,
        native::RGBX_8888 => PixelFormat::Rgbx8888,
        native::RGB_888 => PixelFormat::Rgb888,
        native::RGB_565 => PixelFormat::Rgb565,
        native::BGRA_8888 => PixelFormat::Bgra8888,
        native::RGBA_5551 => PixelFormat::Rgba5551,
        native::RGBA_4444 => PixelFormat::Rgba4444,
        _ => PixelFormat::Unknown,
    }
}

/// Bytes per pixel of a native format code, 0 when not a packed format
pub fn bytes_per_pixel(code: i32) -> u8 {
    match code {
        native::RGBA_8888 | native::RGBX_8888 | native::BGRA_8888 => 4,
        native::RGB_888 => 3,
        native::RGB_565 | native::RGBA_5551 | native::RGBA_4444 => 2,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognized_codes() {
        let table = [
            (native::NONE, PixelFormat::None),
            (native::CUSTOM, PixelFormat::Custom),
            (native::TRANSLUCENT, PixelFormat::Translucent),
            (native::TRANSPARENT, PixelFormat::Transparent),
            (native::OPAQUE, PixelFormat::Opaque),
            (native::RGBA_8888, PixelFormat::Rgba8888),
            (native::RGBX_8888, PixelFormat::Rgbx8888),
            (native::RGB_888, PixelFormat::Rgb888),
            (native::RGB_565, PixelFormat::Rgb565),
            (native::BGRA_8888, PixelFormat::Bgra8888),
            (native::RGBA_5551, PixelFormat::Rgba5551),
            (native::RGBA_4444, PixelFormat::Rgba4444),
        ];

        for (code, expected) in table {
            assert_eq!(to_portable(code), expected, "code {}", code);
        }
    }

    #[test]
    fn test_unrecognized_codes_are_unknown() {
        for code in [8, 0x11, 0x22, 42, -5, i32::MAX, i32::MIN] {
            assert_eq!(to_portable(code), PixelFormat::Unknown);
        }
    }

    #[test]
    fn test_bytes_per_pixel_agrees_with_portable_format() {
        for code in -8..16 {
            let bpp = bytes_per_pixel(code);
            assert_eq!(to_portable(code).bytes_per_pixel().unwrap_or(0), bpp);
        }
    }
}

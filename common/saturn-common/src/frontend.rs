//! Types shared between the video core and whatever presents its output

use bincode::{Decode, Encode};
use saturn_proc_macros::{EnumAll, EnumDisplay, EnumFromStr};

/// 8 bits per channel color in the pixel format delivered by the frame-ready callback.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable, Encode, Decode,
)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    #[must_use]
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Expand a 15-bit xBGR color (5 bits per channel, red in the low bits).
    #[must_use]
    #[inline]
    pub const fn from_rgb555(value: u16) -> Self {
        let r = (value & 0x1F) as u8;
        let g = ((value >> 5) & 0x1F) as u8;
        let b = ((value >> 10) & 0x1F) as u8;
        Self::rgb((r << 3) | (r >> 2), (g << 3) | (g >> 2), (b << 3) | (b >> 2))
    }

    /// Decode a 24-bit xBGR color (red in the low byte).
    #[must_use]
    #[inline]
    pub const fn from_rgb888(value: u32) -> Self {
        Self::rgb(value as u8, (value >> 8) as u8, (value >> 16) as u8)
    }
}

impl Default for Color {
    #[inline]
    fn default() -> Self {
        Self::BLACK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, EnumDisplay, EnumFromStr, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimingMode {
    #[default]
    Ntsc,
    Pal,
}

//! VDP2: background layer compositor

pub mod compositor;
pub mod cram;
pub mod registers;
pub mod rotation;
pub mod window;

use bincode::{Decode, Encode};
use saturn_common::boxedarray::BoxedByteArray;
use saturn_proc_macros::{EnumAll, EnumDisplay};

use crate::vdp2::cram::ColorRam;
use crate::vdp2::registers::Vdp2Registers;

pub const VRAM_LEN: usize = 512 * 1024;

pub type Vram = BoxedByteArray<VRAM_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, EnumDisplay, EnumAll)]
pub enum Layer {
    Sprite,
    Rbg0,
    Rbg1,
    Nbg0,
    Nbg1,
    Nbg2,
    Nbg3,
}

pub const LAYER_COUNT: usize = Layer::ALL.len();

impl Layer {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit position shared by the per-layer fields of the color calculation, color offset, special
    /// function, and shadow registers. RBG1 uses the NBG0 slot.
    #[must_use]
    pub(crate) fn control_slot(self) -> u8 {
        match self {
            Self::Nbg0 | Self::Rbg1 => 0,
            Self::Nbg1 => 1,
            Self::Nbg2 => 2,
            Self::Nbg3 => 3,
            Self::Rbg0 => 4,
            Self::Sprite => 6,
        }
    }
}

/// Which layers can currently be displayed, accounting for background enable bits and the
/// hardware restrictions that some layer configurations place on others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct LayerAvailability([bool; LAYER_COUNT]);

impl LayerAvailability {
    #[must_use]
    pub fn from_enabled(enabled: [bool; LAYER_COUNT]) -> Self {
        Self(enabled)
    }

    #[inline]
    #[must_use]
    pub fn get(&self, layer: Layer) -> bool {
        self.0[layer.index()]
    }

    #[must_use]
    pub fn enabled_layers(&self) -> Vec<Layer> {
        Layer::ALL.into_iter().filter(|&layer| self.get(layer)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum ColorFormat {
    #[default]
    Palette16,
    Palette256,
    Palette2048,
    Rgb555,
    Rgb888,
}

impl ColorFormat {
    #[must_use]
    pub fn bits_per_dot(self) -> u32 {
        match self {
            Self::Palette16 => 4,
            Self::Palette256 => 8,
            Self::Palette2048 | Self::Rgb555 => 16,
            Self::Rgb888 => 32,
        }
    }

    #[must_use]
    pub fn is_rgb(self) -> bool {
        matches!(self, Self::Rgb555 | Self::Rgb888)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum InterlaceMode {
    #[default]
    None,
    SingleDensity,
    DoubleDensity,
}

/// Copy of the VDP2 state a compositor needs to keep its private mirror in sync.
#[derive(Debug, Clone)]
pub struct Vdp2Snapshot {
    pub vram: Vram,
    pub cram: ColorRam,
    pub registers: Vdp2Registers,
}

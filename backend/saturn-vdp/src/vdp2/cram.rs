//! VDP2 color RAM
//!
//! Color RAM is built from two SRAM chips. In the RGB555 modes the bus address maps linearly onto
//! the chips; in RGB888 mode bus address bit 1 selects the chip, so a 32-bit color entry is split
//! across both chips at the same chip-local offset.

use bincode::{Decode, Encode};
use saturn_common::boxedarray::BoxedByteArray;
use saturn_common::frontend::Color;
use saturn_common::num::{read_u16, write_u16};
use saturn_proc_macros::{FakeDecode, FakeEncode};

pub const CRAM_LEN: usize = 4 * 1024;
const CRAM_MASK: usize = CRAM_LEN - 1;
const ENTRIES: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum CramMode {
    #[default]
    Rgb555Colors1024,
    Rgb555Colors2048,
    Rgb888Colors1024,
}

impl CramMode {
    #[must_use]
    pub fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Rgb555Colors1024,
            1 => Self::Rgb555Colors2048,
            2 => Self::Rgb888Colors1024,
            _ => {
                log::warn!("Prohibited color RAM mode 3 selected; treating as RGB888");
                Self::Rgb888Colors1024
            }
        }
    }

    fn entry_mask(self) -> usize {
        match self {
            Self::Rgb555Colors1024 | Self::Rgb888Colors1024 => 0x3FF,
            Self::Rgb555Colors2048 => 0x7FF,
        }
    }
}

/// Map a bus address to its storage address in RGB888 mode.
#[inline]
#[must_use]
pub fn shuffle(address: usize) -> usize {
    ((address & 2) << 10) | ((address >> 1) & 0x7FE) | (address & 1)
}

#[inline]
#[must_use]
pub fn unshuffle(address: usize) -> usize {
    ((address >> 10) & 2) | ((address << 1) & 0xFFC) | (address & 1)
}

#[derive(Debug, Clone, FakeEncode, FakeDecode)]
struct ColorCache {
    colors: Box<[Color; ENTRIES]>,
    msb: Box<[bool; ENTRIES]>,
}

impl Default for ColorCache {
    fn default() -> Self {
        let Ok(colors) = vec![Color::BLACK; ENTRIES].into_boxed_slice().try_into() else {
            unreachable!("allocated with exactly ENTRIES colors")
        };
        Self { colors, msb: Box::new([false; ENTRIES]) }
    }
}

/// Raw color RAM plus a cache of entries pre-converted to output colors.
///
/// The cache is not persisted; call [`ColorRam::rebuild_cache`] after decoding.
#[derive(Debug, Clone, Encode, Decode)]
pub struct ColorRam {
    ram: BoxedByteArray<CRAM_LEN>,
    mode: CramMode,
    cache: ColorCache,
}

impl Default for ColorRam {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorRam {
    #[must_use]
    pub fn new() -> Self {
        Self { ram: BoxedByteArray::new(), mode: CramMode::default(), cache: ColorCache::default() }
    }

    #[must_use]
    pub fn mode(&self) -> CramMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CramMode) {
        if mode != self.mode {
            log::debug!("Color RAM mode changed to {mode:?}");
            self.mode = mode;
            self.rebuild_cache();
        }
    }

    fn storage_address(&self, address: usize) -> usize {
        let address = address & CRAM_MASK;
        match self.mode {
            CramMode::Rgb888Colors1024 => shuffle(address),
            CramMode::Rgb555Colors1024 | CramMode::Rgb555Colors2048 => address,
        }
    }

    #[must_use]
    pub fn read_byte(&self, address: u32) -> u8 {
        self.ram[self.storage_address(address as usize)]
    }

    #[must_use]
    pub fn read_word(&self, address: u32) -> u16 {
        read_u16(&self.ram[..], self.storage_address(address as usize & !1))
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        let storage = self.storage_address(address as usize);
        self.ram[storage] = value;
        self.update_cache(storage);
    }

    pub fn write_word(&mut self, address: u32, value: u16) {
        let storage = self.storage_address(address as usize & !1);
        write_u16(&mut self.ram[..], storage, value);
        self.update_cache(storage);
    }

    /// Raw 16-bit word by storage address, used for coefficient tables placed in color RAM.
    #[must_use]
    pub fn storage_word(&self, storage_address: usize) -> u16 {
        read_u16(&self.ram[..], storage_address)
    }

    #[inline]
    #[must_use]
    pub fn color(&self, index: u32) -> Color {
        self.cache.colors[index as usize & self.mode.entry_mask()]
    }

    /// Bit 15 (RGB555) or bit 31 (RGB888) of the color entry.
    #[inline]
    #[must_use]
    pub fn color_msb(&self, index: u32) -> bool {
        self.cache.msb[index as usize & self.mode.entry_mask()]
    }

    pub fn rebuild_cache(&mut self) {
        for entry in 0..ENTRIES {
            self.update_entry(entry);
        }
    }

    fn update_cache(&mut self, storage: usize) {
        match self.mode {
            CramMode::Rgb888Colors1024 => self.update_entry((storage & 0x7FE) >> 1),
            CramMode::Rgb555Colors1024 | CramMode::Rgb555Colors2048 => {
                self.update_entry(storage >> 1);
            }
        }
    }

    fn update_entry(&mut self, entry: usize) {
        let (color, msb) = match self.mode {
            CramMode::Rgb888Colors1024 => {
                let offset = (entry & 0x3FF) << 1;
                let high = read_u16(&self.ram[..], offset);
                let low = read_u16(&self.ram[..], 0x800 | offset);
                let value = (u32::from(high) << 16) | u32::from(low);
                (Color::from_rgb888(value), value & 0x8000_0000 != 0)
            }
            CramMode::Rgb555Colors1024 | CramMode::Rgb555Colors2048 => {
                let value = read_u16(&self.ram[..], entry << 1);
                (Color::from_rgb555(value), value & 0x8000 != 0)
            }
        };
        self.cache.colors[entry] = color;
        self.cache.msb[entry] = msb;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn shuffle_is_a_bijection() {
        let mut seen = vec![false; CRAM_LEN];
        for address in 0..CRAM_LEN {
            let shuffled = shuffle(address);
            assert!(!seen[shuffled]);
            seen[shuffled] = true;
            assert_eq!(unshuffle(shuffled), address);
        }
    }

    #[test]
    fn rgb555_entries() {
        let mut cram = ColorRam::new();
        cram.write_word(0x0002, 0x801F);
        assert_eq!(cram.color(1), Color::rgb(255, 0, 0));
        assert!(cram.color_msb(1));
        assert_eq!(cram.read_word(0x0002), 0x801F);

        // 1024-color mode mirrors the upper half of the index space
        assert_eq!(cram.color(0x401), Color::rgb(255, 0, 0));
        cram.set_mode(CramMode::Rgb555Colors2048);
        assert_eq!(cram.color(0x401), Color::BLACK);
    }

    #[test]
    fn rgb888_entries_span_both_chips() {
        let mut cram = ColorRam::new();
        cram.set_mode(CramMode::Rgb888Colors1024);

        // Entry 3 = bus addresses 0x0C-0x0F
        cram.write_word(0x0C, 0x8012);
        cram.write_word(0x0E, 0x3456);
        assert_eq!(cram.color(3), Color::rgb(0x56, 0x34, 0x12));
        assert!(cram.color_msb(3));
        assert_eq!(cram.read_word(0x0E), 0x3456);

        // The same data read back after a mode switch reflects the chip layout
        cram.set_mode(CramMode::Rgb555Colors2048);
        assert_eq!(cram.read_word(0x06), 0x8012);
        assert_eq!(cram.read_word(0x806), 0x3456);
    }
}

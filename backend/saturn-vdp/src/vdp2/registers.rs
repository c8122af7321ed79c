//! VDP2 register file
//!
//! Registers are stored as raw words and decoded into per-layer parameter snapshots when a scanline
//! is drawn. Derived state that other components query between scanlines (layer availability) is
//! recomputed on every write that affects it.

use crate::vdp2::cram::CramMode;
use crate::vdp2::{ColorFormat, InterlaceMode, LAYER_COUNT, Layer, LayerAvailability};
use bincode::{Decode, Encode};
use saturn_common::define_bit_enum;
use saturn_common::num::GetBit;

pub const TVMD: u32 = 0x000;
pub const EXTEN: u32 = 0x002;
pub const TVSTAT: u32 = 0x004;
pub const VRSIZE: u32 = 0x006;
pub const HCNT: u32 = 0x008;
pub const VCNT: u32 = 0x00A;
pub const RAMCTL: u32 = 0x00E;
pub const BGON: u32 = 0x020;
pub const MZCTL: u32 = 0x022;
pub const SFSEL: u32 = 0x024;
pub const SFCODE: u32 = 0x026;
pub const CHCTLA: u32 = 0x028;
pub const CHCTLB: u32 = 0x02A;
pub const BMPNA: u32 = 0x02C;
pub const BMPNB: u32 = 0x02E;
pub const PNCN0: u32 = 0x030;
pub const PNCR: u32 = 0x038;
pub const PLSZ: u32 = 0x03A;
pub const MPOFN: u32 = 0x03C;
pub const MPOFR: u32 = 0x03E;
pub const MPABN0: u32 = 0x040;
pub const MPABRA: u32 = 0x050;
pub const MPABRB: u32 = 0x060;
pub const SCXIN0: u32 = 0x070;
pub const SCXN2: u32 = 0x090;
pub const ZMCTL: u32 = 0x098;
pub const SCRCTL: u32 = 0x09A;
pub const VCSTAU: u32 = 0x09C;
pub const LSTA0U: u32 = 0x0A0;
pub const LCTAU: u32 = 0x0A8;
pub const BKTAU: u32 = 0x0AC;
pub const RPMD: u32 = 0x0B0;
pub const RPRCTL: u32 = 0x0B2;
pub const KTCTL: u32 = 0x0B4;
pub const KTAOF: u32 = 0x0B6;
pub const OVPNRA: u32 = 0x0B8;
pub const RPTAU: u32 = 0x0BC;
pub const WPSX0: u32 = 0x0C0;
pub const WCTLA: u32 = 0x0D0;
pub const LWTA0U: u32 = 0x0D8;
pub const SPCTL: u32 = 0x0E0;
pub const SDCTL: u32 = 0x0E2;
pub const CRAOFA: u32 = 0x0E4;
pub const CRAOFB: u32 = 0x0E6;
pub const LNCLEN: u32 = 0x0E8;
pub const SFPRMD: u32 = 0x0EA;
pub const CCCTL: u32 = 0x0EC;
pub const SFCCMD: u32 = 0x0EE;
pub const PRISA: u32 = 0x0F0;
pub const PRINA: u32 = 0x0F8;
pub const PRIR: u32 = 0x0FC;
pub const CCRSA: u32 = 0x100;
pub const CCRNA: u32 = 0x108;
pub const CCRR: u32 = 0x10C;
pub const CCRLB: u32 = 0x10E;
pub const CLOFEN: u32 = 0x110;
pub const CLOFSL: u32 = 0x112;
pub const COAR: u32 = 0x114;

pub const REGISTER_WORDS: usize = 0x90;
const ADDRESS_MASK: u32 = 0x1FE;

const VERSION: u16 = 0;

define_bit_enum!(CharacterSize, [OneByOne, TwoByTwo]);
define_bit_enum!(WindowLogic, [Or, And]);

/// Fixed-point values throughout the compositor use 16 fractional bits.
pub const FRACTION_BITS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapParams {
    pub width: u32,
    pub height: u32,
    pub palette: u32,
    pub special_priority: bool,
    pub special_cc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternParams {
    pub one_word: bool,
    /// 1-word pattern names use 12-bit character numbers with no flip bits
    pub extended_character: bool,
    pub special_priority: bool,
    pub special_cc: bool,
    pub supplement_palette: u32,
    pub supplement_character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowControl {
    pub w0_enabled: bool,
    pub w0_outside: bool,
    pub w1_enabled: bool,
    pub w1_outside: bool,
    pub sprite_enabled: bool,
    pub sprite_outside: bool,
    pub logic: WindowLogic,
}

impl WindowControl {
    fn from_byte(byte: u16) -> Self {
        Self {
            w0_outside: byte.bit(0),
            w0_enabled: byte.bit(1),
            w1_outside: byte.bit(2),
            w1_enabled: byte.bit(3),
            sprite_outside: byte.bit(4),
            sprite_enabled: byte.bit(5),
            logic: WindowLogic::from_bit(byte.bit(7)),
        }
    }

    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.w0_enabled || self.w1_enabled || self.sprite_enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialPriorityMode {
    PerScreen,
    PerCharacter,
    PerDot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCcMode {
    PerScreen,
    PerCharacter,
    PerDot,
    ColorMsb,
}

/// Rotation backgrounds use 16 planes; normal backgrounds only fill the first 4.
pub const MAX_PLANES: usize = 16;

pub type PlaneMaps = [u32; MAX_PLANES];

/// Parameters shared by every background layer, captured once per scanline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgParams {
    pub layer: Layer,
    pub transparency: bool,
    pub format: ColorFormat,
    pub bitmap: Option<BitmapParams>,
    pub character_size: CharacterSize,
    pub pattern: PatternParams,
    /// Plane size in pages
    pub plane_width: u32,
    pub plane_height: u32,
    /// Map numbers for planes A-D (normal) or A-P (rotation)
    pub maps: PlaneMaps,
    pub cram_offset: u32,
    pub priority: u8,
    pub special_priority: SpecialPriorityMode,
    pub special_cc: SpecialCcMode,
    pub special_codes: u8,
    pub cc_enabled: bool,
    pub cc_ratio: u8,
    pub line_color_insert: bool,
    pub color_offset: Option<usize>,
    pub shadow_enabled: bool,
    pub window: WindowControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineScrollParams {
    pub x: bool,
    pub y: bool,
    pub zoom_x: bool,
    pub interval_shift: u32,
    pub table_address: u32,
}

impl LineScrollParams {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.x || self.y || self.zoom_x
    }
}

/// Scroll state for a normal background; all values use [`FRACTION_BITS`] fractional bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NbgScroll {
    pub x: i64,
    pub y: i64,
    pub zoom_x: i64,
    pub zoom_y: i64,
    pub line_scroll: LineScrollParams,
    pub vertical_cell_scroll: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpriteColorMode {
    PaletteOnly,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteParams {
    pub sprite_type: u8,
    pub window_enabled: bool,
    pub color_mode: SpriteColorMode,
    pub cc_number: u8,
    pub cc_condition: u8,
    pub priorities: [u8; 8],
    pub cc_ratios: [u8; 8],
    pub cram_offset: u32,
    pub cc_enabled: bool,
    pub line_color_insert: bool,
    pub color_offset: Option<usize>,
    pub window: WindowControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorCalcParams {
    pub additive: bool,
    pub ratio_from_second: bool,
    pub line_color_ratio: u8,
    pub back_ratio: u8,
    pub line_color_cc_enabled: bool,
    pub window: WindowControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub line_table: Option<u32>,
}

fn color_format(bits: u16, layer: Layer) -> ColorFormat {
    match bits {
        0 => ColorFormat::Palette16,
        1 => ColorFormat::Palette256,
        2 => ColorFormat::Palette2048,
        3 => ColorFormat::Rgb555,
        4 => ColorFormat::Rgb888,
        _ => {
            log::warn!("Prohibited {layer} color format {bits}; treating as 16 colors");
            ColorFormat::Palette16
        }
    }
}

fn plane_size(bits: u16) -> (u32, u32) {
    match bits & 3 {
        0 => (1, 1),
        1 => (2, 1),
        _ => (2, 2),
    }
}

fn table_address(upper: u16, lower: u16) -> u32 {
    ((u32::from(upper & 7) << 16) | u32::from(lower)) << 1
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Vdp2Registers {
    raw: [u16; REGISTER_WORDS],
    availability: LayerAvailability,
}

impl Default for Vdp2Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Vdp2Registers {
    #[must_use]
    pub fn new() -> Self {
        Self { raw: [0; REGISTER_WORDS], availability: LayerAvailability::default() }
    }

    #[inline]
    #[must_use]
    pub fn raw(&self, address: u32) -> u16 {
        self.raw[((address & ADDRESS_MASK) >> 1) as usize]
    }

    /// Read as seen through the bus. Counter and status registers are owned by the timing
    /// controller and are not handled here.
    #[must_use]
    pub fn read(&self, address: u32) -> u16 {
        match address & ADDRESS_MASK {
            TVMD => self.raw(TVMD),
            VRSIZE => (self.raw(VRSIZE) & 0x8000) | VERSION,
            RAMCTL => self.raw(RAMCTL),
            _ => {
                log::debug!("Read from write-only VDP2 register {address:03X}");
                0
            }
        }
    }

    pub fn write(&mut self, address: u32, value: u16) {
        let address = address & ADDRESS_MASK;
        if matches!(address, TVSTAT | HCNT | VCNT) {
            log::debug!("Write to read-only VDP2 register {address:03X}: {value:04X}");
            return;
        }

        self.raw[(address >> 1) as usize] = value;
        log::trace!("VDP2 register write {address:03X}: {value:04X}");

        match address {
            TVMD => {
                log::trace!("  Display enabled: {}", value.bit(15));
                log::trace!("  Interlace: {:?}", self.interlace());
                log::trace!("  HRESO={} VRESO={}", value.bits(0..=2), value.bits(4..=5));
            }
            RAMCTL => {
                log::trace!("  Color RAM mode: {:?}", self.cram_mode());
                log::trace!("  Coefficients in color RAM: {}", value.bit(15));
            }
            BGON | CHCTLA | CHCTLB => {
                self.update_availability();
                log::trace!("  Layer availability: {:?}", self.availability.enabled_layers());
            }
            _ => {}
        }
    }

    /// Merge a byte write into the containing word and return the resulting word.
    pub fn write_byte(&mut self, address: u32, value: u8) -> u16 {
        let current = self.raw(address);
        let word = if address & 1 == 0 {
            (current & 0x00FF) | (u16::from(value) << 8)
        } else {
            (current & 0xFF00) | u16::from(value)
        };
        self.write(address & !1, word);
        word
    }

    #[must_use]
    pub fn availability(&self) -> LayerAvailability {
        self.availability
    }

    fn update_availability(&mut self) {
        let bgon = self.raw(BGON);
        let rbg0 = bgon.bit(4);
        let rbg1 = rbg0 && bgon.bit(5);

        let nbg0_format = self.nbg_format(0);
        let nbg1_format = self.nbg_format(1);

        // RBG1 takes over the VRAM access slots of NBG0 and NBG1
        let nbg0 = bgon.bit(0) && !rbg1;
        let nbg1 = bgon.bit(1) && !rbg1 && nbg0_format != ColorFormat::Rgb888;
        let nbg2 = bgon.bit(2)
            && !(nbg0 && matches!(
                nbg0_format,
                ColorFormat::Palette2048 | ColorFormat::Rgb555 | ColorFormat::Rgb888
            ));
        let nbg3 = bgon.bit(3)
            && !(nbg0 && nbg0_format == ColorFormat::Rgb888)
            && !(nbg1 && matches!(nbg1_format, ColorFormat::Palette2048 | ColorFormat::Rgb555));

        let mut enabled = [false; LAYER_COUNT];
        enabled[Layer::Sprite.index()] = true;
        enabled[Layer::Rbg0.index()] = rbg0;
        enabled[Layer::Rbg1.index()] = rbg1;
        enabled[Layer::Nbg0.index()] = nbg0;
        enabled[Layer::Nbg1.index()] = nbg1;
        enabled[Layer::Nbg2.index()] = nbg2;
        enabled[Layer::Nbg3.index()] = nbg3;
        self.availability = LayerAvailability::from_enabled(enabled);
    }

    // TVMD / EXTEN / RAMCTL

    #[must_use]
    pub fn display_enabled(&self) -> bool {
        self.raw(TVMD).bit(15)
    }

    /// When the display is disabled, show the back screen color instead of black.
    #[must_use]
    pub fn border_shows_back_color(&self) -> bool {
        self.raw(TVMD).bit(8)
    }

    #[must_use]
    pub fn interlace(&self) -> InterlaceMode {
        match self.raw(TVMD).bits(6..=7) {
            2 => InterlaceMode::SingleDensity,
            3 => InterlaceMode::DoubleDensity,
            _ => InterlaceMode::None,
        }
    }

    #[must_use]
    pub fn horizontal_resolution(&self) -> u16 {
        self.raw(TVMD).bits(0..=2)
    }

    #[must_use]
    pub fn vertical_resolution(&self) -> u16 {
        self.raw(TVMD).bits(4..=5)
    }

    #[must_use]
    pub fn external_latch_enabled(&self) -> bool {
        self.raw(EXTEN).bit(9)
    }

    #[must_use]
    pub fn cram_mode(&self) -> CramMode {
        CramMode::from_bits(self.raw(RAMCTL).bits(12..=13))
    }

    #[must_use]
    pub fn coefficients_in_cram(&self) -> bool {
        self.raw(RAMCTL).bit(15)
    }

    // Per-layer decoding

    fn nbg_format(&self, n: u32) -> ColorFormat {
        let (chctla, chctlb) = (self.raw(CHCTLA), self.raw(CHCTLB));
        match n {
            0 => color_format(chctla.bits(4..=6), Layer::Nbg0),
            1 => color_format(chctla.bits(12..=13), Layer::Nbg1),
            2 => color_format(chctlb.bits(1..=1), Layer::Nbg2),
            _ => color_format(chctlb.bits(5..=5), Layer::Nbg3),
        }
    }

    fn bitmap_params(&self, layer: Layer) -> Option<BitmapParams> {
        let (chctla, chctlb) = (self.raw(CHCTLA), self.raw(CHCTLB));
        let (enabled, size, bmpn) = match layer {
            Layer::Nbg0 => (chctla.bit(1), chctla.bits(2..=3), self.raw(BMPNA)),
            Layer::Nbg1 => (chctla.bit(9), chctla.bits(10..=11), self.raw(BMPNA) >> 8),
            Layer::Rbg0 => (chctlb.bit(9), u16::from(chctlb.bit(10)), self.raw(BMPNB)),
            _ => return None,
        };
        if !enabled {
            return None;
        }

        let (width, height) = match (layer, size) {
            (Layer::Rbg0, 0) => (512, 256),
            (Layer::Rbg0, _) => (512, 512),
            (_, 0) => (512, 256),
            (_, 1) => (512, 512),
            (_, 2) => (1024, 256),
            _ => (1024, 512),
        };

        Some(BitmapParams {
            width,
            height,
            palette: u32::from(bmpn.bits(0..=2)),
            special_priority: bmpn.bit(4),
            special_cc: bmpn.bit(5),
        })
    }

    fn pattern_params(&self, register: u32) -> PatternParams {
        let value = self.raw(register);
        PatternParams {
            one_word: value.bit(15),
            extended_character: value.bit(14),
            special_priority: value.bit(9),
            special_cc: value.bit(8),
            supplement_palette: u32::from(value.bits(5..=7)),
            supplement_character: u32::from(value.bits(0..=4)),
        }
    }

    fn window_control(&self, slot: u32) -> WindowControl {
        let register = WCTLA + 2 * (slot / 2);
        let value = self.raw(register);
        WindowControl::from_byte(if slot % 2 == 0 { value & 0xFF } else { value >> 8 })
    }

    fn color_offset_select(&self, slot: u8) -> Option<usize> {
        self.raw(CLOFEN).bit(slot).then(|| usize::from(self.raw(CLOFSL).bit(slot)))
    }

    /// Common parameters for a background layer. RBG1 uses the NBG0 format and pattern registers
    /// with the rotation parameter B maps.
    #[must_use]
    pub fn bg_params(&self, layer: Layer) -> BgParams {
        let (chctla, chctlb) = (self.raw(CHCTLA), self.raw(CHCTLB));
        let bgon = self.raw(BGON);
        let slot = layer.control_slot();
        let plsz = self.raw(PLSZ);

        let (format, character_size, pattern_register, transparency_bit, plane_bits, window_slot) =
            match layer {
                Layer::Nbg0 => (self.nbg_format(0), chctla.bit(0), PNCN0, 8, plsz.bits(0..=1), 0),
                Layer::Nbg1 => (self.nbg_format(1), chctla.bit(8), PNCN0 + 2, 9, plsz.bits(2..=3), 1),
                Layer::Nbg2 => (self.nbg_format(2), chctlb.bit(0), PNCN0 + 4, 10, plsz.bits(4..=5), 2),
                Layer::Nbg3 => (self.nbg_format(3), chctlb.bit(4), PNCN0 + 6, 11, plsz.bits(6..=7), 3),
                Layer::Rbg0 => (
                    color_format(chctlb.bits(12..=14), Layer::Rbg0),
                    chctlb.bit(8),
                    PNCR,
                    12,
                    plsz.bits(8..=9),
                    4,
                ),
                Layer::Rbg1 | Layer::Sprite => {
                    (self.nbg_format(0), chctla.bit(0), PNCN0, 8, plsz.bits(12..=13), 0)
                }
            };
        let (plane_width, plane_height) = plane_size(plane_bits);

        let maps = match layer {
            Layer::Nbg0 | Layer::Nbg1 | Layer::Nbg2 | Layer::Nbg3 => {
                let n = u32::from(slot);
                let offset = u32::from(self.raw(MPOFN).bits((4 * n) as u8..=(4 * n + 2) as u8));
                self.map_numbers(MPABN0 + 4 * n, 4, offset)
            }
            Layer::Rbg0 => {
                // RBG0 follows parameter A; parameter B maps are used when switching to B
                let offset = u32::from(self.raw(MPOFR).bits(0..=2));
                self.map_numbers(MPABRA, 16, offset)
            }
            Layer::Rbg1 | Layer::Sprite => {
                let offset = u32::from(self.raw(MPOFR).bits(4..=6));
                self.map_numbers(MPABRB, 16, offset)
            }
        };

        let cram_offset = match layer {
            Layer::Rbg0 => self.raw(CRAOFB).bits(0..=2),
            Layer::Nbg0 | Layer::Rbg1 | Layer::Sprite => self.raw(CRAOFA).bits(0..=2),
            Layer::Nbg1 => self.raw(CRAOFA).bits(4..=6),
            Layer::Nbg2 => self.raw(CRAOFA).bits(8..=10),
            Layer::Nbg3 => self.raw(CRAOFA).bits(12..=14),
        };

        let priority = match slot {
            0 => self.raw(PRINA).bits(0..=2),
            1 => self.raw(PRINA).bits(8..=10),
            2 => self.raw(PRINA + 2).bits(0..=2),
            3 => self.raw(PRINA + 2).bits(8..=10),
            _ => self.raw(PRIR).bits(0..=2),
        };

        let cc_ratio = match slot {
            0 => self.raw(CCRNA).bits(0..=4),
            1 => self.raw(CCRNA).bits(8..=12),
            2 => self.raw(CCRNA + 2).bits(0..=4),
            3 => self.raw(CCRNA + 2).bits(8..=12),
            _ => self.raw(CCRR).bits(0..=4),
        };

        let special_priority = match self.raw(SFPRMD).bits(2 * slot..=2 * slot + 1) {
            0 => SpecialPriorityMode::PerScreen,
            1 => SpecialPriorityMode::PerCharacter,
            _ => SpecialPriorityMode::PerDot,
        };
        let special_cc = match self.raw(SFCCMD).bits(2 * slot..=2 * slot + 1) {
            0 => SpecialCcMode::PerScreen,
            1 => SpecialCcMode::PerCharacter,
            2 => SpecialCcMode::PerDot,
            _ => SpecialCcMode::ColorMsb,
        };
        let sfcode = self.raw(SFCODE);
        let special_codes = if self.raw(SFSEL).bit(slot) { sfcode >> 8 } else { sfcode & 0xFF };

        BgParams {
            layer,
            transparency: !bgon.bit(transparency_bit),
            format,
            bitmap: self.bitmap_params(layer),
            character_size: CharacterSize::from_bit(character_size),
            pattern: self.pattern_params(pattern_register),
            plane_width,
            plane_height,
            maps,
            cram_offset: u32::from(cram_offset) << 8,
            priority: priority as u8,
            special_priority,
            special_cc,
            special_codes: special_codes as u8,
            cc_enabled: self.raw(CCCTL).bit(slot),
            cc_ratio: cc_ratio as u8,
            line_color_insert: self.raw(LNCLEN).bit(slot),
            color_offset: self.color_offset_select(slot),
            shadow_enabled: self.raw(SDCTL).bit(slot),
            window: self.window_control(u32::from(slot)),
        }
    }

    fn map_numbers(&self, first_register: u32, planes: u32, offset: u32) -> PlaneMaps {
        let mut maps = [0; MAX_PLANES];
        for (plane, map) in (0..planes).zip(&mut maps) {
            let value = self.raw(first_register + 2 * (plane / 2));
            let bits = if plane % 2 == 0 { value.bits(0..=5) } else { value.bits(8..=13) };
            *map = (offset << 6) | u32::from(bits);
        }
        maps
    }

    #[must_use]
    pub fn nbg_scroll(&self, n: u32) -> NbgScroll {
        let fraction = |register: u32| i64::from(self.raw(register).bits(8..=15)) << 8;
        let integer = |register: u32| i64::from(self.raw(register).bits(0..=10)) << FRACTION_BITS;
        let zoom = |int_register: u32, frac_register: u32| {
            let zoom = (i64::from(self.raw(int_register).bits(0..=2)) << FRACTION_BITS)
                | fraction(frac_register);
            // A zero zoom increment would never advance
            if zoom == 0 { 1 << FRACTION_BITS } else { zoom }
        };

        match n {
            0 | 1 => {
                let base = SCXIN0 + 0x10 * n;
                let scrctl = self.raw(SCRCTL) >> (8 * n);
                let table_register = LSTA0U + 4 * n;
                NbgScroll {
                    x: integer(base) | fraction(base + 2),
                    y: integer(base + 4) | fraction(base + 6),
                    zoom_x: zoom(base + 8, base + 10),
                    zoom_y: zoom(base + 12, base + 14),
                    line_scroll: LineScrollParams {
                        x: scrctl.bit(1),
                        y: scrctl.bit(2),
                        zoom_x: scrctl.bit(3),
                        interval_shift: u32::from(scrctl.bits(4..=5)),
                        table_address: table_address(
                            self.raw(table_register),
                            self.raw(table_register + 2) & 0xFFFE,
                        ),
                    },
                    vertical_cell_scroll: scrctl.bit(0),
                }
            }
            _ => {
                let base = SCXN2 + 4 * (n - 2);
                NbgScroll {
                    x: integer(base),
                    y: integer(base + 2),
                    zoom_x: 1 << FRACTION_BITS,
                    zoom_y: 1 << FRACTION_BITS,
                    line_scroll: LineScrollParams::default(),
                    vertical_cell_scroll: false,
                }
            }
        }
    }

    #[must_use]
    pub fn vertical_cell_scroll_table(&self) -> u32 {
        table_address(self.raw(VCSTAU), self.raw(VCSTAU + 2) & 0xFFFE)
    }

    #[must_use]
    pub fn sprite_params(&self) -> SpriteParams {
        let spctl = self.raw(SPCTL);
        let priorities = [0, 1, 2, 3, 4, 5, 6, 7].map(|i: u32| {
            let value = self.raw(PRISA + 2 * (i / 2));
            (if i % 2 == 0 { value.bits(0..=2) } else { value.bits(8..=10) }) as u8
        });
        let cc_ratios = [0, 1, 2, 3, 4, 5, 6, 7].map(|i: u32| {
            let value = self.raw(CCRSA + 2 * (i / 2));
            (if i % 2 == 0 { value.bits(0..=4) } else { value.bits(8..=12) }) as u8
        });

        SpriteParams {
            sprite_type: spctl.bits(0..=3) as u8,
            window_enabled: spctl.bit(4),
            color_mode: if spctl.bit(5) {
                SpriteColorMode::Mixed
            } else {
                SpriteColorMode::PaletteOnly
            },
            cc_number: spctl.bits(8..=10) as u8,
            cc_condition: spctl.bits(12..=13) as u8,
            priorities,
            cc_ratios,
            cram_offset: u32::from(self.raw(CRAOFB).bits(4..=6)) << 8,
            cc_enabled: self.raw(CCCTL).bit(6),
            line_color_insert: self.raw(LNCLEN).bit(5),
            color_offset: self.color_offset_select(6),
            window: self.window_control(5),
        }
    }

    #[must_use]
    pub fn color_calc_params(&self) -> ColorCalcParams {
        let ccctl = self.raw(CCCTL);
        if ccctl.bit(15) {
            log::debug!("Extended color calculation requested; using standard two-layer blending");
        }
        ColorCalcParams {
            additive: ccctl.bit(8),
            ratio_from_second: ccctl.bit(14),
            line_color_ratio: self.raw(CCRLB).bits(0..=4) as u8,
            back_ratio: self.raw(CCRLB).bits(8..=12) as u8,
            line_color_cc_enabled: ccctl.bit(5),
            window: self.window_control(7),
        }
    }

    #[must_use]
    pub fn rotation_window(&self) -> WindowControl {
        self.window_control(6)
    }

    #[must_use]
    pub fn back_shadow_enabled(&self) -> bool {
        self.raw(SDCTL).bit(5)
    }

    #[must_use]
    pub fn back_color_offset(&self) -> Option<usize> {
        self.color_offset_select(5)
    }

    /// Signed 9-bit RGB color offsets for offset A (0) and B (1).
    #[must_use]
    pub fn color_offsets(&self) -> [[i32; 3]; 2] {
        [0, 1].map(|set: u32| {
            [0, 1, 2].map(|channel: u32| {
                let value = self.raw(COAR + 6 * set + 2 * channel);
                i32::from(((value & 0x1FF) << 7) as i16 >> 7)
            })
        })
    }

    /// Back screen table address and whether it has one entry per line.
    #[must_use]
    pub fn back_screen(&self) -> (u32, bool) {
        let upper = self.raw(BKTAU);
        (table_address(upper, self.raw(BKTAU + 2)), upper.bit(15))
    }

    /// Line color table address and whether it has one entry per line.
    #[must_use]
    pub fn line_color(&self) -> (u32, bool) {
        let upper = self.raw(LCTAU);
        (table_address(upper, self.raw(LCTAU + 2)), upper.bit(15))
    }

    #[must_use]
    pub fn window_rect(&self, window: u32) -> WindowRect {
        let base = WPSX0 + 8 * window;
        let line_upper = self.raw(LWTA0U + 4 * window);
        WindowRect {
            x0: u32::from(self.raw(base).bits(0..=9)),
            y0: u32::from(self.raw(base + 2).bits(0..=8)),
            x1: u32::from(self.raw(base + 4).bits(0..=9)),
            y1: u32::from(self.raw(base + 6).bits(0..=8)),
            line_table: line_upper
                .bit(15)
                .then(|| table_address(line_upper, self.raw(LWTA0U + 4 * window + 2) & 0xFFFE)),
        }
    }

    // Rotation

    #[must_use]
    pub fn rotation_parameter_mode(&self) -> u16 {
        self.raw(RPMD).bits(0..=1)
    }

    /// Byte address of the rotation parameter table; parameter B follows A at +0x80.
    #[must_use]
    pub fn rotation_table_address(&self) -> u32 {
        table_address(self.raw(RPTAU), self.raw(RPTAU + 2)) & 0x7FF00
    }

    /// Raw KTCTL byte for parameter A (0) or B (1).
    #[must_use]
    pub fn coefficient_control(&self, parameter: usize) -> u16 {
        let ktctl = self.raw(KTCTL);
        if parameter == 0 { ktctl & 0xFF } else { ktctl >> 8 }
    }

    #[must_use]
    pub fn coefficient_table_offset(&self, parameter: usize) -> u32 {
        let ktaof = self.raw(KTAOF);
        u32::from(if parameter == 0 { ktaof.bits(0..=2) } else { ktaof.bits(8..=10) })
    }

    /// Screen-over mode and over pattern name for parameter A (0) or B (1).
    #[must_use]
    pub fn screen_over(&self, parameter: usize) -> (u16, u16) {
        let plsz = self.raw(PLSZ);
        if parameter == 0 {
            (plsz.bits(10..=11), self.raw(OVPNRA))
        } else {
            (plsz.bits(14..=15), self.raw(OVPNRA + 2))
        }
    }

    /// Plane size and map numbers for rotation parameter A (0) or B (1).
    #[must_use]
    pub fn rotation_maps(&self, parameter: usize) -> (u32, u32, PlaneMaps) {
        let plsz = self.raw(PLSZ);
        let mpofr = self.raw(MPOFR);
        let (size_bits, offset, first) = if parameter == 0 {
            (plsz.bits(8..=9), mpofr.bits(0..=2), MPABRA)
        } else {
            (plsz.bits(12..=13), mpofr.bits(4..=6), MPABRB)
        };
        let (width, height) = plane_size(size_bits);
        (width, height, self.map_numbers(first, 16, u32::from(offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn map_numbers_fill_only_the_layer_planes() {
        let mut registers = Vdp2Registers::new();
        registers.write(MPOFN, 0x0002);
        registers.write(MPABN0, 0x0403);
        registers.write(MPOFR, 0x0001);
        registers.write(MPABRA, 0x0201);

        let maps = registers.bg_params(Layer::Nbg0).maps;
        assert_eq!(maps[..2], [(2 << 6) | 3, (2 << 6) | 4]);
        assert!(maps[4..].iter().all(|&map| map == 0));

        let (_, _, maps) = registers.rotation_maps(0);
        assert_eq!(maps[..2], [(1 << 6) | 1, (1 << 6) | 2]);
        assert_eq!(maps[15], 1 << 6);
    }

    #[test]
    fn both_rotation_backgrounds_disable_nbg0_and_nbg1() {
        let mut registers = Vdp2Registers::new();
        registers.write(BGON, 0x000F);
        let availability = registers.availability();
        assert!(availability.get(Layer::Nbg0) && availability.get(Layer::Nbg1));
        assert!(!availability.get(Layer::Rbg0));

        registers.write(BGON, 0x003F);
        let availability = registers.availability();
        assert!(availability.get(Layer::Rbg0) && availability.get(Layer::Rbg1));
        assert!(!availability.get(Layer::Nbg0));
        assert!(!availability.get(Layer::Nbg1));
        assert!(availability.get(Layer::Nbg2));
        assert!(availability.get(Layer::Nbg3));
    }

    #[test]
    fn color_formats_restrict_other_backgrounds() {
        let mut registers = Vdp2Registers::new();
        registers.write(BGON, 0x000F);

        // NBG0 2048 colors disables NBG2
        registers.write(CHCTLA, 2 << 4);
        assert!(!registers.availability().get(Layer::Nbg2));
        assert!(registers.availability().get(Layer::Nbg3));

        // NBG0 RGB888 disables NBG1-3
        registers.write(CHCTLA, 4 << 4);
        let availability = registers.availability();
        assert_eq!(
            availability.enabled_layers(),
            vec![Layer::Sprite, Layer::Nbg0]
        );

        // NBG1 RGB555 disables NBG3
        registers.write(CHCTLA, 3 << 12);
        assert!(!registers.availability().get(Layer::Nbg3));
        assert!(registers.availability().get(Layer::Nbg2));
    }

    #[test]
    fn byte_writes_merge() {
        let mut registers = Vdp2Registers::new();
        registers.write(PRINA, 0x0102);
        assert_eq!(registers.write_byte(PRINA + 1, 0x05), 0x0105);
        assert_eq!(registers.write_byte(PRINA, 0x07), 0x0705);
        assert_eq!(registers.bg_params(Layer::Nbg1).priority, 7);
        assert_eq!(registers.bg_params(Layer::Nbg0).priority, 5);
    }

    #[test]
    fn scroll_and_color_offset_decoding() {
        let mut registers = Vdp2Registers::new();
        registers.write(SCXIN0, 10);
        registers.write(SCXIN0 + 2, 0x8000);
        let scroll = registers.nbg_scroll(0);
        assert_eq!(scroll.x, (10 << 16) | 0x8000);
        assert_eq!(scroll.zoom_x, 1 << 16);

        registers.write(COAR, 0x1FF);
        registers.write(COAR + 8, 0x0FF);
        assert_eq!(registers.color_offsets(), [[-1, 0, 0], [0, 255, 0]]);
    }
}

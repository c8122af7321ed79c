//! VDP2 scanline compositor
//!
//! Each line is built in three passes: every available layer renders into its own row of
//! [`LayerPixel`]s (with window-masked pixels left transparent), then the final pass picks the top
//! two layers per pixel and applies color calculation, shadow, mesh blending, and color offset.

use crate::renderer::{FrameParams, VdpWrite, WriteTarget, WriteValue};
use crate::vdp1::{FRAMEBUFFER_ROW_BYTES, FRAMEBUFFER_ROWS, SharedFramebuffers};
use crate::vdp2::cram::ColorRam;
use crate::vdp2::registers::{
    BgParams, BitmapParams, CharacterSize, ColorCalcParams, RAMCTL, SpecialCcMode,
    SpecialPriorityMode, SpriteColorMode, SpriteParams, Vdp2Registers,
};
use crate::vdp2::rotation::RotationLine;
use crate::vdp2::window;
use crate::vdp2::{ColorFormat, InterlaceMode, LAYER_COUNT, Layer, VRAM_LEN, Vdp2Snapshot, Vram};
use saturn_common::frontend::Color;
use saturn_common::num::{GetBit, read_u16, read_u32, sign_extend, write_u16};
use saturn_config::EnhancementConfig;
use std::mem;

const PAGE_DOTS: u32 = 512;
const CHARACTER_BYTES: u32 = 0x20;
const BITMAP_BANK_BYTES: u32 = 0x20000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LayerPixel {
    color: Color,
    /// 0 means nothing is displayed
    priority: u8,
    cc: bool,
    cc_ratio: u8,
    line_color: Option<u16>,
}

impl LayerPixel {
    const TRANSPARENT: Self =
        Self { color: Color::BLACK, priority: 0, cc: false, cc_ratio: 0, line_color: None };

    fn visible(&self) -> bool {
        self.priority != 0
    }
}

impl Default for LayerPixel {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SpriteDot {
    pixel: LayerPixel,
    window: bool,
    /// Priority of a shadow at this position; 0 if none
    shadow: u8,
}

/// Bit fields of one sprite data type: (shift, width) pairs and the color data width.
#[derive(Debug, Clone, Copy)]
struct SpriteLayout {
    priority: (u8, u8),
    cc: (u8, u8),
    shadow_bit: Option<u8>,
    color_bits: u8,
}

const fn layout(
    priority: (u8, u8),
    cc: (u8, u8),
    shadow_bit: Option<u8>,
    color_bits: u8,
) -> SpriteLayout {
    SpriteLayout { priority, cc, shadow_bit, color_bits }
}

const SPRITE_LAYOUTS: [SpriteLayout; 16] = [
    layout((14, 2), (11, 3), None, 11),
    layout((13, 3), (11, 2), None, 11),
    layout((14, 1), (11, 3), Some(15), 11),
    layout((13, 2), (11, 2), Some(15), 11),
    layout((13, 2), (10, 3), Some(15), 10),
    layout((12, 3), (11, 1), Some(15), 11),
    layout((12, 3), (10, 2), Some(15), 10),
    layout((12, 3), (9, 3), Some(15), 9),
    layout((7, 1), (0, 0), None, 7),
    layout((7, 1), (6, 1), None, 6),
    layout((6, 2), (0, 0), None, 6),
    layout((0, 0), (6, 2), None, 6),
    layout((7, 1), (0, 0), None, 8),
    layout((7, 1), (6, 1), None, 8),
    layout((6, 2), (0, 0), None, 8),
    layout((0, 0), (6, 2), None, 8),
];

fn field(value: u16, (shift, width): (u8, u8)) -> usize {
    if width == 0 { 0 } else { usize::from((value >> shift) & ((1 << width) - 1)) }
}

fn sprite_cc_condition(params: &SpriteParams, priority: u8, msb: bool) -> bool {
    match params.cc_condition {
        0 => priority <= params.cc_number,
        1 => priority == params.cc_number,
        2 => priority >= params.cc_number,
        _ => msb,
    }
}

/// Signed scroll value with 11 integer and 8 fractional bits in bits 26-8.
fn table_scroll_value(raw: u32) -> i64 {
    i64::from(sign_extend(raw >> 8, 19)) << 8
}

fn blend(top: Color, under: Color, ratio: u8) -> Color {
    let ratio = u32::from(ratio & 0x1F);
    let mix = |t: u8, u: u8| ((u32::from(t) * (31 - ratio) + u32::from(u) * (ratio + 1)) / 32) as u8;
    Color::rgb(mix(top.r, under.r), mix(top.g, under.g), mix(top.b, under.b))
}

fn add(a: Color, b: Color) -> Color {
    Color::rgb(a.r.saturating_add(b.r), a.g.saturating_add(b.g), a.b.saturating_add(b.b))
}

fn average(a: Color, b: Color) -> Color {
    let mix = |a: u8, b: u8| ((u16::from(a) + u16::from(b)) / 2) as u8;
    Color::rgb(mix(a.r, b.r), mix(a.g, b.g), mix(a.b, b.b))
}

fn half(color: Color) -> Color {
    Color::rgb(color.r >> 1, color.g >> 1, color.b >> 1)
}

fn apply_offset(color: Color, offset: [i32; 3]) -> Color {
    let channel = |value: u8, offset: i32| (i32::from(value) + offset).clamp(0, 255) as u8;
    Color::rgb(channel(color.r, offset[0]), channel(color.g, offset[1]), channel(color.b, offset[2]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PatternName {
    character: u32,
    palette: u32,
    hflip: bool,
    vflip: bool,
    special_priority: bool,
    special_cc: bool,
}

fn decode_pattern(params: &BgParams, word0: u16, word1: u16) -> PatternName {
    let pattern = &params.pattern;
    if !pattern.one_word {
        return PatternName {
            character: u32::from(word1 & 0x7FFF),
            palette: u32::from(word0 & 0x7F),
            vflip: word0.bit(15),
            hflip: word0.bit(14),
            special_priority: word0.bit(13),
            special_cc: word0.bit(12),
        };
    }

    let palette = match params.format {
        ColorFormat::Palette16 => u32::from(word0 >> 12) | (pattern.supplement_palette << 4),
        _ => u32::from((word0 >> 12) & 7) << 4,
    };

    let supplement = pattern.supplement_character;
    let two_by_two = params.character_size == CharacterSize::TwoByTwo;
    let (number, hflip, vflip) = if pattern.extended_character {
        (u32::from(word0 & 0xFFF), false, false)
    } else {
        (u32::from(word0 & 0x3FF), word0.bit(10), word0.bit(11))
    };
    let character = match (pattern.extended_character, two_by_two) {
        (false, false) => (supplement << 10) | number,
        (false, true) => ((supplement & 0x1C) << 10) | (number << 2) | (supplement & 3),
        (true, false) => ((supplement & 0x1C) << 10) | number,
        (true, true) => ((supplement & 0x10) << 10) | (number << 2) | (supplement & 3),
    };

    PatternName {
        character,
        palette,
        hflip,
        vflip,
        special_priority: pattern.special_priority,
        special_cc: pattern.special_cc,
    }
}

/// Plane arrangement of a background map: 2x2 planes for normal backgrounds, 4x4 for rotation.
struct MapLayout<'a> {
    maps: &'a [u32],
    planes_per_row: u32,
    /// Plane size in pages
    plane_size: (u32, u32),
}

/// Dot lookup for one background layer's parameters.
struct DotFetcher<'a> {
    vram: &'a [u8],
    cram: &'a ColorRam,
    params: &'a BgParams,
}

impl DotFetcher<'_> {
    fn character_dots(&self) -> u32 {
        match self.params.character_size {
            CharacterSize::OneByOne => 8,
            CharacterSize::TwoByTwo => 16,
        }
    }

    fn byte(&self, address: u32) -> u32 {
        u32::from(self.vram[address as usize & (VRAM_LEN - 1)])
    }

    fn read_dot(&self, base: u32, dot: u32) -> u32 {
        match self.params.format {
            ColorFormat::Palette16 => {
                let byte = self.byte(base + dot / 2);
                if dot % 2 == 0 { byte >> 4 } else { byte & 0xF }
            }
            ColorFormat::Palette256 => self.byte(base + dot),
            ColorFormat::Palette2048 | ColorFormat::Rgb555 => {
                u32::from(read_u16(self.vram, (base + 2 * dot) as usize))
            }
            ColorFormat::Rgb888 => read_u32(self.vram, (base + 4 * dot) as usize),
        }
    }

    fn color_dot(&self, raw: u32, palette: u32, special_priority: bool, special_cc: bool) -> LayerPixel {
        let params = self.params;
        let palette_entry = |index: u32| {
            let index = params.cram_offset + index;
            (self.cram.color(index), self.cram.color_msb(index))
        };

        let (color, msb, transparent) = match params.format {
            ColorFormat::Palette16 => {
                let (color, msb) = palette_entry((palette << 4) | raw);
                (color, msb, raw == 0)
            }
            ColorFormat::Palette256 => {
                let (color, msb) = palette_entry(((palette & 0x70) << 4) | raw);
                (color, msb, raw == 0)
            }
            ColorFormat::Palette2048 => {
                let (color, msb) = palette_entry(raw & 0x7FF);
                (color, msb, raw & 0x7FF == 0)
            }
            ColorFormat::Rgb555 => (Color::from_rgb555(raw as u16), true, !raw.bit(15)),
            ColorFormat::Rgb888 => (Color::from_rgb888(raw), true, !raw.bit(31)),
        };
        if transparent && params.transparency {
            return LayerPixel::TRANSPARENT;
        }

        let special_dot =
            !params.format.is_rgb() && params.special_codes.bit(((raw >> 1) & 7) as u8);
        let priority = match params.special_priority {
            SpecialPriorityMode::PerScreen => params.priority,
            SpecialPriorityMode::PerCharacter => (params.priority & !1) | u8::from(special_priority),
            SpecialPriorityMode::PerDot => {
                (params.priority & !1) | u8::from(special_priority && special_dot)
            }
        };
        let cc = params.cc_enabled
            && match params.special_cc {
                SpecialCcMode::PerScreen => true,
                SpecialCcMode::PerCharacter => special_cc,
                SpecialCcMode::PerDot => special_cc && special_dot,
                SpecialCcMode::ColorMsb => msb,
            };

        LayerPixel { color, priority, cc, cc_ratio: params.cc_ratio, line_color: None }
    }

    fn bitmap_dot(&self, bitmap: &BitmapParams, base: u32, x: u32, y: u32) -> LayerPixel {
        let dot = (y % bitmap.height) * bitmap.width + (x % bitmap.width);
        let raw = self.read_dot(base, dot);
        self.color_dot(raw, bitmap.palette << 4, bitmap.special_priority, bitmap.special_cc)
    }

    /// Address of the pattern name covering plane coordinates (`x`, `y`) in a map that is
    /// `map_width` planes wide.
    fn pattern_address(&self, map: &MapLayout<'_>, x: u32, y: u32) -> u32 {
        let params = self.params;
        let (plane_width, plane_height) = map.plane_size;
        let character_dots = self.character_dots();
        let entry_bytes = if params.pattern.one_word { 2 } else { 4 };
        let patterns_per_row = PAGE_DOTS / character_dots;
        let page_bytes = patterns_per_row * patterns_per_row * entry_bytes;

        let plane_x = x / (PAGE_DOTS * plane_width);
        let plane_y = y / (PAGE_DOTS * plane_height);
        let mut map_number =
            map.maps.get((plane_y * map.planes_per_row + plane_x) as usize).copied().unwrap_or(0);
        if plane_width == 2 {
            map_number &= !1;
        }
        if plane_height == 2 {
            map_number &= !2;
        }

        let page_x = (x / PAGE_DOTS) % plane_width;
        let page_y = (y / PAGE_DOTS) % plane_height;
        let page = map_number + page_y * plane_width + page_x;

        let pattern_x = (x % PAGE_DOTS) / character_dots;
        let pattern_y = (y % PAGE_DOTS) / character_dots;
        page * page_bytes + (pattern_y * patterns_per_row + pattern_x) * entry_bytes
    }

    fn pattern(&self, address: u32) -> PatternName {
        let address = address as usize;
        if self.params.pattern.one_word {
            decode_pattern(self.params, read_u16(self.vram, address), 0)
        } else {
            decode_pattern(self.params, read_u16(self.vram, address), read_u16(self.vram, address + 2))
        }
    }

    fn character_dot(&self, pattern: &PatternName, x: u32, y: u32) -> LayerPixel {
        let character_dots = self.character_dots();
        let mut cx = x % character_dots;
        let mut cy = y % character_dots;
        if pattern.hflip {
            cx = character_dots - 1 - cx;
        }
        if pattern.vflip {
            cy = character_dots - 1 - cy;
        }

        let cell = (cy / 8) * 2 + cx / 8;
        let cell_bytes = 8 * self.params.format.bits_per_dot();
        let base = pattern.character * CHARACTER_BYTES + cell * cell_bytes;
        let raw = self.read_dot(base, (cy % 8) * 8 + cx % 8);
        self.color_dot(raw, pattern.palette, pattern.special_priority, pattern.special_cc)
    }

    fn cell_dot(&self, map: &MapLayout<'_>, x: u32, y: u32) -> LayerPixel {
        let pattern = self.pattern(self.pattern_address(map, x, y));
        self.character_dot(&pattern, x, y)
    }
}

/// Attributes applied to a layer's pixel after it wins priority.
#[derive(Debug, Clone, Copy, Default)]
struct LayerEffects {
    line_color_insert: bool,
    shadow_enabled: bool,
    color_offset: Option<usize>,
}

/// Owns a private mirror of VDP2 VRAM, color RAM, and registers and composites display lines.
#[derive(Debug)]
pub struct Vdp2Context {
    vram: Vram,
    cram: ColorRam,
    registers: Vdp2Registers,
    framebuffers: SharedFramebuffers,
    enhancements: EnhancementConfig,
    layer_enabled: [bool; LAYER_COUNT],
    frame: FrameParams,
    rows: [Vec<LayerPixel>; LAYER_COUNT],
    effects: [LayerEffects; LAYER_COUNT],
    sprite_raw: Vec<u16>,
    mesh_raw: Vec<u16>,
    sprite_dots: Vec<SpriteDot>,
    sprite_window: Vec<bool>,
    mesh: Vec<LayerPixel>,
    mask: Vec<bool>,
    rotation_mask: Vec<bool>,
    cc_mask: Vec<bool>,
}

impl Vdp2Context {
    #[must_use]
    pub fn new(
        snapshot: Vdp2Snapshot,
        framebuffers: SharedFramebuffers,
        enhancements: EnhancementConfig,
    ) -> Self {
        let mut context = Self {
            vram: snapshot.vram,
            cram: snapshot.cram,
            registers: snapshot.registers,
            framebuffers,
            enhancements,
            layer_enabled: [true; LAYER_COUNT],
            frame: FrameParams::default(),
            rows: Default::default(),
            effects: [LayerEffects::default(); LAYER_COUNT],
            sprite_raw: Vec::new(),
            mesh_raw: Vec::new(),
            sprite_dots: Vec::new(),
            sprite_window: Vec::new(),
            mesh: Vec::new(),
            mask: Vec::new(),
            rotation_mask: Vec::new(),
            cc_mask: Vec::new(),
        };
        context.cram.rebuild_cache();
        context
    }

    pub fn resync(&mut self, snapshot: Vdp2Snapshot) {
        self.vram = snapshot.vram;
        self.cram = snapshot.cram;
        self.registers = snapshot.registers;
        self.cram.rebuild_cache();
    }

    pub fn set_enhancements(&mut self, enhancements: EnhancementConfig) {
        self.enhancements = enhancements;
    }

    #[must_use]
    pub fn layer_enabled(&self, layer: Layer) -> bool {
        self.layer_enabled[layer.index()]
    }

    pub fn set_layer_enabled(&mut self, layer: Layer, enabled: bool) {
        self.layer_enabled[layer.index()] = enabled;
    }

    #[must_use]
    pub fn registers(&self) -> &Vdp2Registers {
        &self.registers
    }

    pub fn apply_write(&mut self, write: &VdpWrite) {
        let address = write.address;
        match (write.target, write.value) {
            (WriteTarget::Vdp2Vram, WriteValue::Byte(value)) => {
                self.vram[address as usize & (VRAM_LEN - 1)] = value;
            }
            (WriteTarget::Vdp2Vram, WriteValue::Word(value)) => {
                write_u16(&mut self.vram[..], address as usize, value);
            }
            (WriteTarget::Vdp2Cram, WriteValue::Byte(value)) => self.cram.write_byte(address, value),
            (WriteTarget::Vdp2Cram, WriteValue::Word(value)) => self.cram.write_word(address, value),
            (WriteTarget::Vdp2Register, WriteValue::Word(value)) => {
                self.registers.write(address, value);
                if address & !1 == RAMCTL {
                    self.cram.set_mode(self.registers.cram_mode());
                }
            }
            (WriteTarget::Vdp2Register, WriteValue::Byte(value)) => {
                self.registers.write_byte(address, value);
                if address & !1 == RAMCTL {
                    self.cram.set_mode(self.registers.cram_mode());
                }
            }
            _ => {}
        }
    }

    pub fn begin_frame(&mut self, frame: FrameParams) {
        self.frame = frame;
        self.resize(frame.size.width as usize);
    }

    fn resize(&mut self, width: usize) {
        for row in &mut self.rows {
            row.resize(width, LayerPixel::TRANSPARENT);
        }
        self.sprite_raw.resize(width, 0);
        self.mesh_raw.resize(width, 0);
        self.sprite_dots.resize(width, SpriteDot::default());
        self.sprite_window.resize(width, false);
        self.mesh.resize(width, LayerPixel::TRANSPARENT);
        self.mask.resize(width, false);
        self.rotation_mask.resize(width, false);
        self.cc_mask.resize(width, false);
    }

    /// Composite field line `y` into `out`. `odd` selects the field in double-density interlace.
    pub fn draw_line(&mut self, y: u32, odd: bool, out: &mut [Color]) {
        let width = out.len();
        if self.mask.len() != width {
            self.resize(width);
        }

        let bg_line = match self.frame.interlace {
            InterlaceMode::DoubleDensity => 2 * y + u32::from(odd),
            InterlaceMode::None | InterlaceMode::SingleDensity => y,
        };

        if !self.registers.display_enabled() {
            let color = if self.registers.border_shows_back_color() {
                self.back_color(bg_line)
            } else {
                Color::BLACK
            };
            out.fill(color);
            return;
        }

        let availability = self.registers.availability();
        let active = Layer::ALL.map(|layer| availability.get(layer) && self.layer_enabled(layer));

        self.draw_sprite_layer(y);
        let spans = window::line_spans(&self.registers, &self.vram[..], bg_line, self.frame.hires);

        let sprite_params = self.registers.sprite_params();
        self.effects[Layer::Sprite.index()] = LayerEffects {
            line_color_insert: sprite_params.line_color_insert,
            shadow_enabled: false,
            color_offset: sprite_params.color_offset,
        };
        window::compute_mask(&sprite_params.window, &spans, &self.sprite_window, &mut self.mask);
        let sprite_row = &mut self.rows[Layer::Sprite.index()];
        for ((pixel, dot), &masked) in sprite_row.iter_mut().zip(&self.sprite_dots).zip(&self.mask) {
            *pixel = if masked { LayerPixel::TRANSPARENT } else { dot.pixel };
        }

        if self.registers.rotation_parameter_mode() == 3 {
            window::compute_mask(
                &self.registers.rotation_window(),
                &spans,
                &self.sprite_window,
                &mut self.rotation_mask,
            );
        }

        for layer in [Layer::Rbg0, Layer::Rbg1, Layer::Nbg0, Layer::Nbg1, Layer::Nbg2, Layer::Nbg3] {
            let mut row = mem::take(&mut self.rows[layer.index()]);
            row.fill(LayerPixel::TRANSPARENT);
            if active[layer.index()] {
                let params = self.registers.bg_params(layer);
                self.effects[layer.index()] = LayerEffects {
                    line_color_insert: params.line_color_insert,
                    shadow_enabled: params.shadow_enabled,
                    color_offset: params.color_offset,
                };
                window::compute_mask(&params.window, &spans, &self.sprite_window, &mut self.mask);
                match layer {
                    Layer::Rbg0 | Layer::Rbg1 => self.draw_rotation_layer(&params, bg_line, &mut row),
                    _ => self.draw_normal_layer(&params, bg_line, &mut row),
                }
            }
            self.rows[layer.index()] = row;
        }

        let cc_params = self.registers.color_calc_params();
        window::compute_mask(&cc_params.window, &spans, &self.sprite_window, &mut self.cc_mask);
        self.compose(bg_line, &active, &cc_params, out);
    }

    fn back_color(&self, bg_line: u32) -> Color {
        let (address, per_line) = self.registers.back_screen();
        let address = if per_line { address + 2 * bg_line } else { address };
        Color::from_rgb555(read_u16(&self.vram[..], address as usize))
    }

    /// Line color screen for `bg_line`. Rotation coefficients can supply the low 7 bits of the
    /// color RAM index per pixel.
    fn line_color(&self, bg_line: u32, coefficient: Option<u16>) -> Color {
        let (address, per_line) = self.registers.line_color();
        let address = if per_line { address + 2 * bg_line } else { address };
        let entry = read_u16(&self.vram[..], address as usize) & 0x7FF;
        let index = match coefficient {
            Some(low) => (entry & 0x780) | (low & 0x7F),
            None => entry,
        };
        self.cram.color(u32::from(index))
    }

    /// Fill the raw sprite row (and mesh plane row, when meshes are blended) for field line `y`.
    fn read_sprite_row(&mut self, y: u32) {
        self.sprite_raw.fill(0);
        self.mesh_raw.fill(0);
        if y as usize >= FRAMEBUFFER_ROWS {
            return;
        }

        let byte_framebuffer = self.frame.sprite_8bit;
        let hires = self.frame.hires;
        let row = y as usize * FRAMEBUFFER_ROW_BYTES;
        let read = |plane: &[u8], x: usize| -> u16 {
            let sx = if hires && !byte_framebuffer { x >> 1 } else { x };
            if byte_framebuffer {
                if sx < FRAMEBUFFER_ROW_BYTES { plane[row + sx].into() } else { 0 }
            } else if sx < FRAMEBUFFER_ROW_BYTES / 2 {
                read_u16(plane, row + 2 * sx)
            } else {
                0
            }
        };

        let fb = self.framebuffers.lock(self.frame.display_framebuffer);
        for (x, value) in self.sprite_raw.iter_mut().enumerate() {
            *value = read(&fb.pixels[..], x);
        }
        if self.enhancements.transparent_meshes {
            for (x, value) in self.mesh_raw.iter_mut().enumerate() {
                *value = read(&fb.mesh[..], x);
            }
        }
    }

    fn decode_sprite(&self, params: &SpriteParams, raw: u16) -> SpriteDot {
        let mut dot = SpriteDot::default();
        if raw == 0 {
            return dot;
        }

        if params.color_mode == SpriteColorMode::Mixed && !self.frame.sprite_8bit && raw.bit(15) {
            let priority = params.priorities[0];
            dot.pixel = LayerPixel {
                color: Color::from_rgb555(raw),
                priority,
                cc: params.cc_enabled && sprite_cc_condition(params, priority, true),
                cc_ratio: params.cc_ratios[0],
                line_color: None,
            };
            return dot;
        }

        let layout = SPRITE_LAYOUTS[usize::from(params.sprite_type & 0xF)];
        let data = if layout.color_bits <= 8 { raw & 0xFF } else { raw };
        let color_mask = (1_u16 << layout.color_bits) - 1;
        let color_data = data & color_mask;
        let priority = params.priorities[field(data, layout.priority)];
        let cc_ratio = params.cc_ratios[field(data, layout.cc)];
        let shadow_bit = layout.shadow_bit.is_some_and(|bit| data.bit(bit));

        if shadow_bit && params.window_enabled {
            dot.window = true;
        }

        // Normal shadow: all color bits set except the LSB
        if color_data == color_mask - 1 {
            dot.shadow = priority;
            return dot;
        }
        if shadow_bit && !params.window_enabled {
            dot.shadow = priority;
        }
        if color_data == 0 {
            return dot;
        }

        let index = params.cram_offset + u32::from(color_data);
        dot.pixel = LayerPixel {
            color: self.cram.color(index),
            priority,
            cc: params.cc_enabled && sprite_cc_condition(params, priority, self.cram.color_msb(index)),
            cc_ratio,
            line_color: None,
        };
        dot
    }

    fn draw_sprite_layer(&mut self, y: u32) {
        let params = self.registers.sprite_params();
        self.read_sprite_row(y);
        let enabled = self.layer_enabled(Layer::Sprite);

        let mut dots = mem::take(&mut self.sprite_dots);
        for (dot, &raw) in dots.iter_mut().zip(&self.sprite_raw) {
            *dot = self.decode_sprite(&params, raw);
            if !enabled {
                dot.pixel = LayerPixel::TRANSPARENT;
            }
        }
        self.sprite_dots = dots;

        for (window, dot) in self.sprite_window.iter_mut().zip(&self.sprite_dots) {
            *window = dot.window;
        }

        let mut mesh_row = mem::take(&mut self.mesh);
        if enabled && self.enhancements.transparent_meshes {
            for (pixel, &raw) in mesh_row.iter_mut().zip(&self.mesh_raw) {
                *pixel = self.decode_sprite(&params, raw).pixel;
            }
        } else {
            mesh_row.fill(LayerPixel::TRANSPARENT);
        }
        self.mesh = mesh_row;
    }

    fn draw_normal_layer(&self, params: &BgParams, bg_line: u32, row: &mut [LayerPixel]) {
        let n = match params.layer {
            Layer::Nbg0 => 0,
            Layer::Nbg1 => 1,
            Layer::Nbg2 => 2,
            _ => 3,
        };
        let scroll = self.registers.nbg_scroll(n);
        let vram = &self.vram[..];
        let fetcher = DotFetcher { vram, cram: &self.cram, params };

        let mut x_origin = scroll.x;
        let mut y_coord = scroll.y + i64::from(bg_line) * scroll.zoom_y;
        let mut zoom_x = scroll.zoom_x;

        let line_scroll = scroll.line_scroll;
        if line_scroll.enabled() {
            let entry_bytes =
                4 * (u32::from(line_scroll.x) + u32::from(line_scroll.y) + u32::from(line_scroll.zoom_x));
            let mut address =
                line_scroll.table_address + (bg_line >> line_scroll.interval_shift) * entry_bytes;
            if line_scroll.x {
                x_origin += table_scroll_value(read_u32(vram, address as usize));
                address += 4;
            }
            if line_scroll.y {
                y_coord = scroll.y + table_scroll_value(read_u32(vram, address as usize));
                address += 4;
            }
            if line_scroll.zoom_x {
                let value = i64::from(read_u32(vram, address as usize) & 0x7FF00);
                if value != 0 {
                    zoom_x = value;
                }
            }
        }

        let (cell_scroll_table, cell_scroll_stride) = if scroll.vertical_cell_scroll {
            let both = self.registers.nbg_scroll(0).vertical_cell_scroll
                && self.registers.nbg_scroll(1).vertical_cell_scroll;
            let base = self.registers.vertical_cell_scroll_table();
            let offset = if both && n == 1 { 4 } else { 0 };
            (Some(base + offset), if both { 8 } else { 4 })
        } else {
            (None, 4)
        };

        let (map_width, map_height) = match &params.bitmap {
            Some(bitmap) => (bitmap.width, bitmap.height),
            None => (2 * params.plane_width * PAGE_DOTS, 2 * params.plane_height * PAGE_DOTS),
        };
        let bitmap_base = params.maps.first().map_or(0, |&map| (map >> 6) * BITMAP_BANK_BYTES);

        let map = MapLayout {
            maps: &params.maps,
            planes_per_row: 2,
            plane_size: (params.plane_width, params.plane_height),
        };

        for (x, pixel) in row.iter_mut().enumerate() {
            if self.mask[x] {
                continue;
            }

            let sx = x_origin + x as i64 * zoom_x;
            let mut sy = y_coord;
            if let Some(table) = cell_scroll_table {
                let column = x as u32 / 8;
                sy += table_scroll_value(read_u32(vram, (table + column * cell_scroll_stride) as usize));
            }

            let px = (sx >> 16).rem_euclid(i64::from(map_width)) as u32;
            let py = (sy >> 16).rem_euclid(i64::from(map_height)) as u32;
            *pixel = match &params.bitmap {
                Some(bitmap) => fetcher.bitmap_dot(bitmap, bitmap_base, px, py),
                None => fetcher.cell_dot(&map, px, py),
            };
        }
    }

    fn draw_rotation_layer(&self, params: &BgParams, bg_line: u32, row: &mut [LayerPixel]) {
        let vram = &self.vram[..];
        let fetcher = DotFetcher { vram, cram: &self.cram, params };
        let lines = [0, 1].map(|parameter| RotationLine::new(&self.registers, vram, parameter, bg_line));
        let screen_over = [0, 1].map(|parameter| self.registers.screen_over(parameter));
        let maps = [0, 1].map(|parameter| self.registers.rotation_maps(parameter));
        let mode = if params.layer == Layer::Rbg1 { 1 } else { self.registers.rotation_parameter_mode() };

        for (x, pixel) in row.iter_mut().enumerate() {
            if self.mask[x] {
                continue;
            }

            let x = x as u32;
            let (parameter, sample) = match mode {
                0 => (0, lines[0].sample(x, vram, &self.cram)),
                1 => (1, lines[1].sample(x, vram, &self.cram)),
                2 => {
                    let sample = lines[0].sample(x, vram, &self.cram);
                    if sample.transparent { (1, lines[1].sample(x, vram, &self.cram)) } else { (0, sample) }
                }
                _ => {
                    let parameter = usize::from(self.rotation_mask[x as usize]);
                    (parameter, lines[parameter].sample(x, vram, &self.cram))
                }
            };
            if sample.transparent {
                continue;
            }

            let (plane_width, plane_height, plane_maps) = &maps[parameter];
            let (over_mode, over_pattern) = screen_over[parameter];
            let (width, height) = match &params.bitmap {
                Some(bitmap) => (bitmap.width, bitmap.height),
                None => (4 * plane_width * PAGE_DOTS, 4 * plane_height * PAGE_DOTS),
            };
            let (sx, sy) = (i64::from(sample.x), i64::from(sample.y));
            let inside = (0..i64::from(width)).contains(&sx) && (0..i64::from(height)).contains(&sy);
            let px = sx.rem_euclid(i64::from(width)) as u32;
            let py = sy.rem_euclid(i64::from(height)) as u32;

            let dot = match (over_mode, &params.bitmap) {
                (2, _) if !inside => continue,
                (3, _) if !(0..512).contains(&sx) || !(0..512).contains(&sy) => continue,
                (1, None) if !inside => {
                    let pattern = if params.pattern.one_word {
                        decode_pattern(params, over_pattern, 0)
                    } else {
                        decode_pattern(params, 0, over_pattern)
                    };
                    fetcher.character_dot(&pattern, px, py)
                }
                (_, Some(bitmap)) => {
                    let base = plane_maps.first().map_or(0, |&map| (map >> 6) * BITMAP_BANK_BYTES);
                    fetcher.bitmap_dot(bitmap, base, px, py)
                }
                (_, None) => {
                    let map = MapLayout {
                        maps: plane_maps,
                        planes_per_row: 4,
                        plane_size: (*plane_width, *plane_height),
                    };
                    fetcher.cell_dot(&map, px, py)
                }
            };

            *pixel = LayerPixel { line_color: sample.line_color.map(u16::from), ..dot };
        }
    }

    fn compose(
        &self,
        bg_line: u32,
        active: &[bool; LAYER_COUNT],
        cc_params: &ColorCalcParams,
        out: &mut [Color],
    ) {
        let offsets = self.registers.color_offsets();
        let back_color = self.back_color(bg_line);
        let back_effects = LayerEffects {
            line_color_insert: false,
            shadow_enabled: self.registers.back_shadow_enabled(),
            color_offset: self.registers.back_color_offset(),
        };
        let sprite_active = active[Layer::Sprite.index()];

        for (x, out) in out.iter_mut().enumerate() {
            let mut top: Option<(Layer, LayerPixel)> = None;
            let mut second: Option<(Layer, LayerPixel)> = None;

            // Layer::ALL is ordered so that equal priorities resolve to the earlier layer
            for layer in Layer::ALL {
                if !active[layer.index()] {
                    continue;
                }
                let pixel = self.rows[layer.index()][x];
                if !pixel.visible() {
                    continue;
                }

                match top {
                    Some((_, current)) if pixel.priority <= current.priority => {
                        if second.is_none_or(|(_, current)| pixel.priority > current.priority) {
                            second = Some((layer, pixel));
                        }
                    }
                    _ => {
                        second = top;
                        top = Some((layer, pixel));
                    }
                }
            }

            let shadow = if sprite_active { self.sprite_dots[x].shadow } else { 0 };

            let Some((top_layer, top_pixel)) = top else {
                let mut color = back_color;
                if back_effects.shadow_enabled && shadow != 0 {
                    color = half(color);
                }
                if let Some(set) = back_effects.color_offset {
                    color = apply_offset(color, offsets[set]);
                }
                *out = color;
                continue;
            };

            let effects = &self.effects[top_layer.index()];
            let (under_color, under_ratio) =
                second.map_or((back_color, cc_params.back_ratio), |(_, pixel)| (pixel.color, pixel.cc_ratio));

            let mut color = top_pixel.color;
            if top_pixel.cc && !self.cc_mask[x] {
                let under = if effects.line_color_insert {
                    let line_color = self.line_color(bg_line, top_pixel.line_color);
                    if cc_params.line_color_cc_enabled {
                        blend(line_color, under_color, cc_params.line_color_ratio)
                    } else {
                        line_color
                    }
                } else {
                    under_color
                };

                color = if cc_params.additive {
                    add(color, under)
                } else {
                    let ratio = if cc_params.ratio_from_second { under_ratio } else { top_pixel.cc_ratio };
                    blend(color, under, ratio)
                };
            }

            if effects.shadow_enabled && shadow >= top_pixel.priority {
                color = half(color);
            }

            let mesh = self.mesh[x];
            if mesh.visible() && mesh.priority >= top_pixel.priority {
                color = average(color, mesh.color);
            }

            if let Some(set) = effects.color_offset {
                color = apply_offset(color, offsets[set]);
            }
            *out = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdp2::registers::{
        BGON, BKTAU, CCCTL, CCRNA, CHCTLA, CHCTLB, MPABN0, MPOFN, PNCN0, PRINA, PRIR, PRISA, RPTAU,
        SCXIN0, TVMD, WCTLA, WPSX0,
    };
    use saturn_common::frontend::FrameSize;
    use test_log::test;

    const RED: Color = Color::rgb(255, 0, 0);
    const GREEN: Color = Color::rgb(0, 255, 0);
    const BLUE: Color = Color::rgb(0, 0, 255);

    struct Harness {
        context: Vdp2Context,
        framebuffers: SharedFramebuffers,
    }

    impl Harness {
        fn new() -> Self {
            let framebuffers = SharedFramebuffers::new();
            let snapshot = Vdp2Snapshot {
                vram: Vram::new(),
                cram: ColorRam::new(),
                registers: Vdp2Registers::new(),
            };
            let mut context =
                Vdp2Context::new(snapshot, framebuffers.clone(), EnhancementConfig::default());
            context.begin_frame(FrameParams {
                size: FrameSize { width: 320, height: 224 },
                ..FrameParams::default()
            });
            let mut harness = Self { context, framebuffers };
            harness.register(TVMD, 0x8000);
            harness
        }

        fn register(&mut self, address: u32, value: u16) {
            self.context.apply_write(&VdpWrite::word(WriteTarget::Vdp2Register, address, value));
        }

        fn vram(&mut self, address: u32, value: u16) {
            self.context.apply_write(&VdpWrite::word(WriteTarget::Vdp2Vram, address, value));
        }

        fn cram(&mut self, address: u32, value: u16) {
            self.context.apply_write(&VdpWrite::word(WriteTarget::Vdp2Cram, address, value));
        }

        fn line(&mut self, y: u32) -> Vec<Color> {
            let mut out = vec![Color::BLACK; 320];
            self.context.draw_line(y, false, &mut out);
            out
        }
    }

    #[test]
    fn back_screen_fills_empty_line() {
        let mut harness = Harness::new();
        harness.register(BKTAU + 2, 0x1000);
        harness.vram(0x2000, 0x001F);
        assert!(harness.line(0).iter().all(|&color| color == RED));
    }

    #[test]
    fn display_disable_shows_black_or_back_color() {
        let mut harness = Harness::new();
        harness.register(BKTAU + 2, 0x1000);
        harness.vram(0x2000, 0x001F);

        harness.register(TVMD, 0x0000);
        assert!(harness.line(0).iter().all(|&color| color == Color::BLACK));

        harness.register(TVMD, 0x0100);
        assert!(harness.line(0).iter().all(|&color| color == RED));
    }

    #[test]
    fn cell_background_uses_pattern_palette() {
        let mut harness = Harness::new();
        harness.register(BGON, 0x0001);
        harness.register(PNCN0, 0x8000);
        harness.register(MPABN0, 0x0001);
        harness.register(PRINA, 0x0001);

        // Plane A at 0x2000: pattern (0, 0) = palette 1, character 0x200
        harness.vram(0x2000, 0x1200);
        harness.vram(0x4000, 0x1200);
        harness.cram(2 * 17, 0x001F);
        harness.cram(2 * 18, 0x03E0);

        let line = harness.line(0);
        assert_eq!(line[0], RED);
        assert_eq!(line[1], GREEN);
        assert_eq!(line[2], Color::BLACK);
    }

    #[test]
    fn bitmap_background_scrolls() {
        let mut harness = Harness::new();
        harness.register(BGON, 0x0001);
        harness.register(CHCTLA, 0x0032);
        harness.register(PRINA, 0x0001);
        harness.register(SCXIN0, 2);
        harness.vram((5 * 512 + 3) * 2, 0x83E0);

        let line = harness.line(5);
        assert_eq!(line[1], GREEN);
        assert_eq!(line[0], Color::BLACK);
    }

    #[test]
    fn color_calculation_blends_with_second_layer() {
        let mut harness = Harness::new();
        harness.register(BGON, 0x0003);
        harness.register(CHCTLA, 0x3232);
        harness.register(MPOFN, 0x0010);
        harness.register(PRINA, 0x0102);
        harness.vram(0, 0x801F);
        harness.vram(0x20000, 0xFC00);

        assert_eq!(harness.line(0)[0], RED);

        harness.register(CCCTL, 0x0001);
        harness.register(CCRNA, 15);
        assert_eq!(harness.line(0)[0], Color::rgb(127, 0, 127));
    }

    #[test]
    fn window_masks_background() {
        let mut harness = Harness::new();
        harness.register(BGON, 0x0001);
        harness.register(CHCTLA, 0x0032);
        harness.register(PRINA, 0x0001);
        harness.vram(2 * 5, 0x83E0);
        harness.vram(2 * 15, 0x83E0);

        harness.register(WPSX0 + 4, 19);
        harness.register(WPSX0 + 6, 223);
        harness.register(WCTLA, 0x0002);

        let line = harness.line(0);
        assert_eq!(line[5], Color::BLACK);
        assert_eq!(line[15], GREEN);
    }

    #[test]
    fn sprite_pixels_use_sprite_priority() {
        let mut harness = Harness::new();
        harness.register(BGON, 0x0001);
        harness.register(CHCTLA, 0x0032);
        harness.register(PRINA, 0x0001);
        harness.register(PRISA, 0x0003);
        harness.vram((2 * 512 + 4) * 2, 0x83E0);
        harness.cram(2 * 0x10, 0x7C00);

        let address = 2 * FRAMEBUFFER_ROW_BYTES + 8;
        write_u16(&mut harness.framebuffers.lock(0).pixels[..], address, 0x0010);
        assert_eq!(harness.line(2)[4], BLUE);

        harness.context.set_layer_enabled(Layer::Sprite, false);
        assert_eq!(harness.line(2)[4], GREEN);
    }

    #[test]
    fn sprite_rows_are_reused_between_lines() {
        let mut harness = Harness::new();
        harness.register(PRISA, 0x0003);
        harness.cram(2 * 0x10, 0x7C00);
        let address = 2 * FRAMEBUFFER_ROW_BYTES + 8;
        write_u16(&mut harness.framebuffers.lock(0).pixels[..], address, 0x0010);

        assert_eq!(harness.line(2)[4], BLUE);
        let sprite_row = harness.context.sprite_raw.as_ptr();
        let mesh_row = harness.context.mesh_raw.as_ptr();

        // The next line must not see the previous line's sprite dots
        assert_eq!(harness.line(3)[4], Color::BLACK);
        assert_eq!(harness.line(2)[4], BLUE);
        assert_eq!(harness.context.sprite_raw.as_ptr(), sprite_row);
        assert_eq!(harness.context.mesh_raw.as_ptr(), mesh_row);
        assert_eq!(harness.context.sprite_raw.len(), 320);
    }

    #[test]
    fn rotation_background_identity_transform() {
        let mut harness = Harness::new();
        harness.register(BGON, 0x0010);
        harness.register(CHCTLB, 0x3200);
        harness.register(PRIR, 0x0001);
        harness.register(RPTAU, 0x0002);

        let table = 0x40000;
        for offset in [0x10, 0x14, 0x1C, 0x2C, 0x4C, 0x50] {
            harness.vram(table + offset, 0x0001);
        }
        harness.vram((512 + 3) * 2, 0x83E0);

        let line = harness.line(1);
        assert_eq!(line[3], GREEN);
        assert_eq!(line[4], Color::BLACK);
    }
}

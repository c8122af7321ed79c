//! Software VDP1 rasterizer
//!
//! Quads are drawn the way the hardware draws them: as a series of lines between the left edge
//! (A→D) and the right edge (B→C). All interpolation uses fixed-point steppers so there is no
//! division inside the per-pixel loop.

use crate::renderer::{VdpWrite, WriteTarget, WriteValue};
use crate::vdp1::command::{ColorCalc, ColorMode, DrawCommand, Point, Primitive, Texture, UserClip};
use crate::vdp1::registers::{EraseParams, Vdp1Registers};
use crate::vdp1::{
    FRAMEBUFFER_ROW_BYTES, FRAMEBUFFER_ROWS, SharedFramebuffers, SpriteFramebuffer, VRAM_LEN,
    Vdp1Snapshot, Vram,
};
use saturn_common::num::{read_u16, write_u16};
use saturn_config::EnhancementConfig;
use std::cmp;

#[derive(Debug, Clone, Copy)]
struct Stepper {
    value: i64,
    step: i64,
}

impl Stepper {
    fn new(start: i32, end: i32, steps: u32) -> Self {
        // Start at the pixel center so the final step lands exactly on `end`
        let value = (i64::from(start) << 16) + (1 << 15);
        let step = if steps == 0 {
            0
        } else {
            ((i64::from(end) - i64::from(start)) << 16) / i64::from(steps)
        };
        Self { value, step }
    }

    fn current(&self) -> i32 {
        (self.value >> 16) as i32
    }

    fn advance(&mut self) {
        self.value += self.step;
    }
}

#[derive(Debug, Clone, Copy)]
struct PointStepper {
    x: Stepper,
    y: Stepper,
}

impl PointStepper {
    fn new(start: Point, end: Point, steps: u32) -> Self {
        Self { x: Stepper::new(start.x, end.x, steps), y: Stepper::new(start.y, end.y, steps) }
    }

    fn current(&self) -> Point {
        Point::new(self.x.current(), self.y.current())
    }

    fn advance(&mut self) {
        self.x.advance();
        self.y.advance();
    }
}

type Shade = [i32; 3];

#[derive(Debug, Clone, Copy)]
struct ShadeStepper([Stepper; 3]);

impl ShadeStepper {
    fn new(start: Shade, end: Shade, steps: u32) -> Self {
        Self([0, 1, 2].map(|i| Stepper::new(start[i], end[i], steps)))
    }

    fn current(&self) -> Shade {
        self.0.map(|stepper| stepper.current())
    }

    fn advance(&mut self) {
        for stepper in &mut self.0 {
            stepper.advance();
        }
    }
}

fn shade_channels(value: u16) -> Shade {
    [
        i32::from(value & 0x1F),
        i32::from((value >> 5) & 0x1F),
        i32::from((value >> 10) & 0x1F),
    ]
}

fn major_length(a: Point, b: Point) -> u32 {
    cmp::max((b.x - a.x).unsigned_abs(), (b.y - a.y).unsigned_abs())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Texel {
    Pixel(u16),
    Transparent,
    EndCode,
}

fn half_luminance(color: u16) -> u16 {
    0x8000 | ((color >> 1) & 0x3DEF)
}

fn average(a: u16, b: u16) -> u16 {
    0x8000 | (((a >> 1) & 0x3DEF) + ((b >> 1) & 0x3DEF))
}

fn apply_gouraud(color: u16, shade: Shade) -> u16 {
    let channels = shade_channels(color);
    let [r, g, b] =
        [0, 1, 2].map(|i| (channels[i] + shade[i] - 0x10).clamp(0, 0x1F) as u16);
    (color & 0x8000) | (b << 10) | (g << 5) | r
}

/// Combine a source pixel with the existing framebuffer pixel. Returns `None` if nothing should be
/// written.
fn shade_pixel(calc: ColorCalc, color: u16, existing: u16, shade: Option<Shade>) -> Option<u16> {
    let existing_rgb = existing & 0x8000 != 0;
    let shade = shade.unwrap_or([0x10; 3]);

    match calc {
        ColorCalc::Shadow => existing_rgb.then(|| half_luminance(existing)),
        // Color calculations only apply to RGB pixels
        _ if color & 0x8000 == 0 => Some(color),
        ColorCalc::Replace => Some(color),
        ColorCalc::HalfLuminance => Some(half_luminance(color)),
        ColorCalc::HalfTransparency => {
            Some(if existing_rgb { average(color, existing) } else { color })
        }
        ColorCalc::Gouraud => Some(apply_gouraud(color, shade)),
        ColorCalc::GouraudHalfLuminance => Some(half_luminance(apply_gouraud(color, shade))),
        ColorCalc::GouraudHalfTransparency => {
            let color = apply_gouraud(color, shade);
            Some(if existing_rgb { average(color, existing) } else { color })
        }
    }
}

/// Owns a private mirror of VDP1 VRAM and registers and draws into the shared framebuffers.
#[derive(Debug)]
pub struct Vdp1Context {
    vram: Vram,
    registers: Vdp1Registers,
    framebuffers: SharedFramebuffers,
    draw_framebuffer: usize,
    enhancements: EnhancementConfig,
}

impl Vdp1Context {
    #[must_use]
    pub fn new(
        snapshot: Vdp1Snapshot,
        framebuffers: SharedFramebuffers,
        enhancements: EnhancementConfig,
    ) -> Self {
        Self {
            vram: snapshot.vram,
            registers: snapshot.registers,
            framebuffers,
            draw_framebuffer: snapshot.display_framebuffer ^ 1,
            enhancements,
        }
    }

    pub fn resync(&mut self, snapshot: Vdp1Snapshot) {
        self.vram = snapshot.vram;
        self.registers = snapshot.registers;
        self.draw_framebuffer = snapshot.display_framebuffer ^ 1;
    }

    pub fn set_enhancements(&mut self, enhancements: EnhancementConfig) {
        self.enhancements = enhancements;
    }

    #[must_use]
    pub fn draw_framebuffer(&self) -> usize {
        self.draw_framebuffer
    }

    pub fn apply_write(&mut self, write: &VdpWrite) {
        let address = write.address as usize;
        match (write.target, write.value) {
            (WriteTarget::Vdp1Vram, WriteValue::Byte(value)) => {
                self.vram[address & (VRAM_LEN - 1)] = value;
            }
            (WriteTarget::Vdp1Vram, WriteValue::Word(value)) => {
                write_u16(&mut self.vram[..], address, value);
            }
            (WriteTarget::Vdp1Register, WriteValue::Word(value)) => {
                self.registers.write(write.address, value);
            }
            _ => {}
        }
    }

    pub fn swap(&mut self, display_framebuffer: usize) {
        self.draw_framebuffer = display_framebuffer ^ 1;
    }

    pub fn erase(&mut self, framebuffer: usize, params: EraseParams) {
        log::trace!("VDP1 erase of framebuffer {framebuffer}: {params:?}");

        let mut fb = self.framebuffers.lock(framebuffer);
        let x1 = cmp::min(params.x1 as usize, FRAMEBUFFER_ROW_BYTES / 2);
        let y1 = cmp::min(params.y1 as usize, FRAMEBUFFER_ROWS - 1);
        for y in params.y0 as usize..=y1 {
            for x in params.x0 as usize..x1 {
                let offset = y * FRAMEBUFFER_ROW_BYTES + 2 * x;
                write_u16(&mut fb.pixels[..], offset, params.value);
                write_u16(&mut fb.mesh[..], offset, 0);
            }
        }
    }

    pub fn draw(&mut self, command: &DrawCommand) {
        let framebuffers = self.framebuffers.clone();
        let mut fb = framebuffers.lock(self.draw_framebuffer);

        let [a, b, c, d] = command.vertices;
        let shades = command.gouraud.map(|table| table.map(shade_channels));
        match command.primitive {
            Primitive::Sprite | Primitive::Polygon => self.draw_quad(&mut fb, command),
            Primitive::Line => {
                let shade = shades.map(|s| (s[0], s[1]));
                self.draw_span(&mut fb, command, a, b, None, shade, false);
            }
            Primitive::Polylines => {
                let edges = [(a, b, 0, 1), (b, c, 1, 2), (c, d, 2, 3), (d, a, 3, 0)];
                for (start, end, i, j) in edges {
                    let shade = shades.map(|s| (s[i], s[j]));
                    self.draw_span(&mut fb, command, start, end, None, shade, false);
                }
            }
        }
    }

    fn draw_quad(&self, fb: &mut SpriteFramebuffer, command: &DrawCommand) {
        if let Some(texture) = command.texture
            && (texture.width == 0 || texture.height == 0)
        {
            return;
        }

        let [a, b, c, d] = command.vertices;
        let steps = cmp::max(major_length(a, d), major_length(b, c));

        let mut left = PointStepper::new(a, d, steps);
        let mut right = PointStepper::new(b, c, steps);
        let mut v = command.texture.map(|texture| Stepper::new(0, texture.height as i32 - 1, steps));
        let mut shades = command.gouraud.map(|table| {
            let s = table.map(shade_channels);
            (ShadeStepper::new(s[0], s[3], steps), ShadeStepper::new(s[1], s[2], steps))
        });

        for _ in 0..=steps {
            let row = command.texture.zip(v.map(|v| v.current()));
            let shade = shades.map(|(left, right)| (left.current(), right.current()));
            self.draw_span(fb, command, left.current(), right.current(), row, shade, true);

            left.advance();
            right.advance();
            if let Some(v) = &mut v {
                v.advance();
            }
            if let Some((left, right)) = &mut shades {
                left.advance();
                right.advance();
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_span(
        &self,
        fb: &mut SpriteFramebuffer,
        command: &DrawCommand,
        start: Point,
        end: Point,
        texture_row: Option<(Texture, i32)>,
        shade: Option<(Shade, Shade)>,
        antialias: bool,
    ) {
        let len = major_length(start, end);
        let mut position = PointStepper::new(start, end, len);
        let mut u = texture_row.map(|(texture, _)| Stepper::new(0, texture.width as i32 - 1, len));
        let mut shade = shade.map(|(start, end)| ShadeStepper::new(start, end, len));

        let mut previous: Option<Point> = None;
        for _ in 0..=len {
            let point = position.current();

            let texel = match (texture_row, u) {
                (Some((texture, v)), Some(u)) => self.texel(&texture, command, u.current(), v),
                _ => Texel::Pixel(command.color),
            };

            match texel {
                Texel::EndCode => break,
                Texel::Transparent => {}
                Texel::Pixel(color) => {
                    let current_shade = shade.map(|s| s.current());
                    if antialias
                        && let Some(previous) = previous
                        && previous.x != point.x
                        && previous.y != point.y
                    {
                        // Fill the diagonal gap so adjacent lines leave no holes
                        self.plot(fb, command, Point::new(point.x, previous.y), color, current_shade);
                    }
                    self.plot(fb, command, point, color, current_shade);
                }
            }

            previous = Some(point);
            position.advance();
            if let Some(u) = &mut u {
                u.advance();
            }
            if let Some(shade) = &mut shade {
                shade.advance();
            }
        }
    }

    fn texel(&self, texture: &Texture, command: &DrawCommand, u: i32, v: i32) -> Texel {
        let u = if texture.flip_h { texture.width as i32 - 1 - u } else { u };
        let v = if texture.flip_v { texture.height as i32 - 1 - v } else { v };
        let index = (v.max(0) as usize) * texture.width as usize + u.max(0) as usize;
        let base = texture.address as usize;
        let mode = command.mode;

        let (raw, end_code) = match mode.color_mode {
            ColorMode::Bank16 | ColorMode::Lookup16 => {
                let byte = self.vram[(base + index / 2) & (VRAM_LEN - 1)];
                let dot = if index & 1 == 0 { byte >> 4 } else { byte & 0xF };
                (u16::from(dot), 0xF)
            }
            ColorMode::Bank64 | ColorMode::Bank128 | ColorMode::Bank256 => {
                (u16::from(self.vram[(base + index) & (VRAM_LEN - 1)]), 0xFF)
            }
            ColorMode::Rgb => (read_u16(&self.vram[..], base + 2 * index), 0x7FFF),
        };

        if mode.end_codes && raw == end_code {
            return Texel::EndCode;
        }
        if mode.transparent_pixels && raw == 0 {
            return Texel::Transparent;
        }

        let color = command.color;
        Texel::Pixel(match mode.color_mode {
            ColorMode::Bank16 => (color & 0xFFF0) | raw,
            ColorMode::Lookup16 => {
                read_u16(&self.vram[..], (usize::from(color) << 3) + 2 * usize::from(raw))
            }
            ColorMode::Bank64 => (color & 0xFFC0) | (raw & 0x3F),
            ColorMode::Bank128 => (color & 0xFF80) | (raw & 0x7F),
            ColorMode::Bank256 => (color & 0xFF00) | raw,
            ColorMode::Rgb => raw,
        })
    }

    fn plot(
        &self,
        fb: &mut SpriteFramebuffer,
        command: &DrawCommand,
        point: Point,
        color: u16,
        shade: Option<Shade>,
    ) {
        if !command.system_clip.contains(point.x, point.y) {
            return;
        }

        match command.mode.user_clip {
            UserClip::Disabled => {}
            UserClip::DrawInside => {
                if !command.user_clip.contains(point.x, point.y) {
                    return;
                }
            }
            UserClip::DrawOutside => {
                if command.user_clip.contains(point.x, point.y) {
                    return;
                }
            }
        }

        let x = point.x;
        let mut y = point.y;
        if self.registers.double_interlace {
            if (y & 1 == 1) != self.registers.draw_odd_lines {
                return;
            }
            y >>= 1;
        }

        if x < 0
            || y < 0
            || x >= self.registers.framebuffer_width() as i32
            || y >= FRAMEBUFFER_ROWS as i32
        {
            return;
        }

        let mesh_pixel = command.mode.mesh && (point.x ^ point.y) & 1 == 1;
        let transparent_meshes = self.enhancements.transparent_meshes;
        if mesh_pixel && !transparent_meshes {
            return;
        }

        let row = y as usize * FRAMEBUFFER_ROW_BYTES;
        if self.registers.pixel_8bit {
            let offset = row + x as usize;
            if mesh_pixel {
                fb.mesh[offset] = color as u8;
            } else {
                fb.pixels[offset] = color as u8;
                if transparent_meshes {
                    fb.mesh[offset] = 0;
                }
            }
            return;
        }

        let offset = row + 2 * x as usize;
        let plane = if mesh_pixel { &mut fb.mesh } else { &mut fb.pixels };
        let existing = read_u16(&plane[..], offset);
        let value = if command.mode.msb_on {
            Some(existing | 0x8000)
        } else {
            shade_pixel(command.mode.color_calc, color, existing, shade)
        };

        if let Some(value) = value {
            write_u16(&mut plane[..], offset, value);
            if !mesh_pixel && transparent_meshes {
                write_u16(&mut fb.mesh[..], offset, 0);
            }
        }
    }
}

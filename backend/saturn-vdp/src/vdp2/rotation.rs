//! Rotation parameter tables and the per-pixel affine transform used by RBG0/RBG1
//!
//! All fixed-point values are converted to 16 fractional bits when the table is read.

use crate::vdp2::cram::ColorRam;
use crate::vdp2::registers::{FRACTION_BITS, Vdp2Registers};
use saturn_common::num::{GetBit, read_u16, read_u32, sign_extend};

pub const PARAMETER_TABLE_LEN: u32 = 0x80;

#[inline]
fn mul(a: i64, b: i64) -> i64 {
    (a * b) >> FRACTION_BITS
}

#[inline]
fn int_to_fixed(value: i64) -> i64 {
    value << FRACTION_BITS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationParams {
    pub xst: i64,
    pub yst: i64,
    pub zst: i64,
    pub delta_xst: i64,
    pub delta_yst: i64,
    pub delta_x: i64,
    pub delta_y: i64,
    pub matrix: [i64; 6],
    pub px: i64,
    pub py: i64,
    pub pz: i64,
    pub cx: i64,
    pub cy: i64,
    pub cz: i64,
    pub mx: i64,
    pub my: i64,
    pub kx: i64,
    pub ky: i64,
    pub kast: i64,
    pub delta_kast: i64,
    pub delta_kax: i64,
}

impl RotationParams {
    #[must_use]
    pub fn read(vram: &[u8], address: u32) -> Self {
        let address = address as usize;
        let word = |offset: usize| read_u32(vram, address + offset);
        let half = |offset: usize| i64::from(sign_extend(read_u16(vram, address + offset).into(), 14));
        // Signed value with 10 fractional bits stored in bits 6 and up
        let fixed10 = |offset: usize, bits: u8| i64::from(sign_extend(word(offset) >> 6, bits)) << 6;

        Self {
            xst: fixed10(0x00, 23),
            yst: fixed10(0x04, 23),
            zst: fixed10(0x08, 23),
            delta_xst: fixed10(0x0C, 13),
            delta_yst: fixed10(0x10, 13),
            delta_x: fixed10(0x14, 13),
            delta_y: fixed10(0x18, 13),
            matrix: [0x1C, 0x20, 0x24, 0x28, 0x2C, 0x30].map(|offset| fixed10(offset, 14)),
            px: int_to_fixed(half(0x34)),
            py: int_to_fixed(half(0x36)),
            pz: int_to_fixed(half(0x38)),
            cx: int_to_fixed(half(0x3C)),
            cy: int_to_fixed(half(0x3E)),
            cz: int_to_fixed(half(0x40)),
            mx: fixed10(0x44, 24),
            my: fixed10(0x48, 24),
            kx: i64::from(sign_extend(word(0x4C), 24)),
            ky: i64::from(sign_extend(word(0x50), 24)),
            kast: i64::from(word(0x54) & !0x3F),
            delta_kast: fixed10(0x58, 20),
            delta_kax: fixed10(0x5C, 20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoefficientMode {
    ScaleBoth,
    ScaleX,
    ScaleY,
    ViewpointX,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefficientParams {
    pub one_word: bool,
    pub mode: CoefficientMode,
    pub line_color: bool,
    pub table_offset: u32,
    pub in_cram: bool,
}

impl CoefficientParams {
    fn from_registers(registers: &Vdp2Registers, parameter: usize) -> Option<Self> {
        let control = registers.coefficient_control(parameter);
        control.bit(0).then(|| Self {
            one_word: control.bit(1),
            mode: match control.bits(2..=3) {
                0 => CoefficientMode::ScaleBoth,
                1 => CoefficientMode::ScaleX,
                2 => CoefficientMode::ScaleY,
                _ => CoefficientMode::ViewpointX,
            },
            line_color: control.bit(4),
            table_offset: registers.coefficient_table_offset(parameter),
            in_cram: registers.coefficients_in_cram(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coefficient {
    pub value: i64,
    pub transparent: bool,
    pub line_color: u8,
}

fn read_coefficient(
    params: &CoefficientParams,
    index: u32,
    vram: &[u8],
    cram: &ColorRam,
) -> Coefficient {
    let entry = (params.table_offset << 16) | (index & 0xFFFF);

    if params.one_word {
        let address = (entry as usize) << 1;
        let raw = if params.in_cram {
            cram.storage_word(0x800 | (address & 0x7FE))
        } else {
            read_u16(vram, address)
        };
        return Coefficient {
            value: i64::from(sign_extend(u32::from(raw & 0x7FFF), 15)) << 6,
            transparent: raw.bit(15),
            line_color: 0,
        };
    }

    let address = (entry as usize) << 2;
    let raw = if params.in_cram {
        let offset = address & 0x7FC;
        (u32::from(cram.storage_word(0x800 | offset)) << 16)
            | u32::from(cram.storage_word(0x800 | (offset + 2)))
    } else {
        read_u32(vram, address)
    };
    Coefficient {
        value: i64::from(sign_extend(raw & 0x00FF_FFFF, 24)),
        transparent: raw.bit(31),
        line_color: raw.bits(24..=30) as u8,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSample {
    pub x: i32,
    pub y: i32,
    pub transparent: bool,
    pub line_color: Option<u8>,
}

/// Rotation state for one parameter set on one line; sampling a pixel only needs additions and
/// a few multiplies.
#[derive(Debug, Clone, Copy)]
pub struct RotationLine {
    xsp: i64,
    ysp: i64,
    xp: i64,
    yp: i64,
    dx: i64,
    dy: i64,
    kx: i64,
    ky: i64,
    line_ka: i64,
    delta_kax: i64,
    coefficients: Option<CoefficientParams>,
}

impl RotationLine {
    #[must_use]
    pub fn new(registers: &Vdp2Registers, vram: &[u8], parameter: usize, y: u32) -> Self {
        let address = registers.rotation_table_address() + PARAMETER_TABLE_LEN * parameter as u32;
        let params = RotationParams::read(vram, address);
        Self::from_params(&params, CoefficientParams::from_registers(registers, parameter), y)
    }

    #[must_use]
    pub fn from_params(
        params: &RotationParams,
        coefficients: Option<CoefficientParams>,
        y: u32,
    ) -> Self {
        let y = i64::from(y);
        let [a, b, c, d, e, f] = params.matrix;

        let sx = params.xst + params.delta_xst * y - params.px;
        let sy = params.yst + params.delta_yst * y - params.py;
        let sz = params.zst - params.pz;

        let vx = params.px - params.cx;
        let vy = params.py - params.cy;
        let vz = params.pz - params.cz;

        Self {
            xsp: mul(a, sx) + mul(b, sy) + mul(c, sz),
            ysp: mul(d, sx) + mul(e, sy) + mul(f, sz),
            xp: mul(a, vx) + mul(b, vy) + mul(c, vz) + params.cx + params.mx,
            yp: mul(d, vx) + mul(e, vy) + mul(f, vz) + params.cy + params.my,
            dx: mul(a, params.delta_x) + mul(b, params.delta_y),
            dy: mul(d, params.delta_x) + mul(e, params.delta_y),
            kx: params.kx,
            ky: params.ky,
            line_ka: params.kast + params.delta_kast * y,
            delta_kax: params.delta_kax,
            coefficients,
        }
    }

    #[must_use]
    pub fn sample(&self, x: u32, vram: &[u8], cram: &ColorRam) -> RotationSample {
        let x = i64::from(x);
        let (mut kx, mut ky, mut xp) = (self.kx, self.ky, self.xp);
        let mut transparent = false;
        let mut line_color = None;

        if let Some(params) = &self.coefficients {
            let index = ((self.line_ka + self.delta_kax * x) >> FRACTION_BITS) as u32;
            let coefficient = read_coefficient(params, index, vram, cram);
            transparent = coefficient.transparent;
            if params.line_color {
                line_color = Some(coefficient.line_color);
            }
            match params.mode {
                CoefficientMode::ScaleBoth => {
                    kx = coefficient.value;
                    ky = coefficient.value;
                }
                CoefficientMode::ScaleX => kx = coefficient.value,
                CoefficientMode::ScaleY => ky = coefficient.value,
                CoefficientMode::ViewpointX => xp = coefficient.value,
            }
        }

        let screen_x = mul(kx, self.xsp + self.dx * x) + xp;
        let screen_y = mul(ky, self.ysp + self.dy * x) + self.yp;
        RotationSample {
            x: (screen_x >> FRACTION_BITS) as i32,
            y: (screen_y >> FRACTION_BITS) as i32,
            transparent,
            line_color,
        }
    }
}

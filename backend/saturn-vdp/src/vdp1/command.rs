//! VDP1 command table decoding
//!
//! Each command table entry is 32 bytes (16 big-endian words) in VDP1 VRAM.

use bincode::{Decode, Encode};
use saturn_common::num::{GetBit, read_u16, sign_extend};

pub const COMMAND_TABLE_LEN: u32 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CommandKind {
    NormalSprite,
    ScaledSprite,
    DistortedSprite,
    Polygon,
    Polylines,
    Line,
    UserClipping,
    SystemClipping,
    LocalCoordinates,
    Invalid(u8),
}

impl CommandKind {
    fn from_bits(bits: u16) -> Self {
        match bits & 0xF {
            0x0 => Self::NormalSprite,
            0x1 => Self::ScaledSprite,
            0x2 | 0x3 => Self::DistortedSprite,
            0x4 => Self::Polygon,
            0x5 | 0x7 => Self::Polylines,
            0x6 => Self::Line,
            0x8 | 0xB => Self::UserClipping,
            0x9 => Self::SystemClipping,
            0xA => Self::LocalCoordinates,
            other => Self::Invalid(other as u8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum JumpMode {
    Next,
    Assign,
    Call,
    Return,
}

/// Anchor used by scaled sprites that specify a zoom point and display size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ZoomPoint {
    /// Two explicit corner vertices
    TwoCorners,
    Anchored { h: Anchor, v: Anchor },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Anchor {
    Start,
    Center,
    End,
}

impl ZoomPoint {
    fn from_bits(bits: u16) -> Self {
        let h = match bits & 3 {
            1 => Anchor::Start,
            2 => Anchor::Center,
            3 => Anchor::End,
            _ => return Self::TwoCorners,
        };
        let v = match (bits >> 2) & 3 {
            1 => Anchor::Start,
            2 => Anchor::Center,
            3 => Anchor::End,
            _ => return Self::TwoCorners,
        };
        Self::Anchored { h, v }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ColorMode {
    Bank16,
    Lookup16,
    Bank64,
    Bank128,
    Bank256,
    Rgb,
}

impl ColorMode {
    fn from_bits(bits: u16) -> Self {
        match bits & 7 {
            0 => Self::Bank16,
            1 => Self::Lookup16,
            2 => Self::Bank64,
            3 => Self::Bank128,
            4 => Self::Bank256,
            _ => Self::Rgb,
        }
    }

    #[must_use]
    pub fn bits_per_texel(self) -> u32 {
        match self {
            Self::Bank16 | Self::Lookup16 => 4,
            Self::Bank64 | Self::Bank128 | Self::Bank256 => 8,
            Self::Rgb => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ColorCalc {
    Replace,
    Shadow,
    HalfLuminance,
    HalfTransparency,
    Gouraud,
    GouraudHalfLuminance,
    GouraudHalfTransparency,
}

impl ColorCalc {
    fn from_bits(bits: u16) -> Self {
        match bits & 7 {
            0 => Self::Replace,
            1 => Self::Shadow,
            2 => Self::HalfLuminance,
            3 => Self::HalfTransparency,
            4 => Self::Gouraud,
            5 => {
                log::debug!("Prohibited VDP1 color calculation mode 5; treating as replace");
                Self::Replace
            }
            6 => Self::GouraudHalfLuminance,
            7 => Self::GouraudHalfTransparency,
            _ => unreachable!("bits & 7 is always <= 7"),
        }
    }

    #[must_use]
    pub fn gouraud(self) -> bool {
        matches!(
            self,
            Self::Gouraud | Self::GouraudHalfLuminance | Self::GouraudHalfTransparency
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum UserClip {
    Disabled,
    DrawInside,
    DrawOutside,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct DrawMode {
    pub msb_on: bool,
    pub pre_clipping: bool,
    pub user_clip: UserClip,
    pub mesh: bool,
    pub end_codes: bool,
    pub transparent_pixels: bool,
    pub color_mode: ColorMode,
    pub color_calc: ColorCalc,
}

impl DrawMode {
    #[must_use]
    pub fn from_word(value: u16) -> Self {
        let user_clip = match (value.bit(10), value.bit(9)) {
            (false, _) => UserClip::Disabled,
            (true, false) => UserClip::DrawInside,
            (true, true) => UserClip::DrawOutside,
        };

        Self {
            msb_on: value.bit(15),
            pre_clipping: !value.bit(11),
            user_clip,
            mesh: value.bit(8),
            end_codes: !value.bit(7),
            transparent_pixels: !value.bit(6),
            color_mode: ColorMode::from_bits(value.bits(3..=5)),
            color_calc: ColorCalc::from_bits(value.bits(0..=2)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Inclusive clipping rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct ClipRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl ClipRect {
    #[must_use]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        (self.x0..=self.x1).contains(&x) && (self.y0..=self.y1).contains(&y)
    }

    #[must_use]
    pub fn intersects(&self, min: Point, max: Point) -> bool {
        max.x >= self.x0 && min.x <= self.x1 && max.y >= self.y0 && min.y <= self.y1
    }
}

/// Raw command table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTable {
    pub address: u32,
    words: [u16; 16],
}

impl CommandTable {
    #[must_use]
    pub fn read(vram: &[u8], address: u32) -> Self {
        let mut words = [0; 16];
        for (i, word) in words.iter_mut().enumerate() {
            *word = read_u16(vram, address as usize + 2 * i);
        }
        Self { address, words }
    }

    #[must_use]
    pub fn end(&self) -> bool {
        self.words[0].bit(15)
    }

    #[must_use]
    pub fn skip(&self) -> bool {
        self.words[0].bit(14)
    }

    #[must_use]
    pub fn jump_mode(&self) -> JumpMode {
        match self.words[0].bits(12..=13) {
            0 => JumpMode::Next,
            1 => JumpMode::Assign,
            2 => JumpMode::Call,
            _ => JumpMode::Return,
        }
    }

    #[must_use]
    pub fn zoom_point(&self) -> ZoomPoint {
        ZoomPoint::from_bits(self.words[0].bits(8..=11))
    }

    #[must_use]
    pub fn flip_h(&self) -> bool {
        self.words[0].bit(4)
    }

    #[must_use]
    pub fn flip_v(&self) -> bool {
        self.words[0].bit(5)
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        CommandKind::from_bits(self.words[0])
    }

    #[must_use]
    pub fn link_address(&self) -> u32 {
        u32::from(self.words[1]) << 3
    }

    #[must_use]
    pub fn draw_mode(&self) -> DrawMode {
        DrawMode::from_word(self.words[2])
    }

    #[must_use]
    pub fn color(&self) -> u16 {
        self.words[3]
    }

    #[must_use]
    pub fn char_address(&self) -> u32 {
        u32::from(self.words[4]) << 3
    }

    /// Character width and height in texels.
    #[must_use]
    pub fn char_size(&self) -> (u32, u32) {
        let size = self.words[5];
        (u32::from(size.bits(8..=13)) * 8, u32::from(size.bits(0..=7)))
    }

    /// Vertex `i` (A through D) with 13-bit sign extension.
    #[must_use]
    pub fn vertex(&self, i: usize) -> Point {
        Point::new(
            sign_extend(self.words[6 + 2 * i].into(), 13),
            sign_extend(self.words[7 + 2 * i].into(), 13),
        )
    }

    #[must_use]
    pub fn gouraud_address(&self) -> u32 {
        u32::from(self.words[14]) << 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Primitive {
    Sprite,
    Polygon,
    Polylines,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Texture {
    pub address: u32,
    pub width: u32,
    pub height: u32,
    pub flip_h: bool,
    pub flip_v: bool,
}

/// A fully resolved drawing command: vertices have local coordinates applied, sprite corners are
/// computed, and the gouraud table is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct DrawCommand {
    pub address: u32,
    pub primitive: Primitive,
    pub mode: DrawMode,
    pub color: u16,
    pub texture: Option<Texture>,
    /// A, B, C, D in drawing order; lines only use A and B
    pub vertices: [Point; 4],
    pub gouraud: Option<[u16; 4]>,
    pub system_clip: ClipRect,
    pub user_clip: ClipRect,
}

impl DrawCommand {
    #[must_use]
    pub fn bounding_box(&self) -> (Point, Point) {
        let count = if self.primitive == Primitive::Line { 2 } else { 4 };
        let vertices = &self.vertices[..count];

        let min = Point::new(
            vertices.iter().map(|v| v.x).min().unwrap_or(0),
            vertices.iter().map(|v| v.y).min().unwrap_or(0),
        );
        let max = Point::new(
            vertices.iter().map(|v| v.x).max().unwrap_or(0),
            vertices.iter().map(|v| v.y).max().unwrap_or(0),
        );
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saturn_common::num::write_u16;
    use test_log::test;

    #[test]
    fn decode_command_table() {
        let mut vram = vec![0_u8; 0x80];
        // Jump assign, zoom point center/center, H flip, scaled sprite
        write_u16(&mut vram, 0x20, 0x1A11);
        write_u16(&mut vram, 0x22, 0x0010);
        write_u16(&mut vram, 0x24, 0x8000 | 0x0100 | 0x0080 | (5 << 3) | 3);
        write_u16(&mut vram, 0x2A, (2 << 8) | 24);
        write_u16(&mut vram, 0x2C, 0x1FFF);
        write_u16(&mut vram, 0x2E, 0x0010);

        let table = CommandTable::read(&vram, 0x20);
        assert!(!table.end());
        assert_eq!(table.jump_mode(), JumpMode::Assign);
        assert_eq!(table.kind(), CommandKind::ScaledSprite);
        assert_eq!(
            table.zoom_point(),
            ZoomPoint::Anchored { h: Anchor::Center, v: Anchor::Center }
        );
        assert!(table.flip_h());
        assert_eq!(table.link_address(), 0x80);
        assert_eq!(table.char_size(), (16, 24));
        assert_eq!(table.vertex(0), Point::new(-1, 16));

        let mode = table.draw_mode();
        assert!(mode.msb_on);
        assert!(mode.mesh);
        assert!(!mode.end_codes);
        assert!(mode.transparent_pixels);
        assert_eq!(mode.color_mode, ColorMode::Rgb);
        assert_eq!(mode.color_calc, ColorCalc::HalfTransparency);
    }
}

use bincode::{Decode, Encode};
use saturn_common::num::GetBit;

pub const TVMR: u32 = 0x00;
pub const FBCR: u32 = 0x02;
pub const PTMR: u32 = 0x04;
pub const EWDR: u32 = 0x06;
pub const EWLR: u32 = 0x08;
pub const EWRR: u32 = 0x0A;
pub const ENDR: u32 = 0x0C;
pub const EDSR: u32 = 0x10;
pub const LOPR: u32 = 0x12;
pub const COPR: u32 = 0x14;
pub const MODR: u32 = 0x16;

const VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum PlotTrigger {
    #[default]
    Idle = 0,
    Immediate = 1,
    FrameChange = 2,
}

impl PlotTrigger {
    fn from_word(value: u16) -> Self {
        match value & 3 {
            0 => Self::Idle,
            1 => Self::Immediate,
            2 => Self::FrameChange,
            3 => {
                log::warn!("Prohibited VDP1 plot trigger mode 3 written; treating as idle");
                Self::Idle
            }
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }
}

/// Framebuffer erase rectangle and fill value. X coordinates are in framebuffer words with an
/// exclusive right edge; Y coordinates are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct EraseParams {
    pub value: u16,
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterEffect {
    None,
    StartDrawing,
    StopDrawing,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct Vdp1Registers {
    // TVMR
    pub pixel_8bit: bool,
    pub rotation_16bit: bool,
    pub hdtv: bool,
    pub vblank_erase: bool,
    // FBCR
    pub even_odd_select: bool,
    pub double_interlace: bool,
    pub draw_odd_lines: bool,
    pub manual_frame_change: bool,
    pub frame_change_trigger: bool,
    pub plot_trigger: PlotTrigger,
    pub erase_value: u16,
    pub erase_upper_left: u16,
    pub erase_lower_right: u16,
    // Latched by FBCR writes in manual mode, consumed at the next frame change
    pub manual_swap_pending: bool,
    pub manual_erase_pending: bool,
    // Status
    pub previous_end: bool,
    pub current_end: bool,
    pub last_command_address: u32,
    pub current_command_address: u32,
}

impl Vdp1Registers {
    #[must_use]
    pub fn new() -> Self {
        Self { erase_lower_right: (0x50 << 9) | 0xDF, ..Self::default() }
    }

    #[must_use]
    pub fn framebuffer_width(&self) -> u32 {
        if self.pixel_8bit { 1024 } else { 512 }
    }

    #[must_use]
    pub fn erase_params(&self) -> EraseParams {
        // Horizontal erase coordinates are in units of 8 16-bit words
        EraseParams {
            value: self.erase_value,
            x0: u32::from(self.erase_upper_left.bits(9..=14)) * 8,
            y0: u32::from(self.erase_upper_left.bits(0..=8)),
            x1: u32::from(self.erase_lower_right.bits(9..=15)) * 8,
            y1: u32::from(self.erase_lower_right.bits(0..=8)),
        }
    }

    #[must_use]
    pub fn read(&self, address: u32) -> u16 {
        match address & 0x1E {
            EDSR => (u16::from(self.current_end) << 1) | u16::from(self.previous_end),
            LOPR => (self.last_command_address >> 3) as u16,
            COPR => (self.current_command_address >> 3) as u16,
            MODR => {
                (VERSION << 12)
                    | (u16::from(self.plot_trigger == PlotTrigger::FrameChange) << 8)
                    | (u16::from(self.even_odd_select) << 7)
                    | (u16::from(self.double_interlace) << 6)
                    | (u16::from(self.draw_odd_lines) << 5)
                    | (u16::from(self.manual_frame_change) << 4)
                    | (u16::from(self.vblank_erase) << 3)
                    | (u16::from(self.hdtv) << 2)
                    | (u16::from(self.rotation_16bit) << 1)
                    | u16::from(self.pixel_8bit)
            }
            _ => {
                log::debug!("Read from write-only VDP1 register {address:02X}");
                0
            }
        }
    }

    pub fn write(&mut self, address: u32, value: u16) -> RegisterEffect {
        match address & 0x1E {
            TVMR => {
                self.pixel_8bit = value.bit(0);
                self.rotation_16bit = value.bit(1);
                self.hdtv = value.bit(2);
                self.vblank_erase = value.bit(3);

                log::trace!("TVMR write: {value:04X}");
                log::trace!("  8-bit pixels: {}", self.pixel_8bit);
                log::trace!("  Rotation 16-bit: {}", self.rotation_16bit);
                log::trace!("  HDTV: {}", self.hdtv);
                log::trace!("  VBlank erase: {}", self.vblank_erase);
            }
            FBCR => {
                self.frame_change_trigger = value.bit(0);
                self.manual_frame_change = value.bit(1);
                self.draw_odd_lines = value.bit(2);
                self.double_interlace = value.bit(3);
                self.even_odd_select = value.bit(4);

                if self.manual_frame_change {
                    if self.frame_change_trigger {
                        self.manual_swap_pending = true;
                    } else {
                        self.manual_erase_pending = true;
                    }
                }

                log::trace!("FBCR write: {value:04X}");
                log::trace!("  Manual frame change: {}", self.manual_frame_change);
                log::trace!("  Frame change trigger: {}", self.frame_change_trigger);
                log::trace!("  Double interlace: {}", self.double_interlace);
                log::trace!("  Draw odd lines: {}", self.draw_odd_lines);
            }
            PTMR => {
                self.plot_trigger = PlotTrigger::from_word(value);

                log::trace!("PTMR write: {value:04X} ({:?})", self.plot_trigger);

                if self.plot_trigger == PlotTrigger::Immediate {
                    return RegisterEffect::StartDrawing;
                }
            }
            EWDR => {
                self.erase_value = value;
                log::trace!("EWDR write: {value:04X}");
            }
            EWLR => {
                self.erase_upper_left = value;
                log::trace!("EWLR write: {value:04X}");
            }
            EWRR => {
                self.erase_lower_right = value;
                log::trace!("EWRR write: {value:04X}");
            }
            ENDR => {
                log::trace!("ENDR write: {value:04X}");
                return RegisterEffect::StopDrawing;
            }
            _ => {
                log::debug!("Write to read-only VDP1 register {address:02X}: {value:04X}");
            }
        }

        RegisterEffect::None
    }

    /// Consume the latched manual requests and report whether the frame change should swap and
    /// erase.
    pub fn take_frame_change(&mut self) -> (bool, bool) {
        if !self.manual_frame_change {
            return (true, true);
        }

        let requests = (self.manual_swap_pending, self.manual_erase_pending);
        self.manual_swap_pending = false;
        self.manual_erase_pending = false;
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn manual_frame_change_latches_requests() {
        let mut registers = Vdp1Registers::new();
        assert_eq!(registers.take_frame_change(), (true, true));

        registers.write(FBCR, 0b10);
        assert_eq!(registers.take_frame_change(), (false, true));
        assert_eq!(registers.take_frame_change(), (false, false));

        registers.write(FBCR, 0b11);
        assert_eq!(registers.take_frame_change(), (true, false));
    }

    #[test]
    fn plot_trigger_effects() {
        let mut registers = Vdp1Registers::new();
        assert_eq!(registers.write(PTMR, 1), RegisterEffect::StartDrawing);
        assert_eq!(registers.write(PTMR, 2), RegisterEffect::None);
        assert_eq!(registers.plot_trigger, PlotTrigger::FrameChange);
        assert_eq!(registers.write(ENDR, 0), RegisterEffect::StopDrawing);
        assert_eq!(registers.read(MODR) & 0x0100, 0x0100);
    }

    #[test]
    fn erase_coordinates() {
        let mut registers = Vdp1Registers::new();
        registers.write(EWLR, (2 << 9) | 5);
        registers.write(EWRR, (40 << 9) | 223);
        registers.write(EWDR, 0x8000);

        let params = registers.erase_params();
        assert_eq!(params, EraseParams { value: 0x8000, x0: 16, y0: 5, x1: 320, y1: 223 });
    }
}

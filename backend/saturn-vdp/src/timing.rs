//! Horizontal/vertical phase controller
//!
//! Positions are tracked in system clock cycles within the current line. Phase boundaries are
//! tabulated in dots (horizontal) and lines (vertical) and only change when a new display mode is
//! latched at the start of the last line of a frame.

use crate::vdp2::InterlaceMode;
use crate::vdp2::registers::Vdp2Registers;
use bincode::{Decode, Encode};
use saturn_common::frontend::{FrameSize, TimingMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum HorizontalPhase {
    Active,
    RightBorder,
    Sync,
    LeftBorder,
}

impl HorizontalPhase {
    fn next(self) -> Self {
        match self {
            Self::Active => Self::RightBorder,
            Self::RightBorder => Self::Sync,
            Self::Sync => Self::LeftBorder,
            Self::LeftBorder => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum VerticalPhase {
    Active,
    BottomBorder,
    BlankingAndSync,
    VCounterSkip,
    TopBorder,
    LastLine,
}

impl VerticalPhase {
    fn index(self) -> usize {
        self as usize
    }

    fn next(self) -> Self {
        match self {
            Self::Active => Self::BottomBorder,
            Self::BottomBorder => Self::BlankingAndSync,
            Self::BlankingAndSync => Self::VCounterSkip,
            Self::VCounterSkip => Self::TopBorder,
            Self::TopBorder => Self::LastLine,
            Self::LastLine => Self::Active,
        }
    }
}

// Dot at which each horizontal phase ends, for 320-dot and 352-dot modes
const H_ENDS_320: [u32; 4] = [320, 347, 400, 427];
const H_ENDS_352: [u32; 4] = [352, 375, 432, 455];

// Line at which each vertical phase ends; the last entry is the total line count
const V_ENDS_NTSC_224: [u32; 6] = [224, 232, 237, 255, 262, 263];
const V_ENDS_NTSC_240: [u32; 6] = [240, 240, 245, 255, 262, 263];
const V_ENDS_PAL_224: [u32; 6] = [224, 256, 259, 281, 312, 313];
const V_ENDS_PAL_240: [u32; 6] = [240, 264, 267, 281, 312, 313];
const V_ENDS_PAL_256: [u32; 6] = [256, 272, 275, 281, 312, 313];
const V_ENDS_EXCLUSIVE: [u32; 6] = [480, 490, 496, 505, 524, 525];

/// Display mode decoded from TVMD plus the phase tables derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct DisplayTiming {
    pub timing_mode: TimingMode,
    pub width: u32,
    pub active_lines: u32,
    pub hires: bool,
    pub exclusive: bool,
    pub interlace: InterlaceMode,
    h_ends: [u32; 4],
    v_ends: [u32; 6],
    cycles_per_dot: u32,
}

impl DisplayTiming {
    #[must_use]
    pub fn from_registers(registers: &Vdp2Registers, timing_mode: TimingMode) -> Self {
        let hreso = registers.horizontal_resolution();
        let vreso = registers.vertical_resolution();
        let exclusive = hreso & 4 != 0;
        let hires = hreso & 2 != 0;
        let wide = hreso & 1 != 0;

        let (width, base_ends) = if wide { (352, H_ENDS_352) } else { (320, H_ENDS_320) };
        let (width, h_ends) =
            if hires { (width * 2, base_ends.map(|end| end * 2)) } else { (width, base_ends) };

        // Hi-res modes draw twice the dots in the same line time; exclusive monitor lines are half
        // as long
        let cycles_per_dot = match (hires, exclusive) {
            (false, false) => 4,
            (true, false) | (false, true) => 2,
            (true, true) => 1,
        };

        let v_ends = if exclusive {
            V_ENDS_EXCLUSIVE
        } else {
            match (timing_mode, vreso) {
                (TimingMode::Ntsc, 0) => V_ENDS_NTSC_224,
                (TimingMode::Ntsc, _) => {
                    if vreso != 1 {
                        log::warn!("Prohibited NTSC vertical resolution {vreso}; using 240 lines");
                    }
                    V_ENDS_NTSC_240
                }
                (TimingMode::Pal, 0) => V_ENDS_PAL_224,
                (TimingMode::Pal, 1) => V_ENDS_PAL_240,
                (TimingMode::Pal, _) => V_ENDS_PAL_256,
            }
        };

        let interlace = if exclusive { InterlaceMode::None } else { registers.interlace() };

        Self {
            timing_mode,
            width,
            active_lines: v_ends[0],
            hires,
            exclusive,
            interlace,
            h_ends,
            v_ends,
            cycles_per_dot,
        }
    }

    /// Output frame size; double-density interlace doubles the height.
    #[must_use]
    pub fn frame_size(&self) -> FrameSize {
        let height = match self.interlace {
            InterlaceMode::DoubleDensity => 2 * self.active_lines,
            InterlaceMode::None | InterlaceMode::SingleDensity => self.active_lines,
        };
        FrameSize { width: self.width, height }
    }

    #[must_use]
    pub fn cycles_per_line(&self) -> u32 {
        self.h_ends[3] * self.cycles_per_dot
    }

    #[must_use]
    pub fn lines_per_frame(&self) -> u32 {
        self.v_ends[5]
    }

    #[must_use]
    pub fn cycles_per_frame(&self) -> u64 {
        u64::from(self.cycles_per_line()) * u64::from(self.lines_per_frame())
    }

    fn h_end_cycles(&self, phase: HorizontalPhase) -> u32 {
        self.h_ends[phase as usize] * self.cycles_per_dot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Horizontal { phase: HorizontalPhase, line: u32, vertical: VerticalPhase },
    Vertical { phase: VerticalPhase, display: DisplayTiming, odd_field: bool },
    /// A new display mode with a different frame size was latched
    ResolutionChanged(FrameSize),
}

const TVSTAT_EXLTFG: u16 = 1 << 9;
const TVSTAT_EXSYFG: u16 = 1 << 8;
const TVSTAT_VBLANK: u16 = 1 << 3;
const TVSTAT_HBLANK: u16 = 1 << 2;
const TVSTAT_ODD: u16 = 1 << 1;
const TVSTAT_PAL: u16 = 1 << 0;

#[derive(Debug, Clone, Encode, Decode)]
pub struct PhaseController {
    timing_mode: TimingMode,
    display: DisplayTiming,
    h_phase: HorizontalPhase,
    v_phase: VerticalPhase,
    line: u32,
    line_cycles: u32,
    odd_field: bool,
    external_latch_flag: bool,
    external_sync_flag: bool,
    latched_counters: (u16, u16),
}

impl PhaseController {
    /// Starts at the beginning of the last line so that the first advance begins a new frame.
    #[must_use]
    pub fn new(registers: &Vdp2Registers, timing_mode: TimingMode) -> Self {
        let display = DisplayTiming::from_registers(registers, timing_mode);
        Self {
            timing_mode,
            display,
            h_phase: HorizontalPhase::Active,
            v_phase: VerticalPhase::LastLine,
            line: display.lines_per_frame() - 1,
            line_cycles: 0,
            odd_field: false,
            external_latch_flag: false,
            external_sync_flag: false,
            latched_counters: (0, 0),
        }
    }

    #[must_use]
    pub fn display(&self) -> &DisplayTiming {
        &self.display
    }

    #[must_use]
    pub fn horizontal_phase(&self) -> HorizontalPhase {
        self.h_phase
    }

    #[must_use]
    pub fn vertical_phase(&self) -> VerticalPhase {
        self.v_phase
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn odd_field(&self) -> bool {
        self.odd_field
    }

    #[must_use]
    pub fn in_vblank(&self) -> bool {
        self.v_phase != VerticalPhase::Active
    }

    #[must_use]
    pub fn in_hblank(&self) -> bool {
        self.h_phase != HorizontalPhase::Active
    }

    /// Video standard applied at the next display mode latch.
    #[must_use]
    pub fn timing_mode(&self) -> TimingMode {
        self.timing_mode
    }

    /// Takes effect at the next display mode latch.
    pub fn set_timing_mode(&mut self, timing_mode: TimingMode) {
        self.timing_mode = timing_mode;
    }

    /// Apply the display mode currently programmed in the registers. Returns the new frame size if
    /// it differs from the previously latched mode.
    pub fn latch_display(&mut self, registers: &Vdp2Registers) -> Option<FrameSize> {
        let display = DisplayTiming::from_registers(registers, self.timing_mode);
        if display == self.display {
            return None;
        }

        let previous_size = self.display.frame_size();
        self.display = display;

        log::debug!(
            "Latched display mode: {}x{} {:?} {} (exclusive={})",
            display.width,
            display.active_lines,
            display.interlace,
            display.timing_mode,
            display.exclusive
        );

        let size = display.frame_size();
        (size != previous_size).then_some(size)
    }

    /// Consume `cycles` system clock cycles, reporting every phase entered along the way. The
    /// display mode in `registers` is latched on entering the last line of a frame.
    pub fn advance(
        &mut self,
        cycles: u64,
        registers: &Vdp2Registers,
        mut on_event: impl FnMut(PhaseEvent),
    ) {
        let mut remaining = cycles;
        while remaining != 0 {
            let end = self.display.h_end_cycles(self.h_phase);
            let until_end = u64::from(end.saturating_sub(self.line_cycles));
            if remaining < until_end {
                self.line_cycles += remaining as u32;
                return;
            }

            remaining -= until_end;
            self.line_cycles = end;
            self.step_horizontal(registers, &mut on_event);
        }
    }

    fn step_horizontal(
        &mut self,
        registers: &Vdp2Registers,
        on_event: &mut impl FnMut(PhaseEvent),
    ) {
        self.h_phase = self.h_phase.next();
        if self.h_phase == HorizontalPhase::Active {
            self.line_cycles = 0;
            self.next_line(registers, on_event);
        }

        on_event(PhaseEvent::Horizontal {
            phase: self.h_phase,
            line: self.line,
            vertical: self.v_phase,
        });
    }

    fn next_line(&mut self, registers: &Vdp2Registers, on_event: &mut impl FnMut(PhaseEvent)) {
        self.line += 1;

        if self.line >= self.display.lines_per_frame() {
            self.line = 0;
            self.odd_field = self.display.interlace != InterlaceMode::None && !self.odd_field;
            self.enter_vertical(VerticalPhase::Active, on_event);
            return;
        }

        // Zero-length phases are entered and left on the same line
        while self.v_phase != VerticalPhase::LastLine
            && self.line >= self.display.v_ends[self.v_phase.index()]
        {
            let phase = self.v_phase.next();
            if phase == VerticalPhase::LastLine {
                let resolution_changed = self.latch_display(registers);
                self.line = self.display.lines_per_frame() - 1;
                self.enter_vertical(phase, on_event);
                if let Some(size) = resolution_changed {
                    on_event(PhaseEvent::ResolutionChanged(size));
                }
            } else {
                self.enter_vertical(phase, on_event);
            }
        }
    }

    fn enter_vertical(&mut self, phase: VerticalPhase, on_event: &mut impl FnMut(PhaseEvent)) {
        self.v_phase = phase;
        on_event(PhaseEvent::Vertical {
            phase,
            display: self.display,
            odd_field: self.odd_field,
        });
    }

    /// HCNT as seen by the counter latch.
    #[must_use]
    pub fn hcnt(&self) -> u16 {
        let dot = self.line_cycles / self.display.cycles_per_dot;
        // Normal-width modes count in hi-res units
        let dot = if self.display.hires { dot } else { dot << 1 };
        (dot & 0x3FF) as u16
    }

    /// VCNT including the jump past the unused counter range at the start of vertical retrace.
    #[must_use]
    pub fn vcnt(&self) -> u16 {
        let total = self.display.lines_per_frame();
        let line = if self.line >= self.display.v_ends[VerticalPhase::VCounterSkip.index()] {
            (self.line + 512 - total) & 0x1FF
        } else {
            self.line
        };

        let vcnt = match self.display.interlace {
            InterlaceMode::DoubleDensity => (line << 1) | u32::from(self.odd_field),
            InterlaceMode::None | InterlaceMode::SingleDensity => line,
        };
        (vcnt & 0x3FF) as u16
    }

    /// Latch HCNT/VCNT from an external signal (light gun).
    pub fn external_latch(&mut self) {
        self.latched_counters = (self.hcnt(), self.vcnt());
        self.external_latch_flag = true;
    }

    /// An external sync signal was detected.
    pub fn external_sync(&mut self) {
        self.external_sync_flag = true;
    }

    #[must_use]
    pub fn latched_hcnt(&self) -> u16 {
        self.latched_counters.0
    }

    #[must_use]
    pub fn latched_vcnt(&self) -> u16 {
        self.latched_counters.1
    }

    /// TVSTAT without side effects.
    #[must_use]
    pub fn peek_tvstat(&self) -> u16 {
        let mut value = 0;
        if self.external_latch_flag {
            value |= TVSTAT_EXLTFG;
        }
        if self.external_sync_flag {
            value |= TVSTAT_EXSYFG;
        }
        if self.in_vblank() {
            value |= TVSTAT_VBLANK;
        }
        if self.in_hblank() {
            value |= TVSTAT_HBLANK;
        }
        if self.odd_field {
            value |= TVSTAT_ODD;
        }
        if self.display.timing_mode == TimingMode::Pal {
            value |= TVSTAT_PAL;
        }
        value
    }

    /// TVSTAT as read through the bus: clears the external latch and sync flags and, when the
    /// external latch is disabled, latches the counters.
    pub fn read_tvstat(&mut self, external_latch_enabled: bool) -> u16 {
        let value = self.peek_tvstat();
        self.external_latch_flag = false;
        self.external_sync_flag = false;
        if !external_latch_enabled {
            self.latched_counters = (self.hcnt(), self.vcnt());
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdp2::registers::TVMD;
    use test_log::test;

    fn controller(tvmd: u16, timing_mode: TimingMode) -> (Vdp2Registers, PhaseController) {
        let mut registers = Vdp2Registers::new();
        registers.write(TVMD, tvmd);
        let controller = PhaseController::new(&registers, timing_mode);
        (registers, controller)
    }

    #[test]
    fn frame_cycles_match_line_and_dot_totals() {
        let cases = [
            (0x0000, TimingMode::Ntsc, 263 * 427 * 4),
            (0x0001, TimingMode::Ntsc, 263 * 455 * 4),
            (0x0012, TimingMode::Ntsc, 263 * 854 * 2),
            (0x0023, TimingMode::Pal, 313 * 910 * 2),
            (0x0004, TimingMode::Ntsc, 525 * 427 * 2),
            (0x0006, TimingMode::Pal, 525 * 854),
        ];

        for (tvmd, timing_mode, expected) in cases {
            let (registers, mut controller) = controller(tvmd, timing_mode);
            let display = *controller.display();
            assert_eq!(display.cycles_per_frame(), expected, "TVMD={tvmd:04X}");

            // Move to the start of a frame, then run exactly one frame
            controller.advance(u64::from(display.cycles_per_line()), &registers, |_| {});
            assert_eq!((controller.line(), controller.vertical_phase()), (0, VerticalPhase::Active));

            let mut frames = 0;
            let mut hblanks = 0;
            controller.advance(expected, &registers, |event| match event {
                PhaseEvent::Vertical { phase: VerticalPhase::Active, .. } => frames += 1,
                PhaseEvent::Horizontal { phase: HorizontalPhase::RightBorder, .. } => hblanks += 1,
                _ => {}
            });

            assert_eq!(frames, 1);
            assert_eq!(hblanks, display.lines_per_frame());
            assert_eq!(controller.line(), 0);
            assert_eq!(controller.horizontal_phase(), HorizontalPhase::Active);
        }
    }

    #[test]
    fn every_vertical_phase_is_entered_once_per_frame() {
        // NTSC 240 has a zero-length bottom border
        let (registers, mut controller) = controller(0x0010, TimingMode::Ntsc);
        let cycles = controller.display().cycles_per_frame();

        let mut phases = Vec::new();
        controller.advance(cycles, &registers, |event| {
            if let PhaseEvent::Vertical { phase, .. } = event {
                phases.push(phase);
            }
        });

        assert_eq!(
            phases,
            vec![
                VerticalPhase::Active,
                VerticalPhase::BottomBorder,
                VerticalPhase::BlankingAndSync,
                VerticalPhase::VCounterSkip,
                VerticalPhase::TopBorder,
                VerticalPhase::LastLine,
            ]
        );
    }

    #[test]
    fn vcnt_skips_unused_range() {
        let (registers, mut controller) = controller(0x0000, TimingMode::Ntsc);
        let line_cycles = u64::from(controller.display().cycles_per_line());

        controller.advance(line_cycles, &registers, |_| {});
        assert_eq!(controller.vcnt(), 0);

        controller.advance(254 * line_cycles, &registers, |_| {});
        assert_eq!(controller.line(), 254);
        assert_eq!(controller.vcnt(), 254);

        controller.advance(line_cycles, &registers, |_| {});
        assert_eq!(controller.line(), 255);
        assert_eq!(controller.vcnt(), 0x1F8);
    }

    #[test]
    fn hcnt_counts_in_hires_units() {
        let (registers, mut controller) = controller(0x0000, TimingMode::Ntsc);
        controller.advance(10 * 4 + 3, &registers, |_| {});
        assert_eq!(controller.hcnt(), 20);
    }

    #[test]
    fn tvstat_read_clears_external_flags_but_peek_does_not() {
        let (_, mut controller) = controller(0x0000, TimingMode::Pal);
        controller.external_latch();
        controller.external_sync();

        let flags = TVSTAT_EXLTFG | TVSTAT_EXSYFG;
        assert_eq!(controller.peek_tvstat() & flags, flags);
        assert_eq!(controller.peek_tvstat() & TVSTAT_PAL, TVSTAT_PAL);

        let value = controller.read_tvstat(true);
        assert_eq!(value & flags, flags);
        assert_eq!(controller.peek_tvstat() & flags, 0);
    }

    #[test]
    fn double_density_doubles_height_and_toggles_field() {
        let (registers, mut controller) = controller(0x00C0, TimingMode::Ntsc);
        assert_eq!(controller.display().frame_size(), FrameSize { width: 320, height: 448 });

        let line_cycles = u64::from(controller.display().cycles_per_line());
        controller.advance(line_cycles, &registers, |_| {});
        let first = controller.odd_field();

        let frame_cycles = controller.display().cycles_per_frame();
        controller.advance(frame_cycles, &registers, |_| {});
        assert_ne!(controller.odd_field(), first);
    }

    #[test]
    fn display_mode_latches_on_last_line_only() {
        let (mut registers, mut controller) = controller(0x0000, TimingMode::Ntsc);
        let line_cycles = u64::from(controller.display().cycles_per_line());
        controller.advance(line_cycles, &registers, |_| {});

        registers.write(TVMD, 0x0001);
        let mut changes = Vec::new();
        controller.advance(100 * line_cycles, &registers, |event| {
            if let PhaseEvent::ResolutionChanged(size) = event {
                changes.push(size);
            }
        });
        assert!(changes.is_empty());
        assert_eq!(controller.display().width, 320);

        // Lines 101..=262; the mode is latched on entering line 262
        controller.advance(162 * line_cycles, &registers, |event| {
            if let PhaseEvent::ResolutionChanged(size) = event {
                changes.push(size);
            }
        });
        assert_eq!(changes, vec![FrameSize { width: 352, height: 224 }]);
        assert_eq!(controller.vertical_phase(), VerticalPhase::LastLine);
        assert_eq!(controller.display().width, 352);
        assert_eq!(controller.latch_display(&registers), None);
    }
}

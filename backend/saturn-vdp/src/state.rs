//! Persisted VDP hardware state

use crate::vdp1::registers::Vdp1Registers;
use crate::vdp1::{self, SharedFramebuffers, Vdp1Snapshot};
use crate::vdp2::cram::ColorRam;
use crate::vdp2::registers::Vdp2Registers;
use crate::vdp2::{self, Vdp2Snapshot};
use bincode::{Decode, Encode};

/// Registers and memories of both VDPs. The façade is the only writer; renderers receive
/// snapshots and then follow along through write events.
#[derive(Debug, Encode, Decode)]
pub struct VdpState {
    pub vdp1_vram: vdp1::Vram,
    pub vdp1_registers: Vdp1Registers,
    pub vdp2_vram: vdp2::Vram,
    pub cram: ColorRam,
    pub vdp2_registers: Vdp2Registers,
    pub framebuffers: SharedFramebuffers,
    pub display_framebuffer: usize,
}

impl Default for VdpState {
    fn default() -> Self {
        Self::new()
    }
}

impl VdpState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            vdp1_vram: vdp1::Vram::new(),
            vdp1_registers: Vdp1Registers::new(),
            vdp2_vram: vdp2::Vram::new(),
            cram: ColorRam::new(),
            vdp2_registers: Vdp2Registers::new(),
            framebuffers: SharedFramebuffers::new(),
            display_framebuffer: 0,
        }
    }

    /// A hard reset clears every memory; a soft reset only returns the registers to their power-on
    /// values.
    pub fn reset(&mut self, hard: bool) {
        log::debug!("VDP state reset (hard={hard})");

        self.vdp1_registers = Vdp1Registers::new();
        self.vdp2_registers = Vdp2Registers::new();
        self.cram.set_mode(self.vdp2_registers.cram_mode());

        if hard {
            self.vdp1_vram.fill(0);
            self.vdp2_vram.fill(0);
            self.cram = ColorRam::new();
            self.framebuffers.clear();
            self.display_framebuffer = 0;
        }
    }

    #[must_use]
    pub fn vdp1_snapshot(&self) -> Vdp1Snapshot {
        Vdp1Snapshot {
            vram: self.vdp1_vram.clone(),
            registers: self.vdp1_registers.clone(),
            display_framebuffer: self.display_framebuffer,
        }
    }

    #[must_use]
    pub fn vdp2_snapshot(&self) -> Vdp2Snapshot {
        Vdp2Snapshot {
            vram: self.vdp2_vram.clone(),
            cram: self.cram.clone(),
            registers: self.vdp2_registers.clone(),
        }
    }

    /// Copy for a save state. Unlike the live state, the copy owns its framebuffers.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        Self {
            vdp1_vram: self.vdp1_vram.clone(),
            vdp1_registers: self.vdp1_registers.clone(),
            vdp2_vram: self.vdp2_vram.clone(),
            cram: self.cram.clone(),
            vdp2_registers: self.vdp2_registers.clone(),
            framebuffers: self.framebuffers.deep_clone(),
            display_framebuffer: self.display_framebuffer,
        }
    }

    /// Replace the contents of this state with `other`. Framebuffer contents are copied in place so
    /// that renderers holding framebuffer handles keep seeing the live buffers.
    pub fn load_from(&mut self, other: Self) {
        self.framebuffers.copy_from(&other.framebuffers);
        self.vdp1_vram = other.vdp1_vram;
        self.vdp1_registers = other.vdp1_registers;
        self.vdp2_vram = other.vdp2_vram;
        self.cram = other.cram;
        self.vdp2_registers = other.vdp2_registers;
        self.display_framebuffer = other.display_framebuffer & 1;

        // The color cache is not persisted
        self.cram.rebuild_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saturn_common::frontend::Color;
    use test_log::test;

    #[test]
    fn soft_reset_keeps_memory() {
        let mut state = VdpState::new();
        state.vdp1_vram[0x100] = 0xAB;
        state.vdp2_vram[0x200] = 0xCD;
        state.cram.write_word(0x02, 0x001F);
        state.vdp2_registers.write(crate::vdp2::registers::BGON, 0x0001);

        state.reset(false);
        assert_eq!(state.vdp1_vram[0x100], 0xAB);
        assert_eq!(state.vdp2_vram[0x200], 0xCD);
        assert_eq!(state.cram.color(1), Color::rgb(255, 0, 0));
        assert_eq!(state.vdp2_registers.raw(crate::vdp2::registers::BGON), 0);

        state.reset(true);
        assert_eq!(state.vdp1_vram[0x100], 0);
        assert_eq!(state.cram.color(1), Color::BLACK);
    }

    #[test]
    fn load_keeps_framebuffer_handles() {
        let mut state = VdpState::new();
        let handle = state.framebuffers.clone();

        let saved = state.deep_clone();
        saved.framebuffers.lock(1).pixels[4] = 0x77;
        let mut loaded = saved.deep_clone();
        loaded.cram.write_word(0x04, 0x03E0);

        state.load_from(loaded);
        assert_eq!(handle.lock(1).pixels[4], 0x77);
        assert_eq!(state.cram.color(2), Color::rgb(0, 255, 0));
    }

    #[test]
    fn encoded_state_round_trips() {
        let mut state = VdpState::new();
        state.vdp2_vram[0x1234] = 0x56;
        state.framebuffers.lock(0).pixels[8] = 0x9A;
        state.cram.write_word(0x06, 0x7C00);

        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&state, config).unwrap();
        let (decoded, _): (VdpState, usize) = bincode::decode_from_slice(&bytes, config).unwrap();

        let mut restored = VdpState::new();
        restored.load_from(decoded);
        assert_eq!(restored.vdp2_vram[0x1234], 0x56);
        assert_eq!(restored.framebuffers.lock(0).pixels[8], 0x9A);
        assert_eq!(restored.cram.color(3), Color::rgb(0, 0, 255));
    }
}

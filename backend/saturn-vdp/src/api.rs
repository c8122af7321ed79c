//! VDP public interface
//!
//! [`Vdp`] owns all VDP state, drives the phase controller and the VDP1 command processor, and
//! forwards every state change to the active renderer.

use crate::renderer::hardware::HardwareHandle;
use crate::renderer::null::NullRenderer;
use crate::renderer::{
    self, FrameParams, RendererBlob, RendererCallbacks, VdpRenderer, VdpWrite, WriteTarget,
};
use crate::state::VdpState;
use crate::timing::{DisplayTiming, HorizontalPhase, PhaseController, PhaseEvent, VerticalPhase};
use crate::vdp1::FRAMEBUFFER_LEN;
use crate::vdp1::processor::Vdp1Processor;
use crate::vdp1::registers::{PlotTrigger, RegisterEffect};
use crate::vdp2::cram::CRAM_LEN;
use crate::vdp2::registers::{HCNT, RAMCTL, TVSTAT, VCNT};
use crate::vdp2::{Layer, LayerAvailability};
use crate::{vdp1, vdp2};
use bincode::{Decode, Encode};
use saturn_common::frontend::{FrameSize, TimingMode};
use saturn_common::num::{U16Ext, read_u16, write_u16};
use saturn_config::{EnhancementConfig, VdpConfig, VdpRendererKind};
use std::mem;

const VDP1_REGISTER_MASK: u32 = 0x1F;
const VDP2_REGISTER_MASK: u32 = 0x1FF;

/// Signals raised towards the interrupt controller and the rest of the system. Invoked
/// synchronously from [`Vdp::advance`].
pub trait VdpSignals {
    fn hblank(&mut self, _active: bool) {}

    fn vblank(&mut self, _active: bool) {}

    /// Start of vertical blanking, after the frame has been handed to the renderer.
    fn vblank_in(&mut self) {}

    /// VDP1 reached the end of its command list.
    fn sprite_draw_end(&mut self) {}

    /// Raised once per advance in which any display status bit may have changed, so that callers
    /// polling TVSTAT can skip re-reading it otherwise.
    fn status_changed(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignals;

impl VdpSignals for NoSignals {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdpRegion {
    Vdp1Vram,
    Vdp1Framebuffer,
    Vdp1Registers,
    Vdp2Vram,
    Vdp2Cram,
    Vdp2Registers,
}

#[derive(Debug, Encode, Decode)]
pub struct VdpSaveState {
    state: VdpState,
    timing: PhaseController,
    vdp1: Vdp1Processor,
    renderer_kind: VdpRendererKind,
    renderer_blob: RendererBlob,
}

pub struct Vdp {
    config: VdpConfig,
    state: VdpState,
    timing: PhaseController,
    vdp1: Vdp1Processor,
    renderer: Box<dyn VdpRenderer>,
    callbacks: RendererCallbacks,
    events: Vec<PhaseEvent>,
}

fn word_byte(word: u16, address: u32) -> u8 {
    if address & 1 == 0 { word.msb() } else { word.lsb() }
}

impl Vdp {
    #[must_use]
    pub fn new(config: VdpConfig, callbacks: RendererCallbacks) -> Self {
        let state = VdpState::new();
        let timing_mode = config.forced_timing_mode.unwrap_or_default();
        let timing = PhaseController::new(&state.vdp2_registers, timing_mode);

        let renderer = renderer::create_renderer(&config, &state, callbacks.clone())
            .unwrap_or_else(|| {
                log::warn!("Falling back to null renderer");
                Box::new(NullRenderer::new(callbacks.clone()))
            });

        Self {
            config,
            state,
            timing,
            vdp1: Vdp1Processor::new(),
            renderer,
            callbacks,
            events: Vec::with_capacity(16),
        }
    }

    pub fn reset(&mut self, hard: bool) {
        log::info!("VDP reset (hard={hard})");

        self.vdp1.stop();
        self.renderer.vdp1_sync();
        self.state.reset(hard);
        if hard {
            self.vdp1 = Vdp1Processor::new();
        }

        let timing_mode = self.timing_mode();
        self.timing = PhaseController::new(&self.state.vdp2_registers, timing_mode);
        self.renderer.reset(&self.state, hard);
    }

    /// Region-derived timing mode. A forced timing mode in the config always wins.
    pub fn set_timing_mode(&mut self, timing_mode: TimingMode) {
        let timing_mode = self.config.forced_timing_mode.unwrap_or(timing_mode);
        self.timing.set_timing_mode(timing_mode);
    }

    fn timing_mode(&self) -> TimingMode {
        self.config.forced_timing_mode.unwrap_or(self.timing.timing_mode())
    }

    /// Run both VDPs for `cycles` system clock cycles.
    pub fn advance(&mut self, cycles: u64, signals: &mut impl VdpSignals) {
        let Self { state, vdp1, renderer, .. } = self;
        let ended = vdp1.run(cycles, &state.vdp1_vram[..], &mut state.vdp1_registers, |command| {
            renderer.vdp1_draw(command);
        });
        if ended {
            self.renderer.vdp1_end_frame();
            signals.sprite_draw_end();
        }

        let mut events = mem::take(&mut self.events);
        self.timing.advance(cycles, &self.state.vdp2_registers, |event| events.push(event));

        for &event in &events {
            self.handle_phase_event(event, signals);
        }
        if !events.is_empty() {
            signals.status_changed();
        }

        events.clear();
        self.events = events;
    }

    fn handle_phase_event(&mut self, event: PhaseEvent, signals: &mut impl VdpSignals) {
        match event {
            PhaseEvent::Horizontal {
                phase: HorizontalPhase::RightBorder,
                line,
                vertical: VerticalPhase::Active,
            } => {
                self.renderer.vdp2_draw_line(line);
                signals.hblank(true);
            }
            PhaseEvent::Horizontal { phase: HorizontalPhase::RightBorder, .. } => {
                signals.hblank(true);
            }
            PhaseEvent::Horizontal { phase: HorizontalPhase::Active, .. } => {
                signals.hblank(false);
            }
            PhaseEvent::Horizontal { .. } => {}
            PhaseEvent::Vertical { phase: VerticalPhase::Active, display, odd_field } => {
                signals.vblank(false);
                let frame = self.frame_params(&display, odd_field);
                self.renderer.vdp2_begin_frame(frame);
            }
            PhaseEvent::Vertical { phase: VerticalPhase::BottomBorder, .. } => {
                self.renderer.vdp2_end_frame();
                signals.vblank(true);
                signals.vblank_in();
                self.vdp1_frame_change();
            }
            PhaseEvent::Vertical { .. } => {}
            PhaseEvent::ResolutionChanged(size) => {
                log::debug!("VDP2 resolution changed to {}x{}", size.width, size.height);
                self.callbacks.vdp2_resolution_changed(size);
            }
        }
    }

    fn frame_params(&self, display: &DisplayTiming, odd_field: bool) -> FrameParams {
        FrameParams {
            size: display.frame_size(),
            hires: display.hires,
            interlace: display.interlace,
            odd_field,
            display_framebuffer: self.state.display_framebuffer,
            sprite_8bit: self.state.vdp1_registers.pixel_8bit,
        }
    }

    fn vdp1_frame_change(&mut self) {
        let registers = &mut self.state.vdp1_registers;
        let (swap, erase) = registers.take_frame_change();
        let erase = erase || (registers.manual_frame_change && registers.vblank_erase);
        let erase_params = registers.erase_params();

        if swap {
            if self.vdp1.is_drawing() {
                self.vdp1.stop();
            }

            self.state.display_framebuffer ^= 1;
            log::debug!("VDP1 framebuffer swap; displaying {}", self.state.display_framebuffer);
            self.renderer.vdp1_swap(self.state.display_framebuffer);
        }

        if erase {
            self.renderer.vdp1_erase(self.state.display_framebuffer ^ 1, erase_params);
        }

        if swap && self.state.vdp1_registers.plot_trigger == PlotTrigger::FrameChange {
            self.vdp1.start(&mut self.state.vdp1_registers);
        }
    }

    // Bus interface

    #[must_use]
    pub fn read_byte(&mut self, region: VdpRegion, address: u32) -> u8 {
        match region {
            VdpRegion::Vdp1Registers | VdpRegion::Vdp2Registers => {
                word_byte(self.read_word(region, address), address)
            }
            _ => self.peek_byte(region, address),
        }
    }

    #[must_use]
    pub fn read_word(&mut self, region: VdpRegion, address: u32) -> u16 {
        if region == VdpRegion::Vdp2Registers {
            let address = address & VDP2_REGISTER_MASK & !1;
            if address == TVSTAT {
                let external_latch = self.state.vdp2_registers.external_latch_enabled();
                return self.timing.read_tvstat(external_latch);
            }
        }

        self.peek_word(region, address)
    }

    /// Read without side effects.
    #[must_use]
    pub fn peek_byte(&mut self, region: VdpRegion, address: u32) -> u8 {
        match region {
            VdpRegion::Vdp1Vram => self.state.vdp1_vram[address as usize & (vdp1::VRAM_LEN - 1)],
            VdpRegion::Vdp1Framebuffer => {
                self.renderer.vdp1_sync();
                let framebuffer = self.state.framebuffers.lock(self.state.display_framebuffer ^ 1);
                framebuffer.pixels[address as usize & (FRAMEBUFFER_LEN - 1)]
            }
            VdpRegion::Vdp2Vram => self.state.vdp2_vram[address as usize & (vdp2::VRAM_LEN - 1)],
            VdpRegion::Vdp2Cram => self.state.cram.read_byte(address),
            VdpRegion::Vdp1Registers | VdpRegion::Vdp2Registers => {
                word_byte(self.peek_word(region, address), address)
            }
        }
    }

    /// Read without side effects.
    #[must_use]
    pub fn peek_word(&mut self, region: VdpRegion, address: u32) -> u16 {
        match region {
            VdpRegion::Vdp1Vram => read_u16(&self.state.vdp1_vram[..], address as usize),
            VdpRegion::Vdp1Framebuffer => {
                self.renderer.vdp1_sync();
                let framebuffer = self.state.framebuffers.lock(self.state.display_framebuffer ^ 1);
                read_u16(&framebuffer.pixels[..], address as usize)
            }
            VdpRegion::Vdp1Registers => {
                self.state.vdp1_registers.read(address & VDP1_REGISTER_MASK)
            }
            VdpRegion::Vdp2Vram => read_u16(&self.state.vdp2_vram[..], address as usize),
            VdpRegion::Vdp2Cram => self.state.cram.read_word(address),
            VdpRegion::Vdp2Registers => match address & VDP2_REGISTER_MASK & !1 {
                TVSTAT => self.timing.peek_tvstat(),
                HCNT => self.timing.latched_hcnt(),
                VCNT => self.timing.latched_vcnt(),
                address => self.state.vdp2_registers.read(address),
            },
        }
    }

    pub fn write_byte(&mut self, region: VdpRegion, address: u32, value: u8) {
        match region {
            VdpRegion::Vdp1Registers => {
                log::debug!("Ignoring byte write to VDP1 register {address:02X}: {value:02X}");
            }
            VdpRegion::Vdp1Vram => {
                self.poke_byte(region, address, value);
                self.vdp1.charge(self.config.vram_write_penalty_cycles);
            }
            _ => self.poke_byte(region, address, value),
        }
    }

    pub fn write_word(&mut self, region: VdpRegion, address: u32, value: u16) {
        match region {
            VdpRegion::Vdp1Registers => {
                let address = address & VDP1_REGISTER_MASK & !1;
                let effect = self.state.vdp1_registers.write(address, value);
                self.renderer.write(VdpWrite::word(WriteTarget::Vdp1Register, address, value));

                match effect {
                    RegisterEffect::None => {}
                    RegisterEffect::StartDrawing => self.vdp1.start(&mut self.state.vdp1_registers),
                    RegisterEffect::StopDrawing => self.vdp1.stop(),
                }
            }
            VdpRegion::Vdp1Vram => {
                self.poke_word(region, address, value);
                self.vdp1.charge(self.config.vram_write_penalty_cycles);
            }
            _ => self.poke_word(region, address, value),
        }
    }

    /// Write without side effects beyond the stored value. Draw start/stop requests and the VRAM
    /// write penalty are not applied.
    pub fn poke_byte(&mut self, region: VdpRegion, address: u32, value: u8) {
        match region {
            VdpRegion::Vdp1Vram => {
                let address = address & (vdp1::VRAM_LEN as u32 - 1);
                self.state.vdp1_vram[address as usize] = value;
                self.renderer.write(VdpWrite::byte(WriteTarget::Vdp1Vram, address, value));
            }
            VdpRegion::Vdp1Framebuffer => {
                self.renderer.vdp1_sync();
                let address = address as usize & (FRAMEBUFFER_LEN - 1);
                let mut framebuffer =
                    self.state.framebuffers.lock(self.state.display_framebuffer ^ 1);
                framebuffer.pixels[address] = value;
                framebuffer.mesh[address] = 0;
            }
            VdpRegion::Vdp1Registers => {
                let address = address & VDP1_REGISTER_MASK;
                let mut word = self.state.vdp1_registers.read(address & !1);
                if address & 1 == 0 {
                    word.set_msb(value);
                } else {
                    word.set_lsb(value);
                }
                self.poke_word(region, address, word);
            }
            VdpRegion::Vdp2Vram => {
                let address = address & (vdp2::VRAM_LEN as u32 - 1);
                self.state.vdp2_vram[address as usize] = value;
                self.renderer.write(VdpWrite::byte(WriteTarget::Vdp2Vram, address, value));
            }
            VdpRegion::Vdp2Cram => {
                let address = address & (CRAM_LEN as u32 - 1);
                self.state.cram.write_byte(address, value);
                self.renderer.write(VdpWrite::byte(WriteTarget::Vdp2Cram, address, value));
            }
            VdpRegion::Vdp2Registers => {
                let address = address & VDP2_REGISTER_MASK;
                let word = self.state.vdp2_registers.write_byte(address, value);
                self.vdp2_register_written(address & !1, word);
            }
        }
    }

    /// Write without side effects beyond the stored value. Draw start/stop requests and the VRAM
    /// write penalty are not applied.
    pub fn poke_word(&mut self, region: VdpRegion, address: u32, value: u16) {
        match region {
            VdpRegion::Vdp1Vram => {
                let address = address & (vdp1::VRAM_LEN as u32 - 1) & !1;
                write_u16(&mut self.state.vdp1_vram[..], address as usize, value);
                self.renderer.write(VdpWrite::word(WriteTarget::Vdp1Vram, address, value));
            }
            VdpRegion::Vdp1Framebuffer => {
                self.renderer.vdp1_sync();
                let address = address as usize & (FRAMEBUFFER_LEN - 1);
                let mut framebuffer =
                    self.state.framebuffers.lock(self.state.display_framebuffer ^ 1);
                write_u16(&mut framebuffer.pixels[..], address, value);
                write_u16(&mut framebuffer.mesh[..], address, 0);
            }
            VdpRegion::Vdp1Registers => {
                let address = address & VDP1_REGISTER_MASK & !1;
                // Start/stop requests are dropped
                let _ = self.state.vdp1_registers.write(address, value);
                self.renderer.write(VdpWrite::word(WriteTarget::Vdp1Register, address, value));
            }
            VdpRegion::Vdp2Vram => {
                let address = address & (vdp2::VRAM_LEN as u32 - 1) & !1;
                write_u16(&mut self.state.vdp2_vram[..], address as usize, value);
                self.renderer.write(VdpWrite::word(WriteTarget::Vdp2Vram, address, value));
            }
            VdpRegion::Vdp2Cram => {
                let address = address & (CRAM_LEN as u32 - 1) & !1;
                self.state.cram.write_word(address, value);
                self.renderer.write(VdpWrite::word(WriteTarget::Vdp2Cram, address, value));
            }
            VdpRegion::Vdp2Registers => {
                let address = address & VDP2_REGISTER_MASK & !1;
                self.state.vdp2_registers.write(address, value);
                self.vdp2_register_written(address, self.state.vdp2_registers.raw(address));
            }
        }
    }

    fn vdp2_register_written(&mut self, address: u32, word: u16) {
        if address == RAMCTL {
            self.state.cram.set_mode(self.state.vdp2_registers.cram_mode());
        }
        self.renderer.write(VdpWrite::word(WriteTarget::Vdp2Register, address, word));
    }

    /// Latch HCNT/VCNT from an external signal.
    pub fn external_latch(&mut self) {
        if self.state.vdp2_registers.external_latch_enabled() {
            self.timing.external_latch();
        }
    }

    pub fn external_sync(&mut self) {
        self.timing.external_sync();
    }

    // Renderer management

    #[must_use]
    pub fn renderer_kind(&self) -> VdpRendererKind {
        self.renderer.kind()
    }

    /// Presentation-thread handle when a GPU renderer is active.
    #[must_use]
    pub fn hardware_handle(&self) -> Option<HardwareHandle> {
        self.renderer.hardware_handle()
    }

    /// Replace the active renderer with a new one of `kind`. Returns false and keeps the current
    /// renderer if the new one cannot be created.
    pub fn switch_renderer(&mut self, kind: VdpRendererKind) -> bool {
        let config = VdpConfig { renderer: kind, ..self.config };
        let renderer = renderer::create_renderer(&config, &self.state, self.callbacks.clone());
        if !self.install_renderer(renderer) {
            return false;
        }

        self.config.renderer = kind;
        true
    }

    /// Install an externally constructed renderer. `None` or an invalid renderer is rejected and the
    /// current renderer stays active.
    pub fn install_renderer(&mut self, renderer: Option<Box<dyn VdpRenderer>>) -> bool {
        let Some(mut renderer) = renderer else {
            log::error!("Renderer construction failed; keeping {} renderer", self.renderer.kind());
            return false;
        };

        if !renderer.is_valid() {
            log::error!(
                "{} renderer is not valid; keeping {} renderer",
                renderer.kind(),
                self.renderer.kind()
            );
            return false;
        }

        // Pending VDP1 draws must reach the shared framebuffers before the new renderer reads them
        self.renderer.vdp1_sync();

        renderer.set_callbacks(self.callbacks.clone());
        renderer.configure_enhancements(self.config.enhancements.clamp_for(renderer.kind()));
        for layer in Layer::ALL {
            renderer.set_layer_enabled(layer, self.renderer.layer_enabled(layer));
        }
        renderer.post_load_state_sync(&self.state);

        if self.timing.vertical_phase() == VerticalPhase::Active {
            let frame = self.frame_params(self.timing.display(), self.timing.odd_field());
            renderer.vdp2_begin_frame(frame);
        }

        log::info!("Switched from {} renderer to {} renderer", self.renderer.kind(), renderer.kind());
        self.config.renderer = renderer.kind();
        self.renderer = renderer;
        true
    }

    pub fn set_enhancements(&mut self, enhancements: EnhancementConfig) {
        self.config.enhancements = enhancements;
        self.renderer.configure_enhancements(enhancements.clamp_for(self.renderer.kind()));
    }

    // Save states

    /// Capture the full VDP state. Returns `None` if the renderer state cannot be serialized.
    #[must_use]
    pub fn save_state(&mut self) -> Option<VdpSaveState> {
        self.renderer.pre_save_state_sync();

        let renderer_blob = match self.renderer.save_state() {
            Ok(blob) => blob,
            Err(err) => {
                log::error!("Failed to save {} renderer state: {err}", self.renderer.kind());
                return None;
            }
        };

        Some(VdpSaveState {
            state: self.state.deep_clone(),
            timing: self.timing.clone(),
            vdp1: self.vdp1.clone(),
            renderer_kind: self.renderer.kind(),
            renderer_blob,
        })
    }

    /// Restore a saved state. The renderer blob is validated before anything is modified; returns
    /// false and leaves the current state untouched if validation fails.
    pub fn load_state(&mut self, save_state: VdpSaveState) -> bool {
        if let Err(err) = self.renderer.validate_state(&save_state.renderer_blob) {
            log::error!("Rejecting VDP save state: {err}");
            return false;
        }

        let VdpSaveState { state, timing, vdp1, renderer_kind, renderer_blob } = save_state;
        if renderer_kind != self.renderer.kind() {
            log::info!(
                "Save state was created with {renderer_kind} renderer; {} renderer will rebuild \
                 from VDP state",
                self.renderer.kind()
            );
        }

        self.renderer.pre_save_state_sync();
        self.state.load_from(state);
        self.timing = timing;
        self.timing.set_timing_mode(self.timing_mode());
        self.vdp1 = vdp1;

        if let Err(err) = self.renderer.load_state(&renderer_blob) {
            log::error!("Failed to apply {} renderer state: {err}", self.renderer.kind());
        }
        self.renderer.post_load_state_sync(&self.state);

        if self.timing.vertical_phase() == VerticalPhase::Active {
            let frame = self.frame_params(self.timing.display(), self.timing.odd_field());
            self.renderer.vdp2_begin_frame(frame);
        }

        true
    }

    // Queries

    #[must_use]
    pub fn layer_availability(&self) -> LayerAvailability {
        self.state.vdp2_registers.availability()
    }

    /// Frame size of the currently latched display mode.
    #[must_use]
    pub fn resolution(&self) -> FrameSize {
        self.timing.display().frame_size()
    }

    /// The next line starts a new frame.
    #[must_use]
    pub fn is_last_line(&self) -> bool {
        self.timing.vertical_phase() == VerticalPhase::LastLine
    }

    #[must_use]
    pub fn in_vblank(&self) -> bool {
        self.timing.in_vblank()
    }

    #[must_use]
    pub fn in_hblank(&self) -> bool {
        self.timing.in_hblank()
    }

    #[must_use]
    pub fn display_timing(&self) -> &DisplayTiming {
        self.timing.display()
    }

    #[must_use]
    pub fn is_vdp1_drawing(&self) -> bool {
        self.vdp1.is_drawing()
    }

    #[must_use]
    pub fn layer_enabled(&self, layer: Layer) -> bool {
        self.renderer.layer_enabled(layer)
    }

    pub fn set_layer_enabled(&mut self, layer: Layer, enabled: bool) {
        self.renderer.set_layer_enabled(layer, enabled);
    }
}

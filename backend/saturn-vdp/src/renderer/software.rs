//! CPU renderer. VDP1 rasterization, VDP2 compositing, and alternate-field deinterlacing can each
//! run on a dedicated thread; every thread keeps its own mirror of the memory it reads.

pub mod worker;

use crate::renderer::software::worker::{EventHandler, RenderEvent, Unit};
use crate::renderer::{
    FrameParams, RendererBlob, RendererCallbacks, RendererCapabilities, RendererError, StateError,
    VdpRenderer, VdpWrite,
};
use crate::state::VdpState;
use crate::vdp1::command::DrawCommand;
use crate::vdp1::rasterizer::Vdp1Context;
use crate::vdp1::registers::EraseParams;
use crate::vdp2::compositor::Vdp2Context;
use crate::vdp2::{InterlaceMode, LAYER_COUNT, Layer};
use bincode::{Decode, Encode};
use saturn_common::frontend::{Color, FrameSize};
use saturn_config::{EnhancementConfig, SoftwareThreadingConfig, VdpRendererKind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const STATE_VERSION: u16 = 1;

#[derive(Debug, Clone, Encode, Decode)]
struct FrameOutput {
    size: FrameSize,
    pixels: Vec<Color>,
}

impl FrameOutput {
    fn new(size: FrameSize) -> Self {
        Self { size, pixels: vec![Color::BLACK; (size.width * size.height) as usize] }
    }

    fn resize(&mut self, size: FrameSize) {
        if self.size != size {
            log::debug!("Software renderer output resized to {}x{}", size.width, size.height);
            *self = Self::new(size);
        }
    }

    fn copy_row(&mut self, row: u32, line: &[Color]) {
        let width = self.size.width as usize;
        let start = row as usize * width;
        if let Some(target) = self.pixels.get_mut(start..start + width) {
            let len = width.min(line.len());
            target[..len].copy_from_slice(&line[..len]);
        }
    }
}

type SharedOutput = Arc<Mutex<FrameOutput>>;

fn lock_output(output: &SharedOutput) -> MutexGuard<'_, FrameOutput> {
    output.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Vdp1Drawer {
    context: Vdp1Context,
    callbacks: RendererCallbacks,
}

impl EventHandler for Vdp1Drawer {
    fn handle(&mut self, event: RenderEvent) {
        match event {
            RenderEvent::Vdp1Reset(snapshot) => self.context.resync(*snapshot),
            RenderEvent::Write(write) => self.context.apply_write(&write),
            RenderEvent::Writes(writes) => {
                for write in &writes {
                    self.context.apply_write(write);
                }
            }
            RenderEvent::Configure(enhancements) => self.context.set_enhancements(enhancements),
            RenderEvent::Callbacks(callbacks) => self.callbacks = callbacks,
            RenderEvent::Vdp1Draw(command) => self.context.draw(&command),
            RenderEvent::Vdp1Erase { framebuffer, params } => {
                self.context.erase(framebuffer, params);
            }
            RenderEvent::Vdp1Swap { display_framebuffer } => self.context.swap(display_framebuffer),
            RenderEvent::Vdp1EndFrame => self.callbacks.vdp1_frame_drawn(),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRole {
    /// Draws the field being displayed and delivers the finished frame
    Primary { has_helper: bool },
    /// Draws only the alternate field when deinterlacing
    Alternate,
}

struct Vdp2Drawer {
    context: Vdp2Context,
    output: SharedOutput,
    callbacks: RendererCallbacks,
    role: FieldRole,
    enhancements: EnhancementConfig,
    frame: FrameParams,
    line: Vec<Color>,
}

impl Vdp2Drawer {
    fn new(
        state: &VdpState,
        output: SharedOutput,
        callbacks: RendererCallbacks,
        role: FieldRole,
        enhancements: EnhancementConfig,
    ) -> Self {
        Self {
            context: Vdp2Context::new(
                state.vdp2_snapshot(),
                state.framebuffers.clone(),
                enhancements,
            ),
            output,
            callbacks,
            role,
            enhancements,
            frame: FrameParams::default(),
            line: Vec::new(),
        }
    }

    fn deinterlacing(&self) -> bool {
        self.enhancements.deinterlace && self.frame.interlace == InterlaceMode::DoubleDensity
    }

    fn draw_field_line(&mut self, y: u32, odd: bool) {
        self.line.resize(self.frame.size.width as usize, Color::BLACK);
        self.context.draw_line(y, odd, &mut self.line);
        lock_output(&self.output).copy_row(self.frame.output_row(y, odd), &self.line);
    }

    fn draw_line(&mut self, y: u32) {
        let odd = self.frame.odd_field;
        match self.role {
            FieldRole::Primary { has_helper } => {
                self.draw_field_line(y, odd);
                if self.deinterlacing() && !has_helper {
                    self.draw_field_line(y, !odd);
                }
            }
            FieldRole::Alternate => {
                if self.deinterlacing() {
                    self.draw_field_line(y, !odd);
                }
            }
        }
    }

    fn end_frame(&self) {
        if let FieldRole::Primary { .. } = self.role {
            let output = lock_output(&self.output);
            self.callbacks.framebuffer_ready(&output.pixels, output.size);
            drop(output);

            self.callbacks.vdp2_frame_drawn();
        }
    }
}

impl EventHandler for Vdp2Drawer {
    fn handle(&mut self, event: RenderEvent) {
        match event {
            RenderEvent::Vdp2Reset(snapshot) => self.context.resync(*snapshot),
            RenderEvent::Write(write) => self.context.apply_write(&write),
            RenderEvent::Writes(writes) => {
                for write in &writes {
                    self.context.apply_write(write);
                }
            }
            RenderEvent::Configure(enhancements) => {
                self.enhancements = enhancements;
                self.context.set_enhancements(enhancements);
            }
            RenderEvent::Callbacks(callbacks) => self.callbacks = callbacks,
            RenderEvent::SetLayerEnabled(layer, enabled) => {
                self.context.set_layer_enabled(layer, enabled);
            }
            RenderEvent::Vdp2BeginFrame(frame) => {
                self.frame = frame;
                self.context.begin_frame(frame);
            }
            RenderEvent::Vdp2DrawLine(y) => self.draw_line(y),
            RenderEvent::Vdp2EndFrame => self.end_frame(),
            _ => {}
        }
    }
}

#[derive(Debug, Encode, Decode)]
struct SoftwareSaveState {
    layer_enabled: [bool; LAYER_COUNT],
    output: FrameOutput,
}

pub struct SoftwareRenderer {
    vdp1: Unit<Vdp1Drawer>,
    vdp2: Unit<Vdp2Drawer>,
    deinterlace: Option<Unit<Vdp2Drawer>>,
    callbacks: RendererCallbacks,
    output: SharedOutput,
    layer_enabled: [bool; LAYER_COUNT],
}

impl SoftwareRenderer {
    /// # Errors
    ///
    /// Returns an error if a render thread cannot be spawned.
    pub fn new(
        state: &VdpState,
        callbacks: RendererCallbacks,
        enhancements: EnhancementConfig,
        threading: SoftwareThreadingConfig,
    ) -> Result<Self, RendererError> {
        let output = Arc::new(Mutex::new(FrameOutput::new(FrameParams::default().size)));

        let vdp1 = Unit::new(
            "VDP1 renderer",
            Vdp1Drawer {
                context: Vdp1Context::new(
                    state.vdp1_snapshot(),
                    state.framebuffers.clone(),
                    enhancements,
                ),
                callbacks: callbacks.clone(),
            },
            threading.threaded_vdp1,
        )?;

        let deinterlace = if threading.threaded_deinterlace {
            let drawer = Vdp2Drawer::new(
                state,
                Arc::clone(&output),
                callbacks.clone(),
                FieldRole::Alternate,
                enhancements,
            );
            Some(Unit::new("VDP2 deinterlace renderer", drawer, true)?)
        } else {
            None
        };

        let vdp2 = Unit::new(
            "VDP2 renderer",
            Vdp2Drawer::new(
                state,
                Arc::clone(&output),
                callbacks.clone(),
                FieldRole::Primary { has_helper: deinterlace.is_some() },
                enhancements,
            ),
            threading.threaded_vdp2,
        )?;

        log::info!("Created software renderer with {threading:?}");

        Ok(Self {
            vdp1,
            vdp2,
            deinterlace,
            callbacks,
            output,
            layer_enabled: [true; LAYER_COUNT],
        })
    }

    fn send_vdp2(&mut self, event: impl Fn() -> RenderEvent) {
        self.vdp2.send(event());
        if let Some(deinterlace) = &mut self.deinterlace {
            deinterlace.send(event());
        }
    }

    fn resync(&mut self, state: &VdpState) {
        self.vdp1.send(RenderEvent::Vdp1Reset(Box::new(state.vdp1_snapshot())));
        self.send_vdp2(|| RenderEvent::Vdp2Reset(Box::new(state.vdp2_snapshot())));
    }

    fn sync_all(&mut self) {
        self.vdp1.sync();
        self.vdp2.sync();
        if let Some(deinterlace) = &mut self.deinterlace {
            deinterlace.sync();
        }
    }
}

impl VdpRenderer for SoftwareRenderer {
    fn kind(&self) -> VdpRendererKind {
        VdpRendererKind::Software
    }

    fn capabilities(&self) -> RendererCapabilities {
        RendererCapabilities { is_hardware: false, supports_debug_overlay: false }
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn set_callbacks(&mut self, callbacks: RendererCallbacks) {
        self.vdp1.send(RenderEvent::Callbacks(callbacks.clone()));
        self.send_vdp2(|| RenderEvent::Callbacks(callbacks.clone()));
        self.callbacks = callbacks;
    }

    fn configure_enhancements(&mut self, enhancements: EnhancementConfig) {
        log::debug!("Software renderer enhancements: {enhancements:?}");
        self.vdp1.send(RenderEvent::Configure(enhancements));
        self.send_vdp2(|| RenderEvent::Configure(enhancements));
    }

    fn reset(&mut self, state: &VdpState, hard: bool) {
        self.resync(state);
        self.sync_all();

        if hard {
            lock_output(&self.output).pixels.fill(Color::BLACK);
        }
    }

    fn pre_save_state_sync(&mut self) {
        self.sync_all();
    }

    fn save_state(&mut self) -> Result<RendererBlob, StateError> {
        let output = lock_output(&self.output).clone();
        let state = SoftwareSaveState { layer_enabled: self.layer_enabled, output };
        RendererBlob::encode(VdpRendererKind::Software, STATE_VERSION, &state)
    }

    fn validate_state(&self, blob: &RendererBlob) -> Result<(), StateError> {
        let Some(state) =
            blob.decode::<SoftwareSaveState>(VdpRendererKind::Software, STATE_VERSION)?
        else {
            return Ok(());
        };

        let FrameSize { width, height } = state.output.size;
        if state.output.pixels.len() != (width * height) as usize {
            return Err(StateError::Inconsistent("output pixel count does not match frame size"));
        }

        Ok(())
    }

    fn load_state(&mut self, blob: &RendererBlob) -> Result<(), StateError> {
        let Some(state) =
            blob.decode::<SoftwareSaveState>(VdpRendererKind::Software, STATE_VERSION)?
        else {
            return Ok(());
        };

        self.sync_all();
        *lock_output(&self.output) = state.output;
        for layer in Layer::ALL {
            self.set_layer_enabled(layer, state.layer_enabled[layer.index()]);
        }

        Ok(())
    }

    fn post_load_state_sync(&mut self, state: &VdpState) {
        self.resync(state);
    }

    fn write(&mut self, write: VdpWrite) {
        if write.target.is_vdp1() {
            self.vdp1.write(write);
            return;
        }

        self.vdp2.write(write);
        if let Some(deinterlace) = &mut self.deinterlace {
            deinterlace.write(write);
        }
    }

    fn vdp1_draw(&mut self, command: &DrawCommand) {
        self.vdp1.send(RenderEvent::Vdp1Draw(Box::new(*command)));
    }

    fn vdp1_erase(&mut self, framebuffer: usize, params: EraseParams) {
        self.vdp1.send(RenderEvent::Vdp1Erase { framebuffer, params });
    }

    fn vdp1_swap(&mut self, display_framebuffer: usize) {
        // Draws queued against the old draw buffer must land before it is displayed
        self.vdp1.send(RenderEvent::Vdp1Swap { display_framebuffer });
        self.vdp1.sync();

        self.callbacks.vdp1_framebuffer_swap();
    }

    fn vdp1_end_frame(&mut self) {
        self.vdp1.send(RenderEvent::Vdp1EndFrame);
    }

    fn vdp1_sync(&mut self) {
        self.vdp1.sync();
    }

    fn vdp2_begin_frame(&mut self, frame: FrameParams) {
        lock_output(&self.output).resize(frame.size);
        self.send_vdp2(|| RenderEvent::Vdp2BeginFrame(frame));
    }

    fn vdp2_draw_line(&mut self, y: u32) {
        self.send_vdp2(|| RenderEvent::Vdp2DrawLine(y));
    }

    fn vdp2_end_frame(&mut self) {
        if let Some(deinterlace) = &mut self.deinterlace {
            deinterlace.sync();
        }

        self.vdp2.send(RenderEvent::Vdp2EndFrame);
        self.vdp2.sync();
    }

    fn layer_enabled(&self, layer: Layer) -> bool {
        self.layer_enabled[layer.index()]
    }

    fn set_layer_enabled(&mut self, layer: Layer, enabled: bool) {
        self.layer_enabled[layer.index()] = enabled;
        self.send_vdp2(|| RenderEvent::SetLayerEnabled(layer, enabled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::WriteTarget;
    use crate::vdp2::registers::{BKTAU, TVMD};
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_log::test;

    fn frame_capture() -> (RendererCallbacks, Arc<Mutex<Vec<Color>>>, Arc<AtomicU32>) {
        let pixels = Arc::new(Mutex::new(Vec::new()));
        let frames = Arc::new(AtomicU32::new(0));
        let callbacks = RendererCallbacks::default()
            .on_framebuffer_ready({
                let pixels = Arc::clone(&pixels);
                move |frame, _| *pixels.lock().unwrap() = frame.to_vec()
            })
            .on_vdp2_frame_drawn({
                let frames = Arc::clone(&frames);
                move || {
                    frames.fetch_add(1, Ordering::Relaxed);
                }
            });
        (callbacks, pixels, frames)
    }

    fn draw_back_color_frame(renderer: &mut SoftwareRenderer) {
        // Display on with a red back screen at VRAM 0
        renderer.write(VdpWrite::word(WriteTarget::Vdp2Vram, 0, 0x001F));
        renderer.write(VdpWrite::word(WriteTarget::Vdp2Register, BKTAU, 0));
        renderer.write(VdpWrite::word(WriteTarget::Vdp2Register, BKTAU + 2, 0));
        renderer.write(VdpWrite::word(WriteTarget::Vdp2Register, TVMD, 0x8000));

        let frame = FrameParams::default();
        renderer.vdp2_begin_frame(frame);
        for y in 0..frame.size.height {
            renderer.vdp2_draw_line(y);
        }
        renderer.vdp2_end_frame();
    }

    #[test]
    fn threaded_and_inline_output_match() {
        let state = VdpState::new();
        let mut frames = Vec::new();

        let configs = [SoftwareThreadingConfig::SINGLE_THREADED, SoftwareThreadingConfig::default()];
        for threading in configs {
            let (callbacks, pixels, count) = frame_capture();
            let mut renderer =
                SoftwareRenderer::new(&state, callbacks, EnhancementConfig::default(), threading)
                    .unwrap();
            draw_back_color_frame(&mut renderer);

            assert_eq!(count.load(Ordering::Relaxed), 1);
            frames.push(pixels.lock().unwrap().clone());
        }

        assert_eq!(frames[0].len(), 320 * 224);
        assert!(frames[0].iter().all(|&color| color == Color::rgb(255, 0, 0)));
        assert_eq!(frames[0], frames[1]);
    }

    #[test]
    fn save_state_restores_output_and_layers() {
        let state = VdpState::new();
        let (callbacks, _, _) = frame_capture();
        let mut renderer = SoftwareRenderer::new(
            &state,
            callbacks,
            EnhancementConfig::default(),
            SoftwareThreadingConfig::SINGLE_THREADED,
        )
        .unwrap();
        renderer.set_layer_enabled(Layer::Nbg2, false);
        draw_back_color_frame(&mut renderer);

        renderer.pre_save_state_sync();
        let blob = renderer.save_state().unwrap();

        let (callbacks, _, _) = frame_capture();
        let mut restored = SoftwareRenderer::new(
            &state,
            callbacks,
            EnhancementConfig::default(),
            SoftwareThreadingConfig::default(),
        )
        .unwrap();
        restored.validate_state(&blob).unwrap();
        restored.load_state(&blob).unwrap();

        assert!(!restored.layer_enabled(Layer::Nbg2));
        assert_eq!(lock_output(&restored.output).pixels, lock_output(&renderer.output).pixels);
    }
}

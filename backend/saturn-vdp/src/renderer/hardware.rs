//! GPU renderer
//!
//! VDP1 rasterization stays on the emulation thread. VDP2 work is recorded into a command list per
//! frame; the frontend executes the latest list on its presentation thread through
//! [`HardwareHandle`]. A list that is replaced before it was executed still has its uploads carried
//! into the replacement so the device-side mirrors never miss a write.

pub mod device;

use crate::renderer::hardware::device::{GpuDevice, GpuError, TextureHandle};
use crate::renderer::{
    FrameParams, RendererBlob, RendererCallbacks, RendererCapabilities, RendererError, StateError,
    VdpRenderer, VdpWrite, WriteTarget, WriteValue,
};
use crate::state::VdpState;
use crate::vdp1::command::DrawCommand;
use crate::vdp1::rasterizer::Vdp1Context;
use crate::vdp1::registers::EraseParams;
use crate::vdp1::{SharedFramebuffers, SpriteFramebuffer};
use crate::vdp2::{LAYER_COUNT, Layer, Vdp2Snapshot};
use bincode::{Decode, Encode};
use saturn_common::frontend::{Color, FrameSize};
use saturn_config::{EnhancementConfig, VdpRendererKind};
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const STATE_VERSION: u16 = 1;

#[derive(Debug)]
pub enum GpuCommand {
    Resync(Box<Vdp2Snapshot>),
    Write(VdpWrite),
    SetEnhancements(EnhancementConfig),
    SetLayerEnabled(Layer, bool),
    RestoreOutput { size: FrameSize, pixels: Vec<Color> },
    UploadSprites { index: usize, framebuffer: Box<SpriteFramebuffer> },
    BeginFrame(FrameParams),
    ComposeLines { first: u32, count: u32 },
    Present,
}

impl GpuCommand {
    /// Uploads change device-side state beyond the frame they were recorded in.
    #[must_use]
    pub fn is_upload(&self) -> bool {
        matches!(
            self,
            Self::Resync(_)
                | Self::Write(_)
                | Self::SetEnhancements(_)
                | Self::SetLayerEnabled(..)
                | Self::RestoreOutput { .. }
        )
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resync(_) => "Resync",
            Self::Write(_) => "Write",
            Self::SetEnhancements(_) => "SetEnhancements",
            Self::SetLayerEnabled(..) => "SetLayerEnabled",
            Self::RestoreOutput { .. } => "RestoreOutput",
            Self::UploadSprites { .. } => "UploadSprites",
            Self::BeginFrame(_) => "BeginFrame",
            Self::ComposeLines { .. } => "ComposeLines",
            Self::Present => "Present",
        }
    }
}

#[derive(Debug)]
pub struct CommandList {
    pub frame: u64,
    pub commands: Vec<GpuCommand>,
}

impl CommandList {
    fn new(frame: u64) -> Self {
        Self { frame, commands: Vec::new() }
    }

    fn push(&mut self, command: GpuCommand) {
        self.commands.push(command);
    }

    fn push_line(&mut self, y: u32) {
        if let Some(GpuCommand::ComposeLines { first, count }) = self.commands.last_mut()
            && *first + *count == y
        {
            *count += 1;
            return;
        }

        self.push(GpuCommand::ComposeLines { first: y, count: 1 });
    }

    /// Prepend this unexecuted list's uploads to `next`, compacted so that repeatedly replaced
    /// lists do not grow.
    fn carry_uploads_into(self, next: Self) -> Self {
        let mut commands = compact_uploads(self.commands);
        log::debug!(
            "Frame {} command list was never executed; carrying {} uploads into frame {}",
            self.frame,
            commands.len(),
            next.frame
        );

        commands.extend(next.commands);
        Self { frame: next.frame, commands }
    }
}

/// Reduce a command sequence to the uploads that still affect device state once it has all been
/// applied: the last resync, the writes after it with superseded ones removed, and the latest
/// setting for enhancements, each layer toggle, and the restored output.
fn compact_uploads(commands: Vec<GpuCommand>) -> Vec<GpuCommand> {
    let mut resync = None;
    let mut writes: Vec<Option<VdpWrite>> = Vec::new();
    let mut write_slots: HashMap<(WriteTarget, u32, bool), usize> = HashMap::new();
    let mut enhancements = None;
    let mut layers: [Option<bool>; LAYER_COUNT] = [None; LAYER_COUNT];
    let mut restore = None;

    for command in commands {
        match command {
            GpuCommand::Resync(snapshot) => {
                resync = Some(snapshot);
                writes.clear();
                write_slots.clear();
            }
            GpuCommand::Write(write) => {
                let is_word = matches!(write.value, WriteValue::Word(_));
                let mut covered = vec![(write.target, write.address, is_word)];
                if is_word {
                    covered.push((write.target, write.address, false));
                    covered.push((write.target, write.address.wrapping_add(1), false));
                }
                for key in covered {
                    if let Some(slot) = write_slots.remove(&key) {
                        writes[slot] = None;
                    }
                }

                write_slots.insert((write.target, write.address, is_word), writes.len());
                writes.push(Some(write));
            }
            GpuCommand::SetEnhancements(config) => enhancements = Some(config),
            GpuCommand::SetLayerEnabled(layer, enabled) => layers[layer.index()] = Some(enabled),
            GpuCommand::RestoreOutput { size, pixels } => restore = Some((size, pixels)),
            GpuCommand::UploadSprites { .. }
            | GpuCommand::BeginFrame(_)
            | GpuCommand::ComposeLines { .. }
            | GpuCommand::Present => {}
        }
    }

    let mut compacted: Vec<_> = resync.map(GpuCommand::Resync).into_iter().collect();
    compacted.extend(writes.into_iter().flatten().map(GpuCommand::Write));
    compacted.extend(enhancements.map(GpuCommand::SetEnhancements));
    compacted.extend(
        Layer::ALL
            .into_iter()
            .filter_map(|layer| layers[layer.index()].map(|enabled| (layer, enabled)))
            .map(|(layer, enabled)| GpuCommand::SetLayerEnabled(layer, enabled)),
    );
    compacted.extend(restore.map(|(size, pixels)| GpuCommand::RestoreOutput { size, pixels }));
    compacted
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Presentation-thread side of the hardware renderer.
#[derive(Clone)]
pub struct HardwareHandle {
    device: Arc<Mutex<Box<dyn GpuDevice>>>,
    pending: Arc<Mutex<Option<CommandList>>>,
    device_lost: Arc<AtomicBool>,
}

impl HardwareHandle {
    /// Execute the most recently submitted command list, if any. `pre_execute` runs first, only
    /// when there is a list to execute. Returns whether a list was executed successfully.
    pub fn execute_pending_command_list(&self, pre_execute: impl FnOnce()) -> bool {
        let Some(list) = lock(&self.pending).take() else { return false };

        pre_execute();

        let mut device = lock(&self.device);
        match device.execute(&list) {
            Ok(()) => true,
            Err(GpuError::DeviceLost) => {
                log::error!("{} device lost while executing frame {}", device.name(), list.frame);
                self.device_lost.store(true, Ordering::Relaxed);
                false
            }
            Err(err) => {
                log::error!("Frame {} dropped: {err}", list.frame);
                false
            }
        }
    }

    #[must_use]
    pub fn has_pending_command_list(&self) -> bool {
        lock(&self.pending).is_some()
    }

    #[must_use]
    pub fn output_texture(&self) -> Option<TextureHandle> {
        lock(&self.device).output_texture()
    }

    /// Copy of the most recently composited frame.
    #[must_use]
    pub fn read_output(&self) -> Option<(Vec<Color>, FrameSize)> {
        let device = lock(&self.device);
        let texture = device.output_texture()?;
        match device.read_texture(texture) {
            Ok(output) => Some(output),
            Err(err) => {
                log::error!("Failed to read output texture: {err}");
                None
            }
        }
    }
}

#[derive(Debug, Encode, Decode)]
struct HardwareSaveState {
    layer_enabled: [bool; LAYER_COUNT],
    output: Option<(FrameSize, Vec<Color>)>,
}

pub struct HardwareRenderer {
    vdp1: Vdp1Context,
    framebuffers: SharedFramebuffers,
    handle: HardwareHandle,
    building: CommandList,
    callbacks: RendererCallbacks,
    layer_enabled: [bool; LAYER_COUNT],
}

impl HardwareRenderer {
    /// # Errors
    ///
    /// Returns an error if the device fails to initialize.
    pub fn new(
        mut device: Box<dyn GpuDevice>,
        state: &VdpState,
        callbacks: RendererCallbacks,
        enhancements: EnhancementConfig,
    ) -> Result<Self, RendererError> {
        device.initialize()?;
        log::info!("Created hardware renderer on {} device", device.name());

        let mut building = CommandList::new(0);
        building.push(GpuCommand::SetEnhancements(enhancements));
        building.push(GpuCommand::Resync(Box::new(state.vdp2_snapshot())));

        Ok(Self {
            vdp1: Vdp1Context::new(state.vdp1_snapshot(), state.framebuffers.clone(), enhancements),
            framebuffers: state.framebuffers.clone(),
            handle: HardwareHandle {
                device: Arc::new(Mutex::new(device)),
                pending: Arc::new(Mutex::new(None)),
                device_lost: Arc::new(AtomicBool::new(false)),
            },
            building,
            callbacks,
            layer_enabled: [true; LAYER_COUNT],
        })
    }

    #[must_use]
    pub fn handle(&self) -> HardwareHandle {
        self.handle.clone()
    }

    fn resync(&mut self, state: &VdpState) {
        self.vdp1.resync(state.vdp1_snapshot());
        self.building.push(GpuCommand::Resync(Box::new(state.vdp2_snapshot())));
    }

    fn submit(&mut self) {
        let next = CommandList::new(self.building.frame + 1);
        let list = mem::replace(&mut self.building, next);

        let mut pending = lock(&self.handle.pending);
        let list = match pending.take() {
            Some(unexecuted) => unexecuted.carry_uploads_into(list),
            None => list,
        };
        *pending = Some(list);
    }
}

impl VdpRenderer for HardwareRenderer {
    fn kind(&self) -> VdpRendererKind {
        VdpRendererKind::Hardware
    }

    fn capabilities(&self) -> RendererCapabilities {
        RendererCapabilities { is_hardware: true, supports_debug_overlay: true }
    }

    fn is_valid(&self) -> bool {
        !self.handle.device_lost.load(Ordering::Relaxed)
    }

    fn set_callbacks(&mut self, callbacks: RendererCallbacks) {
        self.callbacks = callbacks;
    }

    fn configure_enhancements(&mut self, enhancements: EnhancementConfig) {
        self.vdp1.set_enhancements(enhancements);
        self.building.push(GpuCommand::SetEnhancements(enhancements));
    }

    fn reset(&mut self, state: &VdpState, _hard: bool) {
        self.resync(state);
    }

    fn pre_save_state_sync(&mut self) {}

    fn save_state(&mut self) -> Result<RendererBlob, StateError> {
        let output = self.handle.read_output().map(|(pixels, size)| (size, pixels));
        let state = HardwareSaveState { layer_enabled: self.layer_enabled, output };
        RendererBlob::encode(VdpRendererKind::Hardware, STATE_VERSION, &state)
    }

    fn validate_state(&self, blob: &RendererBlob) -> Result<(), StateError> {
        let Some(state) =
            blob.decode::<HardwareSaveState>(VdpRendererKind::Hardware, STATE_VERSION)?
        else {
            return Ok(());
        };

        if let Some((size, pixels)) = &state.output
            && pixels.len() != (size.width * size.height) as usize
        {
            return Err(StateError::Inconsistent("output pixel count does not match frame size"));
        }

        Ok(())
    }

    fn load_state(&mut self, blob: &RendererBlob) -> Result<(), StateError> {
        let Some(state) =
            blob.decode::<HardwareSaveState>(VdpRendererKind::Hardware, STATE_VERSION)?
        else {
            return Ok(());
        };

        if let Some((size, pixels)) = state.output {
            self.building.push(GpuCommand::RestoreOutput { size, pixels });
        }
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
            self.vdp1.apply_write(&write);
        } else {
            self.building.push(GpuCommand::Write(write));
        }
    }

    fn vdp1_draw(&mut self, command: &DrawCommand) {
        self.vdp1.draw(command);
    }

    fn vdp1_erase(&mut self, framebuffer: usize, params: EraseParams) {
        self.vdp1.erase(framebuffer, params);
    }

    fn vdp1_swap(&mut self, display_framebuffer: usize) {
        self.vdp1.swap(display_framebuffer);
        self.callbacks.vdp1_framebuffer_swap();
    }

    fn vdp1_end_frame(&mut self) {
        self.callbacks.vdp1_frame_drawn();
    }

    fn vdp1_sync(&mut self) {}

    fn vdp2_begin_frame(&mut self, frame: FrameParams) {
        let framebuffer = self.framebuffers.lock(frame.display_framebuffer).clone();
        self.building.push(GpuCommand::UploadSprites {
            index: frame.display_framebuffer,
            framebuffer: Box::new(framebuffer),
        });
        self.building.push(GpuCommand::BeginFrame(frame));
    }

    fn vdp2_draw_line(&mut self, y: u32) {
        self.building.push_line(y);
    }

    fn vdp2_end_frame(&mut self) {
        self.building.push(GpuCommand::Present);
        self.submit();

        self.callbacks.command_list_ready();
        self.callbacks.vdp2_frame_drawn();
    }

    fn layer_enabled(&self, layer: Layer) -> bool {
        self.layer_enabled[layer.index()]
    }

    fn set_layer_enabled(&mut self, layer: Layer, enabled: bool) {
        self.layer_enabled[layer.index()] = enabled;
        self.building.push(GpuCommand::SetLayerEnabled(layer, enabled));
    }

    fn hardware_handle(&self) -> Option<HardwareHandle> {
        Some(self.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::hardware::device::HeadlessDevice;
    use crate::vdp2::registers::TVMD;
    use test_log::test;

    fn renderer() -> HardwareRenderer {
        HardwareRenderer::new(
            Box::new(HeadlessDevice::new()),
            &VdpState::new(),
            RendererCallbacks::default(),
            EnhancementConfig::default(),
        )
        .unwrap()
    }

    fn draw_frame(renderer: &mut HardwareRenderer) {
        let frame = FrameParams::default();
        renderer.vdp2_begin_frame(frame);
        for y in 0..frame.size.height {
            renderer.vdp2_draw_line(y);
        }
        renderer.vdp2_end_frame();
    }

    #[test]
    fn lines_are_merged_into_one_command() {
        let mut renderer = renderer();
        draw_frame(&mut renderer);

        let pending = lock(&renderer.handle.pending);
        let list = pending.as_ref().unwrap();
        let compose: Vec<_> = list
            .commands
            .iter()
            .filter(|command| matches!(command, GpuCommand::ComposeLines { .. }))
            .collect();
        assert_eq!(compose.len(), 1);
        assert!(matches!(compose[0], GpuCommand::ComposeLines { first: 0, count: 224 }));
    }

    #[test]
    fn replaced_list_carries_uploads() {
        let mut renderer = renderer();
        let handle = renderer.handle();

        // Red back screen, written during a frame that is never executed
        renderer.write(VdpWrite::word(WriteTarget::Vdp2Vram, 0, 0x001F));
        renderer.write(VdpWrite::word(WriteTarget::Vdp2Register, TVMD, 0x8000));
        draw_frame(&mut renderer);
        draw_frame(&mut renderer);

        let mut pre_execute_calls = 0;
        assert!(handle.execute_pending_command_list(|| pre_execute_calls += 1));
        assert!(!handle.execute_pending_command_list(|| pre_execute_calls += 1));
        assert_eq!(pre_execute_calls, 1);

        let (pixels, size) = handle.read_output().unwrap();
        assert_eq!(size, FrameSize { width: 320, height: 224 });
        assert!(pixels.iter().all(|&color| color == Color::rgb(255, 0, 0)));
    }

    #[test]
    fn repeatedly_replaced_lists_stay_bounded() {
        let mut renderer = renderer();
        let handle = renderer.handle();

        renderer.write(VdpWrite::word(WriteTarget::Vdp2Register, TVMD, 0x8000));
        let mut lengths = Vec::new();
        for _ in 0..50 {
            renderer.write(VdpWrite::word(WriteTarget::Vdp2Vram, 0, 0x001F));
            draw_frame(&mut renderer);
            lengths.push(lock(&renderer.handle.pending).as_ref().unwrap().commands.len());
        }

        assert!(lengths[1..].iter().all(|&len| len == lengths[1]), "{lengths:?}");

        assert!(handle.execute_pending_command_list(|| {}));
        let (pixels, _) = handle.read_output().unwrap();
        assert!(pixels.iter().all(|&color| color == Color::rgb(255, 0, 0)));
    }

    #[test]
    fn compaction_keeps_latest_state() {
        let snapshot = || Box::new(VdpState::new().vdp2_snapshot());
        let commands = vec![
            GpuCommand::Write(VdpWrite::word(WriteTarget::Vdp2Vram, 0x10, 1)),
            GpuCommand::Resync(snapshot()),
            GpuCommand::SetLayerEnabled(Layer::Nbg0, false),
            GpuCommand::Write(VdpWrite::byte(WriteTarget::Vdp2Vram, 0x21, 2)),
            GpuCommand::Write(VdpWrite::word(WriteTarget::Vdp2Cram, 0x20, 3)),
            GpuCommand::BeginFrame(FrameParams::default()),
            GpuCommand::Write(VdpWrite::word(WriteTarget::Vdp2Vram, 0x20, 4)),
            GpuCommand::Write(VdpWrite::byte(WriteTarget::Vdp2Vram, 0x20, 5)),
            GpuCommand::SetLayerEnabled(Layer::Nbg0, true),
            GpuCommand::ComposeLines { first: 0, count: 224 },
        ];

        let compacted = compact_uploads(commands);
        let names: Vec<_> = compacted.iter().map(GpuCommand::name).collect();
        assert_eq!(names, ["Resync", "Write", "Write", "Write", "SetLayerEnabled"]);

        let writes: Vec<_> = compacted
            .iter()
            .filter_map(|command| match command {
                GpuCommand::Write(write) => Some(*write),
                _ => None,
            })
            .collect();
        assert_eq!(
            writes,
            [
                VdpWrite::word(WriteTarget::Vdp2Cram, 0x20, 3),
                VdpWrite::word(WriteTarget::Vdp2Vram, 0x20, 4),
                VdpWrite::byte(WriteTarget::Vdp2Vram, 0x20, 5),
            ]
        );
        assert!(matches!(compacted[4], GpuCommand::SetLayerEnabled(Layer::Nbg0, true)));
    }

    #[test]
    fn unavailable_device_is_a_construction_error() {
        let result = HardwareRenderer::new(
            Box::new(HeadlessDevice::unavailable()),
            &VdpState::new(),
            RendererCallbacks::default(),
            EnhancementConfig::default(),
        );
        assert!(matches!(result, Err(RendererError::Device(GpuError::Unavailable(_)))));
    }
}

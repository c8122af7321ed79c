//! Renderer interface and backend selection
//!
//! The façade owns all VDP state and forwards every state change to the active renderer as
//! [`VdpWrite`] events plus per-frame and per-line draw calls. Renderers keep whatever private
//! mirrors they need and never mutate the façade's state.

pub mod hardware;
pub mod null;
pub mod software;

use crate::renderer::hardware::device::{GpuError, HeadlessDevice};
use crate::renderer::hardware::{HardwareHandle, HardwareRenderer};
use crate::renderer::null::NullRenderer;
use crate::renderer::software::SoftwareRenderer;
use crate::state::VdpState;
use crate::vdp1::command::DrawCommand;
use crate::vdp1::registers::EraseParams;
use crate::vdp2::{InterlaceMode, Layer};
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use saturn_common::frontend::{Color, FrameSize};
use saturn_config::{EnhancementConfig, VdpConfig, VdpRendererKind};
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum WriteTarget {
    Vdp1Vram,
    Vdp1Register,
    Vdp2Vram,
    Vdp2Cram,
    Vdp2Register,
}

impl WriteTarget {
    #[must_use]
    pub fn is_vdp1(self) -> bool {
        matches!(self, Self::Vdp1Vram | Self::Vdp1Register)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum WriteValue {
    Byte(u8),
    Word(u16),
}

/// A single VRAM, color RAM, or register write replayed into renderer mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct VdpWrite {
    pub target: WriteTarget,
    pub address: u32,
    pub value: WriteValue,
}

impl VdpWrite {
    #[must_use]
    pub fn byte(target: WriteTarget, address: u32, value: u8) -> Self {
        Self { target, address, value: WriteValue::Byte(value) }
    }

    #[must_use]
    pub fn word(target: WriteTarget, address: u32, value: u16) -> Self {
        Self { target, address, value: WriteValue::Word(value) }
    }
}

/// Display parameters latched at the start of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct FrameParams {
    /// Output frame size; double-density interlace frames contain both fields
    pub size: FrameSize,
    /// 640/704-dot modes
    pub hires: bool,
    pub interlace: InterlaceMode,
    pub odd_field: bool,
    pub display_framebuffer: usize,
    pub sprite_8bit: bool,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            size: FrameSize { width: 320, height: 224 },
            hires: false,
            interlace: InterlaceMode::None,
            odd_field: false,
            display_framebuffer: 0,
            sprite_8bit: false,
        }
    }
}

impl FrameParams {
    /// Lines drawn per field.
    #[must_use]
    pub fn field_lines(&self) -> u32 {
        match self.interlace {
            InterlaceMode::DoubleDensity => self.size.height / 2,
            InterlaceMode::None | InterlaceMode::SingleDensity => self.size.height,
        }
    }

    /// Output row for field line `y` of the given field.
    #[must_use]
    pub fn output_row(&self, y: u32, odd: bool) -> u32 {
        match self.interlace {
            InterlaceMode::DoubleDensity => 2 * y + u32::from(odd),
            InterlaceMode::None | InterlaceMode::SingleDensity => y,
        }
    }
}

pub type NotifyCallback = Arc<dyn Fn() + Send + Sync>;
pub type ResolutionCallback = Arc<dyn Fn(FrameSize) + Send + Sync>;
pub type FramebufferCallback = Arc<dyn Fn(&[Color], FrameSize) + Send + Sync>;

/// Frontend notifications. Carried over unchanged when the active renderer is switched.
///
/// Callbacks may be invoked from renderer worker threads.
#[derive(Clone, Default)]
pub struct RendererCallbacks {
    vdp1_frame_drawn: Option<NotifyCallback>,
    vdp1_framebuffer_swap: Option<NotifyCallback>,
    vdp2_resolution_changed: Option<ResolutionCallback>,
    vdp2_frame_drawn: Option<NotifyCallback>,
    framebuffer_ready: Option<FramebufferCallback>,
    command_list_ready: Option<NotifyCallback>,
}

impl Debug for RendererCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererCallbacks")
            .field("vdp1_frame_drawn", &self.vdp1_frame_drawn.is_some())
            .field("vdp1_framebuffer_swap", &self.vdp1_framebuffer_swap.is_some())
            .field("vdp2_resolution_changed", &self.vdp2_resolution_changed.is_some())
            .field("vdp2_frame_drawn", &self.vdp2_frame_drawn.is_some())
            .field("framebuffer_ready", &self.framebuffer_ready.is_some())
            .field("command_list_ready", &self.command_list_ready.is_some())
            .finish()
    }
}

impl RendererCallbacks {
    #[must_use]
    pub fn on_vdp1_frame_drawn(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.vdp1_frame_drawn = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_vdp1_framebuffer_swap(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.vdp1_framebuffer_swap = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_vdp2_resolution_changed(
        mut self,
        callback: impl Fn(FrameSize) + Send + Sync + 'static,
    ) -> Self {
        self.vdp2_resolution_changed = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_vdp2_frame_drawn(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.vdp2_frame_drawn = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_framebuffer_ready(
        mut self,
        callback: impl Fn(&[Color], FrameSize) + Send + Sync + 'static,
    ) -> Self {
        self.framebuffer_ready = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_command_list_ready(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.command_list_ready = Some(Arc::new(callback));
        self
    }

    pub fn vdp1_frame_drawn(&self) {
        if let Some(callback) = &self.vdp1_frame_drawn {
            callback();
        }
    }

    pub fn vdp1_framebuffer_swap(&self) {
        if let Some(callback) = &self.vdp1_framebuffer_swap {
            callback();
        }
    }

    pub fn vdp2_resolution_changed(&self, size: FrameSize) {
        if let Some(callback) = &self.vdp2_resolution_changed {
            callback(size);
        }
    }

    pub fn vdp2_frame_drawn(&self) {
        if let Some(callback) = &self.vdp2_frame_drawn {
            callback();
        }
    }

    pub fn framebuffer_ready(&self, pixels: &[Color], size: FrameSize) {
        if let Some(callback) = &self.framebuffer_ready {
            callback(pixels, size);
        }
    }

    pub fn command_list_ready(&self) {
        if let Some(callback) = &self.command_list_ready {
            callback();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RendererCapabilities {
    pub is_hardware: bool,
    pub supports_debug_overlay: bool,
}

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("GPU device unavailable: {0}")]
    Device(#[from] GpuError),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Error decoding renderer state: {0}")]
    Decode(#[from] DecodeError),
    #[error("Error encoding renderer state: {0}")]
    Encode(#[from] EncodeError),
    #[error("Renderer state version {found} does not match expected version {expected}")]
    VersionMismatch { expected: u16, found: u16 },
    #[error("Renderer state is inconsistent: {0}")]
    Inconsistent(&'static str),
}

/// Opaque backend-specific save state, tagged with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RendererBlob {
    pub kind: VdpRendererKind,
    pub version: u16,
    pub data: Vec<u8>,
}

impl RendererBlob {
    /// # Errors
    ///
    /// Propagates bincode encoding errors.
    pub fn encode<T: Encode>(
        kind: VdpRendererKind,
        version: u16,
        value: &T,
    ) -> Result<Self, StateError> {
        let data = bincode::encode_to_vec(value, bincode::config::standard())?;
        Ok(Self { kind, version, data })
    }

    /// Decode the payload if it was produced by the `kind` backend. Returns `Ok(None)` for a blob
    /// from a different backend, which callers skip.
    ///
    /// # Errors
    ///
    /// Returns an error on a version mismatch or if the payload cannot be decoded.
    pub fn decode<T: Decode<()>>(
        &self,
        kind: VdpRendererKind,
        version: u16,
    ) -> Result<Option<T>, StateError> {
        if self.kind != kind {
            log::debug!("Skipping {} renderer state while {kind} renderer is active", self.kind);
            return Ok(None);
        }

        if self.version != version {
            return Err(StateError::VersionMismatch { expected: version, found: self.version });
        }

        let (value, _) = bincode::decode_from_slice(&self.data, bincode::config::standard())?;
        Ok(Some(value))
    }
}

/// The contract every backend implements.
///
/// Save states go through four phases: [`pre_save_state_sync`](Self::pre_save_state_sync) before
/// [`save_state`](Self::save_state), and [`validate_state`](Self::validate_state) (which must not
/// mutate) before [`load_state`](Self::load_state) followed by
/// [`post_load_state_sync`](Self::post_load_state_sync).
pub trait VdpRenderer: Send {
    fn kind(&self) -> VdpRendererKind;

    fn capabilities(&self) -> RendererCapabilities;

    fn is_valid(&self) -> bool;

    fn set_callbacks(&mut self, callbacks: RendererCallbacks);

    fn configure_enhancements(&mut self, enhancements: EnhancementConfig);

    fn reset(&mut self, state: &VdpState, hard: bool);

    /// Bring any state that lives only in the backend up to date.
    fn pre_save_state_sync(&mut self);

    /// # Errors
    ///
    /// Returns an error if the backend state cannot be serialized.
    fn save_state(&mut self) -> Result<RendererBlob, StateError>;

    /// # Errors
    ///
    /// Returns an error if the blob was produced by this backend kind and cannot be applied.
    fn validate_state(&self, blob: &RendererBlob) -> Result<(), StateError>;

    /// # Errors
    ///
    /// Returns an error if the blob cannot be applied; only called after successful validation.
    fn load_state(&mut self, blob: &RendererBlob) -> Result<(), StateError>;

    /// Rebuild mirrors and caches from freshly loaded state.
    fn post_load_state_sync(&mut self, state: &VdpState);

    fn write(&mut self, write: VdpWrite);

    fn vdp1_draw(&mut self, command: &DrawCommand);

    fn vdp1_erase(&mut self, framebuffer: usize, params: EraseParams);

    fn vdp1_swap(&mut self, display_framebuffer: usize);

    /// The command list reached its end.
    fn vdp1_end_frame(&mut self);

    /// Block until every queued VDP1 draw has reached the framebuffers.
    fn vdp1_sync(&mut self);

    fn vdp2_begin_frame(&mut self, frame: FrameParams);

    fn vdp2_draw_line(&mut self, y: u32);

    fn vdp2_end_frame(&mut self);

    fn layer_enabled(&self, layer: Layer) -> bool;

    fn set_layer_enabled(&mut self, layer: Layer, enabled: bool);

    /// Handle for executing command lists on the presentation thread. Only GPU backends have one.
    fn hardware_handle(&self) -> Option<HardwareHandle> {
        None
    }
}

/// Construct the renderer selected in `config`. Construction failures are logged and reported as
/// `None`.
#[must_use]
pub fn create_renderer(
    config: &VdpConfig,
    state: &VdpState,
    callbacks: RendererCallbacks,
) -> Option<Box<dyn VdpRenderer>> {
    let kind = config.renderer;
    let enhancements = config.enhancements.clamp_for(kind);

    let result: Result<Box<dyn VdpRenderer>, RendererError> = match kind {
        VdpRendererKind::Null => Ok(Box::new(NullRenderer::new(callbacks))),
        VdpRendererKind::Software => SoftwareRenderer::new(
            state,
            callbacks,
            enhancements,
            config.threading.clamp(enhancements),
        )
        .map(|renderer| Box::new(renderer) as Box<dyn VdpRenderer>),
        VdpRendererKind::Hardware => {
            HardwareRenderer::new(Box::new(HeadlessDevice::new()), state, callbacks, enhancements)
                .map(|renderer| Box::new(renderer) as Box<dyn VdpRenderer>)
        }
    };

    match result {
        Ok(renderer) if renderer.is_valid() => {
            log::debug!("Created {kind} renderer");
            Some(renderer)
        }
        Ok(_) => {
            log::error!("{kind} renderer reported itself invalid after construction");
            None
        }
        Err(err) => {
            log::error!("Failed to create {kind} renderer: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use test_log::test;

    #[test]
    fn blob_from_other_backend_is_skipped() {
        let blob = RendererBlob::encode(VdpRendererKind::Software, 1, &[1_u8, 2, 3]).unwrap();
        let decoded: Option<[u8; 3]> = blob.decode(VdpRendererKind::Hardware, 1).unwrap();
        assert_eq!(decoded, None);

        let decoded: Option<[u8; 3]> = blob.decode(VdpRendererKind::Software, 1).unwrap();
        assert_eq!(decoded, Some([1, 2, 3]));

        let result: Result<Option<[u8; 3]>, _> = blob.decode(VdpRendererKind::Software, 2);
        assert!(matches!(result, Err(StateError::VersionMismatch { expected: 2, found: 1 })));
    }

    #[test]
    fn callbacks_survive_cloning() {
        let count = Arc::new(AtomicU32::new(0));
        let callbacks = RendererCallbacks::default().on_vdp1_frame_drawn({
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });

        callbacks.clone().vdp1_frame_drawn();
        callbacks.vdp1_frame_drawn();
        callbacks.vdp2_frame_drawn();
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn double_density_rows_interleave() {
        let frame = FrameParams {
            size: FrameSize { width: 320, height: 448 },
            interlace: InterlaceMode::DoubleDensity,
            ..FrameParams::default()
        };
        assert_eq!(frame.field_lines(), 224);
        assert_eq!(frame.output_row(10, false), 20);
        assert_eq!(frame.output_row(10, true), 21);
    }
}

//! Renderer that draws nothing but still reports frame progress

use crate::renderer::{
    FrameParams, RendererBlob, RendererCallbacks, RendererCapabilities, StateError, VdpRenderer,
    VdpWrite,
};
use crate::state::VdpState;
use crate::vdp1::command::DrawCommand;
use crate::vdp1::registers::EraseParams;
use crate::vdp2::{LAYER_COUNT, Layer};
use saturn_config::{EnhancementConfig, VdpRendererKind};

#[derive(Debug)]
pub struct NullRenderer {
    callbacks: RendererCallbacks,
    layer_enabled: [bool; LAYER_COUNT],
}

impl NullRenderer {
    #[must_use]
    pub fn new(callbacks: RendererCallbacks) -> Self {
        Self { callbacks, layer_enabled: [true; LAYER_COUNT] }
    }
}

impl VdpRenderer for NullRenderer {
    fn kind(&self) -> VdpRendererKind {
        VdpRendererKind::Null
    }

    fn capabilities(&self) -> RendererCapabilities {
        RendererCapabilities::default()
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn set_callbacks(&mut self, callbacks: RendererCallbacks) {
        self.callbacks = callbacks;
    }

    fn configure_enhancements(&mut self, _enhancements: EnhancementConfig) {}

    fn reset(&mut self, _state: &VdpState, _hard: bool) {}

    fn pre_save_state_sync(&mut self) {}

    fn save_state(&mut self) -> Result<RendererBlob, StateError> {
        Ok(RendererBlob { kind: VdpRendererKind::Null, version: 0, data: Vec::new() })
    }

    fn validate_state(&self, _blob: &RendererBlob) -> Result<(), StateError> {
        Ok(())
    }

    fn load_state(&mut self, _blob: &RendererBlob) -> Result<(), StateError> {
        Ok(())
    }

    fn post_load_state_sync(&mut self, _state: &VdpState) {}

    fn write(&mut self, _write: VdpWrite) {}

    fn vdp1_draw(&mut self, _command: &DrawCommand) {}

    fn vdp1_erase(&mut self, _framebuffer: usize, _params: EraseParams) {}

    fn vdp1_swap(&mut self, _display_framebuffer: usize) {
        self.callbacks.vdp1_framebuffer_swap();
    }

    fn vdp1_end_frame(&mut self) {
        self.callbacks.vdp1_frame_drawn();
    }

    fn vdp1_sync(&mut self) {}

    fn vdp2_begin_frame(&mut self, _frame: FrameParams) {}

    fn vdp2_draw_line(&mut self, _y: u32) {}

    fn vdp2_end_frame(&mut self) {
        self.callbacks.vdp2_frame_drawn();
    }

    fn layer_enabled(&self, layer: Layer) -> bool {
        self.layer_enabled[layer.index()]
    }

    fn set_layer_enabled(&mut self, layer: Layer, enabled: bool) {
        self.layer_enabled[layer.index()] = enabled;
    }
}

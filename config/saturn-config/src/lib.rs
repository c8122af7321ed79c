use bincode::{Decode, Encode};
use saturn_common::frontend::TimingMode;
use saturn_proc_macros::{EnumAll, EnumDisplay, EnumFromStr};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, EnumDisplay, EnumFromStr, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VdpRendererKind {
    Null,
    #[default]
    Software,
    Hardware,
}

impl VdpRendererKind {
    #[inline]
    #[must_use]
    pub fn is_hardware(self) -> bool {
        self == Self::Hardware
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnhancementConfig {
    /// Draw both fields of double-density interlaced frames every frame
    pub deinterlace: bool,
    /// Blend mesh-processed sprite pixels at 50% instead of drawing a checkerboard
    pub transparent_meshes: bool,
}

impl EnhancementConfig {
    /// The null renderer draws nothing, so it never has anything to enhance.
    #[must_use]
    pub fn clamp_for(self, kind: VdpRendererKind) -> Self {
        match kind {
            VdpRendererKind::Null => Self::default(),
            VdpRendererKind::Software | VdpRendererKind::Hardware => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoftwareThreadingConfig {
    pub threaded_vdp1: bool,
    pub threaded_vdp2: bool,
    pub threaded_deinterlace: bool,
}

impl Default for SoftwareThreadingConfig {
    fn default() -> Self {
        Self { threaded_vdp1: true, threaded_vdp2: true, threaded_deinterlace: true }
    }
}

impl SoftwareThreadingConfig {
    pub const SINGLE_THREADED: Self =
        Self { threaded_vdp1: false, threaded_vdp2: false, threaded_deinterlace: false };

    /// The deinterlace thread is a helper of the VDP2 thread and only draws alternate fields, so it
    /// is dropped when either of those is unavailable.
    #[must_use]
    pub fn clamp(self, enhancements: EnhancementConfig) -> Self {
        Self {
            threaded_deinterlace: self.threaded_deinterlace
                && self.threaded_vdp2
                && enhancements.deinterlace,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VdpConfig {
    pub renderer: VdpRendererKind,
    pub enhancements: EnhancementConfig,
    pub threading: SoftwareThreadingConfig,
    /// Cycles charged to VDP1 drawing for every external VRAM write made while it is drawing
    pub vram_write_penalty_cycles: u32,
    pub forced_timing_mode: Option<TimingMode>,
}

impl VdpConfig {
    pub const DEFAULT_VRAM_WRITE_PENALTY: u32 = 22;
}

impl Default for VdpConfig {
    fn default() -> Self {
        Self {
            renderer: VdpRendererKind::default(),
            enhancements: EnhancementConfig::default(),
            threading: SoftwareThreadingConfig::default(),
            vram_write_penalty_cycles: Self::DEFAULT_VRAM_WRITE_PENALTY,
            forced_timing_mode: None,
        }
    }
}

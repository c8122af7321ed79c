//! Sega Saturn VDP1/VDP2 video subsystem
//!
//! [`Vdp`] is the entry point: it is advanced by the system scheduler, exposes the VDP memories and
//! registers to the bus, and renders through a [`VdpRenderer`] backend selected at runtime.

pub mod api;
pub mod renderer;
pub mod state;
pub mod timing;
pub mod vdp1;
pub mod vdp2;

pub use api::{NoSignals, Vdp, VdpRegion, VdpSaveState, VdpSignals};
pub use renderer::{RendererCallbacks, VdpRenderer};

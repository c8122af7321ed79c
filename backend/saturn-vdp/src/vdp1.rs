//! VDP1: sprite/polygon command processor and rasterizer

pub mod command;
pub mod processor;
pub mod rasterizer;
pub mod registers;

use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use saturn_common::boxedarray::BoxedByteArray;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::vdp1::registers::Vdp1Registers;

pub const VRAM_LEN: usize = 512 * 1024;
pub const FRAMEBUFFER_LEN: usize = 256 * 1024;

/// Framebuffer rows are always 1024 bytes: 512 16-bit pixels or 1024 8-bit pixels.
pub const FRAMEBUFFER_ROW_BYTES: usize = 1024;
pub const FRAMEBUFFER_ROWS: usize = FRAMEBUFFER_LEN / FRAMEBUFFER_ROW_BYTES;

pub type Vram = BoxedByteArray<VRAM_LEN>;

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct SpriteFramebuffer {
    pub pixels: BoxedByteArray<FRAMEBUFFER_LEN>,
    /// Mesh-processed pixels when transparent meshes are enabled; zero where there is no mesh pixel
    pub mesh: BoxedByteArray<FRAMEBUFFER_LEN>,
}

impl SpriteFramebuffer {
    pub fn clear(&mut self) {
        self.pixels.fill(0);
        self.mesh.fill(0);
    }
}

/// The two VDP1 framebuffers, shared between the façade (CPU framebuffer access), the VDP1
/// rasterizer (draw buffer), and the VDP2 sprite layer (display buffer).
///
/// Cloning produces another handle to the same buffers.
#[derive(Debug, Clone)]
pub struct SharedFramebuffers(Arc<[Mutex<SpriteFramebuffer>; 2]>);

impl SharedFramebuffers {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new([
            Mutex::new(SpriteFramebuffer::default()),
            Mutex::new(SpriteFramebuffer::default()),
        ]))
    }

    /// A poisoned lock only means another thread panicked mid-draw; the pixel data is still usable.
    pub fn lock(&self, index: usize) -> MutexGuard<'_, SpriteFramebuffer> {
        self.0[index & 1].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the contents of both buffers in place so that existing handles observe the change.
    pub fn copy_from(&self, other: &Self) {
        if Arc::ptr_eq(&self.0, &other.0) {
            return;
        }

        for i in 0..2 {
            let source = other.lock(i);
            let mut target = self.lock(i);
            target.pixels.copy_from(&source.pixels);
            target.mesh.copy_from(&source.mesh);
        }
    }

    /// Independent deep copy.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        Self(Arc::new([Mutex::new(self.lock(0).clone()), Mutex::new(self.lock(1).clone())]))
    }

    pub fn clear(&self) {
        for i in 0..2 {
            self.lock(i).clear();
        }
    }
}

impl Default for SharedFramebuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl Encode for SharedFramebuffers {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.lock(0).encode(encoder)?;
        self.lock(1).encode(encoder)
    }
}

impl<Context> Decode<Context> for SharedFramebuffers {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let first = SpriteFramebuffer::decode(decoder)?;
        let second = SpriteFramebuffer::decode(decoder)?;
        Ok(Self(Arc::new([Mutex::new(first), Mutex::new(second)])))
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for SharedFramebuffers {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        let first = SpriteFramebuffer::borrow_decode(decoder)?;
        let second = SpriteFramebuffer::borrow_decode(decoder)?;
        Ok(Self(Arc::new([Mutex::new(first), Mutex::new(second)])))
    }
}

/// Copy of the VDP1 state a rasterizer needs to keep its private mirror in sync.
#[derive(Debug, Clone)]
pub struct Vdp1Snapshot {
    pub vram: Vram,
    pub registers: Vdp1Registers,
    pub display_framebuffer: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn shared_framebuffers_copy_in_place() {
        let framebuffers = SharedFramebuffers::new();
        let handle = framebuffers.clone();

        let other = SharedFramebuffers::new();
        other.lock(1).pixels[10] = 0x55;
        framebuffers.copy_from(&other);

        assert_eq!(handle.lock(1).pixels[10], 0x55);

        let deep = handle.deep_clone();
        handle.clear();
        assert_eq!(deep.lock(1).pixels[10], 0x55);
        assert_eq!(framebuffers.lock(1).pixels[10], 0);
    }
}

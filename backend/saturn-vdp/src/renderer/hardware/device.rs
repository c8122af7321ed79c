//! GPU device abstraction and the headless device used when no graphics API is attached

use crate::renderer::FrameParams;
use crate::renderer::hardware::{CommandList, GpuCommand};
use crate::vdp1::SharedFramebuffers;
use crate::vdp2::InterlaceMode;
use crate::vdp2::compositor::Vdp2Context;
use saturn_common::frontend::{Color, FrameSize};
use saturn_config::EnhancementConfig;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("GPU device is not available: {0}")]
    Unavailable(String),
    #[error("GPU device was lost")]
    DeviceLost,
    #[error("Command list executed before the compositor was initialized")]
    NotInitialized,
    #[error("Unable to allocate {width}x{height} texture")]
    TextureAllocation { width: u32, height: u32 },
    #[error("Texture {0:?} does not exist")]
    MissingTexture(TextureHandle),
    #[error("Texture {0:?} does not hold whole RGBA8 pixels")]
    TextureFormat(TextureHandle),
}

/// A device that executes command lists on the presentation thread.
pub trait GpuDevice: Send {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns an error if the device cannot be used.
    fn initialize(&mut self) -> Result<(), GpuError>;

    /// # Errors
    ///
    /// Returns an error if a resource cannot be created or the device is lost mid-list.
    fn execute(&mut self, list: &CommandList) -> Result<(), GpuError>;

    fn output_texture(&self) -> Option<TextureHandle>;

    /// # Errors
    ///
    /// Returns an error if the handle does not name a live texture.
    fn read_texture(&self, texture: TextureHandle) -> Result<(Vec<Color>, FrameSize), GpuError>;
}

/// RGBA8 texture storage.
#[derive(Debug)]
struct Texture {
    size: FrameSize,
    data: Vec<u8>,
}

/// Runs the compositor on the CPU and keeps textures in memory.
#[derive(Debug)]
pub struct HeadlessDevice {
    available: bool,
    max_texture_pixels: usize,
    compositor: Option<Vdp2Context>,
    framebuffers: SharedFramebuffers,
    enhancements: EnhancementConfig,
    textures: HashMap<TextureHandle, Texture>,
    next_handle: u64,
    output: Option<TextureHandle>,
    frame: FrameParams,
    frame_ready: bool,
    line: Vec<Color>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    // 704x512 with room to spare
    pub const DEFAULT_MAX_TEXTURE_PIXELS: usize = 1024 * 1024;

    #[must_use]
    pub fn new() -> Self {
        Self {
            available: true,
            max_texture_pixels: Self::DEFAULT_MAX_TEXTURE_PIXELS,
            compositor: None,
            framebuffers: SharedFramebuffers::new(),
            enhancements: EnhancementConfig::default(),
            textures: HashMap::new(),
            next_handle: 1,
            output: None,
            frame: FrameParams::default(),
            frame_ready: false,
            line: Vec::new(),
        }
    }

    /// A device that refuses to initialize.
    #[must_use]
    pub fn unavailable() -> Self {
        Self { available: false, ..Self::new() }
    }

    #[must_use]
    pub fn with_max_texture_pixels(mut self, max_texture_pixels: usize) -> Self {
        self.max_texture_pixels = max_texture_pixels;
        self
    }

    fn create_texture(&mut self, size: FrameSize) -> Result<TextureHandle, GpuError> {
        let len = (size.width * size.height) as usize;
        if len > self.max_texture_pixels {
            return Err(GpuError::TextureAllocation { width: size.width, height: size.height });
        }

        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        let data = bytemuck::bytes_of(&Color::BLACK).repeat(len);
        self.textures.insert(handle, Texture { size, data });

        log::debug!("Created {}x{} texture {handle:?}", size.width, size.height);
        Ok(handle)
    }

    fn ensure_output(&mut self, size: FrameSize) -> Result<TextureHandle, GpuError> {
        if let Some(handle) = self.output
            && self.textures.get(&handle).is_some_and(|texture| texture.size == size)
        {
            return Ok(handle);
        }

        let handle = self.create_texture(size)?;
        if let Some(old) = self.output.replace(handle) {
            self.textures.remove(&old);
        }
        Ok(handle)
    }

    fn compose_line(&mut self, y: u32, odd: bool) -> Result<(), GpuError> {
        let compositor = self.compositor.as_mut().ok_or(GpuError::NotInitialized)?;
        let output = self.output.ok_or(GpuError::NotInitialized)?;
        let texture = self.textures.get_mut(&output).ok_or(GpuError::MissingTexture(output))?;

        let width = texture.size.width as usize;
        self.line.resize(width, Color::BLACK);
        compositor.draw_line(y, odd, &mut self.line);

        let row_bytes = width * size_of::<Color>();
        let start = self.frame.output_row(y, odd) as usize * row_bytes;
        if let Some(row) = texture.data.get_mut(start..start + row_bytes) {
            row.copy_from_slice(bytemuck::cast_slice(&self.line));
        }
        Ok(())
    }

    fn execute_command(&mut self, command: &GpuCommand) -> Result<(), GpuError> {
        match command {
            GpuCommand::Resync(snapshot) => match &mut self.compositor {
                Some(compositor) => compositor.resync((**snapshot).clone()),
                None => {
                    self.compositor = Some(Vdp2Context::new(
                        (**snapshot).clone(),
                        self.framebuffers.clone(),
                        self.enhancements,
                    ));
                }
            },
            GpuCommand::Write(write) => {
                self.compositor.as_mut().ok_or(GpuError::NotInitialized)?.apply_write(write);
            }
            &GpuCommand::SetEnhancements(enhancements) => {
                self.enhancements = enhancements;
                if let Some(compositor) = &mut self.compositor {
                    compositor.set_enhancements(enhancements);
                }
            }
            &GpuCommand::SetLayerEnabled(layer, enabled) => {
                self.compositor
                    .as_mut()
                    .ok_or(GpuError::NotInitialized)?
                    .set_layer_enabled(layer, enabled);
            }
            GpuCommand::UploadSprites { index, framebuffer } => {
                *self.framebuffers.lock(*index) = (**framebuffer).clone();
            }
            GpuCommand::RestoreOutput { size, pixels } => {
                let handle = self.ensure_output(*size)?;
                let bytes: &[u8] = bytemuck::cast_slice(pixels);
                if let Some(texture) = self.textures.get_mut(&handle)
                    && texture.data.len() == bytes.len()
                {
                    texture.data.copy_from_slice(bytes);
                }
            }
            &GpuCommand::BeginFrame(frame) => {
                self.frame_ready = false;
                self.ensure_output(frame.size)?;
                self.frame = frame;
                self.compositor.as_mut().ok_or(GpuError::NotInitialized)?.begin_frame(frame);
                self.frame_ready = true;
            }
            &GpuCommand::ComposeLines { first, count } => {
                // The previous output stays on screen until a frame begins successfully
                if !self.frame_ready {
                    log::trace!("Skipping lines {first}..{} without a begun frame", first + count);
                    return Ok(());
                }

                let deinterlace = self.enhancements.deinterlace
                    && self.frame.interlace == InterlaceMode::DoubleDensity;
                let odd = self.frame.odd_field;
                for y in first..first + count {
                    self.compose_line(y, odd)?;
                    if deinterlace {
                        self.compose_line(y, !odd)?;
                    }
                }
            }
            GpuCommand::Present => {}
        }

        Ok(())
    }
}

impl GpuDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn initialize(&mut self) -> Result<(), GpuError> {
        if self.available {
            Ok(())
        } else {
            Err(GpuError::Unavailable("headless device was created unavailable".into()))
        }
    }

    fn execute(&mut self, list: &CommandList) -> Result<(), GpuError> {
        log::trace!(
            "Executing command list for frame {} ({} commands)",
            list.frame,
            list.commands.len()
        );

        // Uploads after a failed command are still applied
        let mut result = Ok(());
        for command in &list.commands {
            if let Err(err) = self.execute_command(command) {
                log::error!("GPU command {} failed: {err}", command.name());
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    fn output_texture(&self) -> Option<TextureHandle> {
        self.output
    }

    fn read_texture(&self, handle: TextureHandle) -> Result<(Vec<Color>, FrameSize), GpuError> {
        let texture = self.textures.get(&handle).ok_or(GpuError::MissingTexture(handle))?;
        let pixels: &[Color] =
            bytemuck::try_cast_slice(&texture.data).map_err(|_| GpuError::TextureFormat(handle))?;
        Ok((pixels.to_vec(), texture.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{VdpWrite, WriteTarget};
    use crate::state::VdpState;
    use crate::vdp2::registers::TVMD;
    use test_log::test;

    #[test]
    fn oversized_output_keeps_previous_texture() {
        let mut device = HeadlessDevice::new().with_max_texture_pixels(320 * 224);
        let first = device.ensure_output(FrameSize { width: 320, height: 224 }).unwrap();

        let result = device.ensure_output(FrameSize { width: 704, height: 512 });
        assert!(matches!(result, Err(GpuError::TextureAllocation { width: 704, height: 512 })));
        assert_eq!(device.output_texture(), Some(first));
        assert!(device.read_texture(first).is_ok());
    }

    #[test]
    fn failed_frame_start_leaves_previous_output() {
        let mut device = HeadlessDevice::new().with_max_texture_pixels(320 * 224);
        let frame = FrameParams::default();

        let mut first = CommandList::new(1);
        first.push(GpuCommand::Resync(Box::new(VdpState::new().vdp2_snapshot())));
        first.push(GpuCommand::BeginFrame(frame));
        first.push(GpuCommand::ComposeLines { first: 0, count: frame.size.height });
        device.execute(&first).unwrap();

        // Red back screen composed into a frame too large for the device
        let oversized = FrameParams { size: FrameSize { width: 704, height: 512 }, ..frame };
        let mut second = CommandList::new(2);
        second.push(GpuCommand::Write(VdpWrite::word(WriteTarget::Vdp2Vram, 0, 0x001F)));
        second.push(GpuCommand::Write(VdpWrite::word(WriteTarget::Vdp2Register, TVMD, 0x8000)));
        second.push(GpuCommand::BeginFrame(oversized));
        second.push(GpuCommand::ComposeLines { first: 0, count: frame.size.height });
        assert!(matches!(device.execute(&second), Err(GpuError::TextureAllocation { .. })));

        let output = device.output_texture().unwrap();
        let (pixels, size) = device.read_texture(output).unwrap();
        assert_eq!(size, FrameSize { width: 320, height: 224 });
        assert!(pixels.iter().all(|&color| color == Color::BLACK));
    }

    #[test]
    fn composed_lines_land_in_texture_rows() {
        let mut device = HeadlessDevice::new();
        let frame = FrameParams::default();

        let mut list = CommandList::new(1);
        list.push(GpuCommand::Resync(Box::new(VdpState::new().vdp2_snapshot())));
        list.push(GpuCommand::Write(VdpWrite::word(WriteTarget::Vdp2Vram, 0, 0x001F)));
        list.push(GpuCommand::Write(VdpWrite::word(WriteTarget::Vdp2Register, TVMD, 0x8000)));
        list.push(GpuCommand::BeginFrame(frame));
        list.push(GpuCommand::ComposeLines { first: 10, count: 2 });
        device.execute(&list).unwrap();

        let (pixels, _) = device.read_texture(device.output_texture().unwrap()).unwrap();
        let width = frame.size.width as usize;
        let red = Color::rgb(255, 0, 0);
        assert!(pixels[10 * width..12 * width].iter().all(|&color| color == red));
        assert!(pixels[..10 * width].iter().all(|&color| color == Color::BLACK));
        assert!(pixels[12 * width..].iter().all(|&color| color == Color::BLACK));
    }

    #[test]
    fn unavailable_device_fails_initialization() {
        assert!(HeadlessDevice::new().initialize().is_ok());
        assert!(matches!(HeadlessDevice::unavailable().initialize(), Err(GpuError::Unavailable(_))));
    }
}

use saturn_common::frontend::{Color, FrameSize};
use saturn_config::{SoftwareThreadingConfig, VdpConfig, VdpRendererKind};
use saturn_vdp::renderer::{
    FrameParams, RendererBlob, RendererCallbacks, RendererCapabilities, StateError, VdpRenderer,
    VdpWrite,
};
use saturn_vdp::state::VdpState;
use saturn_vdp::vdp1::FRAMEBUFFER_LEN;
use saturn_vdp::vdp1::command::DrawCommand;
use saturn_vdp::vdp1::registers::{EraseParams, PTMR};
use saturn_vdp::vdp2::Layer;
use saturn_vdp::vdp2::registers::{BGON, BKTAU, CHCTLA, PRINA, PRISA, TVMD};
use saturn_vdp::{NoSignals, Vdp, VdpRegion, VdpSignals};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use test_log::test;

const RED: Color = Color::rgb(255, 0, 0);
const GREEN: Color = Color::rgb(0, 255, 0);
const BLUE: Color = Color::rgb(0, 0, 255);

type Captured = Arc<Mutex<Option<(Vec<Color>, FrameSize)>>>;

fn software_vdp() -> (Vdp, Captured) {
    let captured: Captured = Arc::new(Mutex::new(None));
    let callbacks = RendererCallbacks::default().on_framebuffer_ready({
        let captured = Arc::clone(&captured);
        move |pixels, size| *captured.lock().unwrap() = Some((pixels.to_vec(), size))
    });

    let config = VdpConfig {
        renderer: VdpRendererKind::Software,
        threading: SoftwareThreadingConfig::SINGLE_THREADED,
        ..VdpConfig::default()
    };
    (Vdp::new(config, callbacks), captured)
}

fn run_frame(vdp: &mut Vdp) {
    let cycles = vdp.display_timing().cycles_per_frame();
    vdp.advance(cycles, &mut NoSignals);
}

fn take_frame(captured: &Captured) -> (Vec<Color>, FrameSize) {
    captured.lock().unwrap().take().expect("no frame was delivered")
}

const BACK_SCREEN_ADDRESS: u32 = 0x40000;

/// Red back screen behind NBG0, a 512x256 RGB555 bitmap at VRAM 0 with green pixels at (3, 5) and
/// (10, 0).
fn setup_scene(vdp: &mut Vdp, write: fn(&mut Vdp, VdpRegion, u32, u16)) {
    write(vdp, VdpRegion::Vdp2Registers, BKTAU, (BACK_SCREEN_ADDRESS >> 17) as u16);
    write(vdp, VdpRegion::Vdp2Registers, BKTAU + 2, 0);
    write(vdp, VdpRegion::Vdp2Vram, BACK_SCREEN_ADDRESS, 0x001F);

    write(vdp, VdpRegion::Vdp2Registers, BGON, 0x0001);
    write(vdp, VdpRegion::Vdp2Registers, CHCTLA, 0x0032);
    write(vdp, VdpRegion::Vdp2Registers, PRINA, 0x0001);
    write(vdp, VdpRegion::Vdp2Vram, (5 * 512 + 3) * 2, 0x83E0);
    write(vdp, VdpRegion::Vdp2Vram, 10 * 2, 0x83E0);

    write(vdp, VdpRegion::Vdp2Registers, TVMD, 0x8000);
}

#[derive(Default)]
struct CountingSignals {
    hblanks: u32,
    vblank_ins: u32,
    sprite_draw_ends: u32,
}

impl VdpSignals for CountingSignals {
    fn hblank(&mut self, active: bool) {
        if active {
            self.hblanks += 1;
        }
    }

    fn vblank_in(&mut self) {
        self.vblank_ins += 1;
    }

    fn sprite_draw_end(&mut self) {
        self.sprite_draw_ends += 1;
    }
}

#[test]
fn frame_cycle_totals_for_each_resolution() {
    // (TVMD, lines per frame, cycles per frame)
    let cases = [
        (0x8000, 263, 263 * 427 * 4),
        (0x8001, 263, 263 * 455 * 4),
        (0x8002, 263, 263 * 854 * 2),
        (0x8013, 263, 263 * 910 * 2),
        (0x8004, 525, 525 * 427 * 2),
        (0x8007, 525, 525 * 910),
    ];

    for (tvmd, lines, cycles) in cases {
        let mut vdp = Vdp::new(
            VdpConfig { renderer: VdpRendererKind::Null, ..VdpConfig::default() },
            RendererCallbacks::default(),
        );
        vdp.write_word(VdpRegion::Vdp2Registers, TVMD, tvmd);

        // The new mode is latched on the last line of the current frame
        run_frame(&mut vdp);
        assert!(vdp.is_last_line());
        assert_eq!(vdp.display_timing().cycles_per_frame(), cycles, "TVMD={tvmd:04X}");

        let mut signals = CountingSignals::default();
        vdp.advance(cycles, &mut signals);
        assert!(vdp.is_last_line(), "TVMD={tvmd:04X}");
        assert_eq!(signals.vblank_ins, 1, "TVMD={tvmd:04X}");
        assert_eq!(signals.hblanks, lines, "TVMD={tvmd:04X}");
    }
}

#[test]
fn end_only_command_list_draws_nothing() {
    let frames = Arc::new(AtomicU32::new(0));
    let callbacks = RendererCallbacks::default().on_vdp1_frame_drawn({
        let frames = Arc::clone(&frames);
        move || {
            frames.fetch_add(1, Ordering::Relaxed);
        }
    });
    let config = VdpConfig {
        threading: SoftwareThreadingConfig::SINGLE_THREADED,
        ..VdpConfig::default()
    };
    let mut vdp = Vdp::new(config, callbacks);

    vdp.write_word(VdpRegion::Vdp1Vram, 0, 0x8000);
    vdp.write_word(VdpRegion::Vdp1Registers, PTMR, 1);

    let mut signals = CountingSignals::default();
    vdp.advance(1000, &mut signals);

    assert_eq!(signals.sprite_draw_ends, 1);
    assert_eq!(frames.load(Ordering::Relaxed), 1);
    for address in (0..FRAMEBUFFER_LEN as u32).step_by(2) {
        assert_eq!(vdp.read_word(VdpRegion::Vdp1Framebuffer, address), 0);
    }
}

#[test]
fn poke_produces_same_output_as_write() {
    let (mut written, written_frames) = software_vdp();
    let (mut poked, poked_frames) = software_vdp();

    setup_scene(&mut written, Vdp::write_word);
    setup_scene(&mut poked, Vdp::poke_word);

    for vdp in [&mut written, &mut poked] {
        run_frame(vdp);
    }

    let (written_pixels, written_size) = take_frame(&written_frames);
    let (poked_pixels, poked_size) = take_frame(&poked_frames);
    assert_eq!(written_size, FrameSize { width: 320, height: 224 });
    assert_eq!(written_size, poked_size);
    assert_eq!(written_pixels, poked_pixels);

    assert_eq!(written_pixels[0], RED);
    assert_eq!(written_pixels[10], GREEN);
    assert_eq!(written_pixels[5 * 320 + 3], GREEN);
}

fn write_sprite_list(vdp: &mut Vdp) {
    // 8x8 palette polygon at the origin, then end of list
    let polygon = [
        (0, 0x0004),
        (2, 0x00C0),
        (3, 0x0010),
        (6, 0),
        (7, 0),
        (8, 7),
        (9, 0),
        (10, 7),
        (11, 7),
        (12, 0),
        (13, 7),
    ];
    for (word, value) in polygon {
        vdp.write_word(VdpRegion::Vdp1Vram, 2 * word, value);
    }
    vdp.write_word(VdpRegion::Vdp1Vram, 0x20, 0x8000);

    vdp.write_word(VdpRegion::Vdp2Registers, PRISA, 0x0003);
    vdp.write_word(VdpRegion::Vdp2Cram, 2 * 0x10, 0x7C00);
}

#[test]
fn sprites_are_displayed_after_swap() {
    let (mut vdp, captured) = software_vdp();
    setup_scene(&mut vdp, Vdp::write_word);
    write_sprite_list(&mut vdp);
    vdp.write_word(VdpRegion::Vdp1Registers, PTMR, 1);

    run_frame(&mut vdp);
    let (pixels, _) = take_frame(&captured);
    assert_eq!(pixels[7 * 320 + 7], RED);

    run_frame(&mut vdp);
    let (pixels, _) = take_frame(&captured);
    assert_eq!(pixels[0], BLUE);
    assert_eq!(pixels[7 * 320 + 7], BLUE);
    assert_eq!(pixels[8 * 320 + 8], RED);
}

#[test]
fn save_and_load_reproduce_identical_output() {
    let (mut vdp, captured) = software_vdp();
    setup_scene(&mut vdp, Vdp::write_word);
    write_sprite_list(&mut vdp);
    vdp.write_word(VdpRegion::Vdp1Registers, PTMR, 2);
    run_frame(&mut vdp);

    let save_state = vdp.save_state().expect("save state");
    let bytes = bincode::encode_to_vec(&save_state, bincode::config::standard()).unwrap();

    let continue_frames = |vdp: &mut Vdp| {
        vdp.write_word(VdpRegion::Vdp2Vram, BACK_SCREEN_ADDRESS, 0x7FFF);
        run_frame(vdp);
        let first = take_frame(&captured);
        run_frame(vdp);
        (first, take_frame(&captured))
    };

    let expected = continue_frames(&mut vdp);

    let (save_state, _) =
        bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
    assert!(vdp.load_state(save_state));
    let actual = continue_frames(&mut vdp);

    assert_eq!(actual, expected);
    assert_eq!(actual.1.0[0], BLUE);
}

#[test]
fn enabling_both_rotation_backgrounds_disables_nbg0_and_nbg1() {
    let mut vdp = Vdp::new(
        VdpConfig { renderer: VdpRendererKind::Null, ..VdpConfig::default() },
        RendererCallbacks::default(),
    );

    vdp.write_word(VdpRegion::Vdp2Registers, BGON, 0x001F);
    let availability = vdp.layer_availability();
    assert!(availability.get(Layer::Nbg0) && availability.get(Layer::Nbg1));
    assert!(!availability.get(Layer::Rbg1));

    vdp.write_word(VdpRegion::Vdp2Registers, BGON, 0x003F);
    let availability = vdp.layer_availability();
    assert_eq!(
        availability.enabled_layers(),
        vec![Layer::Sprite, Layer::Rbg0, Layer::Rbg1, Layer::Nbg2, Layer::Nbg3]
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Logged {
    Resolution(FrameSize),
    BeginFrame(FrameSize),
    Line(u32),
}

/// Records the frame structure it is driven with.
struct RecordingRenderer {
    log: Arc<Mutex<Vec<Logged>>>,
}

impl VdpRenderer for RecordingRenderer {
    fn kind(&self) -> VdpRendererKind {
        VdpRendererKind::Null
    }

    fn capabilities(&self) -> RendererCapabilities {
        RendererCapabilities::default()
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn set_callbacks(&mut self, _callbacks: RendererCallbacks) {}

    fn configure_enhancements(&mut self, _enhancements: saturn_config::EnhancementConfig) {}

    fn reset(&mut self, _state: &VdpState, _hard: bool) {}

    fn pre_save_state_sync(&mut self) {}

    fn save_state(&mut self) -> Result<RendererBlob, StateError> {
        RendererBlob::encode(VdpRendererKind::Null, 0, &())
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

    fn vdp1_swap(&mut self, _display_framebuffer: usize) {}

    fn vdp1_end_frame(&mut self) {}

    fn vdp1_sync(&mut self) {}

    fn vdp2_begin_frame(&mut self, frame: FrameParams) {
        self.log.lock().unwrap().push(Logged::BeginFrame(frame.size));
    }

    fn vdp2_draw_line(&mut self, y: u32) {
        self.log.lock().unwrap().push(Logged::Line(y));
    }

    fn vdp2_end_frame(&mut self) {}

    fn layer_enabled(&self, _layer: Layer) -> bool {
        true
    }

    fn set_layer_enabled(&mut self, _layer: Layer, _enabled: bool) {}
}

#[test]
fn resolution_change_is_reported_once_before_first_line() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let callbacks = RendererCallbacks::default().on_vdp2_resolution_changed({
        let log = Arc::clone(&log);
        move |size| log.lock().unwrap().push(Logged::Resolution(size))
    });
    let mut vdp = Vdp::new(
        VdpConfig { renderer: VdpRendererKind::Null, ..VdpConfig::default() },
        callbacks,
    );
    assert!(vdp.install_renderer(Some(Box::new(RecordingRenderer { log: Arc::clone(&log) }))));

    // 352x224, non-exclusive
    vdp.write_word(VdpRegion::Vdp2Registers, TVMD, 0x8001);
    run_frame(&mut vdp);
    let cycles = vdp.display_timing().cycles_per_frame();
    vdp.advance(cycles + 1, &mut NoSignals);

    let log = log.lock().unwrap();
    let new_size = FrameSize { width: 352, height: 224 };
    let resolution_events: Vec<usize> = (0..log.len())
        .filter(|&i| matches!(log[i], Logged::Resolution(_)))
        .collect();
    assert_eq!(resolution_events.len(), 1, "{log:?}");

    let index = resolution_events[0];
    assert_eq!(log[index], Logged::Resolution(new_size));
    assert_eq!(log[index + 1], Logged::BeginFrame(new_size));
    assert_eq!(log[index + 2], Logged::Line(0));
    assert!(!log[..index].contains(&Logged::BeginFrame(new_size)));
}

#[test]
fn hardware_renderer_output_is_read_through_handle() {
    let lists = Arc::new(AtomicU32::new(0));
    let callbacks = RendererCallbacks::default().on_command_list_ready({
        let lists = Arc::clone(&lists);
        move || {
            lists.fetch_add(1, Ordering::Relaxed);
        }
    });
    let mut vdp = Vdp::new(
        VdpConfig { renderer: VdpRendererKind::Hardware, ..VdpConfig::default() },
        callbacks,
    );
    let handle = vdp.hardware_handle().expect("hardware renderer has a handle");

    setup_scene(&mut vdp, Vdp::write_word);
    run_frame(&mut vdp);
    assert_eq!(lists.load(Ordering::Relaxed), 1);

    let mut flushed = false;
    assert!(handle.execute_pending_command_list(|| flushed = true));
    assert!(flushed);
    assert!(!handle.execute_pending_command_list(|| {}));

    let (pixels, size) = handle.read_output().expect("output texture");
    assert_eq!(size, FrameSize { width: 320, height: 224 });
    assert_eq!(pixels[0], RED);
    assert_eq!(pixels[10], GREEN);
}

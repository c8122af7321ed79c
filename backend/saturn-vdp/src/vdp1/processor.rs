//! VDP1 command list interpreter
//!
//! Walks the command table in VRAM, tracks clipping and local coordinate state, charges a cycle
//! cost for every command, and hands resolved drawing commands to the active renderer.

use crate::vdp1::command::{
    Anchor, COMMAND_TABLE_LEN, ClipRect, CommandKind, CommandTable, DrawCommand, JumpMode, Point,
    Primitive, Texture, ZoomPoint,
};
use crate::vdp1::registers::Vdp1Registers;
use bincode::{Decode, Encode};
use saturn_common::num::read_u16;
use std::cmp;

pub const COMMAND_FETCH_CYCLES: i64 = 16;

// Caps the per-axis extent used for cost estimation so that degenerate far-offscreen quads don't
// monopolize the cycle budget
const MAX_COST_EXTENT: i64 = 1024;

const COMMAND_ADDRESS_MASK: u32 = 0x7FFF8;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Vdp1Processor {
    drawing: bool,
    address: u32,
    return_address: Option<u32>,
    local: Point,
    system_clip: ClipRect,
    user_clip: ClipRect,
    cycle_balance: i64,
}

impl Default for Vdp1Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Vdp1Processor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            drawing: false,
            address: 0,
            return_address: None,
            local: Point::default(),
            system_clip: ClipRect { x0: 0, y0: 0, x1: 1023, y1: 511 },
            user_clip: ClipRect::default(),
            cycle_balance: 0,
        }
    }

    #[must_use]
    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    #[must_use]
    pub fn cycle_balance(&self) -> i64 {
        self.cycle_balance
    }

    pub fn start(&mut self, registers: &mut Vdp1Registers) {
        log::debug!("VDP1 drawing started");

        self.drawing = true;
        self.address = 0;
        self.return_address = None;
        self.cycle_balance = cmp::min(self.cycle_balance, 0);

        registers.previous_end = registers.current_end;
        registers.current_end = false;
    }

    pub fn stop(&mut self) {
        if self.drawing {
            log::debug!("VDP1 drawing forcibly terminated at {:05X}", self.address);
        }
        self.drawing = false;
    }

    /// Charge cycles against the drawing budget, e.g. for external VRAM accesses. Ignored while
    /// idle.
    pub fn charge(&mut self, cycles: u32) {
        if self.drawing {
            self.cycle_balance -= i64::from(cycles);
        }
    }

    /// Process commands until the cycle budget is exhausted or the end of the list is reached.
    /// Returns true if the end of the command list was reached during this call.
    pub fn run(
        &mut self,
        cycles: u64,
        vram: &[u8],
        registers: &mut Vdp1Registers,
        mut draw: impl FnMut(&DrawCommand),
    ) -> bool {
        if !self.drawing {
            return false;
        }

        let cycles = i64::try_from(cycles).unwrap_or(i64::MAX);
        self.cycle_balance = self.cycle_balance.saturating_add(cycles);
        while self.cycle_balance > 0 {
            let table = CommandTable::read(vram, self.address);
            registers.current_command_address = self.address;

            if table.end() {
                log::debug!("VDP1 command list ended at {:05X}", self.address);

                self.drawing = false;
                self.cycle_balance = 0;
                registers.current_end = true;
                return true;
            }

            let mut cost = COMMAND_FETCH_CYCLES;
            if !table.skip() {
                cost += self.execute(&table, vram, &mut draw);
            }

            registers.last_command_address = self.address;
            self.cycle_balance -= cost;
            self.address = self.next_address(&table);
        }

        false
    }

    fn next_address(&mut self, table: &CommandTable) -> u32 {
        let next = self.address + COMMAND_TABLE_LEN;
        let address = match table.jump_mode() {
            JumpMode::Next => next,
            JumpMode::Assign => table.link_address(),
            JumpMode::Call => {
                // Calls do not nest; a call inside a subroutine behaves like an assign
                if self.return_address.is_none() {
                    self.return_address = Some(next);
                }
                table.link_address()
            }
            JumpMode::Return => self.return_address.take().unwrap_or(next),
        };

        address & COMMAND_ADDRESS_MASK
    }

    fn execute(
        &mut self,
        table: &CommandTable,
        vram: &[u8],
        draw: &mut impl FnMut(&DrawCommand),
    ) -> i64 {
        let kind = table.kind();
        log::trace!("VDP1 command at {:05X}: {kind:?}", self.address);

        let (primitive, vertices) = match kind {
            CommandKind::SystemClipping => {
                let corner = table.vertex(2);
                self.system_clip = ClipRect { x0: 0, y0: 0, x1: corner.x, y1: corner.y };
                log::trace!("  System clip: {:?}", self.system_clip);
                return 0;
            }
            CommandKind::UserClipping => {
                let (upper_left, lower_right) = (table.vertex(0), table.vertex(2));
                self.user_clip = ClipRect {
                    x0: upper_left.x,
                    y0: upper_left.y,
                    x1: lower_right.x,
                    y1: lower_right.y,
                };
                log::trace!("  User clip: {:?}", self.user_clip);
                return 0;
            }
            CommandKind::LocalCoordinates => {
                self.local = table.vertex(0);
                log::trace!("  Local coordinates: {:?}", self.local);
                return 0;
            }
            CommandKind::Invalid(bits) => {
                log::warn!("Invalid VDP1 command {bits:X} at {:05X}; skipping", self.address);
                return 0;
            }
            CommandKind::NormalSprite => {
                let (width, height) = table.char_size();
                if width == 0 || height == 0 {
                    return 0;
                }
                let a = self.offset(table.vertex(0));
                let (right, bottom) = (a.x + width as i32 - 1, a.y + height as i32 - 1);
                let vertices =
                    [a, Point::new(right, a.y), Point::new(right, bottom), Point::new(a.x, bottom)];
                (Primitive::Sprite, vertices)
            }
            CommandKind::ScaledSprite => (Primitive::Sprite, self.scaled_vertices(table)),
            CommandKind::DistortedSprite => (Primitive::Sprite, self.quad_vertices(table)),
            CommandKind::Polygon => (Primitive::Polygon, self.quad_vertices(table)),
            CommandKind::Polylines => (Primitive::Polylines, self.quad_vertices(table)),
            CommandKind::Line => {
                let mut vertices = self.quad_vertices(table);
                vertices[2] = vertices[1];
                vertices[3] = vertices[0];
                (Primitive::Line, vertices)
            }
        };

        let mode = table.draw_mode();
        let texture = (primitive == Primitive::Sprite).then(|| {
            let (width, height) = table.char_size();
            Texture {
                address: table.char_address(),
                width,
                height,
                flip_h: table.flip_h(),
                flip_v: table.flip_v(),
            }
        });

        let gouraud = mode.color_calc.gouraud().then(|| {
            let address = table.gouraud_address() as usize;
            [0, 1, 2, 3].map(|i| read_u16(vram, address + 2 * i))
        });

        let command = DrawCommand {
            address: self.address,
            primitive,
            mode,
            color: table.color(),
            texture,
            vertices,
            gouraud,
            system_clip: self.system_clip,
            user_clip: self.user_clip,
        };

        let (min, max) = command.bounding_box();
        if !self.system_clip.intersects(min, max) {
            log::trace!("  Entirely outside the system clip area; no pixels drawn");
            return 0;
        }

        draw(&command);
        draw_cost(&command)
    }

    fn offset(&self, vertex: Point) -> Point {
        Point::new(vertex.x + self.local.x, vertex.y + self.local.y)
    }

    fn quad_vertices(&self, table: &CommandTable) -> [Point; 4] {
        [0, 1, 2, 3].map(|i| self.offset(table.vertex(i)))
    }

    fn scaled_vertices(&self, table: &CommandTable) -> [Point; 4] {
        let (x0, y0, x1, y1) = match table.zoom_point() {
            ZoomPoint::TwoCorners => {
                let (a, c) = (self.offset(table.vertex(0)), self.offset(table.vertex(2)));
                (a.x, a.y, c.x, c.y)
            }
            ZoomPoint::Anchored { h, v } => {
                let point = self.offset(table.vertex(0));
                let size = table.vertex(1);
                let (x0, x1) = anchor_span(point.x, size.x, h);
                let (y0, y1) = anchor_span(point.y, size.y, v);
                (x0, y0, x1, y1)
            }
        };

        [Point::new(x0, y0), Point::new(x1, y0), Point::new(x1, y1), Point::new(x0, y1)]
    }
}

fn anchor_span(position: i32, size: i32, anchor: Anchor) -> (i32, i32) {
    let start = match anchor {
        Anchor::Start => position,
        Anchor::Center => position - size / 2,
        Anchor::End => position - size,
    };
    (start, start + size)
}

fn extent(a: Point, b: Point) -> i64 {
    let extent = cmp::max((b.x - a.x).abs(), (b.y - a.y).abs());
    cmp::min(i64::from(extent), MAX_COST_EXTENT) + 1
}

fn draw_cost(command: &DrawCommand) -> i64 {
    let [a, b, c, d] = command.vertices;
    match command.primitive {
        Primitive::Line => extent(a, b),
        Primitive::Polylines => extent(a, b) + extent(b, c) + extent(c, d) + extent(d, a),
        Primitive::Sprite | Primitive::Polygon => {
            let lines = cmp::max(extent(a, d), extent(b, c));
            let width = cmp::max(extent(a, b), extent(d, c));
            lines * width
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saturn_common::num::write_u16;
    use test_log::test;

    struct CommandWriter {
        vram: Vec<u8>,
    }

    impl CommandWriter {
        fn new() -> Self {
            Self { vram: vec![0; 0x80000] }
        }

        fn write(&mut self, address: u32, words: &[(usize, u16)]) {
            for &(i, value) in words {
                write_u16(&mut self.vram, address as usize + 2 * i, value);
            }
        }
    }

    fn run_to_end(
        processor: &mut Vdp1Processor,
        vram: &[u8],
    ) -> (bool, Vec<DrawCommand>, Vdp1Registers) {
        let mut registers = Vdp1Registers::new();
        let mut commands = Vec::new();
        processor.start(&mut registers);
        let ended = processor.run(1_000_000, vram, &mut registers, |command| {
            commands.push(*command);
        });
        (ended, commands, registers)
    }

    #[test]
    fn end_only_list_draws_nothing() {
        let mut writer = CommandWriter::new();
        writer.write(0, &[(0, 0x8000)]);

        let mut processor = Vdp1Processor::new();
        let (ended, commands, registers) = run_to_end(&mut processor, &writer.vram);
        assert!(ended);
        assert!(commands.is_empty());
        assert!(registers.current_end);
        assert!(!processor.is_drawing());
    }

    #[test]
    fn oversized_cycle_budget_saturates() {
        let mut writer = CommandWriter::new();
        writer.write(0x00, &[(0, 0x000A), (6, 1), (7, 1)]);
        writer.write(0x20, &[(0, 0x8000)]);

        let mut processor = Vdp1Processor::new();
        let mut registers = Vdp1Registers::new();
        processor.start(&mut registers);
        processor.charge(100);

        assert!(processor.run(u64::MAX, &writer.vram, &mut registers, |_| {}));
        assert!(registers.current_end);
        assert_eq!(processor.cycle_balance(), 0);
    }

    #[test]
    fn local_coordinates_offset_polygons() {
        let mut writer = CommandWriter::new();
        writer.write(0x00, &[(0, 0x000A), (6, 10), (7, 20)]);
        writer.write(
            0x20,
            &[(0, 0x0004), (3, 0x801F), (6, 0), (7, 0), (8, 5), (9, 0), (10, 5), (11, 5), (12, 0), (13, 5)],
        );
        writer.write(0x40, &[(0, 0x8000)]);

        let mut processor = Vdp1Processor::new();
        let (ended, commands, _) = run_to_end(&mut processor, &writer.vram);
        assert!(ended);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].primitive, Primitive::Polygon);
        assert_eq!(commands[0].vertices[0], Point::new(10, 20));
        assert_eq!(commands[0].vertices[2], Point::new(15, 25));
    }

    #[test]
    fn call_and_return() {
        let mut writer = CommandWriter::new();
        // Call subroutine at 0x100, then end
        writer.write(0x00, &[(0, 0x2006), (1, 0x100 >> 3), (6, 1), (7, 1), (8, 2), (9, 2)]);
        writer.write(0x20, &[(0, 0x8000)]);
        // Subroutine: draw a line, then return
        writer.write(0x100, &[(0, 0x3006), (6, 3), (7, 3), (8, 4), (9, 4)]);

        let mut processor = Vdp1Processor::new();
        let (ended, commands, registers) = run_to_end(&mut processor, &writer.vram);
        assert!(ended);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].address, 0x100);
        assert_eq!(registers.current_command_address, 0x20);
    }

    #[test]
    fn skipped_and_clipped_commands_are_not_drawn() {
        let mut writer = CommandWriter::new();
        // System clip to 0-99
        writer.write(0x00, &[(0, 0x0009), (10, 99), (11, 99)]);
        // Skipped line
        writer.write(0x20, &[(0, 0x4006), (8, 10), (9, 10)]);
        // Line entirely outside the clip area
        writer.write(0x40, &[(0, 0x0006), (6, 200), (7, 200), (8, 300), (9, 210)]);
        writer.write(0x60, &[(0, 0x8000)]);

        let mut processor = Vdp1Processor::new();
        let (ended, commands, _) = run_to_end(&mut processor, &writer.vram);
        assert!(ended);
        assert!(commands.is_empty());
    }

    #[test]
    fn budget_exhaustion_resumes_later() {
        let mut writer = CommandWriter::new();
        // 64x64 polygon followed by end
        writer.write(0x00, &[(0, 0x0004), (8, 63), (10, 63), (11, 63), (13, 63)]);
        writer.write(0x20, &[(0, 0x8000)]);

        let mut processor = Vdp1Processor::new();
        let mut registers = Vdp1Registers::new();
        processor.start(&mut registers);

        let mut draws = 0;
        assert!(!processor.run(1, &writer.vram, &mut registers, |_| draws += 1));
        assert_eq!(draws, 1);
        assert!(processor.cycle_balance() < 0);

        // Not enough cycles to repay the polygon's cost
        assert!(!processor.run(100, &writer.vram, &mut registers, |_| draws += 1));
        assert!(processor.run(64 * 64, &writer.vram, &mut registers, |_| draws += 1));
        assert_eq!(draws, 1);
    }

    #[test]
    fn scaled_sprite_anchors() {
        let mut writer = CommandWriter::new();
        // Zoom point center/center at (100, 50), display size 20x10, char 8x8
        writer.write(0x00, &[(0, 0x0A01), (5, (1 << 8) | 8), (6, 100), (7, 50), (8, 20), (9, 10)]);
        writer.write(0x20, &[(0, 0x8000)]);

        let mut processor = Vdp1Processor::new();
        let (_, commands, _) = run_to_end(&mut processor, &writer.vram);
        assert_eq!(commands[0].vertices[0], Point::new(90, 45));
        assert_eq!(commands[0].vertices[2], Point::new(110, 55));
        assert_eq!(commands[0].texture.map(|texture| texture.width), Some(8));
    }
}

//! Window masks: two rectangle/line windows and the sprite window, combined per layer with OR or AND
//! logic. A set mask bit means the window area applies at that pixel (the layer or effect is
//! suppressed there).

use crate::vdp2::registers::{Vdp2Registers, WindowControl, WindowLogic};
use saturn_common::num::read_u16;

/// Horizontal span (inclusive) of each of the two windows on the current line, if the line is
/// inside the window vertically.
pub type WindowSpans = [Option<(u32, u32)>; 2];

/// Resolve both windows for line `y`. `hires` selects whether X coordinates are used as-is
/// (640/704 modes) or halved.
#[must_use]
pub fn line_spans(registers: &Vdp2Registers, vram: &[u8], y: u32, hires: bool) -> WindowSpans {
    [0, 1].map(|window| {
        let rect = registers.window_rect(window);
        if y < rect.y0 || y > rect.y1 {
            return None;
        }

        let (x0, x1) = match rect.line_table {
            Some(table) => {
                let entry = (table + 4 * y) as usize;
                (u32::from(read_u16(vram, entry) & 0x3FF), u32::from(read_u16(vram, entry + 2) & 0x3FF))
            }
            None => (rect.x0, rect.x1),
        };

        let (x0, x1) = if hires { (x0, x1) } else { (x0 >> 1, x1 >> 1) };
        (x0 <= x1).then_some((x0, x1))
    })
}

fn inside(span: Option<(u32, u32)>, x: u32) -> bool {
    span.is_some_and(|(x0, x1)| (x0..=x1).contains(&x))
}

#[must_use]
pub fn evaluate(control: &WindowControl, spans: &WindowSpans, sprite_window: bool, x: u32) -> bool {
    let results = [
        (control.w0_enabled, inside(spans[0], x) != control.w0_outside),
        (control.w1_enabled, inside(spans[1], x) != control.w1_outside),
        (control.sprite_enabled, sprite_window != control.sprite_outside),
    ];
    let mut enabled = results.iter().filter(|(enabled, _)| *enabled).map(|&(_, result)| result);

    match control.logic {
        WindowLogic::Or => enabled.any(|result| result),
        WindowLogic::And => {
            let mut any = false;
            for result in enabled {
                if !result {
                    return false;
                }
                any = true;
            }
            any
        }
    }
}

/// Fill `mask` for every pixel of the line. Leaves the mask cleared when no window is enabled.
pub fn compute_mask(
    control: &WindowControl,
    spans: &WindowSpans,
    sprite_window: &[bool],
    mask: &mut [bool],
) {
    if !control.any_enabled() {
        mask.fill(false);
        return;
    }

    for (x, value) in mask.iter_mut().enumerate() {
        let sprite = sprite_window.get(x).copied().unwrap_or(false);
        *value = evaluate(control, spans, sprite, x as u32);
    }
}

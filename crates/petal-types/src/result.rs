//! Output bundle of a translation: plots, palette entries, statistics.
//!
//! Everything here is consumed read-only by presentation code (renderer,
//! driver); nothing feeds back into compilation.

use crate::fixed::Number;
use crate::Warning;
use serde::{Deserialize, Serialize};

/// One visible circle: the output unit of `draw`/`plot`.
///
/// All fields are clipped to the target's signed 16-bit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plot {
    pub frame: i16,
    pub x: i16,
    pub y: i16,
    pub size: i16,
    pub tint: i16,
}

/// One palette-table update: set entry `index` to the 12-bit `rgb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TintColor {
    pub frame: i16,
    pub index: i16,
    pub rgb: u16,
}

/// Per-frame hardware cost counters.
///
/// Compute cycles are signed: a tail fork credits back the dispatch
/// overhead it avoids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub compute_cycles: i32,
    pub draw_cycles: u32,
    pub circles: u32,
    pub turtles_survived: u32,
    pub turtles_died: u32,
}

/// Advisory resource statistics for a translated program.
///
/// Deterministic (regression-testable) but never used for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub frames: usize,
    pub width: i32,
    pub height: i32,
    pub layer_count: i32,
    pub layer_depth: i32,
    /// Largest amount by which a dropped turtle's clock exceeded the budget.
    pub max_overwait: i32,
    /// Deepest simulated operand stack seen by the code generator.
    pub max_stack_height: i32,
    /// Physical wire slots used after conflict coloring.
    pub wire_slots: usize,
    /// Total turtles forked over the whole run (the entry turtle not counted).
    pub turtles_born: u32,
    pub frame: Vec<FrameStats>,
}

impl Statistics {
    pub fn new(frames: usize, width: i32, height: i32, layer_count: i32, layer_depth: i32) -> Self {
        Self {
            frames,
            width,
            height,
            layer_count,
            layer_depth,
            max_overwait: 0,
            max_stack_height: 0,
            wire_slots: 0,
            turtles_born: 0,
            frame: vec![FrameStats::default(); frames],
        }
    }

    /// Charge compute cycles to a frame, ignoring out-of-budget frames.
    pub fn compute(&mut self, frame: i32, cycles: i32) {
        if frame >= 0 && (frame as usize) < self.frames {
            self.frame[frame as usize].compute_cycles += cycles;
        }
    }

    /// Record one circle at (x, y) with radius `r`, charging a raster cost
    /// that depends on how much of the circle survives clipping against
    /// the frame bounds: 34 cycles fixed, plus 4 per visible scanline plus
    /// 2 per 16-pixel word spanned by the clipped chord.
    pub fn draw(&mut self, frame: i16, x: i16, y: i16, r: i16) {
        let f = frame as usize;
        if frame < 0 || f >= self.frames {
            return;
        }
        self.frame[f].circles += 1;
        let (x, y, r) = (x as i32, y as i32, r.max(0) as i32);
        let mut cycles = 34u32;
        for dy in -r..=r {
            let yy = y + dy;
            if yy < 0 || yy >= self.height {
                continue;
            }
            let half = isqrt(r * r - dy * dy);
            let x0 = (x - half).max(0);
            let x1 = (x + half).min(self.width - 1);
            if x1 < x0 {
                continue;
            }
            let words = (x1 >> 4) - (x0 >> 4) + 1;
            cycles += 4 + 2 * words as u32;
        }
        self.frame[f].draw_cycles += cycles;
    }

    /// Most circles drawn in any single frame.
    pub fn max_circles(&self) -> u32 {
        self.frame.iter().map(|f| f.circles).max().unwrap_or(0)
    }

    /// Most turtles simultaneously alive in any frame (survivors plus
    /// deaths plus the entry turtle).
    pub fn max_turtles(&self) -> u32 {
        self.frame
            .iter()
            .map(|f| f.turtles_survived + f.turtles_died + 1)
            .max()
            .unwrap_or(1)
    }
}

fn isqrt(v: i32) -> i32 {
    if v <= 0 {
        return 0;
    }
    let mut r = (v as f64).sqrt() as i32;
    // Float sqrt can be off by one at integer boundaries; settle exactly.
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    while r * r > v {
        r -= 1;
    }
    r
}

/// A deduplicated constant-pool entry: value and occurrence count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub value: Number,
    pub count: u32,
}

/// The read-only bundle a successful translation hands to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateResult {
    pub plots: Vec<Plot>,
    pub colors: Vec<TintColor>,
    pub width: i32,
    pub height: i32,
    pub layer_count: i32,
    pub layer_depth: i32,
    pub stats: Statistics,
    pub warnings: Vec<Warning>,
    /// The sorted constant pool with occurrence counts.
    pub constant_pool: Vec<PoolEntry>,
    /// Opcode stream, terminated by the end-of-script marker.
    pub bytecode: Vec<u8>,
    /// Constant table, 32-bit big-endian values in sorted order.
    pub constants_bin: Vec<u8>,
    /// Color script, 16-bit big-endian entries with a terminator.
    pub color_script_bin: Vec<u8>,
}

impl TranslateResult {
    pub fn is_empty(&self) -> bool {
        self.plots.is_empty() && self.colors.is_empty()
    }
}

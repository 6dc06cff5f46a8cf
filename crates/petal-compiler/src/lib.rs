//! Petal compiler: orchestrates the full translation pipeline.
//!
//! ```text
//! AST → Symbol Linking → Reference Interpreter → Code Generator → artifacts
//! ```
//!
//! The ordering is a hard dependency, not a convenience: linking resolves
//! the references and constant pool the interpreter needs, and the
//! interpreter discovers the wire conflict matrix (and per-frame costs)
//! the code generator's slot allocation consumes. Translation is
//! all-or-nothing; a failed run yields an error and no artifacts, and
//! re-attempting after a source change is the caller's concern.

use petal_codegen::{assign_wires, encode_color_script, encode_constants, generate, CodegenOptions, WireSlots};
use petal_eval::{get_colors, get_form, interpret, Form};
use petal_link::link;
use petal_types::ast::Program;
use petal_types::result::{PoolEntry, Statistics, TranslateResult};
use petal_types::{Reporter, Result, TranslateError};

/// Caller-supplied translation parameters. The program's `form`
/// declaration, when present, overrides the canvas and layer values.
#[derive(Debug, Clone, Copy)]
pub struct TranslateOptions {
    /// Frame budget: turtles whose clock reaches this are dropped.
    pub frames: usize,
    pub width: i32,
    pub height: i32,
    pub layer_count: i32,
    pub layer_depth: i32,
    pub codegen: CodegenOptions,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            frames: 10000,
            width: 352,
            height: 280,
            layer_count: 1,
            layer_depth: 8,
            codegen: CodegenOptions::default(),
        }
    }
}

/// Translate a parsed program into plots, palette script, statistics,
/// and the target's binary artifacts.
pub fn translate(program: &Program, options: &TranslateOptions) -> Result<TranslateResult> {
    let mut rep = Reporter::new();

    let linked = link(program, &mut rep)?;
    if linked.procs.is_empty() {
        return Err(TranslateError::General("No procedures".into()));
    }
    let entry = program.proc(linked.procs[0]);
    if !entry.params.is_empty() {
        return Err(TranslateError::at(
            entry.name.span,
            "Entry procedure must not have any parameters",
        ));
    }

    let form = get_form(
        program,
        &linked,
        Form {
            width: options.width,
            height: options.height,
            layer_count: options.layer_count,
            layer_depth: options.layer_depth,
        },
        &mut rep,
    )?;

    let mut stats = Statistics::new(
        options.frames,
        form.width,
        form.height,
        form.layer_count,
        form.layer_depth,
    );

    let simulated = interpret(program, &linked, 0, &mut stats, &mut rep)?;
    let colors = get_colors(program, &linked, &mut rep)?;

    let wires = if linked.wire_count > 0 {
        assign_wires(&simulated.conflicts)
    } else {
        WireSlots::none()
    };
    stats.wire_slots = wires.slots_used;

    let generated = generate(program, &linked, &wires, &mut stats, options.codegen)?;

    let constant_pool = generated
        .constants
        .iter()
        .map(|&value| PoolEntry {
            value,
            count: linked.constant_count.get(&value).copied().unwrap_or(0),
        })
        .collect();
    let constants_bin = encode_constants(&generated.constants);
    let color_script_bin = encode_color_script(&colors);

    log::info!(
        "translated: {} plots, {} color entries, {} bytecode bytes, {} wire slots",
        simulated.plots.len(),
        colors.len(),
        generated.bytecode.len(),
        stats.wire_slots
    );

    Ok(TranslateResult {
        plots: simulated.plots,
        colors,
        width: form.width,
        height: form.height,
        layer_count: form.layer_count,
        layer_depth: form.layer_depth,
        stats,
        warnings: rep.into_warnings(),
        constant_pool,
        bytecode: generated.bytecode,
        constants_bin,
        color_script_bin,
    })
}

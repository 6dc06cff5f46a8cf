//! End-to-end pipeline tests: link → interpret → generate, artifact
//! encoding, and the externally observable tail-call equivalence.

use petal_codegen::CodegenOptions;
use petal_compiler::{translate, TranslateOptions};
use petal_types::ast::{AstBuilder, BinOp, Program, Stmt};
use petal_types::result::Plot;

fn options(frames: usize) -> TranslateOptions {
    TranslateOptions {
        frames,
        ..TranslateOptions::default()
    }
}

fn single_proc(b: &mut AstBuilder, body: Vec<Stmt>) -> Program {
    let main = b.proc("main", vec![], body);
    Program { decls: vec![main] }
}

#[test]
fn end_to_end_fork_wait_draw_scenario() {
    let mut b = AstBuilder::new();
    let target = b.var("child");
    let fork = b.fork(target, vec![]);
    let w = b.num("2");
    let body = vec![fork, b.wait(w), b.draw()];
    let main = b.proc("main", vec![], body);
    let child = b.proc("child", vec![], vec![]);
    let prog = Program {
        decls: vec![main, child],
    };
    let result = translate(&prog, &options(16)).unwrap();

    assert_eq!(
        result.plots,
        vec![Plot {
            frame: 2,
            x: 0,
            y: 0,
            size: 2,
            tint: 1,
        }]
    );
    assert_eq!(result.stats.turtles_born, 1);
    assert_eq!(result.stats.frame[0].turtles_survived, 1);
    assert_eq!(result.stats.frame[1].turtles_survived, 1);

    // Artifacts are present and well-formed.
    assert_eq!(result.bytecode.last(), Some(&0xFF));
    assert_eq!(result.constants_bin.len(), result.constant_pool.len() * 4);
    assert_eq!(
        &result.color_script_bin,
        &[0x80, 0x00],
        "no plans: just the terminator"
    );
}

#[test]
fn no_procedures_is_a_generic_error() {
    let prog = Program { decls: vec![] };
    let err = translate(&prog, &options(8)).unwrap_err();
    assert_eq!(format!("{err}"), "No procedures");
}

#[test]
fn entry_procedure_must_have_no_parameters() {
    let mut b = AstBuilder::new();
    let main = b.proc("main", vec!["p"], vec![]);
    let prog = Program { decls: vec![main] };
    let err = translate(&prog, &options(8)).unwrap_err();
    assert!(format!("{err}").contains("Entry procedure must not have any parameters"));
}

#[test]
fn form_declaration_overrides_caller_defaults() {
    let mut b = AstBuilder::new();
    let w = b.num("320");
    let h = b.num("200");
    let lc = b.num("2");
    let ld = b.num("4");
    let form = b.form(w, h, lc, ld);
    let body = vec![b.draw()];
    let main = b.proc("main", vec![], body);
    let prog = Program {
        decls: vec![form, main],
    };
    let result = translate(&prog, &options(8)).unwrap();
    assert_eq!(
        (result.width, result.height, result.layer_count, result.layer_depth),
        (320, 200, 2, 4)
    );
    assert_eq!(result.stats.width, 320);
}

#[test]
fn constant_table_is_sorted_unsigned() {
    let mut b = AstBuilder::new();
    let five = b.num("5");
    let neg = b.neg(five);
    let t1 = b.temp("a", neg);
    let lit = b.num("$FFFF0000");
    let t2 = b.temp("b", lit);
    let small = b.num("0.5");
    let t3 = b.temp("c", small);
    let prog = single_proc(&mut b, vec![t1, t2, t3]);
    let result = translate(&prog, &options(8)).unwrap();
    let unsigned: Vec<u32> = result
        .constant_pool
        .iter()
        .map(|e| e.value as u32)
        .collect();
    let mut sorted = unsigned.clone();
    sorted.sort_unstable();
    assert_eq!(unsigned, sorted);
    // The binary table matches the pool.
    for (i, e) in result.constant_pool.iter().enumerate() {
        let word = u32::from_be_bytes(result.constants_bin[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(word, e.value as u32);
    }
}

#[test]
fn tail_rewrite_preserves_observable_behavior() {
    // A turtle that redraws itself each frame through a tail fork.
    let build = || {
        let mut b = AstBuilder::new();
        let p_ref = b.var("p");
        let mv = b.mv(p_ref);
        let w = b.num("1");
        let target = b.var("spin");
        let p_again = b.var("p");
        let one = b.num("1");
        let next = b.binary(BinOp::Add, p_again, one);
        let fork = b.fork(target, vec![next]);
        let spin_body = vec![mv, b.draw(), b.wait(w), fork];
        let spin = b.proc("spin", vec!["p"], spin_body);
        let target2 = b.var("spin");
        let two = b.num("2");
        let fork2 = b.fork(target2, vec![two]);
        let main = b.proc("main", vec![], vec![fork2]);
        // The entry procedure is the first declared.
        Program {
            decls: vec![main, spin],
        }
    };
    let prog = build();

    let mut with_tail = options(12);
    with_tail.codegen = CodegenOptions { tail_calls: true };
    let mut without_tail = options(12);
    without_tail.codegen = CodegenOptions { tail_calls: false };

    let a = translate(&prog, &with_tail).unwrap();
    let b2 = translate(&prog, &without_tail).unwrap();
    assert_eq!(a.plots, b2.plots);
    assert_eq!(a.colors, b2.colors);
    assert_ne!(a.bytecode, b2.bytecode, "the rewrite must change the code");
}

#[test]
fn wire_slot_capacity_lands_in_statistics() {
    let mut b = AstBuilder::new();
    let va = b.num("1");
    let wa = b.wire("a", va);
    let vb = b.num("2");
    let wb = b.wire("b", vb);
    let a_ref = b.var("a");
    let body = vec![wa, wb, b.size(a_ref)];
    let prog = single_proc(&mut b, body);
    let result = translate(&prog, &options(8)).unwrap();
    assert_eq!(result.stats.wire_slots, 2);
}

#[test]
fn warnings_surface_in_the_result() {
    let mut b = AstBuilder::new();
    let lit = b.num("40000");
    let body = vec![b.temp("a", lit)];
    let prog = single_proc(&mut b, body);
    let result = translate(&prog, &options(8)).unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.message == "Number overflows to negative"));
}

#[test]
fn result_bundle_serializes() {
    let mut b = AstBuilder::new();
    let body = vec![b.draw()];
    let prog = single_proc(&mut b, body);
    let result = translate(&prog, &options(4)).unwrap();
    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"plots\""));
    assert!(json.contains("\"bytecode\""));
    let back: petal_types::result::TranslateResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back.plots, result.plots);
}

#[test]
fn plan_colors_flow_into_the_color_script() {
    let mut b = AstBuilder::new();
    let c1 = b.color(0, 0xF00);
    let w = b.num("3");
    let wait = b.wait_event(w);
    let c2 = b.color(1, 0x0F0);
    let plan = b.plan(vec![c1, wait, c2]);
    let body = vec![b.draw()];
    let main = b.proc("main", vec![], body);
    let prog = Program {
        decls: vec![plan, main],
    };
    let result = translate(&prog, &options(8)).unwrap();
    assert_eq!(result.colors.len(), 2);
    let words: Vec<u16> = result
        .color_script_bin
        .chunks(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(
        words,
        vec![
            (-1i16) as u16,
            0x0F00,
            (-3i16) as u16,
            0x1 << 12 | 0x0F0,
            0x8000,
        ]
    );
}

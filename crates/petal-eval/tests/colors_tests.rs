//! Integration tests for palette script generation and form resolution.

use petal_eval::{get_colors, get_form, Form};
use petal_link::{link, Linked};
use petal_types::ast::{AstBuilder, Decl, Program};
use petal_types::result::TintColor;
use petal_types::Reporter;

const DEFAULT_FORM: Form = Form {
    width: 352,
    height: 280,
    layer_count: 3,
    layer_depth: 5,
};

fn linked(prog: &Program) -> (Linked, Reporter) {
    let mut rep = Reporter::new();
    let l = link(prog, &mut rep).expect("link failed");
    (l, rep)
}

fn with_main(b: &mut AstBuilder, mut decls: Vec<Decl>) -> Program {
    let body = vec![b.draw()];
    decls.push(b.proc("main", vec![], body));
    Program { decls }
}

fn entry(frame: i16, index: i16, rgb: u16) -> TintColor {
    TintColor { frame, index, rgb }
}

// ══════════════════════════════════════════════════════════════════════════════
// Plain color plans
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn color_events_pass_through_in_order() {
    let mut b = AstBuilder::new();
    let c1 = b.color(0, 0xF00);
    let c2 = b.color(1, 0x0F0);
    let w = b.num("5");
    let wait = b.wait_event(w);
    let c3 = b.color(0, 0x00F);
    let plan = b.plan(vec![c1, c2, wait, c3]);
    let prog = with_main(&mut b, vec![plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    assert_eq!(
        colors,
        vec![
            entry(0, 0, 0xF00),
            entry(0, 1, 0x0F0),
            entry(5, 0, 0x00F),
        ]
    );
}

#[test]
fn color_only_plan_is_idempotent() {
    let mut b = AstBuilder::new();
    let c1 = b.color(2, 0xABC);
    let c2 = b.color(2, 0xABC); // repeated value still yields an entry
    let plan = b.plan(vec![c1, c2]);
    let prog = with_main(&mut b, vec![plan]);
    let (l, mut rep) = linked(&prog);
    let first = get_colors(&prog, &l, &mut rep).unwrap();
    let second = get_colors(&prog, &l, &mut rep).unwrap();
    assert_eq!(first.len(), 2, "one entry per input event");
    assert_eq!(first, second);
}

#[test]
fn wait_durations_may_use_facts() {
    let mut b = AstBuilder::new();
    let v = b.num("4");
    let fact = b.fact("pause", v);
    let d = b.var("pause");
    let wait = b.wait_event(d);
    let c = b.color(0, 0x123);
    let plan = b.plan(vec![wait, c]);
    let prog = with_main(&mut b, vec![fact, plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    assert_eq!(colors, vec![entry(4, 0, 0x123)]);
}

// ══════════════════════════════════════════════════════════════════════════════
// Fades
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn fade_interpolates_per_frame_with_rounding() {
    let mut b = AstBuilder::new();
    let c0 = b.color(0, 0x000);
    let w1 = b.num("2");
    let wait1 = b.wait_event(w1);
    let d = b.num("4");
    let fade = b.fade(d);
    let target = b.color(0, 0x800);
    let plan = b.plan(vec![c0, wait1, fade, target]);
    let prog = with_main(&mut b, vec![plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    // Red channel 0 → 8 over 4 frames with round-to-nearest: 2, 4, 6, 8.
    assert_eq!(
        colors,
        vec![
            entry(0, 0, 0x000),
            entry(3, 0, 0x200),
            entry(4, 0, 0x400),
            entry(5, 0, 0x600),
            entry(6, 0, 0x800),
        ]
    );
}

#[test]
fn fade_resolves_at_the_next_wait() {
    let mut b = AstBuilder::new();
    let d = b.num("2");
    let fade = b.fade(d);
    let target = b.color(1, 0x040);
    let w = b.num("10");
    let wait = b.wait_event(w);
    let after = b.color(1, 0xF00);
    let plan = b.plan(vec![fade, target, wait, after]);
    let prog = with_main(&mut b, vec![plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    // Interpolation lands on frames 1..=2; the post-wait color on frame 10.
    assert_eq!(
        colors,
        vec![
            entry(1, 1, 0x020),
            entry(2, 1, 0x040),
            entry(10, 1, 0xF00),
        ]
    );
}

#[test]
fn fade_to_identical_color_emits_nothing() {
    let mut b = AstBuilder::new();
    let c0 = b.color(0, 0xF00);
    let d = b.num("4");
    let fade = b.fade(d);
    let same = b.color(0, 0xF00);
    let plan = b.plan(vec![c0, fade, same]);
    let prog = with_main(&mut b, vec![plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    assert_eq!(colors, vec![entry(0, 0, 0xF00)]);
}

#[test]
fn fade_skips_repeated_interpolated_values() {
    let mut b = AstBuilder::new();
    let c0 = b.color(0, 0x000);
    let d = b.num("8");
    let fade = b.fade(d);
    let target = b.color(0, 0x200);
    let plan = b.plan(vec![c0, fade, target]);
    let prog = with_main(&mut b, vec![plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    // 0 → 2 over 8 frames: interpolation repeats values; only changes emit.
    let fade_entries: Vec<u16> = colors.iter().skip(1).map(|c| c.rgb).collect();
    assert_eq!(fade_entries, vec![0x100, 0x200]);
    // No two consecutive entries for the same index repeat a value.
    for pair in colors.windows(2) {
        if pair[0].index == pair[1].index {
            assert_ne!(pair[0].rgb, pair[1].rgb);
        }
    }
}

#[test]
fn back_to_back_fades_resolve_in_sequence() {
    let mut b = AstBuilder::new();
    let c0 = b.color(0, 0x000);
    let d1 = b.num("2");
    let f1 = b.fade(d1);
    let t1 = b.color(0, 0x400);
    let d2 = b.num("2");
    let f2 = b.fade(d2);
    let t2 = b.color(0, 0x800);
    let plan = b.plan(vec![c0, f1, t1, f2, t2]);
    let prog = with_main(&mut b, vec![plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    assert_eq!(
        colors,
        vec![
            entry(0, 0, 0x000),
            entry(1, 0, 0x200),
            entry(2, 0, 0x400),
            entry(1, 0, 0x600),
            entry(2, 0, 0x800),
        ]
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Looks
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn look_reference_expands_inline() {
    let mut b = AstBuilder::new();
    let lc = b.color(3, 0x789);
    let look = b.look("accent", vec![lc]);
    let c0 = b.color(0, 0x111);
    let re = b.look_ref("accent");
    let plan = b.plan(vec![c0, re]);
    let prog = with_main(&mut b, vec![look, plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    assert_eq!(colors, vec![entry(0, 0, 0x111), entry(0, 3, 0x789)]);
}

#[test]
fn nested_look_references_expand() {
    let mut b = AstBuilder::new();
    let inner_c = b.color(1, 0x222);
    let inner = b.look("inner", vec![inner_c]);
    let re_inner = b.look_ref("inner");
    let outer = b.look("outer", vec![re_inner]);
    let re_outer = b.look_ref("outer");
    let plan = b.plan(vec![re_outer]);
    let prog = with_main(&mut b, vec![inner, outer, plan]);
    let (l, mut rep) = linked(&prog);
    let colors = get_colors(&prog, &l, &mut rep).unwrap();
    assert_eq!(colors, vec![entry(0, 1, 0x222)]);
}

#[test]
fn self_referencing_look_errors() {
    let mut b = AstBuilder::new();
    let re = b.look_ref("loop");
    let look = b.look("loop", vec![re]);
    let re2 = b.look_ref("loop");
    let plan = b.plan(vec![re2]);
    let prog = with_main(&mut b, vec![look, plan]);
    let (l, mut rep) = linked(&prog);
    let err = get_colors(&prog, &l, &mut rep).unwrap_err();
    assert!(format!("{err}").contains("Recursive look loop"));
}

// ══════════════════════════════════════════════════════════════════════════════
// Form
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn form_defaults_apply_without_declaration() {
    let mut b = AstBuilder::new();
    let prog = with_main(&mut b, vec![]);
    let (l, mut rep) = linked(&prog);
    let form = get_form(&prog, &l, DEFAULT_FORM, &mut rep).unwrap();
    assert_eq!(form, DEFAULT_FORM);
}

#[test]
fn form_declaration_overrides_defaults() {
    let mut b = AstBuilder::new();
    let w = b.num("320");
    let h = b.num("256");
    let lc = b.num("2");
    let ld = b.num("8");
    let form_decl = b.form(w, h, lc, ld);
    let prog = with_main(&mut b, vec![form_decl]);
    let (l, mut rep) = linked(&prog);
    let form = get_form(&prog, &l, DEFAULT_FORM, &mut rep).unwrap();
    assert_eq!(
        form,
        Form {
            width: 320,
            height: 256,
            layer_count: 2,
            layer_depth: 8,
        }
    );
}

#[test]
fn form_layer_bounds_are_checked() {
    let mut b = AstBuilder::new();
    let w = b.num("320");
    let h = b.num("256");
    let lc = b.num("0");
    let ld = b.num("8");
    let form_decl = b.form(w, h, lc, ld);
    let prog = with_main(&mut b, vec![form_decl]);
    let (l, mut rep) = linked(&prog);
    let err = get_form(&prog, &l, DEFAULT_FORM, &mut rep).unwrap_err();
    assert!(format!("{err}").contains("Layer count must be at least 1"));
}

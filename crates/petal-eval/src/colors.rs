//! Palette script generation and form resolution.
//!
//! A plan is a timed sequence of palette events. `color` sets a palette
//! entry, `wait` advances the clock, `fade` opens an interpolation window
//! whose targets are the colors set before the next wait/fade/end, and a
//! look reference inlines a named sequence (with a cycle guard).

use petal_link::Linked;
use petal_types::ast::*;
use petal_types::fixed::{number_to_int, Number};
use petal_types::result::TintColor;
use petal_types::{Reporter, Result, TranslateError};
use std::collections::BTreeMap;

/// Resolved canvas and layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Form {
    pub width: i32,
    pub height: i32,
    pub layer_count: i32,
    pub layer_depth: i32,
}

/// Evaluate the program's form declaration, if present, over the caller's
/// defaults.
pub fn get_form(
    program: &Program,
    linked: &Linked,
    defaults: Form,
    rep: &mut Reporter,
) -> Result<Form> {
    let Some(form) = program.form() else {
        return Ok(defaults);
    };
    let width = number_to_int(linked.eval_const(&form.width, rep)?) as i32;
    let height = number_to_int(linked.eval_const(&form.height, rep)?) as i32;
    let layer_count = number_to_int(linked.eval_const(&form.layers, rep)?) as i32;
    let layer_depth = number_to_int(linked.eval_const(&form.depth, rep)?) as i32;
    if layer_count < 1 {
        return Err(TranslateError::at(form.span, "Layer count must be at least 1"));
    }
    if layer_depth < 1 {
        return Err(TranslateError::at(form.span, "Layer depth must be at least 1"));
    }
    Ok(Form {
        width,
        height,
        layer_count,
        layer_depth,
    })
}

/// Generate the palette script from the program's plans.
pub fn get_colors(program: &Program, linked: &Linked, rep: &mut Reporter) -> Result<Vec<TintColor>> {
    let mut script = ColorScript {
        program,
        linked,
        time: 0,
        palette: BTreeMap::new(),
        fade: None,
        out: Vec::new(),
        expanding: Vec::new(),
    };
    for decl in &program.decls {
        if let Decl::Plan(plan) = decl {
            script.events(&plan.events, rep)?;
        }
    }
    script.resolve_fade()?;
    Ok(script.out)
}

/// A fade in progress: the palette as it was when the fade opened, and
/// the target colors deferred until the fade resolves.
#[derive(Debug)]
struct Fade {
    start: Number,
    duration: Number,
    snapshot: BTreeMap<u16, u16>,
    targets: BTreeMap<u16, u16>,
}

struct ColorScript<'a> {
    program: &'a Program,
    linked: &'a Linked,
    time: Number,
    /// Current palette image; also the last value emitted per index.
    palette: BTreeMap<u16, u16>,
    fade: Option<Fade>,
    out: Vec<TintColor>,
    /// Look names on the expansion stack (cycle guard).
    expanding: Vec<String>,
}

impl<'a> ColorScript<'a> {
    fn events(&mut self, events: &[Event], rep: &mut Reporter) -> Result<()> {
        for event in events {
            match event {
                Event::Color(color) => {
                    if let Some(fade) = &mut self.fade {
                        fade.targets.insert(color.index, color.rgb);
                    } else {
                        // A plain color always produces an entry, even if
                        // it repeats the current value.
                        self.palette.insert(color.index, color.rgb);
                        self.out.push(TintColor {
                            frame: number_to_int(self.time),
                            index: color.index as i16,
                            rgb: color.rgb,
                        });
                    }
                }
                Event::Wait(wait) => {
                    self.resolve_fade()?;
                    let d = self.linked.eval_const(&wait.duration, rep)?;
                    self.time = self.time.wrapping_add(d);
                }
                Event::Fade(fade) => {
                    self.resolve_fade()?;
                    let duration = self.linked.eval_const(&fade.duration, rep)?;
                    self.fade = Some(Fade {
                        start: self.time,
                        duration,
                        snapshot: self.palette.clone(),
                        targets: BTreeMap::new(),
                    });
                }
                Event::Ref(re) => {
                    if self.expanding.contains(&re.name.name) {
                        return Err(TranslateError::at(
                            re.name.span,
                            format!("Recursive look {}", re.name.name),
                        ));
                    }
                    let decl_index = self.linked.look_map[&re.name.name];
                    let look = match &self.program.decls[decl_index] {
                        Decl::Look(look) => look,
                        _ => unreachable!("look_map points at a non-look declaration"),
                    };
                    self.expanding.push(re.name.name.clone());
                    self.events(&look.events, rep)?;
                    self.expanding.pop();
                }
            }
        }
        Ok(())
    }

    /// Emit the interpolated entries of a pending fade.
    fn resolve_fade(&mut self) -> Result<()> {
        let Some(fade) = self.fade.take() else {
            return Ok(());
        };
        let frames = number_to_int(fade.duration) as i32;
        let start_frame = number_to_int(fade.start) as i32;
        if frames <= 0 {
            // Degenerate fade: targets apply instantly.
            for (&index, &rgb) in &fade.targets {
                self.emit_if_changed(start_frame as i16, index, rgb);
            }
            return Ok(());
        }
        for k in 1..=frames {
            let frame = (start_frame + k) as i16;
            for (&index, &target) in &fade.targets {
                let from = fade.snapshot.get(&index).copied().unwrap_or(0);
                let rgb = lerp_rgb(from, target, k, frames);
                self.emit_if_changed(frame, index, rgb);
            }
        }
        Ok(())
    }

    /// Record an interpolated palette update, skipping entries equal to
    /// the current palette image for that index.
    fn emit_if_changed(&mut self, frame: i16, index: u16, rgb: u16) {
        if self.palette.get(&index) == Some(&rgb) {
            return;
        }
        self.palette.insert(index, rgb);
        self.out.push(TintColor {
            frame,
            index: index as i16,
            rgb,
        });
    }
}

/// Weighted average of two 12-bit colors, channel by channel with
/// round-to-nearest, `k` of `n` steps toward `b`.
fn lerp_rgb(a: u16, b: u16, k: i32, n: i32) -> u16 {
    let mut out = 0u16;
    for shift in [8, 4, 0] {
        let ca = ((a >> shift) & 0xF) as i32;
        let cb = ((b >> shift) & 0xF) as i32;
        let c = (ca * (n - k) + cb * k + n / 2) / n;
        out |= (c as u16) << shift;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lerp_endpoints_are_exact() {
        assert_eq!(lerp_rgb(0x000, 0xF80, 4, 4), 0xF80);
        assert_eq!(lerp_rgb(0x123, 0x123, 2, 7), 0x123);
    }

    #[test]
    fn lerp_rounds_to_nearest() {
        // Halfway between 0 and 1 rounds up.
        assert_eq!(lerp_rgb(0x000, 0x001, 1, 2), 0x001);
        // One third of 3 is exactly 1.
        assert_eq!(lerp_rgb(0x000, 0x003, 1, 3), 0x001);
    }
}

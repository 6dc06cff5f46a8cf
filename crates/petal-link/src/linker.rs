//! The two-phase symbol linker.
//!
//! Declaration phase: registers globals, facts (evaluated in order),
//! looks, and procedures, and links the expressions of plans and the
//! form. Procedure phase: resolves every reference inside procedure
//! bodies, assigns local and wire indices, records `when`/`else` pop
//! counts, and interns literals into the constant pool. After linking,
//! the pool is sorted by unsigned value and indices are reassigned.

use crate::scope::{ScopeStack, VarKind, VarRef, GLOBAL_DIR, GLOBAL_X, GLOBAL_Y};
use petal_types::ast::*;
use petal_types::fixed::{self, Number, ONE};
use petal_types::{Reporter, Result, Span, TranslateError};
use std::collections::HashMap;

/// Capacity of the wire registry (conflict masks are 32-bit).
pub const MAX_WIRES: u32 = 32;

/// Everything the linker learned about a program.
#[derive(Debug, Default)]
pub struct Linked {
    /// Declaration indices of the procedures, in declaration order.
    pub procs: Vec<usize>,
    /// Resolved reference per `Var` expression node.
    pub var_ref: NodeMap<VarRef>,
    /// Parsed 16.16 value per `Number` expression node.
    pub literal_value: NodeMap<Number>,
    /// Locals to discard on leaving the then arm, per `when` node.
    pub when_pop: NodeMap<u32>,
    /// Locals to discard on leaving the else arm, per `when` node.
    pub else_pop: NodeMap<u32>,
    /// Wire registry index per `wire` statement node.
    pub wire_index: NodeMap<u32>,
    /// Fact values in declaration order.
    pub fact_values: Vec<Number>,
    /// Constant pool, sorted by unsigned value after linking.
    pub constants: Vec<Number>,
    /// Pool index per value.
    pub constant_index: HashMap<Number, usize>,
    /// Occurrence count per value.
    pub constant_count: HashMap<Number, u32>,
    /// Number of registered wires.
    pub wire_count: u32,
    /// Look declaration index per look name.
    pub look_map: HashMap<String, usize>,
}

impl Linked {
    /// Pool slot of a value the linker is guaranteed to have interned.
    pub fn constant_slot(&self, value: Number) -> Result<usize> {
        self.constant_index.get(&value).copied().ok_or_else(|| {
            TranslateError::General(format!(
                "Internal error: constant {:08X} not in pool",
                value as u32
            ))
        })
    }

    /// Evaluate a linked expression in constant context (facts, plan
    /// waits and fades, form parameters).
    pub fn eval_const(&self, expr: &Expr, rep: &mut Reporter) -> Result<Number> {
        const_eval(expr, &self.var_ref, &self.literal_value, &self.fact_values, rep)
    }
}

/// Link a program, annotating it and building the constant pool.
pub fn link(program: &Program, rep: &mut Reporter) -> Result<Linked> {
    let mut linker = Linker {
        program,
        rep,
        scopes: ScopeStack::new(),
        procedure_phase: false,
        current_local_index: 0,
        out: Linked::default(),
    };
    linker.run()?;
    Ok(linker.out)
}

struct Linker<'a> {
    program: &'a Program,
    rep: &'a mut Reporter,
    scopes: ScopeStack,
    procedure_phase: bool,
    current_local_index: u32,
    out: Linked,
}

impl<'a> Linker<'a> {
    fn run(&mut self) -> Result<()> {
        self.scopes.push();
        self.define_builtin("x", GLOBAL_X)?;
        self.define_builtin("y", GLOBAL_Y)?;
        self.define_builtin("dir", GLOBAL_DIR)?;

        // Facts: register all names first, then evaluate in order so a
        // fact may only depend on facts declared before it.
        let mut fact_index = 0u32;
        for decl in &self.program.decls {
            if let Decl::Fact(fact) = decl {
                self.scopes.define(
                    &fact.name,
                    VarRef {
                        kind: VarKind::Fact,
                        index: fact_index,
                    },
                )?;
                fact_index += 1;
            }
        }
        for decl in &self.program.decls {
            if let Decl::Fact(fact) = decl {
                self.link_expr(&fact.value)?;
                let value = const_eval(
                    &fact.value,
                    &self.out.var_ref,
                    &self.out.literal_value,
                    &self.out.fact_values,
                    self.rep,
                )?;
                self.out.fact_values.push(value);
            }
        }

        if let Some(form) = self.program.form() {
            self.link_expr(&form.width)?;
            self.link_expr(&form.height)?;
            self.link_expr(&form.layers)?;
            self.link_expr(&form.depth)?;
        }

        // Looks: register all names before linking event bodies so a
        // look may reference a look declared later.
        for (i, decl) in self.program.decls.iter().enumerate() {
            if let Decl::Look(look) = decl {
                if self.out.look_map.contains_key(&look.name.name) {
                    return Err(TranslateError::at(
                        look.name.span,
                        format!("Redefinition of look {}", look.name.name),
                    ));
                }
                self.out.look_map.insert(look.name.name.clone(), i);
            }
        }
        for decl in &self.program.decls {
            match decl {
                Decl::Look(look) => self.link_events(&look.events)?,
                Decl::Plan(plan) => self.link_events(&plan.events)?,
                _ => {}
            }
        }

        // Procedures.
        let mut proc_index = 0usize;
        for (i, proc) in self.program.procs() {
            self.out.procs.push(i);
            self.scopes.define(
                &proc.name,
                VarRef {
                    kind: VarKind::Procedure,
                    index: proc_index as u32,
                },
            )?;
            proc_index += 1;
            if proc_index > 256 {
                return Err(TranslateError::at(proc.name.span, "Too many procedures"));
            }
        }

        self.procedure_phase = true;
        // Boolean materialization in the code generator emits these
        // unconditionally.
        self.intern(0);
        self.intern(ONE);

        for idx in 0..self.out.procs.len() {
            let proc = self.program.proc(self.out.procs[idx]);
            self.scopes.push();
            self.current_local_index = 0;
            for param in &proc.params {
                let index = self.current_local_index;
                self.scopes.define(
                    param,
                    VarRef {
                        kind: VarKind::Local,
                        index,
                    },
                )?;
                self.current_local_index += 1;
            }
            self.link_stmts(&proc.body)?;
            self.scopes.pop();
        }

        self.scopes.pop();

        // Sort the pool by unsigned value and reassign indices.
        self.out.constants.sort_by_key(|&v| v as u32);
        self.out.constant_index.clear();
        for (i, &v) in self.out.constants.iter().enumerate() {
            self.out.constant_index.insert(v, i);
        }
        log::debug!(
            "linked {} procedures, {} constants, {} wires",
            self.out.procs.len(),
            self.out.constants.len(),
            self.out.wire_count
        );
        Ok(())
    }

    fn define_builtin(&mut self, name: &str, index: u32) -> Result<()> {
        let ident = Ident {
            name: name.into(),
            span: Span::none(),
        };
        self.scopes.define(
            &ident,
            VarRef {
                kind: VarKind::Global,
                index,
            },
        )
    }

    fn link_events(&mut self, events: &[Event]) -> Result<()> {
        for event in events {
            match event {
                Event::Wait(wait) => self.link_expr(&wait.duration)?,
                Event::Fade(fade) => self.link_expr(&fade.duration)?,
                Event::Ref(re) => {
                    if !self.out.look_map.contains_key(&re.name.name) {
                        return Err(TranslateError::at(
                            re.name.span,
                            format!("Undefined look {}", re.name.name),
                        ));
                    }
                }
                Event::Color(_) => {}
            }
        }
        Ok(())
    }

    fn link_stmts(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.link_stmt(stmt)?;
        }
        Ok(())
    }

    fn link_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Temp(temp) => {
                // Initializer links before the name exists, so a temp
                // cannot reference itself.
                self.link_expr(&temp.value)?;
                let index = self.current_local_index;
                self.scopes.define(
                    &temp.name,
                    VarRef {
                        kind: VarKind::Local,
                        index,
                    },
                )?;
                self.current_local_index += 1;
            }
            Stmt::Wire(wire) => {
                self.link_expr(&wire.value)?;
                let index = match self.scopes.root_wire(&wire.name.name) {
                    Some(var) => var.index,
                    None => {
                        if self.out.wire_count >= MAX_WIRES {
                            return Err(TranslateError::at(wire.name.span, "Too many wires"));
                        }
                        let index = self.out.wire_count;
                        self.scopes.define_root(
                            &wire.name,
                            VarRef {
                                kind: VarKind::Wire,
                                index,
                            },
                        )?;
                        self.out.wire_count += 1;
                        index
                    }
                };
                self.out.wire_index.insert(wire.id, index);
            }
            Stmt::When(when) => {
                self.link_expr(&when.cond)?;
                let entry = self.current_local_index;
                self.scopes.push();
                self.link_stmts(&when.then_body)?;
                self.out
                    .when_pop
                    .insert(when.id, self.current_local_index - entry);
                self.current_local_index = entry;
                self.scopes.pop();
                self.scopes.push();
                self.link_stmts(&when.else_body)?;
                self.out
                    .else_pop
                    .insert(when.id, self.current_local_index - entry);
                self.current_local_index = entry;
                self.scopes.pop();
            }
            Stmt::Fork(fork) => {
                self.link_expr(&fork.proc)?;
                for arg in &fork.args {
                    self.link_expr(arg)?;
                }
            }
            Stmt::Wait(s)
            | Stmt::Turn(s)
            | Stmt::Face(s)
            | Stmt::Size(s)
            | Stmt::Tint(s)
            | Stmt::Seed(s)
            | Stmt::Move(s) => self.link_expr(&s.value)?,
            Stmt::Jump(jump) => {
                self.link_expr(&jump.x)?;
                self.link_expr(&jump.y)?;
            }
            Stmt::Draw(_) | Stmt::Plot(_) => {}
            Stmt::Defy(defy) => self.rep.defy(defy.span.line),
        }
        Ok(())
    }

    fn link_expr(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Number(text) => {
                let value = self.parse_literal(text, expr.span)?;
                self.out.literal_value.insert(expr.id, value);
                if self.procedure_phase {
                    self.intern_counted(value);
                }
            }
            ExprKind::Var(name) => {
                let ident = Ident {
                    name: name.clone(),
                    span: expr.span,
                };
                let var = self.scopes.lookup(&ident)?;
                if !self.procedure_phase && var.kind != VarKind::Fact {
                    return Err(TranslateError::at(expr.span, "Variable outside procedure"));
                }
                self.out.var_ref.insert(expr.id, var);
                if self.procedure_phase && var.kind == VarKind::Fact {
                    // A fact reference compiles to a pool constant.
                    let value = self.out.fact_values[var.index as usize];
                    self.intern_counted(value);
                }
            }
            ExprKind::Binary { left, right, .. } => {
                self.link_expr(left)?;
                self.link_expr(right)?;
            }
            ExprKind::Neg(inner) | ExprKind::Sine(inner) => self.link_expr(inner)?,
            ExprKind::Rand => {}
            ExprKind::Cond {
                cond,
                then,
                otherwise,
            } => {
                self.link_expr(cond)?;
                self.link_expr(then)?;
                self.link_expr(otherwise)?;
            }
        }
        Ok(())
    }

    /// Parse a literal: `$`-prefixed hex is exact bits; decimal text is
    /// scaled to 16.16 with truncation and wraps to negative at 32768.
    fn parse_literal(&mut self, text: &str, span: Span) -> Result<Number> {
        if let Some(hex) = text.strip_prefix('$') {
            if hex.len() > 8 {
                return Err(TranslateError::at(span, "Hex number too large"));
            }
            return u32::from_str_radix(hex, 16)
                .map(|v| v as Number)
                .map_err(|_| TranslateError::at(span, "Number format error"));
        }
        let value: f64 = text
            .parse()
            .map_err(|_| TranslateError::at(span, "Number format error"))?;
        if value >= 65536.0 {
            return Err(TranslateError::at(span, "Number too large"));
        }
        if value >= 32768.0 {
            self.rep.warning(span, "Number overflows to negative");
        }
        Ok((value * 65536.0) as i64 as u32 as Number)
    }

    fn intern(&mut self, value: Number) {
        if !self.out.constant_index.contains_key(&value) {
            self.out.constant_index.insert(value, self.out.constants.len());
            self.out.constants.push(value);
        }
    }

    fn intern_counted(&mut self, value: Number) {
        self.intern(value);
        *self.out.constant_count.entry(value).or_insert(0) += 1;
    }
}

/// Evaluate an expression in constant context: facts, plan waits and
/// fades, and form parameters. Only facts may be referenced; randomness
/// has no seed to draw from at compile time.
fn const_eval(
    expr: &Expr,
    var_ref: &NodeMap<VarRef>,
    literal_value: &NodeMap<Number>,
    fact_values: &[Number],
    rep: &mut Reporter,
) -> Result<Number> {
    let eval = |e: &Expr, rep: &mut Reporter| const_eval(e, var_ref, literal_value, fact_values, rep);
    match &expr.kind {
        ExprKind::Number(_) => Ok(literal_value.expect(expr.id, "literal")),
        ExprKind::Var(name) => {
            let var = var_ref.expect(expr.id, "variable reference");
            match var.kind {
                VarKind::Fact => {
                    fact_values.get(var.index as usize).copied().ok_or_else(|| {
                        TranslateError::at(
                            expr.span,
                            format!("Fact {name} referenced before its definition"),
                        )
                    })
                }
                _ => Err(TranslateError::at(expr.span, "Variable outside procedure")),
            }
        }
        ExprKind::Binary { op, left, right } => {
            let a = eval(left, rep)?;
            let b = eval(right, rep)?;
            Ok(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => {
                    if fixed::overflows_8_8(a) {
                        rep.warning(expr.span, "Left operand overflows");
                    }
                    if fixed::overflows_8_8(b) {
                        rep.warning(expr.span, "Right operand overflows");
                    }
                    fixed::mul(a, b)
                }
                BinOp::Div => {
                    if fixed::overflows_8_8(b) {
                        rep.warning(expr.span, "Right operand overflows");
                    }
                    fixed::div(a, b)
                        .ok_or_else(|| TranslateError::at(expr.span, "Division by zero"))?
                }
                BinOp::Eq => bool_number(a == b),
                BinOp::Ne => bool_number(a != b),
                BinOp::Lt => bool_number(a < b),
                BinOp::Le => bool_number(a <= b),
                BinOp::Gt => bool_number(a > b),
                BinOp::Ge => bool_number(a >= b),
                BinOp::And => a & b,
                BinOp::Or => a | b,
            })
        }
        ExprKind::Neg(inner) => Ok(eval(inner, rep)?.wrapping_neg()),
        ExprKind::Sine(inner) => {
            let v = eval(inner, rep)?;
            Ok(fixed::sin_phase((v & 0xFFFF) >> 2) << 2)
        }
        ExprKind::Rand => Err(TranslateError::at(
            expr.span,
            "Random not allowed outside procedures",
        )),
        ExprKind::Cond {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, rep)? != 0 {
                eval(then, rep)
            } else {
                eval(otherwise, rep)
            }
        }
    }
}

fn bool_number(b: bool) -> Number {
    if b {
        ONE
    } else {
        0
    }
}

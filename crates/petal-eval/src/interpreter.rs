//! The turtle scheduler and statement/expression executor.
//!
//! Concurrency model: a single-threaded FIFO of run-to-completion
//! continuations. A `fork` only enqueues; the parent keeps running to the
//! end of its own body. `wait` never yields — it advances the turtle's
//! private clock and the per-frame survivor counters. A turtle whose
//! clock has reached the frame budget at dispatch is dropped, and the
//! overrun magnitude is tracked as a maximum.

use petal_link::{ConflictMatrix, Linked, VarKind, GLOBAL_DIR, GLOBAL_X, GLOBAL_Y};
use petal_types::ast::*;
use petal_types::fixed::{self, make_number, number_to_int, Number, ONE};
use petal_types::result::{Plot, Statistics};
use petal_types::{Reporter, Result, Span, TranslateError};
use std::collections::VecDeque;

/// A runtime value on a turtle's local stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Number(Number),
    /// A procedure index, usable as a fork target.
    Procedure(usize),
}

impl Value {
    fn number(self, span: Span, what: &str) -> Result<Number> {
        match self {
            Value::Number(n) => Ok(n),
            Value::Procedure(_) => {
                Err(TranslateError::at(span, format!("{what} is not a number")))
            }
        }
    }
}

/// One not-yet-run turtle continuation.
#[derive(Debug, Clone)]
pub struct Turtle {
    pub proc: usize,
    pub time: Number,
    pub x: Number,
    pub y: Number,
    pub size: Number,
    pub direction: Number,
    pub tint: Number,
    pub seed: Number,
    stack: Vec<Value>,
    /// Copy-on-fork snapshot of the wire register file.
    wires: Vec<Number>,
    /// Which wires have ever been written on this turtle's ancestry.
    wires_written: u32,
    /// Per wire: the other wires written since this one was last written.
    written_since: Vec<u32>,
}

impl Turtle {
    fn initial(proc: usize, wire_count: usize) -> Self {
        Self {
            proc,
            time: 0,
            x: 0,
            y: 0,
            size: make_number(2),
            direction: 0,
            tint: ONE,
            seed: 0xBABEFEEDu32 as Number,
            stack: Vec::new(),
            wires: vec![0; wire_count],
            wires_written: 0,
            written_since: vec![0; wire_count],
        }
    }

    /// A child takes the parent's environment and fresh argument values.
    fn child(proc: usize, parent: &Turtle, stack: Vec<Value>) -> Self {
        Self {
            proc,
            time: parent.time,
            x: parent.x,
            y: parent.y,
            size: parent.size,
            direction: parent.direction,
            tint: parent.tint,
            seed: parent.seed,
            stack,
            wires: parent.wires.clone(),
            wires_written: parent.wires_written,
            written_since: parent.written_since.clone(),
        }
    }
}

/// What a simulation run produced.
#[derive(Debug)]
pub struct InterpretOutput {
    pub plots: Vec<Plot>,
    /// Symmetrized wire conflict graph, ready for slot allocation.
    pub conflicts: ConflictMatrix,
}

/// Run the program from the given entry procedure index, filling in the
/// statistics block as frames are simulated.
pub fn interpret(
    program: &Program,
    linked: &Linked,
    entry: usize,
    stats: &mut Statistics,
    rep: &mut Reporter,
) -> Result<InterpretOutput> {
    let mut interp = Interpreter {
        program,
        linked,
        rep,
        stats,
        pending: VecDeque::new(),
        turtle: Turtle::initial(entry, linked.wire_count as usize),
        output: Vec::new(),
        conflicts: ConflictMatrix::new(linked.wire_count as usize),
        forked_in_frame: false,
    };
    interp.run(entry)?;
    let mut conflicts = interp.conflicts;
    conflicts.symmetrize();
    log::debug!(
        "interpreted {} plots, {} turtles born",
        interp.output.len(),
        interp.stats.turtles_born
    );
    Ok(InterpretOutput {
        plots: interp.output,
        conflicts,
    })
}

struct Interpreter<'a> {
    program: &'a Program,
    linked: &'a Linked,
    rep: &'a mut Reporter,
    stats: &'a mut Statistics,
    pending: VecDeque<Turtle>,
    turtle: Turtle,
    output: Vec<Plot>,
    conflicts: ConflictMatrix,
    forked_in_frame: bool,
}

impl<'a> Interpreter<'a> {
    fn run(&mut self, entry: usize) -> Result<()> {
        self.pending
            .push_back(Turtle::initial(entry, self.linked.wire_count as usize));

        while let Some(turtle) = self.pending.pop_front() {
            self.turtle = turtle;
            let f = number_to_int(self.turtle.time) as i32;
            if f >= 0 && (f as usize) < self.stats.frames {
                self.cpu(140);
                self.forked_in_frame = false;
                let proc = self.program.proc(self.linked.procs[self.turtle.proc]);
                self.exec_stmts(&proc.body)?;
                if !self.forked_in_frame {
                    self.stats.frame[f as usize].turtles_died += 1;
                    self.cpu(40);
                }
            } else {
                let overwait = f - self.stats.frames as i32;
                if overwait > self.stats.max_overwait {
                    self.stats.max_overwait = overwait;
                }
            }
        }
        Ok(())
    }

    /// Charge cycles to the frame the turtle's clock is currently in.
    fn cpu(&mut self, cycles: i32) {
        self.stats
            .compute(number_to_int(self.turtle.time) as i32, cycles);
    }

    // ══════════════════════════════════════════════════════════════════════
    // Expressions
    // ══════════════════════════════════════════════════════════════════════

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Number(_) => {
                self.cpu(12 + 16);
                Ok(Value::Number(
                    self.linked.literal_value.expect(expr.id, "literal"),
                ))
            }
            ExprKind::Var(name) => self.eval_var(expr, name),
            ExprKind::Binary { op, left, right } => self.eval_binary(expr, *op, left, right),
            ExprKind::Neg(inner) => {
                let v = self
                    .eval_expr(inner)?
                    .number(expr.span, "Operand of negation")?;
                self.cpu(4);
                Ok(Value::Number(v.wrapping_neg()))
            }
            ExprKind::Sine(inner) => {
                let v = self.eval_expr(inner)?.number(expr.span, "Operand of sine")?;
                self.cpu(42);
                Ok(Value::Number(fixed::sin_phase((v & 0xFFFF) >> 2) << 2))
            }
            ExprKind::Rand => {
                self.turtle.seed = fixed::random_iteration(self.turtle.seed);
                self.cpu(12 + 144);
                Ok(Value::Number((self.turtle.seed >> 16) & 0xFFFF))
            }
            ExprKind::Cond {
                cond,
                then,
                otherwise,
            } => {
                let c = self.eval_expr(cond)?.number(expr.span, "Condition")?;
                if c != 0 {
                    let v = self.eval_expr(then)?;
                    self.cpu(12 + 10);
                    Ok(v)
                } else {
                    let v = self.eval_expr(otherwise)?;
                    self.cpu(10);
                    Ok(v)
                }
            }
        }
    }

    fn eval_var(&mut self, expr: &Expr, name: &str) -> Result<Value> {
        let var = self.linked.var_ref.expect(expr.id, "variable reference");
        self.cpu(12 + 16);
        match var.kind {
            VarKind::Global => Ok(Value::Number(match var.index {
                GLOBAL_X => self.turtle.x,
                GLOBAL_Y => self.turtle.y,
                GLOBAL_DIR => self.turtle.direction,
                _ => unreachable!("unknown global index"),
            })),
            VarKind::Local => {
                let index = var.index as usize;
                if self.turtle.stack.len() <= index {
                    return Err(TranslateError::at(
                        expr.span,
                        "Internal error: Local index out of range",
                    ));
                }
                Ok(self.turtle.stack[index])
            }
            VarKind::Wire => {
                let index = var.index as usize;
                if self.turtle.wires_written & (1 << index) == 0 {
                    return Err(TranslateError::at(
                        expr.span,
                        format!("Wire {name} read before any write"),
                    ));
                }
                self.conflicts
                    .record(index, self.turtle.written_since[index]);
                Ok(Value::Number(self.turtle.wires[index]))
            }
            VarKind::Fact => Ok(Value::Number(self.linked.fact_values[var.index as usize])),
            VarKind::Procedure => Ok(Value::Procedure(var.index as usize)),
        }
    }

    fn eval_binary(&mut self, expr: &Expr, op: BinOp, left: &Expr, right: &Expr) -> Result<Value> {
        let a = self
            .eval_expr(left)?
            .number(expr.span, "Left side of operation")?;
        let b = self
            .eval_expr(right)?
            .number(expr.span, "Right side of operation")?;
        self.cpu(20);
        let result = match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => {
                self.cpu(126 - 20);
                if fixed::overflows_8_8(a) {
                    self.rep.warning(expr.span, "Left operand overflows");
                }
                if fixed::overflows_8_8(b) {
                    self.rep.warning(expr.span, "Right operand overflows");
                }
                fixed::mul(a, b)
            }
            BinOp::Div => {
                self.cpu(218 - 20);
                if fixed::overflows_8_8(b) {
                    self.rep.warning(expr.span, "Right operand overflows");
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
        };
        Ok(Value::Number(result))
    }

    // ══════════════════════════════════════════════════════════════════════
    // Statements
    // ══════════════════════════════════════════════════════════════════════

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Temp(temp) => {
                let value = self.eval_expr(&temp.value)?;
                self.turtle.stack.push(value);
            }
            Stmt::Wire(wire) => {
                let value = self
                    .eval_expr(&wire.value)?
                    .number(wire.span, "Wire value")?;
                let index = self.linked.wire_index.expect(wire.id, "wire index") as usize;
                self.turtle.wires[index] = value;
                self.turtle.wires_written |= 1 << index;
                self.turtle.written_since[index] = 0;
                for (j, since) in self.turtle.written_since.iter_mut().enumerate() {
                    if j != index {
                        *since |= 1 << index;
                    }
                }
                self.cpu(16);
            }
            Stmt::When(when) => {
                let cond = self.eval_expr(&when.cond)?.number(when.span, "Condition")?;
                if cond != 0 {
                    self.exec_stmts(&when.then_body)?;
                    let pop = self.linked.when_pop.expect(when.id, "when pop count");
                    self.turtle
                        .stack
                        .truncate(self.turtle.stack.len() - pop as usize);
                    self.cpu(12 + 10);
                    if pop != 0 {
                        self.cpu(8);
                    }
                } else {
                    self.exec_stmts(&when.else_body)?;
                    let pop = self.linked.else_pop.expect(when.id, "else pop count");
                    self.turtle
                        .stack
                        .truncate(self.turtle.stack.len() - pop as usize);
                    self.cpu(10);
                    if pop != 0 {
                        self.cpu(8);
                    }
                }
            }
            Stmt::Fork(fork) => self.exec_fork(fork)?,
            Stmt::Wait(s) => self.exec_wait(s)?,
            Stmt::Turn(s) => {
                let v = self.eval_expr(&s.value)?.number(s.span, "Turn value")?;
                self.turtle.direction = self.turtle.direction.wrapping_add(v);
                self.cpu(12 + 16 + 20 + 16);
            }
            Stmt::Face(s) => {
                let v = self.eval_expr(&s.value)?.number(s.span, "Face value")?;
                self.turtle.direction = v;
                self.cpu(16);
            }
            Stmt::Size(s) => {
                let v = self.eval_expr(&s.value)?.number(s.span, "Size")?;
                self.turtle.size = v;
                self.cpu(16);
            }
            Stmt::Tint(s) => {
                let v = self.eval_expr(&s.value)?.number(s.span, "Tint")?;
                self.turtle.tint = v;
                self.cpu(16);
                let tint = number_to_int(v) as i32;
                if tint < 0 {
                    self.rep.warning(s.span, "Negative tint");
                } else if tint >= self.stats.layer_count * self.stats.layer_depth {
                    self.rep.warning(s.span, "Tint value outside range");
                }
            }
            Stmt::Seed(s) => {
                let v = self.eval_expr(&s.value)?.number(s.span, "Seed")?;
                self.turtle.seed = fixed::random_iteration(fixed::random_iteration(v));
                self.cpu(204);
            }
            Stmt::Move(s) => self.exec_move(s)?,
            Stmt::Jump(jump) => {
                let x = self.eval_expr(&jump.x)?.number(jump.span, "X")?;
                let y = self.eval_expr(&jump.y)?.number(jump.span, "Y")?;
                self.turtle.x = x;
                self.turtle.y = y;
                self.cpu(32);
            }
            Stmt::Draw(_) => self.draw(number_to_int(self.turtle.tint)),
            Stmt::Plot(_) => self.draw(!number_to_int(self.turtle.tint)),
            Stmt::Defy(_) => {}
        }
        Ok(())
    }

    fn exec_fork(&mut self, fork: &ForkStmt) -> Result<()> {
        let target = match self.eval_expr(&fork.proc)? {
            Value::Procedure(p) => p,
            Value::Number(_) => {
                return Err(TranslateError::at(fork.span, "Target is not a procedure"));
            }
        };
        let proc = self.program.proc(self.linked.procs[target]);
        let n_args = fork.args.len();
        let n_params = proc.params.len();
        if n_args != n_params {
            return Err(TranslateError::at(
                fork.span,
                format!(
                    "Wrong number of arguments for procedure {}: {} given, {} expected",
                    proc.name.name, n_args, n_params
                ),
            ));
        }
        let mut args = Vec::with_capacity(n_args);
        for arg in &fork.args {
            args.push(self.eval_expr(arg)?);
        }
        self.pending
            .push_back(Turtle::child(target, &self.turtle, args));
        self.stats.turtles_born += 1;
        self.forked_in_frame = true;
        if target == self.turtle.proc {
            // Assume tail fork; the dispatch overhead is never paid.
            self.cpu(20 + n_args as i32 * 28 - 140);
        } else {
            self.cpu(344 + n_args as i32 * 34);
        }
        Ok(())
    }

    fn exec_wait(&mut self, s: &ExprStmt) -> Result<()> {
        let wait = self.eval_expr(&s.value)?.number(s.span, "Wait value")?;
        if wait < 0 {
            self.rep.warning(s.span, "Negative wait");
            return Ok(());
        }
        let mut frame = number_to_int(self.turtle.time) as i32;
        let new_frame = number_to_int(self.turtle.time.wrapping_add(wait)) as i32;
        while (frame as usize) < self.stats.frames && frame < new_frame {
            if frame >= 0 {
                self.stats.frame[frame as usize].turtles_survived += 1;
            }
            frame += 1;
            self.forked_in_frame = false;
        }
        self.turtle.time = self.turtle.time.wrapping_add(wait);
        self.cpu(146);
        Ok(())
    }

    fn exec_move(&mut self, s: &ExprStmt) -> Result<()> {
        let m = self.eval_expr(&s.value)?.number(s.span, "Move distance")?;
        let sa = fixed::sin_phase(self.turtle.direction >> 10);
        let ca = fixed::sin_phase((self.turtle.direction >> 10).wrapping_add(4096));
        if m < make_number(32) {
            // High precision path: sub-pixel scaling for short moves.
            self.turtle.x = self
                .turtle
                .x
                .wrapping_add(((m << 10 >> 16).wrapping_mul(ca)) >> 8);
            self.turtle.y = self
                .turtle
                .y
                .wrapping_add(((m << 10 >> 16).wrapping_mul(sa)) >> 8);
            self.cpu(402);
        } else {
            // High distance path: coarser scaling, fewer cycles.
            self.turtle.x = self.turtle.x.wrapping_add((m << 2 >> 16).wrapping_mul(ca));
            self.turtle.y = self.turtle.y.wrapping_add((m << 2 >> 16).wrapping_mul(sa));
            self.cpu(346);
        }
        Ok(())
    }

    fn draw(&mut self, tint: i16) {
        let f = number_to_int(self.turtle.time);
        if f >= 0 && (f as usize) < self.stats.frames {
            let x = number_to_int(self.turtle.x);
            let y = number_to_int(self.turtle.y);
            let size = number_to_int(self.turtle.size);
            self.output.push(Plot {
                frame: f,
                x,
                y,
                size,
                tint,
            });
            self.stats.draw(f, x, y, size);
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

//! The bytecode emitter.
//!
//! Emission tracks a simulated operand-stack height against each opcode's
//! known effect. `when` saves the height, `else` swaps it back in, and
//! `done` verifies the two branch heights agree — a tail call parks the
//! height on a sentinel that short-circuits the check. Any unexplained
//! mismatch is an internal compiler error, not a language diagnostic.

use crate::op::*;
use crate::wires::WireSlots;
use petal_link::{Linked, VarKind, GLOBAL_DIR, GLOBAL_X, GLOBAL_Y};
use petal_types::ast::*;
use petal_types::fixed::{Number, ONE};
use petal_types::result::Statistics;
use petal_types::{Result, TranslateError};

/// Code generation switches.
#[derive(Debug, Clone, Copy)]
pub struct CodegenOptions {
    /// Rewrite tail-position self-perpetuating forks into in-place
    /// dispatches. Disable to force ordinary forks (for A/B comparison).
    pub tail_calls: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self { tail_calls: true }
    }
}

/// The emitted program.
#[derive(Debug, Clone)]
pub struct Generated {
    /// Opcode stream, terminated by the end-of-script marker.
    pub bytecode: Vec<Bytecode>,
    /// Constant table in pool order.
    pub constants: Vec<Number>,
}

/// How an expression's value is consumed, passed down during emission.
///
/// Comparisons feeding a conditional hand their condition nibble to the
/// enclosing `WHEN`; anywhere else they materialize an explicit 1.0/0.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprContext {
    Value,
    Condition,
}

/// Emit bytecode for every procedure of the program.
pub fn generate(
    program: &Program,
    linked: &Linked,
    wires: &WireSlots,
    stats: &mut Statistics,
    options: CodegenOptions,
) -> Result<Generated> {
    let mut gen = CodeGenerator {
        program,
        linked,
        wires,
        stats,
        options,
        out: Vec::new(),
        stack_height: 0,
        saved_stack_height: Vec::new(),
        tail_fork: NodeMap::new(),
    };
    for idx in 0..linked.procs.len() {
        gen.proc(program.proc(linked.procs[idx]))?;
    }
    gen.out.push(END_OF_SCRIPT);
    log::debug!("generated {} bytecode bytes", gen.out.len());
    Ok(Generated {
        bytecode: gen.out,
        constants: linked.constants.clone(),
    })
}

struct CodeGenerator<'a> {
    program: &'a Program,
    linked: &'a Linked,
    wires: &'a WireSlots,
    stats: &'a mut Statistics,
    options: CodegenOptions,
    out: Vec<Bytecode>,
    stack_height: i32,
    saved_stack_height: Vec<i32>,
    tail_fork: NodeMap<bool>,
}

impl<'a> CodeGenerator<'a> {
    fn proc(&mut self, proc: &ProcDecl) -> Result<()> {
        if let Some(last) = proc.body.last() {
            self.mark_tail(last);
        }
        self.stack_height = proc.params.len() as i32;
        self.stmts(&proc.body)?;
        self.emit(BC_END)
    }

    /// Mark fork statements in tail position, recursing through the last
    /// statement of `when`/`else` arms.
    fn mark_tail(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Fork(fork) => self.tail_fork.insert(fork.id, true),
            Stmt::When(when) => {
                if let Some(last) = when.then_body.last() {
                    self.mark_tail(last);
                }
                if let Some(last) = when.else_body.last() {
                    self.mark_tail(last);
                }
            }
            _ => {}
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Emission with stack verification
    // ══════════════════════════════════════════════════════════════════════

    fn emit(&mut self, code: Bytecode) -> Result<()> {
        self.out.push(code);
        if self.stack_height == STACK_AFTER_TAIL
            && code != BC_ELSE
            && code != BC_DONE
            && code != BC_END
        {
            return Err(TranslateError::General("Instruction after tail call".into()));
        }
        self.stack_height += stack_change(code);
        if code & 0xF0 == 0x10 {
            // WHEN
            self.saved_stack_height.push(self.stack_height);
        } else if code == BC_ELSE {
            let saved = self
                .saved_stack_height
                .last_mut()
                .expect("ELSE outside WHEN");
            std::mem::swap(&mut self.stack_height, saved);
        } else if code == BC_DONE {
            let when_height = self.saved_stack_height.pop().expect("DONE outside WHEN");
            if when_height == STACK_AFTER_TAIL || self.stack_height == STACK_AFTER_TAIL {
                self.stack_height = when_height.min(self.stack_height);
            } else if when_height != self.stack_height {
                return Err(TranslateError::General(format!(
                    "Mismatching stack heights: {} vs {}",
                    when_height, self.stack_height
                )));
            }
        } else if code == BC_TAIL {
            self.stack_height = STACK_AFTER_TAIL;
        }
        if self.stack_height != STACK_AFTER_TAIL && self.stack_height > self.stats.max_stack_height
        {
            self.stats.max_stack_height = self.stack_height;
        }
        Ok(())
    }

    fn pop(&mut self, count: u32) -> Result<()> {
        for _ in 0..count {
            self.emit(BC_POP)?;
        }
        Ok(())
    }

    fn emit_constant(&mut self, value: Number) -> Result<()> {
        let index = self.linked.constant_slot(value)?;
        let code = bc_const(index as u32)?;
        self.emit(code)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Expressions
    // ══════════════════════════════════════════════════════════════════════

    /// Emit an expression; returns the condition nibble the enclosing
    /// `WHEN` should branch on (`CMP_NE` unless a comparison supplied it).
    fn expr(&mut self, expr: &Expr, ctx: ExprContext) -> Result<u8> {
        match &expr.kind {
            ExprKind::Number(_) => {
                let value = self.linked.literal_value.expect(expr.id, "literal");
                self.emit_constant(value)?;
                Ok(CMP_NE)
            }
            ExprKind::Var(_) => {
                self.var(expr)?;
                Ok(CMP_NE)
            }
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right, ctx),
            ExprKind::Neg(inner) => {
                self.expr(inner, ExprContext::Value)?;
                self.emit(BC_NEG)?;
                Ok(CMP_NE)
            }
            ExprKind::Sine(inner) => {
                self.expr(inner, ExprContext::Value)?;
                self.emit(BC_SINE)?;
                Ok(CMP_NE)
            }
            ExprKind::Rand => {
                self.emit(BC_RAND)?;
                Ok(CMP_NE)
            }
            ExprKind::Cond {
                cond,
                then,
                otherwise,
            } => {
                let cc = self.expr(cond, ExprContext::Condition)?;
                let when = bc_when(cc)?;
                self.emit(when)?;
                self.expr(then, ExprContext::Value)?;
                self.emit(BC_ELSE)?;
                self.expr(otherwise, ExprContext::Value)?;
                self.emit(BC_DONE)?;
                Ok(CMP_NE)
            }
        }
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr, ctx: ExprContext) -> Result<u8> {
        self.expr(right, ExprContext::Value)?;
        self.expr(left, ExprContext::Value)?;
        let (code, cc) = match op {
            BinOp::Add => (bc_op(OP_ADD)?, CMP_NE),
            BinOp::Sub => (bc_op(OP_SUB)?, CMP_NE),
            BinOp::Mul => (BC_MUL, CMP_NE),
            BinOp::Div => (BC_DIV, CMP_NE),
            BinOp::Eq => (bc_op(OP_CMP)?, CMP_EQ),
            BinOp::Ne => (bc_op(OP_CMP)?, CMP_NE),
            BinOp::Lt => (bc_op(OP_CMP)?, CMP_LT),
            BinOp::Le => (bc_op(OP_CMP)?, CMP_LE),
            BinOp::Gt => (bc_op(OP_CMP)?, CMP_GT),
            BinOp::Ge => (bc_op(OP_CMP)?, CMP_GE),
            BinOp::And => (bc_op(OP_AND)?, CMP_NE),
            BinOp::Or => (bc_op(OP_OR)?, CMP_NE),
        };
        self.emit(code)?;
        if op.is_comparison() && ctx == ExprContext::Value {
            // Not consumed by a conditional: materialize a truth value.
            let when = bc_when(cc)?;
            self.emit(when)?;
            self.emit_constant(ONE)?;
            self.emit(BC_ELSE)?;
            self.emit_constant(0)?;
            self.emit(BC_DONE)?;
            return Ok(CMP_NE);
        }
        Ok(cc)
    }

    fn var(&mut self, expr: &Expr) -> Result<()> {
        let var = self.linked.var_ref.expect(expr.id, "variable reference");
        match var.kind {
            VarKind::Global => {
                let st = match var.index {
                    GLOBAL_X => ST_X,
                    GLOBAL_Y => ST_Y,
                    GLOBAL_DIR => ST_DIR,
                    _ => unreachable!("unknown global index"),
                };
                let code = bc_rstate(st as u32)?;
                self.emit(code)
            }
            VarKind::Local => {
                let code = bc_rlocal(var.index)?;
                self.emit(code)
            }
            VarKind::Wire => {
                let slot = self.wires.slot[var.index as usize];
                let code = bc_rstate(ST_WIRE0 as u32 + slot as u32)?;
                self.emit(code)
            }
            VarKind::Fact => {
                let value = self.linked.fact_values[var.index as usize];
                self.emit_constant(value)
            }
            VarKind::Procedure => {
                self.emit(BC_PROC)?;
                // The procedure index rides as a raw operand byte.
                self.out.push(var.index as u8);
                Ok(())
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Statements
    // ══════════════════════════════════════════════════════════════════════

    fn stmts(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Temp(temp) => {
                // The value stays on the stack as the new local.
                self.expr(&temp.value, ExprContext::Value)?;
                Ok(())
            }
            Stmt::Wire(wire) => {
                let index = self.linked.wire_index.expect(wire.id, "wire index");
                self.expr(&wire.value, ExprContext::Value)?;
                let slot = self.wires.slot[index as usize];
                let code = bc_wstate(ST_WIRE0 as u32 + slot as u32)?;
                self.emit(code)
            }
            Stmt::When(when) => self.when(when),
            Stmt::Fork(fork) => {
                if self.options.tail_calls && self.tail_call(fork)? {
                    return Ok(());
                }
                for arg in &fork.args {
                    self.expr(arg, ExprContext::Value)?;
                }
                self.expr(&fork.proc, ExprContext::Value)?;
                let code = bc_fork(fork.args.len() as u32)?;
                self.emit(code)
            }
            Stmt::Wait(s) => self.unary_stmt(&s.value, BC_WAIT),
            Stmt::Turn(s) => {
                self.expr(&s.value, ExprContext::Value)?;
                let read = bc_rstate(ST_DIR as u32)?;
                self.emit(read)?;
                let add = bc_op(OP_ADD)?;
                self.emit(add)?;
                let write = bc_wstate(ST_DIR as u32)?;
                self.emit(write)
            }
            Stmt::Face(s) => self.write_state(&s.value, ST_DIR),
            Stmt::Size(s) => self.write_state(&s.value, ST_SIZE),
            Stmt::Tint(s) => self.write_state(&s.value, ST_TINT),
            Stmt::Seed(s) => self.unary_stmt(&s.value, BC_SEED),
            Stmt::Move(s) => self.unary_stmt(&s.value, BC_MOVE),
            Stmt::Jump(jump) => self.jump(jump),
            Stmt::Draw(_) => self.emit(BC_DRAW),
            Stmt::Plot(_) => self.emit(BC_PLOT),
            Stmt::Defy(_) => Ok(()),
        }
    }

    fn unary_stmt(&mut self, value: &Expr, code: Bytecode) -> Result<()> {
        self.expr(value, ExprContext::Value)?;
        self.emit(code)
    }

    fn write_state(&mut self, value: &Expr, st: u8) -> Result<()> {
        self.expr(value, ExprContext::Value)?;
        let code = bc_wstate(st as u32)?;
        self.emit(code)
    }

    fn when(&mut self, when: &WhenStmt) -> Result<()> {
        let cc = self.expr(&when.cond, ExprContext::Condition)?;
        let code = bc_when(cc)?;
        self.emit(code)?;
        self.stmts(&when.then_body)?;
        if self.stack_height != STACK_AFTER_TAIL {
            self.pop(self.linked.when_pop.expect(when.id, "when pop count"))?;
        }
        if !when.else_body.is_empty() {
            self.emit(BC_ELSE)?;
            self.stmts(&when.else_body)?;
            if self.stack_height != STACK_AFTER_TAIL {
                self.pop(self.linked.else_pop.expect(when.id, "else pop count"))?;
            }
        }
        self.emit(BC_DONE)
    }

    fn jump(&mut self, jump: &JumpStmt) -> Result<()> {
        let same_x = self.is_global(&jump.x, GLOBAL_X);
        let same_y = self.is_global(&jump.y, GLOBAL_Y);
        if !same_y {
            self.expr(&jump.y, ExprContext::Value)?;
        }
        if !same_x {
            self.expr(&jump.x, ExprContext::Value)?;
            let code = bc_wstate(ST_X as u32)?;
            self.emit(code)?;
        }
        if !same_y {
            let code = bc_wstate(ST_Y as u32)?;
            self.emit(code)?;
        }
        Ok(())
    }

    fn is_global(&self, expr: &Expr, index: u32) -> bool {
        if let ExprKind::Var(_) = &expr.kind {
            if let Some(var) = self.linked.var_ref.get(expr.id) {
                return var.kind == VarKind::Global && var.index == index;
            }
        }
        false
    }

    /// Rewrite a marked tail fork in place of spawning a continuation:
    /// write the new argument values into the current turtle's local
    /// slots, switch the procedure register, drop the rest of the stack,
    /// and dispatch without returning.
    fn tail_call(&mut self, fork: &ForkStmt) -> Result<bool> {
        if !self.tail_fork.get(fork.id).copied().unwrap_or(false) {
            return Ok(false);
        }
        let n_args = fork.args.len() as i32;
        if n_args > self.stack_height {
            // Not enough stack below to hold the arguments in place.
            return Ok(false);
        }

        // An argument that is already the local at its own position needs
        // no write.
        let mut writes: Vec<(u32, &Expr)> = Vec::new();
        for (position, arg) in fork.args.iter().enumerate() {
            let identity = matches!(&arg.kind, ExprKind::Var(_))
                && self.linked.var_ref.get(arg.id).is_some_and(|var| {
                    var.kind == VarKind::Local && var.index == position as u32
                });
            if !identity {
                writes.push((position as u32, arg));
            }
        }

        self.expr(&fork.proc, ExprContext::Value)?;
        for (_, arg) in &writes {
            self.expr(arg, ExprContext::Value)?;
        }
        for (position, _) in writes.iter().rev() {
            let code = bc_wlocal(*position)?;
            self.emit(code)?;
        }
        let code = bc_wstate(ST_PROC as u32)?;
        self.emit(code)?;
        self.pop((self.stack_height - n_args) as u32)?;
        self.emit(BC_TAIL)?;
        Ok(true)
    }
}

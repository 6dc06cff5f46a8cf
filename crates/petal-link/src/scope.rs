//! Lexically scoped name resolution.
//!
//! A [`ScopeStack`] is a vector of frames pushed and popped in LIFO order
//! by the linker: one for the program, one per procedure, and one per
//! `when`/`else` arm so locals declared inside one arm stay invisible to
//! the other.

use petal_types::ast::Ident;
use petal_types::{Result, TranslateError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a resolved name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    /// A built-in turtle state register (`x`, `y`, `dir`).
    Global,
    /// A turtle-local stack slot (parameter or `temp`).
    Local,
    /// A persistent cross-turtle register.
    Wire,
    /// A compile-time constant.
    Fact,
    /// A procedure, usable as a fork target.
    Procedure,
}

/// Index values for [`VarKind::Global`].
pub const GLOBAL_X: u32 = 0;
pub const GLOBAL_Y: u32 = 1;
pub const GLOBAL_DIR: u32 = 2;

/// A resolved variable reference: kind plus a kind-relative index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarRef {
    pub kind: VarKind,
    pub index: u32,
}

/// A stack of scope frames owned by the linker.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<HashMap<String, VarRef>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        debug_assert!(!self.frames.is_empty(), "scope stack underflow");
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Define a name in the innermost frame. Redefinition within the same
    /// frame is a compile error.
    pub fn define(&mut self, ident: &Ident, var: VarRef) -> Result<()> {
        let frame = self.frames.last_mut().expect("no scope frame");
        if frame.contains_key(&ident.name) {
            return Err(TranslateError::at(
                ident.span,
                format!("Redefinition of {}", ident.name),
            ));
        }
        frame.insert(ident.name.clone(), var);
        Ok(())
    }

    /// Define a name in the outermost (program) frame, regardless of the
    /// current nesting. Used for wires, which are global by first write.
    pub fn define_root(&mut self, ident: &Ident, var: VarRef) -> Result<()> {
        let frame = self.frames.first_mut().expect("no scope frame");
        if frame.contains_key(&ident.name) {
            return Err(TranslateError::at(
                ident.span,
                format!("Redefinition of {}", ident.name),
            ));
        }
        frame.insert(ident.name.clone(), var);
        Ok(())
    }

    /// Look a name up, walking outward through the frames.
    pub fn lookup(&self, ident: &Ident) -> Result<VarRef> {
        for frame in self.frames.iter().rev() {
            if let Some(var) = frame.get(&ident.name) {
                return Ok(*var);
            }
        }
        Err(TranslateError::at(
            ident.span,
            format!("Undefined variable {}", ident.name),
        ))
    }

    /// A wire registered in the program frame under this name, if any.
    pub fn root_wire(&self, name: &str) -> Option<VarRef> {
        let frame = self.frames.first()?;
        frame.get(name).filter(|v| v.kind == VarKind::Wire).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petal_types::Span;

    fn ident(name: &str) -> Ident {
        Ident {
            name: name.into(),
            span: Span::new(1, 1),
        }
    }

    fn local(index: u32) -> VarRef {
        VarRef {
            kind: VarKind::Local,
            index,
        }
    }

    #[test]
    fn lookup_walks_outward() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        scopes.define(&ident("a"), local(0)).unwrap();
        scopes.push();
        scopes.define(&ident("b"), local(1)).unwrap();
        assert_eq!(scopes.lookup(&ident("a")).unwrap().index, 0);
        assert_eq!(scopes.lookup(&ident("b")).unwrap().index, 1);
        scopes.pop();
        assert!(scopes.lookup(&ident("b")).is_err());
    }

    #[test]
    fn redefinition_in_same_frame_errors() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        scopes.define(&ident("a"), local(0)).unwrap();
        let err = scopes.define(&ident("a"), local(1)).unwrap_err();
        assert!(format!("{err}").contains("Redefinition of a"));
    }

    #[test]
    fn inner_frame_may_shadow() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        scopes.define(&ident("a"), local(0)).unwrap();
        scopes.push();
        scopes.define(&ident("a"), local(5)).unwrap();
        assert_eq!(scopes.lookup(&ident("a")).unwrap().index, 5);
    }

    #[test]
    fn root_wire_filters_kind() {
        let mut scopes = ScopeStack::new();
        scopes.push();
        scopes
            .define(
                &ident("f"),
                VarRef {
                    kind: VarKind::Fact,
                    index: 0,
                },
            )
            .unwrap();
        scopes.push();
        scopes
            .define_root(
                &ident("w"),
                VarRef {
                    kind: VarKind::Wire,
                    index: 0,
                },
            )
            .unwrap();
        assert!(scopes.root_wire("f").is_none());
        assert!(scopes.root_wire("w").is_some());
        assert!(scopes.root_wire("missing").is_none());
    }
}

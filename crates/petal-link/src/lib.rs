//! Symbol linking for the Petal compiler.
//!
//! Resolves every identifier to a kind + index, parses number literals
//! into 16.16 fixed point, builds the deduplicated constant pool, and
//! registers wire variables. Linking annotates the tree through side
//! tables; the interpreter and code generator both consume the result.

mod conflict;
mod linker;
mod scope;

pub use conflict::ConflictMatrix;
pub use linker::{link, Linked, MAX_WIRES};
pub use scope::{ScopeStack, VarKind, VarRef, GLOBAL_DIR, GLOBAL_X, GLOBAL_Y};

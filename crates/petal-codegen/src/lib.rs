//! Petal bytecode generator.
//!
//! Walks the linked tree and emits the target's 4-bit-opcode byte stream
//! with a verified simulated stack height, tail-call elimination for
//! self-perpetuating turtles, and a profile-guided greedy coloring that
//! packs wires into the machine's physical register slots.

mod artifact;
mod generator;
pub mod op;
mod wires;

pub use artifact::{encode_color_script, encode_constants};
pub use generator::{generate, CodegenOptions, Generated};
pub use wires::{assign_wires, WireSlots};

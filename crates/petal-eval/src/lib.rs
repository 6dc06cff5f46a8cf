//! Petal reference interpreter.
//!
//! Executes turtle procedures exactly as the target machine will —
//! same fixed-point arithmetic, same scheduler order, same cycle costs —
//! producing the plot stream, the palette/fade script, and the wire
//! conflict matrix that drives slot allocation in the code generator.

mod colors;
mod interpreter;

pub use colors::{get_colors, get_form, Form};
pub use interpreter::{interpret, InterpretOutput, Turtle, Value};

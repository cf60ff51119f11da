//! Task template compilation and rendering.

mod compile;
mod functions;
mod render;

pub use compile::{compile, CompileError, Template};
pub use functions::{FunctionError, RenderKind};
pub use render::{RenderOutcome, Renderer};

//! The per-task state machine: init, render, inspect/apply, destroy.

mod state;
mod task_driver;

pub use state::DriverState;
pub use task_driver::{DriverError, TaskDriver};

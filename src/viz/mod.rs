//! Interactive front ends.

pub mod console;

pub use console::{Command, run_console};

//! Command-line surface of the `agent-dispatch` binary.
//!
//! `Cli` holds the clap definitions; `Display` renders task and plan results
//! for terminals.

mod commands;
mod display;

pub use commands::{Cli, Commands, ConfigAction, OutputFormat};
pub use display::Display;

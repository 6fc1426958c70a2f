//! Backend adapters for coding-agent CLIs.
//!
//! Each backend implements [`CliStrategy`]: it turns an [`Instruction`] into a
//! command line and classifies the raw process output. The runner and the
//! orchestrator only ever talk to this trait.
//!
//! [`Instruction`]: crate::instruction::Instruction

mod aider;
mod command;
mod opencode;
mod output;
mod registry;
mod signatures;
mod traits;

pub use aider::{AIDER_CAPABILITIES, AiderStrategy};
pub use command::CommandSpec;
pub use opencode::{OPENCODE_CAPABILITIES, OpenCodeStrategy};
pub use output::{classify_output, extract_touched_files};
pub use registry::{StrategyFactory, StrategyRegistry};
pub use signatures::{
    COMMON_RULES, EXCERPT_MAX_CHARS, SignatureCategory, SignatureMatch, SignatureRule,
    SignatureTable,
};
pub use traits::{Capabilities, CliStrategy, TaskType};

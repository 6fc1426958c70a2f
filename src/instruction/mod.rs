//! Backend-agnostic instruction documents and the builder that produces them.
//!
//! An `Instruction` is built once per dispatch, owned by the orchestrator and
//! handed to exactly one strategy, which renders it into a prompt.

mod builder;
mod document;

pub use builder::{DEFAULT_GUARANTEES, InstructionBuilder};
pub use document::{
    INSTRUCTION_VERSION, Instruction, InstructionKind, Mode, RESULT_BLOCK_CONTRACT,
    StepDescriptor, TaskSection,
};

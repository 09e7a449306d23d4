//! Instruction-level building blocks.
//!
//! The vocabulary in [`op`] is the default collaborator: the emission layer
//! only records it, the verifier and the loaders give it meaning.

/// Opcodes, value types and labels.
pub mod op;
/// Append-only instruction stream plus binary roundtrip helpers.
pub mod stream;
pub mod asm;
pub mod disasm;
pub mod verify;

pub use op::{Label, Op, ValueType};
pub use stream::InstructionStream;

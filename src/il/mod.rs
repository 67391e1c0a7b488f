//! CIL instruction stream decoding (ECMA-335 III).
//!
//! This module turns raw IL bytes into structured instructions: a
//! bounds-checked [`Parser`] over the byte stream, the opcode constant set and
//! dispatch tables, and [`decode_instruction`] which the verifier's block
//! discovery and abstract interpreter both drive.
//!
//! # Key Types
//! - [`Parser`] - little-endian cursor over an IL stream
//! - [`Instruction`] - one decoded instruction with resolved branch targets
//! - [`OpSpec`] / [`INSTRUCTIONS`] / [`INSTRUCTIONS_EXT`] - static decoding facts
//! - [`FlowType`] - control-flow classification driving block boundaries

pub mod opcodes;

mod decoder;
mod instruction;
mod parser;
mod table;

pub use decoder::decode_instruction;
pub use instruction::{FlowType, Immediate, Instruction, Operand, OperandType};
pub use parser::{IlRead, Parser};
pub use table::{OpSpec, INSTRUCTIONS, INSTRUCTIONS_EXT};

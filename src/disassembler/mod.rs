//! CIL instruction decoding.
//!
//! The export pipeline never interprets user code. It only needs to find the metadata
//! tokens embedded in instruction streams so they can follow row renumbering, and to
//! check the wrapper bodies it emits.
//!
//! # Main Functions
//! - [`decode_instruction`] - Decode a single instruction
//! - [`decode_stream`] - Decode a sequence of instructions
//! - [`patch_tokens`] - Rewrite the inline tokens of a stream in place

mod decoder;
mod instructions;

pub use decoder::{decode_instruction, decode_stream, patch_tokens, Instruction, Operand};
pub use instructions::{CilInstruction, OperandType, INSTRUCTIONS, INSTRUCTIONS_FE};

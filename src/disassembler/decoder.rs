//! Linear decoding of CIL instruction streams.
//!
//! Method bodies are decoded front to back, one instruction after the other. This is
//! enough to find every inline metadata token without building a control flow graph,
//! since operands never overlap the following opcode.
//!
//! # Example
//!
//! ```rust
//! use rvexport::disassembler::{decode_instruction, Operand};
//! use rvexport::Parser;
//!
//! // call 0x06000001
//! let mut parser = Parser::new(&[0x28, 0x01, 0x00, 0x00, 0x06]);
//! let instruction = decode_instruction(&mut parser)?;
//! assert_eq!(instruction.mnemonic, "call");
//! assert!(matches!(instruction.operand, Operand::Token(token) if token.value() == 0x0600_0001));
//! # Ok::<(), rvexport::Error>(())
//! ```

use crate::{
    disassembler::{OperandType, INSTRUCTIONS, INSTRUCTIONS_FE},
    file::{io::write_le_at, parser::Parser},
    metadata::token::Token,
    Result,
};

/// An inline operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The instruction has no operand
    None,
    /// An immediate value, sign- or zero-extended from its encoded width
    Immediate(i64),
    /// A 32-bit floating point immediate
    Float32(f32),
    /// A 64-bit floating point immediate
    Float64(f64),
    /// A metadata token
    Token(Token),
    /// The offsets of a switch jump table
    Switch(Vec<i32>),
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Position of the first opcode byte, relative to the start of the stream
    pub offset: usize,
    /// Encoded size including prefix and operand
    pub size: usize,
    /// `0xFE` for two-byte opcodes, 0 otherwise
    pub prefix: u8,
    /// The opcode byte following the prefix, if any
    pub opcode: u8,
    /// The mnemonic
    pub mnemonic: &'static str,
    /// The inline operand
    pub operand: Operand,
}

/// Decode the instruction at the parser's current position.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unknown or reserved opcodes and
/// [`crate::Error::OutOfBounds`] for a truncated operand.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let (cil_instruction, prefix, opcode) = match first_byte {
        0xFE => {
            let second_byte = parser.read_le::<u8>()?;

            match INSTRUCTIONS_FE.get(second_byte as usize) {
                Some(instr) => (instr, 0xFE, second_byte),
                None => return Err(malformed_error!("Invalid opcode: FE {:02X}", second_byte)),
            }
        }
        _ => match INSTRUCTIONS.get(first_byte as usize) {
            Some(instr) => (instr, 0, first_byte),
            None => return Err(malformed_error!("Invalid opcode: {:X}", first_byte)),
        },
    };

    if cil_instruction.instr.is_empty() {
        return Err(malformed_error!(
            "Reserved opcode: {:04X}",
            (u16::from(prefix) << 8) | u16::from(opcode)
        ));
    }

    let operand = match cil_instruction.op_type {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(i64::from(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(i64::from(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(i64::from(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(i64::from(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(parser.read_le::<i64>()?),
        OperandType::Float32 => Operand::Float32(f32::from_bits(parser.read_le::<u32>()?)),
        OperandType::Float64 => Operand::Float64(f64::from_bits(parser.read_le::<u64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            // every target is 4 bytes, refuse counts the stream cannot hold
            if case_count.saturating_mul(4) > parser.remaining() {
                return Err(crate::Error::OutOfBounds);
            }

            let mut targets = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                targets.push(parser.read_le::<i32>()?);
            }

            Operand::Switch(targets)
        }
    };

    Ok(Instruction {
        offset,
        size: parser.pos() - offset,
        prefix,
        opcode,
        mnemonic: cil_instruction.instr,
        operand,
    })
}

/// Decode a complete instruction stream.
///
/// # Errors
/// Returns an error if any instruction fails to decode.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    Ok(instructions)
}

/// Rewrite every inline token of an instruction stream in place.
///
/// `map` sees every token operand, including user string tokens of `ldstr`. The stream is
/// fully decoded before anything is written, so a malformed stream is left untouched.
/// Returns the number of tokens whose value changed.
///
/// # Errors
/// Returns an error if the stream fails to decode or `map` fails.
pub fn patch_tokens<F>(code: &mut [u8], mut map: F) -> Result<usize>
where
    F: FnMut(Token) -> Result<Token>,
{
    let mut replacements = Vec::new();
    for instruction in decode_stream(code)? {
        if let Operand::Token(token) = instruction.operand {
            let mapped = map(token)?;
            if mapped != token {
                replacements.push((instruction.offset + instruction.size - 4, mapped));
            }
        }
    }

    for (position, token) in &replacements {
        let mut cursor = *position;
        write_le_at(code, &mut cursor, token.value())?;
    }

    Ok(replacements.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::TableId;

    #[test]
    fn decode_instruction_basic() {
        // ldloc.s 10
        let mut parser = Parser::new(&[0x11, 0x10]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.offset, 0);
        assert_eq!(instruction.size, 2);
        assert_eq!(instruction.opcode, 0x11);
        assert_eq!(instruction.prefix, 0);
        assert_eq!(instruction.mnemonic, "ldloc.s");
        assert_eq!(instruction.operand, Operand::Immediate(0x10));
    }

    #[test]
    fn decode_prefixed() {
        // ldftn 0x0A000003
        let mut parser = Parser::new(&[0xFE, 0x06, 0x03, 0x00, 0x00, 0x0A]);
        let instruction = decode_instruction(&mut parser).unwrap();

        assert_eq!(instruction.prefix, 0xFE);
        assert_eq!(instruction.mnemonic, "ldftn");
        assert_eq!(instruction.size, 6);
        assert_eq!(
            instruction.operand,
            Operand::Token(Token::from_parts(TableId::MemberRef, 3))
        );
    }

    #[test]
    fn decode_stream_mixed_widths() {
        #[rustfmt::skip]
        let code = [
            0x20, 0x01, 0x00, 0x00, 0x00,                   // ldc.i4 1
            0x21, 0, 0, 0, 0, 0, 0, 0, 0,                   // ldc.i8 0
            0x45, 0x02, 0x00, 0x00, 0x00,                   // switch (2 targets)
                  0x00, 0x00, 0x00, 0x00,
                  0xFB, 0xFF, 0xFF, 0xFF,
            0xFE, 0x0C, 0x01, 0x00,                         // ldloc 1
            0x2B, 0xFE,                                     // br.s -2
            0x2A,                                           // ret
        ];

        let instructions = decode_stream(&code).unwrap();
        let sizes: Vec<usize> = instructions.iter().map(|i| i.size).collect();
        assert_eq!(sizes, vec![5, 9, 13, 4, 2, 1]);
        assert_eq!(instructions[2].operand, Operand::Switch(vec![0, -5]));
        assert_eq!(instructions[4].operand, Operand::Immediate(-2));
    }

    #[test]
    fn reserved_and_truncated() {
        assert!(decode_stream(&[0x24]).is_err());
        assert!(decode_stream(&[0xFE, 0x08]).is_err());
        assert!(decode_stream(&[0xFE, 0x40]).is_err());
        assert!(decode_stream(&[0x28, 0x01, 0x00]).is_err());
        assert!(decode_stream(&[0x45, 0xFF, 0xFF, 0xFF, 0x0F]).is_err());
    }

    #[test]
    fn patch_tokens_in_place() {
        #[rustfmt::skip]
        let mut code = [
            0x72, 0x01, 0x00, 0x00, 0x70,                   // ldstr
            0x28, 0x05, 0x00, 0x00, 0x0A,                   // call MemberRef 5
            0x8C, 0x02, 0x00, 0x00, 0x01,                   // box TypeRef 2
            0x2A,
        ];

        let changed = patch_tokens(&mut code, |token| {
            Ok(match token.table_id() {
                Some(TableId::MemberRef) | Some(TableId::TypeRef) => {
                    Token::from_parts(token.table_id().unwrap_or(TableId::Module), token.row() - 1)
                }
                _ => token,
            })
        })
        .unwrap();

        assert_eq!(changed, 2);
        assert_eq!(&code[1..5], &[0x01, 0x00, 0x00, 0x70]);
        assert_eq!(&code[6..10], &[0x04, 0x00, 0x00, 0x0A]);
        assert_eq!(&code[11..15], &[0x01, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn patch_leaves_malformed_untouched() {
        let mut code = [0x28, 0x05, 0x00, 0x00, 0x0A, 0x24];
        assert!(patch_tokens(&mut code, |token| Ok(Token::new(token.value() + 1))).is_err());
        assert_eq!(code, [0x28, 0x05, 0x00, 0x00, 0x0A, 0x24]);
    }
}

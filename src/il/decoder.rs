//! CIL instruction decoding.
//!
//! [`decode_instruction`] turns the bytes at the parser's current position
//! into one [`Instruction`], handling the `0xFE` prefix byte, fixed-width
//! little-endian operands, and the variable-length `switch` table. Branch
//! targets are resolved to absolute IL offsets at decode time.
//!
//! # Example
//!
//! ```rust
//! use cilverify::il::{decode_instruction, Parser};
//!
//! let code = [0x2B, 0x0A]; // br.s +10
//! let mut parser = Parser::new(&code);
//! let instruction = decode_instruction(&mut parser)?;
//! assert_eq!(instruction.mnemonic, "br.s");
//! assert_eq!(instruction.branch_targets, vec![12]);
//! # Ok::<(), cilverify::Error>(())
//! ```

use crate::{
    il::{
        instruction::{FlowType, Immediate, Instruction, Operand, OperandType},
        opcodes::EXT_BASE,
        parser::Parser,
        table::{INSTRUCTIONS, INSTRUCTIONS_EXT},
    },
    metadata::Token,
    Result,
};

/// Decodes a single CIL instruction at the parser's current position.
///
/// The parser advances past the instruction and its operand. The instruction's
/// `offset` is the position the parser held on entry.
///
/// # Errors
///
/// - [`crate::Error::OutOfBounds`] when the instruction or its operand crosses
///   the end of the stream (the caller reports this as the end-of-method
///   failure for the offending offset)
/// - [`crate::Error::Malformed`] for reserved or unassigned opcode encodings
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let (spec, code) = match first_byte {
        0xFE => {
            let second_byte = parser.read_le::<u8>()?;

            match INSTRUCTIONS_EXT.get(second_byte as usize) {
                Some(spec) => (spec, EXT_BASE + u16::from(second_byte)),
                None => return Err(malformed_error!("Invalid opcode: FE {:02X}", second_byte)),
            }
        }
        _ => {
            let spec = &INSTRUCTIONS[first_byte as usize];
            (spec, u16::from(first_byte))
        }
    };

    if spec.is_reserved() {
        return Err(malformed_error!("Reserved opcode: {:04X}", code));
    }

    let operand = match spec.operand {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()?;

            let mut targets = Vec::with_capacity(case_count as usize);
            for _ in 0..case_count {
                targets.push(parser.read_le::<i32>()?);
            }

            Operand::Switch(targets)
        }
    };

    #[allow(clippy::cast_possible_truncation)]
    let mut instruction = Instruction {
        offset: offset as u32,
        size: (parser.pos() - offset) as u32,
        code,
        mnemonic: spec.mnemonic,
        flow: spec.flow,
        operand,
        branch_targets: Vec::new(),
    };

    let next_offset = i64::from(instruction.next_offset());
    match instruction.flow {
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave => {
            if let Operand::Immediate(value) = instruction.operand {
                if let Some(displacement) = value.as_displacement() {
                    instruction
                        .branch_targets
                        .push(next_offset + i64::from(displacement));
                }
            }
        }
        FlowType::Switch => {
            if let Operand::Switch(displacements) = &instruction.operand {
                for &displacement in displacements {
                    instruction
                        .branch_targets
                        .push(next_offset + i64::from(displacement));
                }
            }
        }
        _ => {}
    }

    Ok(instruction)
}

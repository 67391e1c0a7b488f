//! Opcode dispatch tables (ECMA-335 III.2-III.4).
//!
//! Two dense tables drive instruction decoding: [`INSTRUCTIONS`] for the
//! single-byte page and [`INSTRUCTIONS_EXT`] for the `0xFE`-prefixed page.
//! Each entry records the mnemonic, the inline operand encoding, and the
//! control-flow class. Reserved encodings carry an empty mnemonic and are
//! rejected by the decoder.

use crate::il::instruction::{FlowType, OperandType};

/// Static decoding facts for one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    /// Instruction mnemonic; empty for reserved encodings
    pub mnemonic: &'static str,
    /// Inline operand encoding
    pub operand: OperandType,
    /// Control flow classification
    pub flow: FlowType,
}

impl OpSpec {
    /// True for table slots with no assigned instruction.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.mnemonic.is_empty()
    }
}

const fn op(mnemonic: &'static str, operand: OperandType, flow: FlowType) -> OpSpec {
    OpSpec {
        mnemonic,
        operand,
        flow,
    }
}

const RESERVED: OpSpec = op("", OperandType::None, FlowType::Sequential);

use FlowType::{
    Call, ConditionalBranch, EndFilter, EndFinally, Leave, Prefix, Return, Sequential, Switch,
    Throw, UnconditionalBranch,
};
use OperandType as Op;

/// Decoding table for the single-byte opcode page (`0x00`-`0xFF`).
///
/// `0xFE` itself is not an instruction; the decoder treats it as the prefix
/// byte of the extended page.
pub static INSTRUCTIONS: [OpSpec; 256] = {
    let mut table = [RESERVED; 256];

    table[0x00] = op("nop", Op::None, Sequential);
    table[0x01] = op("break", Op::None, Sequential);
    table[0x02] = op("ldarg.0", Op::None, Sequential);
    table[0x03] = op("ldarg.1", Op::None, Sequential);
    table[0x04] = op("ldarg.2", Op::None, Sequential);
    table[0x05] = op("ldarg.3", Op::None, Sequential);
    table[0x06] = op("ldloc.0", Op::None, Sequential);
    table[0x07] = op("ldloc.1", Op::None, Sequential);
    table[0x08] = op("ldloc.2", Op::None, Sequential);
    table[0x09] = op("ldloc.3", Op::None, Sequential);
    table[0x0A] = op("stloc.0", Op::None, Sequential);
    table[0x0B] = op("stloc.1", Op::None, Sequential);
    table[0x0C] = op("stloc.2", Op::None, Sequential);
    table[0x0D] = op("stloc.3", Op::None, Sequential);
    table[0x0E] = op("ldarg.s", Op::UInt8, Sequential);
    table[0x0F] = op("ldarga.s", Op::UInt8, Sequential);
    table[0x10] = op("starg.s", Op::UInt8, Sequential);
    table[0x11] = op("ldloc.s", Op::UInt8, Sequential);
    table[0x12] = op("ldloca.s", Op::UInt8, Sequential);
    table[0x13] = op("stloc.s", Op::UInt8, Sequential);
    table[0x14] = op("ldnull", Op::None, Sequential);
    table[0x15] = op("ldc.i4.m1", Op::None, Sequential);
    table[0x16] = op("ldc.i4.0", Op::None, Sequential);
    table[0x17] = op("ldc.i4.1", Op::None, Sequential);
    table[0x18] = op("ldc.i4.2", Op::None, Sequential);
    table[0x19] = op("ldc.i4.3", Op::None, Sequential);
    table[0x1A] = op("ldc.i4.4", Op::None, Sequential);
    table[0x1B] = op("ldc.i4.5", Op::None, Sequential);
    table[0x1C] = op("ldc.i4.6", Op::None, Sequential);
    table[0x1D] = op("ldc.i4.7", Op::None, Sequential);
    table[0x1E] = op("ldc.i4.8", Op::None, Sequential);
    table[0x1F] = op("ldc.i4.s", Op::Int8, Sequential);
    table[0x20] = op("ldc.i4", Op::Int32, Sequential);
    table[0x21] = op("ldc.i8", Op::Int64, Sequential);
    table[0x22] = op("ldc.r4", Op::Float32, Sequential);
    table[0x23] = op("ldc.r8", Op::Float64, Sequential);
    table[0x25] = op("dup", Op::None, Sequential);
    table[0x26] = op("pop", Op::None, Sequential);
    table[0x27] = op("jmp", Op::Token, Return);
    table[0x28] = op("call", Op::Token, Call);
    table[0x29] = op("calli", Op::Token, Call);
    table[0x2A] = op("ret", Op::None, Return);
    table[0x2B] = op("br.s", Op::Int8, UnconditionalBranch);
    table[0x2C] = op("brfalse.s", Op::Int8, ConditionalBranch);
    table[0x2D] = op("brtrue.s", Op::Int8, ConditionalBranch);
    table[0x2E] = op("beq.s", Op::Int8, ConditionalBranch);
    table[0x2F] = op("bge.s", Op::Int8, ConditionalBranch);
    table[0x30] = op("bgt.s", Op::Int8, ConditionalBranch);
    table[0x31] = op("ble.s", Op::Int8, ConditionalBranch);
    table[0x32] = op("blt.s", Op::Int8, ConditionalBranch);
    table[0x33] = op("bne.un.s", Op::Int8, ConditionalBranch);
    table[0x34] = op("bge.un.s", Op::Int8, ConditionalBranch);
    table[0x35] = op("bgt.un.s", Op::Int8, ConditionalBranch);
    table[0x36] = op("ble.un.s", Op::Int8, ConditionalBranch);
    table[0x37] = op("blt.un.s", Op::Int8, ConditionalBranch);
    table[0x38] = op("br", Op::Int32, UnconditionalBranch);
    table[0x39] = op("brfalse", Op::Int32, ConditionalBranch);
    table[0x3A] = op("brtrue", Op::Int32, ConditionalBranch);
    table[0x3B] = op("beq", Op::Int32, ConditionalBranch);
    table[0x3C] = op("bge", Op::Int32, ConditionalBranch);
    table[0x3D] = op("bgt", Op::Int32, ConditionalBranch);
    table[0x3E] = op("ble", Op::Int32, ConditionalBranch);
    table[0x3F] = op("blt", Op::Int32, ConditionalBranch);
    table[0x40] = op("bne.un", Op::Int32, ConditionalBranch);
    table[0x41] = op("bge.un", Op::Int32, ConditionalBranch);
    table[0x42] = op("bgt.un", Op::Int32, ConditionalBranch);
    table[0x43] = op("ble.un", Op::Int32, ConditionalBranch);
    table[0x44] = op("blt.un", Op::Int32, ConditionalBranch);
    table[0x45] = op("switch", Op::Switch, Switch);
    table[0x46] = op("ldind.i1", Op::None, Sequential);
    table[0x47] = op("ldind.u1", Op::None, Sequential);
    table[0x48] = op("ldind.i2", Op::None, Sequential);
    table[0x49] = op("ldind.u2", Op::None, Sequential);
    table[0x4A] = op("ldind.i4", Op::None, Sequential);
    table[0x4B] = op("ldind.u4", Op::None, Sequential);
    table[0x4C] = op("ldind.i8", Op::None, Sequential);
    table[0x4D] = op("ldind.i", Op::None, Sequential);
    table[0x4E] = op("ldind.r4", Op::None, Sequential);
    table[0x4F] = op("ldind.r8", Op::None, Sequential);
    table[0x50] = op("ldind.ref", Op::None, Sequential);
    table[0x51] = op("stind.ref", Op::None, Sequential);
    table[0x52] = op("stind.i1", Op::None, Sequential);
    table[0x53] = op("stind.i2", Op::None, Sequential);
    table[0x54] = op("stind.i4", Op::None, Sequential);
    table[0x55] = op("stind.i8", Op::None, Sequential);
    table[0x56] = op("stind.r4", Op::None, Sequential);
    table[0x57] = op("stind.r8", Op::None, Sequential);
    table[0x58] = op("add", Op::None, Sequential);
    table[0x59] = op("sub", Op::None, Sequential);
    table[0x5A] = op("mul", Op::None, Sequential);
    table[0x5B] = op("div", Op::None, Sequential);
    table[0x5C] = op("div.un", Op::None, Sequential);
    table[0x5D] = op("rem", Op::None, Sequential);
    table[0x5E] = op("rem.un", Op::None, Sequential);
    table[0x5F] = op("and", Op::None, Sequential);
    table[0x60] = op("or", Op::None, Sequential);
    table[0x61] = op("xor", Op::None, Sequential);
    table[0x62] = op("shl", Op::None, Sequential);
    table[0x63] = op("shr", Op::None, Sequential);
    table[0x64] = op("shr.un", Op::None, Sequential);
    table[0x65] = op("neg", Op::None, Sequential);
    table[0x66] = op("not", Op::None, Sequential);
    table[0x67] = op("conv.i1", Op::None, Sequential);
    table[0x68] = op("conv.i2", Op::None, Sequential);
    table[0x69] = op("conv.i4", Op::None, Sequential);
    table[0x6A] = op("conv.i8", Op::None, Sequential);
    table[0x6B] = op("conv.r4", Op::None, Sequential);
    table[0x6C] = op("conv.r8", Op::None, Sequential);
    table[0x6D] = op("conv.u4", Op::None, Sequential);
    table[0x6E] = op("conv.u8", Op::None, Sequential);
    table[0x6F] = op("callvirt", Op::Token, Call);
    table[0x70] = op("cpobj", Op::Token, Sequential);
    table[0x71] = op("ldobj", Op::Token, Sequential);
    table[0x72] = op("ldstr", Op::Token, Sequential);
    table[0x73] = op("newobj", Op::Token, Call);
    table[0x74] = op("castclass", Op::Token, Sequential);
    table[0x75] = op("isinst", Op::Token, Sequential);
    table[0x76] = op("conv.r.un", Op::None, Sequential);
    table[0x79] = op("unbox", Op::Token, Sequential);
    table[0x7A] = op("throw", Op::None, Throw);
    table[0x7B] = op("ldfld", Op::Token, Sequential);
    table[0x7C] = op("ldflda", Op::Token, Sequential);
    table[0x7D] = op("stfld", Op::Token, Sequential);
    table[0x7E] = op("ldsfld", Op::Token, Sequential);
    table[0x7F] = op("ldsflda", Op::Token, Sequential);
    table[0x80] = op("stsfld", Op::Token, Sequential);
    table[0x81] = op("stobj", Op::Token, Sequential);
    table[0x82] = op("conv.ovf.i1.un", Op::None, Sequential);
    table[0x83] = op("conv.ovf.i2.un", Op::None, Sequential);
    table[0x84] = op("conv.ovf.i4.un", Op::None, Sequential);
    table[0x85] = op("conv.ovf.i8.un", Op::None, Sequential);
    table[0x86] = op("conv.ovf.u1.un", Op::None, Sequential);
    table[0x87] = op("conv.ovf.u2.un", Op::None, Sequential);
    table[0x88] = op("conv.ovf.u4.un", Op::None, Sequential);
    table[0x89] = op("conv.ovf.u8.un", Op::None, Sequential);
    table[0x8A] = op("conv.ovf.i.un", Op::None, Sequential);
    table[0x8B] = op("conv.ovf.u.un", Op::None, Sequential);
    table[0x8C] = op("box", Op::Token, Sequential);
    table[0x8D] = op("newarr", Op::Token, Sequential);
    table[0x8E] = op("ldlen", Op::None, Sequential);
    table[0x8F] = op("ldelema", Op::Token, Sequential);
    table[0x90] = op("ldelem.i1", Op::None, Sequential);
    table[0x91] = op("ldelem.u1", Op::None, Sequential);
    table[0x92] = op("ldelem.i2", Op::None, Sequential);
    table[0x93] = op("ldelem.u2", Op::None, Sequential);
    table[0x94] = op("ldelem.i4", Op::None, Sequential);
    table[0x95] = op("ldelem.u4", Op::None, Sequential);
    table[0x96] = op("ldelem.i8", Op::None, Sequential);
    table[0x97] = op("ldelem.i", Op::None, Sequential);
    table[0x98] = op("ldelem.r4", Op::None, Sequential);
    table[0x99] = op("ldelem.r8", Op::None, Sequential);
    table[0x9A] = op("ldelem.ref", Op::None, Sequential);
    table[0x9B] = op("stelem.i", Op::None, Sequential);
    table[0x9C] = op("stelem.i1", Op::None, Sequential);
    table[0x9D] = op("stelem.i2", Op::None, Sequential);
    table[0x9E] = op("stelem.i4", Op::None, Sequential);
    table[0x9F] = op("stelem.i8", Op::None, Sequential);
    table[0xA0] = op("stelem.r4", Op::None, Sequential);
    table[0xA1] = op("stelem.r8", Op::None, Sequential);
    table[0xA2] = op("stelem.ref", Op::None, Sequential);
    table[0xA3] = op("ldelem", Op::Token, Sequential);
    table[0xA4] = op("stelem", Op::Token, Sequential);
    table[0xA5] = op("unbox.any", Op::Token, Sequential);
    table[0xB3] = op("conv.ovf.i1", Op::None, Sequential);
    table[0xB4] = op("conv.ovf.u1", Op::None, Sequential);
    table[0xB5] = op("conv.ovf.i2", Op::None, Sequential);
    table[0xB6] = op("conv.ovf.u2", Op::None, Sequential);
    table[0xB7] = op("conv.ovf.i4", Op::None, Sequential);
    table[0xB8] = op("conv.ovf.u4", Op::None, Sequential);
    table[0xB9] = op("conv.ovf.i8", Op::None, Sequential);
    table[0xBA] = op("conv.ovf.u8", Op::None, Sequential);
    table[0xC2] = op("refanyval", Op::Token, Sequential);
    table[0xC3] = op("ckfinite", Op::None, Sequential);
    table[0xC6] = op("mkrefany", Op::Token, Sequential);
    table[0xD0] = op("ldtoken", Op::Token, Sequential);
    table[0xD1] = op("conv.u2", Op::None, Sequential);
    table[0xD2] = op("conv.u1", Op::None, Sequential);
    table[0xD3] = op("conv.i", Op::None, Sequential);
    table[0xD4] = op("conv.ovf.i", Op::None, Sequential);
    table[0xD5] = op("conv.ovf.u", Op::None, Sequential);
    table[0xD6] = op("add.ovf", Op::None, Sequential);
    table[0xD7] = op("add.ovf.un", Op::None, Sequential);
    table[0xD8] = op("mul.ovf", Op::None, Sequential);
    table[0xD9] = op("mul.ovf.un", Op::None, Sequential);
    table[0xDA] = op("sub.ovf", Op::None, Sequential);
    table[0xDB] = op("sub.ovf.un", Op::None, Sequential);
    table[0xDC] = op("endfinally", Op::None, EndFinally);
    table[0xDD] = op("leave", Op::Int32, Leave);
    table[0xDE] = op("leave.s", Op::Int8, Leave);
    table[0xDF] = op("stind.i", Op::None, Sequential);
    table[0xE0] = op("conv.u", Op::None, Sequential);

    table
};

/// Decoding table for the extended opcode page (`0xFE 0x00`-`0xFE 0x1E`).
pub static INSTRUCTIONS_EXT: [OpSpec; 0x1F] = {
    let mut table = [RESERVED; 0x1F];

    table[0x00] = op("arglist", Op::None, Sequential);
    table[0x01] = op("ceq", Op::None, Sequential);
    table[0x02] = op("cgt", Op::None, Sequential);
    table[0x03] = op("cgt.un", Op::None, Sequential);
    table[0x04] = op("clt", Op::None, Sequential);
    table[0x05] = op("clt.un", Op::None, Sequential);
    table[0x06] = op("ldftn", Op::Token, Sequential);
    table[0x07] = op("ldvirtftn", Op::Token, Sequential);
    table[0x09] = op("ldarg", Op::UInt16, Sequential);
    table[0x0A] = op("ldarga", Op::UInt16, Sequential);
    table[0x0B] = op("starg", Op::UInt16, Sequential);
    table[0x0C] = op("ldloc", Op::UInt16, Sequential);
    table[0x0D] = op("ldloca", Op::UInt16, Sequential);
    table[0x0E] = op("stloc", Op::UInt16, Sequential);
    table[0x0F] = op("localloc", Op::None, Sequential);
    table[0x11] = op("endfilter", Op::None, EndFilter);
    table[0x12] = op("unaligned.", Op::UInt8, Prefix);
    table[0x13] = op("volatile.", Op::None, Prefix);
    table[0x14] = op("tail.", Op::None, Prefix);
    table[0x15] = op("initobj", Op::Token, Sequential);
    table[0x16] = op("constrained.", Op::Token, Prefix);
    table[0x17] = op("cpblk", Op::None, Sequential);
    table[0x18] = op("initblk", Op::None, Sequential);
    table[0x19] = op("no.", Op::UInt8, Prefix);
    table[0x1A] = op("rethrow", Op::None, Throw);
    table[0x1C] = op("sizeof", Op::Token, Sequential);
    table[0x1D] = op("refanytype", Op::None, Sequential);
    table[0x1E] = op("readonly.", Op::None, Prefix);

    table
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_slots() {
        assert!(INSTRUCTIONS[0x24].is_reserved());
        assert!(INSTRUCTIONS[0x77].is_reserved());
        assert!(INSTRUCTIONS[0xFE].is_reserved());
        assert!(INSTRUCTIONS[0xFF].is_reserved());
        assert!(INSTRUCTIONS_EXT[0x08].is_reserved());
        assert!(INSTRUCTIONS_EXT[0x10].is_reserved());
        assert!(INSTRUCTIONS_EXT[0x1B].is_reserved());
    }

    #[test]
    fn spot_check_mnemonics() {
        assert_eq!(INSTRUCTIONS[0x2A].mnemonic, "ret");
        assert_eq!(INSTRUCTIONS[0x45].mnemonic, "switch");
        assert_eq!(INSTRUCTIONS[0xDD].mnemonic, "leave");
        assert_eq!(INSTRUCTIONS_EXT[0x01].mnemonic, "ceq");
        assert_eq!(INSTRUCTIONS_EXT[0x16].mnemonic, "constrained.");
    }

    #[test]
    fn branch_flow_classes() {
        assert_eq!(INSTRUCTIONS[0x2B].flow, FlowType::UnconditionalBranch);
        assert_eq!(INSTRUCTIONS[0x2C].flow, FlowType::ConditionalBranch);
        assert_eq!(INSTRUCTIONS[0xDC].flow, FlowType::EndFinally);
        assert_eq!(INSTRUCTIONS_EXT[0x11].flow, FlowType::EndFilter);
        assert_eq!(INSTRUCTIONS_EXT[0x14].flow, FlowType::Prefix);
    }
}

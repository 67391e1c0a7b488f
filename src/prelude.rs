//! Curated re-exports of the most commonly used types.
//!
//! Importing the prelude gives host integrations everything needed to wire
//! up and drive the verifier without naming individual modules.

pub use crate::{
    il::{decode_instruction, FlowType, Instruction, Operand, Parser},
    metadata::{
        BytecodeProvider, ExceptionRegion, MemberKind, MemberVisibility, RegionKind, Token,
        TokenKind, TypeKind, TypeOracle, WellKnown,
    },
    verifier::{
        ReportPolicy, SlotFlags, SlotKind, StackSlot, Verifier, VerifierArg, VerifierErrorKind,
        VerifierFailure,
    },
    Error, Result,
};

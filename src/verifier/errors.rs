//! Verifier failure taxonomy and reporting.
//!
//! Every way a method can fail verification is an element of the closed
//! [`VerifierErrorKind`] enumeration, mirroring the ECMA-335 verifier error
//! set. A concrete failure pairs a kind with the IL offset that detected it
//! and an ordered list of opaque [`VerifierArg`] values suitable for
//! stringification by the host.
//!
//! Reporting policy is configurable via [`ReportPolicy`]: the runtime
//! integration fails fast on the first error, while diagnostic tooling can
//! collect every failure in a method.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::{
    metadata::Token,
    verifier::slot::{SlotKind, StackSlot},
};

/// The closed set of verification error kinds.
///
/// Kinds fall into four families: structural (reader, block discovery, prefix
/// misuse), stack (underflow, overflow, kind mismatch, merge failure),
/// semantic (accessibility, abstract instantiation, unverifiable opcodes),
/// and region (try/handler structure, illegal `leave`, orphan terminators).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum VerifierErrorKind {
    // ── Structural ─────────────────────────────────────────────────────────
    /// A reserved or unassigned opcode encoding was encountered
    UnknownOpcode,
    /// An instruction or its operand crosses the end of the IL stream
    EndOfMethodInsideInstruction,
    /// A branch, leave, or switch target lies outside the method body
    InvalidBranchTarget,
    /// A branch target lands inside the body of another instruction
    BranchIntoInstruction,
    /// Control falls off the last instruction of the method
    FallthroughEndMethod,
    /// Control falls into an exception handler or filter
    FallthroughException,
    /// A prefix was applied to an instruction that cannot consume it
    InvalidPrefix,
    /// The same prefix was issued twice before its consumer
    PrefixConsecutive,
    /// `tail.` call is not immediately followed by `ret`
    TailCallNotFollowedByRet,
    /// `tail.` callee return type does not match the method return type
    TailCallReturnMismatch,
    /// Method has local variables but the body lacks the `InitLocals` flag
    InitLocals,
    /// `arglist` used in a method without a vararg calling convention
    Vararg,
    /// Local variable index out of range
    UnrecognizedLocal,
    /// Argument index out of range
    UnrecognizedArgument,

    // ── Stack ──────────────────────────────────────────────────────────────
    /// An instruction popped from an empty evaluation stack
    StackUnderflow,
    /// A push would exceed the declared `MaxStack`
    StackOverflow,
    /// The popped slot is not valid for the instruction
    StackUnexpected,
    /// A value was used before any path could have initialized it
    UninitStack,
    /// Stack heights disagree between two paths reaching the same block
    PathStackDepth,
    /// Stack slots of two paths reaching the same block cannot be merged
    PathStackUnexpected,
    /// `ret` in a void method found values on the stack
    ReturnVoid,
    /// Stack not empty after popping the return value
    ReturnStackNotEmpty,
    /// Returned a by-ref that does not point to a permanent home
    ReturnPtrToStack,
    /// `ret` inside a try, handler, or filter region
    ReturnFromRegion,
    /// Operand is not a numeric type
    ExpectedNumericType,
    /// Operand is not an integer type
    ExpectedIntegerType,
    /// Operand is not a managed pointer
    ExpectedByRef,
    /// Operand is not an object reference
    ExpectedObjRef,
    /// Operand is not a value type
    ExpectedValueType,
    /// Operand is not an array
    ExpectedArray,

    // ── Semantic ───────────────────────────────────────────────────────────
    /// Callee is not accessible from the verified method's declaring type
    MethodAccess,
    /// Field is not accessible from the verified method's declaring type
    FieldAccess,
    /// Static field instruction applied to an instance field
    ExpectedStaticField,
    /// `newobj` token does not name an instance constructor
    CtorExpected,
    /// `newobj` of an abstract type
    NewobjAbstract,
    /// The `this` slot does not satisfy the callee's receiver requirement
    ThisMismatch,
    /// The instruction is never verifiable (`calli`, `cpblk`, `initblk`, `jmp`)
    InstructionCannotBeVerified,
    /// The method uses a construct outside the verifiable subset
    Unverifiable,

    // ── Region ─────────────────────────────────────────────────────────────
    /// Illegal `leave` (bad target scope, or `leave` outside any region)
    Leave,
    /// `rethrow` outside a catch or filter handler
    Rethrow,
    /// `endfilter` outside a filter expression, or with a bad stack
    EndFilter,
    /// `endfinally` outside a finally or fault handler
    EndFinally,
    /// An exception region lies outside the method body or has zero length
    RegionOutOfBounds,
    /// Exception regions overlap without proper nesting
    RegionOverlap,
    /// A branch enters a protected block from outside
    BranchIntoTry,
    /// A branch enters a handler or filter from outside
    BranchIntoHandler,
    /// A branch exits a protected block other than via `leave`
    BranchOutOfTry,
    /// A branch exits a handler other than via `leave`
    BranchOutOfHandler,
}

/// One opaque argument of a verifier failure.
///
/// Arguments carry the identities and stack evidence the host needs to render
/// a diagnostic; the verifier itself never formats them beyond [`fmt::Display`].
#[derive(Debug, Clone, PartialEq)]
pub enum VerifierArg {
    /// An IL offset
    Offset(u32),
    /// The mnemonic of the offending instruction
    Mnemonic(&'static str),
    /// A type identity
    Type(Token),
    /// A method identity
    Method(Token),
    /// A field identity
    Field(Token),
    /// A stack slot that was found
    Found(StackSlot),
    /// A stack slot kind that was expected
    Expected(SlotKind),
    /// A type that was expected
    ExpectedType(Token),
    /// An argument or local index
    Index(u32),
    /// A count (stack depth, argument count)
    Count(u32),
}

impl fmt::Display for VerifierArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierArg::Offset(offset) => write!(f, "IL_{offset:04x}"),
            VerifierArg::Mnemonic(mnemonic) => write!(f, "{mnemonic}"),
            VerifierArg::Type(token) => write!(f, "type {token}"),
            VerifierArg::Method(token) => write!(f, "method {token}"),
            VerifierArg::Field(token) => write!(f, "field {token}"),
            VerifierArg::Found(slot) => write!(f, "found {slot}"),
            VerifierArg::Expected(kind) => write!(f, "expected {kind}"),
            VerifierArg::ExpectedType(token) => write!(f, "expected type {token}"),
            VerifierArg::Index(index) => write!(f, "index {index}"),
            VerifierArg::Count(count) => write!(f, "count {count}"),
        }
    }
}

/// A single verification failure: kind, detecting IL offset, arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierFailure {
    /// The error kind
    pub kind: VerifierErrorKind,
    /// IL offset of the instruction (or region) that detected the failure
    pub offset: u32,
    /// Ordered opaque arguments for host-side rendering
    pub args: Vec<VerifierArg>,
}

impl VerifierFailure {
    /// Creates a failure at `offset` with no arguments.
    #[must_use]
    pub fn new(kind: VerifierErrorKind, offset: u32) -> Self {
        VerifierFailure {
            kind,
            offset,
            args: Vec::new(),
        }
    }

    /// Appends an argument, builder style.
    #[must_use]
    pub fn with(mut self, arg: VerifierArg) -> Self {
        self.args.push(arg);
        self
    }
}

impl fmt::Display for VerifierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.kind)?;
        if !self.args.is_empty() {
            write!(f, " (")?;
            for (index, arg) in self.args.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// How failures are surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportPolicy {
    /// Abort on the first failure. The runtime integration default.
    #[default]
    FailFast,
    /// Record every failure and keep draining the worklist. A failing block
    /// is abandoned without propagating to successors; independent blocks
    /// are still verified.
    CollectAll,
}

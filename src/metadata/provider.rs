//! Bytecode service consumed by the verifier.
//!
//! Given a method token, the [`BytecodeProvider`] hands the verifier everything
//! the method body header carries: the raw IL stream, the local variable types,
//! the declared operand-stack ceiling, the `InitLocals` flag, the calling
//! convention's vararg bit, and the exception handling clauses
//! (ECMA-335 II.25.4).

use crate::{metadata::token::Token, Result};

/// The four exception handling clause kinds of ECMA-335 II.25.4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// A typed catch clause; [`ExceptionRegion::caught_type`] names the type
    Catch,
    /// A filter clause; the filter code runs first to elect the handler
    Filter,
    /// A finally clause, executed on both normal and exceptional exit
    Finally,
    /// A fault clause, executed only on exceptional exit
    Fault,
}

/// One exception handling region of a method body.
///
/// A region protects `[try_offset, try_offset + try_length)` and handles in
/// `[handler_offset, handler_offset + handler_length)`. Filter regions
/// additionally carry the filter code range `[filter_offset, handler_offset)`.
/// All offsets are relative to the start of the IL stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Clause kind (catch, filter, finally, fault)
    pub kind: RegionKind,
    /// Offset in bytes of the protected block from the start of the body
    pub try_offset: u32,
    /// Length in bytes of the protected block
    pub try_length: u32,
    /// Offset of the handler code
    pub handler_offset: u32,
    /// Length in bytes of the handler code
    pub handler_length: u32,
    /// Start of the filter expression; present iff `kind` is [`RegionKind::Filter`]
    pub filter_offset: Option<u32>,
    /// Exception type caught; present iff `kind` is [`RegionKind::Catch`]
    pub caught_type: Option<Token>,
}

impl ExceptionRegion {
    /// First offset past the protected block.
    #[must_use]
    pub fn try_end(&self) -> u32 {
        self.try_offset + self.try_length
    }

    /// First offset past the handler code.
    #[must_use]
    pub fn handler_end(&self) -> u32 {
        self.handler_offset + self.handler_length
    }

    /// True if `offset` lies inside the protected block.
    #[must_use]
    pub fn contains_try(&self, offset: u32) -> bool {
        offset >= self.try_offset && offset < self.try_end()
    }

    /// True if `offset` lies inside the handler code.
    #[must_use]
    pub fn contains_handler(&self, offset: u32) -> bool {
        offset >= self.handler_offset && offset < self.handler_end()
    }

    /// True if `offset` lies inside the filter expression of a filter region.
    ///
    /// The filter range runs from `filter_offset` up to (not including) the
    /// handler it elects.
    #[must_use]
    pub fn contains_filter(&self, offset: u32) -> bool {
        match self.filter_offset {
            Some(filter) => offset >= filter && offset < self.handler_offset,
            None => false,
        }
    }

    /// True if `offset` lies inside any code range owned by this region
    /// (try, handler, or filter).
    #[must_use]
    pub fn contains(&self, offset: u32) -> bool {
        self.contains_try(offset) || self.contains_handler(offset) || self.contains_filter(offset)
    }
}

/// Method body facts the verifier consumes, keyed by method token.
///
/// Like the oracle, the provider must respond synchronously and purely;
/// the verifier holds no cache and may be invoked concurrently for the same
/// method from first-touch trampolines on different threads.
pub trait BytecodeProvider {
    /// Raw IL byte stream of the method body.
    ///
    /// # Errors
    ///
    /// Implementations may fail when the method has no body (abstract,
    /// runtime-provided) or the body cannot be located.
    fn il_bytes(&self, method: Token) -> Result<Vec<u8>>;

    /// Declared local variable types, in signature order.
    fn locals(&self, method: Token) -> Vec<Token>;

    /// Exception handling clauses of the body, in metadata order.
    fn exception_regions(&self, method: Token) -> Vec<ExceptionRegion>;

    /// The `MaxStack` value of the method body header (ECMA-335 II.25.4.3).
    fn max_stack(&self, method: Token) -> u32;

    /// The `CorILMethod_InitLocals` header flag.
    fn init_locals(&self, method: Token) -> bool;

    /// True if the method's calling convention is vararg.
    fn is_vararg(&self, method: Token) -> bool;
}

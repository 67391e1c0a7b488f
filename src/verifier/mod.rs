//! Per-method CIL verification engine.
//!
//! The verifier proves, per method body, that no well-typed execution can
//! corrupt memory, break type safety, or violate the structural constraints
//! of the bytecode. It is an abstract interpreter over a typed operand stack,
//! run as a worklist dataflow across the basic blocks of the method,
//! reconciling stack states at merge points in the ECMA-335 type lattice.
//!
//! # Architecture
//!
//! - [`Verifier`] - entry point binding the two external services and a
//!   reporting policy
//! - `MethodContext` - per-call state: the IL, signatures, regions, current
//!   stack, one-shot prefix flags, and the block arena
//! - [`StackSlot`] and the lattice operations ([`merge_slots`],
//!   [`assignable_to_type`], the I.8.7 normal forms) - the stack value model
//! - `block` / `regions` / `dispatch` - block discovery, exception region
//!   rules, and the per-opcode transitions
//!
//! # Purity
//!
//! A verification call is a pure function of `(method, declaring type)` and
//! the answers of the two services: no caching, no shared state, no I/O.
//! Concurrent first-touch invocations of the same method may race; both
//! compute the same outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! let verifier = Verifier::new(&oracle, &provider);
//! match verifier.verify(method_token, declaring_type_token) {
//!     Ok(()) => { /* method is safe to execute */ }
//!     Err(error) => { /* reject with a bad-image failure */ }
//! }
//! ```

mod block;
mod dispatch;
mod errors;
mod lattice;
mod regions;
mod slot;

pub use errors::{ReportPolicy, VerifierArg, VerifierErrorKind, VerifierFailure};
pub use lattice::{
    assignable_to_type, binary_comparable, intermediate_type, merge_object_refs, merge_slots,
    reduced_type, verification_type, verification_types_match,
};
pub use slot::{SlotFlags, SlotKind, StackSlot};

use bitflags::bitflags;

use crate::{
    il::{FlowType, Parser},
    metadata::{BytecodeProvider, ExceptionRegion, Token, TypeKind, TypeOracle},
    verifier::{
        block::{decode_at, discover, BlockMap, ImportState},
        dispatch::Control,
    },
    Error, Result,
};

bitflags! {
    /// One-shot flags set by prefix opcodes, consumed or rejected by the next
    /// instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct PrefixFlags: u8 {
        const CONSTRAINED = 0x01;
        const TAIL = 0x02;
        const VOLATILE = 0x04;
        const UNALIGNED = 0x08;
        const READONLY = 0x10;
        const NO_CHECK = 0x20;
    }
}

/// Pending prefix state between a prefix opcode and its consumer.
#[derive(Debug, Default)]
pub(crate) struct Prefixes {
    pub flags: PrefixFlags,
    pub constrained: Option<Token>,
}

/// Mutable state of one verification call.
pub(crate) struct MethodContext<'a> {
    pub oracle: &'a dyn TypeOracle,
    pub declaring: Token,
    pub il: &'a [u8],
    pub has_this: bool,
    /// Stack shape of the implicit `this` argument: the declaring type, or a
    /// by-ref of it for value-type methods.
    pub this_type: Token,
    pub params: Vec<Token>,
    pub locals: Vec<Token>,
    pub return_type: Token,
    pub returns_void: bool,
    pub regions: Vec<ExceptionRegion>,
    pub max_stack: usize,
    pub vararg: bool,
    pub blocks: BlockMap,
    pub stack: Vec<StackSlot>,
    /// Offset of the instruction currently being interpreted
    pub offset: u32,
    /// Mnemonic of the instruction currently being interpreted
    pub mnemonic: &'static str,
    pub prefixes: Prefixes,
}

fn fail(kind: VerifierErrorKind, offset: u32) -> Error {
    Error::Verification(VerifierFailure::new(kind, offset))
}

impl<'a> MethodContext<'a> {
    /// Interprets one basic block from its entry stack until a terminal
    /// instruction or a fallthrough into another block.
    fn interpret_block(&mut self, block_offset: u32) -> Result<()> {
        let entry = self
            .blocks
            .get(block_offset)
            .map(|block| block.entry_stack.clone())
            .unwrap_or_default();
        self.stack = entry;
        self.prefixes = Prefixes::default();

        let il = self.il;
        let mut parser = Parser::new(il);
        let mut current = block_offset;

        loop {
            let instruction = decode_at(&mut parser, current)?;
            let end = instruction.next_offset();

            // A block starting strictly inside this instruction means some
            // branch targeted the middle of an instruction.
            for mid in current + 1..end {
                if self.blocks.is_block_start(mid) {
                    return Err(fail(VerifierErrorKind::BranchIntoInstruction, current));
                }
            }

            let control = self.step(&instruction)?;

            if instruction.flow != FlowType::Prefix && !self.prefixes.flags.is_empty() {
                return Err(fail(VerifierErrorKind::InvalidPrefix, current));
            }

            match control {
                Control::Continue => {
                    if end as usize == il.len() {
                        return Err(fail(VerifierErrorKind::FallthroughEndMethod, current));
                    }
                    if let Err(kind) = regions::validate_fallthrough(&self.regions, current, end) {
                        return Err(fail(kind, current));
                    }
                    if self.blocks.is_block_start(end) {
                        // Separating a prefix from its consumer by a block
                        // boundary would let the flag escape the instruction.
                        if instruction.flow == FlowType::Prefix {
                            return Err(fail(VerifierErrorKind::InvalidPrefix, current));
                        }
                        let stack = self.stack.clone();
                        self.merge_into(end, &stack, current)?;
                        return Ok(());
                    }
                    current = end;
                }
                Control::Branch {
                    targets,
                    fall_through,
                } => {
                    let stack = self.stack.clone();
                    for target in targets {
                        if let Err(kind) =
                            regions::validate_branch(&self.regions, current, target, false)
                        {
                            return Err(fail(kind, current));
                        }
                        self.merge_into(target, &stack, current)?;
                    }
                    if fall_through {
                        if end as usize == il.len() {
                            return Err(fail(VerifierErrorKind::FallthroughEndMethod, current));
                        }
                        if let Err(kind) =
                            regions::validate_fallthrough(&self.regions, current, end)
                        {
                            return Err(fail(kind, current));
                        }
                        self.merge_into(end, &stack, current)?;
                    }
                    return Ok(());
                }
                Control::Leave(target) => {
                    if let Err(kind) =
                        regions::validate_branch(&self.regions, current, target, true)
                    {
                        return Err(fail(kind, current));
                    }
                    self.merge_into(target, &[], current)?;
                    return Ok(());
                }
                Control::End => return Ok(()),
            }
        }
    }

    /// Merges the current stack into a successor's entry stack, freezing it
    /// on first arrival and re-queueing the successor when the merge widens
    /// it.
    fn merge_into(&mut self, target: u32, stack: &[StackSlot], from: u32) -> Result<()> {
        let Some(block) = self.blocks.get_mut(target) else {
            return Err(fail(VerifierErrorKind::InvalidBranchTarget, from));
        };

        // Handlers and filters are entered by the exception machinery alone;
        // any normal edge reaching one slipped past the region checks (for
        // instance a handler anchored mid-instruction).
        if block.handler_start || block.filter_start {
            return Err(fail(VerifierErrorKind::BranchIntoHandler, from));
        }
        // The evaluation stack must be empty on entry to a protected block.
        if block.try_start && !stack.is_empty() {
            return Err(fail(VerifierErrorKind::PathStackDepth, from));
        }

        if !block.entry_known {
            block.entry_stack = stack.to_vec();
            block.entry_known = true;
            self.blocks.enqueue(target);
            return Ok(());
        }

        let existing = block.entry_stack.clone();
        if existing.len() != stack.len() {
            return Err(Error::Verification(
                VerifierFailure::new(VerifierErrorKind::PathStackDepth, from)
                    .with(VerifierArg::Count(existing.len() as u32))
                    .with(VerifierArg::Count(stack.len() as u32)),
            ));
        }

        let mut merged = Vec::with_capacity(existing.len());
        for (have, incoming) in existing.iter().zip(stack) {
            match merge_slots(self.oracle, have, incoming) {
                Some(slot) => merged.push(slot),
                None => {
                    return Err(Error::Verification(
                        VerifierFailure::new(VerifierErrorKind::PathStackUnexpected, from)
                            .with(VerifierArg::Found(*incoming))
                            .with(VerifierArg::Found(*have)),
                    ))
                }
            }
        }

        if merged != existing {
            let block = self
                .blocks
                .get_mut(target)
                .expect("merge target verified above");
            // Region anchors have fixed entry stacks; an edge that would
            // widen one is incompatible with the seed.
            if block.seeded {
                return Err(fail(VerifierErrorKind::PathStackUnexpected, from));
            }
            block.entry_stack = merged;
            self.blocks.enqueue(target);
        }
        Ok(())
    }
}

/// The per-method CIL verifier.
///
/// Binds a [`TypeOracle`] and a [`BytecodeProvider`] and verifies methods by
/// token. The default reporting policy is fail-fast, which is what a runtime
/// guard wants; diagnostic tooling can collect every failure instead.
pub struct Verifier<'a> {
    oracle: &'a dyn TypeOracle,
    provider: &'a dyn BytecodeProvider,
    policy: ReportPolicy,
}

impl<'a> Verifier<'a> {
    /// Creates a verifier over the given services with the fail-fast policy.
    #[must_use]
    pub fn new(oracle: &'a dyn TypeOracle, provider: &'a dyn BytecodeProvider) -> Self {
        Verifier {
            oracle,
            provider,
            policy: ReportPolicy::default(),
        }
    }

    /// Replaces the reporting policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReportPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Verifies one method body.
    ///
    /// # Errors
    ///
    /// [`Error::Verification`] with the first failure when the method is not
    /// verifiable; service-level errors pass through unchanged.
    pub fn verify(&self, method: Token, declaring_type: Token) -> Result<()> {
        let failures = self.run(method, declaring_type, self.policy)?;
        match failures.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(Error::Verification(first)),
        }
    }

    /// Verifies one method body, collecting every failure.
    ///
    /// An empty result means the method verified. Instruction-level failures
    /// abandon their block without propagating to successors, so failures in
    /// independent blocks are all surfaced.
    ///
    /// # Errors
    ///
    /// Only service-level errors; verification failures are returned in the
    /// list.
    pub fn verify_collect(&self, method: Token, declaring_type: Token) -> Result<Vec<VerifierFailure>> {
        self.run(method, declaring_type, ReportPolicy::CollectAll)
    }

    fn run(
        &self,
        method: Token,
        declaring_type: Token,
        policy: ReportPolicy,
    ) -> Result<Vec<VerifierFailure>> {
        let mut failures = Vec::new();

        let il = self.provider.il_bytes(method)?;
        let locals = self.provider.locals(method);
        let region_list = self.provider.exception_regions(method);

        if !locals.is_empty() && !self.provider.init_locals(method) {
            failures.push(VerifierFailure::new(VerifierErrorKind::InitLocals, 0));
            if policy == ReportPolicy::FailFast {
                return Ok(failures);
            }
        }

        // Broken region structure or an unbuildable CFG leaves nothing to
        // interpret; both end the run even when collecting.
        if let Err(error) = regions::validate_regions(&region_list, il.len() as u32) {
            match error {
                Error::Verification(failure) => {
                    failures.push(failure);
                    return Ok(failures);
                }
                other => return Err(other),
            }
        }

        let blocks = match discover(&il, &region_list) {
            Ok(blocks) => blocks,
            Err(Error::Verification(failure)) => {
                failures.push(failure);
                return Ok(failures);
            }
            Err(other) => return Err(other),
        };

        let is_static = self.oracle.method_is_static(method);
        let this_type = match self.oracle.type_kind(declaring_type) {
            kind if kind.is_primitive()
                || matches!(
                    kind,
                    TypeKind::ValueType | TypeKind::Enum | TypeKind::GenericParameter
                ) =>
            {
                self.oracle.byref_of(declaring_type)
            }
            _ => declaring_type,
        };
        let return_type = self.oracle.method_return(method);

        let mut context = MethodContext {
            oracle: self.oracle,
            declaring: declaring_type,
            il: &il,
            has_this: !is_static,
            this_type,
            params: self.oracle.method_params(method),
            locals,
            return_type,
            returns_void: self.oracle.type_kind(return_type) == TypeKind::Void,
            regions: region_list,
            max_stack: self.provider.max_stack(method) as usize,
            vararg: self.provider.is_vararg(method),
            blocks,
            stack: Vec::new(),
            offset: 0,
            mnemonic: "",
            prefixes: Prefixes::default(),
        };

        {
            let entry = context.blocks.ensure(0);
            if !entry.entry_known {
                entry.entry_stack = Vec::new();
                entry.entry_known = true;
            }
        }
        regions::seed_anchors(&mut context.blocks, &context.regions, context.oracle);
        context.blocks.enqueue(0);

        while let Some(offset) = context.blocks.dequeue() {
            match context.interpret_block(offset) {
                Ok(()) => {}
                Err(Error::Verification(failure)) => {
                    failures.push(failure);
                    if policy == ReportPolicy::FailFast {
                        return Ok(failures);
                    }
                }
                Err(other) => return Err(other),
            }
            if let Some(block) = context.blocks.get_mut(offset) {
                if block.state == ImportState::WasImported {
                    block.state = ImportState::ErrorOrVerified;
                }
            }
        }

        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{MethodBody, TestUniverse};

    fn first_error(universe: &TestUniverse, method: Token) -> VerifierErrorKind {
        let verifier = Verifier::new(universe, universe);
        match verifier.verify(method, universe.object()) {
            Err(Error::Verification(failure)) => failure.kind,
            other => panic!("expected a verification failure, got {other:?}"),
        }
    }

    #[test]
    fn trivial_return_verifies() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[], universe.int32());
        universe.set_body(method, vec![0x17, 0x2A], &[]); // ldc.i4.1; ret

        let verifier = Verifier::new(&universe, &universe);
        assert!(verifier.verify(method, universe.object()).is_ok());
    }

    #[test]
    fn empty_return_underflows() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[], universe.int32());
        universe.set_body(method, vec![0x2A], &[]); // ret

        assert_eq!(
            first_error(&universe, method),
            VerifierErrorKind::StackUnderflow
        );
    }

    #[test]
    fn verify_is_idempotent() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[], universe.int32());
        universe.set_body(method, vec![0x2A], &[]);

        let verifier = Verifier::new(&universe, &universe);
        for _ in 0..3 {
            match verifier.verify(method, universe.object()) {
                Err(Error::Verification(failure)) => {
                    assert_eq!(failure.kind, VerifierErrorKind::StackUnderflow);
                    assert_eq!(failure.offset, 0);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[test]
    fn height_mismatch_at_join_rejected() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[universe.int32()], universe.void());
        // ldarg.0; brtrue.s +1; ldc.i4.0; ret
        // The true edge reaches the ret block with an empty stack, the
        // fallthrough edge with one Int32.
        universe.set_body(method, vec![0x02, 0x2D, 0x01, 0x16, 0x2A], &[]);

        assert_eq!(
            first_error(&universe, method),
            VerifierErrorKind::PathStackDepth
        );
    }

    #[test]
    fn loop_converges() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[universe.int32()], universe.void());
        // IL_0000: ldarg.0; IL_0001: brtrue.s IL_0000; IL_0003: ret
        universe.set_body(method, vec![0x02, 0x2D, 0xFD, 0x2A], &[]);

        let verifier = Verifier::new(&universe, &universe);
        assert!(verifier.verify(method, universe.object()).is_ok());
    }

    #[test]
    fn collect_all_reports_independent_blocks() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[universe.int32()], universe.void());
        // ldarg.0; brtrue.s IL_0005; IL_0003: pop; ret | IL_0005: pop; ret
        // Both arms pop from an empty stack.
        universe.set_body(method, vec![0x02, 0x2D, 0x02, 0x26, 0x2A, 0x26, 0x2A], &[]);

        let verifier = Verifier::new(&universe, &universe);
        let failures = verifier.verify_collect(method, universe.object()).unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures
            .iter()
            .all(|failure| failure.kind == VerifierErrorKind::StackUnderflow));
    }

    #[test]
    fn missing_init_locals_flag_rejected() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[], universe.void());
        let body = MethodBody {
            il: vec![0x2A],
            locals: vec![universe.int32()],
            init_locals: false,
            ..MethodBody::default()
        };
        universe.set_full_body(method, body);

        assert_eq!(
            first_error(&universe, method),
            VerifierErrorKind::InitLocals
        );
    }

    #[test]
    fn max_stack_enforced() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[], universe.void());
        let body = MethodBody {
            il: vec![0x16, 0x16, 0x26, 0x26, 0x2A],
            max_stack: 1,
            ..MethodBody::default()
        };
        universe.set_full_body(method, body);

        assert_eq!(
            first_error(&universe, method),
            VerifierErrorKind::StackOverflow
        );
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[], universe.void());
        universe.set_body(method, vec![0x24, 0x2A], &[]);

        assert_eq!(
            first_error(&universe, method),
            VerifierErrorKind::UnknownOpcode
        );
    }

    #[test]
    fn fallthrough_off_method_end_rejected() {
        let mut universe = TestUniverse::new();
        let method = universe.static_method("F", &[], universe.void());
        universe.set_body(method, vec![0x00, 0x00], &[]); // nop; nop

        assert_eq!(
            first_error(&universe, method),
            VerifierErrorKind::FallthroughEndMethod
        );
    }

    #[test]
    fn blocks_visited_at_most_twice() {
        // A diamond that merges two different classes; the join widens once
        // and must not loop further.
        let mut universe = TestUniverse::new();
        let base = universe.class("Base", universe.object());
        let left = universe.class("Left", base);
        let right = universe.class("Right", base);
        let left_field = universe.static_field(left, left);
        let right_field = universe.static_field(right, right);
        let local = base;
        let method = universe.static_method("F", &[universe.int32()], universe.void());

        // ldarg.0; brtrue.s L; ldsfld left; br.s J; L: ldsfld right; J: stloc.0; ret
        let mut il = vec![0x02, 0x2D, 0x07];
        il.push(0x7E);
        il.extend_from_slice(&left_field.value().to_le_bytes());
        il.extend_from_slice(&[0x2B, 0x05]);
        il.push(0x7E);
        il.extend_from_slice(&right_field.value().to_le_bytes());
        il.extend_from_slice(&[0x0A, 0x2A]);

        let body = MethodBody {
            il,
            locals: vec![local],
            ..MethodBody::default()
        };
        universe.set_full_body(method, body);

        let verifier = Verifier::new(&universe, &universe);
        assert!(verifier.verify(method, universe.object()).is_ok());
    }
}

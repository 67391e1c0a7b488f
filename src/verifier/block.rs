//! Basic block discovery and the dataflow worklist.
//!
//! The control flow graph is a dense arena indexed by IL offset: one optional
//! block slot per IL byte, successor links expressed as offsets, and an
//! intrusive worklist threaded through the blocks themselves. The
//! `Unmarked`/`Pending`/`WasImported` state machine replaces any external
//! membership set.
//!
//! Discovery is a single pre-pass over the IL: walk instruction lengths,
//! create a block at offset 0, at every branch/switch/leave target, after
//! every conditional branch and switch (the fallthrough edge), and at every
//! exception-region anchor. Targets outside the method body are rejected
//! here; targets that land inside an instruction body are caught later,
//! during dataflow, when a walked block fails to coincide with an
//! instruction boundary.

use crate::{
    il::{decode_instruction, FlowType, Instruction, Parser},
    metadata::ExceptionRegion,
    verifier::{
        errors::{VerifierArg, VerifierErrorKind, VerifierFailure},
        slot::StackSlot,
    },
    Error, Result,
};

/// Dataflow import state of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportState {
    /// Discovered but never queued
    #[default]
    Unmarked,
    /// Queued on the worklist, waiting for (re-)interpretation
    Pending,
    /// Currently being interpreted
    WasImported,
    /// Interpretation finished (successfully or with a recorded failure)
    ErrorOrVerified,
}

/// One basic block, pinned to its starting IL offset.
///
/// The entry stack is fixed on the first arrival and only widened by later
/// merges; a block whose entry widened is queued again. Each block is
/// interpreted at most twice after marking, which, together with the finite
/// slot lattice, bounds the whole dataflow.
#[derive(Debug, Default)]
pub struct BasicBlock {
    /// Import state machine driving the worklist
    pub state: ImportState,
    /// Entry stack, established on first arrival (or seeded for anchors)
    pub entry_stack: Vec<StackSlot>,
    /// True once the entry stack has been established
    pub entry_known: bool,
    /// Entry stack is a fixed region seed and never reconciled downward
    pub seeded: bool,
    /// Block starts a protected block
    pub try_start: bool,
    /// Block starts a filter expression
    pub filter_start: bool,
    /// Block starts a handler
    pub handler_start: bool,
    /// Intrusive worklist link
    next: Option<u32>,
}

/// Dense per-offset block arena plus the intrusive worklist head.
#[derive(Debug)]
pub struct BlockMap {
    blocks: Vec<Option<Box<BasicBlock>>>,
    worklist_head: Option<u32>,
}

impl BlockMap {
    /// Creates an empty map covering a method body of `il_len` bytes.
    #[must_use]
    pub fn new(il_len: usize) -> Self {
        let mut blocks = Vec::with_capacity(il_len);
        blocks.resize_with(il_len, || None);
        BlockMap {
            blocks,
            worklist_head: None,
        }
    }

    /// Returns the block starting at `offset`, creating it Unmarked if absent.
    pub fn ensure(&mut self, offset: u32) -> &mut BasicBlock {
        let slot = &mut self.blocks[offset as usize];
        if slot.is_none() {
            *slot = Some(Box::default());
        }
        slot.as_mut().unwrap()
    }

    /// Returns the block starting at `offset`, if one exists.
    #[must_use]
    pub fn get(&self, offset: u32) -> Option<&BasicBlock> {
        self.blocks.get(offset as usize)?.as_deref()
    }

    /// Mutable access to the block starting at `offset`.
    pub fn get_mut(&mut self, offset: u32) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(offset as usize)?.as_deref_mut()
    }

    /// True if a block starts exactly at `offset`.
    #[must_use]
    pub fn is_block_start(&self, offset: u32) -> bool {
        self.get(offset).is_some()
    }

    /// Queues a block for (re-)interpretation. Already-pending blocks are
    /// left where they are.
    pub fn enqueue(&mut self, offset: u32) {
        let head = self.worklist_head;
        let block = self
            .get_mut(offset)
            .expect("enqueue of an undiscovered block");
        if block.state == ImportState::Pending {
            return;
        }
        block.state = ImportState::Pending;
        block.next = head;
        self.worklist_head = Some(offset);
    }

    /// Pops the next pending block and marks it as being imported.
    pub fn dequeue(&mut self) -> Option<u32> {
        let offset = self.worklist_head?;
        let block = self.get_mut(offset).expect("worklist points at a block");
        let next = block.next;
        block.next = None;
        block.state = ImportState::WasImported;
        self.worklist_head = next;
        Some(offset)
    }

    /// Offsets of all discovered blocks, in address order.
    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.is_some())
            .map(|(offset, _)| offset as u32)
    }
}

/// Decodes the instruction at `offset`, translating raw decode errors into
/// the structural verifier failures they represent.
pub(crate) fn decode_at(parser: &mut Parser, offset: u32) -> Result<Instruction> {
    parser
        .seek(offset as usize)
        .map_err(|_| structural(VerifierErrorKind::InvalidBranchTarget, offset))?;
    decode_instruction(parser).map_err(|error| match error {
        Error::OutOfBounds => structural(VerifierErrorKind::EndOfMethodInsideInstruction, offset),
        Error::Malformed { .. } => structural(VerifierErrorKind::UnknownOpcode, offset),
        other => other,
    })
}

fn structural(kind: VerifierErrorKind, offset: u32) -> Error {
    Error::Verification(VerifierFailure::new(kind, offset))
}

/// Single pre-pass block discovery over the IL stream.
///
/// # Errors
///
/// Fails with the structural verifier errors detectable at this stage:
/// unknown opcodes, instructions crossing the end of the method, and branch
/// targets outside `[0, il.len())`.
pub(crate) fn discover(il: &[u8], regions: &[ExceptionRegion]) -> Result<BlockMap> {
    let mut map = BlockMap::new(il.len());
    if il.is_empty() {
        return Err(structural(
            VerifierErrorKind::EndOfMethodInsideInstruction,
            0,
        ));
    }
    map.ensure(0);

    let mut parser = Parser::new(il);
    while parser.has_more_data() {
        let offset = parser.pos() as u32;
        let instruction = decode_at(&mut parser, offset)?;

        for &target in &instruction.branch_targets {
            if target < 0 || target >= il.len() as i64 {
                return Err(Error::Verification(
                    VerifierFailure::new(VerifierErrorKind::InvalidBranchTarget, offset)
                        .with(VerifierArg::Mnemonic(instruction.mnemonic)),
                ));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            map.ensure(target as u32);
        }

        if matches!(
            instruction.flow,
            FlowType::ConditionalBranch | FlowType::Switch
        ) {
            let next = instruction.next_offset();
            if (next as usize) < il.len() {
                map.ensure(next);
            }
        }
    }

    for region in regions {
        map.ensure(region.try_offset).try_start = true;
        map.ensure(region.handler_offset).handler_start = true;
        if let Some(filter_offset) = region.filter_offset {
            map.ensure(filter_offset).filter_start = true;
        }
    }

    Ok(map)
}

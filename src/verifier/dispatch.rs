//! Abstract interpretation of individual instructions.
//!
//! One `step` per decoded instruction: consume the prefix flags the
//! instruction is entitled to, pop operand slots against the opcode's input
//! constraints (ECMA-335 III.1.5 operand tables), push result slots, and tell
//! the block driver how control continues. Everything here operates on the
//! typed stack only - no values are simulated.

use crate::{
    il::{opcodes, FlowType, Instruction, Operand},
    metadata::{MemberKind, MemberVisibility, Token, TokenKind, TypeKind, WellKnown},
    verifier::{
        errors::{VerifierArg, VerifierErrorKind, VerifierFailure},
        lattice::{assignable_to_type, binary_comparable, verification_type},
        regions,
        slot::{SlotFlags, SlotKind, StackSlot},
        MethodContext, PrefixFlags,
    },
    Error, Result,
};

/// How control continues after an instruction.
pub(crate) enum Control {
    /// Fall through to the next instruction
    Continue,
    /// Transfer to branch targets, optionally also falling through
    Branch {
        /// Validated in-range targets
        targets: Vec<u32>,
        /// Conditional branches and switch also continue sequentially
        fall_through: bool,
    },
    /// `leave` transfer: stack is emptied, single target
    Leave(u32),
    /// Block ends with no propagated successor (ret, throw, endfinally, ...)
    End,
}

impl<'a> MethodContext<'a> {
    fn failure(&self, kind: VerifierErrorKind) -> VerifierFailure {
        VerifierFailure::new(kind, self.offset).with(VerifierArg::Mnemonic(self.mnemonic))
    }

    fn err(&self, kind: VerifierErrorKind) -> Error {
        Error::Verification(self.failure(kind))
    }

    fn err_with(&self, kind: VerifierErrorKind, args: Vec<VerifierArg>) -> Error {
        let mut failure = self.failure(kind);
        failure.args.extend(args);
        Error::Verification(failure)
    }

    fn push(&mut self, slot: StackSlot) -> Result<()> {
        if self.stack.len() >= self.max_stack {
            return Err(self.err(VerifierErrorKind::StackOverflow));
        }
        self.stack.push(slot);
        Ok(())
    }

    fn pop(&mut self) -> Result<StackSlot> {
        self.stack
            .pop()
            .ok_or_else(|| self.err(VerifierErrorKind::StackUnderflow))
    }

    fn unexpected(&self, found: StackSlot, expected: SlotKind) -> Error {
        self.err_with(
            VerifierErrorKind::StackUnexpected,
            vec![VerifierArg::Found(found), VerifierArg::Expected(expected)],
        )
    }

    fn take_prefix(&mut self, flag: PrefixFlags) -> bool {
        let present = self.prefixes.flags.contains(flag);
        self.prefixes.flags.remove(flag);
        present
    }

    fn set_prefix(&mut self, flag: PrefixFlags) -> Result<Control> {
        if self.prefixes.flags.contains(flag) {
            return Err(self.err(VerifierErrorKind::PrefixConsecutive));
        }
        self.prefixes.flags.insert(flag);
        Ok(Control::Continue)
    }

    /// Declared type of argument `index`, with the implicit `this` of
    /// instance methods at index 0 (a by-ref of the declaring type when that
    /// type is a value type).
    fn arg_declared_type(&self, index: u16) -> Result<Token> {
        let index = usize::from(index);
        if self.has_this {
            if index == 0 {
                return Ok(self.this_type);
            }
            return self
                .params
                .get(index - 1)
                .copied()
                .ok_or_else(|| self.err(VerifierErrorKind::UnrecognizedArgument));
        }
        self.params
            .get(index)
            .copied()
            .ok_or_else(|| self.err(VerifierErrorKind::UnrecognizedArgument))
    }

    fn arg_slot(&self, index: u16) -> Result<StackSlot> {
        let ty = self.arg_declared_type(index)?;
        let mut slot = StackSlot::from_type(self.oracle, ty);
        if self.has_this && index == 0 {
            slot.flags |= SlotFlags::THIS_PTR;
        }
        Ok(slot)
    }

    fn local_declared_type(&self, index: u16) -> Result<Token> {
        self.locals
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| self.err(VerifierErrorKind::UnrecognizedLocal))
    }

    fn operand_token(&self, instruction: &Instruction) -> Result<Token> {
        instruction
            .operand
            .token()
            .ok_or_else(|| self.err(VerifierErrorKind::UnknownOpcode))
    }

    fn operand_index(&self, instruction: &Instruction) -> Result<u16> {
        match &instruction.operand {
            Operand::Immediate(immediate) => immediate
                .as_index()
                .ok_or_else(|| self.err(VerifierErrorKind::UnknownOpcode)),
            _ => Err(self.err(VerifierErrorKind::UnknownOpcode)),
        }
    }

    fn branch_target(&self, instruction: &Instruction) -> u32 {
        // Discovery rejected out-of-range targets before dataflow starts.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            instruction.branch_targets[0] as u32
        }
    }

    /// True when two types agree up to their ECMA-335 verification type.
    fn types_match(&self, a: Token, b: Token) -> bool {
        a == b || verification_type(self.oracle, a) == verification_type(self.oracle, b)
    }

    fn well_known_matches(&self, ty: Token, which: WellKnown) -> bool {
        self.types_match(ty, self.oracle.well_known(which))
    }

    fn is_value_kind(&self, ty: Token) -> bool {
        let kind = self.oracle.type_kind(ty);
        kind.is_primitive()
            || matches!(
                kind,
                TypeKind::ValueType | TypeKind::Enum | TypeKind::GenericParameter
            )
    }

    /// Accessibility of a member declared on `member_declaring` with the given
    /// visibility, evaluated from the verified method's declaring type.
    fn member_accessible(&self, member_declaring: Token, visibility: MemberVisibility) -> bool {
        match visibility {
            MemberVisibility::Public => true,
            MemberVisibility::CompilerControlled => false,
            MemberVisibility::Private => self.declaring == member_declaring,
            MemberVisibility::Assembly => self.oracle.same_assembly(self.declaring, member_declaring),
            MemberVisibility::Family => self.oracle.is_assignable_to(self.declaring, member_declaring),
            MemberVisibility::FamilyOrAssembly => {
                self.oracle.same_assembly(self.declaring, member_declaring)
                    || self.oracle.is_assignable_to(self.declaring, member_declaring)
            }
            MemberVisibility::FamilyAndAssembly => {
                self.oracle.same_assembly(self.declaring, member_declaring)
                    && self.oracle.is_assignable_to(self.declaring, member_declaring)
            }
        }
    }

    /// Dispatches one instruction. The caller has already rejected leftover
    /// prefix flags after this returns.
    pub(crate) fn step(&mut self, instruction: &Instruction) -> Result<Control> {
        use opcodes as op;

        self.offset = instruction.offset;
        self.mnemonic = instruction.mnemonic;

        // The no.-check prefix strips runtime checks; code relying on it is
        // outside the verifiable subset (ECMA-335 III.2.2).
        if instruction.flow != FlowType::Prefix
            && self.take_prefix(PrefixFlags::NO_CHECK)
        {
            return Err(self.err(VerifierErrorKind::InstructionCannotBeVerified));
        }

        match instruction.code {
            op::NOP | op::BREAK => Ok(Control::Continue),

            // ── Arguments and locals ───────────────────────────────────────
            op::LDARG_0 | op::LDARG_1 | op::LDARG_2 | op::LDARG_3 => {
                let slot = self.arg_slot(instruction.code - op::LDARG_0)?;
                self.push(slot)?;
                Ok(Control::Continue)
            }
            op::LDARG_S | op::LDARG => {
                let slot = self.arg_slot(self.operand_index(instruction)?)?;
                self.push(slot)?;
                Ok(Control::Continue)
            }
            op::LDLOC_0 | op::LDLOC_1 | op::LDLOC_2 | op::LDLOC_3 => {
                let ty = self.local_declared_type(instruction.code - op::LDLOC_0)?;
                self.push(StackSlot::from_type(self.oracle, ty))?;
                Ok(Control::Continue)
            }
            op::LDLOC_S | op::LDLOC => {
                let ty = self.local_declared_type(self.operand_index(instruction)?)?;
                self.push(StackSlot::from_type(self.oracle, ty))?;
                Ok(Control::Continue)
            }
            op::STLOC_0 | op::STLOC_1 | op::STLOC_2 | op::STLOC_3 => {
                let ty = self.local_declared_type(instruction.code - op::STLOC_0)?;
                self.store_to(ty)
            }
            op::STLOC_S | op::STLOC => {
                let ty = self.local_declared_type(self.operand_index(instruction)?)?;
                self.store_to(ty)
            }
            op::STARG_S | op::STARG => {
                let ty = self.arg_declared_type(self.operand_index(instruction)?)?;
                self.store_to(ty)
            }
            op::LDARGA_S | op::LDARGA => {
                let ty = self.arg_declared_type(self.operand_index(instruction)?)?;
                self.load_address_of(ty)
            }
            op::LDLOCA_S | op::LDLOCA => {
                let ty = self.local_declared_type(self.operand_index(instruction)?)?;
                self.load_address_of(ty)
            }

            // ── Constants ──────────────────────────────────────────────────
            op::LDNULL => {
                self.push(StackSlot::null_ref())?;
                Ok(Control::Continue)
            }
            op::LDC_I4_M1
            | op::LDC_I4_0
            | op::LDC_I4_1
            | op::LDC_I4_2
            | op::LDC_I4_3
            | op::LDC_I4_4
            | op::LDC_I4_5
            | op::LDC_I4_6
            | op::LDC_I4_7
            | op::LDC_I4_8
            | op::LDC_I4_S
            | op::LDC_I4 => {
                self.push(StackSlot::int32())?;
                Ok(Control::Continue)
            }
            op::LDC_I8 => {
                self.push(StackSlot::int64())?;
                Ok(Control::Continue)
            }
            op::LDC_R4 | op::LDC_R8 => {
                self.push(StackSlot::float())?;
                Ok(Control::Continue)
            }
            op::LDSTR => {
                self.push(StackSlot::obj_ref(self.oracle.well_known(WellKnown::String)))?;
                Ok(Control::Continue)
            }
            op::LDTOKEN => {
                let token = self.operand_token(instruction)?;
                let handle = match token.kind() {
                    TokenKind::Type => WellKnown::RuntimeTypeHandle,
                    TokenKind::Method => WellKnown::RuntimeMethodHandle,
                    TokenKind::Field => WellKnown::RuntimeFieldHandle,
                    TokenKind::MemberRef => match self.oracle.member_kind(token) {
                        MemberKind::Method => WellKnown::RuntimeMethodHandle,
                        MemberKind::Field => WellKnown::RuntimeFieldHandle,
                    },
                    TokenKind::Other => {
                        return Err(self.err(VerifierErrorKind::InstructionCannotBeVerified))
                    }
                };
                self.push(StackSlot::value(self.oracle.well_known(handle)))?;
                Ok(Control::Continue)
            }

            // ── Stack manipulation ─────────────────────────────────────────
            op::DUP => {
                let top = self.pop()?;
                self.push(top)?;
                self.push(top)?;
                Ok(Control::Continue)
            }
            op::POP => {
                self.pop()?;
                Ok(Control::Continue)
            }

            // ── Arithmetic and bitwise ─────────────────────────────────────
            op::ADD | op::SUB | op::MUL | op::DIV | op::REM => self.binary_arithmetic(false),
            op::DIV_UN
            | op::REM_UN
            | op::AND
            | op::OR
            | op::XOR
            | op::ADD_OVF
            | op::ADD_OVF_UN
            | op::MUL_OVF
            | op::MUL_OVF_UN
            | op::SUB_OVF
            | op::SUB_OVF_UN => self.binary_arithmetic(true),
            op::SHL | op::SHR | op::SHR_UN => self.shift(),
            op::NEG => {
                let slot = self.pop()?;
                if !slot.is_numeric() {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedNumericType,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                self.push(StackSlot {
                    method: None,
                    ..slot
                })?;
                Ok(Control::Continue)
            }
            op::NOT => {
                let slot = self.pop()?;
                if !slot.is_integer() {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedIntegerType,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                self.push(StackSlot {
                    method: None,
                    ..slot
                })?;
                Ok(Control::Continue)
            }
            op::CKFINITE => {
                let slot = self.pop()?;
                if slot.kind != SlotKind::Float {
                    return Err(self.unexpected(slot, SlotKind::Float));
                }
                self.push(StackSlot::float())?;
                Ok(Control::Continue)
            }

            // ── Comparisons ────────────────────────────────────────────────
            op::CEQ | op::CGT | op::CGT_UN | op::CLT | op::CLT_UN => {
                let right = self.pop()?;
                let left = self.pop()?;
                let equality = matches!(instruction.code, op::CEQ | op::CGT_UN);
                if !binary_comparable(&left, &right, equality) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(left), VerifierArg::Found(right)],
                    ));
                }
                self.push(StackSlot::int32())?;
                Ok(Control::Continue)
            }

            // ── Conversions ────────────────────────────────────────────────
            op::CONV_I1 | op::CONV_I2 | op::CONV_I4 | op::CONV_U1 | op::CONV_U2 | op::CONV_U4 => {
                self.convert(SlotKind::Int32, false)
            }
            op::CONV_I8 | op::CONV_U8 => self.convert(SlotKind::Int64, false),
            op::CONV_R4 | op::CONV_R8 => self.convert(SlotKind::Float, false),
            op::CONV_I | op::CONV_U => self.convert(SlotKind::NativeInt, false),
            op::CONV_OVF_I1 | op::CONV_OVF_U1 | op::CONV_OVF_I2 | op::CONV_OVF_U2
            | op::CONV_OVF_I4 | op::CONV_OVF_U4 => self.convert(SlotKind::Int32, false),
            op::CONV_OVF_I8 | op::CONV_OVF_U8 => self.convert(SlotKind::Int64, false),
            op::CONV_OVF_I | op::CONV_OVF_U => self.convert(SlotKind::NativeInt, false),
            op::CONV_OVF_I1_UN | op::CONV_OVF_U1_UN | op::CONV_OVF_I2_UN | op::CONV_OVF_U2_UN
            | op::CONV_OVF_I4_UN | op::CONV_OVF_U4_UN => self.convert(SlotKind::Int32, true),
            op::CONV_OVF_I8_UN | op::CONV_OVF_U8_UN => self.convert(SlotKind::Int64, true),
            op::CONV_OVF_I_UN | op::CONV_OVF_U_UN => self.convert(SlotKind::NativeInt, true),
            op::CONV_R_UN => self.convert(SlotKind::Float, true),

            // ── Branches ───────────────────────────────────────────────────
            op::BR | op::BR_S => Ok(Control::Branch {
                targets: vec![self.branch_target(instruction)],
                fall_through: false,
            }),
            op::BRTRUE | op::BRTRUE_S | op::BRFALSE | op::BRFALSE_S => {
                let slot = self.pop()?;
                if !matches!(
                    slot.kind,
                    SlotKind::Int32
                        | SlotKind::Int64
                        | SlotKind::NativeInt
                        | SlotKind::ObjRef
                        | SlotKind::ByRef
                ) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                Ok(Control::Branch {
                    targets: vec![self.branch_target(instruction)],
                    fall_through: true,
                })
            }
            op::BEQ | op::BEQ_S | op::BGE | op::BGE_S | op::BGT | op::BGT_S | op::BLE
            | op::BLE_S | op::BLT | op::BLT_S | op::BNE_UN | op::BNE_UN_S | op::BGE_UN
            | op::BGE_UN_S | op::BGT_UN | op::BGT_UN_S | op::BLE_UN | op::BLE_UN_S
            | op::BLT_UN | op::BLT_UN_S => {
                let right = self.pop()?;
                let left = self.pop()?;
                let equality = matches!(
                    instruction.code,
                    op::BEQ | op::BEQ_S | op::BNE_UN | op::BNE_UN_S
                );
                if !binary_comparable(&left, &right, equality) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(left), VerifierArg::Found(right)],
                    ));
                }
                Ok(Control::Branch {
                    targets: vec![self.branch_target(instruction)],
                    fall_through: true,
                })
            }
            op::SWITCH => {
                let slot = self.pop()?;
                if slot.kind != SlotKind::Int32 {
                    return Err(self.unexpected(slot, SlotKind::Int32));
                }
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let targets = instruction
                    .branch_targets
                    .iter()
                    .map(|&target| target as u32)
                    .collect();
                Ok(Control::Branch {
                    targets,
                    fall_through: true,
                })
            }
            op::LEAVE | op::LEAVE_S => {
                let target = self.branch_target(instruction);
                if let Err(kind) = regions::validate_leave(&self.regions, self.offset, target) {
                    return Err(self.err(kind));
                }
                self.stack.clear();
                Ok(Control::Leave(target))
            }

            // ── Return and exceptional exits ───────────────────────────────
            op::RET => self.do_ret(),
            op::THROW => {
                let slot = self.pop()?;
                if slot.kind != SlotKind::ObjRef {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedObjRef,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                Ok(Control::End)
            }
            op::RETHROW => {
                let handler = regions::innermost_handler(&self.regions, self.offset);
                let inside_catch = handler.is_some_and(|region| {
                    matches!(
                        region.kind,
                        crate::metadata::RegionKind::Catch | crate::metadata::RegionKind::Filter
                    )
                });
                if !inside_catch {
                    return Err(self.err(VerifierErrorKind::Rethrow));
                }
                Ok(Control::End)
            }
            op::ENDFINALLY => {
                let handler = regions::innermost_handler(&self.regions, self.offset);
                let inside_finally = handler.is_some_and(|region| {
                    matches!(
                        region.kind,
                        crate::metadata::RegionKind::Finally | crate::metadata::RegionKind::Fault
                    )
                });
                if !inside_finally {
                    return Err(self.err(VerifierErrorKind::EndFinally));
                }
                self.stack.clear();
                Ok(Control::End)
            }
            op::ENDFILTER => {
                if regions::enclosing_filter(&self.regions, self.offset).is_none() {
                    return Err(self.err(VerifierErrorKind::EndFilter));
                }
                let slot = self.pop()?;
                if slot.kind != SlotKind::Int32 {
                    return Err(self.unexpected(slot, SlotKind::Int32));
                }
                if !self.stack.is_empty() {
                    return Err(self.err(VerifierErrorKind::EndFilter));
                }
                Ok(Control::End)
            }

            // ── Indirection ────────────────────────────────────────────────
            op::LDIND_I1 | op::LDIND_U1 => self.load_indirect(WellKnown::SByte, StackSlot::int32()),
            op::LDIND_I2 | op::LDIND_U2 => self.load_indirect(WellKnown::Int16, StackSlot::int32()),
            op::LDIND_I4 | op::LDIND_U4 => self.load_indirect(WellKnown::Int32, StackSlot::int32()),
            op::LDIND_I8 => self.load_indirect(WellKnown::Int64, StackSlot::int64()),
            op::LDIND_I => self.load_indirect(WellKnown::IntPtr, StackSlot::native_int()),
            op::LDIND_R4 => self.load_indirect(WellKnown::Single, StackSlot::float()),
            op::LDIND_R8 => self.load_indirect(WellKnown::Double, StackSlot::float()),
            op::LDIND_REF => {
                self.take_prefix(PrefixFlags::VOLATILE);
                self.take_prefix(PrefixFlags::UNALIGNED);
                let (_, elem) = self.pop_byref()?;
                if !self.oracle.type_kind(elem).is_object_reference() {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedObjRef,
                        vec![VerifierArg::Type(elem)],
                    ));
                }
                self.push(StackSlot::obj_ref(elem))?;
                Ok(Control::Continue)
            }
            op::STIND_I1 => self.store_indirect_numeric(WellKnown::SByte, SlotKind::Int32),
            op::STIND_I2 => self.store_indirect_numeric(WellKnown::Int16, SlotKind::Int32),
            op::STIND_I4 => self.store_indirect_numeric(WellKnown::Int32, SlotKind::Int32),
            op::STIND_I8 => self.store_indirect_numeric(WellKnown::Int64, SlotKind::Int64),
            op::STIND_R4 => self.store_indirect_numeric(WellKnown::Single, SlotKind::Float),
            op::STIND_R8 => self.store_indirect_numeric(WellKnown::Double, SlotKind::Float),
            op::STIND_I => self.store_indirect_numeric(WellKnown::IntPtr, SlotKind::NativeInt),
            op::STIND_REF => {
                self.take_prefix(PrefixFlags::VOLATILE);
                self.take_prefix(PrefixFlags::UNALIGNED);
                let value = self.pop()?;
                let (pointer, elem) = self.pop_byref()?;
                if pointer.flags.contains(SlotFlags::READ_ONLY) {
                    return Err(self.unexpected(pointer, SlotKind::ByRef));
                }
                if value.kind != SlotKind::ObjRef {
                    return Err(self.unexpected(value, SlotKind::ObjRef));
                }
                if !assignable_to_type(self.oracle, &value, elem, false) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(value), VerifierArg::ExpectedType(elem)],
                    ));
                }
                Ok(Control::Continue)
            }
            op::LDOBJ => {
                self.take_prefix(PrefixFlags::VOLATILE);
                self.take_prefix(PrefixFlags::UNALIGNED);
                let ty = self.operand_token(instruction)?;
                let (pointer, elem) = self.pop_byref()?;
                if !self.types_match(elem, ty) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(pointer), VerifierArg::ExpectedType(ty)],
                    ));
                }
                self.push(StackSlot::from_type(self.oracle, ty))?;
                Ok(Control::Continue)
            }
            op::STOBJ => {
                self.take_prefix(PrefixFlags::VOLATILE);
                self.take_prefix(PrefixFlags::UNALIGNED);
                let ty = self.operand_token(instruction)?;
                let value = self.pop()?;
                let (pointer, elem) = self.pop_byref()?;
                if pointer.flags.contains(SlotFlags::READ_ONLY) {
                    return Err(self.unexpected(pointer, SlotKind::ByRef));
                }
                if !self.types_match(elem, ty) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(pointer), VerifierArg::ExpectedType(ty)],
                    ));
                }
                if !assignable_to_type(self.oracle, &value, ty, true) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(value), VerifierArg::ExpectedType(ty)],
                    ));
                }
                Ok(Control::Continue)
            }
            op::CPOBJ => {
                let ty = self.operand_token(instruction)?;
                let (source, source_elem) = self.pop_byref()?;
                let (dest, dest_elem) = self.pop_byref()?;
                if dest.flags.contains(SlotFlags::READ_ONLY) {
                    return Err(self.unexpected(dest, SlotKind::ByRef));
                }
                if !self.types_match(source_elem, ty) || !self.types_match(dest_elem, ty) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![
                            VerifierArg::Found(source),
                            VerifierArg::Found(dest),
                            VerifierArg::ExpectedType(ty),
                        ],
                    ));
                }
                Ok(Control::Continue)
            }
            op::INITOBJ => {
                let ty = self.operand_token(instruction)?;
                let (pointer, elem) = self.pop_byref()?;
                if pointer.flags.contains(SlotFlags::READ_ONLY) {
                    return Err(self.unexpected(pointer, SlotKind::ByRef));
                }
                if !self.types_match(elem, ty) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(pointer), VerifierArg::ExpectedType(ty)],
                    ));
                }
                Ok(Control::Continue)
            }

            // ── Object model ───────────────────────────────────────────────
            op::CALL => self.do_call(instruction, false),
            op::CALLVIRT => self.do_call(instruction, true),
            op::NEWOBJ => self.do_newobj(instruction),
            op::CASTCLASS | op::ISINST => {
                let ty = self.operand_token(instruction)?;
                let slot = self.pop()?;
                if slot.kind != SlotKind::ObjRef {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedObjRef,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                self.push(StackSlot::obj_ref(ty))?;
                Ok(Control::Continue)
            }
            op::BOX => {
                let ty = self.operand_token(instruction)?;
                let slot = self.pop()?;
                if !assignable_to_type(self.oracle, &slot, ty, false) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(slot), VerifierArg::ExpectedType(ty)],
                    ));
                }
                self.push(StackSlot::obj_ref(ty))?;
                Ok(Control::Continue)
            }
            op::UNBOX => {
                let ty = self.operand_token(instruction)?;
                if !self.is_value_kind(ty) {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedValueType,
                        vec![VerifierArg::Type(ty)],
                    ));
                }
                let slot = self.pop()?;
                if slot.kind != SlotKind::ObjRef {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedObjRef,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                self.push(StackSlot::byref(ty, SlotFlags::PERMANENT_HOME))?;
                Ok(Control::Continue)
            }
            op::UNBOX_ANY => {
                let ty = self.operand_token(instruction)?;
                let slot = self.pop()?;
                if slot.kind != SlotKind::ObjRef {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedObjRef,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                self.push(StackSlot::from_type(self.oracle, ty))?;
                Ok(Control::Continue)
            }

            // ── Fields ─────────────────────────────────────────────────────
            op::LDFLD => self.do_ldfld(instruction, false),
            op::LDFLDA => self.do_ldfld(instruction, true),
            op::STFLD => self.do_stfld(instruction),
            op::LDSFLD => {
                self.take_prefix(PrefixFlags::VOLATILE);
                let field = self.check_static_field(instruction)?;
                let slot = StackSlot::from_type(self.oracle, self.oracle.field_type(field));
                self.push(slot)?;
                Ok(Control::Continue)
            }
            op::LDSFLDA => {
                let field = self.check_static_field(instruction)?;
                self.push(StackSlot::byref(
                    self.oracle.field_type(field),
                    SlotFlags::PERMANENT_HOME,
                ))?;
                Ok(Control::Continue)
            }
            op::STSFLD => {
                self.take_prefix(PrefixFlags::VOLATILE);
                let field = self.check_static_field(instruction)?;
                let field_type = self.oracle.field_type(field);
                let value = self.pop()?;
                if !assignable_to_type(self.oracle, &value, field_type, false) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![
                            VerifierArg::Found(value),
                            VerifierArg::ExpectedType(field_type),
                        ],
                    ));
                }
                Ok(Control::Continue)
            }

            // ── Arrays ─────────────────────────────────────────────────────
            op::NEWARR => {
                let elem = self.operand_token(instruction)?;
                let length = self.pop()?;
                if !matches!(length.kind, SlotKind::Int32 | SlotKind::NativeInt) {
                    return Err(self.unexpected(length, SlotKind::Int32));
                }
                self.push(StackSlot::obj_ref(self.oracle.sz_array_of(elem)))?;
                Ok(Control::Continue)
            }
            op::LDLEN => {
                let array = self.pop()?;
                self.check_array(&array)?;
                self.push(StackSlot::native_int())?;
                Ok(Control::Continue)
            }
            op::LDELEMA => {
                let ty = self.operand_token(instruction)?;
                let read_only = self.take_prefix(PrefixFlags::READONLY);
                let index = self.pop()?;
                if !matches!(index.kind, SlotKind::Int32 | SlotKind::NativeInt) {
                    return Err(self.unexpected(index, SlotKind::Int32));
                }
                let array = self.pop()?;
                if let Some(elem) = self.check_array(&array)? {
                    if !self.types_match(elem, ty) {
                        return Err(self.err_with(
                            VerifierErrorKind::StackUnexpected,
                            vec![VerifierArg::Found(array), VerifierArg::ExpectedType(ty)],
                        ));
                    }
                }
                let mut flags = SlotFlags::PERMANENT_HOME;
                if read_only {
                    flags |= SlotFlags::READ_ONLY;
                }
                self.push(StackSlot::byref(ty, flags))?;
                Ok(Control::Continue)
            }
            op::LDELEM_I1 | op::LDELEM_U1 => self.load_element(WellKnown::SByte, StackSlot::int32()),
            op::LDELEM_I2 | op::LDELEM_U2 => self.load_element(WellKnown::Int16, StackSlot::int32()),
            op::LDELEM_I4 | op::LDELEM_U4 => self.load_element(WellKnown::Int32, StackSlot::int32()),
            op::LDELEM_I8 => self.load_element(WellKnown::Int64, StackSlot::int64()),
            op::LDELEM_I => self.load_element(WellKnown::IntPtr, StackSlot::native_int()),
            op::LDELEM_R4 => self.load_element(WellKnown::Single, StackSlot::float()),
            op::LDELEM_R8 => self.load_element(WellKnown::Double, StackSlot::float()),
            op::LDELEM_REF => {
                let index = self.pop()?;
                if !matches!(index.kind, SlotKind::Int32 | SlotKind::NativeInt) {
                    return Err(self.unexpected(index, SlotKind::Int32));
                }
                let array = self.pop()?;
                match self.check_array(&array)? {
                    Some(elem) => {
                        if !self.oracle.type_kind(elem).is_object_reference() {
                            return Err(self.err_with(
                                VerifierErrorKind::ExpectedObjRef,
                                vec![VerifierArg::Type(elem)],
                            ));
                        }
                        self.push(StackSlot::obj_ref(elem))?;
                    }
                    None => self.push(StackSlot::null_ref())?,
                }
                Ok(Control::Continue)
            }
            op::LDELEM => {
                let ty = self.operand_token(instruction)?;
                let index = self.pop()?;
                if !matches!(index.kind, SlotKind::Int32 | SlotKind::NativeInt) {
                    return Err(self.unexpected(index, SlotKind::Int32));
                }
                let array = self.pop()?;
                if let Some(elem) = self.check_array(&array)? {
                    if !self.types_match(elem, ty) {
                        return Err(self.err_with(
                            VerifierErrorKind::StackUnexpected,
                            vec![VerifierArg::Found(array), VerifierArg::ExpectedType(ty)],
                        ));
                    }
                }
                self.push(StackSlot::from_type(self.oracle, ty))?;
                Ok(Control::Continue)
            }
            op::STELEM_I => self.store_element(WellKnown::IntPtr, SlotKind::NativeInt),
            op::STELEM_I1 => self.store_element(WellKnown::SByte, SlotKind::Int32),
            op::STELEM_I2 => self.store_element(WellKnown::Int16, SlotKind::Int32),
            op::STELEM_I4 => self.store_element(WellKnown::Int32, SlotKind::Int32),
            op::STELEM_I8 => self.store_element(WellKnown::Int64, SlotKind::Int64),
            op::STELEM_R4 => self.store_element(WellKnown::Single, SlotKind::Float),
            op::STELEM_R8 => self.store_element(WellKnown::Double, SlotKind::Float),
            op::STELEM_REF => {
                let value = self.pop()?;
                let index = self.pop()?;
                if !matches!(index.kind, SlotKind::Int32 | SlotKind::NativeInt) {
                    return Err(self.unexpected(index, SlotKind::Int32));
                }
                let array = self.pop()?;
                if value.kind != SlotKind::ObjRef {
                    return Err(self.unexpected(value, SlotKind::ObjRef));
                }
                if let Some(elem) = self.check_array(&array)? {
                    if !assignable_to_type(self.oracle, &value, elem, false) {
                        return Err(self.err_with(
                            VerifierErrorKind::StackUnexpected,
                            vec![VerifierArg::Found(value), VerifierArg::ExpectedType(elem)],
                        ));
                    }
                }
                Ok(Control::Continue)
            }
            op::STELEM => {
                let ty = self.operand_token(instruction)?;
                let value = self.pop()?;
                let index = self.pop()?;
                if !matches!(index.kind, SlotKind::Int32 | SlotKind::NativeInt) {
                    return Err(self.unexpected(index, SlotKind::Int32));
                }
                let array = self.pop()?;
                if let Some(elem) = self.check_array(&array)? {
                    if !self.types_match(elem, ty) {
                        return Err(self.err_with(
                            VerifierErrorKind::StackUnexpected,
                            vec![VerifierArg::Found(array), VerifierArg::ExpectedType(ty)],
                        ));
                    }
                }
                if !assignable_to_type(self.oracle, &value, ty, true) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(value), VerifierArg::ExpectedType(ty)],
                    ));
                }
                Ok(Control::Continue)
            }

            // ── Typed references ───────────────────────────────────────────
            op::MKREFANY => {
                let ty = self.operand_token(instruction)?;
                let (pointer, elem) = self.pop_byref()?;
                if !self.types_match(elem, ty) {
                    return Err(self.err_with(
                        VerifierErrorKind::StackUnexpected,
                        vec![VerifierArg::Found(pointer), VerifierArg::ExpectedType(ty)],
                    ));
                }
                self.push(StackSlot::value(
                    self.oracle.well_known(WellKnown::TypedReference),
                ))?;
                Ok(Control::Continue)
            }
            op::REFANYVAL => {
                let ty = self.operand_token(instruction)?;
                let slot = self.pop()?;
                if slot.kind != SlotKind::Value
                    || slot.ty != Some(self.oracle.well_known(WellKnown::TypedReference))
                {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedValueType,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                self.push(StackSlot::byref(ty, SlotFlags::PERMANENT_HOME))?;
                Ok(Control::Continue)
            }
            op::REFANYTYPE => {
                let slot = self.pop()?;
                if slot.kind != SlotKind::Value
                    || slot.ty != Some(self.oracle.well_known(WellKnown::TypedReference))
                {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedValueType,
                        vec![VerifierArg::Found(slot)],
                    ));
                }
                self.push(StackSlot::value(
                    self.oracle.well_known(WellKnown::RuntimeTypeHandle),
                ))?;
                Ok(Control::Continue)
            }

            // ── Pointer and runtime ────────────────────────────────────────
            op::LDFTN => {
                let method = self.operand_token(instruction)?;
                self.check_method_access(method)?;
                self.push(StackSlot::method_ptr(method))?;
                Ok(Control::Continue)
            }
            op::LDVIRTFTN => {
                let method = self.operand_token(instruction)?;
                self.check_method_access(method)?;
                let receiver = self.pop()?;
                if receiver.kind != SlotKind::ObjRef {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedObjRef,
                        vec![VerifierArg::Found(receiver)],
                    ));
                }
                let declaring = self.oracle.method_declaring_type(method);
                if let Some(ty) = receiver.ty {
                    if !self.oracle.is_assignable_to(ty, declaring) {
                        return Err(self.err_with(
                            VerifierErrorKind::ThisMismatch,
                            vec![VerifierArg::Found(receiver), VerifierArg::Method(method)],
                        ));
                    }
                }
                self.push(StackSlot::method_ptr(method))?;
                Ok(Control::Continue)
            }
            op::ARGLIST => {
                if !self.vararg {
                    return Err(self.err(VerifierErrorKind::Vararg));
                }
                self.push(StackSlot::value(
                    self.oracle.well_known(WellKnown::RuntimeArgumentHandle),
                ))?;
                Ok(Control::Continue)
            }
            op::LOCALLOC => {
                let size = self.pop()?;
                if !matches!(size.kind, SlotKind::Int32 | SlotKind::NativeInt) {
                    return Err(self.unexpected(size, SlotKind::NativeInt));
                }
                if !self.stack.is_empty() {
                    return Err(self.err(VerifierErrorKind::StackUnexpected));
                }
                if regions::inside_any_region(&self.regions, self.offset) {
                    return Err(self.err(VerifierErrorKind::InstructionCannotBeVerified));
                }
                self.push(StackSlot::native_int())?;
                Ok(Control::Continue)
            }
            op::SIZEOF => {
                self.operand_token(instruction)?;
                self.push(StackSlot::int32())?;
                Ok(Control::Continue)
            }

            // ── Never verifiable ───────────────────────────────────────────
            op::CALLI => {
                // calli is a legitimate tail. consumer, so the structural
                // half of the tail. contract is checked before the
                // instruction itself is rejected; a bad tail site is the
                // earlier defect.
                if self.take_prefix(PrefixFlags::TAIL) {
                    self.check_tail_site(instruction.next_offset())?;
                }
                Err(self.err(VerifierErrorKind::InstructionCannotBeVerified))
            }
            op::JMP => {
                // tail. is consumed only by call/callvirt/calli; on jmp it
                // is a prefix-whitelist violation.
                if self.prefixes.flags.contains(PrefixFlags::TAIL) {
                    return Err(self.err(VerifierErrorKind::InvalidPrefix));
                }
                Err(self.err(VerifierErrorKind::InstructionCannotBeVerified))
            }
            op::CPBLK | op::INITBLK => {
                self.take_prefix(PrefixFlags::VOLATILE);
                self.take_prefix(PrefixFlags::UNALIGNED);
                if self.prefixes.flags.contains(PrefixFlags::TAIL) {
                    return Err(self.err(VerifierErrorKind::InvalidPrefix));
                }
                Err(self.err(VerifierErrorKind::InstructionCannotBeVerified))
            }

            // ── Prefixes ───────────────────────────────────────────────────
            op::UNALIGNED => self.set_prefix(PrefixFlags::UNALIGNED),
            op::VOLATILE => self.set_prefix(PrefixFlags::VOLATILE),
            op::TAIL => self.set_prefix(PrefixFlags::TAIL),
            op::READONLY => self.set_prefix(PrefixFlags::READONLY),
            op::NO => self.set_prefix(PrefixFlags::NO_CHECK),
            op::CONSTRAINED => {
                let ty = self.operand_token(instruction)?;
                let control = self.set_prefix(PrefixFlags::CONSTRAINED)?;
                self.prefixes.constrained = Some(ty);
                Ok(control)
            }

            _ => Err(self.err(VerifierErrorKind::UnknownOpcode)),
        }
    }

    fn store_to(&mut self, target: Token) -> Result<Control> {
        let value = self.pop()?;
        if !assignable_to_type(self.oracle, &value, target, false) {
            return Err(self.err_with(
                VerifierErrorKind::StackUnexpected,
                vec![VerifierArg::Found(value), VerifierArg::ExpectedType(target)],
            ));
        }
        Ok(Control::Continue)
    }

    fn load_address_of(&mut self, ty: Token) -> Result<Control> {
        // A by-ref of a by-ref is not representable; ldloca/ldarga on
        // by-ref-typed storage is outside the verifiable subset.
        if self.oracle.type_kind(ty) == TypeKind::ByRef {
            return Err(self.err(VerifierErrorKind::InstructionCannotBeVerified));
        }
        self.push(StackSlot::byref(ty, SlotFlags::PERMANENT_HOME))?;
        Ok(Control::Continue)
    }

    fn binary_arithmetic(&mut self, integral_only: bool) -> Result<Control> {
        let right = self.pop()?;
        let left = self.pop()?;

        if integral_only {
            if !left.is_integer() || !right.is_integer() {
                return Err(self.err_with(
                    VerifierErrorKind::ExpectedIntegerType,
                    vec![VerifierArg::Found(left), VerifierArg::Found(right)],
                ));
            }
        } else if !left.is_numeric() || !right.is_numeric() {
            return Err(self.err_with(
                VerifierErrorKind::ExpectedNumericType,
                vec![VerifierArg::Found(left), VerifierArg::Found(right)],
            ));
        }

        let result = match (left.kind, right.kind) {
            (SlotKind::Int32, SlotKind::Int32) => StackSlot::int32(),
            (SlotKind::Int64, SlotKind::Int64) => StackSlot::int64(),
            (SlotKind::Float, SlotKind::Float) => StackSlot::float(),
            (SlotKind::Int32 | SlotKind::NativeInt, SlotKind::NativeInt)
            | (SlotKind::NativeInt, SlotKind::Int32) => StackSlot::native_int(),
            _ => {
                return Err(self.err_with(
                    VerifierErrorKind::StackUnexpected,
                    vec![VerifierArg::Found(left), VerifierArg::Found(right)],
                ))
            }
        };
        self.push(result)?;
        Ok(Control::Continue)
    }

    fn shift(&mut self) -> Result<Control> {
        let amount = self.pop()?;
        let value = self.pop()?;
        if !matches!(amount.kind, SlotKind::Int32 | SlotKind::NativeInt) {
            return Err(self.unexpected(amount, SlotKind::Int32));
        }
        if !value.is_integer() {
            return Err(self.err_with(
                VerifierErrorKind::ExpectedIntegerType,
                vec![VerifierArg::Found(value)],
            ));
        }
        self.push(StackSlot {
            method: None,
            ..value
        })?;
        Ok(Control::Continue)
    }

    fn convert(&mut self, target: SlotKind, integral_input_only: bool) -> Result<Control> {
        let slot = self.pop()?;
        if integral_input_only {
            if !slot.is_integer() {
                return Err(self.err_with(
                    VerifierErrorKind::ExpectedIntegerType,
                    vec![VerifierArg::Found(slot)],
                ));
            }
        } else if !slot.is_numeric() {
            return Err(self.err_with(
                VerifierErrorKind::ExpectedNumericType,
                vec![VerifierArg::Found(slot)],
            ));
        }
        let result = match target {
            SlotKind::Int32 => StackSlot::int32(),
            SlotKind::Int64 => StackSlot::int64(),
            SlotKind::NativeInt => StackSlot::native_int(),
            SlotKind::Float => StackSlot::float(),
            _ => unreachable!("conversions only target numeric kinds"),
        };
        self.push(result)?;
        Ok(Control::Continue)
    }

    fn do_ret(&mut self) -> Result<Control> {
        if regions::inside_any_region(&self.regions, self.offset) {
            return Err(self.err(VerifierErrorKind::ReturnFromRegion));
        }

        if self.returns_void {
            if !self.stack.is_empty() {
                return Err(self.err_with(
                    VerifierErrorKind::ReturnVoid,
                    vec![VerifierArg::Count(self.stack.len() as u32)],
                ));
            }
            return Ok(Control::End);
        }

        let value = self.pop()?;

        if self.oracle.type_kind(self.return_type) == TypeKind::ByRef {
            if value.kind != SlotKind::ByRef {
                return Err(self.unexpected(value, SlotKind::ByRef));
            }
            if !value.flags.contains(SlotFlags::PERMANENT_HOME)
                || value.flags.contains(SlotFlags::READ_ONLY)
            {
                return Err(self.err_with(
                    VerifierErrorKind::ReturnPtrToStack,
                    vec![VerifierArg::Found(value)],
                ));
            }
            let target_elem = self.oracle.element_type(self.return_type);
            if value.ty != target_elem {
                return Err(self.err_with(
                    VerifierErrorKind::StackUnexpected,
                    vec![
                        VerifierArg::Found(value),
                        VerifierArg::ExpectedType(self.return_type),
                    ],
                ));
            }
        } else if !assignable_to_type(self.oracle, &value, self.return_type, false) {
            return Err(self.err_with(
                VerifierErrorKind::StackUnexpected,
                vec![
                    VerifierArg::Found(value),
                    VerifierArg::ExpectedType(self.return_type),
                ],
            ));
        }

        if !self.stack.is_empty() {
            return Err(self.err_with(
                VerifierErrorKind::ReturnStackNotEmpty,
                vec![VerifierArg::Count(self.stack.len() as u32)],
            ));
        }
        Ok(Control::End)
    }

    /// Pops a managed pointer and returns it together with its element type.
    fn pop_byref(&mut self) -> Result<(StackSlot, Token)> {
        let slot = self.pop()?;
        match (slot.kind, slot.ty) {
            (SlotKind::ByRef, Some(elem)) => Ok((slot, elem)),
            _ => Err(self.err_with(
                VerifierErrorKind::ExpectedByRef,
                vec![VerifierArg::Found(slot)],
            )),
        }
    }

    fn load_indirect(&mut self, expected: WellKnown, result: StackSlot) -> Result<Control> {
        self.take_prefix(PrefixFlags::VOLATILE);
        self.take_prefix(PrefixFlags::UNALIGNED);
        let (pointer, elem) = self.pop_byref()?;
        if !self.well_known_matches(elem, expected) {
            return Err(self.err_with(
                VerifierErrorKind::StackUnexpected,
                vec![
                    VerifierArg::Found(pointer),
                    VerifierArg::ExpectedType(self.oracle.well_known(expected)),
                ],
            ));
        }
        self.push(result)?;
        Ok(Control::Continue)
    }

    fn store_indirect_numeric(
        &mut self,
        expected: WellKnown,
        value_kind: SlotKind,
    ) -> Result<Control> {
        self.take_prefix(PrefixFlags::VOLATILE);
        self.take_prefix(PrefixFlags::UNALIGNED);
        let value = self.pop()?;
        let (pointer, elem) = self.pop_byref()?;
        if pointer.flags.contains(SlotFlags::READ_ONLY) {
            return Err(self.unexpected(pointer, SlotKind::ByRef));
        }

        if !self.well_known_matches(elem, expected) {
            return Err(self.err_with(
                VerifierErrorKind::StackUnexpected,
                vec![
                    VerifierArg::Found(pointer),
                    VerifierArg::ExpectedType(self.oracle.well_known(expected)),
                ],
            ));
        }

        let value_ok = match value_kind {
            SlotKind::NativeInt => matches!(value.kind, SlotKind::NativeInt | SlotKind::Int32),
            kind => value.kind == kind,
        };
        if !value_ok {
            return Err(self.unexpected(value, value_kind));
        }
        Ok(Control::Continue)
    }

    /// Pops and validates an array reference. Returns the element type, or
    /// `None` for the null reference (any element constraint then holds
    /// vacuously).
    fn check_array(&self, array: &StackSlot) -> Result<Option<Token>> {
        if array.kind != SlotKind::ObjRef {
            return Err(self.err_with(
                VerifierErrorKind::ExpectedArray,
                vec![VerifierArg::Found(*array)],
            ));
        }
        match array.ty {
            None => Ok(None),
            Some(ty) => {
                if self.oracle.type_kind(ty) != TypeKind::Array || !self.oracle.is_sz_array(ty) {
                    return Err(self.err_with(
                        VerifierErrorKind::ExpectedArray,
                        vec![VerifierArg::Found(*array)],
                    ));
                }
                Ok(self.oracle.element_type(ty))
            }
        }
    }

    fn load_element(&mut self, expected: WellKnown, result: StackSlot) -> Result<Control> {
        let index = self.pop()?;
        if !matches!(index.kind, SlotKind::Int32 | SlotKind::NativeInt) {
            return Err(self.unexpected(index, SlotKind::Int32));
        }
        let array = self.pop()?;
        if let Some(elem) = self.check_array(&array)? {
            if !self.well_known_matches(elem, expected) {
                return Err(self.err_with(
                    VerifierErrorKind::StackUnexpected,
                    vec![
                        VerifierArg::Found(array),
                        VerifierArg::ExpectedType(self.oracle.well_known(expected)),
                    ],
                ));
            }
        }
        self.push(result)?;
        Ok(Control::Continue)
    }

    fn store_element(&mut self, expected: WellKnown, value_kind: SlotKind) -> Result<Control> {
        let value = self.pop()?;
        let index = self.pop()?;
        if !matches!(index.kind, SlotKind::Int32 | SlotKind::NativeInt) {
            return Err(self.unexpected(index, SlotKind::Int32));
        }
        let array = self.pop()?;
        if let Some(elem) = self.check_array(&array)? {
            if !self.well_known_matches(elem, expected) {
                return Err(self.err_with(
                    VerifierErrorKind::StackUnexpected,
                    vec![
                        VerifierArg::Found(array),
                        VerifierArg::ExpectedType(self.oracle.well_known(expected)),
                    ],
                ));
            }
        }
        let value_ok = match value_kind {
            SlotKind::NativeInt => matches!(value.kind, SlotKind::NativeInt | SlotKind::Int32),
            kind => value.kind == kind,
        };
        if !value_ok {
            return Err(self.unexpected(value, value_kind));
        }
        Ok(Control::Continue)
    }

    fn check_method_access(&self, method: Token) -> Result<()> {
        let declaring = self.oracle.method_declaring_type(method);
        let visibility = self.oracle.method_visibility(method);
        if !self.member_accessible(declaring, visibility) {
            return Err(self.err_with(
                VerifierErrorKind::MethodAccess,
                vec![VerifierArg::Method(method)],
            ));
        }
        Ok(())
    }

    fn check_static_field(&mut self, instruction: &Instruction) -> Result<Token> {
        let field = self.operand_token(instruction)?;
        if !self.oracle.field_is_static(field) {
            return Err(self.err_with(
                VerifierErrorKind::ExpectedStaticField,
                vec![VerifierArg::Field(field)],
            ));
        }
        self.check_field_access(field)?;
        Ok(field)
    }

    fn check_field_access(&self, field: Token) -> Result<()> {
        let declaring = self.oracle.field_declaring_type(field);
        let visibility = self.oracle.field_visibility(field);
        if !self.member_accessible(declaring, visibility) {
            return Err(self.err_with(
                VerifierErrorKind::FieldAccess,
                vec![VerifierArg::Field(field)],
            ));
        }
        Ok(())
    }

    /// Pops and validates the owner slot for an instance field access.
    /// Returns the owner for home-ness decisions in `ldflda`.
    fn pop_field_owner(&mut self, field: Token) -> Result<StackSlot> {
        let owner = self.pop()?;
        let field_declaring = self.oracle.field_declaring_type(field);
        let ok = match owner.kind {
            SlotKind::ObjRef => match owner.ty {
                None => true,
                Some(ty) => self.oracle.is_assignable_to(ty, field_declaring),
            },
            SlotKind::ByRef | SlotKind::Value => owner.ty == Some(field_declaring),
            _ => false,
        };
        if !ok {
            return Err(self.err_with(
                VerifierErrorKind::StackUnexpected,
                vec![
                    VerifierArg::Found(owner),
                    VerifierArg::ExpectedType(field_declaring),
                ],
            ));
        }
        Ok(owner)
    }

    fn do_ldfld(&mut self, instruction: &Instruction, address: bool) -> Result<Control> {
        self.take_prefix(PrefixFlags::VOLATILE);
        self.take_prefix(PrefixFlags::UNALIGNED);
        let field = self.operand_token(instruction)?;
        self.check_field_access(field)?;

        let owner = self.pop_field_owner(field)?;
        let field_type = self.oracle.field_type(field);

        if address {
            // The address of a field has a permanent home unless it lives in
            // a value type sitting directly on the evaluation stack; a
            // read-only owner pointer taints the field address.
            let mut flags = SlotFlags::empty();
            match owner.kind {
                SlotKind::ObjRef => flags |= SlotFlags::PERMANENT_HOME,
                SlotKind::ByRef => {
                    flags |= owner.flags
                        & (SlotFlags::PERMANENT_HOME | SlotFlags::READ_ONLY);
                }
                _ => {}
            }
            if self.oracle.field_is_static(field) {
                flags |= SlotFlags::PERMANENT_HOME;
            }
            self.push(StackSlot::byref(field_type, flags))?;
        } else {
            self.push(StackSlot::from_type(self.oracle, field_type))?;
        }
        Ok(Control::Continue)
    }

    fn do_stfld(&mut self, instruction: &Instruction) -> Result<Control> {
        self.take_prefix(PrefixFlags::VOLATILE);
        self.take_prefix(PrefixFlags::UNALIGNED);
        let field = self.operand_token(instruction)?;
        self.check_field_access(field)?;

        let value = self.pop()?;
        let owner = self.pop_field_owner(field)?;
        if owner.kind == SlotKind::ByRef && owner.flags.contains(SlotFlags::READ_ONLY) {
            return Err(self.unexpected(owner, SlotKind::ByRef));
        }
        // A value-type owner on the stack is a copy; storing into it cannot
        // be observed and is rejected.
        if owner.kind == SlotKind::Value {
            return Err(self.unexpected(owner, SlotKind::ByRef));
        }

        let field_type = self.oracle.field_type(field);
        if !assignable_to_type(self.oracle, &value, field_type, false) {
            return Err(self.err_with(
                VerifierErrorKind::StackUnexpected,
                vec![
                    VerifierArg::Found(value),
                    VerifierArg::ExpectedType(field_type),
                ],
            ));
        }
        Ok(Control::Continue)
    }

    fn pop_call_arguments(&mut self, method: Token) -> Result<()> {
        let params = self.oracle.method_params(method);
        for &param in params.iter().rev() {
            let argument = self.pop()?;
            if !assignable_to_type(self.oracle, &argument, param, false) {
                return Err(self.err_with(
                    VerifierErrorKind::StackUnexpected,
                    vec![
                        VerifierArg::Found(argument),
                        VerifierArg::ExpectedType(param),
                    ],
                ));
            }
        }
        Ok(())
    }

    fn check_this_slot(
        &mut self,
        method: Token,
        constrained: Option<Token>,
    ) -> Result<()> {
        let this = self.pop()?;
        let declaring = self.oracle.method_declaring_type(method);

        if let Some(constraint) = constrained {
            // constrained. rewrites the receiver requirement to a managed
            // pointer to the constraint type; the runtime boxes or
            // dereferences as needed.
            if this.kind != SlotKind::ByRef || this.ty != Some(constraint) {
                return Err(self.err_with(
                    VerifierErrorKind::ThisMismatch,
                    vec![VerifierArg::Found(this), VerifierArg::ExpectedType(constraint)],
                ));
            }
            return Ok(());
        }

        match self.oracle.type_kind(declaring) {
            kind if kind.is_primitive()
                || matches!(kind, TypeKind::ValueType | TypeKind::Enum) =>
            {
                if this.kind != SlotKind::ByRef || this.ty != Some(declaring) {
                    return Err(self.err_with(
                        VerifierErrorKind::ThisMismatch,
                        vec![
                            VerifierArg::Found(this),
                            VerifierArg::ExpectedType(declaring),
                        ],
                    ));
                }
                Ok(())
            }
            TypeKind::GenericParameter => {
                // An unconstrained instance call through a generic-parameter
                // receiver needs the constrained. prefix to pick a dispatch.
                Err(self.err_with(
                    VerifierErrorKind::ThisMismatch,
                    vec![VerifierArg::Found(this), VerifierArg::ExpectedType(declaring)],
                ))
            }
            _ => {
                let ok = this.kind == SlotKind::ObjRef
                    && match this.ty {
                        None => true,
                        Some(ty) => self.oracle.is_assignable_to(ty, declaring),
                    };
                if !ok {
                    return Err(self.err_with(
                        VerifierErrorKind::ThisMismatch,
                        vec![
                            VerifierArg::Found(this),
                            VerifierArg::ExpectedType(declaring),
                        ],
                    ));
                }
                Ok(())
            }
        }
    }

    /// Structural half of the `tail.` contract: the call site must not sit
    /// inside a protected region and must be immediately followed by `ret`.
    fn check_tail_site(&self, next_offset: u32) -> Result<()> {
        if regions::inside_any_region(&self.regions, self.offset) {
            return Err(self.err(VerifierErrorKind::InvalidPrefix));
        }

        if next_offset as usize >= self.il.len() {
            return Err(self.err(VerifierErrorKind::TailCallNotFollowedByRet));
        }
        // A one-byte lookahead suffices: ret is 0x2A on the single-byte page.
        if self.il[next_offset as usize] != 0x2A {
            return Err(self.err(VerifierErrorKind::TailCallNotFollowedByRet));
        }
        Ok(())
    }

    fn check_tail_position(&self, callee: Token, next_offset: u32) -> Result<()> {
        self.check_tail_site(next_offset)?;

        let callee_return = self.oracle.method_return(callee);
        if !self.types_match(callee_return, self.return_type) {
            return Err(self.err_with(
                VerifierErrorKind::TailCallReturnMismatch,
                vec![
                    VerifierArg::Type(callee_return),
                    VerifierArg::ExpectedType(self.return_type),
                ],
            ));
        }
        Ok(())
    }

    fn do_call(&mut self, instruction: &Instruction, virtual_call: bool) -> Result<Control> {
        let method = self.operand_token(instruction)?;
        let tail = self.take_prefix(PrefixFlags::TAIL);
        let constrained = if self.take_prefix(PrefixFlags::CONSTRAINED) {
            let constraint = self.prefixes.constrained.take();
            if !virtual_call {
                // ECMA-335 III.2.1 restricts constrained. to callvirt.
                return Err(self.err(VerifierErrorKind::InvalidPrefix));
            }
            constraint
        } else {
            None
        };

        self.check_method_access(method)?;
        self.pop_call_arguments(method)?;

        let is_static = self.oracle.method_is_static(method);
        if is_static {
            if virtual_call {
                return Err(self.err_with(
                    VerifierErrorKind::ThisMismatch,
                    vec![VerifierArg::Method(method)],
                ));
            }
        } else {
            self.check_this_slot(method, constrained)?;
        }

        if tail {
            self.check_tail_position(method, instruction.next_offset())?;
        }

        let return_type = self.oracle.method_return(method);
        if self.oracle.type_kind(return_type) != TypeKind::Void {
            self.push(StackSlot::from_type(self.oracle, return_type))?;
        }
        Ok(Control::Continue)
    }

    fn do_newobj(&mut self, instruction: &Instruction) -> Result<Control> {
        let ctor = self.operand_token(instruction)?;
        if !self.oracle.method_is_constructor(ctor) || self.oracle.method_is_static(ctor) {
            return Err(self.err_with(
                VerifierErrorKind::CtorExpected,
                vec![VerifierArg::Method(ctor)],
            ));
        }
        self.check_method_access(ctor)?;

        let declaring = self.oracle.method_declaring_type(ctor);
        if self.oracle.is_abstract_type(declaring) {
            return Err(self.err_with(
                VerifierErrorKind::NewobjAbstract,
                vec![VerifierArg::Type(declaring)],
            ));
        }

        self.pop_call_arguments(ctor)?;
        self.push(StackSlot::from_type(self.oracle, declaring))?;
        Ok(Control::Continue)
    }
}

//! Type lattice operations for stack-state reasoning.
//!
//! Implements the ECMA-335 I.8.7 type normal forms (reduced, verification,
//! intermediate), the slot merge used to reconcile stack states at control
//! flow joins, assignability for stores/returns/calls, and the relaxed
//! binary-comparability relation used by comparison and equality opcodes.
//!
//! The merge is a join on the finite-height lattice of stack slots: for any
//! slots `a`, `b` the result is a common supertype of both under
//! assignability, and the operation is commutative and associative. This is
//! what bounds the dataflow worklist - entry stacks only ever widen, and only
//! finitely often.

use rustc_hash::FxHashSet;

use crate::{
    metadata::{Token, TypeKind, TypeOracle, WellKnown},
    verifier::slot::{SlotFlags, SlotKind, StackSlot},
};

/// ECMA-335 I.8.7 reduced type.
///
/// Strips signedness: `Byte`->`SByte`, `UInt16`->`Int16`, `UInt32`->`Int32`,
/// `UInt64`->`Int64`, `UIntPtr`->`IntPtr`, and enums reduce through their
/// underlying type. Everything else is its own reduced type. The unsigned
/// reduction runs before any Bool/Char mapping - that mapping belongs to the
/// verification type, not here.
#[must_use]
pub fn reduced_type(oracle: &dyn TypeOracle, ty: Token) -> Token {
    match oracle.type_kind(ty) {
        TypeKind::U1 => oracle.well_known(WellKnown::SByte),
        TypeKind::U2 => oracle.well_known(WellKnown::Int16),
        TypeKind::U4 => oracle.well_known(WellKnown::Int32),
        TypeKind::U8 => oracle.well_known(WellKnown::Int64),
        TypeKind::U => oracle.well_known(WellKnown::IntPtr),
        TypeKind::Enum => {
            let underlying = oracle
                .enum_underlying(ty)
                .unwrap_or_else(|| oracle.well_known(WellKnown::Int32));
            reduced_type(oracle, underlying)
        }
        _ => ty,
    }
}

/// ECMA-335 I.8.7 verification type.
///
/// The reduced type with `Boolean`->`SByte` and `Char`->`Int16`; a by-ref is
/// the by-ref of its element's verification type.
#[must_use]
pub fn verification_type(oracle: &dyn TypeOracle, ty: Token) -> Token {
    if oracle.type_kind(ty) == TypeKind::ByRef {
        return match oracle.element_type(ty) {
            Some(elem) => oracle.byref_of(verification_type(oracle, elem)),
            None => ty,
        };
    }

    let reduced = reduced_type(oracle, ty);
    match oracle.type_kind(reduced) {
        TypeKind::Bool => oracle.well_known(WellKnown::SByte),
        TypeKind::Char => oracle.well_known(WellKnown::Int16),
        _ => reduced,
    }
}

/// ECMA-335 I.8.7 intermediate type.
///
/// The verification type widened to what actually occupies a stack slot:
/// small integers become `Int32`, both float widths become `Double`.
#[must_use]
pub fn intermediate_type(oracle: &dyn TypeOracle, ty: Token) -> Token {
    let verification = verification_type(oracle, ty);
    match oracle.type_kind(verification) {
        TypeKind::I1 | TypeKind::I2 | TypeKind::I4 => oracle.well_known(WellKnown::Int32),
        TypeKind::R4 | TypeKind::R8 => oracle.well_known(WellKnown::Double),
        _ => verification,
    }
}

/// True if two types have the same verification type.
///
/// This is the element-type match used by `ldind.*`, `ldelem.*` and friends,
/// where signedness and Bool/Char distinctions do not matter.
#[must_use]
pub fn verification_types_match(oracle: &dyn TypeOracle, a: Token, b: Token) -> bool {
    a == b || verification_type(oracle, a) == verification_type(oracle, b)
}

/// Transitive interface closure of a type: every interface reachable through
/// its base chain and through interface extension, in discovery order.
fn interface_closure(oracle: &dyn TypeOracle, ty: Token) -> Vec<Token> {
    let mut closure = Vec::new();
    let mut visited: FxHashSet<Token> = FxHashSet::default();
    let mut queue = vec![ty];

    while let Some(current) = queue.pop() {
        if !visited.insert(current) {
            continue;
        }
        for interface in oracle.interfaces(current) {
            if !closure.contains(&interface) {
                closure.push(interface);
            }
            queue.push(interface);
        }
        if let Some(base) = oracle.base_type(current) {
            queue.push(base);
        }
    }

    closure
}

/// Base-type chain of a type, starting at the type itself.
fn base_chain(oracle: &dyn TypeOracle, ty: Token) -> Vec<Token> {
    let mut chain = vec![ty];
    let mut current = ty;
    while let Some(base) = oracle.base_type(current) {
        // Cut base-type cycles so the walk terminates on corrupt chains.
        if chain.contains(&base) {
            break;
        }
        chain.push(base);
        current = base;
    }
    chain
}

/// Merges two object reference types to their least common supertype.
///
/// Same type wins outright; arrays merge element-wise and fall back to
/// `System.Array` on rank or shape conflicts; generic parameters collapse to
/// the other side when assignable; interfaces resolve to the first shared
/// interface of the closures; classes meet at their least common ancestor;
/// `System.Object` is the final fallback.
#[must_use]
pub fn merge_object_refs(oracle: &dyn TypeOracle, a: Token, b: Token) -> Token {
    if a == b {
        return a;
    }

    let object = oracle.well_known(WellKnown::Object);
    let kind_a = oracle.type_kind(a);
    let kind_b = oracle.type_kind(b);

    if kind_a == TypeKind::Array && kind_b == TypeKind::Array {
        return merge_arrays(oracle, a, b);
    }

    if kind_a == TypeKind::GenericParameter {
        return if oracle.is_assignable_to(a, b) { b } else { object };
    }
    if kind_b == TypeKind::GenericParameter {
        return if oracle.is_assignable_to(b, a) { a } else { object };
    }

    if kind_a == TypeKind::Interface || kind_b == TypeKind::Interface {
        if oracle.is_assignable_to(b, a) {
            return a;
        }
        if oracle.is_assignable_to(a, b) {
            return b;
        }
        for interface in interface_closure(oracle, a) {
            if oracle.is_assignable_to(b, interface) {
                return interface;
            }
        }
        return object;
    }

    // Class vs class (String and array-vs-class meet here too, through the
    // base chain): least common ancestor.
    let chain_a = base_chain(oracle, a);
    for candidate in base_chain(oracle, b) {
        if chain_a.contains(&candidate) {
            return candidate;
        }
    }
    object
}

fn merge_arrays(oracle: &dyn TypeOracle, a: Token, b: Token) -> Token {
    let array = oracle.well_known(WellKnown::Array);

    let (Some(elem_a), Some(elem_b)) = (oracle.element_type(a), oracle.element_type(b)) else {
        return array;
    };

    let sz_a = oracle.is_sz_array(a);
    let sz_b = oracle.is_sz_array(b);
    let rank_a = oracle.array_rank(a);
    let rank_b = oracle.array_rank(b);

    if sz_a != sz_b || rank_a != rank_b {
        return array;
    }

    let merged_elem = if elem_a == elem_b {
        elem_a
    } else if oracle.type_kind(elem_a).is_object_reference()
        && oracle.type_kind(elem_b).is_object_reference()
    {
        merge_object_refs(oracle, elem_a, elem_b)
    } else {
        return array;
    };

    if sz_a {
        oracle.sz_array_of(merged_elem)
    } else {
        oracle.array_of(merged_elem, rank_a)
    }
}

/// Merges the flag sets of two compatible slots.
///
/// `read-only` is sticky (either side taints the result); `permanent-home`
/// and `this-pointer` only survive when both sides agree.
fn merge_flags(a: SlotFlags, b: SlotFlags) -> SlotFlags {
    let read_only = (a | b) & SlotFlags::READ_ONLY;
    let agreed = a & b & (SlotFlags::PERMANENT_HOME | SlotFlags::THIS_PTR);
    read_only | agreed
}

/// Joins two stack slots, or fails when no common supertype exists.
///
/// This is the per-slot operation behind entry-stack reconciliation. All
/// cross-kind merges fail except the null-reference case, which is absorbed
/// by any object reference.
#[must_use]
pub fn merge_slots(oracle: &dyn TypeOracle, a: &StackSlot, b: &StackSlot) -> Option<StackSlot> {
    if a.kind != b.kind {
        return None;
    }

    let flags = merge_flags(a.flags, b.flags);
    match a.kind {
        SlotKind::Int32 | SlotKind::Int64 | SlotKind::Float => Some(StackSlot {
            kind: a.kind,
            ty: None,
            method: None,
            flags,
        }),
        SlotKind::NativeInt => Some(StackSlot {
            kind: SlotKind::NativeInt,
            ty: None,
            // Two different method pointers merge to an anonymous native int
            method: if a.method == b.method { a.method } else { None },
            flags,
        }),
        SlotKind::ObjRef => {
            let ty = match (a.ty, b.ty) {
                (None, other) | (other, None) => other,
                (Some(ty_a), Some(ty_b)) => Some(merge_object_refs(oracle, ty_a, ty_b)),
            };
            Some(StackSlot {
                kind: SlotKind::ObjRef,
                ty,
                method: None,
                flags,
            })
        }
        SlotKind::ByRef => {
            if a.ty == b.ty {
                Some(StackSlot {
                    kind: SlotKind::ByRef,
                    ty: a.ty,
                    method: None,
                    flags,
                })
            } else {
                None
            }
        }
        SlotKind::Value => {
            if a.ty == b.ty {
                Some(StackSlot {
                    kind: SlotKind::Value,
                    ty: a.ty,
                    method: None,
                    flags,
                })
            } else {
                None
            }
        }
        SlotKind::Unknown => Some(StackSlot {
            kind: SlotKind::Unknown,
            ty: None,
            method: None,
            flags,
        }),
    }
}

/// Checks whether a stack slot may be stored into a location of the given
/// declared type (locals, arguments, fields, array elements, call arguments,
/// return values).
///
/// `allow_size_equivalence` enables the reduced-type relaxation used by the
/// indirect load/store family, where `int32` and `uint32` (and native-int
/// width-equivalents) are interchangeable.
#[must_use]
pub fn assignable_to_type(
    oracle: &dyn TypeOracle,
    slot: &StackSlot,
    target: Token,
    allow_size_equivalence: bool,
) -> bool {
    let target_slot = StackSlot::from_type(oracle, target);

    match target_slot.kind {
        SlotKind::Int32 => {
            slot.kind == SlotKind::Int32
                || (allow_size_equivalence && slot.kind == SlotKind::NativeInt)
        }
        SlotKind::Int64 => slot.kind == SlotKind::Int64,
        SlotKind::NativeInt => matches!(slot.kind, SlotKind::NativeInt | SlotKind::Int32),
        SlotKind::Float => slot.kind == SlotKind::Float,
        SlotKind::ObjRef => {
            slot.kind == SlotKind::ObjRef
                && match slot.ty {
                    None => true,
                    Some(source) => oracle.is_assignable_to(source, target),
                }
        }
        SlotKind::ByRef => {
            if slot.kind != SlotKind::ByRef || slot.flags.contains(SlotFlags::READ_ONLY) {
                return false;
            }
            let Some(target_elem) = target_slot.ty else {
                return false;
            };
            match slot.ty {
                Some(source_elem) => {
                    source_elem == target_elem
                        || (allow_size_equivalence
                            && reduced_type(oracle, source_elem)
                                == reduced_type(oracle, target_elem))
                }
                None => false,
            }
        }
        SlotKind::Value => {
            slot.kind == SlotKind::Value
                && match slot.ty {
                    Some(source) => {
                        source == target
                            || (allow_size_equivalence
                                && reduced_type(oracle, source) == reduced_type(oracle, target))
                    }
                    None => false,
                }
        }
        SlotKind::Unknown => false,
    }
}

/// The relaxed comparability relation of the comparison and equality opcodes.
///
/// `equality` is true for the `beq`/`bne.un`/`ceq`/`cgt.un` class, which
/// additionally admits object-reference pairs (the idiomatic null compare)
/// and by-ref vs native-int mixing.
#[must_use]
pub fn binary_comparable(a: &StackSlot, b: &StackSlot, equality: bool) -> bool {
    match (a.kind, b.kind) {
        (SlotKind::Int32, SlotKind::Int32)
        | (SlotKind::Int64, SlotKind::Int64)
        | (SlotKind::Float, SlotKind::Float)
        | (SlotKind::NativeInt, SlotKind::NativeInt)
        | (SlotKind::Int32, SlotKind::NativeInt)
        | (SlotKind::NativeInt, SlotKind::Int32)
        | (SlotKind::ByRef, SlotKind::ByRef) => true,
        (SlotKind::ObjRef, SlotKind::ObjRef)
        | (SlotKind::ByRef, SlotKind::NativeInt)
        | (SlotKind::NativeInt, SlotKind::ByRef) => equality,
        _ => false,
    }
}

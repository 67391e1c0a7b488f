//! Evaluation stack slot model.
//!
//! One slot of the abstract evaluation stack is a tagged variant over the
//! ECMA-335 I.12.3.2.1 stack kinds, with an optional attached type identity,
//! an optional method identity (for `ldftn` results), and an orthogonal flag
//! bitset. Flags are deliberately kept out of the variant tag: read-only-ness
//! and home-ness compose with every by-ref, not with a subset of kinds.

use std::fmt;

use bitflags::bitflags;

use crate::metadata::{Token, TypeKind, TypeOracle};

/// The evaluation-stack kind of a slot.
///
/// The CLI tracks fewer kinds on the stack than exist in signatures: all small
/// integers widen to `Int32`, both float widths collapse to `Float`, and every
/// heap reference is an `ObjRef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum SlotKind {
    /// 32-bit integer (also bool, char, and all small integers)
    Int32,
    /// 64-bit integer
    Int64,
    /// Native-sized integer (also pointers and function pointers)
    NativeInt,
    /// Floating point (`F` - width is not tracked on the stack)
    Float,
    /// Object reference; no type identity means the null reference
    ObjRef,
    /// Managed pointer to a storage location
    ByRef,
    /// A value type occupying the slot by value
    Value,
    /// No information (never produced by verifiable code paths)
    Unknown,
}

bitflags! {
    /// Orthogonal attributes of a stack slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SlotFlags: u8 {
        /// By-ref may not be written through (`readonly.` ldelema, merged paths)
        const READ_ONLY = 0x01;
        /// By-ref target outlives the current frame (field, element, boxed value)
        const PERMANENT_HOME = 0x02;
        /// The slot is the method's `this` pointer
        const THIS_PTR = 0x04;
    }
}

/// One slot of the abstract evaluation stack.
///
/// Equality compares kind, attached identities, and all flags; two slots from
/// different paths are compatible iff their lattice merge succeeds (see
/// [`crate::verifier::merge_slots`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot {
    /// Stack kind tag
    pub kind: SlotKind,
    /// Attached type identity. `ObjRef` without one is the null reference;
    /// numeric kinds usually carry none.
    pub ty: Option<Token>,
    /// Attached method identity for method pointers (`ldftn`/`ldvirtftn`)
    pub method: Option<Token>,
    /// Orthogonal attribute bits
    pub flags: SlotFlags,
}

impl StackSlot {
    const fn of(kind: SlotKind) -> Self {
        StackSlot {
            kind,
            ty: None,
            method: None,
            flags: SlotFlags::empty(),
        }
    }

    /// A plain 32-bit integer slot.
    #[must_use]
    pub const fn int32() -> Self {
        Self::of(SlotKind::Int32)
    }

    /// A plain 64-bit integer slot.
    #[must_use]
    pub const fn int64() -> Self {
        Self::of(SlotKind::Int64)
    }

    /// A plain native integer slot.
    #[must_use]
    pub const fn native_int() -> Self {
        Self::of(SlotKind::NativeInt)
    }

    /// A floating point slot.
    #[must_use]
    pub const fn float() -> Self {
        Self::of(SlotKind::Float)
    }

    /// The null object reference (an `ObjRef` with no type identity).
    #[must_use]
    pub const fn null_ref() -> Self {
        Self::of(SlotKind::ObjRef)
    }

    /// An object reference of the given type.
    #[must_use]
    pub fn obj_ref(ty: Token) -> Self {
        StackSlot {
            ty: Some(ty),
            ..Self::of(SlotKind::ObjRef)
        }
    }

    /// A managed pointer to a location of the given element type.
    #[must_use]
    pub fn byref(elem: Token, flags: SlotFlags) -> Self {
        StackSlot {
            ty: Some(elem),
            flags,
            ..Self::of(SlotKind::ByRef)
        }
    }

    /// A value type occupying the slot by value.
    #[must_use]
    pub fn value(ty: Token) -> Self {
        StackSlot {
            ty: Some(ty),
            ..Self::of(SlotKind::Value)
        }
    }

    /// A method pointer: native int with an attached method identity.
    #[must_use]
    pub fn method_ptr(method: Token) -> Self {
        StackSlot {
            method: Some(method),
            ..Self::of(SlotKind::NativeInt)
        }
    }

    /// Maps a declared type onto its initial stack slot (ECMA-335 I.12.3.2.1).
    ///
    /// Enums take the slot of their underlying type; unconstrained generic
    /// parameters are tracked by value; everything heap-shaped becomes an
    /// object reference carrying its type identity.
    #[must_use]
    pub fn from_type(oracle: &dyn TypeOracle, ty: Token) -> Self {
        match oracle.type_kind(ty) {
            TypeKind::Bool
            | TypeKind::Char
            | TypeKind::I1
            | TypeKind::U1
            | TypeKind::I2
            | TypeKind::U2
            | TypeKind::I4
            | TypeKind::U4 => Self::int32(),
            TypeKind::I8 | TypeKind::U8 => Self::int64(),
            TypeKind::R4 | TypeKind::R8 => Self::float(),
            TypeKind::I | TypeKind::U | TypeKind::Pointer | TypeKind::FnPtr => Self::native_int(),
            TypeKind::Enum => match oracle.enum_underlying(ty) {
                Some(underlying) => Self::from_type(oracle, underlying),
                None => Self::int32(),
            },
            TypeKind::ByRef => match oracle.element_type(ty) {
                Some(elem) => Self::byref(elem, SlotFlags::empty()),
                None => Self::of(SlotKind::Unknown),
            },
            TypeKind::ValueType | TypeKind::GenericParameter => Self::value(ty),
            TypeKind::Object
            | TypeKind::String
            | TypeKind::Class
            | TypeKind::Interface
            | TypeKind::Array => Self::obj_ref(ty),
            TypeKind::Void => Self::of(SlotKind::Unknown),
        }
    }

    /// True if this is the null object reference.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.kind == SlotKind::ObjRef && self.ty.is_none()
    }

    /// True if the slot is an integer kind (Int32, Int64, NativeInt).
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind,
            SlotKind::Int32 | SlotKind::Int64 | SlotKind::NativeInt
        )
    }

    /// True if the slot is numeric (integer or float).
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.kind == SlotKind::Float
    }

    /// Returns a copy with the given flags added.
    #[must_use]
    pub fn with_flags(mut self, flags: SlotFlags) -> Self {
        self.flags |= flags;
        self
    }
}

impl fmt::Display for StackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.ty) {
            (SlotKind::ObjRef, None) => write!(f, "null")?,
            (_, Some(ty)) => write!(f, "{}<{ty}>", self.kind)?,
            (_, None) => write!(f, "{}", self.kind)?,
        }
        if self.flags.contains(SlotFlags::READ_ONLY) {
            write!(f, " readonly")?;
        }
        Ok(())
    }
}

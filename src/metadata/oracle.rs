//! Type system oracle consumed by the verifier.
//!
//! The verifier never inspects metadata blobs itself. Every reflective question
//! about a type, method, or field is routed through the [`TypeOracle`] trait,
//! which a host implements over its own metadata representation. All queries
//! are answerable from metadata alone - no runtime-only capability is required -
//! so offline (disk-based) and online (runtime) backends are equally valid.
//!
//! # Key Components
//!
//! - [`TypeOracle`] - the reflective query surface
//! - [`TypeKind`] - classification of a type token, close to the element-type
//!   taxonomy of ECMA-335 II.23.1.16
//! - [`WellKnown`] - the system types the verifier must be able to name
//! - [`MemberVisibility`] - ECMA-335 II.23.1.10 accessibility values
//!
//! # Derived types
//!
//! Three constructors ([`TypeOracle::byref_of`], [`TypeOracle::sz_array_of`],
//! [`TypeOracle::array_of`]) intern derived types on demand. Stack-state merging
//! rebuilds array types from merged element types, and the ECMA-335 I.8.7
//! verification type of a by-ref is a by-ref of a verification type, so pure
//! queries alone cannot express the results. Implementations must intern:
//! requesting the same derived type twice must yield the same token.

use crate::metadata::token::Token;

/// Classification of a type token.
///
/// This is the answer to the oracle's `kind` query and drives the mapping from
/// declared types onto evaluation-stack slots. The primitive names follow the
/// ECMA-335 element-type mnemonics (`I4` = `System.Int32`, `R8` =
/// `System.Double`, `I` = `System.IntPtr`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// `System.Void` - only valid as a return type
    Void,
    /// `System.Boolean`
    Bool,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.IntPtr`
    I,
    /// `System.UIntPtr`
    U,
    /// An enum type; the oracle reports its underlying primitive separately
    Enum,
    /// An unmanaged pointer type
    Pointer,
    /// A function pointer type
    FnPtr,
    /// A managed pointer (by-ref); the oracle reports its element type
    ByRef,
    /// Any array type, single- or multi-dimensional
    Array,
    /// A reference type that is not one of the special kinds below
    Class,
    /// An interface type
    Interface,
    /// A user-defined value type
    ValueType,
    /// An uninstantiated generic type or method parameter
    GenericParameter,
    /// `System.Object` itself
    Object,
    /// `System.String` itself
    String,
}

impl TypeKind {
    /// Returns true for kinds whose values live on the heap and are tracked
    /// as object references on the evaluation stack.
    #[must_use]
    pub fn is_object_reference(&self) -> bool {
        matches!(
            self,
            TypeKind::Object
                | TypeKind::String
                | TypeKind::Class
                | TypeKind::Interface
                | TypeKind::Array
        )
    }

    /// Returns true for the built-in numeric and character primitives
    /// (everything that maps onto the Int32/Int64/NativeInt/Float stack kinds).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            TypeKind::Bool
                | TypeKind::Char
                | TypeKind::I1
                | TypeKind::U1
                | TypeKind::I2
                | TypeKind::U2
                | TypeKind::I4
                | TypeKind::U4
                | TypeKind::I8
                | TypeKind::U8
                | TypeKind::R4
                | TypeKind::R8
                | TypeKind::I
                | TypeKind::U
        )
    }
}

/// System types the verifier needs to materialize without a token in hand.
///
/// Hosts resolve these to the tokens of their core library. The verifier uses
/// them for type normalization targets (`SByte`, `Int16`, `Int32`, `Int64`,
/// `IntPtr`, `Double`), merge fallbacks (`Object`, `Array`), exception handler
/// seeds (`Exception`), and the handle/reference value types pushed by
/// `ldtoken`, `arglist` and the typed-reference instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum WellKnown {
    Boolean,
    Char,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    IntPtr,
    UIntPtr,
    Single,
    Double,
    Object,
    String,
    Array,
    ValueType,
    Enum,
    Exception,
    TypedReference,
    RuntimeTypeHandle,
    RuntimeMethodHandle,
    RuntimeFieldHandle,
    RuntimeArgumentHandle,
    Void,
}

/// Member accessibility per ECMA-335 II.23.1.10 (fields) and II.23.1.15
/// (methods).
///
/// The verifier evaluates accessibility itself (`MethodAccess` / `FieldAccess`
/// failures); the oracle only reports the declared value plus assembly
/// identity via [`TypeOracle::same_assembly`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberVisibility {
    /// Member not referenceable from IL (compiler-controlled)
    CompilerControlled,
    /// Accessible only within the declaring type
    Private,
    /// Accessible to derived types within the same assembly
    FamilyAndAssembly,
    /// Accessible within the declaring assembly
    Assembly,
    /// Accessible to derived types
    Family,
    /// Accessible to derived types or within the declaring assembly
    FamilyOrAssembly,
    /// Accessible everywhere
    Public,
}

/// Resolution of a `MemberRef` token into its actual member class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// The token resolves to a method
    Method,
    /// The token resolves to a field
    Field,
}

/// Reflective type system queries the verifier consumes.
///
/// One oracle instance answers for the whole type universe visible to the
/// method under verification, including types from other assemblies. All
/// methods must respond synchronously; the verifier calls them on its hot
/// path. Implementations must be pure: repeated queries with the same
/// arguments yield the same answers for the lifetime of a verification call.
pub trait TypeOracle {
    /// Classifies a type token.
    fn type_kind(&self, ty: Token) -> TypeKind;

    /// Element type of a by-ref, pointer, or array type. `None` for others.
    fn element_type(&self, ty: Token) -> Option<Token>;

    /// Rank (number of dimensions) of an array type; 0 for non-arrays.
    fn array_rank(&self, ty: Token) -> u32;

    /// True if `ty` is a single-dimensional, zero-lower-bound array (`T[]`).
    fn is_sz_array(&self, ty: Token) -> bool;

    /// Underlying primitive of an enum type. `None` for non-enums.
    fn enum_underlying(&self, ty: Token) -> Option<Token>;

    /// Direct base type. `None` for `System.Object`, interfaces without a
    /// base, and non-class kinds.
    fn base_type(&self, ty: Token) -> Option<Token>;

    /// Interfaces directly implemented (or extended) by `ty`, in metadata
    /// order. Transitive closure is computed by the verifier where needed.
    fn interfaces(&self, ty: Token) -> Vec<Token>;

    /// Full transitive assignability: base chains, interface implementation,
    /// array covariance - whatever the host runtime's `IsAssignableFrom`
    /// answers from metadata.
    fn is_assignable_to(&self, from: Token, to: Token) -> bool;

    /// True if the type is declared abstract.
    fn is_abstract_type(&self, ty: Token) -> bool;

    /// True if both tokens were defined in the same assembly.
    fn same_assembly(&self, a: Token, b: Token) -> bool;

    /// Resolves a well-known system type to its token.
    fn well_known(&self, which: WellKnown) -> Token;

    /// Interns the managed-pointer type `&elem`.
    fn byref_of(&self, elem: Token) -> Token;

    /// Interns the single-dimensional array type `elem[]`.
    fn sz_array_of(&self, elem: Token) -> Token;

    /// Interns the general array type of `elem` with the given rank.
    fn array_of(&self, elem: Token, rank: u32) -> Token;

    /// Resolves a `MemberRef` token to a method or a field.
    fn member_kind(&self, member: Token) -> MemberKind;

    /// Declared parameter types of a method, without any implicit `this`.
    fn method_params(&self, method: Token) -> Vec<Token>;

    /// Declared return type; the `Void` well-known token for void methods.
    fn method_return(&self, method: Token) -> Token;

    /// True if the method has no `this` parameter.
    fn method_is_static(&self, method: Token) -> bool;

    /// True if the method is declared abstract.
    fn method_is_abstract(&self, method: Token) -> bool;

    /// True if the method is virtual (newslot or override).
    fn method_is_virtual(&self, method: Token) -> bool;

    /// True if the method is an instance constructor (`.ctor`).
    fn method_is_constructor(&self, method: Token) -> bool;

    /// The type that declares the method.
    fn method_declaring_type(&self, method: Token) -> Token;

    /// Declared accessibility of the method.
    fn method_visibility(&self, method: Token) -> MemberVisibility;

    /// Declared type of a field.
    fn field_type(&self, field: Token) -> Token;

    /// True if the field is static.
    fn field_is_static(&self, field: Token) -> bool;

    /// The type that declares the field.
    fn field_declaring_type(&self, field: Token) -> Token;

    /// Declared accessibility of the field.
    fn field_visibility(&self, field: Token) -> MemberVisibility;
}

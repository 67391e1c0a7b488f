//! Shared functionality which is used in unit-tests.
//!
//! [`TestUniverse`] is a hand-wired metadata universe implementing both
//! service traits the verifier consumes. It seeds the well-known system
//! types, mints tokens with realistic table bytes, interns derived types on
//! demand, and lets tests declare classes, interfaces, methods, fields, and
//! method bodies with a few calls.

use std::cell::RefCell;

use rustc_hash::FxHashMap;

use crate::{
    metadata::{
        BytecodeProvider, ExceptionRegion, MemberKind, MemberVisibility, Token, TypeKind,
        TypeOracle, WellKnown,
    },
    Result,
};

#[derive(Clone)]
struct TypeEntry {
    #[allow(dead_code)]
    name: String,
    kind: TypeKind,
    base: Option<Token>,
    interfaces: Vec<Token>,
    element: Option<Token>,
    rank: u32,
    sz: bool,
    underlying: Option<Token>,
    is_abstract: bool,
    assembly: u32,
}

impl TypeEntry {
    fn new(name: &str, kind: TypeKind, base: Option<Token>) -> Self {
        TypeEntry {
            name: name.to_string(),
            kind,
            base,
            interfaces: Vec::new(),
            element: None,
            rank: 0,
            sz: false,
            underlying: None,
            is_abstract: false,
            assembly: 0,
        }
    }
}

#[derive(Clone)]
struct MethodEntry {
    #[allow(dead_code)]
    name: String,
    declaring: Token,
    params: Vec<Token>,
    ret: Token,
    is_static: bool,
    is_virtual: bool,
    is_abstract: bool,
    is_ctor: bool,
    visibility: MemberVisibility,
}

#[derive(Clone)]
struct FieldEntry {
    declaring: Token,
    ty: Token,
    is_static: bool,
    visibility: MemberVisibility,
}

/// A method body with header facts, as the bytecode provider reports them.
#[derive(Clone)]
pub(crate) struct MethodBody {
    pub il: Vec<u8>,
    pub locals: Vec<Token>,
    pub max_stack: u32,
    pub init_locals: bool,
    pub vararg: bool,
    pub regions: Vec<ExceptionRegion>,
}

impl Default for MethodBody {
    fn default() -> Self {
        MethodBody {
            il: Vec::new(),
            locals: Vec::new(),
            max_stack: 16,
            init_locals: true,
            vararg: false,
            regions: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum DerivedKey {
    ByRef(Token),
    Array(Token, u32, bool),
}

/// Hand-wired type/method/field universe behind the two verifier services.
pub(crate) struct TestUniverse {
    types: RefCell<Vec<TypeEntry>>,
    derived: RefCell<FxHashMap<DerivedKey, Token>>,
    methods: Vec<MethodEntry>,
    fields: Vec<FieldEntry>,
    bodies: FxHashMap<Token, MethodBody>,
    well_known: FxHashMap<WellKnown, Token>,
}

fn type_token(index: usize) -> Token {
    Token::new(0x0200_0000 + index as u32 + 1)
}

fn method_token(index: usize) -> Token {
    Token::new(0x0600_0000 + index as u32 + 1)
}

fn field_token(index: usize) -> Token {
    Token::new(0x0400_0000 + index as u32 + 1)
}

impl TestUniverse {
    pub fn new() -> Self {
        let mut universe = TestUniverse {
            types: RefCell::new(Vec::new()),
            derived: RefCell::new(FxHashMap::default()),
            methods: Vec::new(),
            fields: Vec::new(),
            bodies: FxHashMap::default(),
            well_known: FxHashMap::default(),
        };

        let object = universe.add_type(TypeEntry::new("System.Object", TypeKind::Object, None));
        universe.well_known.insert(WellKnown::Object, object);

        let value_type = universe.add_type(TypeEntry::new(
            "System.ValueType",
            TypeKind::Class,
            Some(object),
        ));
        universe.well_known.insert(WellKnown::ValueType, value_type);

        let enum_base =
            universe.add_type(TypeEntry::new("System.Enum", TypeKind::Class, Some(value_type)));
        universe.well_known.insert(WellKnown::Enum, enum_base);

        let seed = [
            (WellKnown::String, "System.String", TypeKind::String, object),
            (WellKnown::Array, "System.Array", TypeKind::Class, object),
            (
                WellKnown::Exception,
                "System.Exception",
                TypeKind::Class,
                object,
            ),
            (WellKnown::Void, "System.Void", TypeKind::Void, value_type),
            (
                WellKnown::Boolean,
                "System.Boolean",
                TypeKind::Bool,
                value_type,
            ),
            (WellKnown::Char, "System.Char", TypeKind::Char, value_type),
            (WellKnown::SByte, "System.SByte", TypeKind::I1, value_type),
            (WellKnown::Byte, "System.Byte", TypeKind::U1, value_type),
            (WellKnown::Int16, "System.Int16", TypeKind::I2, value_type),
            (
                WellKnown::UInt16,
                "System.UInt16",
                TypeKind::U2,
                value_type,
            ),
            (WellKnown::Int32, "System.Int32", TypeKind::I4, value_type),
            (
                WellKnown::UInt32,
                "System.UInt32",
                TypeKind::U4,
                value_type,
            ),
            (WellKnown::Int64, "System.Int64", TypeKind::I8, value_type),
            (
                WellKnown::UInt64,
                "System.UInt64",
                TypeKind::U8,
                value_type,
            ),
            (WellKnown::IntPtr, "System.IntPtr", TypeKind::I, value_type),
            (
                WellKnown::UIntPtr,
                "System.UIntPtr",
                TypeKind::U,
                value_type,
            ),
            (
                WellKnown::Single,
                "System.Single",
                TypeKind::R4,
                value_type,
            ),
            (
                WellKnown::Double,
                "System.Double",
                TypeKind::R8,
                value_type,
            ),
            (
                WellKnown::TypedReference,
                "System.TypedReference",
                TypeKind::ValueType,
                value_type,
            ),
            (
                WellKnown::RuntimeTypeHandle,
                "System.RuntimeTypeHandle",
                TypeKind::ValueType,
                value_type,
            ),
            (
                WellKnown::RuntimeMethodHandle,
                "System.RuntimeMethodHandle",
                TypeKind::ValueType,
                value_type,
            ),
            (
                WellKnown::RuntimeFieldHandle,
                "System.RuntimeFieldHandle",
                TypeKind::ValueType,
                value_type,
            ),
            (
                WellKnown::RuntimeArgumentHandle,
                "System.RuntimeArgumentHandle",
                TypeKind::ValueType,
                value_type,
            ),
        ];
        for (which, name, kind, base) in seed {
            let token = universe.add_type(TypeEntry::new(name, kind, Some(base)));
            universe.well_known.insert(which, token);
        }

        universe
    }

    fn add_type(&mut self, entry: TypeEntry) -> Token {
        let mut types = self.types.borrow_mut();
        types.push(entry);
        type_token(types.len() - 1)
    }

    fn entry(&self, ty: Token) -> TypeEntry {
        let index = (ty.row() - 1) as usize;
        self.types.borrow()[index].clone()
    }

    // ── Well-known accessors ───────────────────────────────────────────────

    pub fn object(&self) -> Token {
        self.well_known[&WellKnown::Object]
    }
    pub fn string(&self) -> Token {
        self.well_known[&WellKnown::String]
    }
    pub fn void(&self) -> Token {
        self.well_known[&WellKnown::Void]
    }
    pub fn boolean(&self) -> Token {
        self.well_known[&WellKnown::Boolean]
    }
    pub fn char(&self) -> Token {
        self.well_known[&WellKnown::Char]
    }
    pub fn sbyte(&self) -> Token {
        self.well_known[&WellKnown::SByte]
    }
    pub fn byte(&self) -> Token {
        self.well_known[&WellKnown::Byte]
    }
    pub fn int16(&self) -> Token {
        self.well_known[&WellKnown::Int16]
    }
    pub fn uint16(&self) -> Token {
        self.well_known[&WellKnown::UInt16]
    }
    pub fn int32(&self) -> Token {
        self.well_known[&WellKnown::Int32]
    }
    pub fn uint32(&self) -> Token {
        self.well_known[&WellKnown::UInt32]
    }
    pub fn int64(&self) -> Token {
        self.well_known[&WellKnown::Int64]
    }
    pub fn uint64(&self) -> Token {
        self.well_known[&WellKnown::UInt64]
    }
    pub fn intptr(&self) -> Token {
        self.well_known[&WellKnown::IntPtr]
    }
    pub fn uintptr(&self) -> Token {
        self.well_known[&WellKnown::UIntPtr]
    }
    pub fn single(&self) -> Token {
        self.well_known[&WellKnown::Single]
    }
    pub fn double(&self) -> Token {
        self.well_known[&WellKnown::Double]
    }

    // ── Type builders ──────────────────────────────────────────────────────

    pub fn class(&mut self, name: &str, base: Token) -> Token {
        self.add_type(TypeEntry::new(name, TypeKind::Class, Some(base)))
    }

    pub fn abstract_class(&mut self, name: &str, base: Token) -> Token {
        let mut entry = TypeEntry::new(name, TypeKind::Class, Some(base));
        entry.is_abstract = true;
        self.add_type(entry)
    }

    pub fn interface(&mut self, name: &str) -> Token {
        self.add_type(TypeEntry::new(name, TypeKind::Interface, None))
    }

    pub fn value_type(&mut self, name: &str) -> Token {
        let value_type = self.well_known[&WellKnown::ValueType];
        self.add_type(TypeEntry::new(name, TypeKind::ValueType, Some(value_type)))
    }

    pub fn enum_type(&mut self, name: &str, underlying: Token) -> Token {
        let enum_base = self.well_known[&WellKnown::Enum];
        let mut entry = TypeEntry::new(name, TypeKind::Enum, Some(enum_base));
        entry.underlying = Some(underlying);
        self.add_type(entry)
    }

    pub fn generic_param(&mut self, name: &str) -> Token {
        self.add_type(TypeEntry::new(name, TypeKind::GenericParameter, None))
    }

    pub fn implements(&mut self, ty: Token, interface: Token) {
        let index = (ty.row() - 1) as usize;
        self.types.borrow_mut()[index].interfaces.push(interface);
    }

    fn intern_derived(&self, key: DerivedKey, entry: TypeEntry) -> Token {
        if let Some(&token) = self.derived.borrow().get(&key) {
            return token;
        }
        let token = {
            let mut types = self.types.borrow_mut();
            types.push(entry);
            type_token(types.len() - 1)
        };
        self.derived.borrow_mut().insert(key, token);
        token
    }

    // ── Method and field builders ──────────────────────────────────────────

    fn add_method(&mut self, entry: MethodEntry) -> Token {
        self.methods.push(entry);
        method_token(self.methods.len() - 1)
    }

    pub fn static_method(&mut self, name: &str, params: &[Token], ret: Token) -> Token {
        let declaring = self.object();
        self.add_method(MethodEntry {
            name: name.to_string(),
            declaring,
            params: params.to_vec(),
            ret,
            is_static: true,
            is_virtual: false,
            is_abstract: false,
            is_ctor: false,
            visibility: MemberVisibility::Public,
        })
    }

    pub fn instance_method(
        &mut self,
        declaring: Token,
        name: &str,
        params: &[Token],
        ret: Token,
    ) -> Token {
        self.add_method(MethodEntry {
            name: name.to_string(),
            declaring,
            params: params.to_vec(),
            ret,
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            is_ctor: false,
            visibility: MemberVisibility::Public,
        })
    }

    pub fn virtual_method(
        &mut self,
        declaring: Token,
        name: &str,
        params: &[Token],
        ret: Token,
    ) -> Token {
        self.add_method(MethodEntry {
            name: name.to_string(),
            declaring,
            params: params.to_vec(),
            ret,
            is_static: false,
            is_virtual: true,
            is_abstract: false,
            is_ctor: false,
            visibility: MemberVisibility::Public,
        })
    }

    pub fn private_method(&mut self, declaring: Token, name: &str, ret: Token) -> Token {
        self.add_method(MethodEntry {
            name: name.to_string(),
            declaring,
            params: Vec::new(),
            ret,
            is_static: true,
            is_virtual: false,
            is_abstract: false,
            is_ctor: false,
            visibility: MemberVisibility::Private,
        })
    }

    pub fn ctor(&mut self, declaring: Token, params: &[Token]) -> Token {
        let void = self.void();
        self.add_method(MethodEntry {
            name: ".ctor".to_string(),
            declaring,
            params: params.to_vec(),
            ret: void,
            is_static: false,
            is_virtual: false,
            is_abstract: false,
            is_ctor: true,
            visibility: MemberVisibility::Public,
        })
    }

    pub fn static_field(&mut self, declaring: Token, ty: Token) -> Token {
        self.fields.push(FieldEntry {
            declaring,
            ty,
            is_static: true,
            visibility: MemberVisibility::Public,
        });
        field_token(self.fields.len() - 1)
    }

    pub fn field(&mut self, declaring: Token, ty: Token) -> Token {
        self.fields.push(FieldEntry {
            declaring,
            ty,
            is_static: false,
            visibility: MemberVisibility::Public,
        });
        field_token(self.fields.len() - 1)
    }

    pub fn private_field(&mut self, declaring: Token, ty: Token) -> Token {
        self.fields.push(FieldEntry {
            declaring,
            ty,
            is_static: false,
            visibility: MemberVisibility::Private,
        });
        field_token(self.fields.len() - 1)
    }

    pub fn set_body(&mut self, method: Token, il: Vec<u8>, regions: &[ExceptionRegion]) {
        self.bodies.insert(
            method,
            MethodBody {
                il,
                regions: regions.to_vec(),
                ..MethodBody::default()
            },
        );
    }

    pub fn set_full_body(&mut self, method: Token, body: MethodBody) {
        self.bodies.insert(method, body);
    }

    fn method_entry(&self, method: Token) -> MethodEntry {
        self.methods[(method.row() - 1) as usize].clone()
    }

    fn field_entry(&self, field: Token) -> FieldEntry {
        self.fields[(field.row() - 1) as usize].clone()
    }
}

impl TypeOracle for TestUniverse {
    fn type_kind(&self, ty: Token) -> TypeKind {
        self.entry(ty).kind
    }

    fn element_type(&self, ty: Token) -> Option<Token> {
        self.entry(ty).element
    }

    fn array_rank(&self, ty: Token) -> u32 {
        self.entry(ty).rank
    }

    fn is_sz_array(&self, ty: Token) -> bool {
        self.entry(ty).sz
    }

    fn enum_underlying(&self, ty: Token) -> Option<Token> {
        self.entry(ty).underlying
    }

    fn base_type(&self, ty: Token) -> Option<Token> {
        self.entry(ty).base
    }

    fn interfaces(&self, ty: Token) -> Vec<Token> {
        self.entry(ty).interfaces
    }

    fn is_assignable_to(&self, from: Token, to: Token) -> bool {
        if from == to {
            return true;
        }

        // Everything reference-shaped is assignable to Object.
        if self.type_kind(to) == TypeKind::Object && self.type_kind(from).is_object_reference() {
            return true;
        }

        // Base chain.
        let mut current = self.base_type(from);
        while let Some(base) = current {
            if base == to {
                return true;
            }
            current = self.base_type(base);
        }

        // Interface closure across the base chain.
        let mut queue = vec![from];
        let mut seen = Vec::new();
        while let Some(ty) = queue.pop() {
            if seen.contains(&ty) {
                continue;
            }
            seen.push(ty);
            for interface in self.interfaces(ty) {
                if interface == to {
                    return true;
                }
                queue.push(interface);
            }
            if let Some(base) = self.base_type(ty) {
                queue.push(base);
            }
        }

        // SZ-array covariance over reference elements.
        if self.type_kind(from) == TypeKind::Array
            && self.type_kind(to) == TypeKind::Array
            && self.is_sz_array(from)
            && self.is_sz_array(to)
        {
            if let (Some(from_elem), Some(to_elem)) =
                (self.element_type(from), self.element_type(to))
            {
                return self.type_kind(from_elem).is_object_reference()
                    && self.is_assignable_to(from_elem, to_elem);
            }
        }

        false
    }

    fn is_abstract_type(&self, ty: Token) -> bool {
        self.entry(ty).is_abstract
    }

    fn same_assembly(&self, a: Token, b: Token) -> bool {
        self.entry(a).assembly == self.entry(b).assembly
    }

    fn well_known(&self, which: WellKnown) -> Token {
        self.well_known[&which]
    }

    fn byref_of(&self, elem: Token) -> Token {
        let mut entry = TypeEntry::new("<byref>", TypeKind::ByRef, None);
        entry.element = Some(elem);
        self.intern_derived(DerivedKey::ByRef(elem), entry)
    }

    fn sz_array_of(&self, elem: Token) -> Token {
        let array_base = self.well_known[&WellKnown::Array];
        let mut entry = TypeEntry::new("<szarray>", TypeKind::Array, Some(array_base));
        entry.element = Some(elem);
        entry.rank = 1;
        entry.sz = true;
        self.intern_derived(DerivedKey::Array(elem, 1, true), entry)
    }

    fn array_of(&self, elem: Token, rank: u32) -> Token {
        let array_base = self.well_known[&WellKnown::Array];
        let mut entry = TypeEntry::new("<array>", TypeKind::Array, Some(array_base));
        entry.element = Some(elem);
        entry.rank = rank;
        entry.sz = false;
        self.intern_derived(DerivedKey::Array(elem, rank, false), entry)
    }

    fn member_kind(&self, _member: Token) -> MemberKind {
        MemberKind::Method
    }

    fn method_params(&self, method: Token) -> Vec<Token> {
        self.method_entry(method).params
    }

    fn method_return(&self, method: Token) -> Token {
        self.method_entry(method).ret
    }

    fn method_is_static(&self, method: Token) -> bool {
        self.method_entry(method).is_static
    }

    fn method_is_abstract(&self, method: Token) -> bool {
        self.method_entry(method).is_abstract
    }

    fn method_is_virtual(&self, method: Token) -> bool {
        self.method_entry(method).is_virtual
    }

    fn method_is_constructor(&self, method: Token) -> bool {
        self.method_entry(method).is_ctor
    }

    fn method_declaring_type(&self, method: Token) -> Token {
        self.method_entry(method).declaring
    }

    fn method_visibility(&self, method: Token) -> MemberVisibility {
        self.method_entry(method).visibility
    }

    fn field_type(&self, field: Token) -> Token {
        self.field_entry(field).ty
    }

    fn field_is_static(&self, field: Token) -> bool {
        self.field_entry(field).is_static
    }

    fn field_declaring_type(&self, field: Token) -> Token {
        self.field_entry(field).declaring
    }

    fn field_visibility(&self, field: Token) -> MemberVisibility {
        self.field_entry(field).visibility
    }
}

impl BytecodeProvider for TestUniverse {
    fn il_bytes(&self, method: Token) -> Result<Vec<u8>> {
        match self.bodies.get(&method) {
            Some(body) => Ok(body.il.clone()),
            None => Err(malformed_error!("no body registered for {}", method)),
        }
    }

    fn locals(&self, method: Token) -> Vec<Token> {
        self.bodies
            .get(&method)
            .map(|body| body.locals.clone())
            .unwrap_or_default()
    }

    fn exception_regions(&self, method: Token) -> Vec<ExceptionRegion> {
        self.bodies
            .get(&method)
            .map(|body| body.regions.clone())
            .unwrap_or_default()
    }

    fn max_stack(&self, method: Token) -> u32 {
        self.bodies.get(&method).map_or(8, |body| body.max_stack)
    }

    fn init_locals(&self, method: Token) -> bool {
        self.bodies.get(&method).map_or(true, |body| body.init_locals)
    }

    fn is_vararg(&self, method: Token) -> bool {
        self.bodies
            .get(&method)
            .map_or(false, |body| body.vararg)
    }
}

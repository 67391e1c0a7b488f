//! A small hand-wired metadata universe implementing the verifier's service
//! traits through the public API, shared by the integration scenarios.

use std::cell::RefCell;
use std::collections::HashMap;

use cilverify::prelude::*;

#[derive(Clone)]
struct TypeEntry {
    kind: TypeKind,
    base: Option<Token>,
    interfaces: Vec<Token>,
    element: Option<Token>,
    rank: u32,
    sz: bool,
    underlying: Option<Token>,
    is_abstract: bool,
}

#[derive(Clone)]
struct MethodEntry {
    declaring: Token,
    params: Vec<Token>,
    ret: Token,
    is_static: bool,
    is_ctor: bool,
}

/// A method body plus the header facts the provider reports.
#[derive(Clone)]
pub struct Body {
    pub il: Vec<u8>,
    pub locals: Vec<Token>,
    pub max_stack: u32,
    pub init_locals: bool,
    pub vararg: bool,
    pub regions: Vec<ExceptionRegion>,
}

impl Default for Body {
    fn default() -> Self {
        Body {
            il: Vec::new(),
            locals: Vec::new(),
            max_stack: 16,
            init_locals: true,
            vararg: false,
            regions: Vec::new(),
        }
    }
}

/// Fixture universe: well-known system types plus whatever a scenario adds.
pub struct Universe {
    types: RefCell<Vec<TypeEntry>>,
    derived: RefCell<HashMap<(Token, u32, bool), Token>>,
    byrefs: RefCell<HashMap<Token, Token>>,
    methods: Vec<MethodEntry>,
    bodies: HashMap<Token, Body>,
    well_known: HashMap<WellKnown, Token>,
}

fn type_token(index: usize) -> Token {
    Token::new(0x0200_0000 + index as u32 + 1)
}

impl Universe {
    pub fn new() -> Self {
        let mut universe = Universe {
            types: RefCell::new(Vec::new()),
            derived: RefCell::new(HashMap::new()),
            byrefs: RefCell::new(HashMap::new()),
            methods: Vec::new(),
            bodies: HashMap::new(),
            well_known: HashMap::new(),
        };

        let object = universe.push_type(TypeEntry {
            kind: TypeKind::Object,
            base: None,
            interfaces: Vec::new(),
            element: None,
            rank: 0,
            sz: false,
            underlying: None,
            is_abstract: false,
        });
        universe.well_known.insert(WellKnown::Object, object);

        let value_type = universe.named(TypeKind::Class, object);
        universe.well_known.insert(WellKnown::ValueType, value_type);
        let enum_base = universe.named(TypeKind::Class, value_type);
        universe.well_known.insert(WellKnown::Enum, enum_base);

        let seed = [
            (WellKnown::String, TypeKind::String, object),
            (WellKnown::Array, TypeKind::Class, object),
            (WellKnown::Exception, TypeKind::Class, object),
            (WellKnown::Void, TypeKind::Void, value_type),
            (WellKnown::Boolean, TypeKind::Bool, value_type),
            (WellKnown::Char, TypeKind::Char, value_type),
            (WellKnown::SByte, TypeKind::I1, value_type),
            (WellKnown::Byte, TypeKind::U1, value_type),
            (WellKnown::Int16, TypeKind::I2, value_type),
            (WellKnown::UInt16, TypeKind::U2, value_type),
            (WellKnown::Int32, TypeKind::I4, value_type),
            (WellKnown::UInt32, TypeKind::U4, value_type),
            (WellKnown::Int64, TypeKind::I8, value_type),
            (WellKnown::UInt64, TypeKind::U8, value_type),
            (WellKnown::IntPtr, TypeKind::I, value_type),
            (WellKnown::UIntPtr, TypeKind::U, value_type),
            (WellKnown::Single, TypeKind::R4, value_type),
            (WellKnown::Double, TypeKind::R8, value_type),
            (WellKnown::TypedReference, TypeKind::ValueType, value_type),
            (WellKnown::RuntimeTypeHandle, TypeKind::ValueType, value_type),
            (
                WellKnown::RuntimeMethodHandle,
                TypeKind::ValueType,
                value_type,
            ),
            (
                WellKnown::RuntimeFieldHandle,
                TypeKind::ValueType,
                value_type,
            ),
            (
                WellKnown::RuntimeArgumentHandle,
                TypeKind::ValueType,
                value_type,
            ),
        ];
        for (which, kind, base) in seed {
            let token = universe.named(kind, base);
            universe.well_known.insert(which, token);
        }

        universe
    }

    fn push_type(&mut self, entry: TypeEntry) -> Token {
        let mut types = self.types.borrow_mut();
        types.push(entry);
        type_token(types.len() - 1)
    }

    fn named(&mut self, kind: TypeKind, base: Token) -> Token {
        self.push_type(TypeEntry {
            kind,
            base: Some(base),
            interfaces: Vec::new(),
            element: None,
            rank: 0,
            sz: false,
            underlying: None,
            is_abstract: false,
        })
    }

    fn entry(&self, ty: Token) -> TypeEntry {
        self.types.borrow()[(ty.row() - 1) as usize].clone()
    }

    pub fn wk(&self, which: WellKnown) -> Token {
        self.well_known[&which]
    }

    pub fn object(&self) -> Token {
        self.wk(WellKnown::Object)
    }

    pub fn int32(&self) -> Token {
        self.wk(WellKnown::Int32)
    }

    pub fn void(&self) -> Token {
        self.wk(WellKnown::Void)
    }

    pub fn class(&mut self, base: Token) -> Token {
        self.named(TypeKind::Class, base)
    }

    pub fn static_method(&mut self, params: &[Token], ret: Token) -> Token {
        let declaring = self.object();
        self.methods.push(MethodEntry {
            declaring,
            params: params.to_vec(),
            ret,
            is_static: true,
            is_ctor: false,
        });
        Token::new(0x0600_0000 + self.methods.len() as u32)
    }

    pub fn set_body(&mut self, method: Token, body: Body) {
        self.bodies.insert(method, body);
    }

    fn method_entry(&self, method: Token) -> MethodEntry {
        self.methods[(method.row() - 1) as usize].clone()
    }

    fn body(&self, method: Token) -> Option<&Body> {
        self.bodies.get(&method)
    }
}

impl TypeOracle for Universe {
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
        if self.type_kind(to) == TypeKind::Object && self.type_kind(from).is_object_reference() {
            return true;
        }
        let mut current = self.base_type(from);
        while let Some(base) = current {
            if base == to {
                return true;
            }
            current = self.base_type(base);
        }
        false
    }

    fn is_abstract_type(&self, ty: Token) -> bool {
        self.entry(ty).is_abstract
    }

    fn same_assembly(&self, _a: Token, _b: Token) -> bool {
        true
    }

    fn well_known(&self, which: WellKnown) -> Token {
        self.well_known[&which]
    }

    fn byref_of(&self, elem: Token) -> Token {
        if let Some(&token) = self.byrefs.borrow().get(&elem) {
            return token;
        }
        let token = {
            let mut types = self.types.borrow_mut();
            types.push(TypeEntry {
                kind: TypeKind::ByRef,
                base: None,
                interfaces: Vec::new(),
                element: Some(elem),
                rank: 0,
                sz: false,
                underlying: None,
                is_abstract: false,
            });
            type_token(types.len() - 1)
        };
        self.byrefs.borrow_mut().insert(elem, token);
        token
    }

    fn sz_array_of(&self, elem: Token) -> Token {
        self.intern_array(elem, 1, true)
    }

    fn array_of(&self, elem: Token, rank: u32) -> Token {
        self.intern_array(elem, rank, false)
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

    fn method_is_abstract(&self, _method: Token) -> bool {
        false
    }

    fn method_is_virtual(&self, _method: Token) -> bool {
        false
    }

    fn method_is_constructor(&self, method: Token) -> bool {
        self.method_entry(method).is_ctor
    }

    fn method_declaring_type(&self, method: Token) -> Token {
        self.method_entry(method).declaring
    }

    fn method_visibility(&self, _method: Token) -> MemberVisibility {
        MemberVisibility::Public
    }

    fn field_type(&self, _field: Token) -> Token {
        self.object()
    }

    fn field_is_static(&self, _field: Token) -> bool {
        false
    }

    fn field_declaring_type(&self, _field: Token) -> Token {
        self.object()
    }

    fn field_visibility(&self, _field: Token) -> MemberVisibility {
        MemberVisibility::Public
    }
}

impl Universe {
    fn intern_array(&self, elem: Token, rank: u32, sz: bool) -> Token {
        let key = (elem, rank, sz);
        if let Some(&token) = self.derived.borrow().get(&key) {
            return token;
        }
        let array_base = self.well_known[&WellKnown::Array];
        let token = {
            let mut types = self.types.borrow_mut();
            types.push(TypeEntry {
                kind: TypeKind::Array,
                base: Some(array_base),
                interfaces: Vec::new(),
                element: Some(elem),
                rank,
                sz,
                underlying: None,
                is_abstract: false,
            });
            type_token(types.len() - 1)
        };
        self.derived.borrow_mut().insert(key, token);
        token
    }
}

impl BytecodeProvider for Universe {
    fn il_bytes(&self, method: Token) -> Result<Vec<u8>> {
        self.body(method)
            .map(|body| body.il.clone())
            .ok_or_else(|| Error::Error(format!("no body for {method}")))
    }

    fn locals(&self, method: Token) -> Vec<Token> {
        self.body(method)
            .map(|body| body.locals.clone())
            .unwrap_or_default()
    }

    fn exception_regions(&self, method: Token) -> Vec<ExceptionRegion> {
        self.body(method)
            .map(|body| body.regions.clone())
            .unwrap_or_default()
    }

    fn max_stack(&self, method: Token) -> u32 {
        self.body(method).map_or(8, |body| body.max_stack)
    }

    fn init_locals(&self, method: Token) -> bool {
        self.body(method).map_or(true, |body| body.init_locals)
    }

    fn is_vararg(&self, method: Token) -> bool {
        self.body(method).map_or(false, |body| body.vararg)
    }
}

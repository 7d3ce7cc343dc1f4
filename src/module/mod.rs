//! Model of the already-compiled C translation unit
//!
//! The C front end is an external collaborator; what the pipeline consumes
//! is its symbol table — function signatures, global-variable types, struct
//! layouts — plus an execution facility for the compiled code. This module
//! is that seam:
//!
//! - [`CType`] / [`value::CValue`]: the type system and runtime values
//! - [`FunctionDecl`] / [`GlobalDecl`] / [`StructLayout`]: the symbol table
//! - [`HostFn`] + [`Runtime`]: compiled functions exposed as callables that
//!   see the module [`memory::Memory`] and can invoke sibling symbols
//!   (which routes through active mockup bindings)
//!
//! Struct layouts expose field **count and types only** — no field names.
//! That limitation is load-bearing: designated struct initializers in the
//! test language are rejected at generation time because of it.

pub mod memory;
pub mod value;

use memory::Memory;
use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;
use value::CValue;

/// C types as declared in the compiled translation unit's symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CType {
    Void,
    Char { signed: bool },
    Short { signed: bool },
    Int { signed: bool },
    Long { signed: bool },
    LongLong { signed: bool },
    Float,
    Double,
    Pointer(Box<CType>),
    Struct(String),
}

impl CType {
    pub fn void() -> Self {
        CType::Void
    }
    pub fn char_() -> Self {
        CType::Char { signed: true }
    }
    pub fn uchar() -> Self {
        CType::Char { signed: false }
    }
    pub fn short() -> Self {
        CType::Short { signed: true }
    }
    pub fn ushort() -> Self {
        CType::Short { signed: false }
    }
    pub fn int() -> Self {
        CType::Int { signed: true }
    }
    pub fn uint() -> Self {
        CType::Int { signed: false }
    }
    pub fn long() -> Self {
        CType::Long { signed: true }
    }
    pub fn ulong() -> Self {
        CType::Long { signed: false }
    }
    pub fn longlong() -> Self {
        CType::LongLong { signed: true }
    }
    pub fn ptr(pointee: CType) -> Self {
        CType::Pointer(Box::new(pointee))
    }
    pub fn strct(name: &str) -> Self {
        CType::Struct(name.to_string())
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            CType::Char { .. }
                | CType::Short { .. }
                | CType::Int { .. }
                | CType::Long { .. }
                | CType::LongLong { .. }
        )
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            CType::Char { signed: true }
                | CType::Short { signed: true }
                | CType::Int { signed: true }
                | CType::Long { signed: true }
                | CType::LongLong { signed: true }
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, CType::Float | CType::Double)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, CType::Pointer(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, CType::Void)
    }

    /// Width of the integer type in bits (pointers count as 64).
    pub fn bit_width(&self) -> u32 {
        match self {
            CType::Char { .. } => 8,
            CType::Short { .. } => 16,
            CType::Int { .. } => 32,
            CType::Long { .. } | CType::LongLong { .. } | CType::Pointer(_) => 64,
            _ => 0,
        }
    }

    /// Truncate a raw integer to this type's width, re-extending per the
    /// type's signedness (what a C store into this type does).
    pub fn wrap(&self, raw: i64) -> i64 {
        match self {
            CType::Char { signed: true } => raw as i8 as i64,
            CType::Char { signed: false } => raw as u8 as i64,
            CType::Short { signed: true } => raw as i16 as i64,
            CType::Short { signed: false } => raw as u16 as i64,
            CType::Int { signed: true } => raw as i32 as i64,
            CType::Int { signed: false } => raw as u32 as i64,
            _ => raw,
        }
    }

    /// Bit mask covering this integer type's width.
    pub fn unsigned_mask(&self) -> u64 {
        match self.bit_width() {
            0 => u64::MAX,
            64 => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }

    /// Pointee type for pointers.
    pub fn pointee(&self) -> Option<&CType> {
        match self {
            CType::Pointer(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Char { signed: true } => write!(f, "char"),
            CType::Char { signed: false } => write!(f, "unsigned char"),
            CType::Short { signed: true } => write!(f, "short"),
            CType::Short { signed: false } => write!(f, "unsigned short"),
            CType::Int { signed: true } => write!(f, "int"),
            CType::Int { signed: false } => write!(f, "unsigned int"),
            CType::Long { signed: true } => write!(f, "long"),
            CType::Long { signed: false } => write!(f, "unsigned long"),
            CType::LongLong { signed: true } => write!(f, "long long"),
            CType::LongLong { signed: false } => write!(f, "unsigned long long"),
            CType::Float => write!(f, "float"),
            CType::Double => write!(f, "double"),
            CType::Pointer(inner) => write!(f, "{}*", inner),
            CType::Struct(name) => write!(f, "struct {}", name),
        }
    }
}

/// Declared function signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<CType>,
    pub ret: CType,
}

impl FunctionDecl {
    /// C-style signature string, e.g. `short sum(int, int)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        format!("{} {}({})", self.ret, self.name, params.join(", "))
    }
}

/// Declared global variable with its initial value
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: CType,
    pub init: CValue,
}

/// Struct layout: field count and types, no field names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<CType>,
}

/// Execution facility a compiled function sees while running: the module
/// memory, and dispatch back into the module (so a mocked-up callee is
/// observed by its callers).
pub trait Runtime {
    fn memory(&mut self) -> &mut Memory;

    /// Invoke another module symbol through mockup dispatch. `None` when the
    /// symbol is unknown.
    fn invoke(&mut self, symbol: &str, args: &[CValue]) -> Option<CValue>;
}

/// A compiled C function exposed to the pipeline
pub type HostFn = Rc<dyn Fn(&mut dyn Runtime, &[CValue]) -> CValue>;

/// The compiled translation unit: read-only symbol table plus the host
/// implementations behind it
pub struct Module {
    pub name: String,
    functions: FxHashMap<String, FunctionDecl>,
    impls: FxHashMap<String, HostFn>,
    globals: FxHashMap<String, GlobalDecl>,
    structs: FxHashMap<String, StructLayout>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.get(name)
    }

    pub fn host_impl(&self, name: &str) -> Option<HostFn> {
        self.impls.get(name).cloned()
    }

    pub fn global(&self, name: &str) -> Option<&GlobalDecl> {
        self.globals.get(name)
    }

    pub fn struct_layout(&self, name: &str) -> Option<&StructLayout> {
        self.structs.get(name)
    }

    /// True when any declaration already uses `name` (collision checks for
    /// generated routine and shadow-global names).
    pub fn contains_symbol(&self, name: &str) -> bool {
        self.functions.contains_key(name) || self.globals.contains_key(name)
    }

    /// Zero value of a type, recursing through struct layouts.
    pub fn zero_value(&self, ty: &CType) -> CValue {
        match ty {
            CType::Void => CValue::Unit,
            CType::Float | CType::Double => CValue::Float(0.0),
            CType::Pointer(_) => CValue::Null,
            CType::Struct(name) => match self.structs.get(name) {
                Some(layout) => CValue::Struct(
                    layout
                        .fields
                        .iter()
                        .map(|field| self.zero_value(field))
                        .collect(),
                ),
                None => CValue::Struct(Vec::new()),
            },
            _ => CValue::Int(0),
        }
    }

    /// Fresh memory with every declared global at its initial value.
    pub fn initial_memory(&self) -> Memory {
        let mut memory = Memory::new();
        for global in self.globals.values() {
            memory.set_global(&global.name, global.init.clone());
        }
        memory
    }
}

/// Builder used by front-end adapters (and tests) to register the symbols of
/// a compiled translation unit
#[derive(Default)]
pub struct ModuleBuilder {
    name: String,
    functions: FxHashMap<String, FunctionDecl>,
    impls: FxHashMap<String, HostFn>,
    globals: FxHashMap<String, GlobalDecl>,
    structs: FxHashMap<String, StructLayout>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        ModuleBuilder {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn function<F>(mut self, name: &str, params: &[CType], ret: CType, body: F) -> Self
    where
        F: Fn(&mut dyn Runtime, &[CValue]) -> CValue + 'static,
    {
        self.functions.insert(
            name.to_string(),
            FunctionDecl {
                name: name.to_string(),
                params: params.to_vec(),
                ret,
            },
        );
        self.impls.insert(name.to_string(), Rc::new(body));
        self
    }

    pub fn global(mut self, name: &str, ty: CType, init: CValue) -> Self {
        self.globals.insert(
            name.to_string(),
            GlobalDecl {
                name: name.to_string(),
                ty,
                init,
            },
        );
        self
    }

    pub fn struct_layout(mut self, name: &str, fields: Vec<CType>) -> Self {
        self.structs.insert(
            name.to_string(),
            StructLayout {
                name: name.to_string(),
                fields,
            },
        );
        self
    }

    pub fn build(self) -> Module {
        Module {
            name: self.name,
            functions: self.functions,
            impls: self.impls,
            globals: self.globals,
            structs: self.structs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_rendering() {
        let decl = FunctionDecl {
            name: "sum".to_string(),
            params: vec![CType::int(), CType::int()],
            ret: CType::short(),
        };
        assert_eq!(decl.signature(), "short sum(int, int)");

        let decl = FunctionDecl {
            name: "print_pixel".to_string(),
            params: vec![CType::ptr(CType::strct("Pixel")), CType::uint()],
            ret: CType::void(),
        };
        assert_eq!(
            decl.signature(),
            "void print_pixel(struct Pixel*, unsigned int)"
        );
    }

    #[test]
    fn test_wrap_truncates_to_width() {
        assert_eq!(CType::char_().wrap(300), 44);
        assert_eq!(CType::uchar().wrap(-1), 255);
        assert_eq!(CType::int().wrap(i64::MAX), -1);
        assert_eq!(CType::long().wrap(-5), -5);
    }

    #[test]
    fn test_zero_value_recurses_structs() {
        let module = ModuleBuilder::new("m")
            .struct_layout("Pixel", vec![CType::int(), CType::int()])
            .struct_layout(
                "SuperPixel",
                vec![CType::int(), CType::int(), CType::strct("Pixel")],
            )
            .build();

        let zero = module.zero_value(&CType::strct("SuperPixel"));
        assert_eq!(
            zero,
            CValue::Struct(vec![
                CValue::Int(0),
                CValue::Int(0),
                CValue::Struct(vec![CValue::Int(0), CValue::Int(0)]),
            ])
        );
    }

    #[test]
    fn test_initial_memory_seeds_globals() {
        let module = ModuleBuilder::new("m")
            .global("gint", CType::int(), CValue::Int(10))
            .build();
        let memory = module.initial_memory();
        assert_eq!(memory.global("gint"), Some(&CValue::Int(10)));
    }
}

//! Typed symbol records and the per-file symbol table. Symbols are created
//! once per file during collection and never mutated afterward; everything
//! downstream (include walking, code generation, header generation) reads
//! them through the lookup methods here.

use crate::ast::{
    AccessMode, Expression, OverflowBehavior, PrimitiveType, SpanNode,
    Visibility,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Which language a symbol was declared in. C and C++ symbols come from the
/// permissive header harvest.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceLanguage {
    CNext,
    C,
    Cpp,
}

/// Metadata carried by every symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolMeta {
    pub name: String,
    /// The enclosing scope's name, or empty for the global scope
    pub scope: String,
    pub source_file: PathBuf,
    pub source_line: usize,
    pub source_language: SourceLanguage,
    pub is_exported: bool,
}

impl SymbolMeta {
    pub fn new(name: impl Into<String>, file: &Path, line: usize) -> Self {
        Self {
            name: name.into(),
            scope: String::new(),
            source_file: file.to_owned(),
            source_line: line,
            source_language: SourceLanguage::CNext,
            is_exported: true,
        }
    }

    /// The C-level name: `Scope_name`, or the bare name in the global scope.
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.scope, &self.name)
    }
}

/// The qualified-name rule used everywhere a scoped symbol is emitted.
pub fn qualified_name(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_owned()
    } else {
        format!("{}_{}", scope, name)
    }
}

/// The resolved base of a type: either a language primitive or a named user
/// type (struct, enum, bitmap, or harvested C type), already qualified.
#[derive(Clone, Debug, PartialEq)]
pub enum BaseType {
    Primitive(PrimitiveType),
    Named(String),
}

impl BaseType {
    /// The C spelling of this type.
    pub fn c_type(&self) -> String {
        match self {
            Self::Primitive(primitive) => primitive.c_type().to_owned(),
            Self::Named(name) => name.clone(),
        }
    }

    /// The source spelling of this type.
    pub fn display_name(&self) -> String {
        match self {
            Self::Primitive(primitive) => primitive.name().to_owned(),
            Self::Named(name) => name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScopeSymbol {
    pub meta: SymbolMeta,
    /// Member names in source order
    pub members: Vec<String>,
    pub visibility: HashMap<String, Visibility>,
}

/// Everything the code generator needs to know about one struct field.
#[derive(Clone, Debug, PartialEq)]
pub struct StructFieldInfo {
    pub base: BaseType,
    pub is_array: bool,
    pub is_const: bool,
    pub dimensions: Vec<u64>,
    pub is_string: bool,
    pub string_capacity: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructSymbol {
    pub meta: SymbolMeta,
    /// Field name → info, in declaration order
    pub fields: Vec<(String, StructFieldInfo)>,
}

impl StructSymbol {
    pub fn field(&self, name: &str) -> Option<&StructFieldInfo> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, info)| info)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumSymbol {
    pub meta: SymbolMeta,
    /// Member name → value, in declaration order. Values are non-negative.
    pub members: Vec<(String, i64)>,
}

/// One named bit field inside a bitmap.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BitFieldInfo {
    pub offset: u32,
    pub width: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BitmapSymbol {
    pub meta: SymbolMeta,
    pub backing: PrimitiveType,
    /// The declared width; 24 for `bitmap24` even though the backing is u32
    pub bit_width: u32,
    pub fields: Vec<(String, BitFieldInfo)>,
}

impl BitmapSymbol {
    pub fn field(&self, name: &str) -> Option<BitFieldInfo> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, info)| *info)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegisterMemberInfo {
    /// Byte offset, preserving the source spelling
    pub offset: String,
    pub c_type: String,
    pub access: AccessMode,
    pub bitmap: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegisterSymbol {
    pub meta: SymbolMeta,
    /// Base address, preserving the source spelling
    pub base_address: String,
    pub members: Vec<(String, RegisterMemberInfo)>,
}

impl RegisterSymbol {
    pub fn member(&self, name: &str) -> Option<&RegisterMemberInfo> {
        self.members
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, info)| info)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableSymbol {
    pub meta: SymbolMeta,
    pub base: BaseType,
    pub dimensions: Vec<u64>,
    pub is_const: bool,
    pub is_atomic: bool,
    pub overflow: OverflowBehavior,
    pub is_string: bool,
    pub string_capacity: Option<u64>,
    pub initializer: Option<SpanNode<Expression>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    pub base: BaseType,
    pub is_const: bool,
    pub is_array: bool,
    pub is_string: bool,
    pub string_capacity: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSymbol {
    pub meta: SymbolMeta,
    pub return_type: BaseType,
    pub params: Vec<ParamInfo>,
    pub visibility: Visibility,
}

/// Per-file typed store of everything collection found, plus the aggregate
/// lookups the code generator leans on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SymbolTable {
    pub file: PathBuf,
    pub scopes: Vec<ScopeSymbol>,
    pub structs: Vec<StructSymbol>,
    pub enums: Vec<EnumSymbol>,
    pub bitmaps: Vec<BitmapSymbol>,
    pub registers: Vec<RegisterSymbol>,
    pub variables: Vec<VariableSymbol>,
    pub functions: Vec<FunctionSymbol>,
}

impl SymbolTable {
    pub fn new(file: &Path) -> Self {
        Self {
            file: file.to_owned(),
            ..Self::default()
        }
    }

    /// Look up an enum by its qualified name.
    pub fn enum_symbol(&self, name: &str) -> Option<&EnumSymbol> {
        self.enums
            .iter()
            .find(|symbol| symbol.meta.qualified_name() == name)
    }

    /// Look up a bitmap by its qualified name.
    pub fn bitmap(&self, name: &str) -> Option<&BitmapSymbol> {
        self.bitmaps
            .iter()
            .find(|symbol| symbol.meta.qualified_name() == name)
    }

    /// Look up a struct by its qualified name.
    pub fn struct_symbol(&self, name: &str) -> Option<&StructSymbol> {
        self.structs
            .iter()
            .find(|symbol| symbol.meta.qualified_name() == name)
    }

    /// Look up a register group by name. Registers are never scoped.
    pub fn register(&self, name: &str) -> Option<&RegisterSymbol> {
        self.registers
            .iter()
            .find(|symbol| symbol.meta.name == name)
    }

    pub fn is_known_enum(&self, name: &str) -> bool {
        self.enum_symbol(name).is_some()
    }

    pub fn is_known_bitmap(&self, name: &str) -> bool {
        self.bitmap(name).is_some()
    }

    pub fn bitmap_bit_width(&self, name: &str) -> Option<u32> {
        self.bitmap(name).map(|symbol| symbol.bit_width)
    }

    /// Const integer variables usable in dimension positions, keyed by
    /// qualified name and by bare name for same-file references.
    pub fn const_table(&self) -> HashMap<String, i64> {
        let mut table = HashMap::new();
        for variable in &self.variables {
            if !variable.is_const {
                continue;
            }
            if let Some(init) = &variable.initializer {
                if let Some(value) =
                    crate::eval::fold_expression(init.value())
                {
                    table.insert(variable.meta.name.clone(), value);
                    table.insert(variable.meta.qualified_name(), value);
                }
            }
        }
        table
    }
}

/// A read-only view over several symbol tables: the current unit's table
/// plus the tables of every transitively included `.cnx` file. Built fresh
/// per traversal; the underlying map is never mutated through this.
#[derive(Clone, Debug, Default)]
pub struct SymbolIndex {
    tables: Vec<SymbolTable>,
}

impl SymbolIndex {
    pub fn new(tables: Vec<SymbolTable>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &[SymbolTable] {
        &self.tables
    }

    pub fn enum_symbol(&self, name: &str) -> Option<&EnumSymbol> {
        self.tables
            .iter()
            .find_map(|table| table.enum_symbol(name))
    }

    pub fn bitmap(&self, name: &str) -> Option<&BitmapSymbol> {
        self.tables.iter().find_map(|table| table.bitmap(name))
    }

    pub fn struct_symbol(&self, name: &str) -> Option<&StructSymbol> {
        self.tables
            .iter()
            .find_map(|table| table.struct_symbol(name))
    }

    pub fn register(&self, name: &str) -> Option<&RegisterSymbol> {
        self.tables.iter().find_map(|table| table.register(name))
    }

    pub fn is_known_enum(&self, name: &str) -> bool {
        self.enum_symbol(name).is_some()
    }

    pub fn is_known_bitmap(&self, name: &str) -> bool {
        self.bitmap(name).is_some()
    }

    /// Whether an enum with this qualified name is declared in a table other
    /// than the root unit's. Header generation skips these, because they
    /// arrive through an included header.
    pub fn is_included_enum(&self, root: &Path, name: &str) -> bool {
        self.tables
            .iter()
            .filter(|table| table.file != root)
            .any(|table| table.is_known_enum(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name("Math", "add"), "Math_add");
        assert_eq!(qualified_name("", "main"), "main");
    }

    #[test]
    fn test_struct_field_lookup() {
        let symbol = StructSymbol {
            meta: SymbolMeta::new("Point", Path::new("a.cnx"), 1),
            fields: vec![
                (
                    "x".into(),
                    StructFieldInfo {
                        base: BaseType::Primitive(PrimitiveType::I32),
                        is_array: false,
                        is_const: false,
                        dimensions: vec![],
                        is_string: false,
                        string_capacity: None,
                    },
                ),
            ],
        };
        assert!(symbol.field("x").is_some());
        assert!(symbol.field("y").is_none());
    }
}

//! Symbol collection: one collector per declaration kind, walking the parse
//! tree in source order and producing the typed records in
//! [crate::symbol]. The scope collector composes the others and tags their
//! output with the enclosing scope name.

use crate::{
    ast::{
        ArraySize, BitmapDecl, Declaration, EnumDecl, Expression,
        FunctionDecl, Program, RegisterDecl, ScopeDecl, SpanNode, StructDecl,
        TypeName, VariableDecl, Visibility,
    },
    error::{CompileError, SourceErrorWrapper, WithSource},
    eval,
    symbol::{
        qualified_name, BaseType, BitFieldInfo, BitmapSymbol, EnumSymbol,
        FunctionSymbol, ParamInfo, RegisterMemberInfo, RegisterSymbol,
        ScopeSymbol, StructFieldInfo, StructSymbol, SymbolMeta, SymbolTable,
        VariableSymbol,
    },
    util::Span,
    Transpiler,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Mutable state threaded through one file's collection pass.
struct Collection<'a> {
    file: &'a Path,
    source: &'a str,
    table: SymbolTable,
    errors: Vec<(CompileError, Span)>,
    /// Type names declared in this file, keyed by scope name ("" = global)
    local_types: HashMap<String, HashSet<String>>,
    /// Qualified bitmap names, for register member verification
    bitmap_names: HashSet<String>,
    /// Const integer values usable in dimension positions
    consts: HashMap<String, i64>,
}

impl<'a> Collection<'a> {
    fn new(file: &'a Path, source: &'a str) -> Self {
        Self {
            file,
            source,
            table: SymbolTable::new(file),
            errors: Vec::new(),
            local_types: HashMap::new(),
            bitmap_names: HashSet::new(),
            consts: HashMap::new(),
        }
    }

    fn error(&mut self, error: CompileError, span: Span) {
        self.errors.push((error, span));
    }

    fn meta(
        &self,
        name: &SpanNode<String>,
        scope: &str,
        exported: bool,
    ) -> SymbolMeta {
        let mut meta = SymbolMeta::new(
            name.value().clone(),
            self.file,
            name.metadata().start_line,
        );
        meta.scope = scope.to_owned();
        meta.is_exported = exported;
        meta
    }

    /// Resolve a source type spelling against the enclosing scope: a bare
    /// user-type name declared inside the scope qualifies to `Scope_Name`.
    fn resolve_type(&self, scope: &str, ty: &TypeName) -> BaseType {
        match ty {
            TypeName::Primitive(primitive) => BaseType::Primitive(*primitive),
            // String fields/variables are marked is_string by the caller;
            // the base only matters for the C spelling
            TypeName::String(_) => BaseType::Named("char".to_owned()),
            TypeName::User {
                scope: Some(explicit),
                name,
            } => BaseType::Named(qualified_name(explicit, name)),
            TypeName::User { scope: None, name } => {
                let declared_here = self
                    .local_types
                    .get(scope)
                    .map(|types| types.contains(name))
                    .unwrap_or(false);
                if !scope.is_empty() && declared_here {
                    BaseType::Named(qualified_name(scope, name))
                } else {
                    BaseType::Named(name.clone())
                }
            }
        }
    }

    /// Evaluate one declared dimension. `init` is the initializer, used for
    /// `[]` inference on variables; `depth` is the dimension's position.
    fn eval_dimension(
        &mut self,
        size: &SpanNode<ArraySize>,
        init: Option<&SpanNode<Expression>>,
        depth: usize,
    ) -> Option<u64> {
        match size.value() {
            ArraySize::Literal(value) => Some(*value),
            ArraySize::Named(name) => match self.consts.get(name) {
                Some(value) if *value >= 0 => Some(*value as u64),
                _ => {
                    self.error(
                        CompileError::InvalidConstantExpression {
                            text: name.clone(),
                        },
                        *size.metadata(),
                    );
                    None
                }
            },
            ArraySize::Inferred => {
                let inferred = init.and_then(|expr| {
                    eval::infer_dimension(expr.value(), depth)
                });
                if inferred.is_none() {
                    self.error(
                        CompileError::InvalidConstantExpression {
                            text: "[]".to_owned(),
                        },
                        *size.metadata(),
                    );
                }
                inferred
            }
        }
    }

    /// Evaluate a `string<N>` capacity.
    fn eval_capacity(
        &mut self,
        capacity: &ArraySize,
        span: Span,
    ) -> Option<u64> {
        match capacity {
            ArraySize::Literal(value) => Some(*value),
            ArraySize::Named(name) => match self.consts.get(name) {
                Some(value) if *value >= 0 => Some(*value as u64),
                _ => {
                    self.error(
                        CompileError::InvalidConstantExpression {
                            text: name.clone(),
                        },
                        span,
                    );
                    None
                }
            },
            ArraySize::Inferred => None,
        }
    }
}

/// Record every type name declared in the file, so that references can be
/// resolved regardless of declaration order.
fn prepass(collection: &mut Collection, program: &Program) {
    fn record(
        collection: &mut Collection,
        scope: &str,
        declaration: &Declaration,
    ) {
        let name = match declaration {
            Declaration::Enum(decl) => Some(decl.name.value().clone()),
            Declaration::Struct(decl) => Some(decl.name.value().clone()),
            Declaration::Bitmap(decl) => {
                let qualified =
                    qualified_name(scope, decl.name.value());
                collection.bitmap_names.insert(qualified);
                Some(decl.name.value().clone())
            }
            Declaration::Scope(decl) => {
                for member in &decl.members {
                    record(
                        collection,
                        decl.name.value(),
                        member.declaration.value(),
                    );
                }
                None
            }
            _ => None,
        };
        if let Some(name) = name {
            collection
                .local_types
                .entry(scope.to_owned())
                .or_insert_with(HashSet::new)
                .insert(name);
        }
    }

    for declaration in &program.declarations {
        record(collection, "", declaration.value());
    }
}

/// Collect one enum declaration. Members auto-increment from zero; an
/// explicit `<- expr` sets the counter and increments continue from there.
fn collect_enum(
    collection: &mut Collection,
    decl: &EnumDecl,
    scope: &str,
    exported: bool,
) {
    let mut members = Vec::new();
    let mut next = 0i64;
    for member in &decl.members {
        let value = match &member.value {
            Some(expr) => match eval::fold_expression(expr.value()) {
                Some(value) => value,
                None => {
                    let span = *expr.metadata();
                    collection.error(
                        CompileError::InvalidConstantExpression {
                            text: span.get_source_slice(collection.source)
                                .to_owned(),
                        },
                        span,
                    );
                    continue;
                }
            },
            None => next,
        };
        if value < 0 {
            collection.error(
                CompileError::EnumNegative {
                    member: member.name.value().clone(),
                    value,
                },
                *member.name.metadata(),
            );
        }
        members.push((member.name.value().clone(), value));
        next = value + 1;
    }
    let meta = collection.meta(&decl.name, scope, exported);
    collection.table.enums.push(EnumSymbol { meta, members });
}

/// Collect one bitmap declaration. Field offsets accumulate in declaration
/// order; the widths must sum to exactly the declared width.
fn collect_bitmap(
    collection: &mut Collection,
    decl: &BitmapDecl,
    scope: &str,
    exported: bool,
) {
    let mut fields = Vec::new();
    let mut offset = 0u32;
    for field in &decl.fields {
        let width = field.width.as_ref().map(|w| *w.value()).unwrap_or(1);
        fields.push((
            field.name.value().clone(),
            BitFieldInfo { offset, width },
        ));
        offset += width;
    }
    let declared = decl.width.declared_bits();
    if offset != declared {
        collection.error(
            CompileError::BitmapWidthMismatch {
                name: decl.name.value().clone(),
                actual: offset,
                declared,
            },
            *decl.name.metadata(),
        );
    }
    let meta = collection.meta(&decl.name, scope, exported);
    collection.table.bitmaps.push(BitmapSymbol {
        meta,
        backing: decl.width.backing_type(),
        bit_width: declared,
        fields,
    });
}

/// Collect one struct declaration. A `string<N>` field grows a trailing
/// `N + 1` dimension and is marked as an array.
fn collect_struct(
    collection: &mut Collection,
    decl: &StructDecl,
    scope: &str,
    exported: bool,
) {
    let mut fields = Vec::new();
    for field in &decl.fields {
        let base = collection.resolve_type(scope, field.ty.value());
        let mut dimensions: Vec<u64> = Vec::new();
        for (depth, size) in field.dimensions.iter().enumerate() {
            if let Some(value) =
                collection.eval_dimension(size, None, depth)
            {
                dimensions.push(value);
            }
        }
        let (is_string, string_capacity) = match field.ty.value() {
            TypeName::String(capacity) => {
                let capacity = collection
                    .eval_capacity(capacity, *field.ty.metadata());
                if let Some(capacity) = capacity {
                    dimensions.push(capacity + 1);
                }
                (true, capacity)
            }
            _ => (false, None),
        };
        fields.push((
            field.name.value().clone(),
            StructFieldInfo {
                base,
                is_array: !dimensions.is_empty(),
                // Struct members have no const modifier in the grammar
                is_const: false,
                dimensions,
                is_string,
                string_capacity,
            },
        ));
    }
    let meta = collection.meta(&decl.name, scope, exported);
    collection.table.structs.push(StructSymbol { meta, fields });
}

/// Collect one register group. Bitmap attachments must name a known bitmap.
fn collect_register(
    collection: &mut Collection,
    decl: &RegisterDecl,
    scope: &str,
    exported: bool,
) {
    let mut members = Vec::new();
    for member in &decl.members {
        if let Some(bitmap) = &member.bitmap {
            let resolved = collection
                .resolve_type(
                    scope,
                    &TypeName::User {
                        scope: None,
                        name: bitmap.value().clone(),
                    },
                )
                .c_type();
            if !collection.bitmap_names.contains(&resolved) {
                collection.error(
                    CompileError::UnknownTypeReference {
                        name: bitmap.value().clone(),
                    },
                    *bitmap.metadata(),
                );
            }
        }
        let c_type = collection
            .resolve_type(scope, member.ty.value())
            .c_type();
        members.push((
            member.name.value().clone(),
            RegisterMemberInfo {
                offset: member.offset.value().clone(),
                c_type,
                access: member.access,
                bitmap: member.bitmap.as_ref().map(|b| {
                    collection
                        .resolve_type(
                            scope,
                            &TypeName::User {
                                scope: None,
                                name: b.value().clone(),
                            },
                        )
                        .c_type()
                }),
            },
        ));
    }
    let meta = collection.meta(&decl.name, scope, exported);
    collection.table.registers.push(RegisterSymbol {
        meta,
        base_address: decl.base.value().clone(),
        members,
    });
}

/// Collect one variable declaration. Missing dimensions are inferred from a
/// list initializer.
fn collect_variable(
    collection: &mut Collection,
    decl: &VariableDecl,
    scope: &str,
    exported: bool,
) {
    let base = collection.resolve_type(scope, decl.ty.value());
    let mut dimensions = Vec::new();
    for (depth, size) in decl.dimensions.iter().enumerate() {
        if let Some(value) =
            collection.eval_dimension(size, decl.init.as_ref(), depth)
        {
            dimensions.push(value);
        }
    }
    let (is_string, string_capacity) = match decl.ty.value() {
        TypeName::String(capacity) => (
            true,
            collection.eval_capacity(capacity, *decl.ty.metadata()),
        ),
        _ => (false, None),
    };
    if decl.qualifiers.is_const {
        if let Some(init) = &decl.init {
            if let Some(value) = eval::fold_expression(init.value()) {
                collection
                    .consts
                    .insert(decl.name.value().clone(), value);
                collection.consts.insert(
                    qualified_name(scope, decl.name.value()),
                    value,
                );
            }
        }
    }
    let meta = collection.meta(&decl.name, scope, exported);
    collection.table.variables.push(VariableSymbol {
        meta,
        base,
        dimensions,
        is_const: decl.qualifiers.is_const,
        is_atomic: decl.qualifiers.is_atomic,
        overflow: decl.qualifiers.overflow,
        is_string,
        string_capacity,
        initializer: decl.init.clone(),
    });
}

/// Collect one function declaration. The body stays in the parse tree for
/// code generation; only the signature becomes a symbol.
fn collect_function(
    collection: &mut Collection,
    decl: &FunctionDecl,
    scope: &str,
    visibility: Visibility,
) {
    let return_type =
        collection.resolve_type(scope, decl.return_type.value());
    let mut params = Vec::new();
    for param in &decl.params {
        let base = collection.resolve_type(scope, param.ty.value());
        let (is_string, string_capacity) = match param.ty.value() {
            TypeName::String(capacity) => (
                true,
                collection.eval_capacity(capacity, *param.ty.metadata()),
            ),
            _ => (false, None),
        };
        params.push(ParamInfo {
            name: param.name.value().clone(),
            base,
            is_const: param.is_const,
            is_array: param.array_depth > 0,
            is_string,
            string_capacity,
        });
    }
    let meta = collection.meta(
        &decl.name,
        scope,
        visibility == Visibility::Public,
    );
    collection.table.functions.push(FunctionSymbol {
        meta,
        return_type,
        params,
        visibility,
    });
}

/// Collect one scope: dispatch each member to its collector with this
/// scope's name attached, and record the visibility map. Visibility
/// defaults to private when the source omits it.
fn collect_scope(collection: &mut Collection, decl: &ScopeDecl) {
    let scope_name = decl.name.value().clone();
    let mut members = Vec::new();
    let mut visibility = HashMap::new();
    for member in &decl.members {
        let vis = member
            .visibility
            .as_ref()
            .map(|v| *v.value())
            .unwrap_or(Visibility::Private);
        let member_name = declaration_name(member.declaration.value());
        if let Some(name) = member_name {
            members.push(name.clone());
            visibility.insert(name, vis);
        }
        collect_declaration(
            collection,
            member.declaration.value(),
            &scope_name,
            vis,
        );
    }
    let meta = collection.meta(&decl.name, "", true);
    collection.table.scopes.push(ScopeSymbol {
        meta,
        members,
        visibility,
    });
}

fn declaration_name(declaration: &Declaration) -> Option<String> {
    match declaration {
        Declaration::Variable(decl) => Some(decl.name.value().clone()),
        Declaration::Function(decl) => Some(decl.name.value().clone()),
        Declaration::Enum(decl) => Some(decl.name.value().clone()),
        Declaration::Bitmap(decl) => Some(decl.name.value().clone()),
        Declaration::Struct(decl) => Some(decl.name.value().clone()),
        Declaration::Scope(decl) => Some(decl.name.value().clone()),
        Declaration::Register(decl) => Some(decl.name.value().clone()),
    }
}

fn collect_declaration(
    collection: &mut Collection,
    declaration: &Declaration,
    scope: &str,
    visibility: Visibility,
) {
    let exported = visibility == Visibility::Public;
    match declaration {
        Declaration::Enum(decl) => {
            collect_enum(collection, decl, scope, exported)
        }
        Declaration::Bitmap(decl) => {
            collect_bitmap(collection, decl, scope, exported)
        }
        Declaration::Struct(decl) => {
            collect_struct(collection, decl, scope, exported)
        }
        Declaration::Register(decl) => {
            collect_register(collection, decl, scope, exported)
        }
        Declaration::Variable(decl) => {
            collect_variable(collection, decl, scope, exported)
        }
        Declaration::Function(decl) => {
            collect_function(collection, decl, scope, visibility)
        }
        Declaration::Scope(decl) => collect_scope(collection, decl),
    }
}

/// Collect every declaration in a parsed translation unit. Returns the
/// (possibly partial) symbol table alongside any collection errors.
pub(crate) fn collect(
    program: &Program,
    file: &Path,
    source: &str,
) -> (SymbolTable, Vec<(CompileError, Span)>) {
    let mut collection = Collection::new(file, source);
    prepass(&mut collection, program);
    for declaration in &program.declarations {
        // Top-level declarations are visible to including files
        collect_declaration(
            &mut collection,
            declaration.value(),
            "",
            Visibility::Public,
        );
    }
    (collection.table, collection.errors)
}

impl Transpiler<Program> {
    /// Runs symbol collection over the parsed program. All collection
    /// errors for the file are gathered before failing.
    pub(crate) fn collect(
        self,
    ) -> Result<Transpiler<(Program, SymbolTable)>, WithSource<CompileError>>
    {
        let (table, errors) = collect(&self.stage, &self.path, &self.source);
        if errors.is_empty() {
            Ok(Transpiler {
                source: self.source,
                path: self.path,
                config: self.config,
                stage: (self.stage, table),
            })
        } else {
            let errors: Vec<_> = errors
                .into_iter()
                .map(|(error, span)| {
                    SourceErrorWrapper::new(error, span, &self.source)
                })
                .collect();
            Err(WithSource::new(errors, self.source))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn collect_src(src: &str) -> (SymbolTable, Vec<(CompileError, Span)>) {
        let program = parse::parse(src).expect("parse failed");
        collect(&program, Path::new("test.cnx"), src)
    }

    #[test]
    fn test_collect_enum_auto_increment() {
        let (table, errors) =
            collect_src("enum Mode { AUTO, MANUAL, SPECIAL <- 10, NEXT }");
        assert!(errors.is_empty());
        let symbol = table.enum_symbol("Mode").unwrap();
        assert_eq!(
            symbol.members,
            vec![
                ("AUTO".to_owned(), 0),
                ("MANUAL".to_owned(), 1),
                ("SPECIAL".to_owned(), 10),
                ("NEXT".to_owned(), 11),
            ]
        );
    }

    #[test]
    fn test_collect_enum_hex_and_binary_values() {
        let (table, errors) =
            collect_src("enum Flags { A <- 0x10, B <- 0b100 }");
        assert!(errors.is_empty());
        let symbol = table.enum_symbol("Flags").unwrap();
        assert_eq!(symbol.members[0].1, 16);
        assert_eq!(symbol.members[1].1, 4);
    }

    #[test]
    fn test_collect_enum_negative() {
        let (_, errors) = collect_src("enum Bad { A <- 0 - 1 }");
        assert!(matches!(
            errors[0].0,
            CompileError::EnumNegative { value: -1, .. }
        ));
    }

    #[test]
    fn test_collect_bitmap_offsets() {
        let (table, errors) = collect_src(
            "bitmap8 Status { enabled, running, error, warning, reserved[4] }",
        );
        assert!(errors.is_empty());
        let symbol = table.bitmap("Status").unwrap();
        assert_eq!(symbol.field("warning").unwrap().offset, 3);
        assert_eq!(symbol.field("reserved").unwrap().width, 4);
        assert_eq!(symbol.bit_width, 8);
    }

    #[test]
    fn test_collect_bitmap_width_mismatch() {
        let (_, errors) = collect_src("bitmap8 X { a[5], b[5] }");
        match &errors[0].0 {
            CompileError::BitmapWidthMismatch {
                name,
                actual,
                declared,
            } => {
                assert_eq!(name, "X");
                assert_eq!(*actual, 10);
                assert_eq!(*declared, 8);
            }
            other => panic!("expected width mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_bitmap24_backing() {
        let (table, errors) =
            collect_src("bitmap24 Wide { low[8], mid[8], high[8] }");
        assert!(errors.is_empty());
        let symbol = table.bitmap("Wide").unwrap();
        assert_eq!(symbol.bit_width, 24);
        assert_eq!(symbol.backing, crate::ast::PrimitiveType::U32);
    }

    #[test]
    fn test_collect_struct_string_field() {
        let (table, errors) = collect_src(
            "struct Config { u8 id; string<16> label; u32 grid[2][3]; }",
        );
        assert!(errors.is_empty());
        let symbol = table.struct_symbol("Config").unwrap();
        let label = symbol.field("label").unwrap();
        assert!(label.is_string);
        assert!(label.is_array);
        assert_eq!(label.dimensions, vec![17]);
        assert_eq!(label.string_capacity, Some(16));
        let grid = symbol.field("grid").unwrap();
        assert_eq!(grid.dimensions, vec![2, 3]);
    }

    #[test]
    fn test_collect_struct_const_dimension() {
        let (table, errors) = collect_src(
            "const u8 SIZE <- 4;
            struct Buffer { u8 data[SIZE]; }",
        );
        assert!(errors.is_empty());
        let symbol = table.struct_symbol("Buffer").unwrap();
        assert_eq!(symbol.field("data").unwrap().dimensions, vec![4]);
    }

    #[test]
    fn test_collect_scope_qualification() {
        let (table, errors) = collect_src(
            "scope Display {
                public enum Color { RED, GREEN }
                struct Pixel { Color color; u8 brightness; }
                public void clear() { }
            }",
        );
        assert!(errors.is_empty());
        assert!(table.enum_symbol("Display_Color").is_some());
        let pixel = table.struct_symbol("Display_Pixel").unwrap();
        assert_eq!(
            pixel.field("color").unwrap().base,
            BaseType::Named("Display_Color".to_owned())
        );
        let clear = &table.functions[0];
        assert_eq!(clear.meta.qualified_name(), "Display_clear");
        assert!(clear.meta.is_exported);
        // Default visibility is private
        let scope = &table.scopes[0];
        assert_eq!(
            scope.visibility.get("Pixel"),
            Some(&Visibility::Private)
        );
    }

    #[test]
    fn test_collect_register() {
        let (table, errors) = collect_src(
            "bitmap32 PortBits { data[16], mode[16] }
            register GPIOA @ 0x40020000 {
                MODER @ 0x00 : u32 rw;
                ODR @ 0x14 : u32 rw as PortBits;
            }",
        );
        assert!(errors.is_empty());
        let register = table.register("GPIOA").unwrap();
        assert_eq!(register.base_address, "0x40020000");
        let odr = register.member("ODR").unwrap();
        assert_eq!(odr.bitmap.as_deref(), Some("PortBits"));
        assert_eq!(odr.c_type, "uint32_t");
    }

    #[test]
    fn test_collect_register_unknown_bitmap() {
        let (_, errors) = collect_src(
            "register GPIOA @ 0x40020000 {
                ODR @ 0x14 : u32 rw as Missing;
            }",
        );
        assert!(matches!(
            errors[0].0,
            CompileError::UnknownTypeReference { .. }
        ));
    }

    #[test]
    fn test_collect_variable_inferred_dimension() {
        let (table, errors) = collect_src("u8 values[] <- [1, 2, 3];");
        assert!(errors.is_empty());
        assert_eq!(table.variables[0].dimensions, vec![3]);
    }

    #[test]
    fn test_collect_variable_fill_not_inferable() {
        let (_, errors) = collect_src("u8 values[] <- [0*];");
        assert!(matches!(
            errors[0].0,
            CompileError::InvalidConstantExpression { .. }
        ));
    }
}

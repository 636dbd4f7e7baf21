//! The code-generation engine: walks statements and expressions of a parsed
//! unit and emits C text plus a list of effects for the output composer.
//! Property accesses route through [crate::property]; assignments route
//! through [crate::assign].

use crate::{
    ast::{
        Block, Declaration, Expression, FunctionDecl, Program, ScopeDecl,
        SpanNode, Statement, TypeName, VariableDecl, Visibility,
    },
    error::CompileError,
    eval,
    property::{self, PropertyCtx},
    registry::{TypeInfo, TypeRegistry},
    symbol::{
        qualified_name, StructFieldInfo, SymbolIndex, SymbolTable,
    },
    util::Span,
    TranspileConfig,
};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use tracing::debug;

/// A side requirement that output assembly must honor, separate from the
/// text of any single fragment. Deduplicated by equality when merged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// `#include <...>` the named header in the implementation unit
    IncludeHeader(String),
    ForwardDeclare(String),
    RequireTypedef(String),
    DefineHelper { name: String, body: String },
}

/// Everything generated for one translation unit's `.c` body.
#[derive(Clone, Debug, Default)]
pub(crate) struct GeneratedUnit {
    pub globals: String,
    pub functions: String,
    pub effects: Vec<Effect>,
    pub errors: Vec<(CompileError, Span)>,
}

/// Static knowledge about an expression, used to resolve member chains.
enum ExprShape {
    /// A scope name: the next member qualifies
    Scope(String),
    /// A known enum type: the next member is a prefixed enum constant
    EnumType(String),
    /// A register group: the next member is an access macro
    RegisterGroup(String),
    /// A register member: `R_M`, possibly carrying a bitmap
    RegisterMember { register: String, member: String },
    /// An ordinary value with whatever type info we have
    Value {
        text: String,
        info: Option<TypeInfo>,
        struct_type: Option<String>,
        bitmap_type: Option<String>,
    },
}

pub(crate) struct CodeGen<'a> {
    pub symbols: &'a SymbolIndex,
    pub root: &'a SymbolTable,
    pub config: &'a TranspileConfig,
    pub external_types: &'a HashSet<String>,
    pub registry: TypeRegistry,
    pub effects: Vec<Effect>,
    pub errors: Vec<(CompileError, Span)>,
    pub length_cache: HashMap<String, String>,
    consts: HashMap<String, i64>,
    scope: String,
    main_args: Option<String>,
    out: String,
    indent: usize,
}

impl<'a> CodeGen<'a> {
    pub(crate) fn new(
        symbols: &'a SymbolIndex,
        root: &'a SymbolTable,
        external_types: &'a HashSet<String>,
        config: &'a TranspileConfig,
    ) -> Self {
        let mut registry = TypeRegistry::new();
        for variable in &root.variables {
            registry.register_variable(variable, symbols);
        }
        let consts = root.const_table();
        Self {
            symbols,
            root,
            config,
            external_types,
            registry,
            effects: Vec::new(),
            errors: Vec::new(),
            length_cache: HashMap::new(),
            consts,
            scope: String::new(),
            main_args: None,
            out: String::new(),
            indent: 0,
        }
    }

    pub(crate) fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub(crate) fn error(&mut self, error: CompileError, span: Span) {
        self.errors.push((error, span));
    }

    pub(crate) fn unsigned_constants(&self) -> bool {
        self.config.unsigned_constants
    }

    pub(crate) fn is_scope(&self, name: &str) -> bool {
        self.symbols
            .tables()
            .iter()
            .any(|table| table.scopes.iter().any(|s| s.meta.name == name))
    }

    /// Registry lookup for an identifier, falling back to the enclosing
    /// scope's qualified name.
    pub(crate) fn identifier_info(&self, name: &str) -> Option<TypeInfo> {
        if let Some(info) = self.registry.get(name) {
            return Some(info.clone());
        }
        if !self.scope.is_empty() {
            let qualified = qualified_name(&self.scope, name);
            if let Some(info) = self.registry.get(&qualified) {
                return Some(info.clone());
            }
        }
        None
    }

    /// The C spelling of an identifier: `argv` for main's args, the
    /// scope-qualified name for scope members, otherwise the name itself.
    pub(crate) fn resolve_identifier(&self, name: &str) -> String {
        if self.main_args.as_deref() == Some(name) {
            return "argv".to_owned();
        }
        if self.registry.get(name).is_none() && !self.scope.is_empty() {
            let qualified = qualified_name(&self.scope, name);
            if self.registry.get(&qualified).is_some() {
                return qualified;
            }
        }
        name.to_owned()
    }

    /// Struct-field lookup across every reachable symbol table.
    pub(crate) fn struct_field(
        &self,
        struct_name: &str,
        field: &str,
    ) -> Option<StructFieldInfo> {
        self.symbols
            .struct_symbol(struct_name)
            .and_then(|symbol| symbol.field(field))
            .cloned()
    }

    /// Resolve a type name against the current scope, verifying that user
    /// types exist somewhere in the reachable tables.
    fn resolve_type_name(
        &mut self,
        ty: &SpanNode<TypeName>,
    ) -> (String, bool, Option<u64>) {
        match ty.value() {
            TypeName::Primitive(primitive) => {
                if *primitive == crate::ast::PrimitiveType::Bool {
                    self.effect(Effect::IncludeHeader("stdbool.h".into()));
                }
                (primitive.c_type().to_owned(), false, None)
            }
            TypeName::String(capacity) => {
                let capacity = match capacity {
                    crate::ast::ArraySize::Literal(value) => Some(*value),
                    crate::ast::ArraySize::Named(name) => self
                        .consts
                        .get(name)
                        .copied()
                        .filter(|v| *v >= 0)
                        .map(|v| v as u64),
                    crate::ast::ArraySize::Inferred => None,
                };
                ("char".to_owned(), true, capacity)
            }
            TypeName::User { scope, name } => {
                let qualified = match scope {
                    Some(explicit) => qualified_name(explicit, name),
                    None => {
                        let scoped = qualified_name(&self.scope, name);
                        if !self.scope.is_empty()
                            && self.user_type_exists(&scoped)
                        {
                            scoped
                        } else {
                            name.clone()
                        }
                    }
                };
                if !self.user_type_exists(&qualified) {
                    self.error(
                        CompileError::UnknownTypeReference {
                            name: qualified.clone(),
                        },
                        *ty.metadata(),
                    );
                }
                (qualified, false, None)
            }
        }
    }

    fn user_type_exists(&self, name: &str) -> bool {
        self.symbols.struct_symbol(name).is_some()
            || self.symbols.is_known_enum(name)
            || self.symbols.is_known_bitmap(name)
            || self.external_types.contains(name)
    }

    // ===== Expressions =====

    pub(crate) fn expr_text(&mut self, expr: &SpanNode<Expression>) -> String {
        // Integer-literal arithmetic folds before anything else
        if let Expression::Binary { .. } = expr.value() {
            if let Some(folded) = eval::fold_expression(expr.value()) {
                return folded.to_string();
            }
        }
        match expr.value() {
            Expression::IntLiteral { raw, .. } => raw.clone(),
            Expression::FloatLiteral(raw) => raw.clone(),
            Expression::StringLiteral(text) => format!("\"{}\"", text),
            Expression::CharLiteral(raw) => raw.clone(),
            Expression::BoolLiteral(value) => {
                self.effect(Effect::IncludeHeader("stdbool.h".into()));
                if *value { "true" } else { "false" }.to_owned()
            }
            Expression::Identifier(name) => self.resolve_identifier(name),
            Expression::Paren(inner) => {
                format!("({})", self.expr_text(inner))
            }
            Expression::Unary { op, operand } => {
                format!("{}{}", op.c_op(), self.expr_text(operand))
            }
            Expression::Binary { op, lhs, rhs } => format!(
                "{} {} {}",
                self.expr_text(lhs),
                op.c_op(),
                self.expr_text(rhs)
            ),
            Expression::ArrayInit(elements) => {
                let parts: Vec<String> = elements
                    .iter()
                    .map(|element| self.expr_text(element))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Expression::ArrayFill(value) => {
                let text = self.expr_text(value);
                format!("{{{}}}", text)
            }
            Expression::Call { callee, args } => self.call_text(callee, args),
            Expression::Member { base, member } => {
                self.member_text(base, member)
            }
            Expression::Index { base, indices } => {
                match self.index_shape(base, indices) {
                    ExprShape::Value { text, .. } => text,
                    _ => String::new(),
                }
            }
        }
    }

    fn call_text(
        &mut self,
        callee: &SpanNode<Expression>,
        args: &[SpanNode<Expression>],
    ) -> String {
        let args_text: Vec<String> =
            args.iter().map(|arg| self.expr_text(arg)).collect();
        let callee_text = match callee.value() {
            Expression::Identifier(name) => self.resolve_function(name),
            Expression::Member { base, member } => match base.value() {
                Expression::Identifier(scope)
                    if self.is_scope(scope) =>
                {
                    qualified_name(scope, member.value())
                }
                _ => self.expr_text(callee),
            },
            _ => self.expr_text(callee),
        };
        format!("{}({})", callee_text, args_text.join(", "))
    }

    /// Function references qualify against the current scope first.
    fn resolve_function(&self, name: &str) -> String {
        if !self.scope.is_empty() {
            let in_scope = self.root.functions.iter().any(|function| {
                function.meta.scope == self.scope
                    && function.meta.name == name
            });
            if in_scope {
                return qualified_name(&self.scope, name);
            }
        }
        name.to_owned()
    }

    fn shape(&mut self, expr: &SpanNode<Expression>) -> ExprShape {
        match expr.value() {
            Expression::Identifier(name) => {
                if self.is_scope(name) {
                    return ExprShape::Scope(name.clone());
                }
                if self.symbols.register(name).is_some() {
                    return ExprShape::RegisterGroup(name.clone());
                }
                if let Some(qualified) = self.known_enum_name(name) {
                    return ExprShape::EnumType(qualified);
                }
                let info = self.identifier_info(name);
                ExprShape::Value {
                    text: self.resolve_identifier(name),
                    struct_type: info.as_ref().and_then(|i| {
                        self.symbols
                            .struct_symbol(&i.base_type)
                            .map(|s| s.meta.qualified_name())
                    }),
                    bitmap_type: info
                        .as_ref()
                        .and_then(|i| i.bitmap_type_name.clone()),
                    info,
                }
            }
            Expression::Member { base, member } => {
                let base_shape = self.shape(base);
                self.member_shape(base_shape, member)
            }
            Expression::Index { base, indices } => {
                self.index_shape(base, indices)
            }
            _ => ExprShape::Value {
                text: self.expr_text(expr),
                info: None,
                struct_type: None,
                bitmap_type: None,
            },
        }
    }

    /// An enum name visible from the current position, qualified.
    fn known_enum_name(&self, name: &str) -> Option<String> {
        if self.symbols.is_known_enum(name) {
            return Some(name.to_owned());
        }
        if !self.scope.is_empty() {
            let qualified = qualified_name(&self.scope, name);
            if self.symbols.is_known_enum(&qualified) {
                return Some(qualified);
            }
        }
        None
    }

    fn member_shape(
        &mut self,
        base: ExprShape,
        member: &SpanNode<String>,
    ) -> ExprShape {
        let member_name = member.value();
        match base {
            ExprShape::Scope(scope) => {
                let qualified = qualified_name(&scope, member_name);
                if self.symbols.is_known_enum(&qualified) {
                    return ExprShape::EnumType(qualified);
                }
                let info = self.registry.get(&qualified).cloned();
                ExprShape::Value {
                    struct_type: info.as_ref().and_then(|i| {
                        self.symbols
                            .struct_symbol(&i.base_type)
                            .map(|s| s.meta.qualified_name())
                    }),
                    bitmap_type: info
                        .as_ref()
                        .and_then(|i| i.bitmap_type_name.clone()),
                    text: qualified,
                    info,
                }
            }
            // Enum prefixing: `Mode.AUTO` lowers to `Mode_AUTO`
            ExprShape::EnumType(enum_name) => ExprShape::Value {
                text: format!("{}_{}", enum_name, member_name),
                info: Some(TypeInfo::plain("i32")),
                struct_type: None,
                bitmap_type: None,
            },
            ExprShape::RegisterGroup(register) => {
                ExprShape::RegisterMember {
                    register,
                    member: member_name.clone(),
                }
            }
            ExprShape::RegisterMember { register, member } => {
                // Reading a field through the member's bitmap
                let read = self
                    .symbols
                    .register(&register)
                    .and_then(|r| r.member(&member))
                    .and_then(|info| info.bitmap.clone())
                    .and_then(|bitmap| {
                        self.symbols
                            .bitmap(&bitmap)
                            .and_then(|b| b.field(member_name))
                    })
                    .map(|field| {
                        property::bitmap_field_read(
                            &format!("{}_{}", register, member),
                            field,
                        )
                    });
                ExprShape::Value {
                    text: read.unwrap_or_else(|| {
                        format!("{}_{}.{}", register, member, member_name)
                    }),
                    info: None,
                    struct_type: None,
                    bitmap_type: None,
                }
            }
            ExprShape::Value {
                text,
                info,
                struct_type,
                bitmap_type,
            } => {
                // Bitmap field read
                if let Some(bitmap_name) = bitmap_type.as_deref() {
                    if let Some(field) = self
                        .symbols
                        .bitmap(bitmap_name)
                        .and_then(|bitmap| bitmap.field(member_name))
                    {
                        return ExprShape::Value {
                            text: property::bitmap_field_read(&text, field),
                            info: info.map(|mut i| {
                                i.is_bitmap = false;
                                i.bitmap_type_name = None;
                                i
                            }),
                            struct_type: None,
                            bitmap_type: None,
                        };
                    }
                }
                // Struct field access keeps the C dot spelling
                let field = struct_type
                    .as_deref()
                    .and_then(|name| self.struct_field(name, member_name));
                match field {
                    Some(field) => {
                        let base_name = field.base.display_name();
                        let mut info = TypeInfo::plain(base_name.clone())
                            .with_dimensions(&field.dimensions);
                        info.is_string = field.is_string;
                        info.string_capacity = field.string_capacity;
                        ExprShape::Value {
                            text: format!("{}.{}", text, member_name),
                            struct_type: self
                                .symbols
                                .struct_symbol(&base_name)
                                .map(|s| s.meta.qualified_name()),
                            bitmap_type: self
                                .symbols
                                .bitmap(&base_name)
                                .map(|b| b.meta.qualified_name()),
                            info: Some(info),
                        }
                    }
                    None => ExprShape::Value {
                        text: format!("{}.{}", text, member_name),
                        info: None,
                        struct_type: None,
                        bitmap_type: None,
                    },
                }
            }
        }
    }

    fn index_shape(
        &mut self,
        base: &SpanNode<Expression>,
        indices: &[SpanNode<Expression>],
    ) -> ExprShape {
        let base_shape = self.shape(base);
        let index_texts: Vec<String> =
            indices.iter().map(|index| self.expr_text(index)).collect();
        match base_shape {
            ExprShape::Value {
                text,
                info,
                struct_type,
                bitmap_type,
            } => {
                let is_array = info
                    .as_ref()
                    .map(|i| i.is_array || i.is_string)
                    .unwrap_or(true);
                if indices.len() == 2 {
                    // Two indices are a bit-range read
                    let mask = match indices[1].value() {
                        Expression::IntLiteral { value, .. }
                            if *value > 0 =>
                        {
                            format!(
                                "0x{:X}",
                                property::low_bit_mask(*value as u32)
                            )
                        }
                        _ => format!("((1 << {}) - 1)", index_texts[1]),
                    };
                    return ExprShape::Value {
                        text: format!(
                            "(({} >> {}) & {})",
                            text, index_texts[0], mask
                        ),
                        info: info.clone(),
                        struct_type: None,
                        bitmap_type: None,
                    };
                }
                if !is_array {
                    // Single-index subscript on a non-array integer is a
                    // bit read
                    return ExprShape::Value {
                        text: format!(
                            "(({} >> {}) & 1)",
                            text, index_texts[0]
                        ),
                        info,
                        struct_type: None,
                        bitmap_type: None,
                    };
                }
                // Ordinary array element; one dimension is consumed
                let info = info.map(|mut i| {
                    if !i.array_dimensions.is_empty() {
                        i.array_dimensions.remove(0);
                    }
                    i.is_array = !i.array_dimensions.is_empty();
                    i
                });
                ExprShape::Value {
                    text: format!("{}[{}]", text, index_texts[0]),
                    info,
                    struct_type,
                    bitmap_type,
                }
            }
            other => {
                let text = match other {
                    ExprShape::RegisterMember { register, member } => {
                        format!("{}_{}", register, member)
                    }
                    ExprShape::Scope(name)
                    | ExprShape::EnumType(name)
                    | ExprShape::RegisterGroup(name) => name,
                    ExprShape::Value { text, .. } => text,
                };
                ExprShape::Value {
                    text: format!("{}[{}]", text, index_texts.join("][")),
                    info: None,
                    struct_type: None,
                    bitmap_type: None,
                }
            }
        }
    }

    fn member_text(
        &mut self,
        base: &SpanNode<Expression>,
        member: &SpanNode<String>,
    ) -> String {
        // Reflection properties get the policy table
        match member.value().as_str() {
            "length" => return self.property_text(base, "length"),
            "capacity" => return self.property_text(base, "capacity"),
            "size" => return self.property_text(base, "size"),
            _ => {}
        }
        let base_shape = self.shape(base);
        match self.member_shape(base_shape, member) {
            ExprShape::Value { text, .. } => text,
            ExprShape::RegisterMember { register, member } => {
                format!("{}_{}", register, member)
            }
            ExprShape::Scope(name)
            | ExprShape::EnumType(name)
            | ExprShape::RegisterGroup(name) => name,
        }
    }

    /// Build the receiver context for `.length`/`.capacity`/`.size` and
    /// delegate to the property generator.
    fn property_text(
        &mut self,
        receiver: &SpanNode<Expression>,
        prop: &'static str,
    ) -> String {
        let receiver_text = self.expr_text(receiver);

        // Peel single-index subscripts to find the core receiver
        let mut subscript_depth = 0usize;
        let mut core = receiver;
        while let Expression::Index { base, indices } = core.value() {
            if indices.len() != 1 {
                break;
            }
            subscript_depth += 1;
            core = base;
        }

        let mut primary_id = String::new();
        let mut previous_struct_type = None;
        let mut previous_member_name = None;
        let mut type_info = None;
        match core.value() {
            Expression::Identifier(name) => {
                primary_id = name.clone();
                type_info = self.identifier_info(name);
            }
            Expression::Member { base, member } => {
                match self.shape(base) {
                    ExprShape::Value {
                        struct_type: Some(struct_name),
                        ..
                    } => {
                        previous_struct_type = Some(struct_name);
                        previous_member_name = Some(member.value().clone());
                        if let Expression::Identifier(name) = base.value() {
                            primary_id = name.clone();
                        }
                    }
                    ExprShape::Scope(scope) => {
                        // Scope variable: treat like a plain identifier
                        let qualified =
                            qualified_name(&scope, member.value());
                        type_info = self.registry.get(&qualified).cloned();
                        primary_id = qualified;
                    }
                    _ => {
                        if let Expression::Identifier(name) = base.value() {
                            primary_id = name.clone();
                        }
                    }
                }
            }
            _ => {}
        }

        let symbols = self.symbols;
        let lookup = move |struct_name: &str, field: &str| {
            symbols
                .struct_symbol(struct_name)
                .and_then(|symbol| symbol.field(field))
                .cloned()
        };

        let mut ctx = PropertyCtx {
            current_result_text: receiver_text,
            primary_id,
            subscript_depth,
            previous_struct_type,
            previous_member_name,
            type_info,
            main_args_name: self.main_args.clone(),
            length_cache: &mut self.length_cache,
        };

        let output = match prop {
            "length" => property::gen_length(&mut ctx, &lookup),
            other => match property::gen_capacity_or_size(
                &ctx, other, &lookup,
            ) {
                Ok(output) => output,
                Err(error) => {
                    let span = *receiver.metadata();
                    self.errors.push((error, span));
                    crate::property::PropertyOutput {
                        text: "/* capacity/size on non-string */ 0"
                            .to_owned(),
                        effects: Vec::new(),
                    }
                }
            },
        };
        for effect in output.effects {
            self.effect(effect);
        }
        output.text
    }

    // ===== Statements =====

    fn push_line(&mut self, line: &str) {
        for part in line.split('\n') {
            if part.is_empty() {
                self.out.push('\n');
            } else {
                let _ = writeln!(
                    self.out,
                    "{:indent$}{}",
                    "",
                    part,
                    indent = self.indent * 4
                );
            }
        }
    }

    fn gen_block(&mut self, block: &Block) {
        self.indent += 1;
        for statement in &block.statements {
            self.gen_statement(statement);
        }
        self.indent -= 1;
    }

    fn gen_statement(&mut self, statement: &SpanNode<Statement>) {
        match statement.value() {
            Statement::Variable(decl) => {
                let text = self.variable_text(decl, false);
                self.push_line(&text);
            }
            Statement::Assignment(assignment) => {
                let text = crate::assign::generate_assignment(
                    self,
                    assignment,
                    *statement.metadata(),
                );
                self.push_line(&text);
            }
            Statement::Expression(expr) => {
                let text = self.expr_text(expr);
                self.push_line(&format!("{};", text));
            }
            Statement::If { arms, else_body } => {
                for (i, (condition, body)) in arms.iter().enumerate() {
                    let condition_text = self.expr_text(condition);
                    if i == 0 {
                        self.push_line(&format!(
                            "if ({}) {{",
                            condition_text
                        ));
                    } else {
                        self.push_line(&format!(
                            "}} else if ({}) {{",
                            condition_text
                        ));
                    }
                    self.gen_block(body);
                }
                if let Some(body) = else_body {
                    self.push_line("} else {");
                    self.gen_block(body);
                }
                self.push_line("}");
            }
            Statement::While { condition, body } => {
                let condition_text = self.expr_text(condition);
                self.push_line(&format!("while ({}) {{", condition_text));
                self.gen_block(body);
                self.push_line("}");
            }
            Statement::For {
                init,
                condition,
                step,
                body,
            } => {
                let init_text = match init {
                    Some(statement) => {
                        self.clause_text(statement.value(), true)
                    }
                    None => ";".to_owned(),
                };
                let condition_text = condition
                    .as_ref()
                    .map(|expr| self.expr_text(expr))
                    .unwrap_or_default();
                let step_text = match step {
                    Some(statement) => {
                        self.clause_text(statement.value(), false)
                    }
                    None => String::new(),
                };
                self.push_line(&format!(
                    "for ({} {}; {}) {{",
                    init_text, condition_text, step_text
                ));
                self.gen_block(body);
                self.push_line("}");
            }
            Statement::Return(value) => match value {
                Some(expr) => {
                    let text = self.expr_text(expr);
                    self.push_line(&format!("return {};", text));
                }
                None => self.push_line("return;"),
            },
            Statement::Break => self.push_line("break;"),
            Statement::Continue => self.push_line("continue;"),
            Statement::Block(block) => {
                self.push_line("{");
                self.gen_block(block);
                self.push_line("}");
            }
        }
    }

    /// A `for`-header clause: a declaration or assignment, with or without
    /// the trailing semicolon.
    fn clause_text(
        &mut self,
        statement: &Statement,
        with_semicolon: bool,
    ) -> String {
        let text = match statement {
            Statement::Variable(decl) => self.variable_text(decl, false),
            Statement::Assignment(assignment) => {
                crate::assign::generate_assignment(
                    self,
                    assignment,
                    Span::default(),
                )
            }
            Statement::Expression(expr) => {
                let text = self.expr_text(expr);
                format!("{};", text)
            }
            _ => String::new(),
        };
        let text = text.replace('\n', " ");
        if with_semicolon {
            text
        } else {
            text.trim_end_matches(';').to_owned()
        }
    }

    // ===== Declarations =====

    /// Emit one variable declaration (local or global). Registers the
    /// variable's type info for subsequent statements.
    fn variable_text(
        &mut self,
        decl: &VariableDecl,
        global: bool,
    ) -> String {
        let (c_type, is_string, capacity) =
            self.resolve_type_name(&decl.ty);
        let name = qualified_name(&self.scope, decl.name.value());
        let local_name = decl.name.value().clone();

        // Evaluate dimensions, inferring `[]` from the initializer
        let mut dimensions: Vec<u64> = Vec::new();
        for (depth, size) in decl.dimensions.iter().enumerate() {
            match size.value() {
                crate::ast::ArraySize::Literal(value) => {
                    dimensions.push(*value)
                }
                crate::ast::ArraySize::Named(named) => {
                    match self.consts.get(named).copied() {
                        Some(value) if value >= 0 => {
                            dimensions.push(value as u64)
                        }
                        _ => {
                            self.error(
                                CompileError::InvalidConstantExpression {
                                    text: named.clone(),
                                },
                                *size.metadata(),
                            );
                        }
                    }
                }
                crate::ast::ArraySize::Inferred => {
                    match decl.init.as_ref().and_then(|init| {
                        eval::infer_dimension(init.value(), depth)
                    }) {
                        Some(value) => dimensions.push(value),
                        None => self.error(
                            CompileError::InvalidConstantExpression {
                                text: "[]".to_owned(),
                            },
                            *size.metadata(),
                        ),
                    }
                }
            }
        }

        // Record the registry entry under the emitted name
        self.register_declared(
            &if global { name.clone() } else { local_name.clone() },
            &c_type,
            decl,
            &dimensions,
            is_string,
            capacity,
        );

        let mut text = String::new();
        if decl.qualifiers.is_const {
            text.push_str("const ");
        }
        if decl.qualifiers.is_atomic {
            self.effect(Effect::IncludeHeader("stdatomic.h".into()));
            text.push_str("_Atomic ");
        }
        text.push_str(&c_type);
        text.push(' ');
        text.push_str(if global { &name } else { &local_name });
        for dimension in &dimensions {
            let _ = write!(text, "[{}]", dimension);
        }
        if let Some(capacity) = capacity {
            let _ = write!(text, "[{}]", capacity + 1);
        }
        if let Some(init) = &decl.init {
            let total: u64 = dimensions.iter().product();
            let init_text = match init.value() {
                Expression::ArrayFill(fill) => {
                    let value = self.expr_text(fill);
                    if value == "0" || total == 0 {
                        "{0}".to_owned()
                    } else {
                        let parts =
                            vec![value; total as usize].join(", ");
                        format!("{{{}}}", parts)
                    }
                }
                _ => self.expr_text(init),
            };
            let _ = write!(text, " = {}", init_text);
        }
        text.push(';');
        text
    }

    fn register_declared(
        &mut self,
        name: &str,
        c_type: &str,
        decl: &VariableDecl,
        dimensions: &[u64],
        is_string: bool,
        capacity: Option<u64>,
    ) {
        if decl.qualifiers.is_const {
            if let Some(init) = &decl.init {
                if let Some(value) = eval::fold_expression(init.value()) {
                    self.consts.insert(name.to_owned(), value);
                    self.consts
                        .insert(decl.name.value().clone(), value);
                }
            }
        }
        if is_string {
            let mut info = TypeInfo::string(capacity.unwrap_or(0));
            info.is_array = !dimensions.is_empty();
            info.array_dimensions = dimensions.to_vec();
            info.is_const = decl.qualifiers.is_const;
            info.is_atomic = decl.qualifiers.is_atomic;
            info.overflow = decl.qualifiers.overflow;
            self.registry.set(name, info);
            return;
        }
        let base_name = match decl.ty.value() {
            TypeName::Primitive(primitive) => primitive.name().to_owned(),
            _ => c_type.to_owned(),
        };
        if self.registry.try_register_enum_type(
            name,
            &base_name,
            self.symbols,
            decl.qualifiers.is_const,
        ) {
            return;
        }
        if self.registry.try_register_bitmap_type(
            name,
            &base_name,
            dimensions,
            self.symbols,
            decl.qualifiers.is_const,
        ) {
            return;
        }
        let mut info =
            TypeInfo::plain(base_name).with_dimensions(dimensions);
        info.is_const = decl.qualifiers.is_const;
        info.is_atomic = decl.qualifiers.is_atomic;
        info.overflow = decl.qualifiers.overflow;
        self.registry.set(name, info);
    }

    fn gen_function(
        &mut self,
        decl: &FunctionDecl,
        visibility: Visibility,
    ) {
        self.length_cache.clear();
        let name = decl.name.value();
        let symbol = self
            .root
            .functions
            .iter()
            .find(|function| {
                function.meta.scope == self.scope
                    && &function.meta.name == name
            })
            .cloned();
        let symbol = match symbol {
            Some(symbol) => symbol,
            None => return,
        };

        let is_main = self.scope.is_empty() && name == "main";
        if is_main {
            self.main_args = decl
                .params
                .first()
                .filter(|param| {
                    matches!(param.ty.value(), TypeName::String(_))
                })
                .map(|param| param.name.value().clone());
        }

        let signature = crate::header::function_signature(&symbol);
        let prefix = if visibility == Visibility::Private
            && !self.scope.is_empty()
        {
            "static "
        } else {
            ""
        };
        self.push_line(&format!("{}{} {{", prefix, signature));

        for param in &symbol.params {
            self.registry.register_param(param, self.symbols);
        }
        self.gen_block(&decl.body);
        self.push_line("}");
        self.push_line("");

        if is_main {
            self.main_args = None;
        }
    }

    fn gen_scope(&mut self, decl: &ScopeDecl, globals: &mut String) {
        self.scope = decl.name.value().clone();
        for member in &decl.members {
            let visibility = member
                .visibility
                .as_ref()
                .map(|v| *v.value())
                .unwrap_or(Visibility::Private);
            match member.declaration.value() {
                Declaration::Function(function) => {
                    self.gen_function(function, visibility)
                }
                Declaration::Variable(variable) => {
                    let text = self.variable_text(variable, true);
                    globals.push_str(&text);
                    globals.push('\n');
                }
                // Types live in the header
                _ => {}
            }
        }
        self.scope.clear();
    }
}

/// Generate the `.c`-side content for one unit: global definitions and
/// function bodies, plus the effects and diagnostics gathered on the way.
pub(crate) fn generate_unit(
    program: &Program,
    root: &SymbolTable,
    symbols: &SymbolIndex,
    external_types: &HashSet<String>,
    config: &TranspileConfig,
) -> GeneratedUnit {
    debug!(file = %root.file.display(), "generating unit");
    let mut gen = CodeGen::new(symbols, root, external_types, config);
    let mut globals = String::new();

    for declaration in &program.declarations {
        match declaration.value() {
            Declaration::Variable(decl) => {
                let text = gen.variable_text(decl, true);
                globals.push_str(&text);
                globals.push('\n');
            }
            Declaration::Function(decl) => {
                gen.gen_function(decl, Visibility::Public)
            }
            Declaration::Scope(decl) => {
                gen.gen_scope(decl, &mut globals)
            }
            // Enums, bitmaps, structs and registers only produce header
            // declarations
            _ => {}
        }
    }

    GeneratedUnit {
        globals,
        functions: gen.out,
        effects: gen.effects,
        errors: gen.errors,
    }
}

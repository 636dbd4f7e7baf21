//! Assignment lowering. The generator extracts an assignment context from
//! the target chain, a classifier picks the handler kind, and an exhaustive
//! match dispatches. Each handler owns one emission pattern.

use crate::{
    ast::{
        AssignOp, Assignment, Expression, SpanNode, TargetOp,
    },
    error::CompileError,
    generate::{CodeGen, Effect},
    property::low_bit_mask,
    registry::{bit_width, TypeInfo},
    symbol::{BitFieldInfo, RegisterMemberInfo},
    util::Span,
};

/// The closed set of assignment shapes. Dispatch is an exhaustive match;
/// there is nothing open-ended to register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum AssignKind {
    Simple,
    BitmapField,
    RegisterMember,
    String,
    BitAccess,
    ArrayElement,
    Special,
    AccessPattern,
}

/// Classify an assignment from its extracted context: the base identifier's
/// type info and the shape of the postfix chain.
pub(crate) fn classify(
    assignment: &Assignment,
    base_info: Option<&TypeInfo>,
    is_register_base: bool,
) -> AssignKind {
    // Const targets fail regardless of shape
    if base_info.map(|info| info.is_const).unwrap_or(false) {
        return AssignKind::Special;
    }
    let ops = &assignment.target.ops;
    match ops.len() {
        0 => {
            let info = match base_info {
                Some(info) => info,
                None => return AssignKind::Simple,
            };
            if info.is_string && !info.is_array {
                return AssignKind::String;
            }
            if info.is_atomic
                || info.overflow != crate::ast::OverflowBehavior::Wrap
            {
                return AssignKind::Special;
            }
            AssignKind::Simple
        }
        1 => match ops[0].value() {
            TargetOp::Member(_) => {
                if is_register_base {
                    AssignKind::RegisterMember
                } else if base_info
                    .map(|info| info.is_bitmap)
                    .unwrap_or(false)
                {
                    AssignKind::BitmapField
                } else {
                    // Struct fields: strings get the strncpy pattern,
                    // everything else is a plain member write
                    AssignKind::AccessPattern
                }
            }
            TargetOp::Index(_) => {
                if base_info.map(|info| info.is_array).unwrap_or(false) {
                    AssignKind::ArrayElement
                } else {
                    // A single-index subscript on a non-array integer is
                    // bit extraction, not array indexing
                    AssignKind::BitAccess
                }
            }
            TargetOp::BitRange(_, _) => AssignKind::BitAccess,
        },
        _ => AssignKind::AccessPattern,
    }
}

/// State carried while resolving a chained target like `a.b[i].c`.
struct ChainState {
    text: String,
    struct_type: Option<String>,
    bitmap_type: Option<String>,
    is_string: bool,
    string_capacity: Option<u64>,
    backing_bits: u32,
}

impl ChainState {
    fn from_base(gen: &CodeGen<'_>, base: &str, info: Option<&TypeInfo>) -> Self {
        let struct_type = info.and_then(|info| {
            gen.symbols
                .struct_symbol(&info.base_type)
                .map(|symbol| symbol.meta.qualified_name())
        });
        Self {
            text: gen.resolve_identifier(base),
            struct_type,
            bitmap_type: info.and_then(|i| i.bitmap_type_name.clone()),
            is_string: info.map(|i| i.is_string).unwrap_or(false),
            string_capacity: info.and_then(|i| i.string_capacity),
            backing_bits: info.and_then(|i| i.bit_width).unwrap_or(32),
        }
    }

    fn apply_member(&mut self, gen: &CodeGen<'_>, member: &str) {
        self.text = format!("{}.{}", self.text, member);
        let field = self
            .struct_type
            .as_deref()
            .and_then(|name| gen.struct_field(name, member));
        match field {
            Some(field) => {
                let base_name = field.base.display_name();
                self.struct_type = gen
                    .symbols
                    .struct_symbol(&base_name)
                    .map(|s| s.meta.qualified_name());
                self.bitmap_type = gen
                    .symbols
                    .bitmap(&base_name)
                    .map(|b| b.meta.qualified_name());
                self.is_string = field.is_string;
                self.string_capacity = field.string_capacity;
                self.backing_bits = gen
                    .symbols
                    .bitmap(&base_name)
                    .map(|b| bit_width(b.backing.name()).unwrap_or(32))
                    .or_else(|| bit_width(&base_name))
                    .unwrap_or(32);
            }
            None => {
                self.struct_type = None;
                self.bitmap_type = None;
                self.is_string = false;
                self.string_capacity = None;
            }
        }
    }

    fn apply_index(&mut self, index_text: &str) {
        self.text = format!("{}[{}]", self.text, index_text);
    }
}

/// Whether the value expression is a bare boolean literal, unwrapping
/// parentheses.
fn bool_literal(expr: &Expression) -> Option<bool> {
    match expr {
        Expression::BoolLiteral(value) => Some(*value),
        Expression::Paren(inner) => bool_literal(inner.value()),
        _ => None,
    }
}

/// Whether the value is a string literal; returns the quoted C spelling.
fn string_literal(expr: &Expression) -> Option<String> {
    match expr {
        Expression::StringLiteral(text) => Some(format!("\"{}\"", text)),
        Expression::Paren(inner) => string_literal(inner.value()),
        _ => None,
    }
}

/// One read-modify-write line.
fn rmw(target: &str, mask_shift: &str, insert: &str) -> String {
    format!(
        "{target} = ({target} & ~{mask_shift}) | {insert};",
        target = target,
        mask_shift = mask_shift,
        insert = insert
    )
}

/// The integer-constant suffix for bit-twiddling at a given backing width.
/// `1U` is the canonical spelling; the legacy toggle drops the suffix.
/// 64-bit backings always take `ULL`.
fn const_suffix(unsigned: bool, backing_bits: u32) -> &'static str {
    if backing_bits == 64 {
        "ULL"
    } else if unsigned {
        "U"
    } else {
        ""
    }
}

/// Emit the masked bit-field write shared by bitmap fields, register
/// fields, and explicit bit-range targets.
fn bit_field_write_at(
    gen: &mut CodeGen<'_>,
    target: &str,
    field: BitFieldInfo,
    op: AssignOp,
    value: &SpanNode<Expression>,
    value_text: &str,
    backing_bits: u32,
) -> String {
    let suffix = const_suffix(gen.unsigned_constants(), backing_bits);
    let offset = field.offset;
    let mask = if field.width == 1 {
        format!("1{}", suffix)
    } else {
        format!("0x{:X}{}", low_bit_mask(field.width), suffix)
    };
    let mask_shift = format!("({} << {})", mask, offset);

    let insert = match op {
        AssignOp::Assign => {
            if field.width == 1 {
                // Boolean literals skip the AND entirely
                if let Some(literal) = bool_literal(value.value()) {
                    let bit = if literal { "1" } else { "0" };
                    format!("({}{} << {})", bit, suffix, offset)
                } else if backing_bits == 64 {
                    format!(
                        "(((uint64_t)({}) & {}) << {})",
                        value_text, mask, offset
                    )
                } else {
                    format!("(({} & {}) << {})", value_text, mask, offset)
                }
            } else if backing_bits == 64 {
                format!(
                    "(((uint64_t)({}) & {}) << {})",
                    value_text, mask, offset
                )
            } else {
                format!("(({} & {}) << {})", value_text, mask, offset)
            }
        }
        // Compound operators read the field, apply the operator, and
        // reinsert
        _ => {
            let read = format!("(({} >> {}) & {})", target, offset, mask);
            let binary = op
                .binary_op()
                .map(|binary| binary.c_op())
                .unwrap_or("+");
            if backing_bits == 64 {
                format!(
                    "(((uint64_t)({} {} {}) & {}) << {})",
                    read, binary, value_text, mask, offset
                )
            } else {
                format!(
                    "((({} {} {}) & {}) << {})",
                    read, binary, value_text, mask, offset
                )
            }
        }
    };
    rmw(target, &mask_shift, &insert)
}

/// `strncpy` plus explicit termination at the capacity index.
fn string_write(
    gen: &mut CodeGen<'_>,
    target: &str,
    capacity: u64,
    value: &SpanNode<Expression>,
) -> String {
    gen.effect(Effect::IncludeHeader("string.h".to_owned()));
    let source = match string_literal(value.value()) {
        Some(quoted) => quoted,
        None => gen.expr_text(value),
    };
    format!(
        "strncpy({target}, {source}, {capacity});\n\
         {target}[{capacity}] = '\\0';",
        target = target,
        source = source,
        capacity = capacity
    )
}

fn register_member_write(
    gen: &mut CodeGen<'_>,
    register: &str,
    member: &str,
    info: &RegisterMemberInfo,
    assignment: &Assignment,
    value_text: &str,
    span: Span,
) -> String {
    let macro_name = format!("{}_{}", register, member);
    match info.access {
        crate::ast::AccessMode::Ro => {
            gen.error(
                CompileError::RegisterReadOnly {
                    member: format!("{}.{}", register, member),
                },
                span,
            );
            format!(
                "/* cannot write to read-only register member {}.{} */",
                register, member
            )
        }
        crate::ast::AccessMode::Rw => {
            let word_bits = bit_width(&info.c_type).unwrap_or(32);
            let masked = info
                .bitmap
                .as_deref()
                .and_then(|bitmap| gen.symbols.bitmap(bitmap))
                .filter(|bitmap| bitmap.bit_width < word_bits)
                .map(|bitmap| bitmap.bit_width);
            match (assignment.op, masked) {
                // A narrower bitmap masks the whole-member write
                (AssignOp::Assign, Some(bits)) => {
                    let suffix =
                        const_suffix(gen.unsigned_constants(), word_bits);
                    let mask =
                        format!("0x{:X}{}", low_bit_mask(bits), suffix);
                    format!(
                        "{m} = ({m} & ~{mask}) | ({v} & {mask});",
                        m = macro_name,
                        mask = mask,
                        v = value_text
                    )
                }
                _ => format!(
                    "{} {} {};",
                    macro_name,
                    assignment.op.c_op(),
                    value_text
                ),
            }
        }
        // Write-only and write-one modes never read the prior value
        crate::ast::AccessMode::Wo
        | crate::ast::AccessMode::W1c
        | crate::ast::AccessMode::W1s => {
            format!("{} = {};", macro_name, value_text)
        }
    }
}

fn register_field_write(
    gen: &mut CodeGen<'_>,
    register: &str,
    member: &str,
    info: &RegisterMemberInfo,
    field_name: &str,
    assignment: &Assignment,
    value_text: &str,
    span: Span,
) -> String {
    let macro_name = format!("{}_{}", register, member);
    let word_bits = bit_width(&info.c_type).unwrap_or(32);
    let field = info
        .bitmap
        .as_deref()
        .and_then(|bitmap| gen.symbols.bitmap(bitmap))
        .and_then(|bitmap| bitmap.field(field_name));
    let field = match field {
        Some(field) => field,
        None => {
            gen.error(
                CompileError::UnknownTypeReference {
                    name: format!("{}.{}.{}", register, member, field_name),
                },
                span,
            );
            return format!(
                "/* unknown register field {}.{}.{} */",
                register, member, field_name
            );
        }
    };
    let suffix = const_suffix(gen.unsigned_constants(), word_bits);
    let mask = if field.width == 1 {
        format!("1{}", suffix)
    } else {
        format!("0x{:X}{}", low_bit_mask(field.width), suffix)
    };
    match info.access {
        crate::ast::AccessMode::Ro => {
            gen.error(
                CompileError::RegisterReadOnly {
                    member: format!("{}.{}", register, member),
                },
                span,
            );
            format!(
                "/* cannot write to read-only register member {}.{} */",
                register, member
            )
        }
        crate::ast::AccessMode::Rw => bit_field_write_at(
            gen,
            &macro_name,
            field,
            assignment.op,
            &assignment.value,
            value_text,
            word_bits,
        ),
        // Write-only: shift the value into place with no prior read
        crate::ast::AccessMode::Wo => format!(
            "{} = ({} & {}) << {};",
            macro_name, value_text, mask, field.offset
        ),
        // Write-one-to-clear/set: a single-word write of the bit pattern
        crate::ast::AccessMode::W1c | crate::ast::AccessMode::W1s => {
            match bool_literal(assignment.value.value()) {
                Some(true) => format!(
                    "{} = ({} << {});",
                    macro_name,
                    format!("1{}", suffix),
                    field.offset
                ),
                Some(false) => format!(
                    "{} = ({} << {});",
                    macro_name,
                    format!("0{}", suffix),
                    field.offset
                ),
                None => format!(
                    "{} = (({} & {}) << {});",
                    macro_name, value_text, mask, field.offset
                ),
            }
        }
    }
}

/// Bit writes spelled `x[offset]` or `x[offset, width]` on a non-array
/// integer.
fn bit_access_write(
    gen: &mut CodeGen<'_>,
    target: &str,
    backing_bits: u32,
    op: &TargetOp,
    assignment: &Assignment,
    value_text: &str,
) -> String {
    let suffix = const_suffix(gen.unsigned_constants(), backing_bits);
    match op {
        TargetOp::Index(offset) => {
            let offset_text = gen.expr_text(offset);
            let mask_shift = format!("(1{} << {})", suffix, offset_text);
            let insert = match bool_literal(assignment.value.value()) {
                Some(true) => {
                    format!("(1{} << {})", suffix, offset_text)
                }
                Some(false) => {
                    format!("(0{} << {})", suffix, offset_text)
                }
                None => format!(
                    "(({} & 1{}) << {})",
                    value_text, suffix, offset_text
                ),
            };
            rmw(target, &mask_shift, &insert)
        }
        TargetOp::BitRange(offset, width) => {
            let offset_text = gen.expr_text(offset);
            let mask = match width.value() {
                Expression::IntLiteral { value, .. } if *value > 0 => {
                    format!(
                        "0x{:X}{}",
                        low_bit_mask(*value as u32),
                        suffix
                    )
                }
                _ => {
                    let width_text = gen.expr_text(width);
                    format!("((1{s} << {w}) - 1{s})", s = suffix, w = width_text)
                }
            };
            let mask_shift = format!("({} << {})", mask, offset_text);
            let insert = format!(
                "(({} & {}) << {})",
                value_text, mask, offset_text
            );
            rmw(target, &mask_shift, &insert)
        }
        TargetOp::Member(_) => unreachable!("bit access is subscript-only"),
    }
}

/// The unsigned types saturate/trap helpers exist for.
fn overflow_helper_type(base: &str) -> Option<(&'static str, &'static str, &'static str)> {
    match base {
        "u8" => Some(("u8", "uint8_t", "UINT8_MAX")),
        "u16" => Some(("u16", "uint16_t", "UINT16_MAX")),
        "u32" => Some(("u32", "uint32_t", "UINT32_MAX")),
        "u64" => Some(("u64", "uint64_t", "UINT64_MAX")),
        _ => None,
    }
}

fn saturate_helper(kind: &str, short: &str, c_type: &str, max: &str) -> (String, String) {
    let name = format!("cnx_sat_{}_{}", kind, short);
    let body = if kind == "add" {
        format!(
            "static inline {c} {name}({c} a, {c} b) {{\n\
             \x20   {c} result = ({c})(a + b);\n\
             \x20   if (result < a) {{\n\
             \x20       result = {max};\n\
             \x20   }}\n\
             \x20   return result;\n\
             }}",
            c = c_type,
            name = name,
            max = max
        )
    } else {
        format!(
            "static inline {c} {name}({c} a, {c} b) {{\n\
             \x20   return (a < b) ? ({c})0 : ({c})(a - b);\n\
             }}",
            c = c_type,
            name = name
        )
    };
    (name, body)
}

fn trap_helper(kind: &str, short: &str, c_type: &str) -> (String, String) {
    let name = format!("cnx_trap_{}_{}", kind, short);
    let body = if kind == "add" {
        format!(
            "static inline {c} {name}({c} a, {c} b) {{\n\
             \x20   {c} result = ({c})(a + b);\n\
             \x20   if (result < a) {{\n\
             \x20       abort();\n\
             \x20   }}\n\
             \x20   return result;\n\
             }}",
            c = c_type,
            name = name
        )
    } else {
        format!(
            "static inline {c} {name}({c} a, {c} b) {{\n\
             \x20   if (a < b) {{\n\
             \x20       abort();\n\
             \x20   }}\n\
             \x20   return ({c})(a - b);\n\
             }}",
            c = c_type,
            name = name
        )
    };
    (name, body)
}

/// Atomic, overflow-checked, and const targets.
fn special_write(
    gen: &mut CodeGen<'_>,
    target: &str,
    info: &TypeInfo,
    assignment: &Assignment,
    value_text: &str,
    span: Span,
) -> String {
    if info.is_const {
        gen.error(CompileError::ConstAssignment, span);
        return format!("/* assignment to const {} */", target);
    }

    if info.is_atomic {
        gen.effect(Effect::IncludeHeader("stdatomic.h".to_owned()));
        return match assignment.op {
            AssignOp::Assign => {
                format!("atomic_store(&{}, {});", target, value_text)
            }
            AssignOp::Add => {
                format!("atomic_fetch_add(&{}, {});", target, value_text)
            }
            AssignOp::Sub => {
                format!("atomic_fetch_sub(&{}, {});", target, value_text)
            }
            AssignOp::And => {
                format!("atomic_fetch_and(&{}, {});", target, value_text)
            }
            AssignOp::Or => {
                format!("atomic_fetch_or(&{}, {});", target, value_text)
            }
            AssignOp::Xor => {
                format!("atomic_fetch_xor(&{}, {});", target, value_text)
            }
            _ => format!(
                "atomic_store(&{t}, (atomic_load(&{t}) {op} {v}));",
                t = target,
                op = assignment
                    .op
                    .binary_op()
                    .map(|b| b.c_op())
                    .unwrap_or("+"),
                v = value_text
            ),
        };
    }

    let overflow = info.overflow;
    let helper_kind = match assignment.op {
        AssignOp::Add => Some("add"),
        AssignOp::Sub => Some("sub"),
        _ => None,
    };
    if let (Some(kind), Some((short, c_type, max))) =
        (helper_kind, overflow_helper_type(&info.base_type))
    {
        match overflow {
            crate::ast::OverflowBehavior::Saturate => {
                let (name, body) = saturate_helper(kind, short, c_type, max);
                gen.effect(Effect::DefineHelper {
                    name: name.clone(),
                    body,
                });
                return format!(
                    "{t} = {name}({t}, {v});",
                    t = target,
                    name = name,
                    v = value_text
                );
            }
            crate::ast::OverflowBehavior::Trap => {
                let (name, body) = trap_helper(kind, short, c_type);
                gen.effect(Effect::IncludeHeader("stdlib.h".to_owned()));
                gen.effect(Effect::DefineHelper {
                    name: name.clone(),
                    body,
                });
                return format!(
                    "{t} = {name}({t}, {v});",
                    t = target,
                    name = name,
                    v = value_text
                );
            }
            crate::ast::OverflowBehavior::Wrap => {}
        }
    }

    // Plain assignment, or an operator the overflow helpers don't cover
    format!("{} {} {};", target, assignment.op.c_op(), value_text)
}

/// Chained targets: `a.b.c`, `s.field[i]`, `REG.member.field`. Resolves the
/// prefix, then dispatches on the final link.
fn access_pattern_write(
    gen: &mut CodeGen<'_>,
    assignment: &Assignment,
    base_info: Option<&TypeInfo>,
    value_text: &str,
    span: Span,
) -> String {
    let base = assignment.target.base.value();
    let ops = &assignment.target.ops;

    // Register chains: REG.member.field
    if gen.symbols.register(base).is_some() {
        if let (
            Some(TargetOp::Member(member)),
            Some(TargetOp::Member(field)),
        ) = (
            ops.get(0).map(|op| op.value()),
            ops.get(1).map(|op| op.value()),
        ) {
            let member_info = gen
                .symbols
                .register(base)
                .and_then(|register| register.member(member.value()))
                .cloned();
            if let Some(member_info) = member_info {
                return register_field_write(
                    gen,
                    base,
                    member.value(),
                    &member_info,
                    field.value(),
                    assignment,
                    value_text,
                    span,
                );
            }
        }
    }

    // Everything else: walk the chain, keeping type knowledge as long as
    // the links resolve
    let mut state = ChainState::from_base(gen, base, base_info);
    let (last, prefix) = match ops.split_last() {
        Some(split) => split,
        None => {
            return format!(
                "{} {} {};",
                state.text,
                assignment.op.c_op(),
                value_text
            )
        }
    };
    for op in prefix {
        match op.value() {
            TargetOp::Member(member) => {
                state.apply_member(gen, member.value())
            }
            TargetOp::Index(index) => {
                let index_text = gen.expr_text(index);
                state.apply_index(&index_text);
            }
            TargetOp::BitRange(_, _) => {
                // A bit range can only be the final link
                return format!(
                    "{} {} {};",
                    state.text,
                    assignment.op.c_op(),
                    value_text
                );
            }
        }
    }

    match last.value() {
        TargetOp::Member(member) => {
            // A member of a bitmap-typed link is a masked field write
            if let Some(bitmap_name) = state.bitmap_type.clone() {
                if let Some(field) = gen
                    .symbols
                    .bitmap(&bitmap_name)
                    .and_then(|bitmap| bitmap.field(member.value()))
                {
                    let backing = gen
                        .symbols
                        .bitmap(&bitmap_name)
                        .map(|bitmap| {
                            bit_width(bitmap.backing.name()).unwrap_or(32)
                        })
                        .unwrap_or(32);
                    return bit_field_write_at(
                        gen,
                        &state.text,
                        field,
                        assignment.op,
                        &assignment.value,
                        value_text,
                        backing,
                    );
                }
            }
            state.apply_member(gen, member.value());
            if state.is_string {
                if let Some(capacity) = state.string_capacity {
                    return string_write(
                        gen,
                        &state.text,
                        capacity,
                        &assignment.value,
                    );
                }
            }
            format!(
                "{} {} {};",
                state.text,
                assignment.op.c_op(),
                value_text
            )
        }
        TargetOp::Index(index) => {
            let index_text = gen.expr_text(index);
            format!(
                "{}[{}] {} {};",
                state.text,
                index_text,
                assignment.op.c_op(),
                value_text
            )
        }
        TargetOp::BitRange(_, _) => {
            let backing = state.backing_bits;
            let text = state.text.clone();
            bit_access_write(
                gen,
                &text,
                backing,
                last.value(),
                assignment,
                value_text,
            )
        }
    }
}

/// Lower one assignment statement to C. Returns the statement text, which
/// may span multiple lines; effects and diagnostics go through `gen`.
pub(crate) fn generate_assignment(
    gen: &mut CodeGen<'_>,
    assignment: &Assignment,
    span: Span,
) -> String {
    let mut assignment = assignment.clone();
    let mut base = assignment.target.base.value().clone();

    // Fold a leading scope qualifier into the base identifier, so
    // `Scope.var <- v` classifies like `Scope_var <- v`
    if gen.is_scope(&base) && !assignment.target.ops.is_empty() {
        if let TargetOp::Member(member) = assignment.target.ops[0].value() {
            base = format!("{}_{}", base, member.value());
            let member_span = *assignment.target.ops[0].metadata();
            assignment.target.base = crate::ast::Node(base.clone(), member_span);
            assignment.target.ops.remove(0);
        }
    }

    let base_info = gen.identifier_info(&base);
    let value_text = gen.expr_text(&assignment.value);
    let is_register_base = gen.symbols.register(&base).is_some();
    let kind = classify(&assignment, base_info.as_ref(), is_register_base);
    let target_text = gen.resolve_identifier(&base);

    // Assigning to a string invalidates any cached length for it
    gen.length_cache.remove(&base);

    match kind {
        AssignKind::Simple => format!(
            "{} {} {};",
            target_text,
            assignment.op.c_op(),
            value_text
        ),
        AssignKind::String => {
            let capacity = base_info
                .as_ref()
                .and_then(|info| info.string_capacity)
                .unwrap_or(0);
            string_write(gen, &target_text, capacity, &assignment.value)
        }
        AssignKind::BitmapField => {
            let field_name = match assignment.target.ops[0].value() {
                TargetOp::Member(member) => member.value().clone(),
                _ => unreachable!("bitmap field targets are member accesses"),
            };
            let bitmap_name = base_info
                .as_ref()
                .and_then(|info| info.bitmap_type_name.clone())
                .unwrap_or_default();
            let field = gen
                .symbols
                .bitmap(&bitmap_name)
                .and_then(|bitmap| bitmap.field(&field_name));
            match field {
                Some(field) => {
                    let backing = gen
                        .symbols
                        .bitmap(&bitmap_name)
                        .map(|bitmap| {
                            bit_width(bitmap.backing.name()).unwrap_or(32)
                        })
                        .unwrap_or(32);
                    bit_field_write_at(
                        gen,
                        &target_text,
                        field,
                        assignment.op,
                        &assignment.value,
                        &value_text,
                        backing,
                    )
                }
                None => {
                    gen.error(
                        CompileError::UnknownTypeReference {
                            name: format!("{}.{}", bitmap_name, field_name),
                        },
                        span,
                    );
                    format!(
                        "/* unknown bitmap field {}.{} */",
                        bitmap_name, field_name
                    )
                }
            }
        }
        AssignKind::RegisterMember => {
            let member_name = match assignment.target.ops[0].value() {
                TargetOp::Member(member) => member.value().clone(),
                _ => unreachable!("register targets are member accesses"),
            };
            let member_info = gen
                .symbols
                .register(&base)
                .and_then(|register| register.member(&member_name))
                .cloned();
            match member_info {
                Some(member_info) => register_member_write(
                    gen,
                    &base,
                    &member_name,
                    &member_info,
                    &assignment,
                    &value_text,
                    span,
                ),
                None => {
                    gen.error(
                        CompileError::UnknownTypeReference {
                            name: format!("{}.{}", base, member_name),
                        },
                        span,
                    );
                    format!(
                        "/* unknown register member {}.{} */",
                        base, member_name
                    )
                }
            }
        }
        AssignKind::BitAccess => {
            let backing = base_info
                .as_ref()
                .and_then(|info| info.bit_width)
                .unwrap_or(32);
            let op = assignment.target.ops[0].value().clone();
            bit_access_write(
                gen,
                &target_text,
                backing,
                &op,
                &assignment,
                &value_text,
            )
        }
        AssignKind::ArrayElement => {
            let index_text = match assignment.target.ops[0].value() {
                TargetOp::Index(index) => gen.expr_text(index),
                _ => unreachable!("array targets are subscripts"),
            };
            format!(
                "{}[{}] {} {};",
                target_text,
                index_text,
                assignment.op.c_op(),
                value_text
            )
        }
        AssignKind::Special => {
            let info = base_info.unwrap_or_else(|| TypeInfo::plain("u32"));
            special_write(
                gen,
                &target_text,
                &info,
                &assignment,
                &value_text,
                span,
            )
        }
        AssignKind::AccessPattern => access_pattern_write(
            gen,
            &assignment,
            base_info.as_ref(),
            &value_text,
            span,
        ),
    }
}

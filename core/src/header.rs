//! Header generation and output composition. The header carries every
//! public declaration of a unit: enums, bitmap backing typedefs, structs,
//! register access macros, and prototypes for exported functions. The
//! composer stitches the `.c` file together and deduplicates effects.

use crate::{
    ast::{IncludeStyle, Program},
    generate::{Effect, GeneratedUnit},
    include::classify_include,
    include::IncludeKind,
    symbol::{FunctionSymbol, SymbolIndex, SymbolTable, VariableSymbol},
    TranspileConfig,
};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

/// The file-name stem of a unit, used for guards and output names.
pub(crate) fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_owned())
}

fn guard_name(base: &str) -> String {
    let mut guard: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    guard.push_str("_H");
    guard
}

/// The C signature of a collected function. `main` gets the canonical C
/// entry-point shape.
pub(crate) fn function_signature(symbol: &FunctionSymbol) -> String {
    if symbol.meta.scope.is_empty() && symbol.meta.name == "main" {
        return "int main(int argc, char *argv[])".to_owned();
    }
    let params = if symbol.params.is_empty() {
        "void".to_owned()
    } else {
        let parts: Vec<String> = symbol
            .params
            .iter()
            .map(|param| {
                let constness = if param.is_const { "const " } else { "" };
                if param.is_string {
                    format!("{}char *{}", constness, param.name)
                } else if param.is_array {
                    format!(
                        "{}{} {}[]",
                        constness,
                        param.base.c_type(),
                        param.name
                    )
                } else {
                    format!(
                        "{}{} {}",
                        constness,
                        param.base.c_type(),
                        param.name
                    )
                }
            })
            .collect();
        parts.join(", ")
    };
    format!(
        "{} {}({})",
        symbol.return_type.c_type(),
        symbol.meta.qualified_name(),
        params
    )
}

fn variable_declaration(symbol: &VariableSymbol) -> String {
    let mut text = String::new();
    if symbol.is_const {
        text.push_str("const ");
    }
    if symbol.is_atomic {
        text.push_str("_Atomic ");
    }
    text.push_str(&symbol.base.c_type());
    text.push(' ');
    text.push_str(&symbol.meta.qualified_name());
    for dimension in &symbol.dimensions {
        let _ = write!(text, "[{}]", dimension);
    }
    if let Some(capacity) = symbol.string_capacity {
        let _ = write!(text, "[{}]", capacity + 1);
    }
    text
}

fn uses_bool(table: &SymbolTable) -> bool {
    let field_bool = table.structs.iter().any(|symbol| {
        symbol
            .fields
            .iter()
            .any(|(_, field)| field.base.c_type() == "bool")
    });
    let fn_bool = table.functions.iter().any(|symbol| {
        symbol.return_type.c_type() == "bool"
            || symbol
                .params
                .iter()
                .any(|param| param.base.c_type() == "bool")
    });
    field_bool || fn_bool
}

/// Generate the public header for one unit.
pub(crate) fn generate_header(
    program: &Program,
    root: &SymbolTable,
    symbols: &SymbolIndex,
    config: &TranspileConfig,
) -> String {
    let base = base_name(&root.file);
    let guard = guard_name(&base);
    let mut out = String::new();

    let _ = writeln!(out, "#ifndef {}", guard);
    let _ = writeln!(out, "#define {}", guard);
    out.push('\n');
    out.push_str("#include <stdint.h>\n");
    if uses_bool(root) {
        out.push_str("#include <stdbool.h>\n");
    }

    // Every direct `.cnx` include becomes an include of its generated
    // header, which is how transitively included declarations arrive
    for include in &program.includes {
        let directive = include.value();
        if classify_include(&directive.path) == IncludeKind::CNext {
            let stem = base_name(Path::new(&directive.path));
            let _ = writeln!(out, "#include \"{}.h\"", stem);
        }
    }
    out.push('\n');

    // Enums. Anything already declared in a transitively included file is
    // skipped; it arrives through that file's header.
    for symbol in &root.enums {
        let name = symbol.meta.qualified_name();
        if symbols.is_included_enum(&root.file, &name) {
            continue;
        }
        let _ = writeln!(out, "typedef enum {{");
        for (i, (member, value)) in symbol.members.iter().enumerate() {
            let comma = if i + 1 == symbol.members.len() { "" } else { "," };
            let _ =
                writeln!(out, "    {}_{} = {}{}", name, member, value, comma);
        }
        let _ = writeln!(out, "}} {};", name);
        out.push('\n');
    }

    // Bitmaps become backing typedefs, with bit-position sugar on request
    for symbol in &root.bitmaps {
        let name = symbol.meta.qualified_name();
        let _ = writeln!(
            out,
            "typedef {} {};",
            symbol.backing.c_type(),
            name
        );
        if config.bitmap_defines {
            for (field, info) in &symbol.fields {
                let _ = writeln!(
                    out,
                    "#define {}_{}_OFFSET {}",
                    name, field, info.offset
                );
                let _ = writeln!(
                    out,
                    "#define {}_{}_WIDTH {}",
                    name, field, info.width
                );
            }
        }
        out.push('\n');
    }

    // Structs in declaration order; a struct with no field data falls back
    // to a forward declaration
    for symbol in &root.structs {
        let name = symbol.meta.qualified_name();
        if symbol.fields.is_empty() {
            let _ = writeln!(out, "typedef struct {} {};", name, name);
            out.push('\n');
            continue;
        }
        let _ = writeln!(out, "typedef struct {} {{", name);
        for (field, info) in &symbol.fields {
            let mut line = format!("    {} {}", info.base.c_type(), field);
            for dimension in &info.dimensions {
                let _ = write!(line, "[{}]", dimension);
            }
            let _ = writeln!(out, "{};", line);
        }
        let _ = writeln!(out, "}} {};", name);
        out.push('\n');
    }

    // Register groups become base and member access macros
    for symbol in &root.registers {
        let name = &symbol.meta.name;
        let _ = writeln!(
            out,
            "#define {}_BASE ({})",
            name, symbol.base_address
        );
        for (member, info) in &symbol.members {
            let _ = writeln!(
                out,
                "#define {}_{} (*(volatile {} *)({}_BASE + {}))",
                name, member, info.c_type, name, info.offset
            );
        }
        out.push('\n');
    }

    // Exported scope variables
    for symbol in &root.variables {
        if symbol.meta.is_exported && !symbol.meta.scope.is_empty() {
            let _ =
                writeln!(out, "extern {};", variable_declaration(symbol));
        }
    }

    // Prototypes for every exported function, scope-qualified
    for symbol in &root.functions {
        if !symbol.meta.is_exported {
            continue;
        }
        if symbol.meta.scope.is_empty() && symbol.meta.name == "main" {
            continue;
        }
        let _ = writeln!(out, "{};", function_signature(symbol));
    }
    out.push('\n');

    let _ = writeln!(out, "#endif /* {} */", guard);
    out
}

/// A composed translation unit, ready to be written by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitOutput {
    /// File name of the generated header, e.g. `blink.h`
    pub header_name: String,
    pub header: String,
    /// File name of the generated implementation, e.g. `blink.c`
    pub impl_name: String,
    pub implementation: String,
}

/// Stitch the `.c` file together: own header first, then the source's C
/// header includes, then effect-driven includes, helpers, globals, and
/// functions. Effects deduplicate by equality, keeping first occurrence
/// order.
pub(crate) fn compose(
    program: &Program,
    root: &SymbolTable,
    header: String,
    generated: &GeneratedUnit,
) -> UnitOutput {
    let base = base_name(&root.file);
    let mut out = String::new();
    let _ = writeln!(out, "#include \"{}.h\"", base);

    // C headers from the source are re-emitted in their original style
    let mut emitted: HashSet<String> = HashSet::new();
    for include in &program.includes {
        let directive = include.value();
        if classify_include(&directive.path) == IncludeKind::CHeader {
            emitted.insert(directive.path.clone());
            match directive.style {
                IncludeStyle::Quoted => {
                    let _ =
                        writeln!(out, "#include \"{}\"", directive.path);
                }
                IncludeStyle::Angled => {
                    let _ = writeln!(out, "#include <{}>", directive.path);
                }
            }
        }
    }

    let mut seen: Vec<Effect> = Vec::new();
    let mut helpers = String::new();
    let mut forwards = String::new();
    for effect in &generated.effects {
        if seen.contains(effect) {
            continue;
        }
        seen.push(effect.clone());
        match effect {
            Effect::IncludeHeader(name) => {
                if emitted.insert(name.clone()) {
                    let _ = writeln!(out, "#include <{}>", name);
                }
            }
            Effect::DefineHelper { body, .. } => {
                helpers.push_str(body);
                helpers.push_str("\n\n");
            }
            Effect::ForwardDeclare(declaration) => {
                let _ = writeln!(forwards, "{};", declaration);
            }
            Effect::RequireTypedef(name) => {
                let _ =
                    writeln!(forwards, "typedef struct {} {};", name, name);
            }
        }
    }
    out.push('\n');
    if !forwards.is_empty() {
        out.push_str(&forwards);
        out.push('\n');
    }
    if !helpers.is_empty() {
        out.push_str(&helpers);
    }
    if !generated.globals.is_empty() {
        out.push_str(&generated.globals);
        out.push('\n');
    }
    out.push_str(&generated.functions);

    UnitOutput {
        header_name: format!("{}.h", base),
        header,
        impl_name: format!("{}.c", base),
        implementation: out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_name() {
        assert_eq!(guard_name("blink"), "BLINK_H");
        assert_eq!(guard_name("my-module"), "MY_MODULE_H");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("/a/b/blink.cnx")), "blink");
    }
}

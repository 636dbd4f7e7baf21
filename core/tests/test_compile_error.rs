//! Integration tests for inputs that produce diagnostics. Collection
//! errors abort a unit's outputs; code-generation errors degrade to
//! placeholder comments and ride along with the outputs.

use cnext::{
    transpile_unit, CompileError, MemoryProvider, TranspileConfig,
    UnitResult,
};
use std::path::Path;

fn transpile(src: &str) -> UnitResult {
    transpile_unit(
        Path::new("/project/unit.cnx"),
        src.to_owned(),
        &MemoryProvider::new(),
        &TranspileConfig::default(),
    )
}

/// Transpile and expect a particular set of rendered error messages.
macro_rules! assert_transpile_errors {
    ($src:expr, $expected_errors:expr $(,)?) => {
        let result = transpile($src);
        let errors = result.errors.expect("expected errors");
        let actual: Vec<String> = errors
            .errors()
            .iter()
            .map(|err| err.to_string())
            .collect();
        let strs: Vec<&str> = actual.iter().map(String::as_str).collect();
        assert_eq!(strs.as_slice(), $expected_errors);
    };
}

#[test]
fn test_bitmap_width_mismatch() {
    assert_transpile_errors!(
        "bitmap8 X { a[5], b[5] }",
        &["Validation error at 1:9: \
           Bitmap 'X' has 10 bits but bitmap8 requires exactly 8 bits"],
    );

    // The standalone rendering is what the host CLI prints
    let result = transpile("bitmap8 X { a[5], b[5] }");
    let errors = result.errors.expect("expected errors");
    assert_eq!(
        errors.errors()[0].error().to_string(),
        "Error: Bitmap 'X' has 10 bits but bitmap8 requires exactly 8 bits"
    );
}

#[test]
fn test_bitmap_width_mismatch_aborts_output() {
    let result = transpile("bitmap8 X { a[5], b[5] }");
    assert!(result.output.is_none());
}

#[test]
fn test_enum_negative() {
    assert_transpile_errors!(
        "enum Bad { A <- 0 - 1 }",
        &["Validation error at 1:12: \
           Enum member `A` resolved to negative value -1"],
    );
}

#[test]
fn test_syntax_error_positions() {
    assert_transpile_errors!(
        "u8 x <- ;",
        &["Syntax error at 1:8: Expected expression"],
    );
    assert_transpile_errors!(
        "$$$",
        &["Syntax error at 1:1: Expected program"],
    );
}

#[test]
fn test_capacity_on_non_string_is_local() {
    let result = transpile(
        "void f() {
            u32 x;
            u32 y <- x.capacity;
        }",
    );
    let errors = result.errors.expect("expected errors");
    assert!(matches!(
        errors.errors()[0].error(),
        CompileError::CapacitySizeOnNonString { property: "capacity" }
    ));
    // The construct is local, so the unit still produces output with a
    // placeholder
    let output = result.output.expect("expected output");
    assert!(output
        .implementation
        .contains("/* capacity/size on non-string */ 0"));
}

#[test]
fn test_register_read_only_write() {
    let result = transpile(
        "register R @ 0x1000 {
            SR @ 0x00 : u32 ro;
        }
        void f() {
            R.SR <- 1;
        }",
    );
    let errors = result.errors.expect("expected errors");
    assert_eq!(
        errors.errors()[0].error().to_string(),
        "Error: Cannot write to read-only register member `R.SR`"
    );
    let output = result.output.expect("expected output");
    assert!(output
        .implementation
        .contains("/* cannot write to read-only register member R.SR */"));
}

#[test]
fn test_unknown_type_reference() {
    let result = transpile("Missing x;");
    let errors = result.errors.expect("expected errors");
    assert!(matches!(
        errors.errors()[0].error(),
        CompileError::UnknownTypeReference { .. }
    ));
}

#[test]
fn test_const_assignment_fails() {
    let result = transpile(
        "void f() {
            const u8 LIMIT <- 10;
            LIMIT <- 5;
        }",
    );
    let errors = result.errors.expect("expected errors");
    assert!(matches!(
        errors.errors()[0].error(),
        CompileError::ConstAssignment
    ));
    let output = result.output.expect("expected output");
    assert!(output
        .implementation
        .contains("/* assignment to const LIMIT */"));
}

#[test]
fn test_fill_initializer_not_inferable() {
    let result = transpile("u8 values[] <- [0*];");
    assert!(result.output.is_none());
    let errors = result.errors.expect("expected errors");
    assert!(matches!(
        errors.errors()[0].error(),
        CompileError::InvalidConstantExpression { .. }
    ));
}

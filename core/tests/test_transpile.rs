//! Integration tests for successful transpilation. Each test feeds C-Next
//! source through the full pipeline and checks the emitted C.

use cnext::{
    transpile_unit, MemoryProvider, TranspileConfig, UnitOutput,
};
use std::path::Path;

/// Transpile a single self-contained unit, panicking on any error.
fn transpile(src: &str) -> UnitOutput {
    transpile_with(src, &MemoryProvider::new(), &TranspileConfig::default())
}

fn transpile_with(
    src: &str,
    provider: &MemoryProvider,
    config: &TranspileConfig,
) -> UnitOutput {
    let result = transpile_unit(
        Path::new("/project/unit.cnx"),
        src.to_owned(),
        provider,
        config,
    );
    if let Some(errors) = &result.errors {
        panic!("unexpected errors: {}", errors);
    }
    result.output.expect("no output produced")
}

/// Assert that the generated text contains the expected fragment, with a
/// useful message when it doesn't.
macro_rules! assert_emitted {
    ($haystack:expr, $needle:expr $(,)?) => {
        assert!(
            $haystack.contains($needle),
            "expected to find {:?} in:\n{}",
            $needle,
            $haystack,
        );
    };
}

#[test]
fn test_scope_function() {
    let output = transpile(
        "scope Math {
            public i32 add(i32 a, i32 b) {
                return a + b;
            }
        }",
    );
    assert_emitted!(output.header, "int32_t Math_add(int32_t a, int32_t b);");
    assert_emitted!(
        output.implementation,
        "int32_t Math_add(int32_t a, int32_t b) {"
    );
    assert_emitted!(output.implementation, "return a + b;");
}

#[test]
fn test_bitmap_read_modify_write() {
    let output = transpile(
        "bitmap8 Status { enabled, running, error, warning, reserved[4] }
        Status flags;
        void update() {
            flags.warning <- true;
        }",
    );
    assert_emitted!(output.header, "typedef uint8_t Status;");
    assert_emitted!(
        output.implementation,
        "flags = (flags & ~(1U << 3)) | (1U << 3);"
    );
}

#[test]
fn test_bitmap_legacy_constant_spelling() {
    let config = TranspileConfig {
        unsigned_constants: false,
        ..TranspileConfig::default()
    };
    let output = transpile_with(
        "bitmap8 Status { enabled, running, error, warning, reserved[4] }
        Status flags;
        void update() {
            flags.warning <- true;
        }",
        &MemoryProvider::new(),
        &config,
    );
    assert_emitted!(
        output.implementation,
        "flags = (flags & ~(1 << 3)) | (1 << 3);"
    );
}

#[test]
fn test_bitmap_multi_bit_write_and_read() {
    let output = transpile(
        "bitmap8 Status { enabled, running, error, warning, count[4] }
        Status flags;
        u8 snapshot() {
            flags.count <- 5;
            return flags.count;
        }",
    );
    assert_emitted!(
        output.implementation,
        "flags = (flags & ~(0xFU << 4)) | ((5 & 0xFU) << 4);"
    );
    assert_emitted!(output.implementation, "return ((flags >> 4) & 0xF);");
}

#[test]
fn test_string_assignment() {
    let output = transpile(
        "void greet() {
            string<16> name;
            name <- \"hi\";
        }",
    );
    assert_emitted!(output.implementation, "#include <string.h>");
    assert_emitted!(output.implementation, "char name[17];");
    assert_emitted!(output.implementation, "strncpy(name, \"hi\", 16);");
    assert_emitted!(output.implementation, "name[16] = '\\0';");
}

#[test]
fn test_array_length_reflection() {
    let output = transpile(
        "u32 arr[5];
        void probe() {
            u32 total <- arr.length;
            u32 element_bits <- arr[2].length;
        }",
    );
    assert_emitted!(output.implementation, "uint32_t total = 5;");
    assert_emitted!(output.implementation, "uint32_t element_bits = 32;");
}

#[test]
fn test_string_size_and_capacity() {
    let output = transpile(
        "void probe() {
            string<64> buffer;
            u32 total <- buffer.size;
            u32 usable <- buffer.capacity;
        }",
    );
    assert_emitted!(output.implementation, "uint32_t total = 65;");
    assert_emitted!(output.implementation, "uint32_t usable = 64;");
}

#[test]
fn test_string_array_length_is_strlen() {
    let output = transpile(
        "string<8> names[4];
        void probe() {
            u32 count <- names.length;
            u32 current <- names[2].length;
        }",
    );
    assert_emitted!(output.implementation, "uint32_t count = 4;");
    assert_emitted!(
        output.implementation,
        "uint32_t current = strlen(names[2]);"
    );
    assert_emitted!(output.implementation, "#include <string.h>");
}

#[test]
fn test_transitive_enum_not_redeclared() {
    let mut provider = MemoryProvider::new();
    provider.insert(
        "/project/c.cnx",
        "enum Mode { AUTO, MANUAL }",
    );
    provider.insert("/project/b.cnx", "#include \"c.cnx\"\n");
    let source = "#include \"b.cnx\"
        Mode current <- Mode.AUTO;
        void cycle() {
            current <- Mode.MANUAL;
        }";

    let result = transpile_unit(
        Path::new("/project/a.cnx"),
        source.to_owned(),
        &provider,
        &TranspileConfig::default(),
    );
    assert!(result.errors.is_none(), "errors: {:?}", result.errors);
    let output = result.output.expect("no output");

    // The enum arrives through b.h; a.h must not re-declare it
    assert_emitted!(output.header, "#include \"b.h\"");
    assert!(
        !output.header.contains("typedef enum"),
        "enum re-declared in {}",
        output.header,
    );
    assert_emitted!(output.implementation, "Mode current = Mode_AUTO;");
    assert_emitted!(output.implementation, "current = Mode_MANUAL;");

    // The defining unit does declare it
    let c_result = transpile_unit(
        Path::new("/project/c.cnx"),
        "enum Mode { AUTO, MANUAL }".to_owned(),
        &provider,
        &TranspileConfig::default(),
    );
    let c_output = c_result.output.expect("no output");
    assert_emitted!(c_output.header, "typedef enum {");
    assert_emitted!(c_output.header, "Mode_AUTO = 0,");
    assert_emitted!(c_output.header, "Mode_MANUAL = 1");
}

#[test]
fn test_register_access_modes() {
    let output = transpile(
        "bitmap32 PortBits { data[16], mode[16] }
        register GPIOA @ 0x40020000 {
            MODER @ 0x00 : u32 rw;
            ODR @ 0x14 : u32 rw as PortBits;
            ICR @ 0x18 : u32 w1c;
        }
        void configure() {
            GPIOA.MODER <- 5;
            GPIOA.ODR.mode <- 3;
            GPIOA.ICR <- 0xFF;
        }",
    );
    assert_emitted!(output.header, "#define GPIOA_BASE (0x40020000)");
    assert_emitted!(
        output.header,
        "#define GPIOA_MODER (*(volatile uint32_t *)(GPIOA_BASE + 0x00))"
    );
    assert_emitted!(output.implementation, "GPIOA_MODER = 5;");
    assert_emitted!(
        output.implementation,
        "GPIOA_ODR = (GPIOA_ODR & ~(0xFFFFU << 16)) | ((3 & 0xFFFFU) << 16);"
    );
    assert_emitted!(output.implementation, "GPIOA_ICR = 0xFF;");
}

#[test]
fn test_bit_access_writes() {
    let output = transpile(
        "u32 ctrl;
        void poke() {
            ctrl[3] <- true;
            ctrl[4, 2] <- 2;
        }",
    );
    assert_emitted!(
        output.implementation,
        "ctrl = (ctrl & ~(1U << 3)) | (1U << 3);"
    );
    assert_emitted!(
        output.implementation,
        "ctrl = (ctrl & ~(0x3U << 4)) | ((2 & 0x3U) << 4);"
    );
}

#[test]
fn test_atomic_and_overflow_modes() {
    let output = transpile(
        "atomic u32 counter;
        saturate u8 level;
        void tick() {
            counter +<- 1;
            level +<- 10;
        }",
    );
    assert_emitted!(output.implementation, "#include <stdatomic.h>");
    assert_emitted!(output.implementation, "_Atomic uint32_t counter;");
    assert_emitted!(
        output.implementation,
        "atomic_fetch_add(&counter, 1);"
    );
    assert_emitted!(
        output.implementation,
        "level = cnx_sat_add_u8(level, 10);"
    );
    assert_emitted!(
        output.implementation,
        "static inline uint8_t cnx_sat_add_u8(uint8_t a, uint8_t b) {"
    );
}

#[test]
fn test_scope_variables_qualify() {
    let output = transpile(
        "scope Display {
            public u8 brightness;
            public void set(u8 level) {
                brightness <- level;
            }
            private void reset() {
                brightness <- 0;
            }
        }
        void boot() {
            Display.set(5);
        }",
    );
    assert_emitted!(output.header, "extern uint8_t Display_brightness;");
    assert_emitted!(
        output.header,
        "void Display_set(uint8_t level);"
    );
    // Private members stay out of the header and go static
    assert!(
        !output.header.contains("Display_reset"),
        "private function leaked into {}",
        output.header,
    );
    assert_emitted!(
        output.implementation,
        "static void Display_reset(void) {"
    );
    assert_emitted!(
        output.implementation,
        "Display_brightness = level;"
    );
    assert_emitted!(output.implementation, "Display_set(5);");
}

#[test]
fn test_main_args_length_is_argc() {
    let output = transpile(
        "i32 main(string args[]) {
            u32 count <- args.length;
            return 0;
        }",
    );
    assert_emitted!(
        output.implementation,
        "int main(int argc, char *argv[]) {"
    );
    assert_emitted!(output.implementation, "uint32_t count = argc;");
}

#[test]
fn test_struct_emission_and_field_access() {
    let output = transpile(
        "struct Config { u8 id; string<16> label; u32 grid[2][3]; }
        Config settings;
        void rename() {
            settings.label <- \"dev\";
            settings.id <- 7;
            u32 rows <- settings.grid.length;
        }",
    );
    assert_emitted!(output.header, "typedef struct Config {");
    assert_emitted!(output.header, "uint8_t id;");
    assert_emitted!(output.header, "char label[17];");
    assert_emitted!(output.header, "uint32_t grid[2][3];");
    assert_emitted!(output.header, "} Config;");
    assert_emitted!(
        output.implementation,
        "strncpy(settings.label, \"dev\", 16);"
    );
    assert_emitted!(output.implementation, "settings.label[16] = '\\0';");
    assert_emitted!(output.implementation, "settings.id = 7;");
    assert_emitted!(output.implementation, "uint32_t rows = 2;");
}

#[test]
fn test_constant_folding_in_expressions() {
    let output = transpile(
        "void sizes() {
            u32 area <- 6 * 7;
            u32 mix <- 1 + 2 * 3;
            u32 shifted <- 1 << 4;
        }",
    );
    assert_emitted!(output.implementation, "uint32_t area = 42;");
    assert_emitted!(output.implementation, "uint32_t mix = 7;");
    // Shifts never fold
    assert_emitted!(output.implementation, "uint32_t shifted = 1 << 4;");
}

#[test]
fn test_control_flow_lowering() {
    let output = transpile(
        "void walk(u8 limit) {
            for (u8 i <- 0; i < limit; i +<- 1) {
                if (i == 3) {
                    continue;
                } else {
                    process(i);
                }
            }
            while (limit > 0) {
                limit -<- 1;
            }
        }",
    );
    assert_emitted!(
        output.implementation,
        "for (uint8_t i = 0; i < limit; i += 1) {"
    );
    assert_emitted!(output.implementation, "if (i == 3) {");
    assert_emitted!(output.implementation, "} else {");
    assert_emitted!(output.implementation, "while (limit > 0) {");
    assert_emitted!(output.implementation, "limit -= 1;");
}

#[test]
fn test_inferred_array_dimension() {
    let output = transpile("u8 table[] <- [1, 2, 3];");
    assert_emitted!(
        output.implementation,
        "uint8_t table[3] = {1, 2, 3};"
    );
}

#[test]
fn test_missing_include_is_warning_not_error() {
    let result = transpile_unit(
        Path::new("/project/unit.cnx"),
        "#include \"gone.cnx\"\nu8 x;".to_owned(),
        &MemoryProvider::new(),
        &TranspileConfig::default(),
    );
    assert!(result.errors.is_none());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.output.is_some());
}

#[test]
fn test_transpilation_is_deterministic() {
    let src = "bitmap8 Status { a, b, c, d, rest[4] }
        Status flags;
        scope Math {
            public i32 add(i32 a, i32 b) { return a + b; }
        }
        void run() {
            flags.c <- true;
        }";
    let first = transpile(src);
    let second = transpile(src);
    assert_eq!(first, second);
}

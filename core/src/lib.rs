//! Core implementation of the C-Next to C transpiler. The main usage of
//! this crate is to translate `.cnx` source units into a pair of ISO C
//! files: a public header and an implementation unit.
//!
//! ```
//! use cnext::{transpile_unit, MemoryProvider, TranspileConfig};
//! use std::path::Path;
//!
//! let source = "
//! scope Math {
//!     public i32 add(i32 a, i32 b) {
//!         return a + b;
//!     }
//! }
//! ";
//!
//! let provider = MemoryProvider::new();
//! let config = TranspileConfig::default();
//! let result = transpile_unit(
//!     Path::new("math.cnx"),
//!     source.to_owned(),
//!     &provider,
//!     &config,
//! );
//! let output = result.output.expect("transpilation failed");
//! assert!(output
//!     .header
//!     .contains("int32_t Math_add(int32_t a, int32_t b);"));
//! assert!(output
//!     .implementation
//!     .contains("int32_t Math_add(int32_t a, int32_t b) {"));
//! ```

#![deny(clippy::all, unused_must_use)]

pub mod ast;
mod assign;
mod collect;
mod error;
pub mod eval;
mod generate;
mod header;
pub mod include;
mod parse;
mod property;
mod registry;
mod symbol;
mod util;

pub use error::*;
pub use header::UnitOutput;
pub use include::{
    CacheKeyGenerator, DiskProvider, MemoryProvider, SourceProvider,
};
pub use registry::{bit_width, TypeInfo, TypeRegistry};
pub use symbol::{SymbolIndex, SymbolTable};
pub use util::Span;

use crate::ast::Program;
use crate::include::{
    harvest_c_header, resolve_includes, IncludeResolver, IncludeWalker,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Code-generation and resolution options for one run. Loaded from
/// `cnext.config.json` by the CLI, or built programmatically.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranspileConfig {
    /// Where generated files land; the caller resolves `None` to its own
    /// default
    pub output_dir: Option<PathBuf>,
    /// Explicit `-I` search paths, tried after the including file's
    /// directory
    pub include_paths: Vec<PathBuf>,
    /// Emit `1U <<` style unsigned constants in bit-twiddling output.
    /// Disabled, the legacy `1 <<` spelling is used.
    pub unsigned_constants: bool,
    /// Emit `#define` offset/width sugar for bitmap fields
    pub bitmap_defines: bool,
}

impl Default for TranspileConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            include_paths: Vec::new(),
            unsigned_constants: true,
            bitmap_defines: false,
        }
    }
}

/// What the host CLI should do, as decided by the core: whether to run at
/// all, the exit code if not, and the effective configuration.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub should_run: bool,
    pub exit_code: i32,
    pub config: Option<TranspileConfig>,
}

/// The outcome of transpiling one unit. Errors abort the unit's outputs
/// but never the batch; warnings ride along with whatever was produced.
#[derive(Clone, Debug)]
pub struct UnitResult {
    pub file: PathBuf,
    pub output: Option<UnitOutput>,
    pub errors: Option<WithSource<CompileError>>,
    pub warnings: Vec<Warning>,
}

/// Struct to contain all transpiler pipeline steps. By having this on a
/// struct, it makes it nice and easy to call functions in order with
/// readability. Each pipeline step should take a `self` param and return a
/// new `Transpiler`.
///
/// `T` is the current stage payload. This controls which pipeline stages
/// can be called next, so the type system enforces the stage ordering: a
/// fresh transpiler can only `parse`, a parsed one can only `collect`, and
/// so on.
#[derive(Debug)]
pub struct Transpiler<T> {
    pub(crate) source: String,
    pub(crate) path: PathBuf,
    pub(crate) config: TranspileConfig,
    pub(crate) stage: T,
}

impl Transpiler<()> {
    /// Constructs a new transpiler for one source unit. This is how you
    /// start a fresh pipeline.
    pub fn new(
        path: &Path,
        source: String,
        config: TranspileConfig,
    ) -> Self {
        Self {
            source,
            path: path.to_owned(),
            config,
            stage: (),
        }
    }
}

/// Everything the resolve stage gathers before code generation: the unit's
/// own table, the tables of every reachable `.cnx` file, and the names
/// harvested from local C headers.
#[derive(Debug)]
pub(crate) struct Resolved {
    program: Program,
    table: SymbolTable,
    index: SymbolIndex,
    external_types: HashSet<String>,
    warnings: Vec<Warning>,
}

impl Transpiler<(Program, SymbolTable)> {
    /// Walks the include graph, aggregating symbol tables from reachable
    /// `.cnx` files and harvesting local C headers. Missing includes are
    /// downgraded to warnings.
    pub(crate) fn resolve<P: SourceProvider>(
        self,
        provider: &P,
    ) -> Transpiler<Resolved> {
        let canonical_root = provider
            .canonicalize(&self.path)
            .unwrap_or_else(|_| self.path.clone());
        let (program, mut table) = self.stage;
        table.file = canonical_root.clone();

        let resolver = IncludeResolver::new(
            provider,
            self.config.include_paths.clone(),
        );
        let resolved =
            resolve_includes(&self.source, &canonical_root, &resolver);
        let mut warnings = resolved.warnings.clone();

        // Aggregate tables from every reachable .cnx file. The walker owns
        // its visited set; each call starts fresh.
        let mut tables: Vec<SymbolTable> = vec![table.clone()];
        let walker = IncludeWalker::new(
            provider,
            self.config.include_paths.clone(),
        );
        let walk_warnings =
            walker.walk_all(&resolved.cnx, &mut |path, content| {
                if path == canonical_root.as_path() {
                    return;
                }
                match parse::parse(content) {
                    Ok(included) => {
                        let (included_table, errors) =
                            collect::collect(&included, path, content);
                        if !errors.is_empty() {
                            debug!(
                                file = %path.display(),
                                "collection errors in included file"
                            );
                        }
                        tables.push(included_table);
                    }
                    Err(_) => {
                        warn!(
                            file = %path.display(),
                            "syntax errors in included file; skipping"
                        );
                    }
                }
            });
        warnings.extend(walk_warnings);

        // Harvest names from local C headers so references resolve
        let mut external_types = HashSet::new();
        for header in &resolved.local_headers {
            if let Ok(content) = provider.read(header) {
                let harvested = harvest_c_header(&content);
                external_types.extend(harvested.types);
                external_types.extend(harvested.defines);
            }
        }

        Transpiler {
            source: self.source,
            path: canonical_root,
            config: self.config,
            stage: Resolved {
                program,
                table: tables[0].clone(),
                index: SymbolIndex::new(tables),
                external_types,
                warnings,
            },
        }
    }
}

impl Transpiler<Resolved> {
    /// Generates the header and implementation for this unit. Local fatal
    /// constructs degrade to placeholder comments plus diagnostics instead
    /// of aborting the file.
    pub(crate) fn generate(self) -> UnitResult {
        let source = self.source;
        let path = self.path;
        let config = self.config;
        let resolved = self.stage;
        let generated = generate::generate_unit(
            &resolved.program,
            &resolved.table,
            &resolved.index,
            &resolved.external_types,
            &config,
        );
        let header = header::generate_header(
            &resolved.program,
            &resolved.table,
            &resolved.index,
            &config,
        );
        let output = header::compose(
            &resolved.program,
            &resolved.table,
            header,
            &generated,
        );
        let errors = if generated.errors.is_empty() {
            None
        } else {
            let wrapped: Vec<_> = generated
                .errors
                .into_iter()
                .map(|(error, span)| {
                    SourceErrorWrapper::new(error, span, &source)
                })
                .collect();
            Some(WithSource::new(wrapped, source.clone()))
        };
        UnitResult {
            file: path,
            output: Some(output),
            errors,
            warnings: resolved.warnings,
        }
    }
}

/// Transpile one source unit end to end. Parse or collection errors abort
/// the unit; code-generation diagnostics ride along with the outputs.
pub fn transpile_unit<P: SourceProvider>(
    path: &Path,
    source: String,
    provider: &P,
    config: &TranspileConfig,
) -> UnitResult {
    let transpiler = Transpiler::new(path, source, config.clone());
    let parsed = match transpiler.parse() {
        Ok(parsed) => parsed,
        Err(errors) => {
            return UnitResult {
                file: path.to_owned(),
                output: None,
                errors: Some(errors),
                warnings: Vec::new(),
            }
        }
    };
    let collected = match parsed.collect() {
        Ok(collected) => collected,
        Err(errors) => {
            return UnitResult {
                file: path.to_owned(),
                output: None,
                errors: Some(errors),
                warnings: Vec::new(),
            }
        }
    };
    collected.resolve(provider).generate()
}

/// Transpile a batch of root files. Per-unit state is disjoint, so a
/// failure in one unit never poisons another.
pub fn transpile_batch<P: SourceProvider>(
    roots: &[PathBuf],
    provider: &P,
    config: &TranspileConfig,
) -> Vec<UnitResult> {
    roots
        .iter()
        .map(|root| match provider.read(root) {
            Ok(source) => {
                transpile_unit(root, source, provider, config)
            }
            Err(_) => {
                let warning = Warning::IncludeNotFound {
                    path: root.display().to_string(),
                    from: "<batch>".to_owned(),
                };
                warn!("{}", warning);
                UnitResult {
                    file: root.clone(),
                    output: None,
                    errors: None,
                    warnings: vec![warning],
                }
            }
        })
        .collect()
}

// Re-exported so call sites can build scope-qualified names the same way
// the generator does.
pub use symbol::qualified_name as qualify;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_reexport() {
        assert_eq!(qualify("Math", "add"), "Math_add");
        assert_eq!(qualify("", "main"), "main");
    }
}

//! Include resolution: directive extraction, search-path resolution with
//! project-root discovery, the include-graph walker, the permissive C-header
//! harvest, and mtime-based cache keys.

use crate::error::Warning;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::warn;

/// Marker files that identify a project root, in priority order.
const ROOT_MARKERS: &[&str] = &[
    "platformio.ini",
    "cnext.config.json",
    ".cnext.json",
    ".cnextrc",
    ".git",
];

/// Subdirectories of a project root that join the search path when present.
const ROOT_SUBDIRS: &[&str] = &["include", "src", "lib"];

/// Abstract file access for the include machinery. The core only ever sees
/// (path, text) source units through this, which also gives tests an
/// in-memory seam.
pub trait SourceProvider {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn exists(&self, path: &Path) -> bool;
    /// Canonical absolute form of a path, used as the identity for visited
    /// sets. Must be stable across spellings of the same file.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
    /// Modification time in milliseconds since the epoch, for cache keys.
    fn mtime_ms(&self, path: &Path) -> Option<u64>;
}

/// The production provider: plain synchronous filesystem access. Handles are
/// scoped to each call.
#[derive(Copy, Clone, Debug, Default)]
pub struct DiskProvider;

impl SourceProvider for DiskProvider {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }

    fn mtime_ms(&self, path: &Path) -> Option<u64> {
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
        Some(since_epoch.as_millis() as u64)
    }
}

/// An in-memory provider for tests: path → (content, mtime).
#[derive(Clone, Debug, Default)]
pub struct MemoryProvider {
    files: HashMap<PathBuf, (String, u64)>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, content: &str) {
        self.files
            .insert(normalize(&path.into()), (content.to_owned(), 0));
    }

    pub fn set_mtime(&mut self, path: &Path, mtime_ms: u64) {
        if let Some(entry) = self.files.get_mut(&normalize(path)) {
            entry.1 = mtime_ms;
        }
    }
}

impl SourceProvider for MemoryProvider {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(&normalize(path))
            .map(|(content, _)| content.clone())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no such file")
            })
    }

    fn exists(&self, path: &Path) -> bool {
        let normalized = normalize(path);
        self.files.contains_key(&normalized)
            || self
                .files
                .keys()
                .any(|file| file.starts_with(&normalized))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        Ok(normalize(path))
    }

    fn mtime_ms(&self, path: &Path) -> Option<u64> {
        self.files.get(&normalize(path)).map(|(_, mtime)| *mtime)
    }
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// How an include directive classifies. Anything that isn't a `.cnx` file
/// goes through the C-header path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IncludeKind {
    CNext,
    CHeader,
}

pub fn classify_include(path: &str) -> IncludeKind {
    if path.ends_with(".cnx") {
        IncludeKind::CNext
    } else {
        IncludeKind::CHeader
    }
}

/// Extract include directives from raw source text. Quoted and
/// angle-bracketed forms are treated identically.
pub fn extract_includes(source: &str) -> Vec<String> {
    let pattern = Regex::new(r#"(?m)^#\s*include\s*[<"]([^>"]+)[>"]"#)
        .expect("invalid include pattern");
    pattern
        .captures_iter(source)
        .map(|captures| captures[1].to_owned())
        .collect()
}

/// Resolves include names against the priority-ordered search path list:
/// the including file's directory, explicit `-I` paths, then
/// auto-discovered project roots.
pub struct IncludeResolver<'a, P: SourceProvider> {
    provider: &'a P,
    include_paths: Vec<PathBuf>,
}

impl<'a, P: SourceProvider> IncludeResolver<'a, P> {
    pub fn new(provider: &'a P, include_paths: Vec<PathBuf>) -> Self {
        Self {
            provider,
            include_paths,
        }
    }

    /// Resolve one include name relative to the directory of the including
    /// file. Returns the canonical path of the first hit.
    pub fn resolve(&self, include: &str, from_dir: &Path) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        candidates.push(from_dir.join(include));
        for path in &self.include_paths {
            candidates.push(path.join(include));
        }
        for root in self.discover_roots(from_dir) {
            candidates.push(root.join(include));
            for subdir in ROOT_SUBDIRS {
                let dir = root.join(subdir);
                if self.provider.exists(&dir) {
                    candidates.push(dir.join(include));
                }
            }
        }
        candidates
            .into_iter()
            .find(|candidate| self.provider.exists(candidate))
            .and_then(|found| self.provider.canonicalize(&found).ok())
    }

    /// Walk upward from a directory until a project-root marker is found.
    fn discover_roots(&self, from_dir: &Path) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        let mut current = Some(from_dir);
        while let Some(dir) = current {
            let marked = ROOT_MARKERS
                .iter()
                .any(|marker| self.provider.exists(&dir.join(marker)));
            if marked {
                roots.push(dir.to_owned());
                break;
            }
            current = dir.parent();
        }
        roots
    }
}

/// The direct includes of one file, after classification and resolution.
#[derive(Clone, Debug, Default)]
pub struct ResolvedIncludes {
    /// Resolved `.cnx` includes, in directive order
    pub cnx: Vec<PathBuf>,
    /// C/C++ header includes, as written in the source
    pub c_headers: Vec<String>,
    /// Resolved local header paths available for harvesting
    pub local_headers: Vec<PathBuf>,
    pub warnings: Vec<Warning>,
}

/// Classify and resolve every include directive in a source text.
pub fn resolve_includes<P: SourceProvider>(
    source: &str,
    file: &Path,
    resolver: &IncludeResolver<'_, P>,
) -> ResolvedIncludes {
    let from_dir = file.parent().unwrap_or_else(|| Path::new("."));
    let mut resolved = ResolvedIncludes::default();
    for include in extract_includes(source) {
        match classify_include(&include) {
            IncludeKind::CNext => {
                match resolver.resolve(&include, from_dir) {
                    Some(path) => resolved.cnx.push(path),
                    None => {
                        let warning = Warning::IncludeNotFound {
                            path: include.clone(),
                            from: file.display().to_string(),
                        };
                        warn!("{}", warning);
                        resolved.warnings.push(warning);
                    }
                }
            }
            IncludeKind::CHeader => {
                // System headers won't resolve locally; that's fine, they
                // are re-emitted as-is
                if let Some(path) = resolver.resolve(&include, from_dir) {
                    resolved.local_headers.push(path);
                }
                resolved.c_headers.push(include);
            }
        }
    }
    resolved
}

/// Depth-first walker over the `.cnx` include graph. Deduplicates by
/// canonical path, so circular includes terminate. The visitor sees each
/// reachable file exactly once, with its content.
pub struct IncludeWalker<'a, P: SourceProvider> {
    provider: &'a P,
    resolver: IncludeResolver<'a, P>,
}

impl<'a, P: SourceProvider> IncludeWalker<'a, P> {
    pub fn new(provider: &'a P, include_paths: Vec<PathBuf>) -> Self {
        Self {
            provider,
            resolver: IncludeResolver::new(provider, include_paths),
        }
    }

    /// Walk the include graph from a root file. The root itself is visited
    /// first. Returns the warnings gathered along the way.
    pub fn walk(
        &self,
        root: &Path,
        visitor: &mut dyn FnMut(&Path, &str),
    ) -> Vec<Warning> {
        let mut visited = HashSet::new();
        let mut warnings = Vec::new();
        let root = match self.provider.canonicalize(root) {
            Ok(canonical) => canonical,
            Err(_) => root.to_owned(),
        };
        self.visit(&root, &mut visited, &mut warnings, visitor);
        warnings
    }

    /// Walk from a list of already-resolved includes (e.g. a root file's
    /// direct `.cnx` edges).
    pub fn walk_all(
        &self,
        roots: &[PathBuf],
        visitor: &mut dyn FnMut(&Path, &str),
    ) -> Vec<Warning> {
        let mut visited = HashSet::new();
        let mut warnings = Vec::new();
        for root in roots {
            self.visit(root, &mut visited, &mut warnings, visitor);
        }
        warnings
    }

    fn visit(
        &self,
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        warnings: &mut Vec<Warning>,
        visitor: &mut dyn FnMut(&Path, &str),
    ) {
        if !visited.insert(path.to_owned()) {
            return;
        }
        let content = match self.provider.read(path) {
            Ok(content) => content,
            Err(_) => {
                let warning = Warning::IncludeNotFound {
                    path: path.display().to_string(),
                    from: path.display().to_string(),
                };
                warn!("{}", warning);
                warnings.push(warning);
                return;
            }
        };
        visitor(path, &content);
        let resolved = resolve_includes(&content, path, &self.resolver);
        warnings.extend(resolved.warnings);
        for include in resolved.cnx {
            self.visit(&include, visited, warnings, visitor);
        }
    }
}

/// Names harvested from a C/C++ header: enough to resolve type references
/// into the input program, nothing more.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HarvestedHeader {
    pub types: Vec<String>,
    pub defines: Vec<String>,
}

/// Permissively scan a C header for declared names. This is not a C parser;
/// it only discovers typedef/struct/enum/union names and object-like
/// defines.
pub fn harvest_c_header(source: &str) -> HarvestedHeader {
    let typedef_pattern =
        Regex::new(r"typedef[^;]*?(\w+)\s*;").expect("invalid pattern");
    let tag_pattern = Regex::new(r"(?:struct|enum|union)\s+(\w+)")
        .expect("invalid pattern");
    let define_pattern = Regex::new(r"(?m)^\s*#\s*define\s+(\w+)")
        .expect("invalid pattern");

    let mut harvested = HarvestedHeader::default();
    let mut seen = HashSet::new();
    for captures in typedef_pattern.captures_iter(source) {
        let name = captures[1].to_owned();
        if seen.insert(name.clone()) {
            harvested.types.push(name);
        }
    }
    for captures in tag_pattern.captures_iter(source) {
        let name = captures[1].to_owned();
        if seen.insert(name.clone()) {
            harvested.types.push(name);
        }
    }
    for captures in define_pattern.captures_iter(source) {
        harvested.defines.push(captures[1].to_owned());
    }
    harvested
}

/// Cache keys for incremental transpilation: `mtime:<ms>`.
pub struct CacheKeyGenerator;

impl CacheKeyGenerator {
    pub fn generate<P: SourceProvider>(
        provider: &P,
        path: &Path,
    ) -> Option<String> {
        provider
            .mtime_ms(path)
            .map(|mtime| format!("mtime:{}", mtime))
    }

    /// True iff regenerating the key from the current file matches. Missing
    /// or unreadable files are never valid.
    pub fn is_valid<P: SourceProvider>(
        provider: &P,
        path: &Path,
        key: &str,
    ) -> bool {
        match Self::generate(provider, path) {
            Some(current) => current == key,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_includes() {
        let source = "#include \"util.cnx\"\n# include <stdio.h>\n\
                      u8 x <- 1; // #include \"not_this.cnx\"\n";
        assert_eq!(extract_includes(source), vec!["util.cnx", "stdio.h"]);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify_include("a.cnx"), IncludeKind::CNext);
        assert_eq!(classify_include("a.h"), IncludeKind::CHeader);
        assert_eq!(classify_include("a.hpp"), IncludeKind::CHeader);
    }

    #[test]
    fn test_resolver_prefers_including_directory() {
        let mut provider = MemoryProvider::new();
        provider.insert("/project/src/util.cnx", "u8 a <- 1;");
        provider.insert("/project/include/util.cnx", "u8 b <- 2;");
        let resolver = IncludeResolver::new(
            &provider,
            vec![PathBuf::from("/project/include")],
        );
        let resolved = resolver
            .resolve("util.cnx", Path::new("/project/src"))
            .unwrap();
        assert_eq!(resolved, PathBuf::from("/project/src/util.cnx"));
    }

    #[test]
    fn test_resolver_falls_back_to_project_root() {
        let mut provider = MemoryProvider::new();
        provider.insert("/project/platformio.ini", "");
        provider.insert("/project/include/shared.cnx", "u8 a <- 1;");
        let resolver = IncludeResolver::new(&provider, vec![]);
        let resolved = resolver
            .resolve("shared.cnx", Path::new("/project/src/deep"))
            .unwrap();
        assert_eq!(resolved, PathBuf::from("/project/include/shared.cnx"));
    }

    #[test]
    fn test_walker_visits_each_file_once() {
        let mut provider = MemoryProvider::new();
        // a -> b -> c, and c -> a closes a cycle
        provider.insert("/p/a.cnx", "#include \"b.cnx\"\nu8 a <- 1;");
        provider.insert("/p/b.cnx", "#include \"c.cnx\"\nu8 b <- 2;");
        provider.insert("/p/c.cnx", "#include \"a.cnx\"\nu8 c <- 3;");
        let walker = IncludeWalker::new(&provider, vec![]);
        let mut seen = Vec::new();
        let warnings = walker.walk(Path::new("/p/a.cnx"), &mut |path, _| {
            seen.push(path.to_owned());
        });
        assert!(warnings.is_empty());
        assert_eq!(seen.len(), 3);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_walker_missing_include_is_warning() {
        let mut provider = MemoryProvider::new();
        provider.insert("/p/a.cnx", "#include \"gone.cnx\"\nu8 a <- 1;");
        let walker = IncludeWalker::new(&provider, vec![]);
        let mut seen = 0;
        let warnings =
            walker.walk(Path::new("/p/a.cnx"), &mut |_, _| seen += 1);
        assert_eq!(seen, 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_harvest_c_header() {
        let header = "typedef unsigned char byte_t;\n\
                      struct device { int id; };\n\
                      #define MAX_DEVICES 4\n";
        let harvested = harvest_c_header(header);
        assert!(harvested.types.contains(&"byte_t".to_owned()));
        assert!(harvested.types.contains(&"device".to_owned()));
        assert_eq!(harvested.defines, vec!["MAX_DEVICES"]);
    }

    #[test]
    fn test_cache_key_roundtrip() {
        let mut provider = MemoryProvider::new();
        provider.insert("/p/a.cnx", "u8 a <- 1;");
        provider.set_mtime(Path::new("/p/a.cnx"), 1234);

        let key =
            CacheKeyGenerator::generate(&provider, Path::new("/p/a.cnx"))
                .unwrap();
        assert_eq!(key, "mtime:1234");
        assert!(CacheKeyGenerator::is_valid(
            &provider,
            Path::new("/p/a.cnx"),
            &key
        ));

        // Touching the file invalidates the key
        provider.set_mtime(Path::new("/p/a.cnx"), 5678);
        assert!(!CacheKeyGenerator::is_valid(
            &provider,
            Path::new("/p/a.cnx"),
            &key
        ));

        // Missing files are never valid
        assert!(!CacheKeyGenerator::is_valid(
            &provider,
            Path::new("/p/missing.cnx"),
            &key
        ));
    }

    #[test]
    fn test_cache_key_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("unit.cnx");
        std::fs::write(&file, "u8 x <- 1;").unwrap();
        let provider = DiskProvider;
        let key = CacheKeyGenerator::generate(&provider, &file).unwrap();
        assert!(key.starts_with("mtime:"));
        assert!(CacheKeyGenerator::is_valid(&provider, &file, &key));
    }
}

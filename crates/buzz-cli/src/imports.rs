//! Import resolution
//!
//! An import is resolved in order: (a) a path relative to the importing
//! file, (b) each entry of the colon-separated `BUZZ_PATH` environment
//! variable, (c) a built-in library name mapped to a shared object.

use std::path::{Path, PathBuf};

/// Built-in library names shipped as shared objects.
pub const BUILTIN_LIBRARIES: &[&str] =
    &["std", "io", "fs", "os", "math", "buffer", "debug", "gc"];

/// Where an import resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportResolution {
    /// A script file on disk
    Script(PathBuf),
    /// A built-in library name
    Builtin(&'static str),
}

/// Resolve `name` as imported from `importer`, searching the `BUZZ_PATH`
/// entries given in `search_paths`.
pub fn resolve_import(
    importer: &Path,
    name: &str,
    search_paths: &[PathBuf],
) -> Option<ImportResolution> {
    // (a) relative to the importing file
    if let Some(dir) = importer.parent() {
        let candidate = dir.join(name).with_extension("buzz");
        if candidate.is_file() {
            return Some(ImportResolution::Script(candidate));
        }
    }

    // (b) BUZZ_PATH entries
    for dir in search_paths {
        let candidate = dir.join(name).with_extension("buzz");
        if candidate.is_file() {
            return Some(ImportResolution::Script(candidate));
        }
    }

    // (c) built-in libraries
    BUILTIN_LIBRARIES
        .iter()
        .copied()
        .find(|builtin| *builtin == name)
        .map(ImportResolution::Builtin)
}

/// Parse the colon-separated `BUZZ_PATH` environment variable.
pub fn search_paths_from_env() -> Vec<PathBuf> {
    std::env::var("BUZZ_PATH")
        .map(|raw| raw.split(':').map(PathBuf::from).collect())
        .unwrap_or_default()
}

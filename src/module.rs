// File: src/module.rs
//
// Module loading for `import` statements.
// A module is a serialized Program (JSON). Names resolve relative to the
// importing file first, then through the configured search paths, trying
// the name as given and with a `.json` extension. Every file is imported at
// most once per run; a repeated or circular import is skipped.

use crate::ast::Program;
use crate::errors::{ErrorType, ScriptException};
use ahash::AHashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of an import request
#[derive(Debug)]
pub enum ModuleLoad {
    /// First import of this file; its statements should run now
    Loaded { path: PathBuf, program: Program },
    /// Already imported, or currently being imported further up the chain
    Skipped(PathBuf),
}

/// Resolves, caches and cycle-checks imported modules
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    /// Canonical paths of every module imported in this run
    loaded_modules: AHashSet<PathBuf>,
    /// Modules whose statements are currently executing
    loading_stack: Vec<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl ModuleLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        ModuleLoader { loaded_modules: AHashSet::new(), loading_stack: Vec::new(), search_paths }
    }

    /// Resolves a module name to an existing file
    pub fn resolve(&self, name: &str, importer_dir: Option<&Path>) -> Option<PathBuf> {
        let candidates = |dir: &Path| {
            let plain = dir.join(name);
            let with_ext = dir.join(format!("{}.json", name));
            [plain, with_ext]
        };

        let requested = Path::new(name);
        if requested.is_absolute() {
            return candidates(Path::new("")).into_iter().find(|p| p.is_file());
        }

        importer_dir
            .into_iter()
            .chain(self.search_paths.iter().map(PathBuf::as_path))
            .flat_map(candidates)
            .find(|p| p.is_file())
    }

    /// Loads a module unless it was already imported.
    ///
    /// A missing file is an IO_ERROR and a file that is not a valid program
    /// a PARSE_ERROR. On `Loaded`, the caller runs the program and then calls
    /// `finish` with the same path.
    pub fn load(&mut self, name: &str, importer_dir: Option<&Path>) -> Result<ModuleLoad, ScriptException> {
        let found = self.resolve(name, importer_dir).ok_or_else(|| {
            let searched: Vec<String> = importer_dir
                .into_iter()
                .chain(self.search_paths.iter().map(PathBuf::as_path))
                .map(|p| p.display().to_string())
                .collect();
            ScriptException::new(
                ErrorType::IoError,
                format!("Module '{}' not found (searched: {})", name, searched.join(", ")),
            )
        })?;
        let path = fs::canonicalize(&found).unwrap_or(found);

        if self.loading_stack.contains(&path) {
            tracing::debug!(module = %path.display(), "circular import skipped");
            return Ok(ModuleLoad::Skipped(path));
        }
        if self.loaded_modules.contains(&path) {
            tracing::debug!(module = %path.display(), "module already imported");
            return Ok(ModuleLoad::Skipped(path));
        }

        let text = fs::read_to_string(&path).map_err(|e| {
            ScriptException::new(ErrorType::IoError, format!("Failed to read module {}: {}", path.display(), e))
        })?;
        let program = Program::from_json(&text).map_err(|e| {
            ScriptException::new(ErrorType::ParseError, format!("Invalid module {}: {}", path.display(), e))
        })?;

        tracing::debug!(module = %path.display(), "module loaded");
        self.loaded_modules.insert(path.clone());
        self.loading_stack.push(path.clone());
        Ok(ModuleLoad::Loaded { path, program })
    }

    /// Marks a loaded module as no longer executing
    pub fn finish(&mut self, path: &Path) {
        if let Some(index) = self.loading_stack.iter().rposition(|p| p == path) {
            self.loading_stack.remove(index);
        }
    }

    /// Forgets every imported module, so the next run imports them again
    pub fn reset(&mut self) {
        self.loaded_modules.clear();
        self.loading_stack.clear();
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new(vec![PathBuf::from(".")])
    }
}

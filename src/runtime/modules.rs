use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::runtime::env::{Env, EnvRef};
use crate::runtime::error::RuntimeError;

/// Process-wide memoization of imported modules, keyed by canonical path.
/// `InProgress` marks a module whose top level is still executing so cyclic
/// imports are detected instead of recursing forever.
#[derive(Debug, Default)]
pub struct ModuleCache {
    entries: HashMap<PathBuf, ModuleState>,
}

#[derive(Debug, Clone)]
pub enum ModuleState {
    InProgress,
    Loaded(EnvRef),
}

pub type ModuleCacheRef = Rc<RefCell<ModuleCache>>;

impl ModuleCache {
    pub fn shared() -> ModuleCacheRef {
        Rc::new(RefCell::new(ModuleCache::default()))
    }

    pub fn state(&self, path: &Path) -> Option<ModuleState> {
        self.entries.get(path).cloned()
    }

    pub fn begin(&mut self, path: PathBuf) {
        self.entries.insert(path, ModuleState::InProgress);
    }

    pub fn finish(&mut self, path: PathBuf, env: EnvRef) {
        self.entries.insert(path, ModuleState::Loaded(env));
    }

    /// Forgets a failed load so a later import retries instead of reporting a
    /// bogus cycle.
    pub fn abandon(&mut self, path: &Path) {
        self.entries.remove(path);
    }
}

/// Resolves an import path against the importing file's directory and
/// canonicalizes it. A missing file surfaces as `ImportError`.
pub fn resolve(base_dir: &Path, path: &str) -> Result<PathBuf, RuntimeError> {
    let candidate = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base_dir.join(path)
    };
    candidate
        .canonicalize()
        .map_err(|_| RuntimeError::ImportNotFound {
            path: path.to_string(),
        })
}

pub fn read(full_path: &Path, import_path: &str) -> Result<String, RuntimeError> {
    fs::read_to_string(full_path).map_err(|_| RuntimeError::ImportNotFound {
        path: import_path.to_string(),
    })
}

/// Copies a loaded module's own global bindings into the importing module's
/// global environment.
pub fn splice(module_env: &EnvRef, into: &EnvRef) {
    for (name, value) in Env::own_bindings(module_env) {
        Env::define(into, name, value);
    }
}

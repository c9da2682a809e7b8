//! Script loading with `include "path";` expansion.
//!
//! Providers return the flattened line list the lexer consumes. Each script
//! is included at most once per load, so include cycles terminate.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::trace;

/// Default extension appended to script names that have none.
pub const SCRIPT_EXTENSION: &str = "cinder";

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("script '{0}' not found")]
    NotFound(String),

    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait SourceProvider {
    /// Lines of the named script with includes expanded.
    fn load(&self, name: &str) -> Result<Vec<String>, SourceError>;
}

/// The path of an `include "path";` line, if the line is exactly that.
pub fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("include")?;
    let rest = rest.trim_start().strip_prefix('"')?;
    let (path, tail) = rest.split_once('"')?;
    if tail.trim() == ";" && !path.is_empty() {
        Some(path)
    } else {
        None
    }
}

/// Loads scripts from a directory tree.
pub struct FileSourceProvider {
    root: PathBuf,
}

impl FileSourceProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, base: &Path, name: &str) -> PathBuf {
        let mut path = base.join(name);
        if path.extension().is_none() {
            path.set_extension(SCRIPT_EXTENSION);
        }
        path
    }

    fn load_recursive(
        &self,
        path: &Path,
        included: &mut HashSet<PathBuf>,
        out: &mut Vec<String>,
    ) -> Result<(), SourceError> {
        let canonical = path.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
            _ => SourceError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        if !included.insert(canonical.clone()) {
            trace!(path = %canonical.display(), "already included");
            return Ok(());
        }

        let text = std::fs::read_to_string(&canonical).map_err(|e| SourceError::Io {
            path: canonical.clone(),
            source: e,
        })?;

        let base = canonical.parent().unwrap_or(Path::new(".")).to_path_buf();
        for line in text.lines() {
            match include_target(line) {
                Some(target) => {
                    let nested = self.resolve(&base, target);
                    self.load_recursive(&nested, included, out)?;
                }
                None => out.push(line.to_string()),
            }
        }
        Ok(())
    }
}

impl SourceProvider for FileSourceProvider {
    fn load(&self, name: &str) -> Result<Vec<String>, SourceError> {
        let path = self.resolve(&self.root, name);
        let mut lines = Vec::new();
        self.load_recursive(&path, &mut HashSet::new(), &mut lines)?;
        Ok(lines)
    }
}

/// Named in-memory scripts; includes name other entries.
#[derive(Debug, Default, Clone)]
pub struct MemorySourceProvider {
    scripts: HashMap<String, String>,
}

impl MemorySourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, name: &str, source: &str) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: &str, source: &str) {
        self.scripts.insert(name.to_string(), source.to_string());
    }

    fn load_recursive(
        &self,
        name: &str,
        included: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) -> Result<(), SourceError> {
        let source = self
            .scripts
            .get(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;

        if !included.insert(name.to_string()) {
            return Ok(());
        }

        for line in source.lines() {
            match include_target(line) {
                Some(target) => self.load_recursive(target, included, out)?,
                None => out.push(line.to_string()),
            }
        }
        Ok(())
    }
}

impl SourceProvider for MemorySourceProvider {
    fn load(&self, name: &str) -> Result<Vec<String>, SourceError> {
        let mut lines = Vec::new();
        self.load_recursive(name, &mut HashSet::new(), &mut lines)?;
        Ok(lines)
    }
}

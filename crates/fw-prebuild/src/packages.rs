use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Lookup of installed platform packages (toolchains, frameworks, tools).
pub trait PackageIndex {
    /// Install directory of the first package whose name contains `needle`.
    fn find_containing(&self, needle: &str) -> Result<Option<PathBuf>>;
}

/// Package index backed by the orchestrator's packages directory.
///
/// With a non-empty `used` list only those packages are considered, which
/// mirrors asking the orchestrator for the packages the active platform uses.
#[derive(Debug, Clone)]
pub struct DirPackageIndex {
    root: PathBuf,
    used: Vec<String>,
}

impl DirPackageIndex {
    pub fn new(root: impl Into<PathBuf>, used: Vec<String>) -> Self {
        Self {
            root: root.into(),
            used,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn names(&self) -> Result<Vec<String>> {
        if !self.used.is_empty() {
            let mut names: Vec<String> = self
                .used
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            names.sort();
            return Ok(names);
        }
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let rd = fs::read_dir(&self.root)
            .map_err(|e| Error::msg(format!("failed to list {}: {e}", self.root.display())))?;
        let mut names = Vec::new();
        for entry in rd {
            let entry = entry
                .map_err(|e| Error::msg(format!("failed to list {}: {e}", self.root.display())))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl PackageIndex for DirPackageIndex {
    fn find_containing(&self, needle: &str) -> Result<Option<PathBuf>> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Err(Error::msg("package name filter is empty"));
        }
        for name in self.names()? {
            if !name.contains(needle) {
                continue;
            }
            let dir = self.root.join(&name);
            if dir.is_dir() {
                return Ok(Some(dir));
            }
            tracing::debug!(package = %name, "package listed but not installed");
        }
        Ok(None)
    }
}

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

/// Orchestrator environment variables and the `[project]` keys they override.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PROJECT_DIR", "root_dir"),
    ("PROJECT_DATA_DIR", "data_dir"),
    ("BUILD_DIR", "build_dir"),
    ("PROJECT_LIBDEPS_DIR", "libdeps_dir"),
    ("PIOENV", "env"),
    ("PLATFORMIO_PACKAGES_DIR", "packages_dir"),
];

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn from_value(value: Value) -> Self {
        Self {
            path: PathBuf::from("<mem>"),
            value,
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            cur = cur.as_table()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::msg(format!("failed to deserialize config at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }

    pub fn table_path(&self, path: &str) -> Option<&toml::value::Table> {
        self.value_path(path)?.as_table()
    }

    pub fn has_table_path(&self, path: &str) -> bool {
        self.table_path(path).is_some()
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(overlay_tbl)) => {
            for (k, v) in overlay_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, overlay_val) => {
            *base_slot = overlay_val;
        }
    }
}

/// Write orchestrator-provided values into `[project]`, replacing file values.
pub fn apply_env_overrides<F>(value: &mut Value, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(root) = value.as_table_mut() else {
        return Err(Error::msg("config root must be a table"));
    };
    for (var, key) in ENV_OVERRIDES {
        let Some(v) = lookup(var).map(|v| v.trim().to_string()) else {
            continue;
        };
        if v.is_empty() {
            continue;
        }
        let project = root
            .entry("project")
            .or_insert_with(|| Value::Table(Default::default()));
        let Some(tbl) = project.as_table_mut() else {
            return Err(Error::msg("config key 'project' must be a table"));
        };
        tracing::debug!(var, key, value = %v, "project override from environment");
        tbl.insert((*key).to_string(), Value::String(v));
    }
    Ok(())
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn parse_imports(path: &Path, value: &Value) -> Result<Vec<String>> {
    let Some(arr) = value.get("imports").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(Error::msg(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::msg(format!(
            "config import cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    // Precedence: extends < imports (in order) < this file.
    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        out = load_value_inner(&resolve_ref_path(path, ext), stack)?;
    }
    for imp in parse_imports(path, &value)? {
        let loaded = load_value_inner(&resolve_ref_path(path, &imp), stack)?;
        merge(&mut out, loaded);
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
        tbl.remove("imports");
    }
    merge(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

/// Load a build definition without consulting the environment.
pub fn load_file(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Load a build definition and apply orchestrator environment overrides.
pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut doc = load_file(path)?;
    apply_env_overrides(&mut doc.value, |k| std::env::var(k).ok())?;
    Ok(doc)
}

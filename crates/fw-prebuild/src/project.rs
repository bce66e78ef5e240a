use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Build variable naming the directory packaged into the filesystem image.
pub const DATA_DIR_VAR: &str = "PROJECT_DATA_DIR";

fn default_root_dir() -> String {
    ".".into()
}

fn default_data_dir() -> String {
    "data".into()
}

fn default_build_dir() -> String {
    "build".into()
}

fn default_libdeps_dir() -> String {
    ".pio/libdeps".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_build_dir")]
    pub build_dir: String,
    #[serde(default = "default_libdeps_dir")]
    pub libdeps_dir: String,
    pub env: Option<String>,
    pub packages_dir: Option<String>,
    pub used_packages: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            data_dir: default_data_dir(),
            build_dir: default_build_dir(),
            libdeps_dir: default_libdeps_dir(),
            env: None,
            packages_dir: None,
            used_packages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub build_dir: PathBuf,
    pub libdeps_dir: PathBuf,
    pub env: Option<String>,
    pub packages_dir: Option<PathBuf>,
    pub used_packages: Vec<String>,
}

impl ProjectPaths {
    /// `<build_dir>/<data dir name>`: where minified assets are written.
    pub fn asset_output_dir(&self) -> PathBuf {
        let name = self
            .data_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "data".into());
        self.build_dir.join(name)
    }

    /// Installed location of a library for the active environment.
    pub fn library_dir(&self, name: &str) -> Result<PathBuf> {
        let env = self.env.as_deref().ok_or_else(|| {
            Error::msg("project.env (or PIOENV) is required to locate installed libraries")
        })?;
        validate_rel_like_path(name)?;
        Ok(self.libdeps_dir.join(env).join(name))
    }
}

pub fn load_paths(cfg: &ProjectConfig) -> Result<ProjectPaths> {
    let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    resolve_paths(cfg, &cwd)
}

pub fn resolve_paths(cfg: &ProjectConfig, cwd: &Path) -> Result<ProjectPaths> {
    let env = cfg
        .env
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);
    let root = resolve_user_path(cwd, &cfg.root_dir, env.as_deref())?;
    let data_dir = resolve_user_path(&root, &cfg.data_dir, env.as_deref())?;
    let build_dir = resolve_user_path(&root, &cfg.build_dir, env.as_deref())?;
    let libdeps_dir = resolve_user_path(&root, &cfg.libdeps_dir, env.as_deref())?;
    let packages_dir = cfg
        .packages_dir
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|p| resolve_user_path(&root, p, env.as_deref()))
        .transpose()?;
    Ok(ProjectPaths {
        root,
        data_dir,
        build_dir,
        libdeps_dir,
        env,
        packages_dir,
        used_packages: cfg.used_packages.clone(),
    })
}

pub fn init_dirs(cfg: &ProjectConfig) -> Result<ProjectPaths> {
    let paths = load_paths(cfg)?;
    fs::create_dir_all(&paths.build_dir).map_err(|e| {
        Error::msg(format!(
            "failed to create build_dir {}: {e}",
            paths.build_dir.display()
        ))
    })?;
    Ok(paths)
}

fn expand_template(raw: &str, env: Option<&str>) -> Result<String> {
    if !raw.contains("{env}") {
        return Ok(raw.to_string());
    }
    let Some(env) = env else {
        return Err(Error::msg(format!(
            "path '{}' uses '{{env}}' but project.env is not set",
            raw
        )));
    };
    Ok(raw.replace("{env}", env))
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| Error::msg(format!("cannot expand '{}': HOME is not set", raw)))?;
        return Ok(PathBuf::from(home).join(rest));
    }
    Ok(PathBuf::from(raw))
}

fn resolve_user_path(base: &Path, raw: &str, env: Option<&str>) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::msg("empty project path"));
    }
    let pb = expand_home(&expand_template(raw, env)?)?;
    Ok(if pb.is_absolute() { pb } else { base.join(pb) })
}

pub fn validate_rel_like_path(p: &str) -> Result<()> {
    let path = p.trim();
    if path.is_empty() {
        return Err(Error::msg("path is empty"));
    }
    let pb = Path::new(path);
    if pb.is_absolute() {
        return Err(Error::msg(format!("path '{}' must be relative", path)));
    }
    if pb.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::msg(format!("path '{}' contains '..'", path)));
    }
    Ok(())
}

/// The single build variable shared with the orchestrator.
///
/// `source_data_dir` is captured once; every pipeline run reads from it even
/// after `PROJECT_DATA_DIR` has been redirected to the output tree.
#[derive(Debug, Clone)]
pub struct BuildVars {
    source_data_dir: PathBuf,
    data_dir: PathBuf,
}

impl BuildVars {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            source_data_dir: data_dir.clone(),
            data_dir,
        }
    }

    pub fn source_data_dir(&self) -> &Path {
        &self.source_data_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_redirected(&self) -> bool {
        self.data_dir != self.source_data_dir
    }

    pub fn redirect_data_dir(&mut self, to: impl Into<PathBuf>) {
        self.data_dir = to.into();
    }

    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![(DATA_DIR_VAR, self.data_dir.display().to_string())]
    }
}

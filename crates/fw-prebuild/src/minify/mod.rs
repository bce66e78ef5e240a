//! Asset minification pipeline.
//!
//! Mirrors a source tree into an output tree, keeping only recognized asset
//! types and running each through its minifier. The output tree is deleted
//! and rebuilt on every run; with `incremental` set, a run whose inputs and
//! previous output are unchanged is skipped instead.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::executor::ExecCtx;

pub mod formats;
pub mod stamp;
pub mod tools;

pub use formats::{AssetKind, CssOptions, HtmlOptions};
pub use tools::{ToolSpec, ToolsConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MinifyOptions {
    pub html: HtmlOptions,
    pub css: CssOptions,
    pub tools: ToolsConfig,
    pub incremental: bool,
}

impl MinifyOptions {
    pub fn minify(&self, kind: AssetKind, src: &str) -> Result<String> {
        if let Some(tool) = self.tools.get(kind) {
            return tools::run_filter(tool, src);
        }
        match kind {
            AssetKind::Html => formats::minify_html(src, &self.html),
            AssetKind::Css => formats::minify_css(src, &self.css),
            AssetKind::Js => formats::minify_js(src),
        }
    }

    /// Installs any configured external tools that are missing.
    pub fn ensure_tools(&self, ctx: &ExecCtx) -> Result<()> {
        for kind in AssetKind::ALL {
            if let Some(tool) = self.tools.get(kind) {
                tools::ensure_tool(kind, tool, ctx)?;
            }
        }
        Ok(())
    }

    // Anything that changes the produced bytes belongs in the stamp.
    fn fingerprint_salt(&self) -> Result<String> {
        let opts = serde_json::to_string(self)
            .map_err(|e| Error::msg(format!("json encode error: {e}")))?;
        Ok(format!("fwprep {} {opts}", env!("CARGO_PKG_VERSION")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub files: BTreeMap<AssetKind, usize>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// The incremental stamp matched and nothing was rewritten.
    pub skipped: bool,
}

impl PipelineReport {
    pub fn total_files(&self) -> usize {
        self.files.values().sum()
    }

    pub fn summary(&self) -> String {
        if self.skipped {
            return "output tree is current; skipped".into();
        }
        let per_kind = AssetKind::ALL
            .iter()
            .map(|k| format!("{k}={}", self.files.get(k).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "minified {} files ({per_kind}), {} -> {} bytes",
            self.total_files(),
            self.bytes_in,
            self.bytes_out
        )
    }
}

fn check_roots(src_root: &Path, out_root: &Path) -> Result<()> {
    let src = src_root
        .canonicalize()
        .unwrap_or_else(|_| src_root.to_path_buf());
    let out = out_root
        .canonicalize()
        .unwrap_or_else(|_| out_root.to_path_buf());
    if src.starts_with(&out) {
        return Err(Error::msg(format!(
            "refusing to use output tree {} (it contains the source tree {})",
            out_root.display(),
            src_root.display()
        )));
    }
    Ok(())
}

/// Files under `src_root` with the extension of `kind`, sorted, skipping `out_root`.
pub fn collect_sources(src_root: &Path, out_root: &Path, kind: AssetKind) -> Result<Vec<PathBuf>> {
    if !src_root.is_dir() {
        return Ok(Vec::new());
    }
    // Compare resolved paths: the roots may be spelled differently.
    let out_canon = out_root.canonicalize().ok();
    let is_out_root = |p: &Path| {
        p == out_root
            || out_canon
                .as_deref()
                .is_some_and(|o| p.canonicalize().is_ok_and(|c| c.as_path() == o))
    };
    let mut out = Vec::new();
    let walker = walkdir::WalkDir::new(src_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && is_out_root(e.path())));
    for entry in walker {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && AssetKind::from_path(path) == Some(kind) {
            out.push(path.to_path_buf());
        }
    }
    Ok(out)
}

fn reset_dir(dir: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(dir) {
        let res = if meta.is_dir() {
            fs::remove_dir_all(dir)
        } else {
            fs::remove_file(dir)
        };
        res.map_err(|e| Error::msg(format!("failed to remove {}: {e}", dir.display())))?;
    }
    fs::create_dir_all(dir)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", dir.display())))
}

fn write_text(p: &Path, s: &str) -> Result<()> {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", parent.display())))?;
    }
    fs::write(p, s).map_err(|e| Error::msg(format!("failed to write {}: {e}", p.display())))
}

/// Rebuilds `out_root` from `src_root`.
///
/// Only `html`, `css` and `js` files are written; everything else is left out
/// of the output tree. Any previous content of `out_root` is removed first.
pub fn run_pipeline(src_root: &Path, out_root: &Path, opts: &MinifyOptions) -> Result<PipelineReport> {
    check_roots(src_root, out_root)?;
    if !src_root.is_dir() {
        tracing::warn!(src = %src_root.display(), "asset source tree is missing");
    }

    let mut sources: Vec<(AssetKind, PathBuf)> = Vec::new();
    for kind in AssetKind::ALL {
        for path in collect_sources(src_root, out_root, kind)? {
            sources.push((kind, path));
        }
    }

    let inputs = if opts.incremental {
        let paths: Vec<PathBuf> = sources.iter().map(|(_, p)| p.clone()).collect();
        let digest = stamp::input_digest(src_root, &paths, &opts.fingerprint_salt()?)?;
        if stamp::is_current(out_root, &digest)? {
            tracing::info!(out = %out_root.display(), "asset output is current");
            return Ok(PipelineReport {
                skipped: true,
                ..PipelineReport::default()
            });
        }
        Some(digest)
    } else {
        stamp::remove(out_root)?;
        None
    };

    reset_dir(out_root)?;

    let mut report = PipelineReport::default();
    for (kind, path) in &sources {
        let rel = path.strip_prefix(src_root).map_err(|_| {
            Error::msg(format!(
                "{} is not under {}",
                path.display(),
                src_root.display()
            ))
        })?;
        let text = fs::read_to_string(path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        let minified = opts
            .minify(*kind, &text)
            .map_err(|e| Error::msg(format!("failed to minify {}: {e}", path.display())))?;
        write_text(&out_root.join(rel), &minified)?;
        tracing::debug!(file = %rel.display(), before = text.len(), after = minified.len(), "minified");

        *report.files.entry(*kind).or_insert(0) += 1;
        report.bytes_in += text.len() as u64;
        report.bytes_out += minified.len() as u64;
    }

    if let Some(digest) = inputs {
        stamp::write(out_root, &digest)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_root_may_not_contain_source() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("data");
        fs::create_dir_all(&src).expect("mkdir");

        let err = run_pipeline(&src, &src, &MinifyOptions::default())
            .unwrap_err()
            .to_string();
        assert!(err.contains("refusing"), "unexpected err: {err}");
        assert!(run_pipeline(&src, tmp.path(), &MinifyOptions::default()).is_err());
        assert!(src.is_dir());
    }

    #[test]
    fn nested_output_root_is_not_enumerated() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("data");
        let out = src.join("min");
        fs::create_dir_all(&out).expect("mkdir");
        fs::write(src.join("a.js"), "var a = 1;").expect("write");
        fs::write(out.join("old.js"), "var b = 2;").expect("write");

        let found = collect_sources(&src, &out, AssetKind::Js).unwrap();
        assert_eq!(found, vec![src.join("a.js")]);
    }

    #[test]
    fn nested_output_root_is_skipped_under_another_spelling() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("alias")).expect("mkdir alias");
        let src = tmp.path().join("data");
        let out = src.join("min");
        fs::create_dir_all(&out).expect("mkdir");
        fs::write(src.join("a.js"), "var a = 1;").expect("write");
        fs::write(out.join("old.js"), "var b = 2;").expect("write");

        let spelled = tmp.path().join("alias").join("..").join("data");
        let found = collect_sources(&spelled, &out, AssetKind::Js).unwrap();
        assert_eq!(found, vec![spelled.join("a.js")]);
    }

    #[test]
    fn missing_source_yields_empty_tree() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let out = tmp.path().join("build/data");
        let report = run_pipeline(&tmp.path().join("data"), &out, &MinifyOptions::default())
            .expect("pipeline");
        assert_eq!(report.total_files(), 0);
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }
}

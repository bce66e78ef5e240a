use serde::Deserialize;

use fw_prebuild_macros::{Module, Task};

use crate::config::ConfigDoc;
use crate::executor::ExecCtx;
use crate::packages::{DirPackageIndex, PackageIndex};
use crate::patch::{self, PatchOutcome};
use crate::project::validate_rel_like_path;
use crate::{Error, Result};

fn default_true() -> bool {
    true
}

/// One macro to guard in a set of headers shipped by a platform package.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardTarget {
    /// Substring of the package name, e.g. `framework`.
    pub package: String,
    /// Header paths relative to the package install directory.
    pub files: Vec<String>,
    pub macro_name: String,
}

#[Module(id = "headers", config = PatchTask, tasks = [PatchTask])]
pub struct HeadersModule;

#[Task(
    id = "headers.patch",
    module = "headers",
    phase = "patch",
    provides = ["headers:patched"],
    after = ["core.init", "prune:done?"],
    default_label = "Guard vendored header macros"
)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatchTask {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    pub guards: Vec<GuardTarget>,
}

impl Default for PatchTask {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            guards: Vec::new(),
        }
    }
}

impl PatchTask {
    pub fn run(cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let project = ctx.project_or_init(doc)?;
        let Some(packages_dir) = project.packages_dir.clone() else {
            if !cfg.guards.is_empty() {
                ctx.log("project.packages_dir is not set; nothing to patch");
            }
            return Ok(());
        };
        let index = DirPackageIndex::new(packages_dir, project.used_packages.clone());
        apply_guards(&cfg.guards, &index, ctx)
    }
}

/// Applies each guard target against the package that matches it.
pub fn apply_guards(guards: &[GuardTarget], index: &dyn PackageIndex, ctx: &ExecCtx) -> Result<()> {
    for guard in guards {
        if guard.macro_name.trim().is_empty() {
            return Err(Error::msg(format!(
                "headers.guards entry for package '{}' has an empty macro_name",
                guard.package
            )));
        }
        let Some(package_dir) = index.find_containing(&guard.package)? else {
            ctx.log(&format!("no package matching '{}'; skipped", guard.package));
            continue;
        };
        for rel in &guard.files {
            validate_rel_like_path(rel)?;
            let header = package_dir.join(rel.trim());
            match patch::guard_macro(&header, &guard.macro_name)? {
                PatchOutcome::Missing => {
                    ctx.log(&format!("{}: not present", header.display()));
                }
                PatchOutcome::Unchanged => {
                    ctx.log(&format!(
                        "{}: {} already guarded",
                        header.display(),
                        guard.macro_name
                    ));
                }
                PatchOutcome::Guarded { count } => {
                    ctx.log(&format!(
                        "{}: guarded {} definition(s) of {}",
                        header.display(),
                        count,
                        guard.macro_name
                    ));
                }
            }
        }
    }
    Ok(())
}

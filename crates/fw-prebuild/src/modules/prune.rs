use serde::Deserialize;

use fw_prebuild_macros::{Module, Task};

use crate::Result;
use crate::config::ConfigDoc;
use crate::executor::ExecCtx;
use crate::libdeps::{self, PruneOutcome};

fn default_true() -> bool {
    true
}

fn default_keep() -> Vec<String> {
    libdeps::DEFAULT_KEEP.iter().map(|s| s.to_string()).collect()
}

#[Module(id = "prune", config = LibrariesTask, tasks = [LibrariesTask])]
pub struct PruneModule;

/// Empties installed libraries that conflict with the build, keeping manifests.
#[Task(
    id = "prune.libraries",
    module = "prune",
    phase = "prune",
    provides = ["prune:done"],
    after = ["core.init"],
    default_label = "Prune conflicting libraries"
)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibrariesTask {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    pub libraries: Vec<String>,
    #[serde(default = "default_keep")]
    pub keep: Vec<String>,
}

impl Default for LibrariesTask {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            libraries: Vec::new(),
            keep: default_keep(),
        }
    }
}

impl LibrariesTask {
    pub fn run(cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        if cfg.libraries.is_empty() {
            return Ok(());
        }
        let project = ctx.project_or_init(doc)?;
        for name in &cfg.libraries {
            let dir = project.library_dir(name.trim())?;
            match libdeps::prune_library(&dir, &cfg.keep)? {
                PruneOutcome::Missing => {
                    ctx.log(&format!("{}: not installed; skipped", dir.display()));
                }
                PruneOutcome::AlreadyPruned => {
                    ctx.log(&format!("{}: already pruned", dir.display()));
                }
                PruneOutcome::Pruned { removed } => {
                    ctx.log(&format!(
                        "{}: removed {} entries, kept {}",
                        dir.display(),
                        removed,
                        cfg.keep.join(", ")
                    ));
                }
            }
        }
        Ok(())
    }
}

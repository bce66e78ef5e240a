use serde::Deserialize;

use fw_prebuild_macros::{Module, Task};

use crate::Result;
use crate::config::ConfigDoc;
use crate::executor::ExecCtx;
use crate::minify::{self, MinifyOptions};

fn default_true() -> bool {
    true
}

#[Module(id = "assets", config = MinifyTask, tasks = [MinifyTask], always = true)]
pub struct AssetsModule;

/// Minifies the data directory into the build tree before any filesystem
/// image is packaged, then points `PROJECT_DATA_DIR` at the result.
#[Task(
    id = "assets.minify",
    module = "assets",
    phase = "minify",
    after = ["core.init", "prune:done?", "headers:patched?"],
    provides = ["assets:minified"],
    targets = ["buildfs", "uploadfs", "uploadfsota"],
    default_label = "Minify web assets"
)]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MinifyTask {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub label: Option<String>,
    #[serde(flatten)]
    pub options: MinifyOptions,
}

impl Default for MinifyTask {
    fn default() -> Self {
        Self {
            enabled: true,
            label: None,
            options: MinifyOptions::default(),
        }
    }
}

impl MinifyTask {
    pub fn run(cfg: &Self, doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        let project = ctx.project_or_init(doc)?;
        let src = ctx
            .build_vars()
            .map(|v| v.source_data_dir().to_path_buf())
            .unwrap_or_else(|| project.data_dir.clone());
        let out = project.asset_output_dir();

        cfg.options.ensure_tools(ctx)?;
        ctx.log(&format!("{} -> {}", src.display(), out.display()));
        let report = minify::run_pipeline(&src, &out, &cfg.options)?;
        ctx.log(&report.summary());

        ctx.redirect_data_dir(out)
    }
}

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::modules::Module;
use crate::planner::{Plan, Task};
use crate::project::ProjectConfig;

const TASK_ID: &str = "core.init";

const KNOWN_TABLES: &[&str] = &["project", "prune", "headers", "assets"];

pub struct CoreModule;

impl Module for CoreModule {
    fn id(&self) -> &'static str {
        "core"
    }

    fn detect(&self, _doc: &ConfigDoc) -> bool {
        true
    }

    fn plan(&self, doc: &ConfigDoc, plan: &mut Plan) -> Result<()> {
        if let Some(root) = doc.value.as_table() {
            for (key, value) in root {
                if value.is_table() && !KNOWN_TABLES.contains(&key.as_str()) {
                    return Err(Error::msg(format!(
                        "unknown config table '{}' (expected one of: {})",
                        key,
                        KNOWN_TABLES.join(", ")
                    )));
                }
            }
        }

        plan.add(Task {
            id: TASK_ID.into(),
            label: "Resolve project paths".into(),
            module: self.id().into(),
            phase: "init".into(),
            after: vec![],
            provides: vec!["core:initialized".into()],
            targets: vec![],
        })
    }
}

impl ModuleExec for CoreModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(TASK_ID, exec)
    }
}

fn exec(doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
    ctx.set_task(TASK_ID);
    let cfg: ProjectConfig = doc.deserialize_path("project")?.unwrap_or_default();
    let paths = crate::project::init_dirs(&cfg)?;

    ctx.log(&format!("project.root = {}", paths.root.display()));
    ctx.log(&format!("project.data_dir = {}", paths.data_dir.display()));
    ctx.log(&format!("project.build_dir = {}", paths.build_dir.display()));
    ctx.log(&format!("project.libdeps_dir = {}", paths.libdeps_dir.display()));
    if let Some(env) = paths.env.as_deref() {
        ctx.log(&format!("project.env = {env}"));
    }
    if let Some(dir) = paths.packages_dir.as_ref() {
        ctx.log(&format!("project.packages_dir = {}", dir.display()));
    }
    ctx.set_project(paths);
    Ok(())
}
